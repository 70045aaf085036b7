//! Typed event notifications.
//!
//! The engine never holds a pointer back into the enclosing application.
//! Collaborators register plain callbacks for the events they care about;
//! callbacks are invoked from engine worker threads and must be cheap and
//! non-blocking (typically: post to the application's own event loop).

use parking_lot::RwLock;

use crate::types::{LineNumber, LinesCount};

/// Terminal status of a load or reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Successful,
    Interrupted,
    NoMemory,
    ErrorReading,
    ErrorEncoding,
    FileNotFound,
}

/// Classification of a change to the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    DataAdded,
    Truncated,
    Disappeared,
}

/// Terminal status of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    Complete,
    Interrupted,
    TimedOut,
    Errored,
}

/// A progress report emitted while a search runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchProgress {
    /// Matches accumulated so far.
    pub matches: LinesCount,
    /// 0–99 while running; a final event carries 100.
    pub percentage: u8,
    /// First line of the range this search covers.
    pub initial_line: LineNumber,
}

type Callbacks<T> = RwLock<Vec<Box<dyn Fn(T) + Send + Sync>>>;

fn notify<T: Copy>(callbacks: &Callbacks<T>, value: T) {
    for callback in callbacks.read().iter() {
        callback(value);
    }
}

/// Observer registration for the log-data facade.
#[derive(Default)]
pub struct LogDataObservers {
    load_progress: Callbacks<u8>,
    load_finished: Callbacks<LoadStatus>,
    file_changed: Callbacks<FileChangeKind>,
}

impl LogDataObservers {
    /// Register a callback for indexing progress (percentage in 0–100).
    pub fn on_load_progress(&self, callback: impl Fn(u8) + Send + Sync + 'static) {
        self.load_progress.write().push(Box::new(callback));
    }

    pub fn on_load_finished(&self, callback: impl Fn(LoadStatus) + Send + Sync + 'static) {
        self.load_finished.write().push(Box::new(callback));
    }

    pub fn on_file_changed(&self, callback: impl Fn(FileChangeKind) + Send + Sync + 'static) {
        self.file_changed.write().push(Box::new(callback));
    }

    pub(crate) fn notify_load_progress(&self, percentage: u8) {
        notify(&self.load_progress, percentage);
    }

    pub(crate) fn notify_load_finished(&self, status: LoadStatus) {
        notify(&self.load_finished, status);
    }

    pub(crate) fn notify_file_changed(&self, kind: FileChangeKind) {
        notify(&self.file_changed, kind);
    }
}

/// Observer registration for the search engine.
#[derive(Default)]
pub struct SearchObservers {
    search_progress: Callbacks<SearchProgress>,
    search_finished: Callbacks<SearchStatus>,
}

impl SearchObservers {
    pub fn on_search_progress(&self, callback: impl Fn(SearchProgress) + Send + Sync + 'static) {
        self.search_progress.write().push(Box::new(callback));
    }

    pub fn on_search_finished(&self, callback: impl Fn(SearchStatus) + Send + Sync + 'static) {
        self.search_finished.write().push(Box::new(callback));
    }

    pub(crate) fn notify_search_progress(&self, progress: SearchProgress) {
        notify(&self.search_progress, progress);
    }

    pub(crate) fn notify_search_finished(&self, status: SearchStatus) {
        notify(&self.search_finished, status);
    }
}
