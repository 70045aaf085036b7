//! The filtered-data component: search results and user marks.
//!
//! [`FilteredLogData`] owns the current search's match set and the user's
//! pinned lines, schedules searches on its worker task, and serves the
//! interleaved marks-plus-matches view that a filtered list renders from.
//! It is created once per file session and destroyed with it.

pub mod matcher;
pub mod search_data;
pub(crate) mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::info;
use parking_lot::Mutex;
use roaring::RoaringTreemap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{LoglensError, Result};
use crate::events::{SearchObservers, SearchProgress, SearchStatus};
use crate::log_data::LogData;
use crate::types::{InterruptFlag, LineNumber, LinesCount, OptionalLineNumber};

pub use matcher::SearchPattern;
pub use search_data::SearchResults;

use search_data::SearchData;
use worker::{search_worker_loop, validate_pattern, SearchContext, SearchOperation};

/// How a line relates to the current search and the user's marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineType {
    Plain,
    Match,
    Mark,
    Both,
}

impl LineType {
    pub fn is_match(self) -> bool {
        matches!(self, Self::Match | Self::Both)
    }

    pub fn is_mark(self) -> bool {
        matches!(self, Self::Mark | Self::Both)
    }
}

/// Which lines the filtered view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    MatchesOnly,
    MarksOnly,
    MarksAndMatches,
}

#[derive(Debug, Default)]
struct FilteredCache {
    lines: RoaringTreemap,
    search_revision: u64,
    marks_revision: u64,
    valid: bool,
}

/// Search engine and filtered view over one [`LogData`].
///
/// Must be created inside a tokio runtime; the worker task serving search
/// operations is spawned at construction.
pub struct FilteredLogData {
    log_data: Arc<LogData>,
    search_data: Arc<SearchData>,
    observers: Arc<SearchObservers>,
    interrupt: Arc<InterruptFlag>,
    marks: Mutex<RoaringTreemap>,
    marks_revision: AtomicU64,
    visibility: Mutex<Visibility>,
    filtered_cache: Mutex<FilteredCache>,
    current_pattern: Mutex<Option<SearchPattern>>,
    op_tx: mpsc::Sender<SearchOperation>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

impl FilteredLogData {
    pub fn new(log_data: Arc<LogData>) -> Self {
        let search_data = Arc::new(SearchData::new());
        let observers = Arc::new(SearchObservers::default());
        let interrupt = Arc::new(InterruptFlag::new());
        let cancel = CancellationToken::new();

        let (op_tx, op_rx) = mpsc::channel(16);
        let context = Arc::new(SearchContext {
            log_data: Arc::clone(&log_data),
            search_data: Arc::clone(&search_data),
            observers: Arc::clone(&observers),
            interrupt: Arc::clone(&interrupt),
            config: log_data.config().clone(),
        });
        let worker = tokio::spawn(search_worker_loop(op_rx, context, cancel.clone()));

        Self {
            log_data,
            search_data,
            observers,
            interrupt,
            marks: Mutex::new(RoaringTreemap::new()),
            marks_revision: AtomicU64::new(0),
            visibility: Mutex::new(Visibility::MarksAndMatches),
            filtered_cache: Mutex::new(FilteredCache::default()),
            current_pattern: Mutex::new(None),
            op_tx,
            cancel,
            worker,
        }
    }

    pub fn log_data(&self) -> &Arc<LogData> {
        &self.log_data
    }

    pub fn on_search_progress(&self, callback: impl Fn(SearchProgress) + Send + Sync + 'static) {
        self.observers.on_search_progress(callback);
    }

    pub fn on_search_finished(&self, callback: impl Fn(SearchStatus) + Send + Sync + 'static) {
        self.observers.on_search_finished(callback);
    }

    /// Cancel any in-flight search, clear the match set and search
    /// `[start, end)` for `pattern`.
    ///
    /// An invalid pattern is reported synchronously and leaves the match
    /// set empty.
    pub async fn run_search(
        &self,
        pattern: SearchPattern,
        start: LineNumber,
        end: LineNumber,
    ) -> Result<()> {
        if let Err(error) = validate_pattern(&pattern) {
            self.search_data.clear();
            *self.current_pattern.lock() = None;
            return Err(error);
        }

        self.interrupt.set();
        *self.current_pattern.lock() = Some(pattern.clone());
        self.op_tx
            .send(SearchOperation::Full {
                pattern,
                start,
                end,
            })
            .await
            .map_err(|_| LoglensError::internal("search worker is gone"))
    }

    /// Continue an existing search from `resume_from` after the file grew,
    /// preserving matches below the resume point. The last committed line
    /// is re-matched in case its content changed when its terminator
    /// arrived.
    pub async fn update_search(
        &self,
        pattern: SearchPattern,
        start: LineNumber,
        end: LineNumber,
        resume_from: LineNumber,
    ) -> Result<()> {
        validate_pattern(&pattern)?;

        self.interrupt.set();
        *self.current_pattern.lock() = Some(pattern.clone());
        self.op_tx
            .send(SearchOperation::Update {
                pattern,
                start,
                end,
                resume_from,
            })
            .await
            .map_err(|_| LoglensError::internal("search worker is gone"))
    }

    /// Discard matches. With `drop_cache` the remembered pattern is
    /// forgotten too.
    pub fn clear_search(&self, drop_cache: bool) {
        self.interrupt.set();
        self.search_data.clear();
        if drop_cache {
            *self.current_pattern.lock() = None;
        }
    }

    /// Cooperatively cancel the in-flight search. Idempotent.
    pub fn interrupt(&self) {
        self.interrupt.set();
    }

    /// The pattern of the current (or last) search, if remembered.
    pub fn current_pattern(&self) -> Option<SearchPattern> {
        self.current_pattern.lock().clone()
    }

    /// Matches accumulated since the previous call, with the running
    /// maximum length and the processed-lines watermark.
    pub fn results_since_last_call(&self) -> SearchResults {
        self.search_data.take_current_results()
    }

    pub fn match_count(&self) -> LinesCount {
        self.search_data.match_count()
    }

    /// Absolute line number of the `index`-th match, ascending.
    pub fn matched_line(&self, index: u64) -> OptionalLineNumber {
        self.search_data.matched_line(index)
    }

    /// Longest matched line so far, in display columns.
    pub fn max_matched_length(&self) -> crate::types::LineLength {
        self.search_data.max_length()
    }

    /// Watermark: one past the last line the search has processed. The
    /// resume point for an incremental update.
    pub fn processed_up_to(&self) -> LineNumber {
        self.search_data.processed_up_to()
    }

    pub fn line_type(&self, line: LineNumber) -> LineType {
        let matched = self.search_data.is_match(line);
        let marked = self.marks.lock().contains(line.get());
        match (matched, marked) {
            (true, true) => LineType::Both,
            (true, false) => LineType::Match,
            (false, true) => LineType::Mark,
            (false, false) => LineType::Plain,
        }
    }

    pub fn add_mark(&self, line: LineNumber) {
        if self.marks.lock().insert(line.get()) {
            self.bump_marks();
        }
    }

    pub fn toggle_mark(&self, line: LineNumber) {
        let mut marks = self.marks.lock();
        if !marks.remove(line.get()) {
            marks.insert(line.get());
        }
        drop(marks);
        self.bump_marks();
    }

    pub fn clear_marks(&self) {
        self.marks.lock().clear();
        self.bump_marks();
    }

    pub fn is_marked(&self, line: LineNumber) -> bool {
        self.marks.lock().contains(line.get())
    }

    pub fn marks_count(&self) -> LinesCount {
        LinesCount::new(self.marks.lock().len())
    }

    /// First mark strictly after `line`.
    pub fn next_mark(&self, line: LineNumber) -> OptionalLineNumber {
        let marks = self.marks.lock();
        marks.select(marks.rank(line.get())).map(LineNumber::new)
    }

    /// Last mark strictly before `line`.
    pub fn prev_mark(&self, line: LineNumber) -> OptionalLineNumber {
        if line.get() == 0 {
            return None;
        }
        let marks = self.marks.lock();
        let below = marks.rank(line.get() - 1);
        if below == 0 {
            None
        } else {
            marks.select(below - 1).map(LineNumber::new)
        }
    }

    pub fn visibility(&self) -> Visibility {
        *self.visibility.lock()
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        *self.visibility.lock() = visibility;
    }

    /// Number of lines in the filtered view under the current visibility.
    pub fn filtered_line_count(&self) -> LinesCount {
        match self.visibility() {
            Visibility::MatchesOnly => self.search_data.match_count(),
            Visibility::MarksOnly => self.marks_count(),
            Visibility::MarksAndMatches => {
                LinesCount::new(self.with_filtered_lines(|lines| lines.len()))
            }
        }
    }

    /// Absolute line number of the `index`-th visible line: matches and
    /// marks interleaved in ascending order, deduplicated.
    pub fn filtered_line(&self, index: u64) -> OptionalLineNumber {
        match self.visibility() {
            Visibility::MatchesOnly => self.search_data.matched_line(index),
            Visibility::MarksOnly => self.marks.lock().select(index).map(LineNumber::new),
            Visibility::MarksAndMatches => self
                .with_filtered_lines(|lines| lines.select(index))
                .map(LineNumber::new),
        }
    }

    /// React to a truncation of the backing file: interrupt the in-flight
    /// search and prune matches and marks to the retained line range. The
    /// embedding application calls this from its `on_file_changed`
    /// observer.
    pub fn handle_truncation(&self) {
        self.interrupt.set();
        let line_count = self.log_data.line_count();
        info!("Pruning filtered data to {line_count} lines after truncation");
        self.search_data.prune_from(line_count);
        self.marks.lock().remove_range(line_count.get()..);
        self.bump_marks();
    }

    fn bump_marks(&self) {
        self.marks_revision.fetch_add(1, Ordering::Release);
    }

    /// Run `f` over the up-to-date union of matches and marks, rebuilding
    /// the cached union only when either side changed.
    fn with_filtered_lines<R>(&self, f: impl FnOnce(&RoaringTreemap) -> R) -> R {
        let search_revision = self.search_data.revision();
        let marks_revision = self.marks_revision.load(Ordering::Acquire);

        let mut cache = self.filtered_cache.lock();
        if !cache.valid
            || cache.search_revision != search_revision
            || cache.marks_revision != marks_revision
        {
            let mut lines = self.search_data.matches_snapshot();
            lines |= &*self.marks.lock();
            cache.lines = lines;
            cache.search_revision = search_revision;
            cache.marks_revision = marks_revision;
            cache.valid = true;
        }
        f(&cache.lines)
    }
}

impl Drop for FilteredLogData {
    fn drop(&mut self) {
        self.interrupt.set();
        self.cancel.cancel();
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn component() -> FilteredLogData {
        let log_data = Arc::new(LogData::new(EngineConfig::default()));
        FilteredLogData::new(log_data)
    }

    #[tokio::test]
    async fn test_mark_toggle_round_trip() {
        let filtered = component();
        let line = LineNumber::new(42);

        filtered.add_mark(line);
        assert!(filtered.is_marked(line));

        filtered.toggle_mark(line);
        assert!(!filtered.is_marked(line));

        filtered.toggle_mark(line);
        assert!(filtered.is_marked(line));
        assert_eq!(filtered.marks_count(), LinesCount::new(1));
    }

    #[tokio::test]
    async fn test_mark_navigation() {
        let filtered = component();
        for line in [5u64, 10, 20] {
            filtered.add_mark(LineNumber::new(line));
        }

        assert_eq!(filtered.next_mark(LineNumber::new(0)), Some(LineNumber::new(5)));
        assert_eq!(filtered.next_mark(LineNumber::new(5)), Some(LineNumber::new(10)));
        assert_eq!(filtered.next_mark(LineNumber::new(20)), None);

        assert_eq!(filtered.prev_mark(LineNumber::new(20)), Some(LineNumber::new(10)));
        assert_eq!(filtered.prev_mark(LineNumber::new(5)), None);
        assert_eq!(filtered.prev_mark(LineNumber::new(0)), None);
    }

    #[tokio::test]
    async fn test_filtered_view_interleaves_marks_and_matches() {
        let filtered = component();
        filtered.add_mark(LineNumber::new(3));
        filtered.add_mark(LineNumber::new(8));

        // Simulate committed matches.
        let matches: RoaringTreemap = [5u64, 8].into_iter().collect();
        filtered.search_data.add_all(
            crate::types::LineLength::new(4),
            &matches,
            LinesCount::new(10),
        );

        assert_eq!(filtered.filtered_line_count(), LinesCount::new(3));
        assert_eq!(filtered.filtered_line(0), Some(LineNumber::new(3)));
        assert_eq!(filtered.filtered_line(1), Some(LineNumber::new(5)));
        assert_eq!(filtered.filtered_line(2), Some(LineNumber::new(8)));
        assert_eq!(filtered.filtered_line(3), None);

        assert_eq!(filtered.line_type(LineNumber::new(3)), LineType::Mark);
        assert_eq!(filtered.line_type(LineNumber::new(5)), LineType::Match);
        assert_eq!(filtered.line_type(LineNumber::new(8)), LineType::Both);
        assert_eq!(filtered.line_type(LineNumber::new(9)), LineType::Plain);

        filtered.set_visibility(Visibility::MatchesOnly);
        assert_eq!(filtered.filtered_line_count(), LinesCount::new(2));
        assert_eq!(filtered.filtered_line(0), Some(LineNumber::new(5)));

        filtered.set_visibility(Visibility::MarksOnly);
        assert_eq!(filtered.filtered_line_count(), LinesCount::new(2));
        assert_eq!(filtered.filtered_line(1), Some(LineNumber::new(8)));
    }

    #[tokio::test]
    async fn test_filtered_cache_tracks_changes() {
        let filtered = component();
        filtered.add_mark(LineNumber::new(1));
        assert_eq!(filtered.filtered_line_count(), LinesCount::new(1));

        filtered.add_mark(LineNumber::new(2));
        assert_eq!(filtered.filtered_line_count(), LinesCount::new(2));

        filtered.clear_marks();
        assert_eq!(filtered.filtered_line_count(), LinesCount::new(0));
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_synchronous_and_clears_matches() {
        let filtered = component();
        let matches: RoaringTreemap = [1u64].into_iter().collect();
        filtered.search_data.add_all(
            crate::types::LineLength::new(1),
            &matches,
            LinesCount::new(2),
        );

        let result = filtered
            .run_search(
                SearchPattern::new("(oops"),
                LineNumber::new(0),
                LineNumber::new(10),
            )
            .await;
        assert!(matches!(result, Err(LoglensError::RegexInvalid { .. })));
        assert_eq!(filtered.match_count(), LinesCount::new(0));
        assert_eq!(filtered.current_pattern(), None);
    }

    #[tokio::test]
    async fn test_clear_search_keeps_or_drops_pattern() {
        let filtered = component();
        *filtered.current_pattern.lock() = Some(SearchPattern::new("kept"));

        filtered.clear_search(false);
        assert!(filtered.current_pattern().is_some());

        filtered.clear_search(true);
        assert!(filtered.current_pattern().is_none());
    }
}
