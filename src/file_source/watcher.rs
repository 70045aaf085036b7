//! Change detection for the backing file.
//!
//! A polling task fingerprints the file every tick and classifies the
//! transition since the previous tick: appended, truncated, atomically
//! replaced, or gone. Classification is a pure function over two
//! fingerprints so the state machine is testable without a filesystem.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Raw change observed on the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    Grown(i64),
    Truncated(i64),
    Vanished,
}

/// Identity-plus-size snapshot of the file at one polling tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFingerprint {
    file_id: Option<(u64, u64)>,
    size: i64,
}

impl FileFingerprint {
    pub fn of(path: &Path) -> Option<Self> {
        std::fs::metadata(path).ok().map(|md| Self::from_metadata(&md))
    }

    pub fn from_metadata(md: &Metadata) -> Self {
        Self {
            file_id: file_id(md),
            size: md.len() as i64,
        }
    }

    fn same_identity(&self, other: &Self) -> bool {
        match (self.file_id, other.file_id) {
            (Some(a), Some(b)) => a == b,
            // No identity available on this platform: fall back to treating
            // the path as the identity.
            _ => true,
        }
    }
}

#[cfg(unix)]
fn file_id(md: &Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((md.dev(), md.ino()))
}

#[cfg(not(unix))]
fn file_id(_md: &Metadata) -> Option<(u64, u64)> {
    None
}

/// Classify the transition between two polling ticks.
///
/// An identity change (atomic replace) or a reappearance after absence is
/// reported as `Truncated(0)` followed by `Grown(new_size)` so the indexer
/// discards the stale table before scanning the new contents.
pub fn classify(
    previous: Option<FileFingerprint>,
    current: Option<FileFingerprint>,
) -> Vec<FileChange> {
    match (previous, current) {
        (None, None) => Vec::new(),
        (Some(_), None) => vec![FileChange::Vanished],
        (None, Some(current)) => replacement_events(current.size),
        (Some(previous), Some(current)) => {
            if !previous.same_identity(&current) {
                replacement_events(current.size)
            } else if current.size > previous.size {
                vec![FileChange::Grown(current.size)]
            } else if current.size < previous.size {
                vec![FileChange::Truncated(current.size)]
            } else {
                Vec::new()
            }
        }
    }
}

fn replacement_events(new_size: i64) -> Vec<FileChange> {
    let mut events = vec![FileChange::Truncated(0)];
    if new_size > 0 {
        events.push(FileChange::Grown(new_size));
    }
    events
}

/// Spawn the polling watcher task. Events are delivered in classification
/// order on `tx`; the task stops when `cancel` fires or the receiver drops.
pub(crate) fn spawn_watcher(
    path: PathBuf,
    initial: Option<FileFingerprint>,
    poll_interval: Duration,
    cancel: CancellationToken,
    tx: UnboundedSender<FileChange>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last = initial;

        info!(
            "Watching {} every {} ms",
            path.display(),
            poll_interval.as_millis()
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let current = FileFingerprint::of(&path);
            for change in classify(last, current) {
                debug!("File change on {}: {:?}", path.display(), change);
                if tx.send(change).is_err() {
                    return;
                }
            }
            last = current;
        }
    })
}
