//! The streaming line scanner and the indexing worker.
//!
//! Bytes are pulled from the file source in fixed-size blocks and scanned
//! for the `0x0A` byte with `memchr`. The scanner honours the encoding's
//! line-feed geometry when placing boundaries, carries the untabified
//! column counter of a line across block boundaries, and leaves an
//! incomplete trailing terminator unconsumed so a later incremental pass
//! revisits it.
//!
//! One worker task owns all scans for a file session; commands arrive on an
//! mpsc channel so a full index, an incremental pass and a truncation never
//! run concurrently.

use std::sync::Arc;

use log::{error, info, warn};
use memchr::memchr_iter;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::encoding::EncodingState;
use crate::error::{LoglensError, Result};
use crate::events::{FileChangeKind, LoadStatus, LogDataObservers};
use crate::file_source::FileSource;
use crate::index::IndexingData;
use crate::types::{InterruptFlag, TAB_STOP};

/// Operations executed by the indexing worker, one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexCommand {
    /// Discard the table and scan the whole file.
    FullIndex,
    /// Scan from the current watermark to the end of the file.
    PartialIndex,
    /// Drop offsets not preserved below `new_size`, keeping whole lines.
    Truncate { new_size: i64 },
}

/// Advance an untabified column counter over a run of content bytes.
fn advance_columns(mut columns: u64, bytes: &[u8]) -> u64 {
    let mut consumed = 0usize;
    for tab in memchr_iter(b'\t', bytes) {
        columns += (tab - consumed) as u64;
        columns += (TAB_STOP - (columns as usize % TAB_STOP)) as u64;
        consumed = tab + 1;
    }
    columns + (bytes.len() - consumed) as u64
}

/// Incremental scanner state surviving across blocks within one pass.
struct LineScanner {
    before_cr: usize,
    after_cr: usize,
    /// Columns of the current partial line, including any terminator-prefix
    /// bytes counted provisionally (subtracted when the line completes).
    columns: u64,
    /// Terminator-suffix bytes still to swallow at the next block's start.
    skip: usize,
    max_length: i32,
}

impl LineScanner {
    fn new(encoding: EncodingState, tail_columns: u64) -> Self {
        Self {
            before_cr: encoding.before_cr(),
            after_cr: encoding.after_cr(),
            columns: tail_columns,
            skip: 0,
            max_length: 0,
        }
    }

    fn max_length(&self) -> i32 {
        self.max_length
    }

    fn tail_columns(&self) -> u64 {
        self.columns
    }

    /// Scan one block at absolute offset `block_pos` of a file `total`
    /// bytes long, appending completed line end offsets to `ends`.
    ///
    /// Returns the number of bytes consumed. This is `bytes.len()` except
    /// when a newline's terminator extends past `total` (a multi-byte line
    /// feed only partially written); the `0x0A` is then left unconsumed for
    /// the next pass.
    fn scan_block(&mut self, block_pos: i64, bytes: &[u8], total: i64, ends: &mut Vec<i64>) -> usize {
        let mut segment_start = 0usize;

        if self.skip > 0 {
            segment_start = self.skip.min(bytes.len());
            self.skip -= segment_start;
            if self.skip > 0 {
                return bytes.len();
            }
        }

        for newline in memchr_iter(b'\n', bytes) {
            if newline < segment_start {
                continue;
            }

            self.columns = advance_columns(self.columns, &bytes[segment_start..newline]);

            let end = block_pos + newline as i64 + 1 + self.after_cr as i64;
            if end > total {
                return newline;
            }

            // The terminator-prefix bytes were counted as content; they are
            // plain single-column bytes, so the correction is exact.
            let length = self
                .columns
                .saturating_sub(self.before_cr as u64)
                .min(i32::MAX as u64) as i32;
            self.max_length = self.max_length.max(length);

            ends.push(end);
            self.columns = 0;

            segment_start = newline + 1 + self.after_cr;
            if segment_start > bytes.len() {
                self.skip = segment_start - bytes.len();
                return bytes.len();
            }
        }

        self.columns = advance_columns(self.columns, &bytes[segment_start..]);
        bytes.len()
    }
}

/// Scan `[from, source.size())` in blocks, publishing the table after each
/// block and reporting overall percentage.
pub(crate) fn scan_range(
    source: &FileSource,
    data: &IndexingData,
    encoding: EncodingState,
    from: i64,
    block_bytes: usize,
    interrupt: &InterruptFlag,
    mut progress: impl FnMut(u8),
) -> Result<()> {
    let total = source.size();
    let block_bytes = block_bytes.max(1);

    source.attach_reader();
    let outcome = (|| {
        let mut scanner = LineScanner::new(encoding, data.tail_columns());
        let mut ends = Vec::new();
        let mut pos = from;
        let mut reported: u8 = 0;

        while pos < total {
            if interrupt.is_set() {
                info!("Indexing interrupted at offset {}", pos);
                return Err(LoglensError::Interrupted);
            }

            let length = ((total - pos) as usize).min(block_bytes);
            ends.clear();
            let consumed = source.with_bytes(pos, length, |bytes| {
                scanner.scan_block(pos, bytes, total, &mut ends)
            })?;

            pos += consumed as i64;
            data.append_block(&ends, pos, scanner.max_length(), scanner.tail_columns());

            let percentage = (pos.saturating_mul(100) / total.max(1)).min(100) as u8;
            if percentage > reported {
                reported = percentage;
                progress(percentage);
            }

            if consumed < length {
                // Incomplete trailing terminator; nothing more to scan.
                break;
            }
        }

        Ok(())
    })();
    source.detach_reader();
    outcome
}

/// Recompute the untabified maximum over `[0, retained_end)` after a
/// truncation. Same scan as indexing, with the offsets thrown away.
fn recompute_max_length(
    source: &FileSource,
    encoding: EncodingState,
    retained_end: i64,
    block_bytes: usize,
    interrupt: &InterruptFlag,
) -> Result<i32> {
    let block_bytes = block_bytes.max(1);
    source.attach_reader();
    let outcome = (|| {
        let mut scanner = LineScanner::new(encoding, 0);
        let mut ends = Vec::new();
        let mut pos = 0i64;

        while pos < retained_end {
            if interrupt.is_set() {
                return Err(LoglensError::Interrupted);
            }
            let length = ((retained_end - pos) as usize).min(block_bytes);
            ends.clear();
            let consumed = source.with_bytes(pos, length, |bytes| {
                scanner.scan_block(pos, bytes, retained_end, &mut ends)
            })?;
            pos += consumed as i64;
            if consumed < length {
                break;
            }
        }

        Ok(scanner.max_length())
    })();
    source.detach_reader();
    outcome
}

/// Shared context of the indexing worker task.
pub(crate) struct IndexWorker {
    pub source: Arc<FileSource>,
    pub data: Arc<IndexingData>,
    pub encoding: Arc<RwLock<EncodingState>>,
    pub observers: Arc<LogDataObservers>,
    pub interrupt: Arc<InterruptFlag>,
    pub last_error: Arc<Mutex<Option<LoglensError>>>,
    pub config: EngineConfig,
}

/// Run indexing commands until the sender side is dropped or the session
/// is cancelled. One command executes at a time.
pub(crate) async fn index_worker_loop(
    mut rx: mpsc::Receiver<IndexCommand>,
    worker: Arc<IndexWorker>,
    cancel: CancellationToken,
) {
    while let Some(command) = rx.recv().await {
        if cancel.is_cancelled() {
            break;
        }
        let worker = Arc::clone(&worker);
        let joined = tokio::task::spawn_blocking(move || worker.execute(command)).await;
        if let Err(join_error) = joined {
            error!("Indexing worker panicked: {}", join_error);
        }
    }
}

impl IndexWorker {
    fn execute(&self, command: IndexCommand) {
        match command {
            IndexCommand::FullIndex => self.full_index(),
            IndexCommand::PartialIndex => self.partial_index(),
            IndexCommand::Truncate { new_size } => self.truncate(new_size),
        }
    }

    fn full_index(&self) {
        self.interrupt.clear();
        self.data.clear();

        let started = std::time::Instant::now();
        let status = match self.scan_from(0) {
            Ok(()) => {
                self.observers.notify_load_progress(100);
                LoadStatus::Successful
            }
            Err(error) => self.record_error(error),
        };

        let snapshot = self.data.snapshot();
        info!(
            "Full index of {}: {} lines, max length {}, {:?} ({:?})",
            self.source.path().display(),
            snapshot.line_count,
            snapshot.max_length,
            status,
            started.elapsed()
        );
        self.observers.notify_load_finished(status);
    }

    fn partial_index(&self) {
        self.interrupt.clear();

        let new_size = match self.source.refresh() {
            Ok(size) => size,
            Err(error) => {
                self.record_error(error);
                return;
            }
        };
        let from = self.data.indexed_size();
        if new_size <= from {
            return;
        }

        match self.scan_from(from) {
            Ok(()) => {
                info!(
                    "Incremental index of {}: {} lines total",
                    self.source.path().display(),
                    self.data.line_count()
                );
                self.observers.notify_file_changed(FileChangeKind::DataAdded);
            }
            Err(error) => {
                // The already-indexed prefix stays queryable; the next
                // growth notification retries from the same watermark.
                self.record_error(error);
            }
        }
    }

    fn truncate(&self, new_size: i64) {
        self.interrupt.clear();

        let refreshed = if new_size == 0 {
            self.source.reopen()
        } else {
            self.source.refresh()
        };
        if let Err(error) = refreshed {
            self.record_error(error);
            return;
        }

        let retained_end = self.data.retained_end(new_size);
        let encoding = *self.encoding.read();
        let max_length = match recompute_max_length(
            &self.source,
            encoding,
            retained_end,
            self.config.index_block_bytes,
            &self.interrupt,
        ) {
            Ok(max) => max,
            Err(error) => {
                warn!("Max-length recompute failed after truncation: {}", error);
                self.data.max_length().get()
            }
        };
        self.data.apply_truncate(new_size, max_length);

        info!(
            "Truncated index of {} to {} lines",
            self.source.path().display(),
            self.data.line_count()
        );
        self.observers.notify_file_changed(FileChangeKind::Truncated);
    }

    fn scan_from(&self, from: i64) -> Result<()> {
        let encoding = *self.encoding.read();
        scan_range(
            &self.source,
            &self.data,
            encoding,
            from,
            self.config.index_block_bytes,
            &self.interrupt,
            |percentage| {
                // 100 is reserved for the terminal report.
                if percentage < 100 {
                    self.observers.notify_load_progress(percentage);
                }
            },
        )
    }

    fn record_error(&self, error: LoglensError) -> LoadStatus {
        let status = match &error {
            LoglensError::Interrupted => LoadStatus::Interrupted,
            LoglensError::FileNotFound { .. } => LoadStatus::FileNotFound,
            LoglensError::OutOfMemory { .. } => LoadStatus::NoMemory,
            LoglensError::EncodingUnknown { .. } | LoglensError::EncodingDecodeError { .. } => {
                LoadStatus::ErrorEncoding
            }
            _ => LoadStatus::ErrorReading,
        };
        if status != LoadStatus::Interrupted {
            error!("Indexing failed: {}", error);
        }
        *self.last_error.lock() = Some(error);
        status
    }
}
