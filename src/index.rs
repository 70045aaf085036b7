//! The line-offset index.
//!
//! [`IndexingData`] is the single-writer / many-reader table mapping every
//! fully terminated line to its byte range, together with the running
//! untabified maximum line length and the scan watermark. The scanner that
//! fills it lives in the [`indexer`] submodule.
//!
//! The table stores *end* offsets: entry `i` is the offset one past line
//! `i`'s terminator, so line `i` spans `[ends[i-1], ends[i])` (with an
//! implicit `0` before entry zero). End offsets are strictly increasing.
//! Bytes past the last entry up to the watermark belong to an unterminated
//! tail that is never published as a line.

pub mod indexer;

use parking_lot::RwLock;

use crate::types::{LineLength, LineNumber, LineOffset, LinesCount};

/// A consistent view of the index at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSnapshot {
    pub line_count: LinesCount,
    pub max_length: LineLength,
    pub indexed_size: i64,
}

#[derive(Debug, Default)]
struct IndexInner {
    ends: Vec<i64>,
    max_length: i32,
    indexed_size: i64,
    tail_columns: u64,
}

/// The shared offset table. Writers publish whole blocks; readers take
/// brief read locks and copy out the boundaries they need, so no lock is
/// ever held across file I/O.
#[derive(Debug, Default)]
pub struct IndexingData {
    inner: RwLock<IndexInner>,
}

impl IndexingData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        let inner = self.inner.read();
        IndexSnapshot {
            line_count: LinesCount::new(inner.ends.len() as u64),
            max_length: LineLength::new(inner.max_length),
            indexed_size: inner.indexed_size,
        }
    }

    pub fn line_count(&self) -> LinesCount {
        LinesCount::new(self.inner.read().ends.len() as u64)
    }

    pub fn max_length(&self) -> LineLength {
        LineLength::new(self.inner.read().max_length)
    }

    /// Bytes scanned so far; incremental indexing resumes here.
    pub fn indexed_size(&self) -> i64 {
        self.inner.read().indexed_size
    }

    /// Byte range of line `line`, terminator included.
    pub fn line_range(&self, line: LineNumber) -> Option<(LineOffset, LineOffset)> {
        let inner = self.inner.read();
        let index = line.get() as usize;
        if index >= inner.ends.len() {
            return None;
        }
        let start = if index == 0 { 0 } else { inner.ends[index - 1] };
        Some((LineOffset::new(start), LineOffset::new(inner.ends[index])))
    }

    /// Byte boundaries for `count` lines starting at `first`: a vector of
    /// `count + 1` offsets where line `first + i` spans `[v[i], v[i+1])`
    /// including its terminator. `None` when the range is not fully indexed.
    pub fn line_boundaries(&self, first: LineNumber, count: LinesCount) -> Option<Vec<i64>> {
        let inner = self.inner.read();
        let first = first.get() as usize;
        let count = count.get() as usize;
        let last = first.checked_add(count)?;
        if last > inner.ends.len() {
            return None;
        }

        let mut boundaries = Vec::with_capacity(count + 1);
        boundaries.push(if first == 0 { 0 } else { inner.ends[first - 1] });
        boundaries.extend_from_slice(&inner.ends[first..last]);
        Some(boundaries)
    }

    pub(crate) fn tail_columns(&self) -> u64 {
        self.inner.read().tail_columns
    }

    /// Publish one scanned block: newly completed line ends, the new
    /// watermark, the running maximum and the tail's column count.
    pub(crate) fn append_block(
        &self,
        new_ends: &[i64],
        scanned_to: i64,
        max_length: i32,
        tail_columns: u64,
    ) {
        let mut inner = self.inner.write();
        debug_assert!(
            new_ends.first().map_or(true, |&first| {
                inner.ends.last().map_or(first > 0, |&last| first > last)
            }),
            "line end offsets must be strictly increasing"
        );
        inner.ends.extend_from_slice(new_ends);
        inner.max_length = inner.max_length.max(max_length);
        inner.indexed_size = scanned_to;
        inner.tail_columns = tail_columns;
    }

    pub(crate) fn clear(&self) {
        *self.inner.write() = IndexInner::default();
    }

    /// Largest published end offset that survives a truncation to
    /// `new_size` — the watermark the retained table will resume from.
    pub(crate) fn retained_end(&self, new_size: i64) -> i64 {
        let inner = self.inner.read();
        let keep = inner.ends.partition_point(|&end| end <= new_size);
        if keep == 0 {
            0
        } else {
            inner.ends[keep - 1]
        }
    }

    /// Drop every line not fully preserved below `new_size` and install the
    /// maximum recomputed over the retained range.
    pub(crate) fn apply_truncate(&self, new_size: i64, recomputed_max: i32) {
        let mut inner = self.inner.write();
        let keep = inner.ends.partition_point(|&end| end <= new_size);
        inner.ends.truncate(keep);
        inner.indexed_size = if keep == 0 { 0 } else { inner.ends[keep - 1] };
        inner.max_length = recomputed_max;
        inner.tail_columns = 0;
    }
}
