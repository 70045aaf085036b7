//! Shared accumulator for one search's results.
//!
//! The combiner folds partial results in; consumers poll. Matches live in a
//! compressed bitmap keyed by line number, so ordered iteration, membership
//! and union stay cheap from empty up to tens of millions of matched lines.
//! The delta set supports the incremental delivery protocol: each
//! [`take_current_results`](SearchData::take_current_results) hands back
//! only the matches accumulated since the previous call.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use roaring::RoaringTreemap;

use crate::types::{LineLength, LineNumber, LinesCount, OptionalLineNumber};

/// One increment of search results, as delivered to a polling consumer.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SearchResults {
    /// Matches accumulated since the previous poll.
    pub new_matches: RoaringTreemap,
    /// Longest matched line so far, in display columns.
    pub max_length: LineLength,
    /// Lines processed so far (watermark, one past the last).
    pub processed_lines: LinesCount,
}

#[derive(Debug, Default)]
struct SearchDataInner {
    matches: RoaringTreemap,
    new_matches: RoaringTreemap,
    max_length: i32,
    processed_lines: u64,
}

/// The match owner: all state of the current search behind one mutex.
#[derive(Debug, Default)]
pub(crate) struct SearchData {
    inner: Mutex<SearchDataInner>,
    revision: AtomicU64,
}

impl SearchData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the accumulated delta, leaving totals in place.
    pub fn take_current_results(&self) -> SearchResults {
        let mut inner = self.inner.lock();
        SearchResults {
            new_matches: std::mem::take(&mut inner.new_matches),
            max_length: LineLength::new(inner.max_length),
            processed_lines: LinesCount::new(inner.processed_lines),
        }
    }

    /// Fold one partial result in.
    pub fn add_all(&self, max_length: LineLength, matches: &RoaringTreemap, processed: LinesCount) {
        let mut inner = self.inner.lock();
        inner.max_length = inner.max_length.max(max_length.get());
        inner.processed_lines = inner.processed_lines.max(processed.get());
        inner.matches |= matches;
        inner.new_matches |= matches;
        drop(inner);
        self.bump();
    }

    pub fn match_count(&self) -> LinesCount {
        LinesCount::new(self.inner.lock().matches.len())
    }

    pub fn max_length(&self) -> LineLength {
        LineLength::new(self.inner.lock().max_length)
    }

    /// Watermark: one past the last processed line.
    pub fn processed_up_to(&self) -> LineNumber {
        LineNumber::new(self.inner.lock().processed_lines)
    }

    pub fn is_match(&self, line: LineNumber) -> bool {
        self.inner.lock().matches.contains(line.get())
    }

    /// Absolute line number of the `index`-th match, in ascending order.
    pub fn matched_line(&self, index: u64) -> OptionalLineNumber {
        self.inner.lock().matches.select(index).map(LineNumber::new)
    }

    /// Copy of the full match set, for building interleaved views.
    pub fn matches_snapshot(&self) -> RoaringTreemap {
        self.inner.lock().matches.clone()
    }

    /// Remove one line from the set; used before re-matching the last
    /// committed line on an incremental update.
    pub fn delete_match(&self, line: LineNumber) {
        let mut inner = self.inner.lock();
        inner.matches.remove(line.get());
        inner.new_matches.remove(line.get());
        drop(inner);
        self.bump();
    }

    /// Drop every match at or past `line_count` after a truncation, and
    /// pull the watermark back inside the file.
    pub fn prune_from(&self, line_count: LinesCount) {
        let mut inner = self.inner.lock();
        inner.matches.remove_range(line_count.get()..);
        inner.new_matches.remove_range(line_count.get()..);
        inner.processed_lines = inner.processed_lines.min(line_count.get());
        drop(inner);
        self.bump();
    }

    pub fn clear(&self) {
        *self.inner.lock() = SearchDataInner::default();
        self.bump();
    }

    /// Monotone counter bumped on every mutation; lets view caches detect
    /// staleness without holding the mutex.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn treemap(lines: &[u64]) -> RoaringTreemap {
        lines.iter().copied().collect()
    }

    #[test]
    fn test_add_all_accumulates_in_order() {
        let data = SearchData::new();
        // Chunks commit out of order; the set stays sorted.
        data.add_all(LineLength::new(10), &treemap(&[50, 60]), LinesCount::new(70));
        data.add_all(LineLength::new(7), &treemap(&[1, 3]), LinesCount::new(10));

        assert_eq!(data.match_count(), LinesCount::new(4));
        assert_eq!(data.max_length(), LineLength::new(10));
        assert_eq!(data.processed_up_to(), LineNumber::new(70));

        assert_eq!(data.matched_line(0), Some(LineNumber::new(1)));
        assert_eq!(data.matched_line(2), Some(LineNumber::new(50)));
        assert_eq!(data.matched_line(4), None);
    }

    #[test]
    fn test_take_current_results_drains_delta_only() {
        let data = SearchData::new();
        data.add_all(LineLength::new(5), &treemap(&[2, 4]), LinesCount::new(5));

        let first = data.take_current_results();
        assert_eq!(first.new_matches, treemap(&[2, 4]));

        let second = data.take_current_results();
        assert!(second.new_matches.is_empty());
        // Totals survive the drain.
        assert_eq!(data.match_count(), LinesCount::new(2));

        data.add_all(LineLength::new(5), &treemap(&[9]), LinesCount::new(10));
        let third = data.take_current_results();
        assert_eq!(third.new_matches, treemap(&[9]));
        assert_eq!(third.processed_lines, LinesCount::new(10));
    }

    #[test]
    fn test_delete_match() {
        let data = SearchData::new();
        data.add_all(LineLength::new(5), &treemap(&[1, 2, 3]), LinesCount::new(4));

        data.delete_match(LineNumber::new(2));
        assert_eq!(data.match_count(), LinesCount::new(2));
        assert!(!data.is_match(LineNumber::new(2)));
        assert!(data.is_match(LineNumber::new(3)));
    }

    #[test]
    fn test_prune_from_truncation() {
        let data = SearchData::new();
        data.add_all(LineLength::new(5), &treemap(&[1, 50, 99, 150]), LinesCount::new(200));

        data.prune_from(LinesCount::new(100));
        assert_eq!(data.match_count(), LinesCount::new(3));
        assert!(!data.is_match(LineNumber::new(150)));
        assert_eq!(data.processed_up_to(), LineNumber::new(100));
    }

    #[test]
    fn test_clear_resets_everything() {
        let data = SearchData::new();
        data.add_all(LineLength::new(5), &treemap(&[1]), LinesCount::new(2));
        data.clear();

        assert_eq!(data.match_count(), LinesCount::new(0));
        assert_eq!(data.max_length(), LineLength::new(0));
        assert_eq!(data.processed_up_to(), LineNumber::new(0));
        assert!(data.take_current_results().new_matches.is_empty());
    }

    #[test]
    fn test_revision_bumps_on_mutation() {
        let data = SearchData::new();
        let before = data.revision();
        data.add_all(LineLength::new(1), &treemap(&[7]), LinesCount::new(8));
        assert!(data.revision() > before);
    }
}
