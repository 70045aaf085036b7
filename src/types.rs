//! Strong types for line quantities.
//!
//! Line numbers, line counts, byte offsets and display lengths are easy to
//! mix up in an indexer; each gets its own newtype here, with only the
//! arithmetic that makes sense between them. Subtraction saturates at zero
//! so window computations near the start of a file need no special cases.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use memchr::memchr_iter;

/// Zero-based number of a line in the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineNumber(u64);

/// A number of lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinesCount(u64);

/// A byte position in the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineOffset(i64);

/// The display length of a line, in columns after tab expansion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineLength(i32);

pub type OptionalLineNumber = Option<LineNumber>;

impl LineNumber {
    pub const MAX: LineNumber = LineNumber(u64::MAX);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl LinesCount {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl LineOffset {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl LineLength {
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for LineNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for LinesCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for LineOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for LineLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::ops::Add<LinesCount> for LineNumber {
    type Output = LineNumber;

    fn add(self, count: LinesCount) -> LineNumber {
        LineNumber(self.0.saturating_add(count.0))
    }
}

impl std::ops::Sub<LinesCount> for LineNumber {
    type Output = LineNumber;

    fn sub(self, count: LinesCount) -> LineNumber {
        LineNumber(self.0.saturating_sub(count.0))
    }
}

impl std::ops::Sub<LineNumber> for LineNumber {
    type Output = LinesCount;

    fn sub(self, other: LineNumber) -> LinesCount {
        LinesCount(self.0.saturating_sub(other.0))
    }
}

impl std::ops::Add for LinesCount {
    type Output = LinesCount;

    fn add(self, other: LinesCount) -> LinesCount {
        LinesCount(self.0.saturating_add(other.0))
    }
}

impl std::ops::AddAssign for LinesCount {
    fn add_assign(&mut self, other: LinesCount) {
        self.0 = self.0.saturating_add(other.0);
    }
}

impl std::ops::Sub for LinesCount {
    type Output = LinesCount;

    fn sub(self, other: LinesCount) -> LinesCount {
        LinesCount(self.0.saturating_sub(other.0))
    }
}

impl std::ops::Add<i64> for LineOffset {
    type Output = LineOffset;

    fn add(self, bytes: i64) -> LineOffset {
        LineOffset(self.0 + bytes)
    }
}

impl std::ops::Sub for LineOffset {
    type Output = i64;

    fn sub(self, other: LineOffset) -> i64 {
        self.0 - other.0
    }
}

// A line number is routinely compared against a line count ("is this line
// indexed yet"), so the mixed comparisons are spelled out.
impl PartialEq<LinesCount> for LineNumber {
    fn eq(&self, count: &LinesCount) -> bool {
        self.0 == count.0
    }
}

impl PartialOrd<LinesCount> for LineNumber {
    fn partial_cmp(&self, count: &LinesCount) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(&count.0)
    }
}

impl PartialEq<LineNumber> for LinesCount {
    fn eq(&self, number: &LineNumber) -> bool {
        self.0 == number.0
    }
}

impl PartialOrd<LineNumber> for LinesCount {
    fn partial_cmp(&self, number: &LineNumber) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(&number.0)
    }
}

/// Length of a tab stop.
pub const TAB_STOP: usize = 8;

/// Expand tabs to spaces up to the next tab stop. NUL characters are
/// rendered as a space so they do not truncate the displayed line.
pub fn untabify(line: &str) -> String {
    let mut expanded = String::with_capacity(line.len());
    let mut column = 0usize;

    for ch in line.chars() {
        match ch {
            '\t' => {
                let spaces = TAB_STOP - column % TAB_STOP;
                for _ in 0..spaces {
                    expanded.push(' ');
                }
                column += spaces;
            }
            '\0' => {
                expanded.push(' ');
                column += 1;
            }
            _ => {
                expanded.push(ch);
                column += 1;
            }
        }
    }

    expanded
}

/// Display length of a line after tab expansion. Bytes count one column
/// each; a tab advances to the next multiple of [`TAB_STOP`].
pub fn untabified_length(line: &str) -> LineLength {
    let bytes = line.as_bytes();
    let mut total_spaces = 0usize;

    for tab_position in memchr_iter(b'\t', bytes) {
        let spaces = TAB_STOP - (tab_position + total_spaces) % TAB_STOP - 1;
        total_spaces += spaces;
    }

    LineLength((bytes.len() + total_spaces) as i32)
}

/// Cooperative cancellation flag shared between a pipeline and its owner.
///
/// Setting the flag is idempotent and never fails; every pipeline stage
/// checks it between tokens and stops at the next suspension point.
#[derive(Debug, Default)]
pub struct InterruptFlag(AtomicBool);

impl InterruptFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
