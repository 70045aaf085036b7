//! Character encoding state and detection.
//!
//! The engine indexes raw bytes and decodes lines on demand. Two pieces of
//! encoding knowledge are kept: the *line geometry* — how many bytes of the
//! encoded line feed precede and follow the `0x0A` byte the scanner looks
//! for — and the *display codec* used to turn a line's bytes into a string.
//! Geometry is fixed when a file is (re)loaded; the codec may be swapped at
//! any time without touching the offset table.

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE};

use crate::error::{LoglensError, Result};

/// Number of head bytes fed to the detection heuristic.
pub const DETECTION_WINDOW_BYTES: usize = 4096;

/// An immutable codec reference plus the line-feed byte geometry the
/// line scanner needs for this encoding family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingState {
    encoding: &'static Encoding,
    before_cr: usize,
    after_cr: usize,
}

impl EncodingState {
    /// Build the state for a codec, deriving the line-feed offsets from the
    /// byte layout of the encoded `\n`: UTF-16LE encodes it `0A 00`, so one
    /// byte follows the `0x0A`; UTF-16BE encodes it `00 0A`, so one byte
    /// precedes it; every other supported encoding keeps `\n` a single byte.
    pub fn new(encoding: &'static Encoding) -> Self {
        let (before_cr, after_cr) = if encoding == UTF_16LE {
            (0, 1)
        } else if encoding == UTF_16BE {
            (1, 0)
        } else {
            (0, 0)
        };

        Self {
            encoding,
            before_cr,
            after_cr,
        }
    }

    /// Look a codec up by its WHATWG label ("utf-8", "shift_jis", ...).
    pub fn from_label(name: &str) -> Result<Self> {
        let encoding = Encoding::for_label(name.trim().as_bytes()).ok_or_else(|| {
            LoglensError::EncodingUnknown {
                name: name.to_string(),
            }
        })?;
        Ok(Self::new(encoding))
    }

    /// Detect the encoding of a file from its head bytes: a BOM wins, then
    /// a content heuristic over the first few KiB, then the fallback.
    pub fn detect(head: &[u8], fallback: &'static Encoding) -> Self {
        if let Some((encoding, _bom_length)) = Encoding::for_bom(head) {
            return Self::new(encoding);
        }

        if head.is_empty() {
            return Self::new(fallback);
        }

        let mut detector = EncodingDetector::new();
        let window = &head[..head.len().min(DETECTION_WINDOW_BYTES)];
        detector.feed(window, true);
        Self::new(detector.guess(None, true))
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    /// Bytes of the encoded line feed that precede the `0x0A` byte.
    pub fn before_cr(&self) -> usize {
        self.before_cr
    }

    /// Bytes of the encoded line feed that follow the `0x0A` byte.
    pub fn after_cr(&self) -> usize {
        self.after_cr
    }

    /// Total byte length of the newline sequence.
    pub fn terminator_len(&self) -> usize {
        1 + self.before_cr + self.after_cr
    }
}

/// Decode a line's content bytes with the given codec. Malformed input
/// yields U+FFFD replacement characters and never an error; a leading BOM
/// (line 0 of a BOM-marked file) is dropped.
pub fn decode_line(codec: &'static Encoding, bytes: &[u8]) -> String {
    let (decoded, _had_errors) = codec.decode_with_bom_removal(bytes);
    let mut line = decoded.into_owned();
    // A CR-LF terminator leaves its CR in the content run; drop it so the
    // rendered and matched text agree across platforms.
    if line.ends_with('\r') {
        line.pop();
    }
    line
}
