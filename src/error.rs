//! Error types and handling infrastructure for loglens.
//!
//! A single `thiserror`-derived enum covers every failure the engine can
//! surface: file access, encoding, regular expressions and resource limits.
//! All public operations return the crate-wide [`Result`] alias.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for loglens operations.
#[derive(Error, Debug)]
pub enum LoglensError {
    /// The backing file does not exist (or disappeared before open).
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    /// An I/O operation on the backing file failed.
    #[error("Failed to read file: {message}")]
    ReadFailed {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// A read reached past the end of the file because it shrank while the
    /// read was in flight.
    #[error("File truncated during read at offset {offset}")]
    TruncatedDuringRead { offset: i64 },

    /// The requested character encoding is not a known label.
    #[error("Unknown encoding: {name}")]
    EncodingUnknown { name: String },

    /// A line could not be decoded under the current codec.
    #[error("Failed to decode line {line}")]
    EncodingDecodeError { line: u64 },

    /// The search pattern failed to compile.
    #[error("Invalid regular expression: {reason}")]
    RegexInvalid { reason: String },

    /// The search exceeded the configured global timeout.
    #[error("Search timed out after {seconds} s")]
    RegexTimeout { seconds: u64 },

    /// An allocation failed; the current operation was abandoned.
    #[error("Out of memory: {message}")]
    OutOfMemory { message: String },

    /// The operation was cancelled through an interrupt flag.
    #[error("Operation interrupted")]
    Interrupted,

    /// A bug: an invariant the engine relies on did not hold.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Standard Result type for loglens operations.
pub type Result<T> = std::result::Result<T, LoglensError>;

impl LoglensError {
    /// Create a ReadFailed from an io::Error with additional context
    pub fn read_failed(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::ReadFailed {
            message: message.into(),
            source,
        }
    }

    /// Create a RegexInvalid with a descriptive reason
    pub fn regex_invalid(reason: impl Into<String>) -> Self {
        Self::RegexInvalid {
            reason: reason.into(),
        }
    }

    /// Create an Internal error with a descriptive message
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an OutOfMemory error with a descriptive message
    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::OutOfMemory {
            message: message.into(),
        }
    }
}

// Automatic conversion from io::Error to LoglensError
impl From<std::io::Error> for LoglensError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::ReadFailed {
                message: "File not found".to_string(),
                source: err,
            },
            std::io::ErrorKind::PermissionDenied => Self::ReadFailed {
                message: "Permission denied".to_string(),
                source: err,
            },
            std::io::ErrorKind::OutOfMemory => Self::OutOfMemory {
                message: err.to_string(),
            },
            _ => Self::ReadFailed {
                message: "IO operation failed".to_string(),
                source: err,
            },
        }
    }
}
