//! # loglens - Log-Data Engine for Interactive Log Viewers
//!
//! The data layer behind an interactive large-file log viewer: ingest
//! arbitrarily large text files (including files that grow while being
//! viewed), index every line's byte offset, track appends, truncations and
//! replacements of the backing file, decode lines on demand under a
//! caller-chosen encoding, and run parallel regular-expression searches
//! that stream partial results back to the embedding application.
//!
//! ## Architecture
//!
//! Four components composed bottom-up:
//!
//! - [`file_source`] - the open file, byte-range reads over a memory
//!   mapping, reader reservations and change detection
//! - [`index`] - the streaming line-offset indexer and its shared table
//! - [`log_data`] - the facade: loading, decoding, prefiltering and
//!   line-addressable access for views and the search engine
//! - [`filtered_data`] - the parallel search pipeline, the match set and
//!   the user's marks
//!
//! Supporting modules: [`types`] (strong line types), [`encoding`] (codec
//! state and detection), [`events`] (observer registration), [`config`]
//! and [`error`].
//!
//! The engine performs no I/O on behalf of the UI beyond the file itself
//! and communicates exclusively through registered callbacks.

pub mod config;
pub mod encoding;
pub mod error;
pub mod events;
pub mod file_source;
pub mod filtered_data;
pub mod index;
pub mod log_data;
pub mod types;

// Re-export commonly used types for convenience
pub use config::EngineConfig;
pub use error::{LoglensError, Result};
pub use events::{FileChangeKind, LoadStatus, SearchProgress, SearchStatus};
pub use filtered_data::{FilteredLogData, LineType, SearchPattern, SearchResults, Visibility};
pub use log_data::LogData;
pub use types::{LineLength, LineNumber, LineOffset, LinesCount, OptionalLineNumber};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
