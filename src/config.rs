//! Engine configuration.
//!
//! A plain options struct consumed at construction time. The enclosing
//! application decides where the values come from (CLI flags, a settings
//! store); the engine only reads them.

use std::time::Duration;

/// Options consumed by the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Enable the parallel matcher pool; when false, a single matcher runs.
    pub parallel_search: bool,
    /// Explicit matcher count; 0 derives it from hardware concurrency.
    pub search_pool_size: usize,
    /// Lines handed to one matcher invocation.
    pub search_chunk_lines: u64,
    /// Indexer I/O block size in bytes.
    pub index_block_bytes: usize,
    /// Change-detection polling interval.
    pub file_watch_poll_ms: u64,
    /// Global search timeout in seconds.
    pub search_timeout_s: u64,
    /// Regex removed from every decoded line before display and search;
    /// empty disables.
    pub prefilter_regex: String,
    /// Codec label used when auto-detection fails.
    pub default_encoding: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel_search: true,
            search_pool_size: 0,
            search_chunk_lines: 5000,
            index_block_bytes: 1024 * 1024,
            file_watch_poll_ms: 1000,
            search_timeout_s: 60,
            prefilter_regex: String::new(),
            default_encoding: "UTF-8".to_string(),
        }
    }
}

impl EngineConfig {
    /// Number of matcher threads for the search pipeline.
    pub fn matcher_count(&self) -> usize {
        if !self.parallel_search {
            return 1;
        }
        if self.search_pool_size != 0 {
            return self.search_pool_size.max(1);
        }
        let hardware = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        hardware.saturating_sub(1).max(1)
    }

    pub fn watch_poll_interval(&self) -> Duration {
        Duration::from_millis(self.file_watch_poll_ms.max(1))
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_s)
    }
}
