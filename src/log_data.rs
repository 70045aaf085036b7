//! The log-data facade.
//!
//! [`LogData`] owns the file source and the index on behalf of every
//! consumer: it loads and watches a file, decodes requested lines under the
//! selected codec, applies the display prefilter, and answers the
//! line-count/length queries the views and the search engine are built on.
//! Line reads are synchronous, callable from any thread, and proceed
//! concurrently with incremental indexing.

use std::path::PathBuf;
use std::sync::Arc;

use encoding_rs::{Encoding, UTF_8};
use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::encoding::{decode_line, EncodingState, DETECTION_WINDOW_BYTES};
use crate::error::{LoglensError, Result};
use crate::events::{FileChangeKind, LoadStatus, LogDataObservers};
use crate::file_source::watcher::{spawn_watcher, FileChange, FileFingerprint};
use crate::file_source::FileSource;
use crate::index::indexer::{index_worker_loop, IndexCommand, IndexWorker};
use crate::index::{IndexSnapshot, IndexingData};
use crate::types::{
    untabified_length, untabify, InterruptFlag, LineLength, LineNumber, LineOffset, LinesCount,
};

/// Per-loaded-file state: the open source and the background tasks serving
/// it. Replaced wholesale by `load`/`reload`.
struct Session {
    source: Arc<FileSource>,
    path: PathBuf,
    cmd_tx: mpsc::Sender<IndexCommand>,
    cancel: CancellationToken,
    index_worker: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

/// The log-data engine for one viewed file.
pub struct LogData {
    config: EngineConfig,
    observers: Arc<LogDataObservers>,
    data: Arc<IndexingData>,
    interrupt: Arc<InterruptFlag>,
    last_error: Arc<Mutex<Option<LoglensError>>>,
    /// Line geometry detected at load time; drives the scanner and the
    /// terminator stripping. Not affected by display-codec switches.
    encoding: Arc<RwLock<EncodingState>>,
    /// Codec used to decode lines for display and matching.
    display_codec: RwLock<&'static Encoding>,
    prefilter: RwLock<Option<Regex>>,
    session: Mutex<Option<Session>>,
}

impl LogData {
    pub fn new(config: EngineConfig) -> Self {
        let fallback = default_encoding(&config);
        Self {
            config,
            observers: Arc::new(LogDataObservers::default()),
            data: Arc::new(IndexingData::new()),
            interrupt: Arc::new(InterruptFlag::new()),
            last_error: Arc::new(Mutex::new(None)),
            encoding: Arc::new(RwLock::new(EncodingState::new(fallback))),
            display_codec: RwLock::new(fallback),
            prefilter: RwLock::new(None),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a callback for indexing progress (percentage in 0–100).
    pub fn on_load_progress(&self, callback: impl Fn(u8) + Send + Sync + 'static) {
        self.observers.on_load_progress(callback);
    }

    /// Register a callback for the terminal status of a load.
    pub fn on_load_finished(&self, callback: impl Fn(LoadStatus) + Send + Sync + 'static) {
        self.observers.on_load_finished(callback);
    }

    /// Register a callback for classified changes to the backing file.
    pub fn on_file_changed(&self, callback: impl Fn(FileChangeKind) + Send + Sync + 'static) {
        self.observers.on_file_changed(callback);
    }

    /// Open `path` and index it in the background.
    ///
    /// Returns once the background tasks are running; progress and the
    /// terminal status arrive through the registered observers. Any
    /// previously loaded file is torn down first.
    pub async fn load(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        self.teardown_session().await;

        if !self.config.prefilter_regex.is_empty() && self.prefilter.read().is_none() {
            if let Err(error) = self.set_prefilter(&self.config.prefilter_regex.clone()) {
                warn!("Ignoring invalid configured prefilter: {}", error);
            }
        }

        let source = match FileSource::open(&path) {
            Ok(source) => Arc::new(source),
            Err(error) => {
                let status = match &error {
                    LoglensError::FileNotFound { .. } => LoadStatus::FileNotFound,
                    _ => LoadStatus::ErrorReading,
                };
                *self.last_error.lock() = Some(match &error {
                    LoglensError::FileNotFound { path } => {
                        LoglensError::FileNotFound { path: path.clone() }
                    }
                    other => LoglensError::internal(other.to_string()),
                });
                self.observers.notify_load_finished(status);
                return Err(error);
            }
        };

        let head_len = source.size().min(DETECTION_WINDOW_BYTES as i64) as usize;
        let head = source.read(0, head_len)?;
        let detected = EncodingState::detect(&head, default_encoding(&self.config));
        info!(
            "Loading {} as {} ({} bytes)",
            path.display(),
            detected.name(),
            source.size()
        );
        *self.encoding.write() = detected;
        *self.display_codec.write() = detected.encoding();

        let cancel = CancellationToken::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        let worker = Arc::new(IndexWorker {
            source: Arc::clone(&source),
            data: Arc::clone(&self.data),
            encoding: Arc::clone(&self.encoding),
            observers: Arc::clone(&self.observers),
            interrupt: Arc::clone(&self.interrupt),
            last_error: Arc::clone(&self.last_error),
            config: self.config.clone(),
        });
        let index_worker = tokio::spawn(index_worker_loop(cmd_rx, worker, cancel.clone()));

        cmd_tx
            .send(IndexCommand::FullIndex)
            .await
            .map_err(|_| LoglensError::internal("index worker exited before first command"))?;

        let (watch_tx, watch_rx) = mpsc::unbounded_channel();
        let watcher = spawn_watcher(
            path.clone(),
            FileFingerprint::of(&path),
            self.config.watch_poll_interval(),
            cancel.clone(),
            watch_tx,
        );
        tokio::spawn(supervise_changes(
            watch_rx,
            cmd_tx.clone(),
            Arc::clone(&self.observers),
        ));

        *self.session.lock() = Some(Session {
            source,
            path,
            cmd_tx,
            cancel,
            index_worker,
            watcher,
        });
        Ok(())
    }

    /// Re-open the current file and index it from scratch.
    pub async fn reload(&self) -> Result<()> {
        let path = {
            let session = self.session.lock();
            session
                .as_ref()
                .map(|s| s.path.clone())
                .ok_or_else(|| LoglensError::internal("no file loaded"))?
        };
        self.load(path).await
    }

    /// Cooperatively cancel the in-flight indexing pass.
    pub fn interrupt(&self) {
        self.interrupt.set();
    }

    /// Number of fully indexed lines.
    pub fn line_count(&self) -> LinesCount {
        self.data.line_count()
    }

    /// Length of the longest indexed line, in display columns.
    pub fn max_length(&self) -> LineLength {
        self.data.max_length()
    }

    /// Consistent view of the index at this instant.
    pub fn index_snapshot(&self) -> IndexSnapshot {
        self.data.snapshot()
    }

    /// Byte range of line `line` in the file, terminator included.
    pub fn line_range(&self, line: LineNumber) -> Option<(LineOffset, LineOffset)> {
        self.data.line_range(line)
    }

    /// Display length of line `line` after tab expansion.
    pub fn line_length(&self, line: LineNumber) -> Result<LineLength> {
        Ok(untabified_length(&self.line_raw(line)?))
    }

    /// Decoded line with tabs expanded to spaces.
    pub fn line_string(&self, line: LineNumber) -> Result<String> {
        Ok(untabify(&self.line_raw(line)?))
    }

    /// Decoded line without tab expansion; the form fed to matchers.
    pub fn line_raw(&self, line: LineNumber) -> Result<String> {
        let mut lines = self.lines_raw(line, LinesCount::new(1))?;
        lines
            .pop()
            .ok_or_else(|| LoglensError::internal("empty batch for single line"))
    }

    /// Batch of decoded lines with tabs expanded.
    pub fn lines(&self, first: LineNumber, count: LinesCount) -> Result<Vec<String>> {
        Ok(self
            .lines_raw(first, count)?
            .iter()
            .map(|line| untabify(line))
            .collect())
    }

    /// Batch of decoded lines without tab expansion.
    ///
    /// The whole byte range is read once and split on the indexed
    /// boundaries, so the result is bit-identical to a post-hoc scan of the
    /// same content no matter how indexing interleaves with the call.
    pub fn lines_raw(&self, first: LineNumber, count: LinesCount) -> Result<Vec<String>> {
        if count.get() == 0 {
            return Ok(Vec::new());
        }

        let boundaries = self
            .data
            .line_boundaries(first, count)
            .ok_or_else(|| {
                LoglensError::internal(format!(
                    "lines [{first}, {first}+{count}) not fully indexed"
                ))
            })?;
        let source = self.source()?;

        let terminator = self.encoding.read().terminator_len();
        let codec = *self.display_codec.read();
        let prefilter = self.prefilter.read().clone();

        let start = boundaries[0];
        let length = (boundaries[boundaries.len() - 1] - start) as usize;
        source.with_bytes(start, length, |bytes| {
            let mut lines = Vec::with_capacity(count.get() as usize);
            for window in boundaries.windows(2) {
                let content_length = ((window[1] - window[0]) as usize).saturating_sub(terminator);
                let relative = (window[0] - start) as usize;
                let mut line = decode_line(codec, &bytes[relative..relative + content_length]);
                if let Some(regex) = &prefilter {
                    if let std::borrow::Cow::Owned(filtered) = regex.replace_all(&line, "") {
                        line = filtered;
                    }
                }
                lines.push(line);
            }
            lines
        })
    }

    /// Select the display codec by label. The offset table is untouched;
    /// only subsequent decodes change.
    pub fn set_display_encoding(&self, name: &str) -> Result<()> {
        let state = EncodingState::from_label(name)?;
        *self.display_codec.write() = state.encoding();
        Ok(())
    }

    pub fn display_encoding_name(&self) -> &'static str {
        self.display_codec.read().name()
    }

    /// Install a regex whose matches are removed from every decoded line
    /// before display and search. An empty pattern disables it.
    pub fn set_prefilter(&self, pattern: &str) -> Result<()> {
        let regex = if pattern.is_empty() {
            None
        } else {
            Some(Regex::new(pattern).map_err(|e| LoglensError::regex_invalid(e.to_string()))?)
        };
        *self.prefilter.write() = regex;
        Ok(())
    }

    /// Declare interest in file contents, pinning the source's mappings.
    pub fn attach_reader(&self) {
        if let Ok(source) = self.source() {
            source.attach_reader();
        }
    }

    pub fn detach_reader(&self) {
        if let Ok(source) = self.source() {
            source.detach_reader();
        }
    }

    /// Message of the last indexing or loading error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().as_ref().map(|e| e.to_string())
    }

    fn source(&self) -> Result<Arc<FileSource>> {
        self.session
            .lock()
            .as_ref()
            .map(|session| Arc::clone(&session.source))
            .ok_or_else(|| LoglensError::internal("no file loaded"))
    }

    /// Stop the previous session's tasks and wait until they are gone, so
    /// the index never has two writers.
    async fn teardown_session(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.cancel.cancel();
            self.interrupt.set();
            drop(session.cmd_tx);
            let _ = session.index_worker.await;
            let _ = session.watcher.await;
        }
    }
}

impl Drop for LogData {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
            self.interrupt.set();
        }
    }
}

/// Translate raw watcher events into index commands and outward
/// notifications. `Truncated` and `Grown` drive the indexer; `Vanished`
/// is only reported.
async fn supervise_changes(
    mut rx: mpsc::UnboundedReceiver<FileChange>,
    cmd_tx: mpsc::Sender<IndexCommand>,
    observers: Arc<LogDataObservers>,
) {
    while let Some(change) = rx.recv().await {
        let sent = match change {
            FileChange::Grown(_) => cmd_tx.send(IndexCommand::PartialIndex).await,
            FileChange::Truncated(new_size) => {
                let truncate = cmd_tx.send(IndexCommand::Truncate { new_size }).await;
                if truncate.is_ok() {
                    // Content may remain past the last preserved line.
                    cmd_tx.send(IndexCommand::PartialIndex).await
                } else {
                    truncate
                }
            }
            FileChange::Vanished => {
                observers.notify_file_changed(FileChangeKind::Disappeared);
                Ok(())
            }
        };
        if sent.is_err() {
            break;
        }
    }
}

fn default_encoding(config: &EngineConfig) -> &'static Encoding {
    Encoding::for_label(config.default_encoding.as_bytes()).unwrap_or(UTF_8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn create_test_file(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all(content).expect("write test data");
        file.flush().expect("flush test data");
        file
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            file_watch_poll_ms: 20,
            ..Default::default()
        }
    }

    async fn load_and_wait(log_data: &LogData, path: &std::path::Path) -> LoadStatus {
        let (tx, mut rx) = mpsc::unbounded_channel();
        log_data.on_load_finished(move |status| {
            let _ = tx.send(status);
        });
        log_data.load(path).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("load timed out")
            .expect("load channel closed")
    }

    #[tokio::test]
    async fn test_load_and_query_lines() {
        let file = create_test_file(b"first\nsecond\nthird line\n");
        let log_data = LogData::new(test_config());

        let status = load_and_wait(&log_data, file.path()).await;
        assert_eq!(status, LoadStatus::Successful);

        assert_eq!(log_data.line_count(), LinesCount::new(3));
        assert_eq!(log_data.max_length(), LineLength::new(10));
        assert_eq!(log_data.line_string(LineNumber::new(0)).unwrap(), "first");
        assert_eq!(log_data.line_raw(LineNumber::new(2)).unwrap(), "third line");
        assert_eq!(
            log_data.lines(LineNumber::new(0), LinesCount::new(3)).unwrap(),
            vec!["first", "second", "third line"]
        );
    }

    #[tokio::test]
    async fn test_load_missing_file_reports_status() {
        let log_data = LogData::new(test_config());
        let (tx, mut rx) = mpsc::unbounded_channel();
        log_data.on_load_finished(move |status| {
            let _ = tx.send(status);
        });

        let result = log_data.load("/nonexistent/loglens.log").await;
        assert!(matches!(result, Err(LoglensError::FileNotFound { .. })));
        assert_eq!(rx.recv().await, Some(LoadStatus::FileNotFound));
    }

    #[tokio::test]
    async fn test_tab_expansion_in_line_string() {
        let file = create_test_file(b"a\tb\n");
        let log_data = LogData::new(test_config());
        load_and_wait(&log_data, file.path()).await;

        assert_eq!(log_data.line_raw(LineNumber::new(0)).unwrap(), "a\tb");
        assert_eq!(log_data.line_string(LineNumber::new(0)).unwrap(), "a       b");
        assert_eq!(
            log_data.line_length(LineNumber::new(0)).unwrap(),
            LineLength::new(9)
        );
    }

    #[tokio::test]
    async fn test_crlf_lines_are_stripped_for_display() {
        let file = create_test_file(b"one\r\ntwo\r\n");
        let log_data = LogData::new(test_config());
        load_and_wait(&log_data, file.path()).await;

        assert_eq!(log_data.line_count(), LinesCount::new(2));
        assert_eq!(log_data.line_string(LineNumber::new(0)).unwrap(), "one");
        assert_eq!(log_data.line_raw(LineNumber::new(1)).unwrap(), "two");
    }

    #[tokio::test]
    async fn test_prefilter_strips_matches_from_lines() {
        let file = create_test_file(b"\x1b[31merror\x1b[0m happened\n");
        let log_data = LogData::new(test_config());
        load_and_wait(&log_data, file.path()).await;

        log_data.set_prefilter(r"\x1b\[[0-9;]*m").unwrap();
        assert_eq!(
            log_data.line_raw(LineNumber::new(0)).unwrap(),
            "error happened"
        );

        log_data.set_prefilter("").unwrap();
        assert!(log_data
            .line_raw(LineNumber::new(0))
            .unwrap()
            .starts_with('\x1b'));
    }

    #[tokio::test]
    async fn test_set_display_encoding_round_trip() {
        let file = create_test_file(b"caf\xe9\n"); // "café" in Latin-1
        let log_data = LogData::new(test_config());
        load_and_wait(&log_data, file.path()).await;

        log_data.set_display_encoding("windows-1252").unwrap();
        let latin = log_data.line_raw(LineNumber::new(0)).unwrap();
        assert_eq!(latin, "café");

        log_data.set_display_encoding("utf-8").unwrap();
        let utf8 = log_data.line_raw(LineNumber::new(0)).unwrap();
        assert!(utf8.contains('\u{FFFD}'));

        log_data.set_display_encoding("windows-1252").unwrap();
        assert_eq!(log_data.line_raw(LineNumber::new(0)).unwrap(), latin);
    }

    #[tokio::test]
    async fn test_unknown_encoding_is_rejected() {
        let log_data = LogData::new(test_config());
        assert!(matches!(
            log_data.set_display_encoding("not-a-codec"),
            Err(LoglensError::EncodingUnknown { .. })
        ));
    }

    #[tokio::test]
    async fn test_utf16le_bom_detection_and_decode() {
        let mut bytes = vec![0xff, 0xfe];
        bytes.extend("héllo\nwörld\n".encode_utf16().flat_map(|u| u.to_le_bytes()));
        let file = create_test_file(&bytes);

        let log_data = LogData::new(test_config());
        let status = load_and_wait(&log_data, file.path()).await;
        assert_eq!(status, LoadStatus::Successful);

        assert_eq!(log_data.line_count(), LinesCount::new(2));
        assert_eq!(log_data.line_string(LineNumber::new(0)).unwrap(), "héllo");
        assert_eq!(log_data.line_string(LineNumber::new(1)).unwrap(), "wörld");
    }

    #[tokio::test]
    async fn test_line_query_out_of_range() {
        let file = create_test_file(b"only\n");
        let log_data = LogData::new(test_config());
        load_and_wait(&log_data, file.path()).await;

        assert!(log_data.line_string(LineNumber::new(1)).is_err());
        assert!(log_data
            .lines_raw(LineNumber::new(0), LinesCount::new(2))
            .is_err());
    }

    #[tokio::test]
    async fn test_reload_reindexes() {
        let file = create_test_file(b"a\nb\n");
        let log_data = LogData::new(test_config());
        load_and_wait(&log_data, file.path()).await;
        assert_eq!(log_data.line_count(), LinesCount::new(2));

        let (tx, mut rx) = mpsc::unbounded_channel();
        log_data.on_load_finished(move |status| {
            let _ = tx.send(status);
        });
        log_data.reload().await.unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, LoadStatus::Successful);
        assert_eq!(log_data.line_count(), LinesCount::new(2));
    }
}
