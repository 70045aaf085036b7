//! The staged search pipeline and its worker task.
//!
//! One worker task per file session executes search operations strictly in
//! order. Each operation runs a five-stage pipeline on dedicated OS
//! threads wired by bounded channels:
//!
//! ```text
//! block producer -> [prefetch window] -> matcher pool -> result buffer -> combiner
//! ```
//!
//! The producer reads line chunks through the log-data facade; matchers
//! each own a freshly compiled pattern and scan one chunk at a time; the
//! combiner folds partial results into the shared match set, reports
//! progress and enforces the global timeout. Every stage checks the
//! interrupt flag between tokens, and a panic inside any stage is caught
//! at its boundary and finalises the search as errored.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use roaring::RoaringTreemap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::{SearchObservers, SearchProgress, SearchStatus};
use crate::filtered_data::matcher::{CompiledPattern, SearchPattern};
use crate::filtered_data::search_data::SearchData;
use crate::log_data::LogData;
use crate::types::{untabified_length, InterruptFlag, LineNumber, LinesCount};

/// Operations executed by the search worker, one at a time.
#[derive(Debug, Clone)]
pub(crate) enum SearchOperation {
    /// Clear the match set and search `[start, end)`.
    Full {
        pattern: SearchPattern,
        start: LineNumber,
        end: LineNumber,
    },
    /// Keep existing matches and continue from `resume_from`, re-matching
    /// the last committed line in case it was rewritten.
    Update {
        pattern: SearchPattern,
        start: LineNumber,
        end: LineNumber,
        resume_from: LineNumber,
    },
}

/// Everything a search operation needs, shared with the owning component.
pub(crate) struct SearchContext {
    pub log_data: Arc<LogData>,
    pub search_data: Arc<SearchData>,
    pub observers: Arc<SearchObservers>,
    pub interrupt: Arc<InterruptFlag>,
    pub config: EngineConfig,
}

/// Run search operations until the sender side is dropped or the session
/// is cancelled.
pub(crate) async fn search_worker_loop(
    mut rx: mpsc::Receiver<SearchOperation>,
    ctx: Arc<SearchContext>,
    cancel: CancellationToken,
) {
    while let Some(operation) = rx.recv().await {
        if cancel.is_cancelled() {
            break;
        }
        let ctx = Arc::clone(&ctx);
        let joined = tokio::task::spawn_blocking(move || execute_operation(&ctx, operation)).await;
        if let Err(join_error) = joined {
            error!("Search worker panicked: {}", join_error);
        }
    }
}

fn execute_operation(ctx: &SearchContext, operation: SearchOperation) {
    ctx.interrupt.clear();

    let status = match operation {
        SearchOperation::Full {
            pattern,
            start,
            end,
        } => {
            info!("Search requested: {:?} over [{start}, {end})", pattern.pattern);
            ctx.search_data.clear();
            run_search_pipeline(ctx, &pattern, start, start, end)
        }
        SearchOperation::Update {
            pattern,
            start,
            end,
            resume_from,
        } => {
            info!(
                "Search update requested from {resume_from}: {:?}",
                pattern.pattern
            );
            let mut initial = ctx.search_data.processed_up_to().max(resume_from);
            if initial.get() >= 1 {
                // The last processed line may have been rewritten when its
                // trailing newline arrived; re-match it, without letting a
                // previous match of it count twice.
                initial = initial - LinesCount::new(1);
                ctx.search_data.delete_match(initial);
            }
            run_search_pipeline(ctx, &pattern, initial, start, end)
        }
    };

    ctx.observers.notify_search_finished(status);
}

/// A chunk of adjacent raw lines headed for one matcher.
struct SearchBlock {
    chunk_start: LineNumber,
    lines: Vec<String>,
}

/// One matcher's verdict over one chunk.
struct PartialResults {
    chunk_start: LineNumber,
    matching_lines: RoaringTreemap,
    max_length: i32,
    processed_lines: u64,
}

fn filter_lines(
    matcher: &CompiledPattern,
    lines: &[String],
    chunk_start: LineNumber,
) -> PartialResults {
    let mut results = PartialResults {
        chunk_start,
        matching_lines: RoaringTreemap::new(),
        max_length: 0,
        processed_lines: lines.len() as u64,
    };

    for (offset, line) in lines.iter().enumerate() {
        if matcher.has_match(line) {
            results.max_length = results.max_length.max(untabified_length(line).get());
            results.matching_lines.insert(chunk_start.get() + offset as u64);
        }
    }

    results
}

fn run_search_pipeline(
    ctx: &SearchContext,
    pattern: &SearchPattern,
    initial_line: LineNumber,
    start_line: LineNumber,
    end_line: LineNumber,
) -> SearchStatus {
    let initial_line = initial_line.max(start_line);
    let end_line = end_line.min(LineNumber::new(ctx.log_data.line_count().get()));

    // A compile failure here means a pattern that validated at request
    // time stopped compiling, which is a bug; surface it as an error.
    if let Err(compile_error) = CompiledPattern::compile(pattern) {
        error!("Search pattern failed to compile: {}", compile_error);
        ctx.search_data.clear();
        return SearchStatus::Errored;
    }

    if initial_line >= end_line {
        ctx.observers.notify_search_progress(SearchProgress {
            matches: ctx.search_data.match_count(),
            percentage: 100,
            initial_line,
        });
        return SearchStatus::Complete;
    }

    let matcher_count = ctx.config.matcher_count();
    let chunk_lines = ctx.config.search_chunk_lines.max(1);
    let timeout = ctx.config.search_timeout();
    let total_lines = (end_line - initial_line).get().max(1);

    info!(
        "Searching [{initial_line}, {end_line}) with {matcher_count} matchers, {chunk_lines}-line chunks"
    );
    let started = Instant::now();

    // The bounded block channel is the prefetch window: the producer stalls
    // once this many chunks are in flight, until the combiner catches up.
    let (block_tx, block_rx) = crossbeam_channel::bounded::<SearchBlock>(matcher_count * 3);
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<PartialResults>();

    let stage_panicked = AtomicBool::new(false);
    let panicked = &stage_panicked;
    let interrupt = &*ctx.interrupt;
    let log_data = &*ctx.log_data;

    let mut timed_out = false;
    let read_failed = AtomicBool::new(false);
    let read_failed_flag = &read_failed;

    std::thread::scope(|scope| {
        // Stage 1: block producer.
        scope.spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let mut chunk_start = initial_line;
                while chunk_start < end_line {
                    if interrupt.is_set() {
                        info!("Block producer interrupted at {chunk_start}");
                        break;
                    }

                    let lines_in_chunk =
                        LinesCount::new(chunk_lines.min((end_line - chunk_start).get()));
                    match log_data.lines_raw(chunk_start, lines_in_chunk) {
                        Ok(lines) => {
                            debug!("Read chunk starting at {chunk_start}");
                            if block_tx.send(SearchBlock { chunk_start, lines }).is_err() {
                                break;
                            }
                        }
                        Err(error) => {
                            // Typically the file shrank under the search;
                            // commit what was matched and stop cleanly.
                            warn!("Chunk read failed at {chunk_start}: {error}");
                            read_failed_flag.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                    chunk_start = chunk_start + lines_in_chunk;
                }
            }));
            if outcome.is_err() {
                panicked.store(true, Ordering::SeqCst);
                interrupt.set();
            }
        });

        // Stage 2: matcher pool. Each matcher compiles and owns its own
        // pattern instance.
        for matcher_index in 0..matcher_count {
            let block_rx = block_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    let matcher = match CompiledPattern::compile(pattern) {
                        Ok(matcher) => matcher,
                        Err(compile_error) => {
                            error!("Matcher {matcher_index} failed to compile: {compile_error}");
                            panicked.store(true, Ordering::SeqCst);
                            interrupt.set();
                            return;
                        }
                    };

                    for block in block_rx.iter() {
                        let results = filter_lines(&matcher, &block.lines, block.chunk_start);
                        debug!(
                            "Matcher {matcher_index} block {} sending {} matches",
                            block.chunk_start,
                            results.matching_lines.len()
                        );
                        if result_tx.send(results).is_err() {
                            break;
                        }
                    }
                }));
                if outcome.is_err() {
                    panicked.store(true, Ordering::SeqCst);
                    interrupt.set();
                }
            });
        }
        drop(block_rx);
        drop(result_tx);

        // Stages 3–5: the result buffer decouples matcher completion order
        // from commit order; the combiner holds back out-of-order partials
        // and commits them by chunk start, so the processed-line watermark
        // advances contiguously and a resumed search never skips a chunk.
        let mut pending: std::collections::BTreeMap<u64, PartialResults> =
            std::collections::BTreeMap::new();
        let mut next_chunk = initial_line.get();
        let mut total_processed = 0u64;
        let mut matches_so_far = ctx.search_data.match_count().get();
        let mut reported_matches = matches_so_far;
        let mut reported_percentage = 0u8;

        for partial in result_rx.iter() {
            if interrupt.is_set() {
                debug!("Combiner draining after interrupt");
                continue;
            }

            pending.insert(partial.chunk_start.get(), partial);
            while let Some(partial) = pending.remove(&next_chunk) {
                if partial.processed_lines == 0 {
                    break;
                }
                next_chunk += partial.processed_lines;
                total_processed += partial.processed_lines;
                matches_so_far += partial.matching_lines.len();

                ctx.search_data.add_all(
                    crate::types::LineLength::new(partial.max_length),
                    &partial.matching_lines,
                    LinesCount::new(next_chunk),
                );
                debug!(
                    "Combined chunk starting at {}, {} lines processed",
                    partial.chunk_start, partial.processed_lines
                );
            }

            let percentage = ((100 * total_processed) / total_lines).min(100) as u8;
            if percentage > reported_percentage || matches_so_far > reported_matches {
                ctx.observers.notify_search_progress(SearchProgress {
                    matches: LinesCount::new(matches_so_far),
                    percentage: percentage.min(99),
                    initial_line,
                });
                reported_percentage = percentage;
                reported_matches = matches_so_far;
            }

            if !timed_out && started.elapsed() > timeout {
                warn!("Search timed out after {:?}", timeout);
                timed_out = true;
                interrupt.set();
            }
        }
    });

    let elapsed = started.elapsed();
    info!(
        "Searching done, {} matches over {} lines in {:?} ({} lines/s)",
        ctx.search_data.match_count(),
        total_lines,
        elapsed,
        (total_lines as f64 / elapsed.as_secs_f64().max(1e-9)) as u64
    );

    if stage_panicked.load(Ordering::SeqCst) {
        error!("Search pipeline stage failed; clearing match set");
        ctx.search_data.clear();
        SearchStatus::Errored
    } else if timed_out {
        SearchStatus::TimedOut
    } else if ctx.interrupt.is_set() || read_failed.load(Ordering::SeqCst) {
        // A failed chunk read means the range shrank under the search;
        // like an interrupt, the committed partial set is preserved.
        SearchStatus::Interrupted
    } else {
        ctx.observers.notify_search_progress(SearchProgress {
            matches: ctx.search_data.match_count(),
            percentage: 100,
            initial_line,
        });
        SearchStatus::Complete
    }
}

/// Compile-check a pattern before it is queued, so callers get a
/// synchronous `RegexInvalid` with the match set untouched by the worker.
pub(crate) fn validate_pattern(pattern: &SearchPattern) -> Result<()> {
    CompiledPattern::compile(pattern).map(|_| ())
}
