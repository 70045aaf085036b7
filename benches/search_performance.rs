//! Indexing and search throughput over generated service logs.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use loglens::{EngineConfig, FilteredLogData, LineNumber, LogData, SearchPattern};

const COMPONENTS: [&str; 6] = ["ingest", "router", "storage", "query", "compactor", "gc"];
const SEVERITIES: [&str; 4] = ["trace", "info", "warn", "fail"];

/// Write `line_count` lines of synthetic shard-service logs. Roughly one
/// line in `needle_every` records a dropped connection — the needle the
/// search benchmarks look for. A sprinkling of tab-separated payload
/// dumps and oversized lines keeps the indexer's length tracking honest.
fn write_sample_log(line_count: usize, needle_every: usize) -> NamedTempFile {
    let file = NamedTempFile::new().expect("create temp file");
    let mut out = BufWriter::new(file.reopen().expect("reopen temp file"));
    let mut rng = ChaCha8Rng::seed_from_u64(0x1065);

    for line in 0..line_count {
        let severity = SEVERITIES[rng.gen_range(0..SEVERITIES.len())];
        let component = COMPONENTS[rng.gen_range(0..COMPONENTS.len())];
        let shard: u32 = rng.gen_range(0..64);
        let request: u32 = rng.gen();
        let elapsed_us: u32 = rng.gen_range(10..2_000_000);

        let written = if line % needle_every == needle_every - 1 {
            writeln!(
                out,
                "{severity} {component}/shard-{shard:02} conn reset by peer req-{request:08x} after {elapsed_us}us"
            )
        } else if line % 97 == 0 {
            writeln!(
                out,
                "info {component}/shard-{shard:02} payload\treq-{request:08x}\t{}",
                "~".repeat(rng.gen_range(200..900))
            )
        } else {
            writeln!(
                out,
                "{severity} {component}/shard-{shard:02} handled req-{request:08x} in {elapsed_us}us"
            )
        };
        written.expect("write log line");
    }

    out.flush().expect("flush log");
    file
}

async fn load_file(path: &std::path::Path, config: EngineConfig) -> Arc<LogData> {
    let log_data = Arc::new(LogData::new(config));
    let (tx, mut rx) = mpsc::unbounded_channel();
    log_data.on_load_finished(move |status| {
        let _ = tx.send(status);
    });
    log_data.load(path).await.expect("load");
    rx.recv().await.expect("load finished");
    log_data
}

fn line_count_label(line_count: usize) -> String {
    format!("{}k-lines", line_count / 1000)
}

fn bench_indexing(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("indexing");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(5));

    for &line_count in &[50_000usize, 500_000] {
        let log_file = write_sample_log(line_count, 40);

        group.bench_with_input(
            BenchmarkId::new("full_index", line_count_label(line_count)),
            log_file.path(),
            |b, path| {
                b.iter(|| {
                    let log_data =
                        rt.block_on(async { load_file(path, EngineConfig::default()).await });
                    black_box(log_data.line_count());
                });
            },
        );
    }

    group.finish();
}

fn bench_search_patterns(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("search_patterns");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(5));

    for &line_count in &[50_000usize, 500_000] {
        let log_file = write_sample_log(line_count, 40);
        let log_data = rt.block_on(load_file(log_file.path(), EngineConfig::default()));
        let total_lines = log_data.line_count().get();

        let filtered = rt.block_on(async { FilteredLogData::new(Arc::clone(&log_data)) });
        let (tx, rx) = crossbeam_channel::unbounded();
        filtered.on_search_finished(move |status| {
            let _ = tx.send(status);
        });

        let label = line_count_label(line_count);

        let mut run = |pattern: SearchPattern| {
            rt.block_on(async {
                filtered
                    .run_search(pattern, LineNumber::new(0), LineNumber::new(total_lines))
                    .await
                    .unwrap();
            });
            let status = rx.recv().expect("search finished");
            black_box((status, filtered.match_count()));
        };

        group.bench_function(BenchmarkId::new("literal", &label), |b| {
            b.iter(|| {
                run(SearchPattern {
                    plain_text: true,
                    ..SearchPattern::new("conn reset")
                })
            });
        });

        group.bench_function(BenchmarkId::new("regex", &label), |b| {
            b.iter(|| run(SearchPattern::new(r"req-[0-9a-f]{8} after \d+us")));
        });

        group.bench_function(BenchmarkId::new("case_insensitive", &label), |b| {
            b.iter(|| {
                run(SearchPattern {
                    case_sensitive: false,
                    ..SearchPattern::new("FAIL")
                })
            });
        });

        group.bench_function(BenchmarkId::new("boolean", &label), |b| {
            b.iter(|| {
                run(SearchPattern {
                    boolean_combine: true,
                    ..SearchPattern::new(r#""conn reset" and not "router""#)
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_indexing, bench_search_patterns);
criterion_main!(benches);
