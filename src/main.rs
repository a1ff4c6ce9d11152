// src/main.rs
//! crab-strata-bench: timing runs of the mapping layer.
//!
//! - `set`: N string keys written from `--threads` workers;
//! - `hdel`: one hash of N fields, then a single HDEL of all of them;
//! - `hgetall`: HGETALL of 10,000 fields after (1) a plain fill,
//!   (2) a fill of N, DEL and refill, (3) a fill of N and HDEL down to 10,000.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crab_strata::{config, expire, Options, Store};

const REMAINING_FIELDS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Bench {
    Set,
    Hdel,
    Hgetall,
    All,
}

#[derive(Debug, Parser)]
#[command(name = "crab-strata-bench", about = "Benchmarks for the crab-strata mapping layer")]
struct Args {
    /// Database directory
    #[arg(long, default_value = "./db")]
    path: PathBuf,

    /// JSON options file, created with defaults when missing
    #[arg(long)]
    config: Option<PathBuf>,

    /// Element count of the large fills
    #[arg(long, default_value_t = 1_000_000)]
    scale: usize,

    /// Writer threads for the SET bench
    #[arg(long, default_value_t = 4)]
    threads: usize,

    #[arg(value_enum, default_value_t = Bench::All)]
    bench: Bench,
}

fn fields(range: std::ops::Range<usize>) -> impl Iterator<Item = (String, String)> {
    range.map(|i| (format!("FIELD_{i}"), format!("VALUE_{i}")))
}

fn report(label: &str, elapsed: Duration) {
    info!(bench = label, ms = elapsed.as_millis() as u64, "done");
    println!("{label} Cost: {}ms", elapsed.as_millis());
}

fn bench_set(store: &Arc<Store>, scale: usize, threads: usize) -> Result<()> {
    let threads = threads.max(1);
    let per_thread = scale.div_ceil(threads);
    let start = Instant::now();
    std::thread::scope(|s| -> Result<()> {
        let workers: Vec<_> = (0..threads)
            .map(|t| {
                let store = store.clone();
                s.spawn(move || -> Result<()> {
                    let from = t * per_thread;
                    for i in from..(from + per_thread).min(scale) {
                        store.set(format!("KEY_{i}").as_bytes(), format!("VALUE_{i}").as_bytes())?;
                    }
                    Ok(())
                })
            })
            .collect();
        for worker in workers {
            worker
                .join()
                .map_err(|_| anyhow::anyhow!("set worker panicked"))??;
        }
        Ok(())
    })?;
    report(&format!("Set {scale} keys ({threads} threads)"), start.elapsed());
    Ok(())
}

fn bench_hdel(store: &Store, scale: usize) -> Result<()> {
    store.hmset(b"HDEL_KEY", fields(0..scale))?;
    let names: Vec<String> = (0..scale).map(|i| format!("FIELD_{i}")).collect();
    let start = Instant::now();
    let removed = store.hdel(b"HDEL_KEY", &names)?;
    report(&format!("HDel {removed} hash fields"), start.elapsed());
    Ok(())
}

fn timed_hgetall(store: &Store, case: u8, key: &[u8]) -> Result<()> {
    let start = Instant::now();
    let pairs = store.hgetall(key)?;
    report(&format!("Test case {case}, HGetall {} field hash", pairs.len()), start.elapsed());
    Ok(())
}

fn bench_hgetall(store: &Store, scale: usize) -> Result<()> {
    store.hmset(b"HGETALL_KEY1", fields(0..REMAINING_FIELDS))?;
    timed_hgetall(store, 1, b"HGETALL_KEY1")?;

    store.hmset(b"HGETALL_KEY2", fields(0..scale))?;
    let outcome = store.del([b"HGETALL_KEY2"])?;
    anyhow::ensure!(outcome.is_ok(), "del failed: {:?}", outcome.statuses);
    store.hmset(b"HGETALL_KEY2", fields(0..REMAINING_FIELDS))?;
    timed_hgetall(store, 2, b"HGETALL_KEY2")?;

    store.hmset(b"HGETALL_KEY3", fields(0..scale))?;
    if scale > REMAINING_FIELDS {
        let doomed: Vec<String> = (0..scale - REMAINING_FIELDS)
            .map(|i| format!("FIELD_{i}"))
            .collect();
        store.hdel(b"HGETALL_KEY3", &doomed)?;
    }
    timed_hgetall(store, 3, b"HGETALL_KEY3")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let options = match &args.config {
        Some(path) => config::load(path)?,
        None => Options::default(),
    };
    let sweep_every = Duration::from_secs(options.sweep_interval_secs.max(1));
    let store = Arc::new(
        Store::open(&args.path, options)
            .with_context(|| format!("Failed to open store at {:?}", args.path))?,
    );
    let sweeper = tokio::spawn(expire::run_sweeper(store.clone(), sweep_every));

    let worker = store.clone();
    let bench = args.bench;
    let (scale, threads) = (args.scale, args.threads);
    tokio::task::spawn_blocking(move || -> Result<()> {
        if matches!(bench, Bench::Set | Bench::All) {
            bench_set(&worker, scale, threads)?;
        }
        if matches!(bench, Bench::Hdel | Bench::All) {
            bench_hdel(&worker, scale)?;
        }
        if matches!(bench, Bench::Hgetall | Bench::All) {
            bench_hgetall(&worker, scale)?;
        }
        Ok(())
    })
    .await
    .context("benchmark task panicked")??;

    sweeper.abort();
    // cancelled; only the release of its store handle matters
    let _ = sweeper.await;
    // includes the element ranges left behind by deleted versions
    let bytes = store.size_on_disk().context("Failed to read store size")?;
    info!(bytes, "size on disk");
    println!("Size on disk: {bytes} bytes");
    println!("{}", store.monitor().metrics.to_prometheus());
    // a sweep already running on the blocking pool may still hold a handle
    match Arc::try_unwrap(store) {
        Ok(store) => store.close().context("Failed to close store")?,
        Err(shared) => shared.flush().context("Failed to flush store")?,
    }
    Ok(())
}
