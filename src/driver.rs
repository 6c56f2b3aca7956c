//! Runs a worklist of keys through a cache and reports how each lookup went.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use crossbeam_channel::{unbounded, Sender};
use tracing::{info, warn};

use crate::cache::Memo;
use crate::compute::Compute;
use crate::fetch::{default_urls, SimulatedFetch};
use crate::sequential::SequentialMemo;
use crate::thread_pool::ThreadPool;

/// How the worklist is scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// One key after another on the calling thread, through a [`SequentialMemo`].
    Sequential,
    /// One scoped thread per key.
    Threads,
    /// One job per key on a [`ThreadPool`].
    Pool,
}

/// Fetches a list of urls through a coalescing cache and prints the time and size of each.
///
/// Duplicate urls are fetched once; the later lookups wait for or reuse the first result.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about)]
pub struct Config {
    /// How lookups are scheduled.
    #[arg(long, value_enum, default_value_t = Mode::Threads)]
    pub mode: Mode,

    /// Worker threads in `pool` mode.
    #[arg(long, default_value = "4")]
    pub workers: NonZeroUsize,

    /// Simulated latency of one fetch, in milliseconds.
    #[arg(long = "latency-ms", default_value_t = 100)]
    pub latency_ms: u64,

    /// Urls whose fetch fails. Can be repeated.
    #[arg(long)]
    pub fail: Vec<String>,

    /// Urls to fetch. Defaults to a fixed list where every url appears twice.
    pub keys: Vec<String>,
}

impl Config {
    /// The computation this configuration describes.
    pub fn fetch(&self) -> SimulatedFetch {
        SimulatedFetch::new(
            Duration::from_millis(self.latency_ms),
            self.fail.iter().cloned(),
        )
    }

    /// The worklist, falling back to [`default_urls`].
    pub fn worklist(&self) -> Vec<String> {
        if self.keys.is_empty() {
            default_urls()
        } else {
            self.keys.clone()
        }
    }
}

/// Outcome of one lookup.
#[derive(Debug, Clone)]
pub struct Report {
    key: String,
    elapsed: Duration,
    /// Size of the value, or the error message.
    outcome: Result<usize, String>,
}

impl Report {
    /// Creates a new report for `key`.
    pub fn new(key: String, elapsed: Duration, outcome: Result<usize, String>) -> Self {
        Report {
            key,
            elapsed,
            outcome,
        }
    }

    /// The key looked up.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wall time the lookup took, including any wait on another caller's computation.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Size of the value, or the error message.
    pub fn outcome(&self) -> Result<usize, &str> {
        self.outcome.as_ref().copied().map_err(String::as_str)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Ok(bytes) => write!(f, "{}, {:?}, {} bytes", self.key, self.elapsed, bytes),
            Err(err) => write!(f, "{}, {:?}, error: {}", self.key, self.elapsed, err),
        }
    }
}

/// Aggregated reports of a run.
#[derive(Debug, Default)]
pub struct Statistics {
    hits: HashMap<String, usize>,
    failures: usize,
    reports: Vec<Report>,
}

impl Statistics {
    /// Add a report to the statistics.
    pub fn add_report(&mut self, report: Report) {
        *self.hits.entry(report.key.clone()).or_default() += 1;
        if report.outcome.is_err() {
            self.failures += 1;
        }
        self.reports.push(report);
    }

    /// Number of lookups of `key`.
    pub fn hits(&self, key: &str) -> usize {
        self.hits.get(key).copied().unwrap_or(0)
    }

    /// Number of failed lookups.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Reports in the order the lookups finished.
    pub fn reports(&self) -> &[Report] {
        &self.reports
    }
}

/// Looks up `key` and times it.
fn lookup<V, E>(key: &str, get: impl FnOnce() -> Result<V, E>) -> Report
where
    V: AsRef<[u8]>,
    E: fmt::Display,
{
    let start = Instant::now();
    let result = get();
    let elapsed = start.elapsed();
    let outcome = match result {
        Ok(value) => Ok(value.as_ref().len()),
        Err(err) => {
            warn!(key, %err, "lookup failed");
            Err(err.to_string())
        }
    };
    Report::new(key.to_string(), elapsed, outcome)
}

/// Looks every key in `keys` up through a cache around `f`, scheduled according to `mode`.
///
/// `workers` is only used in [`Mode::Pool`].
pub fn run<F>(f: F, keys: &[String], mode: Mode, workers: NonZeroUsize) -> Statistics
where
    F: Compute<String> + Send + Sync + 'static,
    F::Value: AsRef<[u8]> + Clone + Send + 'static,
    F::Error: fmt::Display + Clone + Send + 'static,
{
    let start = Instant::now();
    let (report_sender, report_receiver) = unbounded();

    match mode {
        Mode::Sequential => {
            let mut memo = SequentialMemo::new(f);
            for key in keys {
                report_sender
                    .send(lookup(key, || memo.get(key.clone())))
                    .unwrap();
            }
        }
        Mode::Threads => {
            let memo = Memo::new(f);
            crossbeam_utils::thread::scope(|s| {
                for key in keys {
                    let memo = &memo;
                    let report_sender = report_sender.clone();
                    let _ = s.spawn(move |_| {
                        report_sender
                            .send(lookup(key, || memo.get(key.clone())))
                            .unwrap();
                    });
                }
            })
            .unwrap_or_else(|payload| std::panic::resume_unwind(payload));
        }
        Mode::Pool => {
            let memo = Arc::new(Memo::new(f));
            let pool = ThreadPool::new(workers.get());
            for key in keys {
                spawn_lookup(&pool, &memo, key.clone(), report_sender.clone());
            }
            pool.join();
        }
    }
    drop(report_sender);

    let mut stats = Statistics::default();
    for report in report_receiver {
        stats.add_report(report);
    }
    info!(
        lookups = stats.reports.len(),
        distinct = stats.hits.len(),
        failures = stats.failures,
        elapsed = ?start.elapsed(),
        "worklist done"
    );
    stats
}

fn spawn_lookup<F>(
    pool: &ThreadPool,
    memo: &Arc<Memo<String, F>>,
    key: String,
    reports: Sender<Report>,
) where
    F: Compute<String> + Send + Sync + 'static,
    F::Value: AsRef<[u8]> + Clone + Send + 'static,
    F::Error: fmt::Display + Clone + Send + 'static,
{
    let memo = memo.clone();
    pool.execute(move || {
        let report = lookup(&key, || memo.get(key.clone()));
        reports.send(report).unwrap();
    });
}

/// Runs the worklist `config` describes through a [`SimulatedFetch`].
pub fn run_config(config: &Config) -> Statistics {
    if config.mode == Mode::Pool {
        info!(workers = config.workers.get(), "using thread pool");
    }
    run(config.fetch(), &config.worklist(), config.mode, config.workers)
}

#[cfg(all(test, not(feature = "check-loom")))]
mod tests {
    use super::{run, Config, Mode, Report, Statistics};
    use clap::Parser;
    use crossbeam_channel::bounded;
    use std::num::NonZeroUsize;
    use std::panic;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn worklist() -> Vec<String> {
        ["a://x", "a://yy", "a://x", "a://zzz", "a://yy", "a://x"]
            .iter()
            .map(|k| k.to_string())
            .collect()
    }

    fn counting(calls: Arc<AtomicUsize>) -> impl Fn(&String) -> Result<Vec<u8>, String> {
        move |key: &String| {
            let _ = calls.fetch_add(1, Ordering::Relaxed);
            thread::sleep(Duration::from_millis(10));
            if key.ends_with("zzz") {
                Err(format!("{key} failed"))
            } else {
                Ok(vec![0; key.len()])
            }
        }
    }

    #[test]
    fn every_mode_coalesces() {
        for mode in [Mode::Sequential, Mode::Threads, Mode::Pool] {
            let calls = Arc::new(AtomicUsize::new(0));
            let workers = NonZeroUsize::new(3).unwrap();
            let stats = run(counting(calls.clone()), &worklist(), mode, workers);
            assert_eq!(calls.load(Ordering::Relaxed), 3, "{mode:?}");
            assert_eq!(stats.reports().len(), 6);
            assert_eq!(stats.hits("a://x"), 3);
            assert_eq!(stats.hits("a://yy"), 2);
            assert_eq!(stats.hits("a://zzz"), 1);
            assert_eq!(stats.hits("a://w"), 0);
            assert_eq!(stats.failures(), 1);
            for report in stats.reports() {
                match report.key() {
                    "a://zzz" => assert_eq!(report.outcome(), Err("a://zzz failed")),
                    key => assert_eq!(report.outcome(), Ok(key.len())),
                }
            }
        }
    }

    fn panicking(key: &String) -> Result<Vec<u8>, String> {
        if key == "a://boom" {
            thread::sleep(Duration::from_millis(10));
            panic!("computation for {key} panicked");
        }
        Ok(vec![0; key.len()])
    }

    // A panicking key surfaces as a panic from `run` in the concurrent modes instead of a hang.
    #[test]
    fn panicking_key_does_not_hang() {
        for mode in [Mode::Threads, Mode::Pool] {
            let (done_sender, done_receiver) = bounded(1);
            let _ = thread::spawn(move || {
                let keys = ["a://boom", "a://boom", "a://ok"].map(String::from);
                let result = panic::catch_unwind(|| {
                    run(panicking, &keys, mode, NonZeroUsize::new(2).unwrap())
                });
                done_sender.send(result.is_err()).unwrap();
            });
            let panicked = done_receiver
                .recv_timeout(Duration::from_secs(5))
                .unwrap_or_else(|_| panic!("run hung in {mode:?} mode"));
            assert!(panicked, "{mode:?}");
        }
    }

    #[test]
    fn report_display() {
        let ok = Report::new("k".into(), Duration::from_millis(5), Ok(12));
        assert_eq!(ok.to_string(), "k, 5ms, 12 bytes");
        let err = Report::new("k".into(), Duration::from_millis(5), Err("boom".into()));
        assert_eq!(err.to_string(), "k, 5ms, error: boom");
    }

    #[test]
    fn statistics_counts_failures() {
        let mut stats = Statistics::default();
        stats.add_report(Report::new("a".into(), Duration::ZERO, Ok(1)));
        stats.add_report(Report::new("a".into(), Duration::ZERO, Err("x".into())));
        assert_eq!(stats.hits("a"), 2);
        assert_eq!(stats.failures(), 1);
    }

    #[test]
    fn config_defaults() {
        let config = Config::try_parse_from(["memo"]).unwrap();
        assert_eq!(config.mode, Mode::Threads);
        assert_eq!(config.workers.get(), 4);
        assert_eq!(config.latency_ms, 100);
        assert_eq!(config.worklist().len(), 8);

        let config = Config::try_parse_from([
            "memo", "--mode", "pool", "--workers", "2", "--fail", "http://b", "http://a",
        ])
        .unwrap();
        assert_eq!(config.mode, Mode::Pool);
        assert_eq!(config.workers.get(), 2);
        assert_eq!(config.fail, vec!["http://b".to_string()]);
        assert_eq!(config.worklist(), vec!["http://a".to_string()]);

        assert!(Config::try_parse_from(["memo", "--workers", "0"]).is_err());
    }
}
