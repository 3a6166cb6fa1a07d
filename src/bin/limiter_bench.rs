// src/bin/limiter_bench.rs

use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::{Barrier, Semaphore};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

use distributed_limiter::config::{InMemoryConfig, RedisConfig, StoreConfig};
use distributed_limiter::storage::{connect, CounterStore, MemoryStore, RedisStore};
use distributed_limiter::{Limiter, Rate};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "limiter_bench",
    about = "A benchmarking tool for the fixed window limiter"
)]
struct Opt {
    /// Storage backend to use
    #[structopt(short, long, possible_values = &["memory", "redis", "all"], default_value = "memory")]
    storage: String,

    /// Redis URL (when using Redis storage)
    #[structopt(long, default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Maximum number of requests allowed
    #[structopt(short, long, default_value = "1000")]
    max_requests: i64,

    /// Window duration in seconds
    #[structopt(short, long, default_value = "60")]
    window_seconds: u64,

    /// Number of concurrent users to simulate
    #[structopt(short = "u", long, default_value = "10")]
    num_users: usize,

    /// Number of requests per user
    #[structopt(short = "r", long, default_value = "100")]
    requests_per_user: usize,

    /// Spread requests over this many shared keys instead of one key per user
    #[structopt(short = "k", long, default_value = "0")]
    key_space: usize,

    /// Number of iterations to run
    #[structopt(short, long, default_value = "3")]
    iterations: usize,

    /// Maximum concurrency level
    #[structopt(short = "c", long, default_value = "100")]
    concurrency: usize,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

type BenchResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Default, Clone, Copy)]
struct IterationStats {
    allowed: usize,
    denied: usize,
    errors: usize,
    elapsed: Duration,
}

impl IterationStats {
    fn requests(&self) -> usize {
        self.allowed + self.denied + self.errors
    }

    fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.requests() as f64 / secs
        } else {
            0.0
        }
    }
}

#[tokio::main]
async fn main() -> BenchResult<()> {
    let opt = Opt::from_args();

    let log_level = match (opt.disable_logs, opt.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "limiter_bench={},distributed_limiter={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted, stopping after the current iteration");
        flag.store(true, Ordering::SeqCst);
    })?;

    let backends = if opt.storage == "all" {
        vec!["memory", "redis"]
    } else {
        vec![opt.storage.as_str()]
    };

    for backend in backends {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let store = match open_store(backend, &opt).await {
            Ok(store) => store,
            Err(e) => {
                error!("Failed to open {} storage: {}", backend, e);
                return Err(e);
            }
        };
        let rate = Rate::per_seconds(opt.max_requests, opt.window_seconds)?;
        let name = format!("Fixed Window ({})", backend);
        run_benchmark(Limiter::new(store, rate), &name, &opt, &stop).await?;
    }

    Ok(())
}

async fn open_store(backend: &str, opt: &Opt) -> BenchResult<Arc<dyn CounterStore>> {
    // run-unique namespace, so concurrent or earlier runs never share counters
    let store_config = StoreConfig::with_prefix(format!("bench-{}", Uuid::new_v4()));
    info!(prefix = %store_config.key_prefix, backend, "Opening store");

    match backend {
        "memory" => Ok(Arc::new(MemoryStore::new(
            store_config,
            InMemoryConfig {
                max_entries: 100_000,
                ..InMemoryConfig::default()
            },
        ))),
        "redis" => {
            let connection = connect(&RedisConfig {
                url: opt.redis_url.clone(),
                connection_timeout: Duration::from_secs(5),
            })
            .await?;
            Ok(Arc::new(RedisStore::new(connection, store_config).await?))
        }
        other => Err(format!("Unknown storage backend: {}", other).into()),
    }
}

// Keys each user will hit, drawn up front: the RNG is not Send
fn plan_keys(opt: &Opt) -> Vec<Vec<String>> {
    let mut rng = rand::rng();
    (0..opt.num_users)
        .map(|user_id| {
            (0..opt.requests_per_user)
                .map(|_| {
                    if opt.key_space == 0 {
                        format!("user_{}", user_id)
                    } else {
                        format!("shared_{}", rng.random_range(0..opt.key_space))
                    }
                })
                .collect()
        })
        .collect()
}

async fn run_iteration(
    limiter: &Limiter,
    opt: &Opt,
    progress: &ProgressBar,
) -> BenchResult<IterationStats> {
    let plan = plan_keys(opt);

    // Reset before each iteration
    let mut keys: Vec<&String> = plan.iter().flatten().collect();
    keys.sort();
    keys.dedup();
    for key in keys {
        limiter.reset(key).await?;
    }

    let barrier = Arc::new(Barrier::new(opt.num_users));
    let semaphore = Arc::new(Semaphore::new(opt.concurrency.max(1)));
    let start_time = Instant::now();

    let handles: Vec<_> = plan
        .into_iter()
        .map(|user_keys| {
            let limiter = limiter.clone();
            let barrier = Arc::clone(&barrier);
            let semaphore = Arc::clone(&semaphore);
            let progress = progress.clone();

            tokio::spawn(async move {
                barrier.wait().await;

                let mut stats = IterationStats::default();
                for key in user_keys {
                    let Ok(_permit) = semaphore.acquire().await else {
                        break;
                    };
                    match limiter.get(&key).await {
                        Ok(decision) if decision.reached => stats.denied += 1,
                        Ok(_) => stats.allowed += 1,
                        Err(e) => {
                            stats.errors += 1;
                            warn!("Error in rate limiting: {}", e);
                        }
                    }
                    progress.inc(1);
                }
                stats
            })
        })
        .collect();

    let mut totals = IterationStats::default();
    for result in futures::future::join_all(handles).await {
        match result {
            Ok(stats) => {
                totals.allowed += stats.allowed;
                totals.denied += stats.denied;
                totals.errors += stats.errors;
            }
            Err(e) => error!("Benchmark task failed: {}", e),
        }
    }
    totals.elapsed = start_time.elapsed();
    Ok(totals)
}

async fn run_benchmark(
    limiter: Limiter,
    name: &str,
    opt: &Opt,
    stop: &AtomicBool,
) -> BenchResult<()> {
    println!("\nRunning benchmark: {}", name);
    println!("======================={}", "=".repeat(name.len()));

    let mut table = Table::new();
    table.set_titles(row!["Iteration", "Duration", "Allowed", "Denied", "Errors", "req/sec"]);

    let mut completed: Vec<IterationStats> = Vec::with_capacity(opt.iterations);
    for iteration in 0..opt.iterations {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let progress = ProgressBar::new((opt.num_users * opt.requests_per_user) as u64);
        progress.set_style(
            ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} ({per_sec})")?
                .progress_chars("=> "),
        );
        progress.set_message(format!("iteration {}/{}", iteration + 1, opt.iterations));

        let stats = run_iteration(&limiter, opt, &progress).await?;
        progress.finish_and_clear();

        let number = iteration + 1;
        let took = format!("{:?}", stats.elapsed);
        let throughput = format!("{:.2}", stats.throughput());
        table.add_row(row![
            number,
            took,
            stats.allowed,
            stats.denied,
            stats.errors,
            throughput
        ]);
        completed.push(stats);
    }

    if completed.is_empty() {
        println!("No iterations completed");
        return Ok(());
    }
    table.printstd();

    let total_duration: Duration = completed.iter().map(|s| s.elapsed).sum();
    let total_allowed: usize = completed.iter().map(|s| s.allowed).sum();
    let total_denied: usize = completed.iter().map(|s| s.denied).sum();
    let total_requests: usize = completed.iter().map(|s| s.requests()).sum();
    let avg_duration = total_duration / completed.len() as u32;
    let percent = |n: usize| {
        if total_requests == 0 {
            0.0
        } else {
            100.0 * n as f64 / total_requests as f64
        }
    };

    println!("\nBenchmark Results for {}:", name);
    println!("  Total Requests:     {}", total_requests);
    println!("  Allowed:            {} ({:.1}%)", total_allowed, percent(total_allowed));
    println!("  Denied:             {} ({:.1}%)", total_denied, percent(total_denied));
    println!("  Avg. Duration:      {:?}", avg_duration);
    println!(
        "  Avg. Throughput:    {:.2} requests/second",
        total_requests as f64 / total_duration.as_secs_f64().max(f64::EPSILON)
    );

    Ok(())
}
