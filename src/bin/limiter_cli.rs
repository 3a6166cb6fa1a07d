// src/bin/limiter_cli.rs

use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use distributed_limiter::config::{InMemoryConfig, RedisConfig, StoreConfig};
use distributed_limiter::storage::{connect, CounterStore, MemoryStore, RedisStore};
use distributed_limiter::{Decision, Limiter, Rate};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "limiter_cli",
    about = "A CLI for exercising the fixed window limiter"
)]
struct Opt {
    /// What to do with the key
    #[structopt(long, possible_values = &["simulate", "peek", "reset"], default_value = "simulate")]
    action: String,

    /// Counter store to use
    #[structopt(short, long, possible_values = &["memory", "redis"], default_value = "memory")]
    storage: String,

    /// Redis connection URL (redis storage only)
    #[structopt(long, default_value = "redis://localhost:6379/0")]
    redis_url: String,

    /// Prefix for every store key
    #[structopt(long, default_value = "limiter_cli")]
    prefix: String,

    /// Key to use for rate limiting
    #[structopt(short, long, default_value = "default_user")]
    key: String,

    /// Maximum number of requests allowed
    #[structopt(short, long, default_value = "10")]
    max_requests: i64,

    /// Window duration in seconds
    #[structopt(short, long, default_value = "60")]
    window_seconds: u64,

    /// Simulation mode
    #[structopt(long, possible_values = &["burst", "steady", "sine_wave", "custom"], default_value = "burst")]
    simulation: String,

    /// Number of requests to simulate
    #[structopt(short = "n", long, default_value = "20")]
    num_requests: usize,

    /// Time between requests in milliseconds (for steady and sine_wave modes)
    #[structopt(short = "t", long, default_value = "100")]
    request_interval_ms: u64,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    let opt = Opt::from_args();

    let log_level = match (opt.disable_logs, opt.verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "limiter_cli={},distributed_limiter={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let store = open_store(&opt).await?;
    let rate = Rate::per_seconds(opt.max_requests, opt.window_seconds)?;
    let limiter = Limiter::new(store, rate);

    info!(
        storage = %opt.storage,
        max_requests = opt.max_requests,
        window_seconds = opt.window_seconds,
        "Starting limiter CLI"
    );

    match opt.action.as_str() {
        "peek" => {
            let decision = limiter.peek(&opt.key).await?;
            print_decision(&opt.key, &decision);
            Ok(())
        }
        "reset" => {
            let decision = limiter.reset(&opt.key).await?;
            print_decision(&opt.key, &decision);
            Ok(())
        }
        "simulate" => run_simulation(&opt, &limiter).await,
        other => {
            error!("Unknown action: {}", other);
            Err("Unknown action".into())
        }
    }
}

async fn open_store(opt: &Opt) -> CliResult<Arc<dyn CounterStore>> {
    let store_config = StoreConfig::with_prefix(opt.prefix.as_str());
    match opt.storage.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new(
            store_config,
            InMemoryConfig::default(),
        ))),
        "redis" => {
            let connection = connect(&RedisConfig::new(opt.redis_url.as_str())).await?;
            Ok(Arc::new(RedisStore::new(connection, store_config).await?))
        }
        other => {
            error!("Unknown storage: {}", other);
            Err("Unknown storage".into())
        }
    }
}

fn print_decision(key: &str, decision: &Decision) {
    println!("\nKey: {}", key);
    println!("------------------------------");
    println!("Limit: {}", decision.limit);
    println!("Remaining: {}", decision.remaining);
    println!("Reset (unix): {}", decision.reset);
    println!("Reached: {}", decision.reached);
}

#[derive(Debug, Default)]
struct Tally {
    allowed: usize,
    denied: usize,
}

impl Tally {
    async fn check(&mut self, opt: &Opt, limiter: &Limiter, request: usize) -> CliResult<Decision> {
        let decision = limiter.get(&opt.key).await?;
        if decision.reached {
            self.denied += 1;
            warn!("Request {}: DENIED (reset at: {})", request, decision.reset);
        } else {
            self.allowed += 1;
            info!(
                "Request {}: ALLOWED (remaining: {})",
                request, decision.remaining
            );
        }
        Ok(decision)
    }

    fn report(&self, title: &str, total: Option<usize>, elapsed: Duration) {
        println!("\n{} Simulation Results:", title);
        println!("------------------------------");
        if let Some(total) = total {
            println!("Total requests: {}", total);
        }
        println!("Allowed: {}", self.allowed);
        println!("Denied: {}", self.denied);
        println!("Time elapsed: {:?}", elapsed);
    }
}

async fn run_simulation(opt: &Opt, limiter: &Limiter) -> CliResult<()> {
    match opt.simulation.as_str() {
        "burst" => simulate_burst(opt, limiter).await,
        "steady" => simulate_paced(opt, limiter, |_| 1.0, "Steady").await,
        "sine_wave" => {
            let requests = opt.num_requests.max(1) as f64;
            // full cycle over the run, intervals between 0.5x and 1.5x the base
            let factor = move |i: usize| {
                let phase = (i as f64 * std::f64::consts::PI * 2.0) / requests;
                1.0 + 0.5 * phase.sin()
            };
            simulate_paced(opt, limiter, factor, "Sine Wave").await
        }
        "custom" => simulate_custom(opt, limiter).await,
        other => {
            error!("Unknown simulation mode: {}", other);
            Err("Unknown simulation mode".into())
        }
    }
}

// Simulate a burst of requests all at once
async fn simulate_burst(opt: &Opt, limiter: &Limiter) -> CliResult<()> {
    info!(
        "Simulating burst of {} requests for key: {}",
        opt.num_requests, opt.key
    );

    let mut tally = Tally::default();
    let start_time = Instant::now();
    for i in 0..opt.num_requests {
        tally.check(opt, limiter, i + 1).await?;
    }

    tally.report("Burst", Some(opt.num_requests), start_time.elapsed());
    Ok(())
}

// Requests spaced by the base interval scaled by `factor(i)`
async fn simulate_paced<F>(opt: &Opt, limiter: &Limiter, factor: F, title: &str) -> CliResult<()>
where
    F: Fn(usize) -> f64,
{
    info!(
        "Simulating {} pattern of {} requests with {}ms base interval for key: {}",
        title, opt.num_requests, opt.request_interval_ms, opt.key
    );

    let mut tally = Tally::default();
    let base_interval = Duration::from_millis(opt.request_interval_ms);
    let start_time = Instant::now();

    for i in 0..opt.num_requests {
        let request_time = Instant::now();
        tally.check(opt, limiter, i + 1).await?;

        let this_interval = base_interval.mul_f64(factor(i));
        let elapsed = request_time.elapsed();
        if elapsed < this_interval {
            time::sleep(this_interval - elapsed).await;
        }
    }

    tally.report(title, Some(opt.num_requests), start_time.elapsed());
    Ok(())
}

// Simulate custom pattern with interactive input
async fn simulate_custom(opt: &Opt, limiter: &Limiter) -> CliResult<()> {
    println!("\nCustom Simulation Mode");
    println!("----------------------");
    println!("Press Enter to make a request, 'peek' to inspect, 'reset' to start over, or 'quit' to exit");

    let mut tally = Tally::default();
    let start_time = Instant::now();
    let mut input_buffer = String::new();
    let mut request = 0;

    loop {
        input_buffer.clear();
        if std::io::stdin().read_line(&mut input_buffer)? == 0 {
            break;
        }

        match input_buffer.trim() {
            "quit" | "exit" | "q" => break,
            "peek" => print_decision(&opt.key, &limiter.peek(&opt.key).await?),
            "reset" => print_decision(&opt.key, &limiter.reset(&opt.key).await?),
            _ => {
                request += 1;
                let decision = tally.check(opt, limiter, request).await?;
                if decision.reached {
                    println!("DENIED (reset at: {})", decision.reset);
                } else {
                    println!("ALLOWED (remaining: {})", decision.remaining);
                }
            }
        }
    }

    tally.report("Custom", None, start_time.elapsed());
    Ok(())
}
