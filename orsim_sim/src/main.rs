//! ORSim Simulator CLI
//!
//! Run agent populations through lockstep and fault scenarios.

use clap::Parser;
use orsim_core::OrsimSettings;
use orsim_sim::scenarios::ScenarioId;
use orsim_sim::{RunnerConfig, ScenarioResult, ScenarioRunner};
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// ORSim agent simulation CLI
#[derive(Parser, Debug)]
#[command(name = "orsim-sim")]
#[command(about = "Run ORSim agents against an in-process scheduler", long_about = None)]
struct Args {
    /// Master seed for the demo processors (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of agents
    #[arg(short, long, default_value = "4")]
    agents: usize,

    /// Steps to broadcast before shutdown
    #[arg(long, default_value = "5")]
    steps: i64,

    /// Simulated seconds per step (STEP_INTERVAL)
    #[arg(long, default_value = "60")]
    step_interval: f64,

    /// Seconds a step may run before the heartbeat flags it (STEP_TIMEOUT)
    #[arg(long, default_value = "10")]
    step_timeout: f64,

    /// Heartbeat polling period in seconds
    #[arg(long, default_value = "0.5")]
    heartbeat_interval: f64,

    /// Real milliseconds the scheduler waits for each step's responses
    #[arg(long, default_value = "2000")]
    barrier_timeout_ms: u64,

    /// Scenario to run (lockstep, faulty, stall, isolated, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging; RUST_LOG overrides the flag
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {err}");
    }

    if !args.json {
        info!("ORSim Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match ScenarioId::from_name(&args.scenario) {
            Some(scenario) => vec![scenario],
            None => {
                eprintln!("Error: unknown scenario '{}'", args.scenario);
                eprintln!("Available scenarios: lockstep, faulty, stall, isolated, all");
                std::process::exit(2);
            }
        }
    };

    let settings = OrsimSettings::new(args.step_interval, args.step_timeout)
        .with_heartbeat_interval(args.heartbeat_interval);
    if let Err(err) = settings.validate() {
        eprintln!("Error: {err}");
        std::process::exit(2);
    }

    // Determine base seed
    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let runner = ScenarioRunner::new(RunnerConfig {
        seed,
        num_agents: args.agents,
        steps: args.steps,
        settings,
        barrier_timeout: Duration::from_millis(args.barrier_timeout_ms),
        ..RunnerConfig::default()
    });

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for scenario in &scenarios {
        let result = match runner.run(*scenario).await {
            Ok(result) => result,
            Err(err) => {
                error!("✗ {} (seed={}) aborted: {}", scenario.name(), seed, err);
                failed_count += 1;
                continue;
            }
        };

        if !args.json {
            if result.passed {
                info!(
                    "✓ {} (seed={}) PASSED [{} responses, {} errors, {} shutdowns, {}ms]",
                    scenario.name(),
                    seed,
                    result.metrics.responses,
                    result.metrics.errors,
                    result.metrics.shutdowns,
                    result.metrics.elapsed_ms
                );
            } else {
                error!(
                    "✗ {} (seed={}) FAILED: {}",
                    scenario.name(),
                    seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }

        if !result.passed {
            failed_count += 1;
        }
        all_results.push(result);
    }

    let total = scenarios.len();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results,
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("Failed to render summary: {err}"),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenarios passed!", total);
        } else {
            error!("❌ {}/{} scenarios failed!", failed_count, total);
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
