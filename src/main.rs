//! judgebench CLI - benchmark code-generation models against an online judge.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use judgebench::models::{ParallelStrategy, Substrate};
use judgebench::{Benchmark, BenchmarkReport, Config};
use std::path::{Path, PathBuf};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "judgebench")]
#[command(version)]
#[command(about = "Benchmark code-generation models against an online judge")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "judgebench.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a benchmark over one problem set
    Run {
        /// Problem set name from [problem_sets]
        #[arg(short, long)]
        set: String,

        /// Parallel strategy: full, models or sequential
        #[arg(long)]
        strategy: Option<ParallelStrategy>,

        /// Worker pool size
        #[arg(short, long)]
        workers: Option<usize>,

        /// Worker substrate: shared or isolated
        #[arg(long)]
        substrate: Option<Substrate>,

        /// Generation attempts per task
        #[arg(short, long)]
        attempts: Option<u32>,

        /// Write the full report as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List configured problem sets
    Sets,

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set subscriber: {e}");
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))
}

fn print_example_config() {
    let example = r#"# judgebench configuration file

[judge]
api_url = "https://api.jutge.org/api"
# email = "you@example.org"       # or JUTGE_EMAIL env var
# password = "${JUTGE_PASSWORD}"  # or JUTGE_PASSWORD env var
language = "Python3"
timeout_secs = 30

[run]
strategy = "full"            # full | models | sequential
max_attempts = 1
poll_timeout_secs = 60
poll_interval_secs = 2
max_query_errors = 10
submission_retries = 3
substrate = "shared"         # shared | isolated
# max_workers = 8            # default: min(available parallelism, 8)

[[models]]
name = "GPT-4o-mini"
provider = "openai"          # openai | openrouter | compatible
model_id = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"
max_tokens = 2000
temperature = 0.1
timeout_secs = 30

[[models]]
name = "Claude-3.5-Sonnet"
provider = "openrouter"
model_id = "anthropic/claude-3.5-sonnet"
api_key_env = "OPENROUTER_API_KEY"

[[models]]
name = "Local-Llama"
provider = "compatible"
model_id = "llama3"
base_url = "http://localhost:11434/v1"
enabled = false

[problem_sets]
hello_world = ["P68688_en"]
basic = ["P68688_en", "P34279_en", "P37297_en"]
"#;
    println!("{example}");
}

fn print_report(report: &BenchmarkReport) {
    let summary = &report.summary;
    println!("\n=== Benchmark Complete ===");
    println!("Run:         {}", report.run_id);
    println!("Problem set: {} ({} problems)", report.problem_set, summary.total_problems);
    println!("Strategy:    {}", report.strategy);
    println!("Tasks:       {}", summary.total_tasks);
    println!("Runtime:     {:.1}s", summary.benchmark_time_ms as f64 / 1000.0);
    println!();
    println!(
        "{:<28} {:>6} {:>6} {:>6} {:>6} {:>8} {:>10}",
        "Model", "Total", "Solved", "Failed", "Errors", "Rate", "Avg time"
    );
    for (model, stats) in &summary.model_stats {
        println!(
            "{:<28} {:>6} {:>6} {:>6} {:>6} {:>7.1}% {:>9.1}s",
            model,
            stats.total,
            stats.solved,
            stats.failed,
            stats.errors,
            stats.success_rate,
            stats.avg_time_per_task_ms / 1000.0
        );
        let verdicts: Vec<String> = stats
            .verdicts
            .iter()
            .map(|(v, n)| format!("{v} ({})={n}", v.meaning()))
            .collect();
        println!("    verdicts: {}", verdicts.join(" "));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config.validate().context("Invalid configuration")?;
            config
                .resolve_judge_credentials()
                .context("Failed to resolve judge credentials")?;

            let enabled = config.enabled_models();
            info!("Configuration is valid");
            info!("  Models: {} enabled of {}", enabled.len(), config.models.len());
            info!("  Problem sets: {}", config.problem_sets.len());
            info!(
                "  Strategy: {}, workers: {}, substrate: {}",
                config.run.strategy,
                config.run.workers(),
                config.run.substrate
            );
        }

        Commands::Sets => {
            let config = load_config(&cli.config)?;
            if config.problem_sets.is_empty() {
                println!("No problem sets configured");
            }
            for (name, problems) in &config.problem_sets {
                println!("{name:<20} {:>3} problems  {}", problems.len(), problems.join(", "));
            }
        }

        Commands::Run {
            set,
            strategy,
            workers,
            substrate,
            attempts,
            output,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(strategy) = strategy {
                config.run.strategy = strategy;
            }
            if let Some(workers) = workers {
                config.run.max_workers = Some(workers);
            }
            if let Some(substrate) = substrate {
                config.run.substrate = substrate;
            }
            if let Some(attempts) = attempts {
                config.run.max_attempts = attempts;
            }
            config.validate().context("Invalid configuration")?;
            if config.enabled_models().is_empty() {
                bail!("No enabled models with resolvable API keys");
            }

            let benchmark = Benchmark::new(config).with_progress(!cli.verbose);
            let report = benchmark
                .run_live(&set)
                .await
                .with_context(|| format!("Benchmark on problem set '{set}' failed"))?;

            print_report(&report);

            if let Some(path) = output {
                report
                    .write_json(&path)
                    .with_context(|| format!("Failed to write report to {path:?}"))?;
                println!("\nReport:      {path:?}");
            }
        }
    }

    Ok(())
}
