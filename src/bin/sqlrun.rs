//! sqlrun — replay a SQL workload
//!
//! # Usage
//!
//! ```bash
//! # Run every query in the file once
//! sqlrun workload.toml
//!
//! # 8 workers for at most 60 seconds
//! sqlrun workload.json --workers 8 --max-iterations 1000000 --duration 60
//!
//! # Show what would run
//! sqlrun workload.toml --dry-run
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use sqlrun::prelude::*;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlrun")]
#[command(version)]
#[command(about = "Replay SQL workloads with bounded concurrency", long_about = None)]
#[command(after_help = "EXAMPLES:
    sqlrun workload.toml
    sqlrun bulk.json --workers 16 --failed-log failed.jsonl
    sqlrun workload.toml --max-iterations 10000 --duration 300 --quiet")]
struct Cli {
    /// Workload configuration (TOML or JSON)
    config: Option<PathBuf>,

    /// Database connection URL, overrides the configuration file
    #[arg(long, env = "DATABASE_URL")]
    connection_string: Option<String>,

    /// Number of concurrent workers
    #[arg(short, long)]
    workers: Option<u16>,

    /// Number of iterations to admit (0 runs every query once)
    #[arg(short = 'n', long)]
    max_iterations: Option<u64>,

    /// Stop admitting iterations after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Append failed queries to this file
    #[arg(long)]
    failed_log: Option<PathBuf>,

    /// Don't log every finished statement
    #[arg(short, long)]
    quiet: bool,

    /// Don't execute, just show the resolved workload
    #[arg(long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "sqlrun=debug" } else { "sqlrun=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    if cli.dry_run {
        show_workload(&config);
        return Ok(());
    }

    let connector = SqlxConnector::new(&config.connection_string);
    let driver = Driver::new(config, &connector)?;
    let metrics = Arc::new(RunMetrics::new());
    driver.subscribe(Arc::new(TracingSink::new().log_queries(!cli.quiet)));
    driver.subscribe(metrics.clone());

    let report = driver.run().await?;
    show_summary(&report, &metrics.summary(report.elapsed));
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Configuration> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => Configuration::default_path()
            .context("no configuration file given and no default location available")?,
    };
    let mut config = Configuration::load(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;

    if let Some(url) = &cli.connection_string {
        config.connection_string = url.clone();
    }
    if let Some(workers) = cli.workers {
        config.worker_threads = workers;
    }
    if let Some(max) = cli.max_iterations {
        config.max_iterations = max;
    }
    if let Some(seconds) = cli.duration {
        config.max_duration_seconds = seconds;
    }
    if let Some(log) = &cli.failed_log {
        config.failed_queries_log = Some(log.clone());
    }

    config.validate()?;
    Ok(config)
}

fn show_workload(config: &Configuration) {
    println!("{}", "Workload:".green().bold());
    println!("  {} {}", "Workers:".dimmed(), config.worker_threads);
    println!("  {} {}", "Max iterations:".dimmed(), config.max_iterations);
    println!("  {} {}s", "Max duration:".dimmed(), config.max_duration_seconds);
    if let Some(log) = config.failed_log_path() {
        println!("  {} {}", "Failed log:".dimmed(), log.display());
    }
    println!();

    if let Some(startup) = &config.startup {
        println!("{} {}", "startup".cyan(), startup.text().white());
    }
    for (i, query) in config.queries.iter().enumerate() {
        let mode = if query.is_reader() { "reader" } else { "writer" };
        let kind = match query.kind() {
            CommandKind::Text => "",
            CommandKind::StoredProcedure => " proc",
        };
        println!(
            "{:>7} {}{} {}",
            i.to_string().cyan(),
            mode.yellow(),
            kind.yellow(),
            query.text().white()
        );
    }
    if let Some(cleanup) = &config.cleanup {
        println!("{} {}", "cleanup".cyan(), cleanup.text().white());
    }
}

fn show_summary(report: &RunReport, summary: &RunSummary) {
    println!();
    println!("{}", "Summary:".green().bold());
    println!(
        "  {} {} in {:.3}s",
        "Iterations:".dimmed(),
        report.final_iteration.to_string().cyan(),
        report.elapsed.as_secs_f64()
    );
    println!(
        "  {} {} ok, {} failed",
        "Statements:".dimmed(),
        summary.succeeded.to_string().green(),
        if summary.failed > 0 {
            summary.failed.to_string().red()
        } else {
            summary.failed.to_string().normal()
        }
    );
    println!("  {} {}", "Rows:".dimmed(), summary.rows);
    println!("  {} {:.1} stmt/s", "Throughput:".dimmed(), summary.throughput());
    println!(
        "  {} {:.2} ms mean, {:.2} ms max",
        "Latency:".dimmed(),
        summary.mean_latency.as_secs_f64() * 1000.0,
        summary.max_latency.as_secs_f64() * 1000.0
    );
    println!(
        "  {} {}",
        "Started:".dimmed(),
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}
