//! Lurker main entry point
//!
//! This is the command-line interface for the Lurker forum archiver.

use anyhow::Context;
use clap::{Parser, Subcommand};
use lurker::config::{load_config_with_hash, Config};
use lurker::crawler::{crawl, CrawlPhase};
use lurker::output::{load_statistics, print_failures, print_statistics};
use lurker::storage::{RunStatus, SqliteStorage, TaskStore};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Lurker: a polite forum archiver
///
/// Lurker walks an SMF forum (boards, topics, posts, accounts and images)
/// into a SQLite database through a durable task queue, so interrupted
/// crawls pick up where they stopped.
#[derive(Parser, Debug)]
#[command(name = "lurker")]
#[command(version = "1.0.0")]
#[command(about = "A polite forum archiver", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the forum index and every board listing
    CrawlIndex,

    /// Crawl the recent posts pages and queue recently active topics
    CrawlRecent,

    /// Work queued topics and assets
    Download,

    /// Crawl everything, starting from the forum index
    Crawl,

    /// Show statistics from the database and exit
    Stats,

    /// Show the most recent entries of the failure ledger
    Failures {
        /// Number of failures to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Delete every pending task
    ClearQueue,

    /// Delete the queue, both ledgers and everything archived so far
    ClearAll,

    /// Validate config and show what would be crawled without crawling
    DryRun,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::CrawlIndex => handle_crawl(config, config_hash, CrawlPhase::Index).await,
        Command::CrawlRecent => handle_crawl(config, config_hash, CrawlPhase::Recent).await,
        Command::Download => handle_crawl(config, config_hash, CrawlPhase::Content).await,
        Command::Crawl => handle_crawl(config, config_hash, CrawlPhase::Full).await,
        Command::Stats => handle_stats(&config),
        Command::Failures { limit } => handle_failures(&config, limit),
        Command::ClearQueue => handle_clear_queue(&config),
        Command::ClearAll => handle_clear_all(&config),
        Command::DryRun => handle_dry_run(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("lurker=info,warn"),
            1 => EnvFilter::new("lurker=debug,info"),
            2 => EnvFilter::new("lurker=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_database(config: &Config) -> anyhow::Result<SqliteStorage> {
    let path = &config.storage.database_path;
    let storage = SqliteStorage::new(Path::new(path))
        .with_context(|| format!("failed to open database {}", path))?;
    Ok(storage.with_dedup_window(config.crawler.dedup_window()))
}

/// Handles the crawl commands
async fn handle_crawl(config: Config, config_hash: String, phase: CrawlPhase) -> anyhow::Result<()> {
    let summary = crawl(config, config_hash, phase)
        .await
        .with_context(|| format!("{} crawl failed", phase.name()))?;

    println!(
        "Run {} ({}) {}: {} tasks done, {} failed in {:.1}s",
        summary.run_id,
        phase.name(),
        summary.status.to_db_string(),
        summary.tasks_done,
        summary.tasks_failed,
        summary.elapsed.as_secs_f64()
    );
    if summary.tasks_failed > 0 {
        println!("Run `lurker <CONFIG> failures` to inspect the failure ledger.");
    }
    if summary.status == RunStatus::Interrupted || summary.status == RunStatus::TimedOut {
        println!("Pending tasks are kept; run the same command again to continue.");
    }
    Ok(())
}

/// Handles the stats command: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let storage = open_database(config)?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

fn handle_failures(config: &Config, limit: usize) -> anyhow::Result<()> {
    let storage = open_database(config)?;
    print_failures(&storage.recent_failures(limit)?);
    Ok(())
}

fn handle_clear_queue(config: &Config) -> anyhow::Result<()> {
    let storage = open_database(config)?;
    let removed = storage.clear_pending()?;
    println!("Removed {} pending tasks", removed);
    Ok(())
}

fn handle_clear_all(config: &Config) -> anyhow::Result<()> {
    let storage = open_database(config)?;
    let removed = storage.clear_all()?;
    println!(
        "Removed {} rows from the queue, ledgers and archive (run history kept)",
        removed
    );
    Ok(())
}

/// Handles the dry-run command: validates config and shows the seeds
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Lurker Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Workers: {}", config.crawler.workers);
    println!("  HTTP connections: {}", config.crawler.http_connections);
    println!(
        "  Requests per second: {}",
        config.crawler.requests_per_second
    );
    println!(
        "  Dedup window: {}s",
        config.crawler.dedup_window().as_secs()
    );
    match config.crawler.max_run() {
        Some(limit) => println!("  Run deadline: {}s", limit.as_secs()),
        None => println!("  Run deadline: none"),
    }

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!(
        "  Assets: database={}, filesystem={} ({})",
        config.assets.store_in_database,
        config.assets.store_on_filesystem,
        config.assets.directory
    );

    println!("\nSeeds:");
    for phase in [
        CrawlPhase::Index,
        CrawlPhase::Recent,
        CrawlPhase::Content,
        CrawlPhase::Full,
    ] {
        let seeds = phase.seeds(&config.forum)?;
        println!("  {} ({} seeds)", phase.name(), seeds.len());
        for seed in seeds {
            println!("    * {}", seed.canonical_url);
        }
    }

    println!("\n✓ Configuration is valid");

    Ok(())
}
