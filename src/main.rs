//! logcache CLI
//!
//! Fetch a time window of log events through the local segment cache
//! and print a run summary.

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::Parser;
use logcache::config::{generate_default_config, Config};
use logcache::service::{iso8601_to_epoch_ms, IngestionService};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "logcache")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cached log-search ingestion")]
#[command(
    long_about = "Fetches a window of log events from the hosted log-search API,\ncaching fetched windows as local segments so repeated and overlapping\nrequests only fetch what is missing."
)]
struct Cli {
    /// Window start, ISO 8601 with timezone offset (e.g. 2024-05-01T00:00:00Z)
    #[arg(long)]
    start_time: String,

    /// Window end, exclusive, ISO 8601 with timezone offset
    #[arg(long)]
    end_time: String,

    /// Partition label recorded in the run summary (YYYY-MM-DD)
    #[arg(long)]
    partition_date: Option<String>,

    /// Config file path (default: standard locations, then environment)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a default config file and exit
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_default_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };

    init_logging(&config);

    config.validate()?;

    // Reject bad inputs before any fetching or cache work
    for value in [&cli.start_time, &cli.end_time] {
        iso8601_to_epoch_ms(value)?;
    }
    if let Some(date) = &cli.partition_date {
        if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
            bail!("--partition-date must be YYYY-MM-DD, got {:?}", date);
        }
    }

    let service = IngestionService::new(config).context("Failed to build API client")?;

    let result = service
        .run(&cli.start_time, &cli.end_time, cli.partition_date.as_deref())
        .await
        .context("Ingestion failed")?;

    println!();
    println!("=== Log Ingestion Complete ===");
    println!("Run ID:          {}", result.run_id);
    println!("Window:          {} -> {}", result.start_time, result.end_time);
    println!("Cache decision:  {}", result.cache_decision);
    println!("Rows processed:  {}", result.rows_processed);
    println!("Segments used:   {}", result.segments_used);
    println!("Parts written:   {}", result.parts_written);
    if result.duplicates_dropped > 0 {
        println!("Duplicates:      {}", result.duplicates_dropped);
    }
    println!("Total bytes:     {}", result.total_bytes);
    println!("Duration:        {:.2}s", result.duration_seconds);
    for path in &result.output_paths {
        println!("  {}", path.display());
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("logcache={}", config.logging.level)),
    );

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
