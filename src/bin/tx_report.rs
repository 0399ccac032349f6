//! Transaction log verification CLI.
//!
//! Replays a shardload transaction log, re-queries every recorded hash
//! against the network, and writes JSON and text reports.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Context, Result};

use shardload::analysis::{self, TimeWindow};
use shardload::config;
use shardload::rpc::HttpRpc;

#[derive(Parser)]
#[command(name = "tx-report")]
#[command(about = "Verify shardload transaction logs against the network")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the run configuration YAML file
    #[arg(short, long)]
    config: PathBuf,

    /// Transaction log to analyze
    #[arg(short, long, default_value = "shardload_tx.log")]
    log: PathBuf,

    /// Output directory for reports
    #[arg(short, long, default_value = "report_output")]
    output: PathBuf,

    /// Only count records at or after this RFC 3339 timestamp
    #[arg(long)]
    from: Option<String>,

    /// Only count records before this RFC 3339 timestamp
    #[arg(long)]
    to: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of parallel workers (0 = auto-detect)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-query every hash and write full reports
    Verify,

    /// Parse the log and print counts without touching the network
    Summary,
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| eyre!("Invalid timestamp {value:?}: {e}"))
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    let window = TimeWindow {
        start: cli.from.as_deref().map(parse_timestamp).transpose()?,
        end: cli.to.as_deref().map(parse_timestamp).transpose()?,
    };

    log::info!("Parsing {}...", cli.log.display());
    let parsed = analysis::parse_log(&cli.log, &window)?;

    match cli.command {
        Commands::Summary => {
            println!("Records:            {}", parsed.records.len());
            println!("Duplicates dropped: {}", parsed.duplicates_dropped);
            println!("Malformed lines:    {}", parsed.malformed_lines);
            println!("Outside window:     {}", parsed.outside_window);
            Ok(())
        }
        Commands::Verify => {
            let cfg = config::load_config(&cli.config)?;
            let rpc = HttpRpc::from_config(&cfg.network)?;

            log::info!(
                "Verifying {} records against {} shard endpoints...",
                parsed.records.len(),
                cfg.network.endpoints.len()
            );
            let report = analysis::build_report(&parsed, &rpc, &cli.log, &window);

            std::fs::create_dir_all(&cli.output).with_context(|| {
                format!("Failed to create output directory {}", cli.output.display())
            })?;
            analysis::generate_json_report(&report, &cli.output.join("verification.json"))?;
            analysis::generate_text_report(&report, &cli.output.join("verification.txt"))?;
            analysis::print_summary(&report);
            Ok(())
        }
    }
}
