use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Context;
use color_eyre::Result;
use env_logger::Env;
use log::info;

use shardload::accounts::AccountRegistry;
use shardload::config::{self, Config};
use shardload::funding::Funder;
use shardload::generator::Generator;
use shardload::monitor::Monitor;
use shardload::pool::WorkerPool;
use shardload::rpc::{check_sharding_structure, HttpRpc, NodeApi};
use shardload::txlog::TxLogWriter;
use shardload::wallet::{resolve_binary_path, CliWallet, WalletApi};

/// Snapshot the transaction log every this many appends
const TX_LOG_BACKUP_EVERY: u64 = 100;

/// Load generation and verification toolkit for sharded PoS networks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the run configuration YAML file
    #[arg(short, long)]
    config: PathBuf,

    /// Transaction log file
    #[arg(long, default_value = "shardload_tx.log")]
    tx_log: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a batch of accounts and fund them through middlemen
    Fund {
        /// Number of accounts to create
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,

        /// Shard to fund on
        #[arg(short, long, default_value = "0")]
        shard: u32,

        /// Account name prefix
        #[arg(long, default_value = "acct")]
        prefix: String,
    },

    /// Run the transaction generator
    Generate {
        /// Number of source accounts
        #[arg(long, default_value = "4")]
        sources: usize,

        /// Number of sink accounts
        #[arg(long, default_value = "4")]
        sinks: usize,

        /// Run for a fixed duration, then stop (e.g. "10m"). Without this
        /// the run ends at the configured max count, or on SIGKILL.
        #[arg(long, value_parser = humantime::parse_duration)]
        duration: Option<Duration>,

        /// Skip funding the source accounts first
        #[arg(long)]
        no_fund: bool,
    },

    /// Poll shard status on an interval and write a JSON status file
    Monitor {
        #[arg(long, default_value = "shardload_status.json")]
        status_file: PathBuf,

        /// Stop after this long; absent = run until killed
        #[arg(long, value_parser = humantime::parse_duration)]
        duration: Option<Duration>,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = config::load_config(&args.config)?;

    match args.command {
        Command::Fund {
            count,
            shard,
            prefix,
        } => run_fund(&config, count, shard, &prefix),
        Command::Generate {
            sources,
            sinks,
            duration,
            no_fund,
        } => run_generate(&config, &args.tx_log, sources, sinks, duration, no_fund),
        Command::Monitor {
            status_file,
            duration,
        } => run_monitor(&config, &status_file, duration),
    }
}

/// Build the wallet client, RPC client, registry, and worker pool shared by
/// the fund and generate paths.
fn build_components(
    config: &Config,
) -> Result<(Arc<AccountRegistry>, Arc<dyn NodeApi>, WorkerPool)> {
    let binary = resolve_binary_path(&config.wallet.binary)?;
    let wallet: Arc<dyn WalletApi> = Arc::new(
        CliWallet::new(binary, config.network.endpoints[0].clone())
            .context("Wallet binary validation failed")?,
    );
    let rpc: Arc<dyn NodeApi> = Arc::new(HttpRpc::from_config(&config.network)?);
    check_sharding_structure(rpc.as_ref(), config.network.endpoints.len());

    let registry = Arc::new(AccountRegistry::new(
        Arc::clone(&wallet),
        Arc::clone(&rpc),
        config,
    ));

    // Import any pre-existing keystore before creating fresh accounts
    let pool = WorkerPool::new(config.generator.threads)?;
    if let Some(dir) = &config.wallet.keystore_dir {
        let imported = registry.load(&pool, dir, &config.wallet.passphrase)?;
        info!("Imported {} existing accounts", imported.len());
    }

    Ok((registry, rpc, pool))
}

fn run_fund(config: &Config, count: usize, shard: u32, prefix: &str) -> Result<()> {
    let (registry, _rpc, pool) = build_components(config)?;

    let names: Vec<String> = (0..count)
        .map(|i| {
            let name = format!("{}{:03}", prefix, i);
            registry.create(&name).map(|_| name)
        })
        .collect::<Result<_>>()?;

    let funder = Funder::new(Arc::clone(&registry), config);
    let summary = funder.fund_accounts(&pool, &names, shard, config.funding.init_balance)?;

    info!(
        "Funded {}/{} accounts ({} transfers via {} middlemen)",
        summary.targets_funded,
        names.len(),
        summary.transfers_issued,
        summary.middlemen_used
    );
    Ok(())
}

fn run_generate(
    config: &Config,
    tx_log: &PathBuf,
    sources: usize,
    sinks: usize,
    duration: Option<Duration>,
    no_fund: bool,
) -> Result<()> {
    let (registry, rpc, pool) = build_components(config)?;

    let source_names: Vec<String> = (0..sources)
        .map(|i| {
            let name = format!("src{:03}", i);
            registry.create(&name).map(|_| name)
        })
        .collect::<Result<_>>()?;
    let sink_names: Vec<String> = (0..sinks)
        .map(|i| {
            let name = format!("snk{:03}", i);
            registry.create(&name).map(|_| name)
        })
        .collect::<Result<_>>()?;

    if !no_fund {
        // Sources need spendable balance on the shard they mostly send from
        let fund_shard = config
            .generator
            .source_shard_weights
            .iter()
            .enumerate()
            .max_by_key(|(_, w)| **w)
            .map(|(i, _)| i as u32)
            .unwrap_or(0);

        let funder = Funder::new(Arc::clone(&registry), config);
        funder.fund_accounts(&pool, &source_names, fund_shard, config.funding.init_balance)?;
    }

    let log = Arc::new(TxLogWriter::open(tx_log, TX_LOG_BACKUP_EVERY)?);
    let mut generator = Generator::new(Arc::clone(&registry), rpc, Arc::clone(&log), config);
    generator.start(&pool, &source_names, &sink_names)?;

    let stats = match duration {
        Some(duration) => {
            info!("Generating load for {:?}", duration);
            std::thread::sleep(duration);
            generator.stop()
        }
        // Without a duration this blocks until the configured max count is
        // reached; with neither, until the process is killed.
        None => generator.join(),
    };

    info!(
        "Done: {} transfers issued ({} errors, {} skipped); log at {}",
        stats.issued,
        stats.errors,
        stats.skipped,
        log.path().display()
    );
    Ok(())
}

fn run_monitor(config: &Config, status_file: &PathBuf, duration: Option<Duration>) -> Result<()> {
    let rpc: Arc<dyn NodeApi> = Arc::new(HttpRpc::from_config(&config.network)?);
    check_sharding_structure(rpc.as_ref(), config.network.endpoints.len());
    let monitor = Monitor::new(
        rpc,
        config.network.endpoints.clone(),
        status_file,
        config.timing.status_interval,
    );

    let running = Arc::new(AtomicBool::new(true));
    if let Some(duration) = duration {
        let running = Arc::clone(&running);
        std::thread::spawn(move || {
            std::thread::sleep(duration);
            running.store(false, Ordering::Release);
        });
    }

    monitor.run(&running);
    Ok(())
}
