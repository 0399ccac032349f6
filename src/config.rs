//! Typed run configuration.
//!
//! The whole run is described by a single YAML file loaded into [`Config`].
//! The value is validated once at load time and then passed by reference to
//! each component; there is no process-global mutable configuration store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::Result;
use log::info;
use serde::{Deserialize, Serialize};

/// Errors produced by configuration validation
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid network configuration: {0}")]
    InvalidNetwork(String),

    #[error("Invalid wallet configuration: {0}")]
    InvalidWallet(String),

    #[error("Invalid generator configuration: {0}")]
    InvalidGenerator(String),

    #[error("Invalid funding configuration: {0}")]
    InvalidFunding(String),
}

/// Top-level run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    pub wallet: WalletConfig,
    pub generator: GeneratorConfig,
    pub funding: FundingConfig,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Per-shard endpoints and RPC behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint URLs, indexed by shard id
    pub endpoints: Vec<String>,
    /// Fixed timeout applied to every RPC call
    #[serde(with = "humantime_serde", default = "default_rpc_timeout")]
    pub rpc_timeout: Duration,
}

/// External wallet CLI settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Wallet binary: shorthand name resolved under ~/.shardload/bin, or an
    /// explicit path
    pub binary: String,
    /// Passphrase applied to every locally created keystore entry
    pub passphrase: String,
    /// Optional directory of keystore files to bulk-import at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keystore_dir: Option<PathBuf>,
}

/// Transaction generator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Worker thread cap for the shared pool
    pub threads: usize,
    /// Relative weight of each shard when sampling the source shard;
    /// must have one entry per endpoint
    pub source_shard_weights: Vec<u32>,
    /// Relative weight of each shard when sampling the destination shard
    pub sink_shard_weights: Vec<u32>,
    /// Reject same-shard (src, dst) pairs
    #[serde(default)]
    pub cross_shard_only: bool,
    /// Track and assign nonces locally instead of letting the wallet CLI
    /// query one per call
    #[serde(default)]
    pub enforce_nonce: bool,
    /// Stop after issuing this many transfer calls; absent = run until stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_transactions: Option<u64>,
    /// Amount per generated transfer, in whole tokens
    pub amount: f64,
    pub gas_price: f64,
    pub gas_limit: u64,
}

/// Funding orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingConfig {
    /// Target balance for each newly funded account
    pub init_balance: f64,
    /// Minimum balance a registry account must hold on the requested shard
    /// to qualify as a funding source
    pub min_source_balance: f64,
    /// Gas allowance added on top of each middleman's group total
    #[serde(default = "default_gas_overhead")]
    pub gas_overhead: f64,
    /// Address that drained middleman balances are returned to; defaults to
    /// the source account that funded the middleman
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_address: Option<String>,
}

/// Poll intervals and confirmation timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// How long `send` waits for a confirmation before giving up
    #[serde(with = "humantime_serde", default = "default_confirmation_timeout")]
    pub confirmation_timeout: Duration,
    /// Poll interval while waiting for a confirmation
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
    /// Interval between status snapshots in monitor mode
    #[serde(with = "humantime_serde", default = "default_status_interval")]
    pub status_interval: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: default_confirmation_timeout(),
            poll_interval: default_poll_interval(),
            status_interval: default_status_interval(),
        }
    }
}

fn default_rpc_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_confirmation_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_status_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_gas_overhead() -> f64 {
    0.05
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.endpoints.is_empty() {
            return Err(ConfigError::InvalidNetwork(
                "at least one shard endpoint is required".to_string(),
            ));
        }
        if self.network.rpc_timeout.is_zero() {
            return Err(ConfigError::InvalidNetwork(
                "rpc_timeout must be non-zero".to_string(),
            ));
        }

        if self.wallet.binary.is_empty() {
            return Err(ConfigError::InvalidWallet(
                "wallet binary cannot be empty".to_string(),
            ));
        }

        let shards = self.network.endpoints.len();
        Self::validate_weights(
            "source_shard_weights",
            &self.generator.source_shard_weights,
            shards,
        )?;
        Self::validate_weights(
            "sink_shard_weights",
            &self.generator.sink_shard_weights,
            shards,
        )?;

        if self.generator.threads == 0 {
            return Err(ConfigError::InvalidGenerator(
                "threads must be at least 1".to_string(),
            ));
        }
        if self.generator.amount <= 0.0 {
            return Err(ConfigError::InvalidGenerator(
                "amount must be positive".to_string(),
            ));
        }
        if self.generator.gas_price <= 0.0 {
            return Err(ConfigError::InvalidGenerator(
                "gas_price must be positive".to_string(),
            ));
        }
        if self.generator.gas_limit == 0 {
            return Err(ConfigError::InvalidGenerator(
                "gas_limit must be non-zero".to_string(),
            ));
        }
        if self.generator.cross_shard_only && shards < 2 {
            return Err(ConfigError::InvalidGenerator(
                "cross_shard_only requires at least 2 shards".to_string(),
            ));
        }

        if self.funding.init_balance <= 0.0 {
            return Err(ConfigError::InvalidFunding(
                "init_balance must be positive".to_string(),
            ));
        }
        if self.funding.min_source_balance < 0.0 {
            return Err(ConfigError::InvalidFunding(
                "min_source_balance cannot be negative".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_weights(field: &str, weights: &[u32], shards: usize) -> Result<(), ConfigError> {
        if weights.len() != shards {
            return Err(ConfigError::InvalidGenerator(format!(
                "{} must have one entry per endpoint ({} entries for {} shards)",
                field,
                weights.len(),
                shards
            )));
        }
        if weights.iter().all(|&w| w == 0) {
            return Err(ConfigError::InvalidGenerator(format!(
                "{} must contain at least one non-zero weight",
                field
            )));
        }
        Ok(())
    }

    /// Number of shards this run addresses
    pub fn num_shards(&self) -> u32 {
        self.network.endpoints.len() as u32
    }
}

/// Load and parse configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<Config> {
    info!("Loading configuration from: {:?}", config_path);

    let file = std::fs::File::open(config_path)?;
    let config: Config = serde_yaml::from_reader(file)?;

    config.validate()?;

    info!(
        "Configuration loaded: {} shards, {} worker threads",
        config.num_shards(),
        config.generator.threads
    );

    Ok(config)
}

#[cfg(test)]
pub(crate) fn sample_config() -> Config {
    Config {
        network: NetworkConfig {
            endpoints: vec![
                "http://127.0.0.1:9500".to_string(),
                "http://127.0.0.1:9502".to_string(),
            ],
            rpc_timeout: default_rpc_timeout(),
        },
        wallet: WalletConfig {
            binary: "hwallet".to_string(),
            passphrase: "test-pass".to_string(),
            keystore_dir: None,
        },
        generator: GeneratorConfig {
            threads: 4,
            source_shard_weights: vec![1, 1],
            sink_shard_weights: vec![1, 1],
            cross_shard_only: false,
            enforce_nonce: false,
            max_transactions: None,
            amount: 1.0,
            gas_price: 1.0,
            gas_limit: 21000,
        },
        funding: FundingConfig {
            init_balance: 10.0,
            min_source_balance: 100.0,
            gas_overhead: 0.05,
            refund_address: None,
        },
        timing: TimingConfig::default(),
    }
}
