//! External wallet CLI client.
//!
//! All key management and signed submission goes through an external wallet
//! binary. The fragile subprocess details live behind the [`WalletApi`]
//! trait; everything above it (registry, funding, generator) only sees typed
//! calls, and tests substitute an in-memory implementation.

use std::env;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use log::debug;
use serde_json::Value;

/// Default directory for shardload binaries
const DEFAULT_BIN_DIR: &str = ".shardload/bin";

/// Errors from the external wallet binary or its invocation
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("Wallet binary not found: {path}")]
    NotFound { path: String },

    #[error("Wallet binary is not executable: {path}")]
    NotExecutable { path: String },

    #[error("Cannot determine home directory")]
    NoHomeDir,

    #[error("Wallet command failed ({command}): {output}")]
    CommandFailed { command: String, output: String },

    #[error("Unexpected wallet output for {command}: {output}")]
    UnexpectedOutput { command: String, output: String },

    #[error("No key named '{0}' in the keystore")]
    UnknownKey(String),

    #[error("Failed to spawn wallet process: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Parameters for a single signed transfer
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub from_address: String,
    pub to_address: String,
    pub from_shard: u32,
    pub to_shard: u32,
    /// Amount in whole tokens
    pub amount: f64,
    pub gas_price: f64,
    pub gas_limit: u64,
    /// Locally assigned nonce; `None` lets the wallet query the network
    pub nonce: Option<u64>,
    pub passphrase: String,
    pub timeout: Duration,
}

/// Typed interface to the external wallet binary.
///
/// Every method is a blocking call; implementations must be safe to call
/// concurrently from worker threads.
pub trait WalletApi: Send + Sync {
    /// Create a keystore entry and return its address. With `exist_ok`, an
    /// entry that already exists resolves to its current address instead of
    /// failing.
    fn create_key(&self, name: &str, passphrase: &str, exist_ok: bool)
        -> Result<String, WalletError>;

    /// Import one keystore file; returns the imported (name, address). Bulk
    /// loads fan these calls out across the worker pool.
    fn import_key(&self, path: &Path, passphrase: &str) -> Result<(String, String), WalletError>;

    /// List (name, address) pairs known to the keystore.
    fn list_keys(&self) -> Result<Vec<(String, String)>, WalletError>;

    /// Export the secret key material for backup.
    fn export_key(&self, name: &str) -> Result<String, WalletError>;

    /// Delete a keystore entry.
    fn remove_key(&self, name: &str) -> Result<(), WalletError>;

    /// Submit a signed transfer; returns the transaction hash.
    fn transfer(&self, req: &TransferRequest) -> Result<String, WalletError>;
}

/// Get the user's home directory from the HOME environment variable
fn get_home_dir() -> Result<PathBuf, WalletError> {
    env::var("HOME")
        .map(PathBuf::from)
        .map_err(|_| WalletError::NoHomeDir)
}

/// Resolve a wallet binary path from a shorthand name or explicit path.
///
/// Resolution rules:
/// 1. If path contains `/` or starts with `~`: treat as explicit path
/// 2. Otherwise: expand shorthand to `~/.shardload/bin/{name}`
pub fn resolve_binary_path(name_or_path: &str) -> Result<PathBuf, WalletError> {
    let home_dir = get_home_dir()?;

    if name_or_path.contains('/') || name_or_path.starts_with('~') {
        let expanded = if let Some(rest) = name_or_path.strip_prefix("~/") {
            home_dir.join(rest)
        } else {
            PathBuf::from(name_or_path)
        };
        Ok(expanded)
    } else {
        Ok(home_dir.join(DEFAULT_BIN_DIR).join(name_or_path))
    }
}

/// Validate that the wallet binary exists and is executable.
///
/// Called at startup so a misconfigured path fails before any funding or
/// generation work begins.
pub fn validate_binary(path: &Path) -> Result<(), WalletError> {
    if !path.exists() {
        return Err(WalletError::NotFound {
            path: path.display().to_string(),
        });
    }

    let metadata = std::fs::metadata(path)?;
    if metadata.permissions().mode() & 0o111 == 0 {
        return Err(WalletError::NotExecutable {
            path: path.display().to_string(),
        });
    }

    Ok(())
}

/// Concrete [`WalletApi`] driving the external wallet binary.
///
/// The binary is expected to print a single JSON document on stdout for
/// key-management and transfer commands; anything else is a fatal
/// `UnexpectedOutput` for that call, never retried here.
pub struct CliWallet {
    binary: PathBuf,
    /// Node endpoint handed to the CLI for nonce lookup and submission
    node_endpoint: String,
}

impl CliWallet {
    pub fn new(binary: PathBuf, node_endpoint: String) -> Result<Self, WalletError> {
        validate_binary(&binary)?;
        Ok(Self {
            binary,
            node_endpoint,
        })
    }

    /// Run the wallet binary with `args`, feeding `stdin_data` if given, and
    /// return captured stdout. Non-zero exit surfaces the combined output.
    fn run(&self, args: &[String], stdin_data: Option<&str>) -> Result<String, WalletError> {
        let command_desc = args.first().cloned().unwrap_or_default();
        debug!("wallet: {} {}", self.binary.display(), args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(if stdin_data.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(data) = stdin_data {
            if let Some(stdin) = child.stdin.as_mut() {
                stdin.write_all(data.as_bytes())?;
                stdin.write_all(b"\n")?;
            }
        }

        let output = child.wait_with_output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WalletError::CommandFailed {
                command: command_desc,
                output: format!("{}{}", stdout, stderr).trim().to_string(),
            });
        }

        Ok(stdout)
    }

    /// Parse a JSON document from wallet stdout
    fn parse_json(command: &str, stdout: &str) -> Result<Value, WalletError> {
        serde_json::from_str(stdout.trim()).map_err(|_| WalletError::UnexpectedOutput {
            command: command.to_string(),
            output: stdout.trim().to_string(),
        })
    }

    fn extract_str(command: &str, value: &Value, field: &str) -> Result<String, WalletError> {
        value
            .get(field)
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| WalletError::UnexpectedOutput {
                command: command.to_string(),
                output: value.to_string(),
            })
    }
}

impl WalletApi for CliWallet {
    fn create_key(
        &self,
        name: &str,
        passphrase: &str,
        exist_ok: bool,
    ) -> Result<String, WalletError> {
        let args = vec![
            "keys".to_string(),
            "add".to_string(),
            name.to_string(),
            "--passphrase".to_string(),
        ];

        match self.run(&args, Some(passphrase)) {
            Ok(stdout) => {
                let value = Self::parse_json("keys add", &stdout)?;
                Self::extract_str("keys add", &value, "address")
            }
            Err(WalletError::CommandFailed { output, .. })
                if exist_ok && output.contains("already exists") =>
            {
                // Resolve the existing entry's address instead of failing
                self.list_keys()?
                    .into_iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, addr)| addr)
                    .ok_or_else(|| WalletError::UnknownKey(name.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn import_key(&self, path: &Path, passphrase: &str) -> Result<(String, String), WalletError> {
        let args = vec![
            "keys".to_string(),
            "import-ks".to_string(),
            path.display().to_string(),
            "--passphrase".to_string(),
        ];
        let stdout = self.run(&args, Some(passphrase))?;
        let value = Self::parse_json("keys import-ks", &stdout)?;

        let name = Self::extract_str("keys import-ks", &value, "name")?;
        let address = Self::extract_str("keys import-ks", &value, "address")?;
        Ok((name, address))
    }

    fn list_keys(&self) -> Result<Vec<(String, String)>, WalletError> {
        let args = vec!["keys".to_string(), "list".to_string()];
        let stdout = self.run(&args, None)?;
        let value = Self::parse_json("keys list", &stdout)?;

        let entries = value
            .as_array()
            .ok_or_else(|| WalletError::UnexpectedOutput {
                command: "keys list".to_string(),
                output: value.to_string(),
            })?;

        let mut keys = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = Self::extract_str("keys list", entry, "name")?;
            let address = Self::extract_str("keys list", entry, "address")?;
            keys.push((name, address));
        }
        Ok(keys)
    }

    fn export_key(&self, name: &str) -> Result<String, WalletError> {
        let args = vec![
            "keys".to_string(),
            "export-private-key".to_string(),
            name.to_string(),
        ];
        let stdout = self.run(&args, None)?;
        let secret = stdout.trim().to_string();
        if secret.is_empty() {
            return Err(WalletError::UnexpectedOutput {
                command: "keys export-private-key".to_string(),
                output: stdout,
            });
        }
        Ok(secret)
    }

    fn remove_key(&self, name: &str) -> Result<(), WalletError> {
        let args = vec!["keys".to_string(), "remove".to_string(), name.to_string()];
        self.run(&args, None)?;
        Ok(())
    }

    fn transfer(&self, req: &TransferRequest) -> Result<String, WalletError> {
        let mut args = vec![
            "transfer".to_string(),
            "--node".to_string(),
            self.node_endpoint.clone(),
            "--from".to_string(),
            req.from_address.clone(),
            "--to".to_string(),
            req.to_address.clone(),
            "--from-shard".to_string(),
            req.from_shard.to_string(),
            "--to-shard".to_string(),
            req.to_shard.to_string(),
            "--amount".to_string(),
            format!("{}", req.amount),
            "--gas-price".to_string(),
            format!("{}", req.gas_price),
            "--gas-limit".to_string(),
            req.gas_limit.to_string(),
            "--timeout".to_string(),
            req.timeout.as_secs().to_string(),
            "--passphrase".to_string(),
        ];
        if let Some(nonce) = req.nonce {
            args.push("--nonce".to_string());
            args.push(nonce.to_string());
        }

        let stdout = self.run(&args, Some(&req.passphrase))?;
        let value = Self::parse_json("transfer", &stdout)?;
        Self::extract_str("transfer", &value, "transaction-hash")
    }
}
