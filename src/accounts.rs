//! Account registry and manager.
//!
//! Named accounts live in a mutex-guarded local registry. Keystore entries
//! are owned by the external wallet; the registry holds the address,
//! passphrase, and a per-shard balance snapshot. Balances are
//! eventually-consistent caches, never authoritative until re-queried.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use color_eyre::eyre::{bail, eyre, Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::pool::WorkerPool;
use crate::rpc::NodeApi;
use crate::wallet::{TransferRequest, WalletApi};

/// Cached balance for one shard
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShardBalance {
    pub shard: u32,
    pub amount: f64,
}

/// One locally registered account
#[derive(Debug, Clone)]
pub struct Account {
    pub name: String,
    pub address: String,
    pub passphrase: String,
    /// Last known per-shard balances; refreshed by `balance`
    pub balances: Vec<ShardBalance>,
}

/// Per-call options for [`AccountRegistry::send`]
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Retries after the first failed attempt
    pub retries: u32,
    /// Poll for inclusion before returning
    pub wait_for_confirmation: bool,
    pub gas_price: f64,
    pub gas_limit: u64,
    pub nonce: Option<u64>,
}

impl SendOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retries: 0,
            wait_for_confirmation: false,
            gas_price: config.generator.gas_price,
            gas_limit: config.generator.gas_limit,
            nonce: None,
        }
    }
}

/// Mutex-guarded registry of local accounts.
///
/// External wallet and RPC calls are never made while the registry lock is
/// held; the lock only covers the read-modify-write of the map itself.
pub struct AccountRegistry {
    wallet: Arc<dyn WalletApi>,
    rpc: Arc<dyn NodeApi>,
    accounts: Mutex<HashMap<String, Account>>,
    default_passphrase: String,
    num_shards: u32,
    confirmation_timeout: std::time::Duration,
    poll_interval: std::time::Duration,
}

impl AccountRegistry {
    pub fn new(wallet: Arc<dyn WalletApi>, rpc: Arc<dyn NodeApi>, config: &Config) -> Self {
        Self {
            wallet,
            rpc,
            accounts: Mutex::new(HashMap::new()),
            default_passphrase: config.wallet.passphrase.clone(),
            num_shards: config.num_shards(),
            confirmation_timeout: config.timing.confirmation_timeout,
            poll_interval: config.timing.poll_interval,
        }
    }

    /// Create a keystore entry and register it. Idempotent: a second call
    /// with the same name returns the same address without error.
    pub fn create(&self, name: &str) -> Result<String> {
        if let Some(account) = self.get(name) {
            debug!("account '{}' already registered", name);
            return Ok(account.address);
        }

        let address = self
            .wallet
            .create_key(name, &self.default_passphrase, true)
            .with_context(|| format!("Failed to create account '{}'", name))?;

        let mut accounts = self.accounts.lock().expect("registry lock poisoned");
        let account = accounts.entry(name.to_string()).or_insert_with(|| Account {
            name: name.to_string(),
            address: address.clone(),
            passphrase: self.default_passphrase.clone(),
            balances: Vec::new(),
        });
        Ok(account.address.clone())
    }

    /// Bulk-import keystore files from a directory, fanning the per-file
    /// imports out across the worker pool. Returns imported names.
    pub fn load(&self, pool: &WorkerPool, dir: &Path, passphrase: &str) -> Result<Vec<String>> {
        if !dir.is_dir() {
            bail!("keystore directory {} does not exist", dir.display());
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read keystore directory {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() {
                files.push(path);
            }
        }
        info!("Importing {} keystore files from {}", files.len(), dir.display());

        let tasks: Vec<_> = files
            .into_iter()
            .map(|path| {
                let wallet = Arc::clone(&self.wallet);
                let passphrase = passphrase.to_string();
                move || wallet.import_key(&path, &passphrase)
            })
            .collect();

        let mut names = Vec::new();
        for result in pool.run_all(tasks) {
            match result.map_err(|e| eyre!(e))? {
                Ok((name, address)) => {
                    let mut accounts = self.accounts.lock().expect("registry lock poisoned");
                    accounts.insert(
                        name.clone(),
                        Account {
                            name: name.clone(),
                            address,
                            passphrase: passphrase.to_string(),
                            balances: Vec::new(),
                        },
                    );
                    names.push(name);
                }
                Err(e) => warn!("keystore import failed: {}", e),
            }
        }

        Ok(names)
    }

    /// Query per-shard balances for a named account and refresh the cached
    /// snapshot. No retry: a failed query propagates.
    pub fn balance(&self, name: &str) -> Result<Vec<ShardBalance>> {
        let address = self.address_of(name)?;

        let mut balances = Vec::with_capacity(self.num_shards as usize);
        for shard in 0..self.num_shards {
            let amount = self
                .rpc
                .balance(shard, &address)
                .with_context(|| format!("Balance query failed for '{}' on shard {}", name, shard))?;
            balances.push(ShardBalance { shard, amount });
        }

        let mut accounts = self.accounts.lock().expect("registry lock poisoned");
        if let Some(account) = accounts.get_mut(name) {
            account.balances = balances.clone();
        }
        Ok(balances)
    }

    /// Send a transfer from a registered account. `to` may be a registered
    /// name or a raw address. Retried up to `options.retries` times on
    /// failure; optionally polls for inclusion before returning.
    pub fn send(
        &self,
        from: &str,
        to: &str,
        from_shard: u32,
        to_shard: u32,
        amount: f64,
        options: &SendOptions,
    ) -> Result<String> {
        let from_account = self
            .get(from)
            .ok_or_else(|| eyre!("sender '{}' is not in the local registry", from))?;
        let to_address = self
            .get(to)
            .map(|a| a.address)
            .unwrap_or_else(|| to.to_string());

        let request = TransferRequest {
            from_address: from_account.address,
            to_address,
            from_shard,
            to_shard,
            amount,
            gas_price: options.gas_price,
            gas_limit: options.gas_limit,
            nonce: options.nonce,
            passphrase: from_account.passphrase,
            timeout: self.confirmation_timeout,
        };

        let mut attempt = 0;
        let hash = loop {
            match self.wallet.transfer(&request) {
                Ok(hash) => break hash,
                Err(e) if attempt < options.retries => {
                    attempt += 1;
                    warn!(
                        "transfer {} -> {} failed (attempt {}/{}): {}",
                        from,
                        to,
                        attempt,
                        options.retries + 1,
                        e
                    );
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Transfer {} -> {} failed after {} attempts", from, to, attempt + 1)
                    })
                }
            }
        };

        if options.wait_for_confirmation {
            self.wait_for_confirmation(from_shard, &hash)?;
        }

        Ok(hash)
    }

    /// Poll until the transaction is included or the timeout elapses.
    fn wait_for_confirmation(&self, shard: u32, hash: &str) -> Result<()> {
        let deadline = Instant::now() + self.confirmation_timeout;
        loop {
            // A transient query failure is just "not yet visible"
            match self.rpc.transaction_by_hash(shard, hash) {
                Ok(Some(status)) if status.is_confirmed() => return Ok(()),
                Ok(_) => {}
                Err(e) => debug!("confirmation poll for {} failed: {}", hash, e),
            }
            if Instant::now() >= deadline {
                bail!("transaction {} not confirmed within timeout", hash);
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Delete keystore entries and drop them from the registry. With a
    /// backup directory, the private key is exported there first.
    pub fn remove(&self, names: &[String], backup_dir: Option<&Path>) -> Result<()> {
        for name in names {
            if let Some(dir) = backup_dir {
                let secret = self
                    .wallet
                    .export_key(name)
                    .with_context(|| format!("Failed to export key '{}' for backup", name))?;
                std::fs::create_dir_all(dir)?;
                std::fs::write(dir.join(format!("{}.key", name)), secret)
                    .with_context(|| format!("Failed to write backup for '{}'", name))?;
            }

            self.wallet
                .remove_key(name)
                .with_context(|| format!("Failed to remove key '{}'", name))?;

            let mut accounts = self.accounts.lock().expect("registry lock poisoned");
            accounts.remove(name);
        }
        Ok(())
    }

    /// Clone of one account, if registered
    pub fn get(&self, name: &str) -> Option<Account> {
        self.accounts
            .lock()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Address of a registered account
    pub fn address_of(&self, name: &str) -> Result<String> {
        self.get(name)
            .map(|a| a.address)
            .ok_or_else(|| eyre!("account '{}' is not in the local registry", name))
    }

    /// Snapshot of all registered accounts
    pub fn snapshot(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self
            .accounts
            .lock()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        accounts
    }

    pub fn len(&self) -> usize {
        self.accounts.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sample_config;
    use crate::test_support::{MockRpc, MockWallet};

    fn registry(wallet: Arc<MockWallet>, rpc: Arc<MockRpc>) -> AccountRegistry {
        AccountRegistry::new(wallet, rpc, &sample_config())
    }

    #[test]
    fn test_create_is_idempotent() {
        let wallet = Arc::new(MockWallet::default());
        let reg = registry(wallet, Arc::new(MockRpc::default()));

        let first = reg.create("alice").unwrap();
        let second = reg.create("alice").unwrap();
        assert_eq!(first, second);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_create_survives_preexisting_keystore_entry() {
        // Key exists in the wallet but not in this process's registry
        let wallet = Arc::new(MockWallet::default());
        wallet.preload_key("alice", "addr-alice");

        let reg = registry(Arc::clone(&wallet), Arc::new(MockRpc::default()));
        let address = reg.create("alice").unwrap();
        assert_eq!(address, "addr-alice");
    }

    #[test]
    fn test_send_unknown_sender_fails() {
        let reg = registry(
            Arc::new(MockWallet::default()),
            Arc::new(MockRpc::default()),
        );
        let options = SendOptions::from_config(&sample_config());
        let result = reg.send("ghost", "addr-x", 0, 0, 1.0, &options);
        assert!(result.is_err());
    }

    #[test]
    fn test_send_retries_up_to_bound() {
        let wallet = Arc::new(MockWallet::default());
        wallet.fail_next_transfers(2);

        let reg = registry(Arc::clone(&wallet), Arc::new(MockRpc::default()));
        reg.create("alice").unwrap();

        let mut options = SendOptions::from_config(&sample_config());
        options.retries = 2;
        let hash = reg.send("alice", "addr-bob", 0, 1, 1.0, &options).unwrap();
        assert!(!hash.is_empty());
        // 2 failures + 1 success
        assert_eq!(wallet.transfer_attempts(), 3);
    }

    #[test]
    fn test_send_exhausted_retries_propagates() {
        let wallet = Arc::new(MockWallet::default());
        wallet.fail_next_transfers(5);

        let reg = registry(Arc::clone(&wallet), Arc::new(MockRpc::default()));
        reg.create("alice").unwrap();

        let mut options = SendOptions::from_config(&sample_config());
        options.retries = 1;
        assert!(reg.send("alice", "addr-bob", 0, 1, 1.0, &options).is_err());
        assert_eq!(wallet.transfer_attempts(), 2);
    }

    #[test]
    fn test_balance_refreshes_cache() {
        let wallet = Arc::new(MockWallet::default());
        let rpc = Arc::new(MockRpc::default());

        let reg = registry(Arc::clone(&wallet), Arc::clone(&rpc));
        reg.create("alice").unwrap();
        let address = reg.address_of("alice").unwrap();
        rpc.set_balance(0, &address, 12.5);
        rpc.set_balance(1, &address, 0.0);

        let balances = reg.balance("alice").unwrap();
        assert_eq!(balances.len(), 2);
        assert!((balances[0].amount - 12.5).abs() < 1e-9);

        let cached = reg.get("alice").unwrap();
        assert!((cached.balances[0].amount - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_remove_with_backup_exports_key() {
        let wallet = Arc::new(MockWallet::default());
        let reg = registry(Arc::clone(&wallet), Arc::new(MockRpc::default()));
        reg.create("alice").unwrap();

        let dir = tempfile::tempdir().unwrap();
        reg.remove(&["alice".to_string()], Some(dir.path())).unwrap();

        assert!(dir.path().join("alice.key").exists());
        assert!(reg.is_empty());
        assert!(wallet.list_keys().unwrap().is_empty());
    }
}
