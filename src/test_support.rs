//! In-memory wallet and node doubles for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::rpc::{HeaderInfo, NodeApi, RpcError, ShardInfo, TxStatus};
use crate::wallet::{TransferRequest, WalletApi, WalletError};

/// Wallet double: keys in a map, transfers recorded, failures injectable.
#[derive(Default)]
pub struct MockWallet {
    keys: Mutex<BTreeMap<String, String>>,
    transfers: Mutex<Vec<TransferRequest>>,
    attempts: AtomicUsize,
    fail_next: AtomicUsize,
    /// 1-based [from, until) window of transfer attempts that fail
    fail_from: AtomicUsize,
    fail_until: AtomicUsize,
    hash_counter: AtomicU64,
}

impl MockWallet {
    /// Seed a key that exists in the wallet before the registry sees it
    pub fn preload_key(&self, name: &str, address: &str) {
        self.keys
            .lock()
            .unwrap()
            .insert(name.to_string(), address.to_string());
    }

    /// Make the next `n` transfer calls fail
    pub fn fail_next_transfers(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Make transfer attempts `from..from + n` fail, counting from 1
    pub fn fail_transfer_attempts(&self, from: usize, n: usize) {
        self.fail_from.store(from, Ordering::SeqCst);
        self.fail_until.store(from + n, Ordering::SeqCst);
    }

    /// Total transfer calls, including failed ones
    pub fn transfer_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successfully issued transfers, in order
    pub fn transfers(&self) -> Vec<TransferRequest> {
        self.transfers.lock().unwrap().clone()
    }
}

impl WalletApi for MockWallet {
    fn create_key(
        &self,
        name: &str,
        _passphrase: &str,
        exist_ok: bool,
    ) -> Result<String, WalletError> {
        let mut keys = self.keys.lock().unwrap();
        if let Some(address) = keys.get(name) {
            if exist_ok {
                return Ok(address.clone());
            }
            return Err(WalletError::CommandFailed {
                command: "keys add".to_string(),
                output: format!("key '{}' already exists", name),
            });
        }
        let address = format!("addr-{}", name);
        keys.insert(name.to_string(), address.clone());
        Ok(address)
    }

    fn import_key(&self, path: &Path, _passphrase: &str) -> Result<(String, String), WalletError> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| WalletError::UnexpectedOutput {
                command: "keys import-ks".to_string(),
                output: path.display().to_string(),
            })?
            .to_string();
        let address = format!("addr-{}", name);
        self.keys.lock().unwrap().insert(name.clone(), address.clone());
        Ok((name, address))
    }

    fn list_keys(&self) -> Result<Vec<(String, String)>, WalletError> {
        Ok(self
            .keys
            .lock()
            .unwrap()
            .iter()
            .map(|(n, a)| (n.clone(), a.clone()))
            .collect())
    }

    fn export_key(&self, name: &str) -> Result<String, WalletError> {
        let keys = self.keys.lock().unwrap();
        if !keys.contains_key(name) {
            return Err(WalletError::UnknownKey(name.to_string()));
        }
        Ok(format!("secret-{}", name))
    }

    fn remove_key(&self, name: &str) -> Result<(), WalletError> {
        let mut keys = self.keys.lock().unwrap();
        keys.remove(name)
            .map(|_| ())
            .ok_or_else(|| WalletError::UnknownKey(name.to_string()))
    }

    fn transfer(&self, req: &TransferRequest) -> Result<String, WalletError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let from = self.fail_from.load(Ordering::SeqCst);
        if from != 0 && attempt >= from && attempt < self.fail_until.load(Ordering::SeqCst) {
            return Err(WalletError::CommandFailed {
                command: "transfer".to_string(),
                output: "injected failure".to_string(),
            });
        }

        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .fail_next
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(WalletError::CommandFailed {
                command: "transfer".to_string(),
                output: "injected failure".to_string(),
            });
        }

        self.transfers.lock().unwrap().push(req.clone());
        let n = self.hash_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("0x{:064x}", n))
    }
}

/// Node double with settable balances/nonces and configurable confirmation.
pub struct MockRpc {
    balances: Mutex<HashMap<(u32, String), f64>>,
    nonces: Mutex<HashMap<(u32, String), u64>>,
    confirmed: Mutex<HashSet<String>>,
    shards: Mutex<Vec<ShardInfo>>,
    /// When set (the default), every queried hash reports as included
    auto_confirm: AtomicBool,
}

impl Default for MockRpc {
    fn default() -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            nonces: Mutex::new(HashMap::new()),
            confirmed: Mutex::new(HashSet::new()),
            shards: Mutex::new(Vec::new()),
            auto_confirm: AtomicBool::new(true),
        }
    }
}

impl MockRpc {
    pub fn set_balance(&self, shard: u32, address: &str, amount: f64) {
        self.balances
            .lock()
            .unwrap()
            .insert((shard, address.to_string()), amount);
    }

    pub fn set_nonce(&self, shard: u32, address: &str, nonce: u64) {
        self.nonces
            .lock()
            .unwrap()
            .insert((shard, address.to_string()), nonce);
    }

    pub fn confirm(&self, hash: &str) {
        self.confirmed.lock().unwrap().insert(hash.to_string());
    }

    pub fn disable_auto_confirm(&self) {
        self.auto_confirm.store(false, Ordering::SeqCst);
    }

    pub fn set_shards(&self, shards: Vec<ShardInfo>) {
        *self.shards.lock().unwrap() = shards;
    }
}

impl NodeApi for MockRpc {
    fn latest_header(&self, _shard: u32) -> Result<HeaderInfo, RpcError> {
        Ok(HeaderInfo {
            block_number: 1,
            epoch: 0,
            block_hash: "0xmock".to_string(),
        })
    }

    fn staking_epoch(&self, _shard: u32) -> Result<u64, RpcError> {
        Ok(0)
    }

    fn transaction_by_hash(&self, _shard: u32, hash: &str) -> Result<Option<TxStatus>, RpcError> {
        if self.auto_confirm.load(Ordering::SeqCst)
            || self.confirmed.lock().unwrap().contains(hash)
        {
            return Ok(Some(TxStatus {
                hash: hash.to_string(),
                block_number: Some(1),
            }));
        }
        Ok(None)
    }

    fn transaction_count(&self, shard: u32, address: &str) -> Result<u64, RpcError> {
        Ok(self
            .nonces
            .lock()
            .unwrap()
            .get(&(shard, address.to_string()))
            .copied()
            .unwrap_or(0))
    }

    fn balance(&self, shard: u32, address: &str) -> Result<f64, RpcError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&(shard, address.to_string()))
            .copied()
            .unwrap_or(0.0))
    }

    fn sharding_structure(&self) -> Result<Vec<ShardInfo>, RpcError> {
        Ok(self.shards.lock().unwrap().clone())
    }
}
