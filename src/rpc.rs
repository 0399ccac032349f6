//! Blocking JSON-RPC client for node endpoints.
//!
//! One endpoint per shard, single-shot HTTP POST with a short fixed timeout
//! and no transport-level retry. Callers in polling loops map errors to
//! "no data" at the call site so one bad response never kills the loop.

use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::NetworkConfig;

/// Errors from a single RPC call
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("No endpoint configured for shard {0}")]
    UnknownShard(u32),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),
}

/// Latest-header summary for a shard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderInfo {
    pub block_number: u64,
    pub epoch: u64,
    pub block_hash: String,
}

/// Network-visible state of a submitted transaction
#[derive(Debug, Clone)]
pub struct TxStatus {
    pub hash: String,
    /// `Some` once the transaction is included in a block
    pub block_number: Option<u64>,
}

impl TxStatus {
    pub fn is_confirmed(&self) -> bool {
        self.block_number.is_some()
    }
}

/// One entry of the network's sharding structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardInfo {
    pub shard_id: u32,
    pub http: String,
}

/// Blocking node API, one method per RPC this toolkit issues.
///
/// Implementations must be callable concurrently from worker threads.
pub trait NodeApi: Send + Sync {
    fn latest_header(&self, shard: u32) -> Result<HeaderInfo, RpcError>;
    fn staking_epoch(&self, shard: u32) -> Result<u64, RpcError>;
    fn transaction_by_hash(&self, shard: u32, hash: &str) -> Result<Option<TxStatus>, RpcError>;
    /// Network-visible nonce for an address
    fn transaction_count(&self, shard: u32, address: &str) -> Result<u64, RpcError>;
    /// Balance in whole tokens
    fn balance(&self, shard: u32, address: &str) -> Result<f64, RpcError>;
    fn sharding_structure(&self) -> Result<Vec<ShardInfo>, RpcError>;
}

/// HTTP implementation of [`NodeApi`]
pub struct HttpRpc {
    client: reqwest::blocking::Client,
    endpoints: Vec<String>,
}

impl HttpRpc {
    pub fn new(endpoints: Vec<String>, timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client, endpoints })
    }

    pub fn from_config(network: &NetworkConfig) -> Result<Self, RpcError> {
        Self::new(network.endpoints.clone(), network.rpc_timeout)
    }

    fn endpoint(&self, shard: u32) -> Result<&str, RpcError> {
        self.endpoints
            .get(shard as usize)
            .map(String::as_str)
            .ok_or(RpcError::UnknownShard(shard))
    }

    /// Issue one JSON-RPC request and return the `result` value
    fn request(&self, shard: u32, method: &str, params: Value) -> Result<Value, RpcError> {
        let endpoint = self.endpoint(shard)?;
        debug!("rpc: {} -> {}", method, endpoint);

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response: Value = self
            .client
            .post(endpoint)
            .json(&body)
            .send()?
            .error_for_status()?
            .json()?;

        if let Some(err) = response.get("error") {
            return Err(RpcError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::Decode("missing result field".to_string()))
    }
}

impl NodeApi for HttpRpc {
    fn latest_header(&self, shard: u32) -> Result<HeaderInfo, RpcError> {
        let result = self.request(shard, "chain_latestHeader", json!([]))?;
        header_from_value(&result)
    }

    fn staking_epoch(&self, shard: u32) -> Result<u64, RpcError> {
        let result = self.request(shard, "chain_nodeMetadata", json!([]))?;
        result
            .get("staking-epoch")
            .and_then(Value::as_u64)
            .ok_or_else(|| RpcError::Decode("missing staking-epoch".to_string()))
    }

    fn transaction_by_hash(&self, shard: u32, hash: &str) -> Result<Option<TxStatus>, RpcError> {
        let result = self.request(shard, "chain_getTransactionByHash", json!([hash]))?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(TxStatus {
            hash: hash.to_string(),
            block_number: result.get("blockNumber").and_then(Value::as_u64),
        }))
    }

    fn transaction_count(&self, shard: u32, address: &str) -> Result<u64, RpcError> {
        let result = self.request(shard, "chain_getTransactionCount", json!([address]))?;
        result
            .as_u64()
            .ok_or_else(|| RpcError::Decode("transaction count is not an integer".to_string()))
    }

    fn balance(&self, shard: u32, address: &str) -> Result<f64, RpcError> {
        let result = self.request(shard, "chain_getBalance", json!([address]))?;
        parse_atto_amount(&result)
    }

    fn sharding_structure(&self) -> Result<Vec<ShardInfo>, RpcError> {
        let result = self.request(0, "chain_getShardingStructure", json!([]))?;
        let entries = result
            .as_array()
            .ok_or_else(|| RpcError::Decode("sharding structure is not an array".to_string()))?;

        let mut shards = Vec::with_capacity(entries.len());
        for entry in entries {
            let shard_id = entry
                .get("shardID")
                .and_then(Value::as_u64)
                .ok_or_else(|| RpcError::Decode("missing shardID".to_string()))?;
            let http = entry
                .get("http")
                .and_then(Value::as_str)
                .ok_or_else(|| RpcError::Decode("missing http endpoint".to_string()))?;
            shards.push(ShardInfo {
                shard_id: shard_id as u32,
                http: http.to_string(),
            });
        }
        Ok(shards)
    }
}

/// Cross-check the configured endpoint count against the network's own
/// sharding structure. A confirmed mismatch is logged and reported as
/// `false`; a node that fails the query or does not expose the structure
/// cannot veto the configuration.
pub fn check_sharding_structure(rpc: &dyn NodeApi, configured: usize) -> bool {
    match rpc.sharding_structure() {
        Ok(shards) if !shards.is_empty() && shards.len() != configured => {
            log::warn!(
                "network reports {} shards but {} endpoints are configured",
                shards.len(),
                configured
            );
            false
        }
        Ok(_) => true,
        Err(e) => {
            log::warn!("sharding structure query failed: {}", e);
            true
        }
    }
}

/// Decode a latest-header result object
fn header_from_value(value: &Value) -> Result<HeaderInfo, RpcError> {
    let block_number = value
        .get("blockNumber")
        .and_then(Value::as_u64)
        .ok_or_else(|| RpcError::Decode("missing blockNumber".to_string()))?;
    let epoch = value
        .get("epoch")
        .and_then(Value::as_u64)
        .ok_or_else(|| RpcError::Decode("missing epoch".to_string()))?;
    let block_hash = value
        .get("blockHash")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(HeaderInfo {
        block_number,
        epoch,
        block_hash,
    })
}

/// Parse a balance result into whole tokens.
///
/// Nodes report balances as atto-token quantities, either as a decimal
/// string or (for small values) a JSON number.
fn parse_atto_amount(value: &Value) -> Result<f64, RpcError> {
    const ATTO_PER_TOKEN: f64 = 1e18;

    if let Some(s) = value.as_str() {
        let atto: u128 = s
            .parse()
            .map_err(|_| RpcError::Decode(format!("bad balance string: {}", s)))?;
        return Ok(atto as f64 / ATTO_PER_TOKEN);
    }
    if let Some(n) = value.as_f64() {
        return Ok(n / ATTO_PER_TOKEN);
    }

    Err(RpcError::Decode("balance is neither string nor number".to_string()))
}
