//! Network status monitor.
//!
//! Polls each shard's endpoint on an interval and writes a JSON status file
//! for sibling processes and dashboards. Every iteration is wrapped in
//! catch-log-continue: one bad response or write failure never terminates
//! the loop.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use color_eyre::eyre::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::rpc::NodeApi;

/// Point-in-time view of one shard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardStatus {
    pub shard: u32,
    pub endpoint: String,
    /// `None` when the header query failed this round
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staking_epoch: Option<u64>,
}

/// Full status snapshot written each round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Utc>,
    pub shards: Vec<ShardStatus>,
}

/// Status polling loop
pub struct Monitor {
    rpc: std::sync::Arc<dyn NodeApi>,
    endpoints: Vec<String>,
    status_path: PathBuf,
    interval: Duration,
}

impl Monitor {
    pub fn new(
        rpc: std::sync::Arc<dyn NodeApi>,
        endpoints: Vec<String>,
        status_path: &Path,
        interval: Duration,
    ) -> Self {
        Self {
            rpc,
            endpoints,
            status_path: status_path.to_path_buf(),
            interval,
        }
    }

    /// Build one snapshot. Per-field failures degrade to `None` so a flaky
    /// shard still yields a partial row.
    pub fn snapshot(&self) -> StatusSnapshot {
        let shards = self
            .endpoints
            .iter()
            .enumerate()
            .map(|(i, endpoint)| {
                let shard = i as u32;
                let header = self.rpc.latest_header(shard).ok();
                ShardStatus {
                    shard,
                    endpoint: endpoint.clone(),
                    block_number: header.as_ref().map(|h| h.block_number),
                    epoch: header.as_ref().map(|h| h.epoch),
                    staking_epoch: self.rpc.staking_epoch(shard).ok(),
                }
            })
            .collect();

        StatusSnapshot {
            timestamp: Utc::now(),
            shards,
        }
    }

    /// Write the status file atomically (temp file + rename)
    pub fn write_snapshot(&self, snapshot: &StatusSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)
            .context("Failed to serialize status snapshot")?;

        let tmp = self.status_path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.status_path)
            .context("Failed to move status file into place")?;
        Ok(())
    }

    /// Run until `running` is cleared. Iterations that fail are logged and
    /// the loop continues on the next interval.
    pub fn run(&self, running: &AtomicBool) {
        info!(
            "Monitoring {} shards every {:?}, status at {}",
            self.endpoints.len(),
            self.interval,
            self.status_path.display()
        );

        while running.load(Ordering::Acquire) {
            let started = Instant::now();

            let snapshot = self.snapshot();
            if let Err(e) = self.write_snapshot(&snapshot) {
                warn!("status write failed: {}", e);
            }

            // Sleep in short slices so a stop request is picked up promptly
            while started.elapsed() < self.interval {
                if !running.load(Ordering::Acquire) {
                    return;
                }
                std::thread::sleep(Duration::from_millis(100).min(self.interval));
            }
        }
    }
}
