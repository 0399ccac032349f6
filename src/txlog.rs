//! Append-only transaction log.
//!
//! Every transfer attempt the generator or funder issues lands here as one
//! timestamp-prefixed JSON line. Records are immutable once written; the
//! analysis step replays this file. A backup snapshot of the file is taken
//! every `backup_every` appends so a crash mid-run loses at most one window.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use color_eyre::eyre::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

/// One transfer attempt, as logged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRecord {
    pub from: String,
    pub to: String,
    pub from_shard: u32,
    pub to_shard: u32,
    pub amount: f64,
    pub gas_price: f64,
    pub gas_limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    pub timestamp: DateTime<Utc>,
    /// Hash returned by the wallet; `None` when the send failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TxRecord {
    /// A record with no hash was never accepted by the network
    pub fn is_failed_send(&self) -> bool {
        self.hash.is_none()
    }
}

struct LogInner {
    writer: BufWriter<File>,
    appended: u64,
}

/// Thread-safe appender for the transaction log
pub struct TxLogWriter {
    path: PathBuf,
    inner: Mutex<LogInner>,
    backup_every: u64,
}

impl TxLogWriter {
    /// Open (or create) the log at `path`, appending to existing content
    pub fn open(path: &Path, backup_every: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open transaction log {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(LogInner {
                writer: BufWriter::new(file),
                appended: 0,
            }),
            backup_every: backup_every.max(1),
        })
    }

    /// Append one record as `"<rfc3339> <json>"` and flush
    pub fn append(&self, record: &TxRecord) -> Result<()> {
        let json = serde_json::to_string(record).context("Failed to serialize tx record")?;
        let line = format!("{} {}\n", record.timestamp.to_rfc3339(), json);

        let mut inner = self.inner.lock().expect("tx log lock poisoned");
        inner
            .writer
            .write_all(line.as_bytes())
            .context("Failed to append to transaction log")?;
        inner.writer.flush()?;
        inner.appended += 1;

        if inner.appended % self.backup_every == 0 {
            let backup = self.path.with_extension("log.bak");
            if let Err(e) = std::fs::copy(&self.path, &backup) {
                log::warn!("Failed to snapshot transaction log: {}", e);
            } else {
                debug!("Transaction log snapshot written to {}", backup.display());
            }
        }

        Ok(())
    }

    /// Records appended through this writer
    pub fn appended(&self) -> u64 {
        self.inner.lock().expect("tx log lock poisoned").appended
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(hash: Option<&str>) -> TxRecord {
        TxRecord {
            from: "one1source".to_string(),
            to: "one1sink".to_string(),
            from_shard: 0,
            to_shard: 1,
            amount: 1.5,
            gas_price: 1.0,
            gas_limit: 21000,
            nonce: Some(7),
            timestamp: Utc::now(),
            hash: hash.map(String::from),
            error: hash.is_none().then(|| "connection refused".to_string()),
        }
    }

    #[test]
    fn test_append_writes_parseable_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tx.log");
        let log = TxLogWriter::open(&path, 100).unwrap();

        log.append(&record(Some("0xaaa"))).unwrap();
        log.append(&record(None)).unwrap();
        assert_eq!(log.appended(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        // Each line: rfc3339 timestamp, space, JSON payload
        let (_, json) = lines[0].split_once(' ').unwrap();
        let parsed: TxRecord = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.hash.as_deref(), Some("0xaaa"));
        assert!(!parsed.is_failed_send());

        let (_, json) = lines[1].split_once(' ').unwrap();
        let parsed: TxRecord = serde_json::from_str(json).unwrap();
        assert!(parsed.is_failed_send());
    }

    #[test]
    fn test_backup_snapshot_taken() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tx.log");
        let log = TxLogWriter::open(&path, 2).unwrap();

        log.append(&record(Some("0x1"))).unwrap();
        assert!(!path.with_extension("log.bak").exists());

        log.append(&record(Some("0x2"))).unwrap();
        let backup = path.with_extension("log.bak");
        assert!(backup.exists());
        assert_eq!(
            std::fs::read_to_string(&backup).unwrap().lines().count(),
            2
        );
    }
}
