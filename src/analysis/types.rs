//! Core data types for transaction log analysis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::txlog::TxRecord;

/// Half-open time window `[start, end)`; `None` bounds are unbounded
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        if let Some(start) = self.start {
            if t < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if t >= end {
                return false;
            }
        }
        true
    }
}

/// Result of parsing one transaction log file
#[derive(Debug, Default)]
pub struct ParsedLog {
    /// Deduplicated records inside the window, in file order
    pub records: Vec<TxRecord>,
    pub malformed_lines: usize,
    pub outside_window: usize,
    /// Records dropped because their hash was already seen
    pub duplicates_dropped: usize,
}

/// Network-verified classification of one logged record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxClass {
    /// Hash present and included in a block
    Confirmed,
    /// Hash present but not found / not yet included
    Unconfirmed,
    /// No hash was ever returned; the send itself failed
    FailedSent,
}

/// Counts for one (source shard, destination shard) bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardPairCounts {
    pub from_shard: u32,
    pub to_shard: u32,
    pub sent: usize,
    pub confirmed: usize,
    pub unconfirmed: usize,
    pub failed_sent: usize,
}

/// A failed send carried into the report for operator inspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedSend {
    pub from: String,
    pub to: String,
    pub from_shard: u32,
    pub to_shard: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub generated_at: String,
    pub log_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_end: Option<String>,
}

/// Full verification report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub metadata: ReportMetadata,
    /// Unique transactions counted as sent (one per hash, plus failed sends)
    pub total_sent: usize,
    pub confirmed: usize,
    pub unconfirmed: usize,
    pub failed_sent: usize,
    pub duplicates_dropped: usize,
    pub malformed_lines: usize,
    pub by_shard_pair: Vec<ShardPairCounts>,
    pub failed: Vec<FailedSend>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_is_half_open() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let window = TimeWindow {
            start: Some(start),
            end: Some(end),
        };

        assert!(window.contains(start));
        assert!(!window.contains(end));
        assert!(window.contains(start + chrono::Duration::hours(12)));
        assert!(!window.contains(start - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_unbounded_window_contains_everything() {
        let window = TimeWindow::unbounded();
        assert!(window.contains(Utc::now()));
    }
}
