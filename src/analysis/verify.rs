//! Network verification of logged transactions.
//!
//! Each unique hash is re-queried once against its source shard's endpoint.
//! A query failure of any kind counts as "not found"; the report is a
//! snapshot, not a retry loop.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use rayon::prelude::*;

use super::types::{
    FailedSend, ParsedLog, ReportMetadata, ShardPairCounts, TimeWindow, TxClass,
    VerificationReport,
};
use crate::rpc::NodeApi;
use crate::txlog::TxRecord;

/// Classify one record against the network.
///
/// Records with no hash are failed sends by definition and are never
/// queried.
fn classify(record: &TxRecord, rpc: &dyn NodeApi) -> TxClass {
    let Some(hash) = &record.hash else {
        return TxClass::FailedSent;
    };

    match rpc.transaction_by_hash(record.from_shard, hash) {
        Ok(Some(status)) if status.is_confirmed() => TxClass::Confirmed,
        // Pending, unknown, or a failed query all read as unconfirmed
        _ => TxClass::Unconfirmed,
    }
}

/// Verify every parsed record and assemble the report.
pub fn build_report(
    parsed: &ParsedLog,
    rpc: &dyn NodeApi,
    log_file: &Path,
    window: &TimeWindow,
) -> VerificationReport {
    let classes: Vec<TxClass> = parsed
        .records
        .par_iter()
        .map(|record| classify(record, rpc))
        .collect();

    let mut confirmed = 0;
    let mut unconfirmed = 0;
    let mut failed_sent = 0;
    let mut failed = Vec::new();
    let mut buckets: BTreeMap<(u32, u32), ShardPairCounts> = BTreeMap::new();

    for (record, class) in parsed.records.iter().zip(&classes) {
        let bucket = buckets
            .entry((record.from_shard, record.to_shard))
            .or_insert_with(|| ShardPairCounts {
                from_shard: record.from_shard,
                to_shard: record.to_shard,
                sent: 0,
                confirmed: 0,
                unconfirmed: 0,
                failed_sent: 0,
            });
        bucket.sent += 1;

        match class {
            TxClass::Confirmed => {
                confirmed += 1;
                bucket.confirmed += 1;
            }
            TxClass::Unconfirmed => {
                unconfirmed += 1;
                bucket.unconfirmed += 1;
            }
            TxClass::FailedSent => {
                failed_sent += 1;
                bucket.failed_sent += 1;
                failed.push(FailedSend {
                    from: record.from.clone(),
                    to: record.to.clone(),
                    from_shard: record.from_shard,
                    to_shard: record.to_shard,
                    timestamp: record.timestamp,
                    error: record.error.clone(),
                });
            }
        }
    }

    VerificationReport {
        metadata: ReportMetadata {
            generated_at: Utc::now().to_rfc3339(),
            log_file: log_file.display().to_string(),
            window_start: window.start.map(|t| t.to_rfc3339()),
            window_end: window.end.map(|t| t.to_rfc3339()),
        },
        total_sent: parsed.records.len(),
        confirmed,
        unconfirmed,
        failed_sent,
        duplicates_dropped: parsed.duplicates_dropped,
        malformed_lines: parsed.malformed_lines,
        by_shard_pair: buckets.into_values().collect(),
        failed,
    }
}
