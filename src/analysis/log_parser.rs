//! Transaction log parsing.
//!
//! Log lines are framed as `"<rfc3339 timestamp> <json payload>"`. Lines are
//! parsed in parallel; malformed lines are counted, never fatal. Records are
//! deduplicated by hash so a hash replayed into the log is counted once.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use color_eyre::eyre::{Context, Result};
use rayon::prelude::*;
use regex::Regex;

use super::types::{ParsedLog, TimeWindow};
use crate::txlog::TxRecord;

/// Match: "2026-08-30T12:00:00.123+00:00 {...}"
static LINE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+)\s+(\{.*\})\s*$").expect("Invalid line regex"));

/// Parse one framed line into a record; `None` for anything malformed
fn parse_line(line: &str) -> Option<TxRecord> {
    let caps = LINE_PATTERN.captures(line)?;

    // The prefix timestamp must parse, and must agree with the payload's
    // framing; the payload timestamp is the one carried forward.
    chrono::DateTime::parse_from_rfc3339(caps.get(1)?.as_str()).ok()?;
    serde_json::from_str(caps.get(2)?.as_str()).ok()
}

/// Parse a transaction log file, keeping records inside `window` and
/// deduplicating by hash.
pub fn parse_log(path: &Path, window: &TimeWindow) -> Result<ParsedLog> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open transaction log {}", path.display()))?;

    let lines: Vec<String> = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("Failed to read transaction log {}", path.display()))?;

    let parsed: Vec<Option<TxRecord>> = lines
        .par_iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| parse_line(line))
        .collect();

    let mut result = ParsedLog::default();
    let mut seen_hashes: HashSet<String> = HashSet::new();

    for record in parsed {
        let Some(record) = record else {
            result.malformed_lines += 1;
            continue;
        };

        if !window.contains(record.timestamp) {
            result.outside_window += 1;
            continue;
        }

        if let Some(hash) = &record.hash {
            if !seen_hashes.insert(hash.clone()) {
                result.duplicates_dropped += 1;
                continue;
            }
        }
        result.records.push(record);
    }

    log::info!(
        "Parsed {}: {} records, {} duplicates dropped, {} malformed, {} outside window",
        path.display(),
        result.records.len(),
        result.duplicates_dropped,
        result.malformed_lines,
        result.outside_window
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Write;

    fn record(hash: Option<&str>, timestamp: chrono::DateTime<Utc>) -> TxRecord {
        TxRecord {
            from: "addr-a".to_string(),
            to: "addr-b".to_string(),
            from_shard: 0,
            to_shard: 1,
            amount: 1.0,
            gas_price: 1.0,
            gas_limit: 21000,
            nonce: None,
            timestamp,
            hash: hash.map(String::from),
            error: None,
        }
    }

    fn write_log(entries: &[TxRecord], extra_lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for entry in entries {
            writeln!(
                file,
                "{} {}",
                entry.timestamp.to_rfc3339(),
                serde_json::to_string(entry).unwrap()
            )
            .unwrap();
        }
        for line in extra_lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn test_duplicate_hash_counted_once() {
        let now = Utc::now();
        let file = write_log(
            &[
                record(Some("0xaaa"), now),
                record(Some("0xaaa"), now),
                record(Some("0xbbb"), now),
            ],
            &[],
        );

        let parsed = parse_log(file.path(), &TimeWindow::unbounded()).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.duplicates_dropped, 1);
    }

    #[test]
    fn test_failed_sends_are_not_deduplicated() {
        // Hashless records have nothing to dedupe on; all are kept
        let now = Utc::now();
        let file = write_log(&[record(None, now), record(None, now)], &[]);

        let parsed = parse_log(file.path(), &TimeWindow::unbounded()).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.duplicates_dropped, 0);
    }

    #[test]
    fn test_malformed_lines_counted_not_fatal() {
        let now = Utc::now();
        let file = write_log(
            &[record(Some("0xaaa"), now)],
            &[
                "not a log line",
                "2026-08-30T00:00:00Z not-json",
                "2026-08-30T00:00:00Z {\"broken\": true}",
            ],
        );

        let parsed = parse_log(file.path(), &TimeWindow::unbounded()).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.malformed_lines, 3);
    }

    #[test]
    fn test_window_filtering() {
        let inside = Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2026, 6, 20, 12, 0, 0).unwrap();
        let file = write_log(
            &[record(Some("0xaaa"), inside), record(Some("0xbbb"), outside)],
            &[],
        );

        let window = TimeWindow {
            start: Some(Utc.with_ymd_and_hms(2026, 6, 15, 0, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2026, 6, 16, 0, 0, 0).unwrap()),
        };
        let parsed = parse_log(file.path(), &window).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].hash.as_deref(), Some("0xaaa"));
        assert_eq!(parsed.outside_window, 1);
    }
}
