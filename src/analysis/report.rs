//! Report generation for transaction verification.
//!
//! Generates both JSON and human-readable text reports.

use std::fs;
use std::path::Path;

use color_eyre::eyre::{Context, Result};

use super::types::VerificationReport;

/// Generate JSON report
pub fn generate_json_report(report: &VerificationReport, output_path: &Path) -> Result<()> {
    let json =
        serde_json::to_string_pretty(report).context("Failed to serialize report to JSON")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))?;

    log::info!("JSON report written to {}", output_path.display());
    Ok(())
}

/// Generate human-readable text report
pub fn generate_text_report(report: &VerificationReport, output_path: &Path) -> Result<()> {
    let text = render_text(report);

    fs::write(output_path, text)
        .with_context(|| format!("Failed to write text report to {}", output_path.display()))?;

    log::info!("Text report written to {}", output_path.display());
    Ok(())
}

fn render_text(report: &VerificationReport) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push("=".repeat(72));
    lines.push("                 TRANSACTION VERIFICATION REPORT".to_string());
    lines.push("=".repeat(72));
    lines.push(String::new());

    lines.push(format!("Generated: {}", report.metadata.generated_at));
    lines.push(format!("Log file:  {}", report.metadata.log_file));
    if let Some(start) = &report.metadata.window_start {
        lines.push(format!("Window start: {}", start));
    }
    if let Some(end) = &report.metadata.window_end {
        lines.push(format!("Window end:   {}", end));
    }
    lines.push(String::new());

    lines.push("Totals:".to_string());
    lines.push(format!("  Sent (unique):   {}", report.total_sent));
    lines.push(format!("  Confirmed:       {}", report.confirmed));
    lines.push(format!("  Unconfirmed:     {}", report.unconfirmed));
    lines.push(format!("  Failed sends:    {}", report.failed_sent));
    lines.push(format!("  Duplicates dropped: {}", report.duplicates_dropped));
    lines.push(format!("  Malformed lines:    {}", report.malformed_lines));
    lines.push(String::new());

    if !report.by_shard_pair.is_empty() {
        lines.push("Per shard pair:".to_string());
        lines.push(format!(
            "  {:>4} -> {:<4} {:>8} {:>10} {:>12} {:>8}",
            "from", "to", "sent", "confirmed", "unconfirmed", "failed"
        ));
        for bucket in &report.by_shard_pair {
            lines.push(format!(
                "  {:>4} -> {:<4} {:>8} {:>10} {:>12} {:>8}",
                bucket.from_shard,
                bucket.to_shard,
                bucket.sent,
                bucket.confirmed,
                bucket.unconfirmed,
                bucket.failed_sent
            ));
        }
        lines.push(String::new());
    }

    if !report.failed.is_empty() {
        lines.push("Failed sends:".to_string());
        for entry in report.failed.iter().take(20) {
            lines.push(format!(
                "  [{}] {} -> {} (shard {} -> {}): {}",
                entry.timestamp.to_rfc3339(),
                entry.from,
                entry.to,
                entry.from_shard,
                entry.to_shard,
                entry.error.as_deref().unwrap_or("no error captured")
            ));
        }
        if report.failed.len() > 20 {
            lines.push(format!("  ... and {} more", report.failed.len() - 20));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

/// Print a short summary to the console
pub fn print_summary(report: &VerificationReport) {
    println!();
    println!("=== TRANSACTION VERIFICATION SUMMARY ===");
    println!();
    println!("Sent (unique): {}", report.total_sent);
    println!(
        "Confirmed:     {} ({:.1}%)",
        report.confirmed,
        percentage(report.confirmed, report.total_sent)
    );
    println!("Unconfirmed:   {}", report.unconfirmed);
    println!("Failed sends:  {}", report.failed_sent);
    println!();
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
