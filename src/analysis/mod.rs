//! Transaction log replay and verification.
//!
//! Parses the generator's transaction log within a time window, deduplicates
//! by hash, re-queries each hash against the network, and produces typed
//! JSON + text reports.

pub mod log_parser;
pub mod report;
pub mod types;
pub mod verify;

pub use log_parser::parse_log;
pub use report::{generate_json_report, generate_text_report, print_summary};
pub use types::*;
pub use verify::build_report;
