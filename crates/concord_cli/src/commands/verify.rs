//! Verify command implementation.

use super::open_log;
use crate::error::{CliError, CliResult};
use concord_core::LogManager;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of intact records.
    pub valid_records: usize,
    /// Bytes in the log.
    pub log_size: u64,
    /// Offset of a record cut short by a crash, if any.
    pub torn_tail: Option<u64>,
    /// Problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, base: &str) -> CliResult<()> {
    println!("Verifying transaction log in {}", path.display());
    println!();

    let log = open_log(path, base)?;
    let result = verify_log(&log)?;

    println!(
        "  records: {}, bytes: {}",
        result.valid_records, result.log_size
    );
    if let Some(offset) = result.torn_tail {
        println!("  torn record at offset {offset} (dropped on next startup)");
    }
    for error in &result.errors {
        println!("    ERROR: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Log verification passed");
        Ok(())
    } else {
        println!("✗ Log verification failed");
        Err(CliError::VerificationFailed(result.errors.len()))
    }
}

/// Reads every record, stopping at the first damaged one.
///
/// A torn final record is reported but is not an error: the service
/// never acknowledged it.
pub fn verify_log(log: &LogManager) -> CliResult<VerifyResult> {
    let mut result = VerifyResult {
        log_size: log.size()?,
        ..VerifyResult::default()
    };

    let mut iter = log.iter()?;
    for record in iter.by_ref() {
        match record {
            Ok(_) => result.valid_records += 1,
            Err(e) => {
                result.errors.push(e.to_string());
                break;
            }
        }
    }
    result.torn_tail = iter.torn_tail();
    Ok(result)
}
