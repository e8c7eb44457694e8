//! Dump log command implementation.

use super::{open_log, RecordInfo};
use crate::error::CliResult;
use std::path::Path;

/// Runs the dump-log command.
pub fn run(
    path: &Path,
    base: &str,
    limit: Option<usize>,
    coordinator: Option<&str>,
    format: &str,
) -> CliResult<()> {
    let log = open_log(path, base)?;
    let records = collect_records(&log, limit, coordinator)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        _ => print_text_output(&records),
    }
    Ok(())
}

fn collect_records(
    log: &concord_core::LogManager,
    limit: Option<usize>,
    coordinator: Option<&str>,
) -> CliResult<Vec<RecordInfo>> {
    let mut records = Vec::new();
    let max_records = limit.unwrap_or(usize::MAX);

    for result in log.iter()? {
        if records.len() >= max_records {
            break;
        }
        let (offset, record) = result?;
        if coordinator.is_some_and(|id| record.coordinator_id.as_str() != id) {
            continue;
        }
        records.push(RecordInfo::new(offset, &record));
    }
    Ok(records)
}

fn print_text_output(records: &[RecordInfo]) {
    println!("Log records ({} total)", records.len());
    println!("================");
    println!();

    for record in records {
        print!("[{:08}] {:13} {}", record.offset, record.state, record.coordinator);
        if let Some(decision) = &record.decision {
            print!(" decision={decision}");
        }
        if let Some(inquiries) = record.inquiries {
            print!(" inquiries={inquiries}");
        }
        if record.recovered == Some(true) {
            print!(" recovered");
        }
        if let Some(outcome) = &record.outcome {
            print!(" outcome={outcome}");
        }
        if let Some(superior) = &record.superior {
            print!(" superior={superior}");
        }
        println!();

        for p in &record.participants {
            let mut flags = Vec::new();
            if p.read_only {
                flags.push("read-only");
            }
            if p.refused {
                flags.push("refused");
            }
            if p.confirmed {
                flags.push("confirmed");
            }
            if let Some(h) = &p.heuristic {
                flags.push(h.as_str());
            }
            println!("           - {} {}", p.reference, flags.join(","));
        }
    }
}
