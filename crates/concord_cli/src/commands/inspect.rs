//! Inspect command implementation.

use super::{log_path, open_log, RecordInfo};
use crate::error::CliResult;
use concord_core::TxState;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Log inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log file path.
    pub path: String,
    /// Log size in bytes.
    pub log_size: u64,
    /// Number of records.
    pub record_count: usize,
    /// Number of distinct coordinators.
    pub coordinator_count: usize,
    /// Coordinators per latest state.
    pub states: BTreeMap<String, usize>,
    /// Latest record of each coordinator a restart would recover.
    pub unfinished: Vec<RecordInfo>,
    /// Latest record of each terminated coordinator, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminated: Option<Vec<RecordInfo>>,
}

impl InspectResult {
    /// Unfinished coordinators with a heuristic outcome.
    pub fn heuristic_count(&self) -> usize {
        self.unfinished
            .iter()
            .filter(|r| r.has_heuristics() || r.state.starts_with("HEUR_"))
            .count()
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, base: &str, show_all: bool, format: &str) -> CliResult<()> {
    let result = inspect(path, base, show_all)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Reads the log and keeps the latest record of every coordinator.
///
/// Unlike recovery, this never writes to the log.
pub fn inspect(path: &Path, base: &str, show_all: bool) -> CliResult<InspectResult> {
    let log = open_log(path, base)?;

    let mut record_count = 0;
    let mut latest = BTreeMap::new();
    for result in log.iter()? {
        let (offset, record) = result?;
        record_count += 1;
        latest.insert(record.coordinator_id.clone(), (offset, record));
    }

    let mut states = BTreeMap::new();
    let mut unfinished = Vec::new();
    let mut terminated = Vec::new();
    for (offset, record) in latest.values() {
        *states.entry(record.state.to_string()).or_insert(0) += 1;
        if record.state == TxState::Terminated {
            terminated.push(RecordInfo::new(*offset, record));
        } else {
            unfinished.push(RecordInfo::new(*offset, record));
        }
    }

    Ok(InspectResult {
        path: log_path(path, base).display().to_string(),
        log_size: log.size()?,
        record_count,
        coordinator_count: latest.len(),
        states,
        unfinished,
        terminated: show_all.then_some(terminated),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Transaction Log Inspection");
    println!("==========================");
    println!();
    println!("Path:          {}", result.path);
    println!("Size:          {} bytes", result.log_size);
    println!("Records:       {}", result.record_count);
    println!("Coordinators:  {}", result.coordinator_count);
    println!();

    println!("Latest states:");
    for (state, count) in &result.states {
        println!("  {state:14} {count}");
    }
    println!();

    if result.unfinished.is_empty() {
        println!("No unfinished transactions.");
    } else {
        println!("Unfinished ({}):", result.unfinished.len());
        for record in &result.unfinished {
            print_coordinator(record);
        }
    }

    let heuristics = result.heuristic_count();
    if heuristics > 0 {
        println!();
        println!("WARNING: {heuristics} transaction(s) with heuristic outcomes need attention");
    }

    if let Some(terminated) = &result.terminated {
        println!();
        println!("Terminated ({}):", terminated.len());
        for record in terminated {
            print_coordinator(record);
        }
    }
}

fn print_coordinator(record: &RecordInfo) {
    let marker = if record.has_heuristics() { "!" } else { " " };
    print!("{marker} {:13} {}", record.state, record.coordinator);
    if let Some(decision) = &record.decision {
        print!(" decision={decision}");
    }
    if let Some(superior) = &record.superior {
        print!(" superior={superior}");
    }
    println!();
    for p in &record.participants {
        if let Some(h) = &p.heuristic {
            println!("      {} {h}", p.reference);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::write_sample_log;
    use super::*;

    #[test]
    fn latest_state_per_coordinator() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_log(dir.path());

        let result = inspect(dir.path(), "tmlog", true).unwrap();

        assert_eq!(result.record_count, 6);
        assert_eq!(result.coordinator_count, 2);
        assert_eq!(result.states.get("TERMINATED"), Some(&1));
        assert_eq!(result.states.get("IN_DOUBT"), Some(&1));
        assert_eq!(result.unfinished.len(), 1);
        assert_eq!(result.terminated.as_ref().map(Vec::len), Some(1));
        assert_eq!(result.heuristic_count(), 0);
    }

    #[test]
    fn terminated_hidden_by_default() {
        let dir = tempfile::tempdir().unwrap();
        write_sample_log(dir.path());

        let result = inspect(dir.path(), "tmlog", false).unwrap();
        assert!(result.terminated.is_none());
    }
}
