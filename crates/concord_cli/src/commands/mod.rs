//! CLI command implementations.

pub mod dump_log;
pub mod inspect;
pub mod lock_status;
pub mod verify;

use crate::error::{CliError, CliResult};
use concord_core::{
    Decision, HandlerPayload, HeuristicOutcome, LogManager, LogRecord, TerminationOutcome,
};
use concord_storage::FileBackend;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Path of the log file `<dir>/<base>.log`.
pub fn log_path(dir: &Path, base: &str) -> PathBuf {
    dir.join(format!("{base}.log"))
}

/// Opens an existing log for reading.
///
/// Never creates a file and never truncates a torn tail; only a running
/// service repairs its log.
pub fn open_log(dir: &Path, base: &str) -> CliResult<LogManager> {
    let path = log_path(dir, base);
    if !path.exists() {
        return Err(CliError::LogNotFound(path));
    }
    let backend = FileBackend::open_existing(&path)?;
    Ok(LogManager::new(Box::new(backend), false))
}

/// A participant as logged.
#[derive(Debug, Serialize)]
pub struct ParticipantInfo {
    /// Logged reference.
    pub reference: String,
    /// Voted read-only.
    pub read_only: bool,
    /// Confirmed the decision.
    pub confirmed: bool,
    /// Voted NO.
    pub refused: bool,
    /// Heuristic outcome, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heuristic: Option<String>,
}

/// A log record in printable form.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Byte offset of the record.
    pub offset: u64,
    /// Coordinator id.
    pub coordinator: String,
    /// State entered.
    pub state: String,
    /// Write time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Superior URI for subordinates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superior: Option<String>,
    /// Decision, once taken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    /// Participants in enlistment order.
    pub participants: Vec<ParticipantInfo>,
    /// In-doubt timeout ticks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inquiries: Option<u32>,
    /// Whether the state was reached through recovery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovered: Option<bool>,
    /// How the coordinator terminated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

impl RecordInfo {
    /// Builds the printable form of `record` found at `offset`.
    pub fn new(offset: u64, record: &LogRecord) -> Self {
        let participants = record
            .participants
            .iter()
            .map(|p| ParticipantInfo {
                reference: p.reference.to_string(),
                read_only: p.read_only,
                confirmed: p.confirmed,
                refused: p.refused,
                heuristic: record
                    .heuristics
                    .iter()
                    .find(|(r, _)| *r == p.reference)
                    .map(|(_, o)| heuristic_name(*o).to_string()),
            })
            .collect();

        let (inquiries, recovered, outcome) = match record.payload {
            HandlerPayload::Empty => (None, None, None),
            HandlerPayload::InDoubt {
                inquiries,
                recovered,
                ..
            } => (Some(inquiries), Some(recovered), None),
            HandlerPayload::Terminated(outcome) => {
                (None, None, Some(outcome_name(outcome).to_string()))
            }
        };

        Self {
            offset,
            coordinator: record.coordinator_id.to_string(),
            state: record.state.to_string(),
            timestamp_ms: record.timestamp_ms,
            superior: record.superior.clone(),
            decision: record
                .decision
                .map(|d| decision_name(d, record.one_phase).to_string()),
            participants,
            inquiries,
            recovered,
            outcome,
        }
    }

    /// Whether any participant has a heuristic outcome.
    pub fn has_heuristics(&self) -> bool {
        self.participants.iter().any(|p| p.heuristic.is_some())
    }
}

fn decision_name(decision: Decision, one_phase: bool) -> &'static str {
    match (decision, one_phase) {
        (Decision::Commit, true) => "COMMIT_ONE_PHASE",
        (Decision::Commit, false) => "COMMIT",
        (Decision::Rollback, _) => "ROLLBACK",
    }
}

fn heuristic_name(outcome: HeuristicOutcome) -> &'static str {
    match outcome {
        HeuristicOutcome::HeurCommit => "HEUR_COMMIT",
        HeuristicOutcome::HeurRollback => "HEUR_ROLLBACK",
        HeuristicOutcome::HeurMixed => "HEUR_MIXED",
        HeuristicOutcome::HeurHazard => "HEUR_HAZARD",
    }
}

fn outcome_name(outcome: TerminationOutcome) -> &'static str {
    match outcome {
        TerminationOutcome::Committed => "committed",
        TerminationOutcome::RolledBack => "rolled back",
        TerminationOutcome::ReadOnly => "read-only",
        TerminationOutcome::Forgotten => "forgotten",
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use concord_core::{
        Config, NoopResolver, Participant, ParticipantResult, TransactionService, Vote,
    };
    use std::path::Path;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Yes;

    impl Participant for Yes {
        fn prepare(&self) -> ParticipantResult<Vote> {
            Ok(Vote::Yes)
        }

        fn commit(&self, _one_phase: bool) -> ParticipantResult<()> {
            Ok(())
        }

        fn rollback(&self) -> ParticipantResult<()> {
            Ok(())
        }

        fn forget(&self) {}

        fn recover(&self) -> bool {
            true
        }
    }

    /// Writes a log with one committed and one in-doubt transaction.
    pub fn write_sample_log(dir: &Path) {
        let config = Config::new()
            .log_dir(dir)
            .tm_unique_name("cli")
            .force_writes(false);
        let service = TransactionService::open(config, &NoopResolver).unwrap();

        let done = service.begin().unwrap();
        done.enlist(Arc::new(Yes)).unwrap();
        done.enlist(Arc::new(Yes)).unwrap();
        done.commit(true).unwrap();

        let pending = service.begin().unwrap();
        pending.enlist(Arc::new(Yes)).unwrap();
        pending.enlist(Arc::new(Yes)).unwrap();
        pending.prepare().unwrap();
        service.shutdown();
    }
}
