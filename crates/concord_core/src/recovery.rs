//! Startup recovery.
//!
//! Rebuilds every unfinished coordinator from its latest log record and
//! lets its handler resume:
//!
//! | Logged state          | After recovery                                   |
//! |-----------------------|--------------------------------------------------|
//! | ACTIVE, PREPARING     | presumed abort: rollback sent to participants    |
//! | ABORTING              | rollback resent                                  |
//! | COMMITTING            | unconfirmed participants marked HEUR_HAZARD      |
//! | IN_DOUBT, decided     | as COMMITTING or ABORTING                        |
//! | IN_DOUBT, undecided   | waits for a decision, marked recovered           |
//! | HEUR_*                | kept, marked recovered                           |
//! | TERMINATED            | skipped                                          |
//!
//! Running recovery twice over the same log rebuilds the same
//! coordinators in the same states.

use crate::coordinator::{Coordinator, CoordinatorSettings};
use crate::error::CoreResult;
use crate::log::LogManager;
use crate::participant::ParticipantResolver;
use crate::types::TxState;
use std::sync::Arc;

/// Outcome of a recovery run.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Coordinators found in the log.
    pub replayed: usize,
    /// Coordinators whose latest record was TERMINATED.
    pub skipped: usize,
    /// Coordinators that finished during recovery.
    pub resolved: usize,
    /// Coordinators still unfinished, ordered by id.
    pub coordinators: Vec<Arc<Coordinator>>,
}

/// Replays the log and resumes unfinished coordinators.
pub struct RecoveryOrchestrator<'a> {
    log: &'a Arc<LogManager>,
    settings: CoordinatorSettings,
    resolver: &'a dyn ParticipantResolver,
}

impl<'a> RecoveryOrchestrator<'a> {
    /// Creates an orchestrator over `log`.
    pub fn new(
        log: &'a Arc<LogManager>,
        settings: CoordinatorSettings,
        resolver: &'a dyn ParticipantResolver,
    ) -> Self {
        Self {
            log,
            settings,
            resolver,
        }
    }

    /// Runs recovery.
    ///
    /// # Errors
    ///
    /// Fails on log corruption or if a recovered transition cannot be
    /// logged. Heuristic outcomes are not errors here.
    pub fn run(&self) -> CoreResult<RecoveryReport> {
        let latest = self.log.replay()?;
        let mut report = RecoveryReport {
            replayed: latest.len(),
            ..RecoveryReport::default()
        };

        for record in latest.values() {
            if record.state == TxState::Terminated {
                report.skipped += 1;
                continue;
            }

            let coordinator = Arc::new(Coordinator::from_record(
                record,
                self.settings,
                Arc::clone(self.log),
                self.resolver,
            ));
            coordinator.recover()?;

            let state = coordinator.state();
            tracing::debug!(
                coordinator = %record.coordinator_id,
                logged = %record.state,
                %state,
                "recovered coordinator"
            );
            if state == TxState::Terminated {
                report.resolved += 1;
            } else {
                report.coordinators.push(coordinator);
            }
        }

        tracing::info!(
            replayed = report.replayed,
            skipped = report.skipped,
            resolved = report.resolved,
            pending = report.coordinators.len(),
            "recovery complete"
        );
        Ok(report)
    }
}
