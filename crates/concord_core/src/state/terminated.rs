use super::ledger::Ledger;
use crate::coordinator::CoordinatorInner;
use crate::error::{CoreError, CoreResult};
use crate::types::{Decision, TerminationOutcome, TxState, Vote};

/// Nothing left to do. Repeating the decision that was carried out is a
/// no-op; anything else is refused.
#[derive(Debug, Clone)]
pub(crate) struct TerminatedHandler {
    pub ledger: Ledger,
    pub outcome: TerminationOutcome,
}

impl TerminatedHandler {
    pub fn new(ledger: Ledger, outcome: TerminationOutcome) -> Self {
        Self { ledger, outcome }
    }

    fn refuse(&self, inner: &CoordinatorInner, operation: &str) -> CoreError {
        CoreError::illegal_state(
            &inner.id,
            TxState::Terminated,
            format!("{operation} after termination ({:?})", self.outcome),
        )
    }

    pub fn prepare(self, inner: &mut CoordinatorInner) -> CoreResult<Vote> {
        match self.outcome {
            TerminationOutcome::ReadOnly => Ok(Vote::ReadOnly),
            TerminationOutcome::RolledBack => {
                Err(CoreError::rollback(&inner.id, "transaction was rolled back"))
            }
            _ => Err(self.refuse(inner, "prepare")),
        }
    }

    pub fn commit(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        match self.outcome {
            TerminationOutcome::Committed | TerminationOutcome::ReadOnly => Ok(()),
            TerminationOutcome::RolledBack => {
                Err(CoreError::rollback(&inner.id, "transaction was rolled back"))
            }
            TerminationOutcome::Forgotten => Err(self.refuse(inner, "commit")),
        }
    }

    pub fn rollback(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        match self.outcome {
            TerminationOutcome::RolledBack | TerminationOutcome::ReadOnly => Ok(()),
            _ => Err(self.refuse(inner, "rollback")),
        }
    }
}

/// The termination outcome of a ledger with no heuristic entries.
pub(super) fn outcome_of(ledger: &Ledger) -> TerminationOutcome {
    match ledger.decision {
        Some(Decision::Commit) => TerminationOutcome::Committed,
        Some(Decision::Rollback) => TerminationOutcome::RolledBack,
        None => TerminationOutcome::ReadOnly,
    }
}
