use super::ledger::Ledger;
use super::terminated::TerminatedHandler;
use super::StateHandler;
use crate::coordinator::CoordinatorInner;
use crate::error::{CoreError, CoreResult};
use crate::types::{HeuristicOutcome, TerminationOutcome, TxState, Vote};

/// HEUR_COMMIT, HEUR_ROLLBACK, HEUR_MIXED or HEUR_HAZARD.
///
/// The decision is never attempted again. The outcome is reported to
/// every caller until an operator forgets it.
#[derive(Debug, Clone)]
pub(crate) struct HeuristicHandler {
    kind: HeuristicOutcome,
    pub ledger: Ledger,
    pub recovered: bool,
}

impl HeuristicHandler {
    pub fn new(kind: HeuristicOutcome, ledger: Ledger, recovered: bool) -> Self {
        Self {
            kind,
            ledger,
            recovered,
        }
    }

    pub fn state(&self) -> TxState {
        self.kind.state()
    }

    fn error(&self, inner: &CoordinatorInner) -> CoreError {
        self.ledger.heuristic_error(&inner.id, self.kind)
    }

    pub fn prepare(self, inner: &mut CoordinatorInner) -> CoreResult<Vote> {
        Err(self.error(inner))
    }

    pub fn commit(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        match self.kind {
            HeuristicOutcome::HeurCommit => Ok(()),
            _ => Err(self.error(inner)),
        }
    }

    pub fn rollback(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        match self.kind {
            HeuristicOutcome::HeurRollback => Ok(()),
            _ => Err(self.error(inner)),
        }
    }

    /// Tells every participant with a heuristic outcome to forget it,
    /// then terminates.
    pub fn forget(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        let mut ledger = self.ledger;
        for reference in ledger.heuristics.keys() {
            if let Some(enlisted) = inner.participants.iter().find(|e| &e.reference == reference) {
                enlisted.participant.forget();
            }
        }
        tracing::info!(
            coordinator = %inner.id,
            outcome = ?self.kind,
            participants = ledger.heuristics.len(),
            "forgetting heuristic outcome"
        );
        ledger.heuristics.clear();
        inner.set_state_handler(StateHandler::Terminated(TerminatedHandler::new(
            ledger,
            TerminationOutcome::Forgotten,
        )))
    }

    pub fn recover(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        tracing::warn!(
            coordinator = %inner.id,
            outcome = ?self.kind,
            "recovered transaction with heuristic outcome"
        );
        inner.refresh_handler(StateHandler::Heuristic(Self {
            recovered: true,
            ..self
        }));
        Ok(())
    }
}
