//! Protocol state handlers.
//!
//! Exactly one handler is installed in a coordinator at a time. A state
//! change is made by building the next handler and installing it through
//! `CoordinatorInner::set_state_handler`, which logs it first. Handlers
//! are values: an operation clones the installed handler and runs against
//! the coordinator's inner state.
//!
//! ```text
//! ACTIVE ─> PREPARING ─┬─> IN_DOUBT ─┬─> COMMITTING ─┐
//!                      │             └─> ABORTING ───┤
//!                      └─> ABORTING ─────────────────┼─> TERMINATED
//!                                                    ├─> HEUR_COMMIT / HEUR_ROLLBACK
//!                                                    ├─> HEUR_MIXED / HEUR_HAZARD
//!                                                    └─> IN_DOUBT (decided, retrying)
//! ```

mod active;
mod heuristic;
mod indoubt;
pub(crate) mod ledger;
mod phase;
mod terminated;

pub(crate) use active::ActiveHandler;
pub(crate) use heuristic::HeuristicHandler;
pub(crate) use indoubt::{InDoubtCounters, InDoubtHandler};
pub(crate) use ledger::Ledger;
pub(crate) use phase::{Phase, PhaseHandler};
pub(crate) use terminated::TerminatedHandler;

use crate::coordinator::CoordinatorInner;
use crate::error::{CoreError, CoreResult};
use crate::log::{now_ms, HandlerPayload, LogRecord};
use crate::types::{HeuristicOutcome, TxState, Vote};

/// The installed protocol state of a coordinator.
#[derive(Debug, Clone)]
pub(crate) enum StateHandler {
    Active(ActiveHandler),
    Phase(PhaseHandler),
    InDoubt(InDoubtHandler),
    Heuristic(HeuristicHandler),
    Terminated(TerminatedHandler),
}

impl StateHandler {
    /// Handler of a new coordinator.
    pub fn active() -> Self {
        Self::Active(ActiveHandler::default())
    }

    /// Rebuilds the handler a log record describes.
    pub fn from_record(record: &LogRecord) -> Self {
        let ledger = Ledger::from_record(record);
        match record.state {
            TxState::Active => Self::Active(ActiveHandler::with_ledger(ledger)),
            TxState::Preparing => Self::Phase(PhaseHandler::new(Phase::Preparing, ledger)),
            TxState::Committing => Self::Phase(PhaseHandler::new(Phase::Committing, ledger)),
            TxState::Aborting => Self::Phase(PhaseHandler::new(Phase::Aborting, ledger)),
            TxState::InDoubt => {
                let counters = match record.payload {
                    HandlerPayload::InDoubt {
                        inquiries,
                        recovered,
                        replay_requested,
                    } => InDoubtCounters {
                        inquiries,
                        recovered,
                        replay_requested,
                    },
                    _ => InDoubtCounters::default(),
                };
                Self::InDoubt(InDoubtHandler::new(ledger, counters))
            }
            TxState::Terminated => {
                let outcome = match record.payload {
                    HandlerPayload::Terminated(outcome) => outcome,
                    _ => terminated::outcome_of(&ledger),
                };
                Self::Terminated(TerminatedHandler::new(ledger, outcome))
            }
            TxState::HeurCommit => Self::heuristic(HeuristicOutcome::HeurCommit, ledger),
            TxState::HeurRollback => Self::heuristic(HeuristicOutcome::HeurRollback, ledger),
            TxState::HeurMixed => Self::heuristic(HeuristicOutcome::HeurMixed, ledger),
            TxState::HeurHazard => Self::heuristic(HeuristicOutcome::HeurHazard, ledger),
        }
    }

    fn heuristic(kind: HeuristicOutcome, ledger: Ledger) -> Self {
        Self::Heuristic(HeuristicHandler::new(kind, ledger, false))
    }

    pub fn state(&self) -> TxState {
        match self {
            Self::Active(_) => TxState::Active,
            Self::Phase(h) => h.state(),
            Self::InDoubt(_) => TxState::InDoubt,
            Self::Heuristic(h) => h.state(),
            Self::Terminated(_) => TxState::Terminated,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        match self {
            Self::Active(h) => &h.ledger,
            Self::Phase(h) => &h.ledger,
            Self::InDoubt(h) => &h.ledger,
            Self::Heuristic(h) => &h.ledger,
            Self::Terminated(h) => &h.ledger,
        }
    }

    /// Whether the handler was rebuilt from the log.
    pub fn recovered(&self) -> bool {
        match self {
            Self::InDoubt(h) => h.counters.recovered,
            Self::Heuristic(h) => h.recovered,
            _ => false,
        }
    }

    fn payload(&self) -> HandlerPayload {
        match self {
            Self::InDoubt(h) => HandlerPayload::InDoubt {
                inquiries: h.counters.inquiries,
                recovered: h.counters.recovered,
                replay_requested: h.counters.replay_requested,
            },
            Self::Terminated(h) => HandlerPayload::Terminated(h.outcome),
            _ => HandlerPayload::Empty,
        }
    }

    /// The log record installing this handler in `inner` produces.
    pub fn log_record(&self, inner: &CoordinatorInner) -> LogRecord {
        let ledger = self.ledger();
        let order = inner.participants.iter().map(|e| &e.reference);
        LogRecord {
            coordinator_id: inner.id.clone(),
            state: self.state(),
            timestamp_ms: now_ms(),
            superior: inner.superior_uri.clone(),
            participants: inner
                .participants
                .iter()
                .map(|e| ledger.entry(&e.reference))
                .collect(),
            decision: ledger.decision,
            one_phase: ledger.one_phase,
            heuristics: ledger.heuristics_in_order(order),
            payload: self.payload(),
        }
    }

    pub fn prepare(self, inner: &mut CoordinatorInner) -> CoreResult<Vote> {
        match self {
            Self::Active(h) => h.prepare(inner),
            Self::Phase(h) => Err(h.in_progress(inner, "prepare")),
            Self::InDoubt(h) => h.prepare(inner),
            Self::Heuristic(h) => h.prepare(inner),
            Self::Terminated(h) => h.prepare(inner),
        }
    }

    pub fn commit(self, inner: &mut CoordinatorInner, one_phase: bool) -> CoreResult<()> {
        match self {
            Self::Active(h) => h.commit(inner, one_phase),
            Self::Phase(h) => Err(h.in_progress(inner, "commit")),
            Self::InDoubt(h) => h.commit(inner, one_phase),
            Self::Heuristic(h) => h.commit(inner),
            Self::Terminated(h) => h.commit(inner),
        }
    }

    pub fn rollback(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        match self {
            Self::Active(h) => h.rollback(inner),
            Self::Phase(h) => Err(h.in_progress(inner, "rollback")),
            Self::InDoubt(h) => h.rollback(inner),
            Self::Heuristic(h) => h.rollback(inner),
            Self::Terminated(h) => h.rollback(inner),
        }
    }

    pub fn forget(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        match self {
            Self::Heuristic(h) => h.forget(inner),
            Self::Terminated(_) => Ok(()),
            other => Err(CoreError::illegal_state(
                &inner.id,
                other.state(),
                "forget without a heuristic outcome",
            )),
        }
    }

    /// One tick of the timeout clock. Terminal handlers ignore it.
    pub fn on_timeout(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        match self {
            Self::Active(h) => h.on_timeout(inner),
            Self::InDoubt(h) => h.on_timeout(inner),
            Self::Phase(_) | Self::Heuristic(_) | Self::Terminated(_) => Ok(()),
        }
    }

    /// Resumes a handler rebuilt from the log.
    pub fn recover(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        match self {
            Self::Active(h) => h.recover(inner),
            Self::Phase(h) => h.recover(inner),
            Self::InDoubt(h) => h.recover(inner),
            Self::Heuristic(h) => h.recover(inner),
            Self::Terminated(_) => Ok(()),
        }
    }
}
