//! The in-doubt state.
//!
//! Undecided: every participant voted and the coordinator waits for
//! commit or rollback from its caller or superior. Timeout ticks first
//! ask a subordinate's superior to replay the decision, then force one.
//!
//! Decided: phase two left some participants unconfirmed. Every tick
//! resends the decision until they confirm or the in-doubt window runs
//! out and they are marked as hazards.

use super::ledger::Ledger;
use super::phase::{recover_commit, Escalation, PhaseTwo};
use super::StateHandler;
use crate::coordinator::CoordinatorInner;
use crate::error::{CoreError, CoreResult};
use crate::types::{Decision, TxState, Vote};

/// In-doubt bookkeeping, persisted with every IN_DOUBT record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct InDoubtCounters {
    pub inquiries: u32,
    pub recovered: bool,
    pub replay_requested: bool,
}

impl InDoubtCounters {
    pub fn recovered() -> Self {
        Self {
            recovered: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct InDoubtHandler {
    pub ledger: Ledger,
    pub counters: InDoubtCounters,
}

impl InDoubtHandler {
    pub fn new(ledger: Ledger, counters: InDoubtCounters) -> Self {
        Self { ledger, counters }
    }

    /// Repeats the vote already given; participants are not asked again.
    pub fn prepare(self, inner: &mut CoordinatorInner) -> CoreResult<Vote> {
        match self.ledger.decision {
            Some(Decision::Rollback) => Err(CoreError::rollback(
                &inner.id,
                "transaction is being rolled back",
            )),
            _ => Ok(Vote::Yes),
        }
    }

    pub fn commit(self, inner: &mut CoordinatorInner, one_phase: bool) -> CoreResult<()> {
        if one_phase {
            return Err(CoreError::illegal_state(
                &inner.id,
                TxState::InDoubt,
                "one-phase commit after prepare",
            ));
        }
        match self.ledger.decision {
            None => PhaseTwo::decide(Decision::Commit)
                .counters(self.counters)
                .run(inner, self.ledger),
            Some(Decision::Commit) => PhaseTwo::retry(Decision::Commit)
                .counters(self.counters)
                .run(inner, self.ledger),
            Some(Decision::Rollback) => Err(CoreError::rollback(
                &inner.id,
                "commit requested after rollback decision",
            )),
        }
    }

    pub fn rollback(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        match self.ledger.decision {
            None => PhaseTwo::decide(Decision::Rollback)
                .counters(self.counters)
                .run(inner, self.ledger),
            Some(Decision::Rollback) => PhaseTwo::retry(Decision::Rollback)
                .counters(self.counters)
                .run(inner, self.ledger),
            Some(Decision::Commit) => Err(CoreError::illegal_state(
                &inner.id,
                TxState::InDoubt,
                "rollback requested after commit decision",
            )),
        }
    }

    pub fn on_timeout(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        let mut counters = self.counters;
        counters.inquiries = counters.inquiries.saturating_add(1);
        let max = inner.settings.max_indoubt_ticks;

        if let Some(decision) = self.ledger.decision {
            let escalation = if counters.inquiries >= max {
                Escalation::GiveUp
            } else {
                Escalation::Wait
            };
            let result = PhaseTwo::retry(decision)
                .counters(counters)
                .escalation(escalation)
                .run(inner, self.ledger);
            return match result {
                Err(e) if e.is_heuristic() && inner.handler.state() == TxState::InDoubt => Ok(()),
                other => other,
            };
        }

        if counters.inquiries >= max {
            let (decision, escalation) = if inner.is_root() {
                let escalation = if counters.recovered {
                    Escalation::Wait
                } else {
                    Escalation::Heuristic
                };
                (Decision::Rollback, escalation)
            } else if inner.settings.prefer_heuristic_commit {
                (Decision::Commit, Escalation::Heuristic)
            } else {
                (Decision::Rollback, Escalation::Heuristic)
            };
            tracing::warn!(
                coordinator = %inner.id,
                inquiries = counters.inquiries,
                root = inner.is_root(),
                ?decision,
                heuristic = escalation == Escalation::Heuristic,
                "in-doubt window expired, forcing a decision"
            );
            return PhaseTwo::decide(decision)
                .counters(counters)
                .escalation(escalation)
                .run(inner, self.ledger);
        }

        let halfway = (max / 2).max(1);
        if !inner.is_root() && !counters.replay_requested && counters.inquiries >= halfway {
            counters.replay_requested = true;
            inner.replay_due = true;
            tracing::info!(
                coordinator = %inner.id,
                inquiries = counters.inquiries,
                "requesting replay of completion from superior"
            );
            return inner.set_state_handler(StateHandler::InDoubt(Self::new(self.ledger, counters)));
        }

        inner.refresh_handler(StateHandler::InDoubt(Self::new(self.ledger, counters)));
        Ok(())
    }

    /// The in-doubt window starts over, so a recovered subordinate asks
    /// its superior for the decision again.
    pub fn recover(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        let counters = InDoubtCounters::recovered();
        match self.ledger.decision {
            Some(Decision::Commit) => recover_commit(inner, self.ledger),
            Some(Decision::Rollback) => PhaseTwo::retry(Decision::Rollback)
                .counters(counters)
                .run(inner, self.ledger),
            None => inner.set_state_handler(StateHandler::InDoubt(Self::new(self.ledger, counters))),
        }
    }
}
