use super::indoubt::{InDoubtCounters, InDoubtHandler};
use super::ledger::{Ledger, Reply};
use super::phase::{finish, Phase, PhaseHandler, PhaseTwo};
use super::terminated::TerminatedHandler;
use super::StateHandler;
use crate::coordinator::CoordinatorInner;
use crate::dispatch::dispatch;
use crate::error::{CoreError, CoreResult};
use crate::participant::ParticipantError;
use crate::types::{Decision, TerminationOutcome, TxState, Vote};

/// ACTIVE: participants may still enlist.
#[derive(Debug, Clone, Default)]
pub(crate) struct ActiveHandler {
    pub ledger: Ledger,
    ticks: u32,
}

impl ActiveHandler {
    pub fn with_ledger(ledger: Ledger) -> Self {
        Self { ledger, ticks: 0 }
    }

    /// Phase one. Any NO vote or failed call rolls everyone back.
    pub fn prepare(self, inner: &mut CoordinatorInner) -> CoreResult<Vote> {
        let mut ledger = self.ledger;
        inner.set_state_handler(StateHandler::Phase(PhaseHandler::new(
            Phase::Preparing,
            ledger.clone(),
        )))?;

        let targets = inner.participants.clone();
        let votes = dispatch(&targets, inner.settings.concurrent_dispatch, |p| p.prepare());

        let mut failure: Option<String> = None;
        for (reference, vote) in votes {
            match vote {
                Ok(Vote::Yes) => {}
                Ok(Vote::ReadOnly) => {
                    ledger.read_only.insert(reference);
                }
                Err(ParticipantError::Rollback) => {
                    failure.get_or_insert_with(|| format!("{reference} voted no"));
                    ledger.refused.insert(reference);
                }
                Err(e) => {
                    failure.get_or_insert_with(|| format!("prepare failed on {reference}: {e}"));
                }
            }
        }

        if let Some(reason) = failure {
            tracing::info!(coordinator = %inner.id, %reason, "prepare failed, rolling back");
            match PhaseTwo::decide(Decision::Rollback).run(inner, ledger) {
                Ok(()) => {}
                // unconfirmed rollbacks are retried on later ticks
                Err(e) if e.is_heuristic() && inner.handler.state() == TxState::InDoubt => {}
                Err(e) => return Err(e),
            }
            return Err(CoreError::rollback(&inner.id, reason));
        }

        if ledger.read_only.len() == inner.participants.len() {
            finish(inner, ledger, false)?;
            return Ok(Vote::ReadOnly);
        }

        inner.set_state_handler(StateHandler::InDoubt(InDoubtHandler::new(
            ledger,
            InDoubtCounters::default(),
        )))?;
        Ok(Vote::Yes)
    }

    /// `commit(true)`: one-phase with a single participant, otherwise
    /// prepare followed by commit. `commit(false)` needs a prepare first.
    pub fn commit(self, inner: &mut CoordinatorInner, one_phase: bool) -> CoreResult<()> {
        if !one_phase {
            return Err(CoreError::illegal_state(
                &inner.id,
                TxState::Active,
                "two-phase commit before prepare",
            ));
        }
        if inner.participants.len() == 1 {
            return self.commit_one_phase(inner);
        }
        match self.prepare(inner)? {
            Vote::ReadOnly => Ok(()),
            Vote::Yes => {
                let handler = inner.handler.clone();
                handler.commit(inner, false)
            }
        }
    }

    fn commit_one_phase(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        let mut ledger = self.ledger;
        ledger.decision = Some(Decision::Commit);
        ledger.one_phase = true;
        inner.set_state_handler(StateHandler::Phase(PhaseHandler::new(
            Phase::Committing,
            ledger.clone(),
        )))?;

        let targets = inner.participants.clone();
        let Some((reference, result)) = dispatch(&targets, false, |p| p.commit(true)).pop() else {
            return finish(inner, ledger, false);
        };

        match result {
            Err(ParticipantError::Rollback | ParticipantError::HeurRollback) => {
                ledger.decision = Some(Decision::Rollback);
                ledger.one_phase = false;
                ledger.confirmed.insert(reference.clone());
                inner.set_state_handler(StateHandler::Terminated(TerminatedHandler::new(
                    ledger,
                    TerminationOutcome::RolledBack,
                )))?;
                Err(CoreError::rollback(
                    &inner.id,
                    format!("{reference} rolled back during one-phase commit"),
                ))
            }
            Err(e) if e.is_unknown_outcome() => {
                tracing::warn!(
                    coordinator = %inner.id,
                    participant = %reference,
                    error = %e,
                    "one-phase commit outcome unknown"
                );
                inner.set_state_handler(StateHandler::InDoubt(InDoubtHandler::new(
                    ledger,
                    InDoubtCounters::default(),
                )))?;
                Err(CoreError::HeurHazard {
                    coordinator: inner.id.clone(),
                    pending: 1,
                })
            }
            result => {
                ledger.apply(reference, Reply::classify(Decision::Commit, &result));
                finish(inner, ledger, false)
            }
        }
    }

    pub fn rollback(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        PhaseTwo::decide(Decision::Rollback).run(inner, self.ledger)
    }

    pub fn on_timeout(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        let ticks = self.ticks.saturating_add(1);
        if ticks < inner.settings.timeout_ticks {
            inner.refresh_handler(StateHandler::Active(Self {
                ledger: self.ledger,
                ticks,
            }));
            return Ok(());
        }

        tracing::warn!(coordinator = %inner.id, ticks, "transaction timed out, rolling back");
        match PhaseTwo::decide(Decision::Rollback).run(inner, self.ledger) {
            Err(e) if e.is_heuristic() && inner.handler.state() == TxState::InDoubt => Ok(()),
            other => other,
        }
    }

    /// A transaction that never finished phase one is presumed aborted.
    pub fn recover(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        tracing::info!(coordinator = %inner.id, "recovered active transaction, presuming abort");
        PhaseTwo::decide(Decision::Rollback)
            .counters(InDoubtCounters::recovered())
            .run(inner, self.ledger)
    }
}
