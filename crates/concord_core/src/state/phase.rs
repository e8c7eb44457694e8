//! Preparing, committing and aborting, and the phase-two driver shared
//! by every handler that sends a decision.

use super::heuristic::HeuristicHandler;
use super::indoubt::{InDoubtCounters, InDoubtHandler};
use super::ledger::{Ledger, Reply};
use super::terminated::{self, TerminatedHandler};
use super::StateHandler;
use crate::coordinator::CoordinatorInner;
use crate::dispatch::dispatch;
use crate::error::{CoreError, CoreResult};
use crate::types::{Decision, ParticipantRef, TxState};

/// The transient states a coordinator only rests in if it crashed there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Preparing,
    Committing,
    Aborting,
}

#[derive(Debug, Clone)]
pub(crate) struct PhaseHandler {
    phase: Phase,
    pub ledger: Ledger,
}

impl PhaseHandler {
    pub fn new(phase: Phase, ledger: Ledger) -> Self {
        Self { phase, ledger }
    }

    pub fn state(&self) -> TxState {
        match self.phase {
            Phase::Preparing => TxState::Preparing,
            Phase::Committing => TxState::Committing,
            Phase::Aborting => TxState::Aborting,
        }
    }

    pub fn in_progress(&self, inner: &CoordinatorInner, operation: &str) -> CoreError {
        CoreError::illegal_state(
            &inner.id,
            self.state(),
            format!("{operation} while a transition is in progress"),
        )
    }

    pub fn recover(self, inner: &mut CoordinatorInner) -> CoreResult<()> {
        let counters = InDoubtCounters::recovered();
        match self.phase {
            Phase::Preparing => {
                tracing::info!(coordinator = %inner.id, "crashed while preparing, presuming abort");
                PhaseTwo::decide(Decision::Rollback)
                    .counters(counters)
                    .run(inner, self.ledger)
            }
            Phase::Aborting => PhaseTwo::retry(Decision::Rollback)
                .counters(counters)
                .run(inner, self.ledger),
            Phase::Committing => recover_commit(inner, self.ledger),
        }
    }
}

/// What to do about participants whose phase-two outcome is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Escalation {
    /// Stay in doubt and retry on later ticks.
    Wait,
    /// Mark them as hazards and stop retrying.
    GiveUp,
    /// The decision itself is heuristic: mark them as hazards and record
    /// the decision as a heuristic outcome for everyone who carried it out.
    Heuristic,
}

/// One round of sending a decision to the participants still awaiting it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PhaseTwo {
    decision: Decision,
    announce: bool,
    escalation: Escalation,
    counters: InDoubtCounters,
}

impl PhaseTwo {
    /// A new decision: COMMITTING or ABORTING is logged before any
    /// participant hears it.
    pub fn decide(decision: Decision) -> Self {
        Self {
            decision,
            announce: true,
            escalation: Escalation::Wait,
            counters: InDoubtCounters::default(),
        }
    }

    /// Resend a decision that is already logged.
    pub fn retry(decision: Decision) -> Self {
        Self {
            announce: false,
            ..Self::decide(decision)
        }
    }

    pub fn escalation(mut self, escalation: Escalation) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn counters(mut self, counters: InDoubtCounters) -> Self {
        self.counters = counters;
        self
    }

    pub fn run(self, inner: &mut CoordinatorInner, mut ledger: Ledger) -> CoreResult<()> {
        let decision = self.decision;
        ledger.decision = Some(decision);
        // only a commit can be one-phase
        ledger.one_phase &= decision == Decision::Commit;

        let mut counters = self.counters;
        if self.announce {
            let phase = match decision {
                Decision::Commit => Phase::Committing,
                Decision::Rollback => Phase::Aborting,
            };
            inner.set_state_handler(StateHandler::Phase(PhaseHandler::new(phase, ledger.clone())))?;
            counters.inquiries = 0;
        }

        let before = ledger.clone();
        let targets = inner.awaiting(&ledger);
        let one_phase = ledger.one_phase;
        let results = dispatch(&targets, inner.settings.concurrent_dispatch, |p| match decision {
            Decision::Commit => p.commit(one_phase),
            Decision::Rollback => p.rollback(),
        });

        let mut pending: Vec<ParticipantRef> = Vec::new();
        for (reference, result) in results {
            let reply = Reply::classify(decision, &result);
            if let Reply::Heuristic(outcome) = reply {
                tracing::warn!(
                    coordinator = %inner.id,
                    participant = %reference,
                    outcome = ?outcome,
                    ?decision,
                    "participant reported a heuristic outcome"
                );
            }
            if !ledger.apply(reference.clone(), reply) {
                pending.push(reference);
            }
        }

        match self.escalation {
            Escalation::Wait => {}
            Escalation::GiveUp => {
                if !pending.is_empty() {
                    tracing::warn!(
                        coordinator = %inner.id,
                        pending = pending.len(),
                        "giving up on unconfirmed participants"
                    );
                }
                ledger.mark_hazard(&pending);
                pending.clear();
            }
            Escalation::Heuristic => {
                tracing::warn!(
                    coordinator = %inner.id,
                    ?decision,
                    unknown = pending.len(),
                    "heuristic decision"
                );
                ledger.mark_hazard(&pending);
                ledger.mark_confirmed_heuristic(decision);
                pending.clear();
            }
        }

        if !pending.is_empty() {
            tracing::warn!(
                coordinator = %inner.id,
                ?decision,
                pending = pending.len(),
                "phase two incomplete, staying in doubt"
            );
            let unchanged = !self.announce
                && ledger == before
                && inner.handler.state() == TxState::InDoubt;
            let next = StateHandler::InDoubt(InDoubtHandler::new(ledger, counters));
            if unchanged {
                inner.refresh_handler(next);
            } else {
                inner.set_state_handler(next)?;
            }
            return Err(CoreError::HeurHazard {
                coordinator: inner.id.clone(),
                pending: pending.len(),
            });
        }

        finish(inner, ledger, counters.recovered)
    }
}

/// Installs the handler a completed phase two ends in.
///
/// Any heuristic outcome leads to the matching heuristic state and is
/// returned as an error; otherwise the coordinator terminates.
pub(super) fn finish(inner: &mut CoordinatorInner, ledger: Ledger, recovered: bool) -> CoreResult<()> {
    if let Some(kind) = ledger.heuristic_outcome() {
        let error = ledger.heuristic_error(&inner.id, kind);
        tracing::warn!(coordinator = %inner.id, outcome = ?kind, "transaction ended heuristically");
        inner.set_state_handler(StateHandler::Heuristic(HeuristicHandler::new(
            kind, ledger, recovered,
        )))?;
        return Err(error);
    }

    let outcome = terminated::outcome_of(&ledger);
    tracing::debug!(coordinator = %inner.id, ?outcome, "transaction terminated");
    inner.set_state_handler(StateHandler::Terminated(TerminatedHandler::new(ledger, outcome)))
}

/// Recovery of a commit decision that may not have reached everyone.
///
/// Whoever did not confirm may or may not have committed before the
/// crash, so each is marked as a hazard.
pub(super) fn recover_commit(inner: &mut CoordinatorInner, mut ledger: Ledger) -> CoreResult<()> {
    let unconfirmed: Vec<ParticipantRef> = inner
        .awaiting(&ledger)
        .into_iter()
        .map(|e| e.reference)
        .collect();
    if !unconfirmed.is_empty() {
        tracing::warn!(
            coordinator = %inner.id,
            unconfirmed = unconfirmed.len(),
            "crashed during commit phase, marking unconfirmed participants as hazard"
        );
        ledger.mark_hazard(&unconfirmed);
    }
    finish(inner, ledger, true)
}
