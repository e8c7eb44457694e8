//! Per-coordinator bookkeeping carried from handler to handler.

use crate::error::CoreError;
use crate::log::{LogRecord, ParticipantEntry};
use crate::participant::ParticipantError;
use crate::types::{CoordinatorId, Decision, HeuristicOutcome, ParticipantRef};
use std::collections::{BTreeMap, BTreeSet};

/// What is known about each participant's part in the protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Ledger {
    pub read_only: BTreeSet<ParticipantRef>,
    /// Voted NO; never asked to commit or roll back.
    pub refused: BTreeSet<ParticipantRef>,
    /// Acknowledged the decision.
    pub confirmed: BTreeSet<ParticipantRef>,
    /// Only `forget` removes entries.
    pub heuristics: BTreeMap<ParticipantRef, HeuristicOutcome>,
    pub decision: Option<Decision>,
    pub one_phase: bool,
}

/// How one phase-two reply affects the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    Confirmed,
    Heuristic(HeuristicOutcome),
    Unknown,
}

impl Reply {
    /// Classifies a reply to `decision`.
    pub fn classify(decision: Decision, result: &Result<(), ParticipantError>) -> Self {
        use ParticipantError as E;
        match (decision, result) {
            (_, Ok(())) => Self::Confirmed,
            (_, Err(e)) if e.is_unknown_outcome() => Self::Unknown,
            (_, Err(E::HeurMixed)) => Self::Heuristic(HeuristicOutcome::HeurMixed),
            (_, Err(E::HeurHazard)) => Self::Heuristic(HeuristicOutcome::HeurHazard),
            (Decision::Commit, Err(E::HeurCommit)) => Self::Confirmed,
            (Decision::Commit, Err(_)) => Self::Heuristic(HeuristicOutcome::HeurRollback),
            (Decision::Rollback, Err(E::HeurCommit)) => {
                Self::Heuristic(HeuristicOutcome::HeurCommit)
            }
            (Decision::Rollback, Err(_)) => Self::Confirmed,
        }
    }
}

impl Ledger {
    /// Rebuilds the ledger from a log record.
    pub fn from_record(record: &LogRecord) -> Self {
        let mut ledger = Self {
            decision: record.decision,
            one_phase: record.one_phase,
            heuristics: record.heuristics.iter().cloned().collect(),
            ..Self::default()
        };
        for entry in &record.participants {
            if entry.read_only {
                ledger.read_only.insert(entry.reference.clone());
            }
            if entry.confirmed {
                ledger.confirmed.insert(entry.reference.clone());
            }
            if entry.refused {
                ledger.refused.insert(entry.reference.clone());
            }
        }
        ledger
    }

    /// The logged image of one participant.
    pub fn entry(&self, reference: &ParticipantRef) -> ParticipantEntry {
        ParticipantEntry {
            reference: reference.clone(),
            read_only: self.read_only.contains(reference),
            confirmed: self.confirmed.contains(reference),
            refused: self.refused.contains(reference),
        }
    }

    /// Whether the participant still has to hear the decision.
    pub fn awaits_decision(&self, reference: &ParticipantRef) -> bool {
        !self.read_only.contains(reference)
            && !self.refused.contains(reference)
            && !self.confirmed.contains(reference)
            && !self.heuristics.contains_key(reference)
    }

    /// Records one phase-two reply. Returns `false` if the outcome is
    /// unknown.
    pub fn apply(&mut self, reference: ParticipantRef, reply: Reply) -> bool {
        match reply {
            Reply::Confirmed => {
                self.confirmed.insert(reference);
                true
            }
            Reply::Heuristic(outcome) => {
                self.heuristics.insert(reference, outcome);
                true
            }
            Reply::Unknown => false,
        }
    }

    /// Marks participants whose outcome is unknown as hazards.
    pub fn mark_hazard<'a>(&mut self, references: impl IntoIterator<Item = &'a ParticipantRef>) {
        for reference in references {
            self.heuristics
                .entry(reference.clone())
                .or_insert(HeuristicOutcome::HeurHazard);
        }
    }

    /// Records the coordinator's own heuristic decision against every
    /// participant that carried it out.
    pub fn mark_confirmed_heuristic(&mut self, decision: Decision) {
        let outcome = decision.as_heuristic();
        for reference in std::mem::take(&mut self.confirmed) {
            self.heuristics.entry(reference).or_insert(outcome);
        }
    }

    /// The aggregate heuristic outcome, if any participant has one.
    ///
    /// Participants that confirmed the decision count as having reached
    /// it, so one heuristic rollback among confirmed commits is mixed.
    pub fn heuristic_outcome(&self) -> Option<HeuristicOutcome> {
        if self.heuristics.is_empty() {
            return None;
        }
        let has = |o: HeuristicOutcome| self.heuristics.values().any(|v| *v == o);
        if has(HeuristicOutcome::HeurHazard) {
            return Some(HeuristicOutcome::HeurHazard);
        }
        if has(HeuristicOutcome::HeurMixed) {
            return Some(HeuristicOutcome::HeurMixed);
        }

        let confirmed = !self.confirmed.is_empty();
        let committed = has(HeuristicOutcome::HeurCommit)
            || (confirmed && self.decision == Some(Decision::Commit));
        let rolled_back = has(HeuristicOutcome::HeurRollback)
            || (confirmed && self.decision == Some(Decision::Rollback));

        Some(match (committed, rolled_back) {
            (true, true) => HeuristicOutcome::HeurMixed,
            (true, false) => HeuristicOutcome::HeurCommit,
            _ => HeuristicOutcome::HeurRollback,
        })
    }

    /// Heuristic entries in the given (enlistment) order.
    pub fn heuristics_in_order<'a>(
        &self,
        order: impl IntoIterator<Item = &'a ParticipantRef>,
    ) -> Vec<(ParticipantRef, HeuristicOutcome)> {
        order
            .into_iter()
            .filter_map(|r| self.heuristics.get(r).map(|o| (r.clone(), *o)))
            .collect()
    }

    /// The error reporting `outcome` to the caller.
    pub fn heuristic_error(&self, coordinator: &CoordinatorId, outcome: HeuristicOutcome) -> CoreError {
        let coordinator = coordinator.clone();
        match outcome {
            HeuristicOutcome::HeurCommit => CoreError::HeurCommit { coordinator },
            HeuristicOutcome::HeurRollback => CoreError::HeurRollback { coordinator },
            HeuristicOutcome::HeurMixed => CoreError::HeurMixed { coordinator },
            HeuristicOutcome::HeurHazard => CoreError::HeurHazard {
                coordinator,
                pending: self
                    .heuristics
                    .values()
                    .filter(|o| **o == HeuristicOutcome::HeurHazard)
                    .count(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(s: &str) -> ParticipantRef {
        ParticipantRef::new(s)
    }

    #[test]
    fn reply_classification() {
        use ParticipantError as E;
        let commit = Decision::Commit;
        let rollback = Decision::Rollback;

        assert_eq!(Reply::classify(commit, &Ok(())), Reply::Confirmed);
        assert_eq!(Reply::classify(commit, &Err(E::HeurCommit)), Reply::Confirmed);
        assert_eq!(
            Reply::classify(commit, &Err(E::Rollback)),
            Reply::Heuristic(HeuristicOutcome::HeurRollback)
        );
        assert_eq!(
            Reply::classify(commit, &Err(E::Unavailable("down".into()))),
            Reply::Unknown
        );
        assert_eq!(Reply::classify(rollback, &Err(E::HeurRollback)), Reply::Confirmed);
        assert_eq!(
            Reply::classify(rollback, &Err(E::HeurCommit)),
            Reply::Heuristic(HeuristicOutcome::HeurCommit)
        );
        assert_eq!(
            Reply::classify(rollback, &Err(E::HeurMixed)),
            Reply::Heuristic(HeuristicOutcome::HeurMixed)
        );
        assert_eq!(Reply::classify(rollback, &Err(E::Failed("x".into()))), Reply::Unknown);
    }

    #[test]
    fn awaits_decision_skips_read_only_refused_and_done() {
        let mut ledger = Ledger::default();
        ledger.read_only.insert(r("a"));
        ledger.refused.insert(r("b"));
        ledger.confirmed.insert(r("c"));
        ledger.heuristics.insert(r("d"), HeuristicOutcome::HeurHazard);

        for done in ["a", "b", "c", "d"] {
            assert!(!ledger.awaits_decision(&r(done)));
        }
        assert!(ledger.awaits_decision(&r("e")));
    }

    #[test]
    fn aggregate_outcome() {
        let mut ledger = Ledger {
            decision: Some(Decision::Commit),
            ..Ledger::default()
        };
        assert_eq!(ledger.heuristic_outcome(), None);

        ledger.heuristics.insert(r("a"), HeuristicOutcome::HeurRollback);
        assert_eq!(ledger.heuristic_outcome(), Some(HeuristicOutcome::HeurRollback));

        ledger.confirmed.insert(r("b"));
        assert_eq!(ledger.heuristic_outcome(), Some(HeuristicOutcome::HeurMixed));

        ledger.heuristics.insert(r("c"), HeuristicOutcome::HeurHazard);
        assert_eq!(ledger.heuristic_outcome(), Some(HeuristicOutcome::HeurHazard));
    }

    #[test]
    fn forced_decision_marks_confirmed_participants() {
        let mut ledger = Ledger {
            decision: Some(Decision::Rollback),
            ..Ledger::default()
        };
        ledger.confirmed.insert(r("a"));
        ledger.mark_hazard([&r("b")]);
        ledger.mark_confirmed_heuristic(Decision::Rollback);

        assert!(ledger.confirmed.is_empty());
        assert_eq!(ledger.heuristics[&r("a")], HeuristicOutcome::HeurRollback);
        assert_eq!(ledger.heuristics[&r("b")], HeuristicOutcome::HeurHazard);
        assert_eq!(ledger.heuristic_outcome(), Some(HeuristicOutcome::HeurHazard));

        let err = ledger.heuristic_error(&CoordinatorId::new("tm:1"), HeuristicOutcome::HeurHazard);
        assert!(matches!(err, CoreError::HeurHazard { pending: 1, .. }));
    }

    #[test]
    fn heuristics_follow_given_order() {
        let mut ledger = Ledger::default();
        ledger.heuristics.insert(r("z"), HeuristicOutcome::HeurCommit);
        ledger.heuristics.insert(r("a"), HeuristicOutcome::HeurMixed);

        let order = [r("z"), r("m"), r("a")];
        let listed = ledger.heuristics_in_order(order.iter());
        assert_eq!(
            listed,
            vec![
                (r("z"), HeuristicOutcome::HeurCommit),
                (r("a"), HeuristicOutcome::HeurMixed),
            ]
        );
    }
}
