//! End-to-end protocol scenarios.
//!
//! Drives a real [`TransactionService`] through complete transactions
//! with scripted participants and checks both the outcome reported to
//! the caller and the calls each participant received.

use crate::generators::{participant_name, ScriptedVote};
use crate::participants::CallJournal;
use concord_core::{Coordinator, CoordinatorId, CoreResult, StateListener, TxState};
use parking_lot::Mutex;
use std::sync::Arc;

/// Enlists one scripted participant per vote, named `p1`, `p2`, ...
pub fn enlist_votes(
    coordinator: &Coordinator,
    votes: &[ScriptedVote],
    journal: &Arc<CallJournal>,
) -> CoreResult<Vec<String>> {
    votes
        .iter()
        .enumerate()
        .map(|(i, vote)| {
            let name = participant_name(i);
            coordinator.enlist(vote.participant(&name, journal).into_arc())?;
            Ok(name)
        })
        .collect()
}

/// Listener recording every transition it sees.
#[derive(Debug, Default)]
pub struct TransitionRecorder {
    seen: Mutex<Vec<(TxState, TxState)>>,
}

impl TransitionRecorder {
    /// Creates a recorder ready to register.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transitions so far, oldest first.
    pub fn transitions(&self) -> Vec<(TxState, TxState)> {
        self.seen.lock().clone()
    }

    /// The states entered, oldest first.
    pub fn states(&self) -> Vec<TxState> {
        self.seen.lock().iter().map(|(_, to)| *to).collect()
    }
}

impl StateListener for TransitionRecorder {
    fn on_transition(&self, _coordinator: &CoordinatorId, from: TxState, to: TxState) {
        self.seen.lock().push((from, to));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{test_config, with_memory_service, MemoryLog};
    use crate::generators::refusing_votes_strategy;
    use crate::participants::{Call, ScriptedParticipant};
    use concord_core::{
        CoreError, HeuristicOutcome, NoopResolver, ParticipantError, RollbackOnlyParticipant, Vote,
    };
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    const COMMIT: Call = Call::Commit { one_phase: false };

    #[test]
    fn three_yes_votes_commit_in_enlistment_order() {
        with_memory_service(|service| {
            let journal = CallJournal::new();
            let tx = service.begin().unwrap();
            let recorder = TransitionRecorder::new();
            tx.add_listener(recorder.clone());
            enlist_votes(&tx, &[ScriptedVote::Yes; 3], &journal).unwrap();

            tx.commit(true).unwrap();

            assert_eq!(journal.names_for(Call::Prepare), ["p1", "p2", "p3"]);
            assert_eq!(journal.names_for(COMMIT), ["p1", "p2", "p3"]);
            assert_eq!(journal.count(Call::Rollback), 0);
            assert_eq!(tx.state(), TxState::Terminated);
            assert!(tx.heuristic_outcomes().is_empty());
            assert_eq!(
                recorder.states(),
                [
                    TxState::Preparing,
                    TxState::InDoubt,
                    TxState::Committing,
                    TxState::Terminated
                ]
            );
        });
    }

    #[test]
    fn second_participant_votes_no() {
        with_memory_service(|service| {
            let journal = CallJournal::new();
            let tx = service.begin().unwrap();
            let recorder = TransitionRecorder::new();
            tx.add_listener(recorder.clone());
            let votes = [ScriptedVote::Yes, ScriptedVote::No, ScriptedVote::Yes];
            enlist_votes(&tx, &votes, &journal).unwrap();

            let err = tx.commit(true).unwrap_err();

            assert!(err.is_rollback(), "unexpected error: {err}");
            assert_eq!(journal.names_for(Call::Rollback), ["p1", "p3"]);
            assert_eq!(journal.count(COMMIT), 0);
            assert_eq!(journal.calls_to("p2"), vec![Call::Prepare]);
            assert_eq!(tx.state(), TxState::Terminated);
            assert_eq!(
                recorder.states(),
                [TxState::Preparing, TxState::Aborting, TxState::Terminated]
            );

            // a late commit reports the rollback again
            assert!(tx.commit(false).unwrap_err().is_rollback());
        });
    }

    #[test]
    fn single_participant_commits_in_one_phase() {
        with_memory_service(|service| {
            let journal = CallJournal::new();
            let tx = service.begin().unwrap();
            tx.enlist(ScriptedParticipant::new("only", &journal).into_arc())
                .unwrap();

            tx.commit(true).unwrap();

            assert_eq!(
                journal.calls_to("only"),
                vec![Call::Commit { one_phase: true }]
            );
            assert_eq!(tx.state(), TxState::Terminated);
        });
    }

    #[test]
    fn repeated_prepare_repeats_the_vote() {
        with_memory_service(|service| {
            let journal = CallJournal::new();
            let tx = service.begin().unwrap();
            enlist_votes(&tx, &[ScriptedVote::Yes, ScriptedVote::Yes], &journal).unwrap();

            assert_eq!(tx.prepare().unwrap(), Vote::Yes);
            assert_eq!(tx.state(), TxState::InDoubt);
            assert_eq!(tx.prepare().unwrap(), Vote::Yes);
            assert_eq!(tx.prepare().unwrap(), Vote::Yes);

            assert_eq!(journal.count(Call::Prepare), 2);
            assert_eq!(tx.state(), TxState::InDoubt);

            tx.commit(false).unwrap();
            assert_eq!(journal.names_for(COMMIT), ["p1", "p2"]);
        });
    }

    #[test]
    fn read_only_voters_skip_phase_two() {
        with_memory_service(|service| {
            let journal = CallJournal::new();
            let tx = service.begin().unwrap();
            let votes = [ScriptedVote::ReadOnly, ScriptedVote::Yes, ScriptedVote::Yes];
            enlist_votes(&tx, &votes, &journal).unwrap();

            tx.commit(true).unwrap();

            assert_eq!(journal.names_for(COMMIT), ["p2", "p3"]);
            assert_eq!(journal.calls_to("p1"), vec![Call::Prepare]);
        });
    }

    #[test]
    fn rollback_only_participant_aborts_the_transaction() {
        with_memory_service(|service| {
            let journal = CallJournal::new();
            let tx = service.begin().unwrap();
            tx.enlist(ScriptedParticipant::new("worker", &journal).into_arc())
                .unwrap();
            tx.enlist(Arc::new(RollbackOnlyParticipant)).unwrap();

            assert!(tx.commit(true).unwrap_err().is_rollback());
            assert_eq!(journal.names_for(Call::Rollback), ["worker"]);
        });
    }

    #[test]
    fn unreachable_participant_keeps_commit_in_doubt() {
        with_memory_service(|service| {
            let journal = CallJournal::new();
            let tx = service.begin().unwrap();
            tx.enlist(ScriptedParticipant::new("a", &journal).into_arc())
                .unwrap();
            tx.enlist(
                ScriptedParticipant::new("b", &journal)
                    .commit_replies([Err(ParticipantError::Unavailable("timeout".into()))])
                    .into_arc(),
            )
            .unwrap();

            let err = tx.commit(true).unwrap_err();
            assert!(matches!(err, CoreError::HeurHazard { pending: 1, .. }));
            assert_eq!(tx.state(), TxState::InDoubt);

            // the next tick resends the decision to b only
            journal.clear();
            service.tick();
            assert_eq!(journal.names_for(COMMIT), ["b"]);
            assert_eq!(tx.state(), TxState::Terminated);
            assert_eq!(service.active_count(), 0);
        });
    }

    #[test]
    fn conflicting_heuristics_end_mixed() {
        with_memory_service(|service| {
            let journal = CallJournal::new();
            let tx = service.begin().unwrap();
            tx.enlist(ScriptedParticipant::new("a", &journal).into_arc())
                .unwrap();
            tx.enlist(
                ScriptedParticipant::new("b", &journal)
                    .commit_replies([Err(ParticipantError::HeurRollback)])
                    .into_arc(),
            )
            .unwrap();

            assert!(matches!(
                tx.commit(true).unwrap_err(),
                CoreError::HeurMixed { .. }
            ));
            assert_eq!(tx.state(), TxState::HeurMixed);
            assert_eq!(
                tx.heuristic_outcomes()
                    .into_iter()
                    .map(|(_, o)| o)
                    .collect::<Vec<_>>(),
                [HeuristicOutcome::HeurRollback]
            );

            tx.forget().unwrap();
            assert_eq!(journal.names_for(Call::Forget), ["b"]);
            assert_eq!(tx.state(), TxState::Terminated);
        });
    }

    #[test]
    fn concurrent_dispatch_reaches_everyone() {
        let log = MemoryLog::new();
        let service = log.open(test_config().concurrent_dispatch(true), &NoopResolver);
        let journal = CallJournal::new();
        let tx = service.begin().unwrap();
        enlist_votes(&tx, &[ScriptedVote::Yes; 5], &journal).unwrap();

        tx.commit(true).unwrap();

        let committed: BTreeSet<_> = journal.names_for(COMMIT).into_iter().collect();
        assert_eq!(committed.len(), 5);
        assert_eq!(tx.state(), TxState::Terminated);
    }

    proptest! {
        #[test]
        fn any_refusal_rolls_back_everyone(votes in refusing_votes_strategy(6)) {
            let log = MemoryLog::new();
            let service = log.open(test_config(), &NoopResolver);
            let journal = CallJournal::new();
            let tx = service.begin().unwrap();
            let names = enlist_votes(&tx, &votes, &journal).unwrap();

            let err = tx.prepare().unwrap_err();
            prop_assert!(err.is_rollback());
            prop_assert_eq!(journal.count(COMMIT), 0);

            let expected: Vec<String> = names
                .iter()
                .zip(&votes)
                .filter(|(_, v)| v.awaits_decision())
                .map(|(n, _)| n.clone())
                .collect();
            prop_assert_eq!(journal.names_for(Call::Rollback), expected);
            prop_assert_eq!(tx.state(), TxState::Terminated);
        }
    }
}
