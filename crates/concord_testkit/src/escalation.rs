//! Timeout escalation scenarios.
//!
//! Ticks are delivered by hand through [`tick_times`] so a test can
//! observe the coordinator after each one; the background driver is
//! exercised separately with a short tick interval.

use concord_core::Coordinator;

/// Delivers `n` timeout ticks to `coordinator`, calling `after` with the
/// 1-based tick number after each.
pub fn tick_times(coordinator: &Coordinator, n: u32, mut after: impl FnMut(u32)) {
    for tick in 1..=n {
        coordinator.on_timeout();
        after(tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{test_config, MemoryLog, TestService};
    use crate::participants::{Call, CallJournal, MapResolver, RecordingSuperior, ScriptedParticipant};
    use concord_core::{Decision, HeuristicOutcome, NoopResolver, TxState};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn prepared_subordinate(
        log: &MemoryLog,
        superior: Arc<RecordingSuperior>,
        prefer_commit: bool,
        journal: &Arc<CallJournal>,
    ) -> (concord_core::TransactionService, Arc<Coordinator>) {
        let config = test_config()
            .max_indoubt_ticks(10)
            .prefer_heuristic_commit(prefer_commit);
        let service = log.open(config, &NoopResolver);
        let tx = service.begin_subordinate(superior).unwrap();
        tx.enlist(ScriptedParticipant::new("a", journal).into_arc())
            .unwrap();
        tx.enlist(ScriptedParticipant::new("b", journal).into_arc())
            .unwrap();
        tx.prepare().unwrap();
        (service, tx)
    }

    #[test]
    fn subordinate_asks_for_replay_once_then_decides() {
        let log = MemoryLog::new();
        let journal = CallJournal::new();
        let superior = RecordingSuperior::new("tm://root");
        let (_service, tx) = prepared_subordinate(&log, superior.clone(), false, &journal);

        let mut requests = Vec::new();
        let mut states = Vec::new();
        tick_times(&tx, 10, |_| {
            requests.push(superior.request_count());
            states.push(tx.state());
        });

        assert_eq!(requests, [0, 0, 0, 0, 1, 1, 1, 1, 1, 1]);
        assert_eq!(superior.requests(), vec![tx.id().clone()]);
        assert!(states[..9].iter().all(|s| *s == TxState::InDoubt));

        // forced rollback, reported as a heuristic decision
        assert_eq!(states[9], TxState::HeurRollback);
        assert_eq!(journal.names_for(Call::Rollback), ["a", "b"]);
        assert!(tx
            .heuristic_outcomes()
            .iter()
            .all(|(_, o)| *o == HeuristicOutcome::HeurRollback));
    }

    #[test]
    fn subordinate_preferring_commit_forces_commit() {
        let log = MemoryLog::new();
        let journal = CallJournal::new();
        let superior = RecordingSuperior::new("tm://root");
        let (_service, tx) = prepared_subordinate(&log, superior, true, &journal);

        tick_times(&tx, 10, |_| {});

        assert_eq!(tx.state(), TxState::HeurCommit);
        assert_eq!(journal.names_for(Call::Commit { one_phase: false }), ["a", "b"]);
    }

    #[test]
    fn superior_answer_completes_subordinate() {
        let log = MemoryLog::new();
        let journal = CallJournal::new();
        let superior = RecordingSuperior::answering("tm://root", Decision::Commit);
        let (_service, tx) = prepared_subordinate(&log, superior.clone(), false, &journal);

        tick_times(&tx, 5, |_| {});

        assert_eq!(superior.request_count(), 1);
        assert_eq!(tx.state(), TxState::Terminated);
        assert!(tx.heuristic_outcomes().is_empty());
    }

    #[test]
    fn recovered_subordinate_asks_again() {
        let log = MemoryLog::new();
        let journal = CallJournal::new();
        let superior = RecordingSuperior::new("tm://root");
        let (service, tx) = prepared_subordinate(&log, superior.clone(), false, &journal);
        let id = tx.id().clone();
        tick_times(&tx, 6, |_| {});
        assert_eq!(superior.request_count(), 1);
        drop(service);

        let again = RecordingSuperior::new("tm://root");
        let resolver = MapResolver::new();
        resolver.insert_superior("tm://root", again.clone());
        let service = log.open(test_config().max_indoubt_ticks(10), &resolver);
        let tx = service.coordinator(&id).unwrap();
        assert!(!tx.is_root());

        let mut requests = Vec::new();
        tick_times(&tx, 9, |_| requests.push(again.request_count()));
        assert_eq!(requests, [0, 0, 0, 0, 1, 1, 1, 1, 1]);
        assert_eq!(again.requests(), vec![id]);
        assert_eq!(tx.state(), TxState::InDoubt);
    }

    #[test]
    fn root_waits_for_its_caller_until_the_window_ends() {
        let log = MemoryLog::new();
        let journal = CallJournal::new();
        let service = log.open(test_config().max_indoubt_ticks(4), &NoopResolver);
        let tx = service.begin().unwrap();
        tx.enlist(ScriptedParticipant::new("a", &journal).into_arc())
            .unwrap();
        tx.enlist(ScriptedParticipant::new("b", &journal).into_arc())
            .unwrap();
        tx.prepare().unwrap();

        tick_times(&tx, 3, |_| {});
        assert_eq!(tx.state(), TxState::InDoubt);
        assert_eq!(journal.count(Call::Rollback), 0);

        tick_times(&tx, 1, |_| {});
        assert_eq!(tx.state(), TxState::HeurRollback);
        assert_eq!(journal.names_for(Call::Rollback), ["a", "b"]);
    }

    #[test]
    fn recovered_root_rolls_back_without_heuristics() {
        let log = MemoryLog::new();
        let journal = CallJournal::new();
        let id = {
            let service = log.open(test_config().max_indoubt_ticks(3), &NoopResolver);
            let tx = service.begin().unwrap();
            tx.enlist(
                ScriptedParticipant::new("a", &journal)
                    .with_uri("db://a")
                    .into_arc(),
            )
            .unwrap();
            tx.enlist(
                ScriptedParticipant::new("b", &journal)
                    .with_uri("db://b")
                    .into_arc(),
            )
            .unwrap();
            tx.prepare().unwrap();
            tx.id().clone()
        };

        let resolver = MapResolver::new();
        resolver.insert("db://a", ScriptedParticipant::new("a", &journal).into_arc());
        resolver.insert("db://b", ScriptedParticipant::new("b", &journal).into_arc());
        let service = log.open(test_config().max_indoubt_ticks(3), &resolver);
        let tx = service.coordinator(&id).unwrap();

        tick_times(&tx, 3, |_| {});
        assert_eq!(tx.state(), TxState::Terminated);
        assert_eq!(journal.names_for(Call::Rollback), ["a", "b"]);
    }

    #[test]
    fn background_driver_times_out_active_transactions() {
        let env = TestService::with_config(test_config().timeout_ticks(2));
        let journal = CallJournal::new();
        let tx = env.begin().unwrap();
        tx.enlist(ScriptedParticipant::new("a", &journal).into_arc())
            .unwrap();

        let mut driver = env.service.start_timer().unwrap();
        assert!(driver.is_running());

        let deadline = Instant::now() + Duration::from_secs(5);
        while env.active_count() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(env.active_count(), 0);
        assert_eq!(tx.state(), TxState::Terminated);
        assert_eq!(journal.names_for(Call::Rollback), ["a"]);

        driver.stop();
        assert!(!driver.is_running());
    }
}
