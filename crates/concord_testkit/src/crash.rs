//! Crash recovery testing.
//!
//! Simulates the process dying at a chosen log append and checks what
//! the next service recovers.
//!
//! ## Test Strategy
//!
//! 1. **Crash while preparing** - presumed abort rolls everyone back
//! 2. **Crash during the commit phase** - unconfirmed participants become
//!    hazards, never a silent TERMINATED
//! 3. **Torn decision record** - the tail is dropped and the transaction
//!    is still in doubt
//! 4. **Repeated recovery** - the same log always rebuilds the same
//!    coordinators
//! 5. **Crash during a checkpoint** - the old log survives the failed
//!    rewrite
//!
//! ## Usage
//!
//! ```rust,ignore
//! use concord_testkit::crash::CrashingLog;
//! use concord_storage::CrashMode;
//!
//! let log = CrashingLog::new();
//! let service = log.open_crashing(test_config(), CrashMode::FailAfter(3));
//! // ... run a transaction until the log write fails
//! let restarted = log.restart(test_config(), &resolver);
//! ```

use crate::fixtures::MemoryLog;
use concord_core::{Config, NoopResolver, ParticipantResolver, TransactionService};
use concord_storage::{CrashMode, CrashingBackend};

/// An in-memory log whose first service dies at a chosen append.
#[derive(Debug, Clone, Default)]
pub struct CrashingLog {
    log: MemoryLog,
}

impl CrashingLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a service whose log writes fail as `mode` describes.
    pub fn open_crashing(&self, config: Config, mode: CrashMode) -> TransactionService {
        let backend = CrashingBackend::new(self.log.backend(), mode);
        TransactionService::open_with_backend(config, Box::new(backend), &NoopResolver)
            .expect("Failed to open crashing transaction service")
    }

    /// Opens a healthy service over whatever reached the log.
    pub fn restart(&self, config: Config, resolver: &dyn ParticipantResolver) -> TransactionService {
        self.log.open(config, resolver)
    }

    /// The underlying log.
    pub fn log(&self) -> &MemoryLog {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{test_config, TestService};
    use crate::participants::{Call, CallJournal, MapResolver, ScriptedParticipant};
    use concord_core::{
        CoreError, Decision, HeuristicOutcome, NoopResolver, ParticipantError, ParticipantRef, TxState,
    };
    use std::sync::Arc;

    fn named(name: &str, journal: &Arc<CallJournal>) -> ScriptedParticipant {
        ScriptedParticipant::new(name, journal).with_uri(&format!("db://{name}"))
    }

    fn resolver_for(names: &[&str], journal: &Arc<CallJournal>) -> MapResolver {
        let resolver = MapResolver::new();
        for name in names {
            resolver.insert(&format!("db://{name}"), named(name, journal).into_arc());
        }
        resolver
    }

    #[test]
    fn crash_in_commit_phase_recovers_as_hazard() {
        let log = CrashingLog::new();
        let journal = CallJournal::new();
        let id = {
            // PREPARING, IN_DOUBT and COMMITTING reach the log; TERMINATED does not
            let service = log.open_crashing(test_config(), CrashMode::FailAfter(3));
            let tx = service.begin().unwrap();
            tx.enlist(named("a", &journal).into_arc()).unwrap();
            tx.enlist(named("b", &journal).into_arc()).unwrap();

            let err = tx.commit(true).unwrap_err();
            assert!(matches!(err, CoreError::Sys { .. }), "unexpected error: {err}");
            assert_eq!(journal.count(Call::Commit { one_phase: false }), 2);
            tx.id().clone()
        };

        let service = log.restart(test_config(), &NoopResolver);
        let recovered = service.coordinator(&id).expect("coordinator not recovered");

        assert_eq!(recovered.state(), TxState::HeurHazard);
        assert_eq!(
            recovered.heuristic_outcomes(),
            vec![
                (ParticipantRef::new("db://a"), HeuristicOutcome::HeurHazard),
                (ParticipantRef::new("db://b"), HeuristicOutcome::HeurHazard),
            ]
        );
    }

    #[test]
    fn crash_while_preparing_presumes_abort() {
        let log = CrashingLog::new();
        let journal = CallJournal::new();
        {
            // only PREPARING reaches the log
            let service = log.open_crashing(test_config(), CrashMode::FailAfter(1));
            let tx = service.begin().unwrap();
            tx.enlist(named("a", &journal).into_arc()).unwrap();
            tx.enlist(named("b", &journal).into_arc()).unwrap();
            assert!(tx.prepare().is_err());
        }

        let after = CallJournal::new();
        let resolver = resolver_for(&["a", "b"], &after);
        let service = log.restart(test_config(), &resolver);

        assert_eq!(service.recovered_count(), 0);
        assert_eq!(after.names_for(Call::Recover), ["a", "b"]);
        assert_eq!(after.names_for(Call::Rollback), ["a", "b"]);
        assert_eq!(after.count(Call::Commit { one_phase: false }), 0);
    }

    #[test]
    fn torn_commit_record_leaves_transaction_in_doubt() {
        let log = CrashingLog::new();
        let journal = CallJournal::new();
        let id = {
            let service = log.open_crashing(
                test_config(),
                CrashMode::TearAfter {
                    appends: 2,
                    keep: 7,
                },
            );
            let tx = service.begin().unwrap();
            tx.enlist(named("a", &journal).into_arc()).unwrap();
            tx.enlist(named("b", &journal).into_arc()).unwrap();

            assert!(matches!(tx.commit(true), Err(CoreError::Sys { .. })));
            // the decision never reached the log, so nobody heard it
            assert_eq!(journal.count(Call::Commit { one_phase: false }), 0);
            tx.id().clone()
        };

        let after = CallJournal::new();
        let resolver = resolver_for(&["a", "b"], &after);
        let service = log.restart(test_config(), &resolver);
        let tx = service.coordinator(&id).expect("coordinator not recovered");

        let snapshot = tx.snapshot();
        assert_eq!(snapshot.state, TxState::InDoubt);
        assert_eq!(snapshot.decision, None);
        assert!(snapshot.recovered);

        tx.commit(false).unwrap();
        assert_eq!(after.names_for(Call::Commit { one_phase: false }), ["a", "b"]);
        assert_eq!(tx.state(), TxState::Terminated);
    }

    #[test]
    fn recovery_is_idempotent() {
        let mut env = TestService::new();
        let journal = CallJournal::new();

        // undecided, in doubt
        let prepared = env.begin().unwrap();
        prepared.enlist(named("a", &journal).into_arc()).unwrap();
        prepared.enlist(named("b", &journal).into_arc()).unwrap();
        prepared.prepare().unwrap();

        // commit decided, one participant unreachable
        let stuck = env.begin().unwrap();
        stuck.enlist(named("c", &journal).into_arc()).unwrap();
        stuck
            .enlist(
                named("d", &journal)
                    .commit_replies([Err(ParticipantError::Unavailable("down".into()))])
                    .into_arc(),
            )
            .unwrap();
        assert!(stuck.commit(true).is_err());

        // finished
        let done = env.begin().unwrap();
        done.enlist(named("e", &journal).into_arc()).unwrap();
        done.commit(true).unwrap();

        env.restart(&NoopResolver);
        let first = env.coordinators();
        env.restart(&NoopResolver);
        let second = env.coordinators();

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        let prepared_again = first.iter().find(|s| &s.id == prepared.id()).unwrap();
        assert_eq!(prepared_again.state, TxState::InDoubt);
        let stuck_again = first.iter().find(|s| &s.id == stuck.id()).unwrap();
        assert_eq!(stuck_again.state, TxState::HeurHazard);
        assert_eq!(stuck_again.decision, Some(Decision::Commit));
        assert!(env.coordinator(done.id()).is_none());
    }

    #[test]
    fn second_instance_is_refused_until_release() {
        let env = TestService::new();

        let err = env.open_again().unwrap_err();
        assert!(matches!(err, CoreError::LogInUse { .. }), "unexpected error: {err}");

        env.shutdown();
        assert!(!env.holds_lock());
        let second = env.open_again().unwrap();
        assert!(second.holds_lock());
    }

    #[test]
    fn checkpoint_keeps_only_unfinished_transactions() {
        let mut env = TestService::new();
        let journal = CallJournal::new();

        let prepared = env.begin().unwrap();
        prepared.enlist(named("a", &journal).into_arc()).unwrap();
        prepared.prepare().unwrap();

        for name in ["b", "c", "d"] {
            let tx = env.begin().unwrap();
            tx.enlist(named(name, &journal).into_arc()).unwrap();
            tx.commit(true).unwrap();
        }
        let _active = env.begin().unwrap();

        let before = env.log().size().unwrap();
        env.checkpoint().unwrap();
        let records = env.log().read_all().unwrap();

        assert!(env.log().size().unwrap() < before);
        assert_eq!(records.len(), 1);
        assert_eq!(&records[0].1.coordinator_id, prepared.id());
        assert_eq!(records[0].1.state, TxState::InDoubt);

        env.restart(&NoopResolver);
        assert_eq!(env.recovered_count(), 1);
    }

    #[test]
    fn crash_during_checkpoint_keeps_in_doubt_transaction() {
        let log = CrashingLog::new();
        let journal = CallJournal::new();
        let id = {
            // PREPARING and IN_DOUBT reach the log; the rewrite does not
            let service = log.open_crashing(test_config(), CrashMode::FailAfter(2));
            let tx = service.begin().unwrap();
            tx.enlist(named("a", &journal).into_arc()).unwrap();
            tx.enlist(named("b", &journal).into_arc()).unwrap();
            tx.prepare().unwrap();

            assert!(service.checkpoint().is_err());
            tx.id().clone()
        };

        let after = CallJournal::new();
        let resolver = resolver_for(&["a", "b"], &after);
        let service = log.restart(test_config(), &resolver);

        assert_eq!(service.recovered_count(), 1);
        let tx = service.coordinator(&id).expect("in-doubt transaction lost");
        assert_eq!(tx.state(), TxState::InDoubt);
        tx.commit(false).unwrap();
        assert_eq!(after.names_for(Call::Commit { one_phase: false }), ["a", "b"]);
    }
}
