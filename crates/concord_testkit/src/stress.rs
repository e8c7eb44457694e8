//! Stress testing utilities.
//!
//! Runs many transactions from several threads against one service
//! while timeout ticks fire concurrently.

use crate::generators::{participant_name, ScriptedVote};
use crate::participants::CallJournal;
use concord_core::{CoreError, TransactionService};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Configuration for a stress run.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of worker threads.
    pub threads: usize,
    /// Transactions per thread.
    pub transactions_per_thread: usize,
    /// Participants per transaction.
    pub participants: usize,
    /// Every `refuse_every`-th transaction gets a NO vote; 0 never.
    pub refuse_every: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            transactions_per_thread: 25,
            participants: 3,
            refuse_every: 5,
        }
    }
}

/// Outcome counts of a stress run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StressReport {
    /// Transactions that committed.
    pub committed: usize,
    /// Transactions that rolled back.
    pub rolled_back: usize,
    /// Transactions that ended any other way.
    pub other: usize,
}

impl StressReport {
    /// Total transactions run.
    pub fn total(&self) -> usize {
        self.committed + self.rolled_back + self.other
    }

    fn merge(&mut self, other: &Self) {
        self.committed += other.committed;
        self.rolled_back += other.rolled_back;
        self.other += other.other;
    }
}

/// Runs the configured transactions and ticks `service` until they finish.
pub fn run_stress(service: &TransactionService, config: &StressConfig) -> StressReport {
    let done = AtomicBool::new(false);
    let mut report = StressReport::default();

    thread::scope(|scope| {
        scope.spawn(|| {
            while !done.load(Ordering::Acquire) {
                service.tick();
                thread::sleep(Duration::from_millis(1));
            }
        });

        let workers: Vec<_> = (0..config.threads)
            .map(|t| scope.spawn(move || run_worker(service, config, t)))
            .collect();
        let results: Vec<_> = workers.into_iter().map(|w| w.join()).collect();
        done.store(true, Ordering::Release);
        for partial in results {
            report.merge(&partial.expect("stress worker panicked"));
        }
    });

    report
}

fn run_worker(service: &TransactionService, config: &StressConfig, thread: usize) -> StressReport {
    let journal = CallJournal::new();
    let mut report = StressReport::default();

    for i in 0..config.transactions_per_thread {
        let n = thread * config.transactions_per_thread + i;
        let refuse = config.refuse_every > 0 && n % config.refuse_every == 0;
        let tx = match service.begin() {
            Ok(tx) => tx,
            Err(_) => {
                report.other += 1;
                continue;
            }
        };
        let enlisted = (0..config.participants).all(|p| {
            let vote = if refuse && p + 1 == config.participants {
                ScriptedVote::No
            } else {
                ScriptedVote::Yes
            };
            let name = format!("t{thread}-{}", participant_name(p));
            tx.enlist(vote.participant(&name, &journal).into_arc()).is_ok()
        });
        if !enlisted {
            report.other += 1;
            continue;
        }
        match tx.commit(true) {
            Ok(()) => report.committed += 1,
            Err(CoreError::Rollback { .. }) => report.rolled_back += 1,
            Err(_) => report.other += 1,
        }
    }
    report
}
