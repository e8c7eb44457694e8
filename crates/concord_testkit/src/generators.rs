//! Property-based test generators using proptest.
//!
//! Generates vote scripts for a transaction's participants.

use crate::participants::{CallJournal, ScriptedParticipant};
use concord_core::Vote;
use proptest::prelude::*;
use std::sync::Arc;

/// What a scripted participant answers to `prepare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedVote {
    /// Votes YES.
    Yes,
    /// Votes READ_ONLY.
    ReadOnly,
    /// Votes NO.
    No,
    /// The call fails with an unknown outcome.
    Fail,
}

impl ScriptedVote {
    /// Whether this vote forces the transaction to abort.
    pub fn aborts(self) -> bool {
        matches!(self, Self::No | Self::Fail)
    }

    /// Whether a participant voting this way takes part in phase two.
    ///
    /// NO voters already rolled back and read-only voters have nothing to
    /// complete.
    pub fn awaits_decision(self) -> bool {
        matches!(self, Self::Yes | Self::Fail)
    }

    /// A participant named `name` voting this way.
    pub fn participant(self, name: &str, journal: &Arc<CallJournal>) -> ScriptedParticipant {
        let p = ScriptedParticipant::new(name, journal);
        match self {
            Self::Yes => p,
            Self::ReadOnly => p.vote(Vote::ReadOnly),
            Self::No => p.vote_no(),
            Self::Fail => p.fail_prepare("connection reset"),
        }
    }
}

/// Strategy for a single vote.
pub fn vote_strategy() -> impl Strategy<Value = ScriptedVote> {
    prop_oneof![
        4 => Just(ScriptedVote::Yes),
        2 => Just(ScriptedVote::ReadOnly),
        1 => Just(ScriptedVote::No),
        1 => Just(ScriptedVote::Fail),
    ]
}

/// Strategy for the votes of 1 to `max` participants.
pub fn votes_strategy(max: usize) -> impl Strategy<Value = Vec<ScriptedVote>> {
    prop::collection::vec(vote_strategy(), 1..=max.max(1))
}

/// Strategy for votes where at least one participant refuses or fails.
pub fn refusing_votes_strategy(max: usize) -> impl Strategy<Value = Vec<ScriptedVote>> {
    let refusal = prop_oneof![Just(ScriptedVote::No), Just(ScriptedVote::Fail)];
    (
        prop::collection::vec(vote_strategy(), 0..max.max(1)),
        refusal,
        any::<prop::sample::Index>(),
    )
        .prop_map(|(mut votes, refusal, at)| {
            let at = at.index(votes.len() + 1);
            votes.insert(at, refusal);
            votes
        })
}

/// Names used for the participant at each position: `p1`, `p2`, ...
pub fn participant_name(index: usize) -> String {
    format!("p{}", index + 1)
}
