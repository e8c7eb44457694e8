//! Core type definitions.

use std::fmt;

/// Globally unique identifier of a coordinator, stable across recovery.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoordinatorId(String);

impl CoordinatorId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh identifier in the `tm_unique_name` namespace.
    #[must_use]
    pub fn generate(tm_unique_name: &str) -> Self {
        Self(format!("{tm_unique_name}:{}", uuid::Uuid::new_v4().simple()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CoordinatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable reference to an enlisted participant.
///
/// This is the participant's URI when it has one, otherwise
/// `<coordinator id>#<enlistment index>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParticipantRef(String);

impl ParticipantRef {
    /// Wraps an existing reference.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Reference for a participant without a URI.
    #[must_use]
    pub fn local(coordinator: &CoordinatorId, index: usize) -> Self {
        Self(format!("{coordinator}#{index}"))
    }

    /// Returns the reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Protocol state of a coordinator.
///
/// The byte tags are part of the log format and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TxState {
    /// Accepting enlistments.
    Active = 1,
    /// Collecting votes.
    Preparing = 2,
    /// Sending commit to participants.
    Committing = 3,
    /// Sending rollback to participants.
    Aborting = 4,
    /// Voted yes, or decided but not yet confirmed by every participant.
    InDoubt = 5,
    /// Finished; nothing left to do.
    Terminated = 6,
    /// Heuristically committed.
    HeurCommit = 7,
    /// Heuristically rolled back.
    HeurRollback = 8,
    /// Participants disagree.
    HeurMixed = 9,
    /// Some participant outcomes are unknown.
    HeurHazard = 10,
}

impl TxState {
    /// Converts a log tag to a state.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Active),
            2 => Some(Self::Preparing),
            3 => Some(Self::Committing),
            4 => Some(Self::Aborting),
            5 => Some(Self::InDoubt),
            6 => Some(Self::Terminated),
            7 => Some(Self::HeurCommit),
            8 => Some(Self::HeurRollback),
            9 => Some(Self::HeurMixed),
            10 => Some(Self::HeurHazard),
            _ => None,
        }
    }

    /// Converts the state to its log tag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether the protocol has nothing more to do in this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Terminated
                | Self::HeurCommit
                | Self::HeurRollback
                | Self::HeurMixed
                | Self::HeurHazard
        )
    }

    /// Whether this is one of the heuristic states.
    #[must_use]
    pub const fn is_heuristic(self) -> bool {
        matches!(
            self,
            Self::HeurCommit | Self::HeurRollback | Self::HeurMixed | Self::HeurHazard
        )
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "ACTIVE",
            Self::Preparing => "PREPARING",
            Self::Committing => "COMMITTING",
            Self::Aborting => "ABORTING",
            Self::InDoubt => "IN_DOUBT",
            Self::Terminated => "TERMINATED",
            Self::HeurCommit => "HEUR_COMMIT",
            Self::HeurRollback => "HEUR_ROLLBACK",
            Self::HeurMixed => "HEUR_MIXED",
            Self::HeurHazard => "HEUR_HAZARD",
        };
        f.write_str(name)
    }
}

/// A participant's answer to `prepare`.
///
/// A failed prepare call counts as a NO vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// Nothing to commit; the participant leaves the transaction.
    ReadOnly,
    /// Prepared and waiting for the decision.
    Yes,
}

/// A heuristic outcome recorded for one participant.
///
/// Tags are shared with the matching [`TxState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HeuristicOutcome {
    /// The participant committed on its own.
    HeurCommit = 7,
    /// The participant rolled back on its own.
    HeurRollback = 8,
    /// The participant's outcome is unknown.
    HeurHazard = 10,
    /// The participant partly committed and partly rolled back.
    HeurMixed = 9,
}

impl HeuristicOutcome {
    /// Converts a log tag to an outcome.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            7 => Some(Self::HeurCommit),
            8 => Some(Self::HeurRollback),
            9 => Some(Self::HeurMixed),
            10 => Some(Self::HeurHazard),
            _ => None,
        }
    }

    /// Converts the outcome to its log tag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// The coordinator state carrying this outcome.
    #[must_use]
    pub const fn state(self) -> TxState {
        match self {
            Self::HeurCommit => TxState::HeurCommit,
            Self::HeurRollback => TxState::HeurRollback,
            Self::HeurMixed => TxState::HeurMixed,
            Self::HeurHazard => TxState::HeurHazard,
        }
    }
}

/// The coordinator's final decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Make every participant's work permanent.
    Commit,
    /// Undo every participant's work.
    Rollback,
}

impl Decision {
    /// The heuristic outcome a participant reporting this decision on its
    /// own would carry.
    #[must_use]
    pub const fn as_heuristic(self) -> HeuristicOutcome {
        match self {
            Self::Commit => HeuristicOutcome::HeurCommit,
            Self::Rollback => HeuristicOutcome::HeurRollback,
        }
    }
}

/// How a terminated coordinator ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TerminationOutcome {
    /// Every participant committed.
    Committed = 1,
    /// Every participant rolled back.
    RolledBack = 2,
    /// Every participant voted read-only.
    ReadOnly = 3,
    /// Heuristic information was forgotten on request.
    Forgotten = 4,
}

impl TerminationOutcome {
    /// Converts a log tag to an outcome.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Committed),
            2 => Some(Self::RolledBack),
            3 => Some(Self::ReadOnly),
            4 => Some(Self::Forgotten),
            _ => None,
        }
    }

    /// Converts the outcome to its log tag.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_tags_are_stable() {
        assert_eq!(TxState::Active.as_byte(), 1);
        assert_eq!(TxState::InDoubt.as_byte(), 5);
        assert_eq!(TxState::HeurHazard.as_byte(), 10);
        assert_eq!(TxState::from_byte(0), None);
        assert_eq!(TxState::from_byte(11), None);
        for tag in 1..=10 {
            assert_eq!(TxState::from_byte(tag).unwrap().as_byte(), tag);
        }
    }

    #[test]
    fn heuristic_tags_match_states() {
        for outcome in [
            HeuristicOutcome::HeurCommit,
            HeuristicOutcome::HeurRollback,
            HeuristicOutcome::HeurMixed,
            HeuristicOutcome::HeurHazard,
        ] {
            assert_eq!(outcome.as_byte(), outcome.state().as_byte());
            assert_eq!(HeuristicOutcome::from_byte(outcome.as_byte()), Some(outcome));
        }
        assert_eq!(HeuristicOutcome::from_byte(TxState::Terminated.as_byte()), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!TxState::InDoubt.is_terminal());
        assert!(!TxState::Committing.is_terminal());
        assert!(TxState::Terminated.is_terminal());
        assert!(TxState::HeurMixed.is_terminal());
        assert!(TxState::HeurMixed.is_heuristic());
        assert!(!TxState::Terminated.is_heuristic());
    }

    #[test]
    fn generated_ids_are_namespaced() {
        let a = CoordinatorId::generate("tm1");
        let b = CoordinatorId::generate("tm1");
        assert!(a.as_str().starts_with("tm1:"));
        assert_ne!(a, b);
        assert_eq!(
            ParticipantRef::local(&CoordinatorId::new("tm1:x"), 2).as_str(),
            "tm1:x#2"
        );
    }
}
