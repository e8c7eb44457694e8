//! Error types for the coordinator.
//!
//! The protocol outcomes a caller of `prepare`/`commit`/`rollback` must be
//! able to tell apart each get their own variant. The heuristic variants
//! in particular must reach operators: some participants may now disagree
//! with the coordinator's decision.

use crate::types::{CoordinatorId, TxState};
use std::io;
use thiserror::Error;

/// Result type for coordinator operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in coordinator operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] concord_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation not legal in the coordinator's current state.
    #[error("illegal state {state:?} for {coordinator}: {message}")]
    IllegalState {
        /// Coordinator the call was made on.
        coordinator: CoordinatorId,
        /// State at the time of the call.
        state: TxState,
        /// What was attempted.
        message: String,
    },

    /// The transaction was rolled back.
    #[error("transaction {coordinator} rolled back: {reason}")]
    Rollback {
        /// Coordinator that rolled back.
        coordinator: CoordinatorId,
        /// Why it rolled back.
        reason: String,
    },

    /// Some or all participants heuristically committed.
    #[error("heuristic commit in {coordinator}")]
    HeurCommit {
        /// Coordinator with the heuristic outcome.
        coordinator: CoordinatorId,
    },

    /// Some or all participants heuristically rolled back.
    #[error("heuristic rollback in {coordinator}")]
    HeurRollback {
        /// Coordinator with the heuristic outcome.
        coordinator: CoordinatorId,
    },

    /// Participants reached different outcomes.
    #[error("heuristic mixed outcome in {coordinator}")]
    HeurMixed {
        /// Coordinator with the heuristic outcome.
        coordinator: CoordinatorId,
    },

    /// The outcome of some participants is unknown.
    #[error("heuristic hazard in {coordinator}: {pending} participant(s) with unknown outcome")]
    HeurHazard {
        /// Coordinator with the heuristic outcome.
        coordinator: CoordinatorId,
        /// Participants whose outcome could not be confirmed.
        pending: usize,
    },

    /// Unexpected internal failure.
    #[error("system error: {message}")]
    Sys {
        /// Description of the failure.
        message: String,
    },

    /// Another process holds the log directory lock.
    #[error("log in use: {path} is locked by another coordinator instance")]
    LogInUse {
        /// Lock file path.
        path: String,
    },

    /// The transaction log is corrupted or has an unsupported format.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Record checksum mismatch.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the damaged record.
        offset: u64,
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the record.
        actual: u32,
    },

    /// A resource could not supply a resource transaction.
    #[error("resource {resource} unavailable: {message}")]
    ResourceUnavailable {
        /// Name of the resource.
        resource: String,
        /// Description of the failure.
        message: String,
    },

    /// Configuration rejected by validation.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong.
        message: String,
    },
}

impl CoreError {
    /// Creates an illegal state error.
    pub fn illegal_state(
        coordinator: &CoordinatorId,
        state: TxState,
        message: impl Into<String>,
    ) -> Self {
        Self::IllegalState {
            coordinator: coordinator.clone(),
            state,
            message: message.into(),
        }
    }

    /// Creates a rollback error.
    pub fn rollback(coordinator: &CoordinatorId, reason: impl Into<String>) -> Self {
        Self::Rollback {
            coordinator: coordinator.clone(),
            reason: reason.into(),
        }
    }

    /// Creates a system error.
    pub fn sys(message: impl Into<String>) -> Self {
        Self::Sys {
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates a resource unavailable error.
    pub fn resource_unavailable(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ResourceUnavailable {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether this is one of the four heuristic outcomes.
    #[must_use]
    pub fn is_heuristic(&self) -> bool {
        matches!(
            self,
            Self::HeurCommit { .. }
                | Self::HeurRollback { .. }
                | Self::HeurMixed { .. }
                | Self::HeurHazard { .. }
        )
    }

    /// Whether this error means the transaction was rolled back.
    #[must_use]
    pub fn is_rollback(&self) -> bool {
        matches!(self, Self::Rollback { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_classification() {
        let id = CoordinatorId::new("tm:1");
        assert!(CoreError::HeurMixed {
            coordinator: id.clone()
        }
        .is_heuristic());
        assert!(CoreError::HeurHazard {
            coordinator: id.clone(),
            pending: 2
        }
        .is_heuristic());
        assert!(!CoreError::rollback(&id, "vote").is_heuristic());
        assert!(CoreError::rollback(&id, "vote").is_rollback());
        assert!(!CoreError::sys("boom").is_rollback());
    }

    #[test]
    fn messages_name_the_coordinator() {
        let id = CoordinatorId::new("tm:7");
        let err = CoreError::illegal_state(&id, TxState::Terminated, "enlist after prepare");
        let text = err.to_string();
        assert!(text.contains("tm:7"));
        assert!(text.contains("enlist after prepare"));
    }
}
