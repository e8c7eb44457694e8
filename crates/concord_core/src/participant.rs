//! Capabilities the coordinator consumes from the outside world.
//!
//! - [`Participant`]: an enlisted resource that votes and completes
//! - [`SuperiorRecoveryCoordinator`]: the remote coordinator a subordinate
//!   asks to resend its decision
//! - [`TransactionalResource`] / [`ResourceTransaction`]: factories that
//!   hand out participants for a transaction
//! - [`ParticipantResolver`]: turns logged references back into live
//!   objects during recovery

use crate::coordinator::Coordinator;
use crate::error::CoreResult;
use crate::types::{CoordinatorId, ParticipantRef, Vote};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for participant calls.
pub type ParticipantResult<T> = Result<T, ParticipantError>;

/// Failure reported by a participant call.
///
/// `Unavailable` and `Failed` mean the outcome of the call is unknown:
/// the participant may or may not have done what was asked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParticipantError {
    /// Voted NO, or has already rolled back.
    #[error("participant rolled back")]
    Rollback,

    /// Committed on its own.
    #[error("participant heuristically committed")]
    HeurCommit,

    /// Rolled back on its own.
    #[error("participant heuristically rolled back")]
    HeurRollback,

    /// Partly committed and partly rolled back.
    #[error("participant reached a mixed outcome")]
    HeurMixed,

    /// Does not know its own outcome.
    #[error("participant outcome is a hazard")]
    HeurHazard,

    /// Could not be reached.
    #[error("participant unavailable: {0}")]
    Unavailable(String),

    /// The call failed for another reason.
    #[error("participant call failed: {0}")]
    Failed(String),
}

impl ParticipantError {
    /// Whether the outcome of the failed call is unknown.
    #[must_use]
    pub fn is_unknown_outcome(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Failed(_))
    }
}

/// A resource enlisted in a transaction.
///
/// Calls may block on remote I/O. The coordinator never holds a
/// participant call result as success unless `Ok` was returned.
pub trait Participant: Send + Sync + fmt::Debug {
    /// Phase one: vote.
    ///
    /// `Err(ParticipantError::Rollback)` is an explicit NO; every other
    /// error is a failed vote. Both abort the transaction.
    fn prepare(&self) -> ParticipantResult<Vote>;

    /// Phase two: make the work permanent.
    ///
    /// `one_phase` is set when the participant was never asked to prepare.
    fn commit(&self, one_phase: bool) -> ParticipantResult<()>;

    /// Phase two: undo the work.
    fn rollback(&self) -> ParticipantResult<()>;

    /// Discard any heuristic information kept for this transaction.
    fn forget(&self);

    /// Re-attach after a restart. Returns `false` if the participant no
    /// longer knows the transaction.
    fn recover(&self) -> bool;

    /// Stable address of the participant, if it has one.
    fn uri(&self) -> Option<String> {
        None
    }
}

/// The superior of a subordinate coordinator.
pub trait SuperiorRecoveryCoordinator: Send + Sync + fmt::Debug {
    /// Address of the superior, stored in the subordinate's log records.
    fn uri(&self) -> String;

    /// Ask the superior to resend its decision for `coordinator`.
    ///
    /// Called without the coordinator's lock held, so the superior may
    /// answer right away by calling `commit` or `rollback` on it.
    fn replay_completion(&self, coordinator: &Coordinator) -> ParticipantResult<()>;
}

/// The view of a global transaction handed to resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeTransaction {
    /// Coordinator of the transaction.
    pub coordinator_id: CoordinatorId,
    /// Whether the coordinator is a root.
    pub root: bool,
}

/// A resource's branch of a global transaction.
pub trait ResourceTransaction: Send + Sync {
    /// Branch identifier assigned by the resource.
    fn tid(&self) -> String;

    /// The participant that completes this branch.
    fn participant(&self) -> Arc<dyn Participant>;
}

/// A resource manager that can join global transactions.
pub trait TransactionalResource: Send + Sync {
    /// Resource name, for diagnostics.
    fn name(&self) -> &str;

    /// Opens this resource's branch of `transaction`.
    ///
    /// # Errors
    ///
    /// [`CoreError::ResourceUnavailable`](crate::CoreError::ResourceUnavailable)
    /// if the resource cannot take part.
    fn get_resource_transaction(
        &self,
        transaction: &CompositeTransaction,
    ) -> CoreResult<Box<dyn ResourceTransaction>>;
}

/// Finds live objects for the references in the log.
pub trait ParticipantResolver: Send + Sync {
    /// Resolves a logged participant reference.
    fn resolve(
        &self,
        coordinator: &CoordinatorId,
        reference: &ParticipantRef,
    ) -> Option<Arc<dyn Participant>>;

    /// Resolves a logged superior URI.
    fn resolve_superior(&self, _uri: &str) -> Option<Arc<dyn SuperiorRecoveryCoordinator>> {
        None
    }
}

/// Resolver that knows nothing; every recovered participant is
/// unresolved.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResolver;

impl ParticipantResolver for NoopResolver {
    fn resolve(&self, _: &CoordinatorId, _: &ParticipantRef) -> Option<Arc<dyn Participant>> {
        None
    }
}

/// Stand-in for a recovered participant the resolver could not find.
///
/// Every call fails as unavailable, so the coordinator keeps the
/// transaction unresolved instead of assuming an outcome.
#[derive(Debug, Clone)]
pub struct UnresolvedParticipant {
    reference: ParticipantRef,
}

impl UnresolvedParticipant {
    /// Creates a stand-in for `reference`.
    #[must_use]
    pub fn new(reference: ParticipantRef) -> Self {
        Self { reference }
    }

    fn unavailable(&self) -> ParticipantError {
        ParticipantError::Unavailable(format!("{} not resolved after recovery", self.reference))
    }
}

impl Participant for UnresolvedParticipant {
    fn prepare(&self) -> ParticipantResult<Vote> {
        Err(self.unavailable())
    }

    fn commit(&self, _one_phase: bool) -> ParticipantResult<()> {
        Err(self.unavailable())
    }

    fn rollback(&self) -> ParticipantResult<()> {
        Err(self.unavailable())
    }

    fn forget(&self) {}

    fn recover(&self) -> bool {
        false
    }

    fn uri(&self) -> Option<String> {
        Some(self.reference.as_str().to_string())
    }
}

/// Participant that forces its transaction to roll back.
///
/// Enlist it to mark a transaction rollback-only: it votes NO and
/// refuses to commit.
#[derive(Debug, Default, Clone, Copy)]
pub struct RollbackOnlyParticipant;

impl Participant for RollbackOnlyParticipant {
    fn prepare(&self) -> ParticipantResult<Vote> {
        Err(ParticipantError::Rollback)
    }

    fn commit(&self, _one_phase: bool) -> ParticipantResult<()> {
        Err(ParticipantError::Rollback)
    }

    fn rollback(&self) -> ParticipantResult<()> {
        Ok(())
    }

    fn forget(&self) {}

    fn recover(&self) -> bool {
        false
    }
}
