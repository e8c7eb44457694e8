//! The coordinator of one global transaction.

use crate::config::Config;
use crate::dispatch::Enlisted;
use crate::error::{CoreError, CoreResult};
use crate::listener::{ListenerId, ListenerRegistry, StateListener};
use crate::log::{LogManager, LogRecord};
use crate::participant::{
    CompositeTransaction, Participant, ParticipantResolver, SuperiorRecoveryCoordinator,
    TransactionalResource, UnresolvedParticipant,
};
use crate::state::{Ledger, StateHandler};
use crate::types::{CoordinatorId, Decision, HeuristicOutcome, ParticipantRef, TxState, Vote};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

/// The part of [`Config`] a coordinator consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Ticks spent in doubt before a decision is forced.
    pub max_indoubt_ticks: u32,
    /// Ticks an active transaction may last before it is rolled back.
    pub timeout_ticks: u32,
    /// Whether a subordinate forces commit rather than rollback.
    pub prefer_heuristic_commit: bool,
    /// Whether participant calls are made in parallel.
    pub concurrent_dispatch: bool,
}

impl From<&Config> for CoordinatorSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_indoubt_ticks: config.max_indoubt_ticks,
            timeout_ticks: config.timeout_ticks,
            prefer_heuristic_commit: config.prefer_heuristic_commit,
            concurrent_dispatch: config.concurrent_dispatch,
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// A point-in-time view of a coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    /// Coordinator id.
    pub id: CoordinatorId,
    /// Current state.
    pub state: TxState,
    /// Whether the coordinator is a root.
    pub root: bool,
    /// Participants in enlistment order.
    pub participants: Vec<ParticipantRef>,
    /// The decision, once taken.
    pub decision: Option<Decision>,
    /// Heuristic outcomes in enlistment order.
    pub heuristics: Vec<(ParticipantRef, HeuristicOutcome)>,
    /// Whether the current state was rebuilt from the log.
    pub recovered: bool,
}

pub(crate) struct CoordinatorInner {
    pub id: CoordinatorId,
    pub participants: Vec<Enlisted>,
    pub handler: StateHandler,
    pub superior: Option<Arc<dyn SuperiorRecoveryCoordinator>>,
    pub superior_uri: Option<String>,
    pub settings: CoordinatorSettings,
    pub log: Arc<LogManager>,
    pub listeners: ListenerRegistry,
    /// Set by a timeout tick; the request is sent once the lock is released.
    pub replay_due: bool,
}

impl CoordinatorInner {
    /// Installs `next` after logging it.
    ///
    /// This is the only place the state changes. If the record cannot be
    /// made durable the current handler stays installed.
    pub fn set_state_handler(&mut self, next: StateHandler) -> CoreResult<()> {
        let record = next.log_record(self);
        if let Err(e) = self.log.append(&record) {
            tracing::error!(
                coordinator = %self.id,
                state = %record.state,
                error = %e,
                "could not log state transition"
            );
            return Err(CoreError::sys(format!(
                "could not log {} for {}: {e}",
                record.state, self.id
            )));
        }

        let from = self.handler.state();
        let to = next.state();
        self.handler = next;
        if from != to {
            tracing::debug!(coordinator = %self.id, %from, %to, "state transition");
            self.listeners.notify(&self.id, from, to);
        }
        Ok(())
    }

    /// Replaces the handler with one in the same state whose counters
    /// moved on. Nothing is logged.
    pub fn refresh_handler(&mut self, next: StateHandler) {
        debug_assert_eq!(self.handler.state(), next.state());
        self.handler = next;
    }

    pub fn is_root(&self) -> bool {
        self.superior_uri.is_none()
    }

    /// Participants that have not heard the decision yet.
    pub fn awaiting(&self, ledger: &Ledger) -> Vec<Enlisted> {
        self.participants
            .iter()
            .filter(|e| ledger.awaits_decision(&e.reference))
            .cloned()
            .collect()
    }
}

/// Coordinates one global transaction.
///
/// Every operation takes the coordinator's lock, so calls on one
/// coordinator are serialized while different coordinators run in
/// parallel. Participant calls are made with the lock held.
pub struct Coordinator {
    id: CoordinatorId,
    inner: Mutex<CoordinatorInner>,
}

impl Coordinator {
    pub(crate) fn new(
        id: CoordinatorId,
        settings: CoordinatorSettings,
        log: Arc<LogManager>,
        superior: Option<Arc<dyn SuperiorRecoveryCoordinator>>,
    ) -> Self {
        let superior_uri = superior.as_ref().map(|s| s.uri());
        Self::build(id, settings, log, superior, superior_uri, Vec::new(), StateHandler::active())
    }

    /// Rebuilds a coordinator from its latest log record.
    ///
    /// Participants and the superior are looked up through `resolver`;
    /// any it cannot find are replaced by stand-ins whose outcome is
    /// unknown.
    pub(crate) fn from_record(
        record: &LogRecord,
        settings: CoordinatorSettings,
        log: Arc<LogManager>,
        resolver: &dyn ParticipantResolver,
    ) -> Self {
        let id = record.coordinator_id.clone();
        let participants = record
            .participants
            .iter()
            .map(|entry| {
                let participant = resolver
                    .resolve(&id, &entry.reference)
                    .unwrap_or_else(|| {
                        tracing::warn!(
                            coordinator = %id,
                            participant = %entry.reference,
                            "participant not resolved after restart"
                        );
                        let unresolved: Arc<dyn Participant> =
                            Arc::new(UnresolvedParticipant::new(entry.reference.clone()));
                        unresolved
                    });
                Enlisted {
                    reference: entry.reference.clone(),
                    participant,
                }
            })
            .collect();
        let superior = record.superior.as_deref().and_then(|uri| {
            let resolved = resolver.resolve_superior(uri);
            if resolved.is_none() {
                tracing::warn!(coordinator = %id, superior = uri, "superior not resolved after restart");
            }
            resolved
        });

        Self::build(
            id,
            settings,
            log,
            superior,
            record.superior.clone(),
            participants,
            StateHandler::from_record(record),
        )
    }

    fn build(
        id: CoordinatorId,
        settings: CoordinatorSettings,
        log: Arc<LogManager>,
        superior: Option<Arc<dyn SuperiorRecoveryCoordinator>>,
        superior_uri: Option<String>,
        participants: Vec<Enlisted>,
        handler: StateHandler,
    ) -> Self {
        Self {
            id: id.clone(),
            inner: Mutex::new(CoordinatorInner {
                id,
                participants,
                handler,
                superior,
                superior_uri,
                settings,
                log,
                listeners: ListenerRegistry::default(),
                replay_due: false,
            }),
        }
    }

    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, CoordinatorInner> {
        self.inner.lock()
    }

    /// Returns the coordinator id.
    #[must_use]
    pub fn id(&self) -> &CoordinatorId {
        &self.id
    }

    /// Whether this coordinator has no superior.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.inner.lock().is_root()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TxState {
        self.inner.lock().handler.state()
    }

    /// Returns participant references in enlistment order.
    #[must_use]
    pub fn participants(&self) -> Vec<ParticipantRef> {
        self.inner
            .lock()
            .participants
            .iter()
            .map(|e| e.reference.clone())
            .collect()
    }

    /// Returns the heuristic outcomes known so far, in enlistment order.
    #[must_use]
    pub fn heuristic_outcomes(&self) -> Vec<(ParticipantRef, HeuristicOutcome)> {
        let inner = self.inner.lock();
        inner
            .handler
            .ledger()
            .heuristics_in_order(inner.participants.iter().map(|e| &e.reference))
    }

    /// Returns a snapshot of the coordinator.
    #[must_use]
    pub fn snapshot(&self) -> CoordinatorSnapshot {
        let inner = self.inner.lock();
        let ledger = inner.handler.ledger();
        CoordinatorSnapshot {
            id: inner.id.clone(),
            state: inner.handler.state(),
            root: inner.is_root(),
            participants: inner.participants.iter().map(|e| e.reference.clone()).collect(),
            decision: ledger.decision,
            heuristics: ledger.heuristics_in_order(inner.participants.iter().map(|e| &e.reference)),
            recovered: inner.handler.recovered(),
        }
    }

    /// The transaction as seen by resources.
    #[must_use]
    pub fn composite(&self) -> CompositeTransaction {
        CompositeTransaction {
            coordinator_id: self.id.clone(),
            root: self.is_root(),
        }
    }

    /// Enlists a participant.
    ///
    /// Returns the reference the participant is logged under: its URI,
    /// or `<coordinator id>#<index>` if it has none.
    ///
    /// # Errors
    ///
    /// - [`CoreError::IllegalState`] once prepare has started
    /// - [`CoreError::Sys`] if a participant with the same URI is already
    ///   enlisted
    pub fn enlist(&self, participant: Arc<dyn Participant>) -> CoreResult<ParticipantRef> {
        let mut inner = self.inner.lock();
        let state = inner.handler.state();
        if state != TxState::Active {
            return Err(CoreError::illegal_state(
                &inner.id,
                state,
                "enlist after prepare has started",
            ));
        }

        let reference = participant
            .uri()
            .map_or_else(|| ParticipantRef::local(&inner.id, inner.participants.len()), ParticipantRef::new);
        if inner.participants.iter().any(|e| e.reference == reference) {
            return Err(CoreError::sys(format!(
                "participant {reference} already enlisted in {}",
                inner.id
            )));
        }

        tracing::debug!(coordinator = %inner.id, participant = %reference, "enlisted participant");
        inner.participants.push(Enlisted {
            reference: reference.clone(),
            participant,
        });
        Ok(reference)
    }

    /// Opens a branch of this transaction at `resource` and enlists its
    /// participant.
    ///
    /// # Errors
    ///
    /// [`CoreError::ResourceUnavailable`] if the resource refuses, plus
    /// the errors of [`Coordinator::enlist`].
    pub fn enlist_resource(&self, resource: &dyn TransactionalResource) -> CoreResult<ParticipantRef> {
        let branch = resource.get_resource_transaction(&self.composite())?;
        tracing::debug!(
            coordinator = %self.id,
            resource = resource.name(),
            tid = %branch.tid(),
            "opened resource transaction"
        );
        self.enlist(branch.participant())
    }

    /// Runs phase one.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Rollback`] if any participant voted NO or failed
    /// - a heuristic error if the transaction already ended heuristically
    /// - [`CoreError::IllegalState`] if the transaction already committed
    pub fn prepare(&self) -> CoreResult<Vote> {
        let mut inner = self.inner.lock();
        let handler = inner.handler.clone();
        handler.prepare(&mut inner)
    }

    /// Commits. `one_phase` is only valid before prepare.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Rollback`] if the transaction rolled back instead
    /// - a heuristic error if some participants did not commit, or their
    ///   outcome is unknown ([`CoreError::HeurHazard`]); in the latter
    ///   case the coordinator stays in doubt and keeps retrying
    /// - [`CoreError::IllegalState`] if the call is not legal now
    pub fn commit(&self, one_phase: bool) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let handler = inner.handler.clone();
        handler.commit(&mut inner, one_phase)
    }

    /// Rolls back.
    ///
    /// # Errors
    ///
    /// A heuristic error if some participants did not roll back, or
    /// [`CoreError::IllegalState`] after a commit decision.
    pub fn rollback(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let handler = inner.handler.clone();
        handler.rollback(&mut inner)
    }

    /// Drops a heuristic outcome after telling its participants to forget.
    pub fn forget(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        let handler = inner.handler.clone();
        handler.forget(&mut inner)
    }

    /// One tick of the timeout clock.
    ///
    /// Never fails: errors are logged. A replay request to the superior is
    /// sent after the lock is released.
    pub fn on_timeout(&self) {
        let superior = {
            let mut inner = self.inner.lock();
            let handler = inner.handler.clone();
            if let Err(e) = handler.on_timeout(&mut inner) {
                tracing::warn!(coordinator = %self.id, error = %e, "timeout handling failed");
            }
            if std::mem::take(&mut inner.replay_due) {
                if inner.superior.is_none() {
                    tracing::warn!(coordinator = %self.id, "no superior available for replay");
                }
                inner.superior.clone()
            } else {
                None
            }
        };

        if let Some(superior) = superior {
            if let Err(e) = superior.replay_completion(self) {
                tracing::warn!(
                    coordinator = %self.id,
                    superior = %superior.uri(),
                    error = %e,
                    "replay completion request failed"
                );
            }
        }
    }

    /// Resumes a coordinator rebuilt from the log.
    ///
    /// Heuristic outcomes reached here are logged, not returned.
    pub(crate) fn recover(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        for enlisted in &inner.participants {
            if !enlisted.participant.recover() {
                tracing::info!(
                    coordinator = %inner.id,
                    participant = %enlisted.reference,
                    "participant does not recognize the transaction"
                );
            }
        }

        let handler = inner.handler.clone();
        match handler.recover(&mut inner) {
            Err(e) if e.is_heuristic() => {
                tracing::warn!(coordinator = %self.id, error = %e, "recovered with heuristic outcome");
                Ok(())
            }
            other => other,
        }
    }

    /// Registers a state listener.
    pub fn add_listener(&self, listener: Arc<dyn StateListener>) -> ListenerId {
        self.inner.lock().listeners.add(listener)
    }

    /// Removes a listener. It receives no notification after this returns.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.lock().listeners.remove(id)
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
