//! Scripted participants, a resolver and a superior for protocol tests.
//!
//! Every [`ScriptedParticipant`] writes the calls it receives into a
//! shared [`CallJournal`], so a test can assert on the global order of
//! calls across participants.

use concord_core::{
    Coordinator, CoordinatorId, Decision, Participant, ParticipantError, ParticipantRef,
    ParticipantResolver, ParticipantResult, SuperiorRecoveryCoordinator, Vote,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// A call received by a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    /// `prepare()`.
    Prepare,
    /// `commit(one_phase)`.
    Commit {
        /// The flag the coordinator passed.
        one_phase: bool,
    },
    /// `rollback()`.
    Rollback,
    /// `forget()`.
    Forget,
    /// `recover()`.
    Recover,
}

/// Calls received by a group of participants, in the order they arrived.
#[derive(Debug, Default)]
pub struct CallJournal {
    calls: Mutex<Vec<(String, Call)>>,
}

impl CallJournal {
    /// Creates an empty, shareable journal.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, name: &str, call: Call) {
        self.calls.lock().push((name.to_string(), call));
    }

    /// Every call so far.
    pub fn calls(&self) -> Vec<(String, Call)> {
        self.calls.lock().clone()
    }

    /// Calls received by `name`.
    pub fn calls_to(&self, name: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, c)| *c)
            .collect()
    }

    /// Names of the participants that received `call`, in call order.
    pub fn names_for(&self, call: Call) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|(_, c)| *c == call)
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Number of calls equal to `call`.
    pub fn count(&self, call: Call) -> usize {
        self.calls.lock().iter().filter(|(_, c)| *c == call).count()
    }

    /// Forgets every recorded call.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

/// A participant whose answers are fixed up front.
///
/// By default it votes YES and confirms every commit and rollback.
/// Replies queued with [`ScriptedParticipant::commit_replies`] or
/// [`ScriptedParticipant::rollback_replies`] are used one per call;
/// once the queue is empty the participant confirms again.
pub struct ScriptedParticipant {
    name: String,
    uri: Option<String>,
    journal: Arc<CallJournal>,
    vote: ParticipantResult<Vote>,
    commit_replies: Mutex<VecDeque<ParticipantResult<()>>>,
    rollback_replies: Mutex<VecDeque<ParticipantResult<()>>>,
    recognizes: bool,
}

impl ScriptedParticipant {
    /// A participant named `name` that votes YES.
    pub fn new(name: &str, journal: &Arc<CallJournal>) -> Self {
        Self {
            name: name.to_string(),
            uri: None,
            journal: Arc::clone(journal),
            vote: Ok(Vote::Yes),
            commit_replies: Mutex::new(VecDeque::new()),
            rollback_replies: Mutex::new(VecDeque::new()),
            recognizes: true,
        }
    }

    /// Gives the participant a URI, so it is logged under `uri` and can
    /// be resolved after a restart.
    pub fn with_uri(mut self, uri: &str) -> Self {
        self.uri = Some(uri.to_string());
        self
    }

    /// Votes `vote`.
    pub fn vote(mut self, vote: Vote) -> Self {
        self.vote = Ok(vote);
        self
    }

    /// Votes NO.
    pub fn vote_no(mut self) -> Self {
        self.vote = Err(ParticipantError::Rollback);
        self
    }

    /// Fails the prepare call with an unknown outcome.
    pub fn fail_prepare(mut self, message: &str) -> Self {
        self.vote = Err(ParticipantError::Failed(message.to_string()));
        self
    }

    /// Queues replies for the next commit calls.
    pub fn commit_replies(self, replies: impl IntoIterator<Item = ParticipantResult<()>>) -> Self {
        self.commit_replies.lock().extend(replies);
        self
    }

    /// Queues replies for the next rollback calls.
    pub fn rollback_replies(self, replies: impl IntoIterator<Item = ParticipantResult<()>>) -> Self {
        self.rollback_replies.lock().extend(replies);
        self
    }

    /// Answers `false` to `recover()`.
    pub fn forgetful(mut self) -> Self {
        self.recognizes = false;
        self
    }

    /// Wraps the participant for enlistment.
    pub fn into_arc(self) -> Arc<dyn Participant> {
        Arc::new(self)
    }

    /// The participant's name in the journal.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ScriptedParticipant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedParticipant")
            .field("name", &self.name)
            .field("vote", &self.vote)
            .finish_non_exhaustive()
    }
}

impl Participant for ScriptedParticipant {
    fn prepare(&self) -> ParticipantResult<Vote> {
        self.journal.record(&self.name, Call::Prepare);
        self.vote.clone()
    }

    fn commit(&self, one_phase: bool) -> ParticipantResult<()> {
        self.journal.record(&self.name, Call::Commit { one_phase });
        self.commit_replies.lock().pop_front().unwrap_or(Ok(()))
    }

    fn rollback(&self) -> ParticipantResult<()> {
        self.journal.record(&self.name, Call::Rollback);
        self.rollback_replies.lock().pop_front().unwrap_or(Ok(()))
    }

    fn forget(&self) {
        self.journal.record(&self.name, Call::Forget);
    }

    fn recover(&self) -> bool {
        self.journal.record(&self.name, Call::Recover);
        self.recognizes
    }

    fn uri(&self) -> Option<String> {
        self.uri.clone()
    }
}

/// Resolver backed by maps from logged references and URIs to objects.
#[derive(Default)]
pub struct MapResolver {
    participants: Mutex<HashMap<String, Arc<dyn Participant>>>,
    superiors: Mutex<HashMap<String, Arc<dyn SuperiorRecoveryCoordinator>>>,
}

impl MapResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `reference` to `participant`.
    pub fn insert(&self, reference: &str, participant: Arc<dyn Participant>) {
        self.participants
            .lock()
            .insert(reference.to_string(), participant);
    }

    /// Resolves superior `uri` to `superior`.
    pub fn insert_superior(&self, uri: &str, superior: Arc<dyn SuperiorRecoveryCoordinator>) {
        self.superiors.lock().insert(uri.to_string(), superior);
    }
}

impl ParticipantResolver for MapResolver {
    fn resolve(
        &self,
        _coordinator: &CoordinatorId,
        reference: &ParticipantRef,
    ) -> Option<Arc<dyn Participant>> {
        self.participants.lock().get(reference.as_str()).cloned()
    }

    fn resolve_superior(&self, uri: &str) -> Option<Arc<dyn SuperiorRecoveryCoordinator>> {
        self.superiors.lock().get(uri).cloned()
    }
}

/// A superior that records replay requests and optionally answers them.
#[derive(Debug)]
pub struct RecordingSuperior {
    uri: String,
    answer: Option<Decision>,
    requests: Mutex<Vec<CoordinatorId>>,
}

impl RecordingSuperior {
    /// A superior that only records requests.
    pub fn new(uri: &str) -> Arc<Self> {
        Arc::new(Self {
            uri: uri.to_string(),
            answer: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// A superior that answers each request by resending `decision`.
    pub fn answering(uri: &str, decision: Decision) -> Arc<Self> {
        Arc::new(Self {
            uri: uri.to_string(),
            answer: Some(decision),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Coordinators that asked for a replay, in order.
    pub fn requests(&self) -> Vec<CoordinatorId> {
        self.requests.lock().clone()
    }

    /// Number of replay requests received.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl SuperiorRecoveryCoordinator for RecordingSuperior {
    fn uri(&self) -> String {
        self.uri.clone()
    }

    fn replay_completion(&self, coordinator: &Coordinator) -> ParticipantResult<()> {
        self.requests.lock().push(coordinator.id().clone());
        let outcome = match self.answer {
            None => return Ok(()),
            Some(Decision::Commit) => coordinator.commit(false),
            Some(Decision::Rollback) => coordinator.rollback(),
        };
        outcome.map_err(|e| ParticipantError::Failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_keeps_arrival_order() {
        let journal = CallJournal::new();
        let a = ScriptedParticipant::new("a", &journal);
        let b = ScriptedParticipant::new("b", &journal).vote_no();

        assert_eq!(a.prepare(), Ok(Vote::Yes));
        assert_eq!(b.prepare(), Err(ParticipantError::Rollback));
        a.rollback().unwrap();

        assert_eq!(
            journal.calls(),
            vec![
                ("a".to_string(), Call::Prepare),
                ("b".to_string(), Call::Prepare),
                ("a".to_string(), Call::Rollback),
            ]
        );
        assert_eq!(journal.names_for(Call::Prepare), ["a", "b"]);
        assert_eq!(journal.calls_to("b"), vec![Call::Prepare]);
    }

    #[test]
    fn queued_replies_then_confirm() {
        let journal = CallJournal::new();
        let p = ScriptedParticipant::new("p", &journal).commit_replies([
            Err(ParticipantError::Unavailable("down".into())),
            Err(ParticipantError::HeurRollback),
        ]);

        assert!(p.commit(false).is_err());
        assert_eq!(p.commit(false), Err(ParticipantError::HeurRollback));
        assert_eq!(p.commit(false), Ok(()));
        assert_eq!(journal.count(Call::Commit { one_phase: false }), 3);
    }

    #[test]
    fn resolver_finds_by_reference() {
        let journal = CallJournal::new();
        let resolver = MapResolver::new();
        resolver.insert("db://orders", ScriptedParticipant::new("orders", &journal).into_arc());

        let id = CoordinatorId::new("tm:1");
        assert!(resolver.resolve(&id, &ParticipantRef::new("db://orders")).is_some());
        assert!(resolver.resolve(&id, &ParticipantRef::new("db://billing")).is_none());
        assert!(resolver.resolve_superior("tm://root").is_none());
    }
}
