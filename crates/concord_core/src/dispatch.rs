//! Fan-out of participant calls.

use crate::participant::{Participant, ParticipantResult};
use crate::types::ParticipantRef;
use rayon::prelude::*;
use std::sync::Arc;

/// An enlisted participant with its durable reference.
#[derive(Debug, Clone)]
pub(crate) struct Enlisted {
    pub reference: ParticipantRef,
    pub participant: Arc<dyn Participant>,
}

/// Calls `call` on every target and returns the results in target order.
///
/// Sequential dispatch calls participants in target (enlistment) order.
/// Concurrent dispatch runs the calls on the rayon pool. Either way this
/// returns only after every call has returned.
pub(crate) fn dispatch<T, F>(
    targets: &[Enlisted],
    concurrent: bool,
    call: F,
) -> Vec<(ParticipantRef, ParticipantResult<T>)>
where
    T: Send,
    F: Fn(&dyn Participant) -> ParticipantResult<T> + Send + Sync,
{
    let invoke = |target: &Enlisted| {
        let result = call(target.participant.as_ref());
        if let Err(e) = &result {
            tracing::debug!(participant = %target.reference, error = %e, "participant call failed");
        }
        (target.reference.clone(), result)
    };

    if concurrent && targets.len() > 1 {
        targets.par_iter().map(invoke).collect()
    } else {
        targets.iter().map(invoke).collect()
    }
}
