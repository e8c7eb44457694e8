//! State transition observers.

use crate::types::{CoordinatorId, TxState};
use std::fmt;
use std::sync::Arc;

/// Observer of coordinator state transitions.
///
/// Called with the coordinator's lock held, right after the transition
/// has been logged. Implementations must not call back into the same
/// coordinator.
pub trait StateListener: Send + Sync {
    /// A coordinator moved from `from` to `to`.
    fn on_transition(&self, coordinator: &CoordinatorId, from: TxState, to: TxState);
}

/// Handle returned by `add_listener`, used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listeners of one coordinator, notified in registration order.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: u64,
    listeners: Vec<(ListenerId, Arc<dyn StateListener>)>,
}

impl ListenerRegistry {
    pub fn add(&mut self, listener: Arc<dyn StateListener>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Returns `false` if the listener was not registered.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub fn notify(&self, coordinator: &CoordinatorId, from: TxState, to: TxState) {
        for (_, listener) in &self.listeners {
            listener.on_transition(coordinator, from, to);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl StateListener for Recorder {
        fn on_transition(&self, _: &CoordinatorId, from: TxState, to: TxState) {
            self.seen.lock().push(format!("{}:{from}->{to}", self.name));
        }
    }

    #[test]
    fn notifies_in_registration_order_and_respects_removal() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ListenerRegistry::default();
        let first = registry.add(Arc::new(Recorder {
            name: "a",
            seen: Arc::clone(&seen),
        }));
        registry.add(Arc::new(Recorder {
            name: "b",
            seen: Arc::clone(&seen),
        }));

        let id = CoordinatorId::new("tm:1");
        registry.notify(&id, TxState::Active, TxState::Preparing);
        assert!(registry.remove(first));
        assert!(!registry.remove(first));
        registry.notify(&id, TxState::Preparing, TxState::InDoubt);

        assert_eq!(
            *seen.lock(),
            vec![
                "a:ACTIVE->PREPARING",
                "b:ACTIVE->PREPARING",
                "b:PREPARING->IN_DOUBT",
            ]
        );
        assert_eq!(registry.len(), 1);
    }
}
