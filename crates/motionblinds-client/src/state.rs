use motionblinds_core::state::{ChangeSet, StateMap};
use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::broadcast;

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Where a state replacement came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UpdateOrigin {
    /// A ReadDevice acknowledgement.
    Read,
    /// An unsolicited multicast report.
    Report,
}

/// Notification raised after every state replacement.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub changes: ChangeSet,
    pub origin: UpdateOrigin,
}

/// Last raw state of a bridge or device.
#[derive(Debug)]
pub struct StateStore {
    state: Mutex<StateMap>,
    updates: broadcast::Sender<StateUpdate>,
}

impl StateStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(StateMap::new()),
            updates,
        }
    }

    /// Replaces the state wholesale and notifies subscribers with the
    /// difference. Subscribers are notified even when nothing changed.
    pub fn set_state(&self, new: StateMap, origin: UpdateOrigin) -> ChangeSet {
        let mut state = self.lock();
        let changes = ChangeSet::diff(&state, &new);
        *state = new;
        let _ = self.updates.send(StateUpdate {
            changes: changes.clone(),
            origin,
        });
        changes
    }

    pub fn snapshot(&self) -> StateMap {
        self.lock().clone()
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.lock().get(field).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateUpdate> {
        self.updates.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateMap> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
