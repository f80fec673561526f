//! Online-presence tracking.
//!
//! The gateway pushes `userOnline` events with an `online` flag; this
//! module folds them into a set of `"{role}_{id}"` keys. Presence is
//! ephemeral server state, so the whole set is dropped on reconnect and
//! rebuilt from the snapshot the gateway replays after `join`.

use std::collections::HashSet;

use parking_lot::Mutex;

use venturechat_proto::event::PresenceNotice;
use venturechat_proto::identity::Identity;

/// Set of currently-online users, shared between tasks.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    online: Mutex<HashSet<String>>,
}

impl PresenceTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a presence change and returns the affected identity.
    pub fn apply(&self, notice: &PresenceNotice) -> Identity {
        let identity = notice.identity();
        let mut online = self.online.lock();
        if notice.online {
            online.insert(identity.presence_key());
        } else {
            online.remove(&identity.presence_key());
        }
        identity
    }

    /// Whether the given user is currently online.
    #[must_use]
    pub fn is_online(&self, identity: Identity) -> bool {
        self.online.lock().contains(&identity.presence_key())
    }

    /// Number of users currently online.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.online.lock().len()
    }

    /// Drops all presence state. Called on disconnect, since the gateway
    /// replays a fresh snapshot after the next `join`.
    pub fn reset(&self) {
        self.online.lock().clear();
    }
}
