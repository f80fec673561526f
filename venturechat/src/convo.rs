//! Per-counterpart conversation state.
//!
//! [`ConversationStore`] owns every message thread the local user has open,
//! keyed by the counterpart's [`Identity`]. It is a pure state container:
//! the session layer feeds it wire records and delivery acks, and reads
//! back ordered snapshots. All mutation goes through a single
//! `parking_lot` lock, so the store can be shared between the event-routing
//! task and frontend readers.
//!
//! Ordering invariant: within a conversation, messages are sorted by
//! timestamp ascending, and messages with equal timestamps keep their
//! arrival order (new arrivals land after existing ties).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use venturechat_proto::identity::Identity;
use venturechat_proto::record::{MessageRecord, truncate_to_wire_precision};

/// Delivery status of an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent optimistically, awaiting the gateway's `messageDelivered` ack.
    Pending,
    /// Acknowledged by the gateway (or received from it), id assigned.
    Confirmed,
    /// No ack arrived in time, or the send itself failed.
    Failed,
}

/// A message as held in a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Client-local id, used as the `tempId` ack correlation key.
    pub local_id: String,
    /// Server-assigned id, present once confirmed or backfilled.
    pub server_id: Option<i64>,
    /// `true` if the local user sent this message.
    pub outgoing: bool,
    /// Message body text.
    pub body: String,
    /// When the message was sent (UTC).
    pub timestamp: DateTime<Utc>,
    /// Delivery status; inbound and backfilled messages are `Confirmed`.
    pub delivery: Delivery,
}

/// Backfill status of a conversation's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// History has never been requested.
    #[default]
    NotLoaded,
    /// A history fetch is in flight.
    Loading,
    /// History has been merged at least once.
    Loaded,
    /// The last fetch failed; a retry is allowed.
    Failed,
}

#[derive(Debug, Default)]
struct Conversation {
    messages: Vec<ChatMessage>,
    typing: bool,
    unread: u32,
    load: LoadState,
}

impl Conversation {
    /// Inserts keeping timestamp order; equal timestamps go after existing
    /// entries so arrival order is preserved.
    fn insert_sorted(&mut self, msg: ChatMessage) {
        let at = self
            .messages
            .partition_point(|m| m.timestamp <= msg.timestamp);
        self.messages.insert(at, msg);
    }

    fn has_server_id(&self, id: i64) -> bool {
        self.messages.iter().any(|m| m.server_id == Some(id))
    }
}

/// Thread-safe store of all conversations for one local user.
#[derive(Debug)]
pub struct ConversationStore {
    me: Identity,
    inner: Mutex<HashMap<Identity, Conversation>>,
}

impl ConversationStore {
    /// Creates an empty store for the given local identity.
    #[must_use]
    pub fn new(me: Identity) -> Self {
        Self {
            me,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// The local user this store belongs to.
    #[must_use]
    pub const fn me(&self) -> Identity {
        self.me
    }

    /// Appends an optimistic outgoing message and returns it, with a fresh
    /// local id to carry as the `tempId` of the `sendMessage` frame.
    ///
    /// The timestamp is clamped to wire precision up front, so the stored
    /// copy compares equal to the server's echo of it in a later backfill.
    pub fn append_outgoing(
        &self,
        counterpart: Identity,
        body: String,
        timestamp: DateTime<Utc>,
    ) -> ChatMessage {
        let msg = ChatMessage {
            // v7 ids are time-ordered, which keeps retransmit logs readable.
            local_id: format!("local-{}", Uuid::now_v7()),
            server_id: None,
            outgoing: true,
            body,
            timestamp: truncate_to_wire_precision(timestamp),
            delivery: Delivery::Pending,
        };
        let mut inner = self.inner.lock();
        inner
            .entry(counterpart)
            .or_default()
            .insert_sorted(msg.clone());
        msg
    }

    /// Routes a live `newMessage` record into its conversation and returns
    /// the counterpart it landed under.
    ///
    /// Records already present (same server id) are dropped, which makes
    /// redelivery after a reconnect harmless. Records not involving the
    /// local user at all are rejected with `None`.
    pub fn append_live(&self, record: &MessageRecord) -> Option<Identity> {
        let counterpart = record.counterpart_of(self.me)?;
        let mut inner = self.inner.lock();
        let convo = inner.entry(counterpart).or_default();
        if let Some(id) = record.id {
            if convo.has_server_id(id) {
                return Some(counterpart);
            }
        }
        convo.insert_sorted(ChatMessage {
            local_id: Uuid::now_v7().to_string(),
            server_id: record.id,
            outgoing: record.sender() == self.me,
            body: record.message.clone(),
            timestamp: record.timestamp,
            delivery: Delivery::Confirmed,
        });
        Some(counterpart)
    }

    /// Confirms a pending message from a `messageDelivered` ack.
    ///
    /// Returns `false` if no message with that local id exists in the
    /// conversation (late ack for an absorbed or retried message).
    pub fn confirm_delivery(&self, counterpart: Identity, temp_id: &str, server_id: i64) -> bool {
        let mut inner = self.inner.lock();
        let Some(convo) = inner.get_mut(&counterpart) else {
            return false;
        };
        let Some(msg) = convo.messages.iter_mut().find(|m| m.local_id == temp_id) else {
            return false;
        };
        msg.server_id = Some(server_id);
        msg.delivery = Delivery::Confirmed;
        true
    }

    /// Marks a pending message failed. Only fires while the message is
    /// still `Pending`, so an ack that races the timeout wins.
    pub fn mark_failed(&self, counterpart: Identity, temp_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(convo) = inner.get_mut(&counterpart) else {
            return false;
        };
        let Some(msg) = convo.messages.iter_mut().find(|m| m.local_id == temp_id) else {
            return false;
        };
        if msg.delivery != Delivery::Pending {
            return false;
        }
        msg.delivery = Delivery::Failed;
        true
    }

    /// Flips a failed message back to pending for a retry and returns a
    /// fresh copy to resend. The retry keeps its local id so the original
    /// ack correlation still applies.
    pub fn mark_retrying(&self, counterpart: Identity, temp_id: &str) -> Option<ChatMessage> {
        let mut inner = self.inner.lock();
        let convo = inner.get_mut(&counterpart)?;
        let msg = convo
            .messages
            .iter_mut()
            .find(|m| m.local_id == temp_id && m.delivery == Delivery::Failed)?;
        msg.delivery = Delivery::Pending;
        Some(msg.clone())
    }

    /// Merges a history backfill into a conversation.
    ///
    /// Server records are authoritative: an existing message with a server
    /// id that also appears in the backfill is absorbed, as is an
    /// optimistic local whose direction, body, and timestamp match a
    /// backfilled record (its ack was lost, but the server clearly has it).
    /// Everything else already in the thread, including still-pending
    /// optimistic sends, survives the merge.
    pub fn merge_history(&self, counterpart: Identity, records: &[MessageRecord]) {
        let mut inner = self.inner.lock();
        let convo = inner.entry(counterpart).or_default();
        let old = std::mem::take(&mut convo.messages);

        for record in records {
            if record.counterpart_of(self.me) != Some(counterpart) {
                continue;
            }
            if let Some(id) = record.id {
                if convo.has_server_id(id) {
                    continue;
                }
            }
            convo.insert_sorted(ChatMessage {
                local_id: Uuid::now_v7().to_string(),
                server_id: record.id,
                outgoing: record.sender() == self.me,
                body: record.message.clone(),
                timestamp: record.timestamp,
                delivery: Delivery::Confirmed,
            });
        }

        for msg in old {
            let absorbed = match msg.server_id {
                Some(id) => convo.has_server_id(id),
                None => convo.messages.iter().any(|m| {
                    m.server_id.is_some()
                        && m.outgoing == msg.outgoing
                        && m.timestamp == msg.timestamp
                        && m.body == msg.body
                }),
            };
            if !absorbed {
                convo.insert_sorted(msg);
            }
        }
        convo.load = LoadState::Loaded;
    }

    /// Ordered snapshot of a conversation's messages.
    #[must_use]
    pub fn messages(&self, counterpart: Identity) -> Vec<ChatMessage> {
        self.inner
            .lock()
            .get(&counterpart)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    /// Counterparts with at least one known message or state entry.
    #[must_use]
    pub fn counterparts(&self) -> Vec<Identity> {
        let mut out: Vec<Identity> = self.inner.lock().keys().copied().collect();
        out.sort_unstable();
        out
    }

    /// Sets the typing flag for a counterpart.
    pub fn set_typing(&self, counterpart: Identity, typing: bool) {
        self.inner.lock().entry(counterpart).or_default().typing = typing;
    }

    /// Whether the counterpart is currently typing.
    #[must_use]
    pub fn is_typing(&self, counterpart: Identity) -> bool {
        self.inner
            .lock()
            .get(&counterpart)
            .is_some_and(|c| c.typing)
    }

    /// Bumps the unread counter for a conversation.
    pub fn note_unread(&self, counterpart: Identity) {
        let mut inner = self.inner.lock();
        let convo = inner.entry(counterpart).or_default();
        convo.unread = convo.unread.saturating_add(1);
    }

    /// Resets the unread counter, typically on conversation selection.
    pub fn clear_unread(&self, counterpart: Identity) {
        if let Some(convo) = self.inner.lock().get_mut(&counterpart) {
            convo.unread = 0;
        }
    }

    /// Current unread count for a conversation.
    #[must_use]
    pub fn unread_count(&self, counterpart: Identity) -> u32 {
        self.inner
            .lock()
            .get(&counterpart)
            .map_or(0, |c| c.unread)
    }

    /// Current backfill state for a conversation.
    #[must_use]
    pub fn load_state(&self, counterpart: Identity) -> LoadState {
        self.inner
            .lock()
            .get(&counterpart)
            .map_or(LoadState::NotLoaded, |c| c.load)
    }

    /// Records a backfill state transition.
    pub fn set_load_state(&self, counterpart: Identity, state: LoadState) {
        self.inner.lock().entry(counterpart).or_default().load = state;
    }
}
