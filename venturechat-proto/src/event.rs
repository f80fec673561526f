//! Realtime event envelope and JSON codec.
//!
//! Every frame on the gateway WebSocket is a JSON text message of the form
//! `{"event": <name>, "data": <payload>}`. The event names are the wire
//! contract and must stay bit-exact: outbound `join` / `sendMessage` /
//! `typing`, inbound `newMessage` / `userTyping` / `userOnline` /
//! `messageDelivered`. Connection lifecycle (`connect`, `connect_error`)
//! is not framed; the transport layer surfaces it as state events.

use serde::{Deserialize, Serialize};

use crate::identity::{Identity, Role};
use crate::record::MessageRecord;

/// Events emitted by a client toward the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Joins the per-identity room; must be the first frame after connect.
    #[serde(rename = "join")]
    Join(Identity),
    /// Sends a chat message; carries a `tempId` for the delivery ack.
    #[serde(rename = "sendMessage")]
    SendMessage(MessageRecord),
    /// Signals that the sender started or stopped typing.
    #[serde(rename = "typing")]
    Typing(TypingSignal),
}

/// Events delivered by the gateway to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// A new persisted message addressed to this client.
    #[serde(rename = "newMessage")]
    NewMessage(MessageRecord),
    /// A counterpart started or stopped typing.
    #[serde(rename = "userTyping")]
    UserTyping(TypingNotice),
    /// A user came online or went offline.
    #[serde(rename = "userOnline")]
    UserOnline(PresenceNotice),
    /// The gateway persisted a sent message and assigned its id.
    #[serde(rename = "messageDelivered")]
    MessageDelivered(DeliveryAck),
}

/// Outbound typing payload, addressed to a specific counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSignal {
    /// Role of the typing user.
    pub sender_type: Role,
    /// Id of the typing user.
    pub sender_id: i64,
    /// Role of the counterpart being notified.
    pub receiver_type: Role,
    /// Id of the counterpart being notified.
    pub receiver_id: i64,
    /// `true` on keystroke, `false` after the quiet period.
    #[serde(rename = "isTyping")]
    pub is_typing: bool,
}

impl TypingSignal {
    /// Builds a typing signal from sender to receiver.
    #[must_use]
    pub const fn new(sender: Identity, receiver: Identity, is_typing: bool) -> Self {
        Self {
            sender_type: sender.role,
            sender_id: sender.id,
            receiver_type: receiver.role,
            receiver_id: receiver.id,
            is_typing,
        }
    }
}

/// Inbound typing payload; the gateway strips the receiver fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingNotice {
    /// Role of the typing user.
    pub sender_type: Role,
    /// Id of the typing user.
    pub sender_id: i64,
    /// Whether the user is currently typing.
    #[serde(rename = "isTyping")]
    pub is_typing: bool,
}

impl TypingNotice {
    /// Returns the typing user as an [`Identity`].
    #[must_use]
    pub const fn sender(&self) -> Identity {
        Identity::new(self.sender_type, self.sender_id)
    }
}

/// Presence change payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceNotice {
    /// Role of the user whose presence changed.
    #[serde(rename = "type")]
    pub role: Role,
    /// Id of the user whose presence changed.
    pub id: i64,
    /// `true` when the user connected, `false` when they dropped.
    pub online: bool,
}

impl PresenceNotice {
    /// Returns the affected user as an [`Identity`].
    #[must_use]
    pub const fn identity(&self) -> Identity {
        Identity::new(self.role, self.id)
    }
}

/// Delivery acknowledgment: correlates a client `tempId` with the
/// server-assigned message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAck {
    /// The client correlation id from the original `sendMessage`.
    #[serde(rename = "tempId")]
    pub temp_id: String,
    /// The authoritative server-assigned message id.
    pub id: i64,
}

/// Errors from encoding or decoding event frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serializing an event to JSON failed.
    #[error("event encode error: {0}")]
    Encode(#[source] serde_json::Error),
    /// An inbound frame was not a recognized event.
    #[error("event decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encodes a client event as a JSON frame.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(CodecError::Encode)
}

/// Decodes a client event from a JSON frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for unknown event names or malformed
/// payloads.
pub fn decode_client(frame: &str) -> Result<ClientEvent, CodecError> {
    serde_json::from_str(frame).map_err(CodecError::Decode)
}

/// Encodes a server event as a JSON frame.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(CodecError::Encode)
}

/// Decodes a server event from a JSON frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for unknown event names or malformed
/// payloads.
pub fn decode_server(frame: &str) -> Result<ServerEvent, CodecError> {
    serde_json::from_str(frame).map_err(CodecError::Decode)
}
