//! Persisted message record shape and timestamp boundary handling.
//!
//! [`MessageRecord`] is the flat field layout shared by the REST history
//! endpoint and the `sendMessage` / `newMessage` realtime events. The
//! source system persists timestamps as UTC-naive strings (no zone
//! suffix); all parsing and formatting goes through this module so the
//! UTC interpretation happens exactly once, at the wire boundary.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{Identity, Role};

/// Maximum allowed message body length in bytes (8 KB).
pub const MAX_BODY_LEN: usize = 8 * 1024;

/// A chat message as it appears on the wire.
///
/// The optional `id` is the server-assigned identifier; records composed on
/// the client carry a `tempId` instead, which the gateway echoes back in the
/// `messageDelivered` acknowledgment so the client can correlate the two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Role of the sending user.
    pub sender_type: Role,
    /// Id of the sending user.
    pub sender_id: i64,
    /// Role of the receiving user.
    pub receiver_type: Role,
    /// Id of the receiving user.
    pub receiver_id: i64,
    /// Message body text.
    pub message: String,
    /// When the message was sent, UTC (naive string on the wire).
    #[serde(with = "wire_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Server-assigned message id, absent until the gateway persists it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Whether the receiver has read the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
    /// Client correlation id, echoed back in `messageDelivered`.
    #[serde(rename = "tempId", default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

impl MessageRecord {
    /// Returns the sender as an [`Identity`].
    #[must_use]
    pub const fn sender(&self) -> Identity {
        Identity::new(self.sender_type, self.sender_id)
    }

    /// Returns the receiver as an [`Identity`].
    #[must_use]
    pub const fn receiver(&self) -> Identity {
        Identity::new(self.receiver_type, self.receiver_id)
    }

    /// Returns the other party of the conversation, or `None` if `me` is
    /// neither sender nor receiver.
    #[must_use]
    pub fn counterpart_of(&self, me: Identity) -> Option<Identity> {
        if self.sender() == me {
            Some(self.receiver())
        } else if self.receiver() == me {
            Some(self.sender())
        } else {
            None
        }
    }

    /// Checks whether this record belongs to the conversation between the
    /// two given identities, in either direction.
    #[must_use]
    pub fn between(&self, a: Identity, b: Identity) -> bool {
        (self.sender() == a && self.receiver() == b)
            || (self.sender() == b && self.receiver() == a)
    }
}

/// Error returned when a wire timestamp cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid wire timestamp: {0}")]
pub struct ParseTimestampError(pub String);

/// Parses a wire timestamp into UTC.
///
/// The source stores naive strings like `2024-03-01T09:30:00.000`; those
/// are interpreted as UTC by appending the marker here, at the boundary,
/// rather than ad hoc at each read site. Strings that already carry an
/// offset (`Z` or `+hh:mm`) are honored as-is. A space separator between
/// date and time is accepted as well.
///
/// # Errors
///
/// Returns [`ParseTimestampError`] if the string matches none of the
/// accepted layouts.
pub fn parse_wire_timestamp(s: &str) -> Result<DateTime<Utc>, ParseTimestampError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, layout) {
            return Ok(naive.and_utc());
        }
    }
    Err(ParseTimestampError(s.to_string()))
}

/// Formats a UTC timestamp the way the source persists it: naive, no zone
/// suffix, millisecond precision.
#[must_use]
pub fn format_wire_timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

/// Drops sub-millisecond precision from a timestamp.
///
/// The wire carries milliseconds only, so a timestamp that will travel
/// through [`format_wire_timestamp`] must be clamped first or it will no
/// longer compare equal to its own round-tripped copy.
#[must_use]
pub fn truncate_to_wire_precision(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(t.timestamp_millis()).unwrap_or(t)
}

/// Serde adapter serializing [`DateTime<Utc>`] as a naive wire string.
pub mod wire_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes the timestamp as a UTC-naive string.
    ///
    /// # Errors
    ///
    /// Forwards serializer errors.
    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&super::format_wire_timestamp(*t))
    }

    /// Deserializes a UTC-naive (or offset-carrying) timestamp string.
    ///
    /// # Errors
    ///
    /// Fails if the string matches no accepted layout.
    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(de)?;
        super::parse_wire_timestamp(&s).map_err(serde::de::Error::custom)
    }
}
