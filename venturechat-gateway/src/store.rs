//! In-memory message persistence and directory queries.
//!
//! Backs the REST endpoints and the delivery-ack flow. Records live in a
//! single vector behind an async `RwLock`; server ids come from an atomic
//! counter so they stay monotonically increasing across concurrent
//! appends.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::Serialize;
use tokio::sync::RwLock;

use venturechat_proto::identity::{Identity, Role};
use venturechat_proto::record::MessageRecord;

/// One entry of the developer directory response.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeveloperContact {
    /// The developer's id.
    pub developer_id: i64,
    /// Display name; synthesized since the gateway has no user table.
    pub fullname: String,
}

/// The entrepreneur directory response wrapper.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EntrepreneurIdsResponse {
    /// Distinct entrepreneur ids, first-contact order.
    #[serde(rename = "entrepreneurIds")]
    pub entrepreneur_ids: Vec<i64>,
}

/// Append-only message store with directory queries.
#[derive(Debug, Default)]
pub struct HistoryStore {
    records: RwLock<Vec<MessageRecord>>,
    next_id: AtomicI64,
}

impl HistoryStore {
    /// Creates an empty store; ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Persists a record: assigns the next server id, marks it unread, and
    /// strips the client correlation id. Returns the persisted record.
    pub async fn append(&self, mut record: MessageRecord) -> MessageRecord {
        record.id = Some(self.next_id.fetch_add(1, Ordering::Relaxed));
        record.is_read = Some(false);
        record.temp_id = None;
        self.records.write().await.push(record.clone());
        record
    }

    /// All messages between two users, in either direction, sorted by
    /// timestamp ascending (ties keep append order).
    pub async fn conversation(&self, a: Identity, b: Identity) -> Vec<MessageRecord> {
        let records = self.records.read().await;
        let mut out: Vec<MessageRecord> = records
            .iter()
            .filter(|r| r.between(a, b))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.timestamp);
        out
    }

    /// Distinct developers who exchanged messages with the given
    /// entrepreneur, first-contact order, with synthesized names.
    pub async fn developer_contacts(&self, entrepreneur_id: i64) -> Vec<DeveloperContact> {
        let entrepreneur = Identity::new(Role::Entrepreneur, entrepreneur_id);
        let mut seen = Vec::new();
        for record in self.records.read().await.iter() {
            let Some(other) = record.counterpart_of(entrepreneur) else {
                continue;
            };
            if other.role == Role::Developer && !seen.contains(&other.id) {
                seen.push(other.id);
            }
        }
        seen.into_iter()
            .map(|developer_id| DeveloperContact {
                developer_id,
                fullname: format!("Developer {developer_id}"),
            })
            .collect()
    }

    /// Distinct entrepreneurs who exchanged messages with the given
    /// developer, first-contact order.
    pub async fn entrepreneur_ids(&self, developer_id: i64) -> Vec<i64> {
        let developer = Identity::new(Role::Developer, developer_id);
        let mut seen = Vec::new();
        for record in self.records.read().await.iter() {
            let Some(other) = record.counterpart_of(developer) else {
                continue;
            };
            if other.role == Role::Entrepreneur && !seen.contains(&other.id) {
                seen.push(other.id);
            }
        }
        seen
    }

    /// Number of persisted records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
