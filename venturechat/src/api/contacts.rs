//! Contact directory backfill.
//!
//! The two directory endpoints return incompatible shapes: the developer
//! list is an array of objects with names, while the entrepreneur list is
//! a bare id array wrapped in an object. Both are normalized into
//! [`Contact`] here, at the boundary, so nothing downstream ever sees the
//! raw shapes.

use std::collections::HashSet;

use serde::Deserialize;
use tracing::debug;

use venturechat_proto::identity::{Identity, Role};

use super::{ApiClient, FetchError};

/// A user the local user can open a conversation with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// The counterpart's identity.
    pub identity: Identity,
    /// Human-readable name, when the endpoint provides one.
    pub display_name: Option<String>,
}

/// Raw shape of `GET /unique-developers`: `[{developer_id, fullname}]`.
#[derive(Debug, Deserialize)]
struct RawDeveloper {
    developer_id: i64,
    fullname: Option<String>,
}

/// Raw shape of `GET /unique-entrepreneurs`: `{"entrepreneurIds": [...]}`.
#[derive(Debug, Deserialize)]
struct RawEntrepreneurIds {
    #[serde(rename = "entrepreneurIds")]
    entrepreneur_ids: Vec<i64>,
}

impl ApiClient {
    /// Lists the counterparts the given user has conversations with.
    ///
    /// An entrepreneur gets the developers who contacted them (with names);
    /// a developer gets the entrepreneurs they talked to (ids only).
    /// Duplicates are collapsed, first occurrence wins.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on HTTP failure or a malformed body.
    pub async fn contacts(&self, me: Identity) -> Result<Vec<Contact>, FetchError> {
        let contacts = match me.role {
            Role::Entrepreneur => {
                let path = format!("/unique-developers?entrepreneur_id={}", me.id);
                let raw: Vec<RawDeveloper> = self.get_json(&path).await?;
                dedup(raw.into_iter().map(|dev| Contact {
                    identity: Identity::new(Role::Developer, dev.developer_id),
                    display_name: dev.fullname,
                }))
            }
            Role::Developer => {
                let path = format!("/unique-entrepreneurs?developer_id={}", me.id);
                let raw: RawEntrepreneurIds = self.get_json(&path).await?;
                dedup(raw.entrepreneur_ids.into_iter().map(|id| Contact {
                    identity: Identity::new(Role::Entrepreneur, id),
                    display_name: None,
                }))
            }
        };
        debug!(count = contacts.len(), "fetched contact directory");
        Ok(contacts)
    }
}

fn dedup(raw: impl Iterator<Item = Contact>) -> Vec<Contact> {
    let mut seen = HashSet::new();
    raw.filter(|c| seen.insert(c.identity)).collect()
}
