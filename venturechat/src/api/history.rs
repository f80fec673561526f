//! Conversation history backfill.

use tracing::debug;

use venturechat_proto::identity::Identity;
use venturechat_proto::record::MessageRecord;

use super::{ApiClient, FetchError};

impl ApiClient {
    /// Fetches the full message history between two users, oldest first.
    ///
    /// The server returns records sorted by timestamp ascending; callers
    /// should still merge through the conversation store, which re-sorts
    /// defensively.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on HTTP failure or a malformed body.
    pub async fn message_history(
        &self,
        me: Identity,
        counterpart: Identity,
    ) -> Result<Vec<MessageRecord>, FetchError> {
        let path = format!(
            "/messages/{}/{}/{}/{}",
            me.role, me.id, counterpart.role, counterpart.id
        );
        let records: Vec<MessageRecord> = self.get_json(&path).await?;
        debug!(
            counterpart = %counterpart,
            count = records.len(),
            "fetched message history"
        );
        Ok(records)
    }
}
