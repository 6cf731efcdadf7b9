//! Repository trait for password history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Error, id::UserId, storage::PasswordHistoryEntry};

#[async_trait]
pub trait PasswordHistoryRepository: Send + Sync + 'static {
    async fn add(
        &self,
        user_id: &UserId,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<PasswordHistoryEntry, Error>;

    /// The newest `limit` entries for a user, newest first.
    async fn recent(&self, user_id: &UserId, limit: u32) -> Result<Vec<PasswordHistoryEntry>, Error>;

    /// Delete all but the newest `keep` entries. Returns the number removed.
    async fn prune(&self, user_id: &UserId, keep: u32) -> Result<u64, Error>;
}
