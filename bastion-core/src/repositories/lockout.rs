//! Repository trait for account lockouts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    id::{LockoutId, UserId},
    storage::{AccountLockout, NewAccountLockout},
};

/// Storage for lock episodes.
///
/// # Concurrency
///
/// `create` is the one place where concurrent callers race meaningfully. Backends
/// must guarantee that at most one effective lockout exists per user, e.g. with a
/// partial unique index on active rows, and report the loser with
/// `LockoutError::AlreadyLocked`.
#[async_trait]
pub trait AccountLockoutRepository: Send + Sync + 'static {
    /// Create a lockout unless the user already has an effective one.
    ///
    /// Rows that are still flagged active but whose `unlocks_at` has passed are
    /// deactivated first, so an unswept expired lock does not block a new one.
    async fn create(&self, lockout: NewAccountLockout) -> Result<AccountLockout, Error>;

    /// The lockout currently in effect for `user_id` at `now`, if any.
    async fn find_active(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<AccountLockout>, Error>;

    /// Deactivate a lockout, recording when and by whom.
    ///
    /// Returns `None` if the row does not exist or was already inactive.
    async fn deactivate(
        &self,
        id: &LockoutId,
        unlocked_at: DateTime<Utc>,
        unlocked_by: Option<&UserId>,
    ) -> Result<Option<AccountLockout>, Error>;

    /// Deactivate every active timeboxed lockout with `unlocks_at <= now`.
    ///
    /// Returns the rows that were expired by this call.
    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<AccountLockout>, Error>;

    /// Number of lockouts with `since <= locked_at <= until`.
    async fn count_locked_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64, Error>;

    /// Number of lockouts in effect at `now`.
    async fn count_active(&self, now: DateTime<Utc>) -> Result<u64, Error>;
}
