//! Repository trait for the login attempt ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    storage::{AttemptFilter, AttemptGroup, AttemptStats, AttemptSummary, LoginAttempt, NewLoginAttempt},
};

/// Append-only storage for login attempts.
///
/// Rows are never updated. Failed attempts are recorded for every email,
/// including ones that do not resolve to an account.
#[async_trait]
pub trait LoginAttemptRepository: Send + Sync + 'static {
    /// Insert a new ledger row.
    async fn record(&self, attempt: NewLoginAttempt) -> Result<LoginAttempt, Error>;

    /// Count rows matching the filter and report the latest `attempted_at`.
    async fn get_stats(&self, filter: &AttemptFilter) -> Result<AttemptStats, Error>;

    /// Counts by outcome and threat level plus distinct client addresses for
    /// rows with `since <= attempted_at <= until`.
    async fn summarize(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<AttemptSummary, Error>;

    /// The `limit` values of `group` with the most failed attempts in the window,
    /// highest count first, ties broken by value.
    async fn top_failures(
        &self,
        group: AttemptGroup,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<(String, u64)>, Error>;

    /// Delete rows older than `before`. Returns the number removed.
    async fn cleanup_before(&self, before: DateTime<Utc>) -> Result<u64, Error>;
}
