//! Repository trait for the security event log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    id::SecurityEventId,
    storage::{EventResolution, EventSummary, NewSecurityEvent, SecurityEvent, SecurityEventQuery},
};

#[async_trait]
pub trait SecurityEventRepository: Send + Sync + 'static {
    async fn create(&self, event: NewSecurityEvent) -> Result<SecurityEvent, Error>;

    async fn find_by_id(&self, id: &SecurityEventId) -> Result<Option<SecurityEvent>, Error>;

    /// Resolve an unresolved event.
    ///
    /// The update must be conditional on `is_resolved = false`. Fails with
    /// `SecurityEventError::NotFound` or `SecurityEventError::AlreadyResolved`;
    /// a resolved row is never overwritten.
    async fn resolve(
        &self,
        id: &SecurityEventId,
        resolution: EventResolution,
    ) -> Result<SecurityEvent, Error>;

    /// Events matching the query, newest first.
    async fn list(&self, query: &SecurityEventQuery) -> Result<Vec<SecurityEvent>, Error>;

    /// Counts by type and threat level for events with `since <= created_at <= until`.
    async fn summarize(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<EventSummary, Error>;

    /// The newest event of `event_type` whose metadata `email` equals `email`
    /// and that was created at or after `since`.
    async fn latest_for_credential(
        &self,
        event_type: &str,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<SecurityEvent>, Error>;
}
