//! Security event log.
//!
//! Events are appended by the other services and by callers. The only mutation
//! is resolution, which is one-way: a resolved event stays resolved and a new
//! occurrence needs a new event.

use std::sync::Arc;

use chrono::Utc;

use crate::{
    Error,
    error::{SecurityEventError, ValidationError},
    id::{SecurityEventId, UserId},
    repositories::SecurityEventRepository,
    storage::{EventResolution, NewSecurityEvent, SecurityEvent, SecurityEventQuery},
    validation::validate_ip_address,
};

/// Service for the append-only security event log.
pub struct SecurityEventService<E: SecurityEventRepository> {
    repository: Arc<E>,
}

impl<E: SecurityEventRepository> SecurityEventService<E> {
    pub fn new(repository: Arc<E>) -> Self {
        Self { repository }
    }

    /// Append an event to the log.
    pub async fn log_security_event(&self, event: NewSecurityEvent) -> Result<SecurityEvent, Error> {
        if event.event_type.trim().is_empty() {
            return Err(ValidationError::MissingField("event_type".to_string()).into());
        }
        if event.description.trim().is_empty() {
            return Err(ValidationError::MissingField("description".to_string()).into());
        }
        if let Some(ip_address) = &event.ip_address {
            validate_ip_address(ip_address)?;
        }

        let event = self.repository.create(event).await?;
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            threat_level = %event.threat_level,
            "Logged security event"
        );
        Ok(event)
    }

    pub async fn get_event(&self, id: &SecurityEventId) -> Result<SecurityEvent, Error> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| SecurityEventError::NotFound.into())
    }

    /// Mark an event as resolved.
    ///
    /// Resolution is one-way: resolving an already-resolved event fails with
    /// [`SecurityEventError::AlreadyResolved`] and leaves the original resolution
    /// untouched.
    pub async fn resolve_security_event(
        &self,
        id: &SecurityEventId,
        resolved_by: &UserId,
        notes: Option<String>,
    ) -> Result<SecurityEvent, Error> {
        let resolution = EventResolution {
            resolved_by: resolved_by.clone(),
            notes: notes.filter(|n| !n.trim().is_empty()),
            resolved_at: Utc::now(),
        };

        let event = self.repository.resolve(id, resolution).await?;
        tracing::info!(event_id = %id, resolved_by = %resolved_by, "Resolved security event");
        Ok(event)
    }

    /// Events matching `query`, newest first.
    pub async fn list_events(&self, query: &SecurityEventQuery) -> Result<Vec<SecurityEvent>, Error> {
        self.repository.list(query).await
    }
}
