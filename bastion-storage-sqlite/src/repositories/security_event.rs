//! SQLite implementation of the security event log.

use async_trait::async_trait;
use bastion_core::{
    Error, SecurityEventId, TenantId, UserId,
    error::{SecurityEventError, utilities::DatabaseResultExt},
    repositories::SecurityEventRepository,
    storage::{
        EventResolution, EventSummary, NewSecurityEvent, SecurityEvent, SecurityEventQuery,
        ThreatLevel,
    },
    validation::normalize_email,
};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::login_attempt::encode_location;
use crate::{
    from_json, from_optional_timestamp, from_timestamp, parse_column, to_json,
};

const COLUMNS: &str = "id, user_id, tenant_id, event_type, threat_level, description, ip_address, user_agent, device_fingerprint, location, metadata, is_resolved, resolved_at, resolved_by, resolution_notes, created_at";

const LEVELS: [ThreatLevel; 4] = [
    ThreatLevel::Low,
    ThreatLevel::Medium,
    ThreatLevel::High,
    ThreatLevel::Critical,
];

pub struct SqliteSecurityEventRepository {
    pool: SqlitePool,
}

impl SqliteSecurityEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteSecurityEvent {
    id: String,
    user_id: Option<String>,
    tenant_id: Option<String>,
    event_type: String,
    threat_level: String,
    description: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    device_fingerprint: Option<String>,
    location: Option<String>,
    metadata: String,
    is_resolved: bool,
    resolved_at: Option<i64>,
    resolved_by: Option<String>,
    resolution_notes: Option<String>,
    created_at: i64,
}

impl TryFrom<SqliteSecurityEvent> for SecurityEvent {
    type Error = Error;

    fn try_from(row: SqliteSecurityEvent) -> Result<Self, Self::Error> {
        Ok(SecurityEvent {
            id: SecurityEventId::from(row.id),
            user_id: row.user_id.map(UserId::from),
            tenant_id: row.tenant_id.map(TenantId::from),
            event_type: row.event_type,
            threat_level: parse_column(&row.threat_level)?,
            description: row.description,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            device_fingerprint: row.device_fingerprint,
            location: row.location.as_deref().map(from_json).transpose()?,
            metadata: from_json(&row.metadata)?,
            is_resolved: row.is_resolved,
            resolved_at: from_optional_timestamp(row.resolved_at)?,
            resolved_by: row.resolved_by.map(UserId::from),
            resolution_notes: row.resolution_notes,
            created_at: from_timestamp(row.created_at)?,
        })
    }
}

#[async_trait]
impl SecurityEventRepository for SqliteSecurityEventRepository {
    async fn create(&self, event: NewSecurityEvent) -> Result<SecurityEvent, Error> {
        let row = sqlx::query_as::<_, SqliteSecurityEvent>(&format!(
            r#"
            INSERT INTO security_events (id, user_id, tenant_id, event_type, threat_level, description, ip_address, user_agent, device_fingerprint, location, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(SecurityEventId::new_random().as_str())
        .bind(event.user_id.as_ref().map(UserId::as_str))
        .bind(event.tenant_id.as_ref().map(TenantId::as_str))
        .bind(&event.event_type)
        .bind(event.threat_level.as_str())
        .bind(&event.description)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&event.device_fingerprint)
        .bind(encode_location(event.location.as_ref())?)
        .bind(to_json(&event.metadata)?)
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await
        .map_db_err_with_context("Failed to create security event")?;

        row.try_into()
    }

    async fn find_by_id(&self, id: &SecurityEventId) -> Result<Option<SecurityEvent>, Error> {
        let row = sqlx::query_as::<_, SqliteSecurityEvent>(&format!(
            "SELECT {COLUMNS} FROM security_events WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to find security event")?;

        row.map(SecurityEvent::try_from).transpose()
    }

    async fn resolve(
        &self,
        id: &SecurityEventId,
        resolution: EventResolution,
    ) -> Result<SecurityEvent, Error> {
        let row = sqlx::query_as::<_, SqliteSecurityEvent>(&format!(
            r#"
            UPDATE security_events
            SET is_resolved = 1, resolved_at = ?, resolved_by = ?, resolution_notes = ?
            WHERE id = ? AND is_resolved = 0
            RETURNING {COLUMNS}
            "#
        ))
        .bind(resolution.resolved_at.timestamp())
        .bind(resolution.resolved_by.as_str())
        .bind(&resolution.notes)
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to resolve security event")?;

        if let Some(row) = row {
            return row.try_into();
        }

        match self.find_by_id(id).await? {
            Some(existing) => Err(SecurityEventError::AlreadyResolved {
                resolved_at: existing.resolved_at.unwrap_or(existing.created_at),
            }
            .into()),
            None => Err(SecurityEventError::NotFound.into()),
        }
    }

    async fn list(&self, query: &SecurityEventQuery) -> Result<Vec<SecurityEvent>, Error> {
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {COLUMNS} FROM security_events WHERE 1=1"));

        if let Some(user_id) = &query.user_id {
            builder.push(" AND user_id = ").push_bind(user_id.as_str().to_string());
        }
        if let Some(tenant_id) = &query.tenant_id {
            builder.push(" AND tenant_id = ").push_bind(tenant_id.as_str().to_string());
        }
        if let Some(event_type) = &query.event_type {
            builder.push(" AND event_type = ").push_bind(event_type.clone());
        }
        if let Some(min_level) = query.min_threat_level {
            builder.push(" AND threat_level IN (");
            let mut levels = builder.separated(", ");
            for level in LEVELS.iter().filter(|l| **l >= min_level) {
                levels.push_bind(level.as_str());
            }
            builder.push(")");
        }
        if let Some(is_resolved) = query.is_resolved {
            builder.push(" AND is_resolved = ").push_bind(is_resolved);
        }
        if let Some(since) = query.since {
            builder.push(" AND created_at >= ").push_bind(since.timestamp());
        }
        if let Some(until) = query.until {
            builder.push(" AND created_at <= ").push_bind(until.timestamp());
        }
        builder.push(" ORDER BY created_at DESC, rowid DESC");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let rows = builder
            .build_query_as::<SqliteSecurityEvent>()
            .fetch_all(&self.pool)
            .await
            .map_db_err_with_context("Failed to list security events")?;

        rows.into_iter().map(SecurityEvent::try_from).collect()
    }

    async fn summarize(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<EventSummary, Error> {
        let groups: Vec<(String, String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT event_type, threat_level, COUNT(*), COALESCE(SUM(is_resolved = 0), 0)
            FROM security_events
            WHERE created_at >= ? AND created_at <= ?
            GROUP BY event_type, threat_level
            "#,
        )
        .bind(since.timestamp())
        .bind(until.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_db_err_with_context("Failed to summarize security events")?;

        let mut summary = EventSummary::default();
        for (event_type, threat_level, count, unresolved) in groups {
            let count = count as u64;
            summary.total += count;
            summary.unresolved += unresolved as u64;
            *summary.by_type.entry(event_type).or_default() += count;
            *summary
                .by_threat_level
                .entry(parse_column(&threat_level)?)
                .or_default() += count;
        }
        Ok(summary)
    }

    async fn latest_for_credential(
        &self,
        event_type: &str,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<SecurityEvent>, Error> {
        let row = sqlx::query_as::<_, SqliteSecurityEvent>(&format!(
            r#"
            SELECT {COLUMNS} FROM security_events
            WHERE event_type = ? AND created_at >= ? AND lower(json_extract(metadata, '$.email')) = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#
        ))
        .bind(event_type)
        .bind(since.timestamp())
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to find security event for credential")?;

        row.map(SecurityEvent::try_from).transpose()
    }
}
