//! SQLite implementation of the login attempt ledger.

use async_trait::async_trait;
use bastion_core::{
    Error, UserId,
    error::utilities::DatabaseResultExt,
    repositories::LoginAttemptRepository,
    storage::{
        AttemptFilter, AttemptGroup, AttemptStats, AttemptSummary, Location, LoginAttempt,
        LoginOutcome, NewLoginAttempt,
    },
};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::{
    from_json, from_optional_timestamp, from_timestamp, parse_column, to_json,
};

const COLUMNS: &str = "id, user_id, email, outcome, ip_address, user_agent, device_fingerprint, threat_level, failure_reason, location, attempted_at";

pub struct SqliteLoginAttemptRepository {
    pool: SqlitePool,
}

impl SqliteLoginAttemptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteLoginAttempt {
    id: i64,
    user_id: Option<String>,
    email: String,
    outcome: String,
    ip_address: String,
    user_agent: Option<String>,
    device_fingerprint: Option<String>,
    threat_level: String,
    failure_reason: Option<String>,
    location: Option<String>,
    attempted_at: i64,
}

impl TryFrom<SqliteLoginAttempt> for LoginAttempt {
    type Error = Error;

    fn try_from(row: SqliteLoginAttempt) -> Result<Self, Self::Error> {
        Ok(LoginAttempt {
            id: row.id,
            user_id: row.user_id.map(UserId::from),
            email: row.email,
            outcome: parse_column(&row.outcome)?,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            device_fingerprint: row.device_fingerprint,
            threat_level: parse_column(&row.threat_level)?,
            failure_reason: row.failure_reason,
            location: row.location.as_deref().map(from_json).transpose()?,
            attempted_at: from_timestamp(row.attempted_at)?,
        })
    }
}

/// Encode a location column, storing nothing when every field is absent.
pub(crate) fn encode_location(location: Option<&Location>) -> Result<Option<String>, Error> {
    location
        .filter(|l| !l.is_empty())
        .map(to_json)
        .transpose()
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteAttemptStats {
    count: i64,
    latest_at: Option<i64>,
}

#[async_trait]
impl LoginAttemptRepository for SqliteLoginAttemptRepository {
    async fn record(&self, attempt: NewLoginAttempt) -> Result<LoginAttempt, Error> {
        let row = sqlx::query_as::<_, SqliteLoginAttempt>(&format!(
            r#"
            INSERT INTO login_attempts (user_id, email, outcome, ip_address, user_agent, device_fingerprint, threat_level, failure_reason, location, attempted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(attempt.user_id.as_ref().map(UserId::as_str))
        .bind(&attempt.email)
        .bind(attempt.outcome.as_str())
        .bind(&attempt.ip_address)
        .bind(&attempt.user_agent)
        .bind(&attempt.device_fingerprint)
        .bind(attempt.threat_level.as_str())
        .bind(&attempt.failure_reason)
        .bind(encode_location(attempt.location.as_ref())?)
        .bind(attempt.attempted_at.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_db_err_with_context("Failed to record login attempt")?;

        row.try_into()
    }

    async fn get_stats(&self, filter: &AttemptFilter) -> Result<AttemptStats, Error> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) AS count, MAX(attempted_at) AS latest_at FROM login_attempts WHERE 1=1",
        );
        if let Some(email) = &filter.email {
            query.push(" AND email = ").push_bind(email.clone());
        }
        if let Some(ip_address) = &filter.ip_address {
            query.push(" AND ip_address = ").push_bind(ip_address.clone());
        }
        if let Some(user_id) = &filter.user_id {
            query.push(" AND user_id = ").push_bind(user_id.as_str().to_string());
        }
        if let Some(outcome) = filter.outcome {
            query.push(" AND outcome = ").push_bind(outcome.as_str());
        }
        if let Some(since) = filter.since {
            query.push(" AND attempted_at >= ").push_bind(since.timestamp());
        }
        if let Some(until) = filter.until {
            query.push(" AND attempted_at <= ").push_bind(until.timestamp());
        }

        let row = query
            .build_query_as::<SqliteAttemptStats>()
            .fetch_one(&self.pool)
            .await
            .map_db_err_with_context("Failed to get attempt stats")?;

        Ok(AttemptStats {
            count: row.count as u32,
            latest_at: from_optional_timestamp(row.latest_at)?,
        })
    }

    async fn summarize(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<AttemptSummary, Error> {
        let groups: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT outcome, threat_level, COUNT(*) FROM login_attempts
            WHERE attempted_at >= ? AND attempted_at <= ?
            GROUP BY outcome, threat_level
            "#,
        )
        .bind(since.timestamp())
        .bind(until.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_db_err_with_context("Failed to summarize login attempts")?;

        let (unique_ips,): (i64,) = sqlx::query_as(
            "SELECT COUNT(DISTINCT ip_address) FROM login_attempts WHERE attempted_at >= ? AND attempted_at <= ?",
        )
        .bind(since.timestamp())
        .bind(until.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_db_err_with_context("Failed to count login attempt addresses")?;

        let mut summary = AttemptSummary {
            unique_ip_addresses: unique_ips as u64,
            ..Default::default()
        };
        for (outcome, threat_level, count) in groups {
            let count = count as u64;
            *summary.by_outcome.entry(parse_column(&outcome)?).or_default() += count;
            *summary
                .by_threat_level
                .entry(parse_column(&threat_level)?)
                .or_default() += count;
        }
        Ok(summary)
    }

    async fn top_failures(
        &self,
        group: AttemptGroup,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<(String, u64)>, Error> {
        let column = group.column();
        let rows: Vec<(String, i64)> = sqlx::query_as(&format!(
            r#"
            SELECT {column}, COUNT(*) AS failures FROM login_attempts
            WHERE outcome = ? AND attempted_at >= ? AND attempted_at <= ?
            GROUP BY {column}
            ORDER BY failures DESC, {column}
            LIMIT ?
            "#
        ))
        .bind(LoginOutcome::Failed.as_str())
        .bind(since.timestamp())
        .bind(until.timestamp())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_db_err_with_context("Failed to rank failed login attempts")?;

        Ok(rows
            .into_iter()
            .map(|(value, count)| (value, count as u64))
            .collect())
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM login_attempts WHERE attempted_at < ?")
            .bind(before.timestamp())
            .execute(&self.pool)
            .await
            .map_db_err_with_context("Failed to clean up login attempts")?;

        Ok(result.rows_affected())
    }
}
