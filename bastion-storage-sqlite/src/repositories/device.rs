//! SQLite implementation of the trusted device repository.

use async_trait::async_trait;
use bastion_core::{
    DeviceId, Error, UserId,
    error::{DeviceError, StorageError, utilities::DatabaseResultExt},
    repositories::TrustedDeviceRepository,
    storage::{DeviceActivity, DeviceInfo, DeviceStatus, NewTrustedDevice, TrustedDevice},
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{from_optional_timestamp, from_timestamp, parse_column};

const COLUMNS: &str = "id, user_id, fingerprint, name, device_type, os, browser, status, trust_score, first_seen_at, last_seen_at, last_ip_address, access_count, revoked_at, revoked_reason";

pub struct SqliteTrustedDeviceRepository {
    pool: SqlitePool,
}

impl SqliteTrustedDeviceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteTrustedDevice {
    id: String,
    user_id: String,
    fingerprint: String,
    name: String,
    device_type: String,
    os: String,
    browser: String,
    status: String,
    trust_score: f64,
    first_seen_at: i64,
    last_seen_at: i64,
    last_ip_address: Option<String>,
    access_count: i64,
    revoked_at: Option<i64>,
    revoked_reason: Option<String>,
}

impl TryFrom<SqliteTrustedDevice> for TrustedDevice {
    type Error = Error;

    fn try_from(row: SqliteTrustedDevice) -> Result<Self, Self::Error> {
        Ok(TrustedDevice {
            id: DeviceId::from(row.id),
            user_id: UserId::from(row.user_id),
            fingerprint: row.fingerprint,
            name: row.name,
            info: DeviceInfo {
                device_type: row.device_type,
                os: row.os,
                browser: row.browser,
            },
            status: parse_column(&row.status)?,
            trust_score: row.trust_score,
            first_seen_at: from_timestamp(row.first_seen_at)?,
            last_seen_at: from_timestamp(row.last_seen_at)?,
            last_ip_address: row.last_ip_address,
            access_count: row.access_count as u32,
            revoked_at: from_optional_timestamp(row.revoked_at)?,
            revoked_reason: row.revoked_reason,
        })
    }
}

#[async_trait]
impl TrustedDeviceRepository for SqliteTrustedDeviceRepository {
    async fn create(&self, device: NewTrustedDevice) -> Result<TrustedDevice, Error> {
        let seen_at = device.seen_at.timestamp();
        let row = sqlx::query_as::<_, SqliteTrustedDevice>(&format!(
            r#"
            INSERT INTO trusted_devices (id, user_id, fingerprint, name, device_type, os, browser, status, trust_score, first_seen_at, last_seen_at, last_ip_address, access_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(DeviceId::new_random().as_str())
        .bind(device.user_id.as_str())
        .bind(&device.fingerprint)
        .bind(&device.name)
        .bind(&device.info.device_type)
        .bind(&device.info.os)
        .bind(&device.info.browser)
        .bind(DeviceStatus::Trusted.as_str())
        .bind(device.trust_score)
        .bind(seen_at)
        .bind(seen_at)
        .bind(&device.ip_address)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Device(DeviceError::AlreadyRegistered)
            }
            e => {
                tracing::error!(error = %e, "Failed to register device");
                Error::Storage(StorageError::Database("Failed to register device".to_string()))
            }
        })?;

        row.try_into()
    }

    async fn find_by_id(&self, id: &DeviceId) -> Result<Option<TrustedDevice>, Error> {
        let row = sqlx::query_as::<_, SqliteTrustedDevice>(&format!(
            "SELECT {COLUMNS} FROM trusted_devices WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to find device")?;

        row.map(TrustedDevice::try_from).transpose()
    }

    async fn find_by_fingerprint(
        &self,
        user_id: &UserId,
        fingerprint: &str,
    ) -> Result<Option<TrustedDevice>, Error> {
        let row = sqlx::query_as::<_, SqliteTrustedDevice>(&format!(
            "SELECT {COLUMNS} FROM trusted_devices WHERE user_id = ? AND fingerprint = ?"
        ))
        .bind(user_id.as_str())
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to find device")?;

        row.map(TrustedDevice::try_from).transpose()
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<TrustedDevice>, Error> {
        let rows = sqlx::query_as::<_, SqliteTrustedDevice>(&format!(
            "SELECT {COLUMNS} FROM trusted_devices WHERE user_id = ? ORDER BY last_seen_at DESC, rowid DESC"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_db_err_with_context("Failed to list devices")?;

        rows.into_iter().map(TrustedDevice::try_from).collect()
    }

    async fn record_activity(
        &self,
        id: &DeviceId,
        activity: DeviceActivity,
    ) -> Result<TrustedDevice, Error> {
        let row = sqlx::query_as::<_, SqliteTrustedDevice>(&format!(
            r#"
            UPDATE trusted_devices
            SET last_seen_at = ?, last_ip_address = ?, trust_score = ?, access_count = access_count + 1
            WHERE id = ?
            RETURNING {COLUMNS}
            "#
        ))
        .bind(activity.seen_at.timestamp())
        .bind(&activity.ip_address)
        .bind(activity.trust_score)
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to record device activity")?;

        row.ok_or(DeviceError::NotFound)?.try_into()
    }

    async fn revoke(
        &self,
        id: &DeviceId,
        reason: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<TrustedDevice, Error> {
        let row = sqlx::query_as::<_, SqliteTrustedDevice>(&format!(
            r#"
            UPDATE trusted_devices
            SET status = ?, revoked_at = ?, revoked_reason = ?
            WHERE id = ?
            RETURNING {COLUMNS}
            "#
        ))
        .bind(DeviceStatus::Blocked.as_str())
        .bind(revoked_at.timestamp())
        .bind(reason)
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to revoke device")?;

        row.ok_or(DeviceError::NotFound)?.try_into()
    }

    async fn count_by_status(&self) -> Result<Vec<(DeviceStatus, u64)>, Error> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM trusted_devices GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_db_err_with_context("Failed to count devices")?;

        rows.into_iter()
            .map(|(status, count)| Ok((parse_column(&status)?, count as u64)))
            .collect()
    }
}
