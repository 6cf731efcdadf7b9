//! Repository trait for trusted devices.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    id::{DeviceId, UserId},
    storage::{DeviceActivity, DeviceStatus, NewTrustedDevice, TrustedDevice},
};

#[async_trait]
pub trait TrustedDeviceRepository: Send + Sync + 'static {
    /// Register a device. Fails with `DeviceError::AlreadyRegistered` when the
    /// (user, fingerprint) pair exists.
    async fn create(&self, device: NewTrustedDevice) -> Result<TrustedDevice, Error>;

    async fn find_by_id(&self, id: &DeviceId) -> Result<Option<TrustedDevice>, Error>;

    async fn find_by_fingerprint(
        &self,
        user_id: &UserId,
        fingerprint: &str,
    ) -> Result<Option<TrustedDevice>, Error>;

    /// All devices for a user, most recently seen first.
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<TrustedDevice>, Error>;

    /// Apply a recognised login: bump `last_seen_at` and `access_count`, store
    /// the IP and the new trust score.
    async fn record_activity(
        &self,
        id: &DeviceId,
        activity: DeviceActivity,
    ) -> Result<TrustedDevice, Error>;

    /// Set `revoked_at`/`revoked_reason` and force the status to `blocked`.
    async fn revoke(
        &self,
        id: &DeviceId,
        reason: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<TrustedDevice, Error>;

    /// Number of devices per status across all users.
    async fn count_by_status(&self) -> Result<Vec<(DeviceStatus, u64)>, Error>;
}
