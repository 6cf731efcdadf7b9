use crate::{
    Error,
    id::{DeviceId, LockoutId, SecurityEventId, TenantId, UserId},
    repositories::{
        AccountLockoutRepository, LoginAttemptRepository, PasswordHistoryRepository,
        PasswordPolicyRepository, RepositoryProvider, SecurityEventRepository,
        TrustedDeviceRepository,
    },
    storage::{
        AccountLockout, AttemptFilter, AttemptGroup, AttemptStats, AttemptSummary,
        DeviceActivity, DeviceStatus, EventResolution, EventSummary, LoginAttempt, NewAccountLockout, NewLoginAttempt, NewSecurityEvent,
        NewTrustedDevice, PasswordHistoryEntry, PasswordPolicy, SecurityEvent,
        SecurityEventQuery, TrustedDevice,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Adapter that wraps a RepositoryProvider and implements PasswordPolicyRepository
pub struct PasswordPolicyRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> PasswordPolicyRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> PasswordPolicyRepository for PasswordPolicyRepositoryAdapter<R> {
    async fn find_active(
        &self,
        tenant_id: Option<&TenantId>,
    ) -> Result<Option<PasswordPolicy>, Error> {
        self.provider.policy().find_active(tenant_id).await
    }

    async fn upsert(&self, policy: &PasswordPolicy) -> Result<PasswordPolicy, Error> {
        self.provider.policy().upsert(policy).await
    }
}

pub struct PasswordHistoryRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> PasswordHistoryRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> PasswordHistoryRepository for PasswordHistoryRepositoryAdapter<R> {
    async fn add(
        &self,
        user_id: &UserId,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<PasswordHistoryEntry, Error> {
        self.provider
            .password_history()
            .add(user_id, password_hash, created_at)
            .await
    }

    async fn recent(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<PasswordHistoryEntry>, Error> {
        self.provider.password_history().recent(user_id, limit).await
    }

    async fn prune(&self, user_id: &UserId, keep: u32) -> Result<u64, Error> {
        self.provider.password_history().prune(user_id, keep).await
    }
}

pub struct LoginAttemptRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> LoginAttemptRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> LoginAttemptRepository for LoginAttemptRepositoryAdapter<R> {
    async fn record(&self, attempt: NewLoginAttempt) -> Result<LoginAttempt, Error> {
        self.provider.login_attempt().record(attempt).await
    }

    async fn get_stats(&self, filter: &AttemptFilter) -> Result<AttemptStats, Error> {
        self.provider.login_attempt().get_stats(filter).await
    }

    async fn summarize(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<AttemptSummary, Error> {
        self.provider.login_attempt().summarize(since, until).await
    }

    async fn top_failures(
        &self,
        group: AttemptGroup,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<(String, u64)>, Error> {
        self.provider
            .login_attempt()
            .top_failures(group, since, until, limit)
            .await
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        self.provider.login_attempt().cleanup_before(before).await
    }
}

pub struct AccountLockoutRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> AccountLockoutRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> AccountLockoutRepository for AccountLockoutRepositoryAdapter<R> {
    async fn create(&self, lockout: NewAccountLockout) -> Result<AccountLockout, Error> {
        self.provider.lockout().create(lockout).await
    }

    async fn find_active(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<AccountLockout>, Error> {
        self.provider.lockout().find_active(user_id, now).await
    }

    async fn deactivate(
        &self,
        id: &LockoutId,
        unlocked_at: DateTime<Utc>,
        unlocked_by: Option<&UserId>,
    ) -> Result<Option<AccountLockout>, Error> {
        self.provider
            .lockout()
            .deactivate(id, unlocked_at, unlocked_by)
            .await
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<AccountLockout>, Error> {
        self.provider.lockout().expire_stale(now).await
    }

    async fn count_locked_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64, Error> {
        self.provider.lockout().count_locked_between(since, until).await
    }

    async fn count_active(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        self.provider.lockout().count_active(now).await
    }
}

pub struct TrustedDeviceRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> TrustedDeviceRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> TrustedDeviceRepository for TrustedDeviceRepositoryAdapter<R> {
    async fn create(&self, device: NewTrustedDevice) -> Result<TrustedDevice, Error> {
        self.provider.device().create(device).await
    }

    async fn find_by_id(&self, id: &DeviceId) -> Result<Option<TrustedDevice>, Error> {
        self.provider.device().find_by_id(id).await
    }

    async fn find_by_fingerprint(
        &self,
        user_id: &UserId,
        fingerprint: &str,
    ) -> Result<Option<TrustedDevice>, Error> {
        self.provider
            .device()
            .find_by_fingerprint(user_id, fingerprint)
            .await
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<TrustedDevice>, Error> {
        self.provider.device().list_for_user(user_id).await
    }

    async fn record_activity(
        &self,
        id: &DeviceId,
        activity: DeviceActivity,
    ) -> Result<TrustedDevice, Error> {
        self.provider.device().record_activity(id, activity).await
    }

    async fn revoke(
        &self,
        id: &DeviceId,
        reason: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<TrustedDevice, Error> {
        self.provider.device().revoke(id, reason, revoked_at).await
    }

    async fn count_by_status(&self) -> Result<Vec<(DeviceStatus, u64)>, Error> {
        self.provider.device().count_by_status().await
    }
}

pub struct SecurityEventRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> SecurityEventRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> SecurityEventRepository for SecurityEventRepositoryAdapter<R> {
    async fn create(&self, event: NewSecurityEvent) -> Result<SecurityEvent, Error> {
        self.provider.security_event().create(event).await
    }

    async fn find_by_id(&self, id: &SecurityEventId) -> Result<Option<SecurityEvent>, Error> {
        self.provider.security_event().find_by_id(id).await
    }

    async fn resolve(
        &self,
        id: &SecurityEventId,
        resolution: EventResolution,
    ) -> Result<SecurityEvent, Error> {
        self.provider.security_event().resolve(id, resolution).await
    }

    async fn list(&self, query: &SecurityEventQuery) -> Result<Vec<SecurityEvent>, Error> {
        self.provider.security_event().list(query).await
    }

    async fn summarize(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<EventSummary, Error> {
        self.provider.security_event().summarize(since, until).await
    }

    async fn latest_for_credential(
        &self,
        event_type: &str,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<SecurityEvent>, Error> {
        self.provider
            .security_event()
            .latest_for_credential(event_type, email, since)
            .await
    }
}
