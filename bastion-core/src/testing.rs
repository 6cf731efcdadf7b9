//! In-memory repository doubles for service unit tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    error::{DeviceError, LockoutError, SecurityEventError},
    id::{DeviceId, LockoutId, SecurityEventId, TenantId, UserId},
    repositories::{
        AccountLockoutRepository, AccountLockoutRepositoryProvider, LoginAttemptRepository,
        LoginAttemptRepositoryProvider, PasswordHistoryRepository,
        PasswordHistoryRepositoryProvider, PasswordPolicyRepository,
        PasswordPolicyRepositoryProvider, RepositoryProvider, SecurityEventRepository,
        SecurityEventRepositoryProvider, TrustedDeviceRepository, TrustedDeviceRepositoryProvider,
    },
    storage::{
        AccountLockout, AttemptFilter, AttemptGroup, AttemptStats, AttemptSummary,
        DeviceActivity, DeviceStatus, EventResolution, EventSummary, LoginAttempt, NewAccountLockout, NewLoginAttempt, NewSecurityEvent,
        NewTrustedDevice, PasswordHistoryEntry, PasswordPolicy, SecurityEvent,
        SecurityEventQuery, TrustedDevice,
    },
};

#[derive(Default)]
pub struct InMemoryStore {
    pub policies: Mutex<Vec<PasswordPolicy>>,
    pub history: Mutex<Vec<PasswordHistoryEntry>>,
    pub attempts: Mutex<Vec<LoginAttempt>>,
    pub lockouts: Mutex<Vec<AccountLockout>>,
    pub devices: Mutex<Vec<TrustedDevice>>,
    pub events: Mutex<Vec<SecurityEvent>>,
    /// When set, every security event write fails
    pub fail_event_writes: Mutex<bool>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a failed attempt at an explicit time.
    pub fn push_failure(&self, email: &str, ip_address: &str, attempted_at: DateTime<Utc>) {
        let mut attempts = self.attempts.lock().unwrap();
        let id = attempts.len() as i64 + 1;
        attempts.push(LoginAttempt {
            id,
            user_id: None,
            email: email.to_string(),
            outcome: crate::storage::LoginOutcome::Failed,
            ip_address: ip_address.to_string(),
            user_agent: None,
            device_fingerprint: None,
            threat_level: crate::storage::ThreatLevel::Low,
            failure_reason: Some("invalid_credentials".to_string()),
            location: None,
            attempted_at,
        });
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PasswordPolicyRepository for InMemoryStore {
    async fn find_active(
        &self,
        tenant_id: Option<&TenantId>,
    ) -> Result<Option<PasswordPolicy>, Error> {
        Ok(self
            .policies
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.is_active && p.tenant_id.as_ref() == tenant_id)
            .cloned())
    }

    async fn upsert(&self, policy: &PasswordPolicy) -> Result<PasswordPolicy, Error> {
        let mut policies = self.policies.lock().unwrap();
        if policy.is_active {
            for existing in policies.iter_mut() {
                if existing.tenant_id == policy.tenant_id {
                    existing.is_active = false;
                }
            }
        }
        policies.retain(|p| p.id != policy.id);
        policies.push(policy.clone());
        Ok(policy.clone())
    }
}

#[async_trait]
impl PasswordHistoryRepository for InMemoryStore {
    async fn add(
        &self,
        user_id: &UserId,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<PasswordHistoryEntry, Error> {
        let mut history = self.history.lock().unwrap();
        let entry = PasswordHistoryEntry {
            id: history.iter().map(|h| h.id).max().unwrap_or(0) + 1,
            user_id: user_id.clone(),
            password_hash: password_hash.to_string(),
            created_at,
        };
        history.push(entry.clone());
        Ok(entry)
    }

    async fn recent(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<PasswordHistoryEntry>, Error> {
        let history = self.history.lock().unwrap();
        let mut entries: Vec<_> = history
            .iter()
            .filter(|h| &h.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        entries.truncate(limit as usize);
        Ok(entries)
    }

    async fn prune(&self, user_id: &UserId, keep: u32) -> Result<u64, Error> {
        let keep_ids: Vec<i64> = self
            .recent(user_id, keep)
            .await?
            .into_iter()
            .map(|h| h.id)
            .collect();
        let mut history = self.history.lock().unwrap();
        let before = history.len();
        history.retain(|h| &h.user_id != user_id || keep_ids.contains(&h.id));
        Ok((before - history.len()) as u64)
    }
}

#[async_trait]
impl LoginAttemptRepository for InMemoryStore {
    async fn record(&self, attempt: NewLoginAttempt) -> Result<LoginAttempt, Error> {
        let mut attempts = self.attempts.lock().unwrap();
        let row = LoginAttempt {
            id: attempts.len() as i64 + 1,
            user_id: attempt.user_id,
            email: attempt.email,
            outcome: attempt.outcome,
            ip_address: attempt.ip_address,
            user_agent: attempt.user_agent,
            device_fingerprint: attempt.device_fingerprint,
            threat_level: attempt.threat_level,
            failure_reason: attempt.failure_reason,
            location: attempt.location,
            attempted_at: attempt.attempted_at,
        };
        attempts.push(row.clone());
        Ok(row)
    }

    async fn get_stats(&self, filter: &AttemptFilter) -> Result<AttemptStats, Error> {
        let attempts = self.attempts.lock().unwrap();
        let matching: Vec<_> = attempts.iter().filter(|a| filter.matches(a)).collect();
        Ok(AttemptStats {
            count: matching.len() as u32,
            latest_at: matching.iter().map(|a| a.attempted_at).max(),
        })
    }

    async fn summarize(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<AttemptSummary, Error> {
        let attempts = self.attempts.lock().unwrap();
        let mut summary = AttemptSummary::default();
        let mut ips = BTreeSet::new();
        for a in attempts
            .iter()
            .filter(|a| a.attempted_at >= since && a.attempted_at <= until)
        {
            *summary.by_outcome.entry(a.outcome).or_default() += 1;
            *summary.by_threat_level.entry(a.threat_level).or_default() += 1;
            ips.insert(a.ip_address.clone());
        }
        summary.unique_ip_addresses = ips.len() as u64;
        Ok(summary)
    }

    async fn top_failures(
        &self,
        group: AttemptGroup,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<(String, u64)>, Error> {
        let filter = AttemptFilter {
            outcome: Some(crate::storage::LoginOutcome::Failed),
            since: Some(since),
            until: Some(until),
            ..Default::default()
        };
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for a in self.attempts.lock().unwrap().iter().filter(|a| filter.matches(a)) {
            *counts.entry(group.key(a).to_string()).or_default() += 1;
        }
        let mut sorted: Vec<_> = counts.into_iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sorted.truncate(limit as usize);
        Ok(sorted)
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let mut attempts = self.attempts.lock().unwrap();
        let len = attempts.len();
        attempts.retain(|a| a.attempted_at >= before);
        Ok((len - attempts.len()) as u64)
    }
}

#[async_trait]
impl AccountLockoutRepository for InMemoryStore {
    async fn create(&self, lockout: NewAccountLockout) -> Result<AccountLockout, Error> {
        let mut lockouts = self.lockouts.lock().unwrap();
        let now = lockout.locked_at;

        for existing in lockouts.iter_mut() {
            if existing.user_id == lockout.user_id && existing.is_active {
                if existing.is_effective_at(now) {
                    return Err(LockoutError::AlreadyLocked {
                        lockout_id: existing.id.clone(),
                        unlocks_at: existing.unlocks_at,
                    }
                    .into());
                }
                existing.is_active = false;
                existing.unlocked_at.get_or_insert(now);
            }
        }

        let row = AccountLockout {
            id: LockoutId::new_random(),
            user_id: lockout.user_id,
            lock_type: lockout.lock_type,
            reason: lockout.reason,
            threat_level: lockout.threat_level,
            is_active: true,
            locked_at: lockout.locked_at,
            unlocks_at: lockout.unlocks_at,
            unlocked_at: None,
            unlocked_by: None,
        };
        lockouts.push(row.clone());
        Ok(row)
    }

    async fn find_active(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<AccountLockout>, Error> {
        Ok(self
            .lockouts
            .lock()
            .unwrap()
            .iter()
            .find(|l| &l.user_id == user_id && l.is_effective_at(now))
            .cloned())
    }

    async fn deactivate(
        &self,
        id: &LockoutId,
        unlocked_at: DateTime<Utc>,
        unlocked_by: Option<&UserId>,
    ) -> Result<Option<AccountLockout>, Error> {
        let mut lockouts = self.lockouts.lock().unwrap();
        Ok(lockouts
            .iter_mut()
            .find(|l| &l.id == id && l.is_active)
            .map(|l| {
                l.is_active = false;
                l.unlocked_at = Some(unlocked_at);
                l.unlocked_by = unlocked_by.cloned();
                l.clone()
            }))
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<AccountLockout>, Error> {
        let mut lockouts = self.lockouts.lock().unwrap();
        Ok(lockouts
            .iter_mut()
            .filter(|l| l.is_active && l.unlocks_at.is_some_and(|u| u <= now))
            .map(|l| {
                l.is_active = false;
                l.unlocked_at = Some(now);
                l.clone()
            })
            .collect())
    }

    async fn count_locked_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64, Error> {
        Ok(self
            .lockouts
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.locked_at >= since && l.locked_at <= until)
            .count() as u64)
    }

    async fn count_active(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        Ok(self
            .lockouts
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.is_effective_at(now))
            .count() as u64)
    }
}

#[async_trait]
impl TrustedDeviceRepository for InMemoryStore {
    async fn create(&self, device: NewTrustedDevice) -> Result<TrustedDevice, Error> {
        let mut devices = self.devices.lock().unwrap();
        if devices
            .iter()
            .any(|d| d.user_id == device.user_id && d.fingerprint == device.fingerprint)
        {
            return Err(DeviceError::AlreadyRegistered.into());
        }
        let row = TrustedDevice {
            id: DeviceId::new_random(),
            user_id: device.user_id,
            fingerprint: device.fingerprint,
            name: device.name,
            info: device.info,
            status: DeviceStatus::Trusted,
            trust_score: device.trust_score,
            first_seen_at: device.seen_at,
            last_seen_at: device.seen_at,
            last_ip_address: device.ip_address,
            access_count: 1,
            revoked_at: None,
            revoked_reason: None,
        };
        devices.push(row.clone());
        Ok(row)
    }

    async fn find_by_id(&self, id: &DeviceId) -> Result<Option<TrustedDevice>, Error> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .find(|d| &d.id == id)
            .cloned())
    }

    async fn find_by_fingerprint(
        &self,
        user_id: &UserId,
        fingerprint: &str,
    ) -> Result<Option<TrustedDevice>, Error> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .find(|d| &d.user_id == user_id && d.fingerprint == fingerprint)
            .cloned())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<TrustedDevice>, Error> {
        let mut devices: Vec<_> = self
            .devices
            .lock()
            .unwrap()
            .iter()
            .filter(|d| &d.user_id == user_id)
            .cloned()
            .collect();
        devices.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        Ok(devices)
    }

    async fn record_activity(
        &self,
        id: &DeviceId,
        activity: DeviceActivity,
    ) -> Result<TrustedDevice, Error> {
        let mut devices = self.devices.lock().unwrap();
        let device = devices
            .iter_mut()
            .find(|d| &d.id == id)
            .ok_or(DeviceError::NotFound)?;
        device.last_seen_at = activity.seen_at;
        device.last_ip_address = Some(activity.ip_address);
        device.trust_score = activity.trust_score;
        device.access_count += 1;
        Ok(device.clone())
    }

    async fn revoke(
        &self,
        id: &DeviceId,
        reason: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<TrustedDevice, Error> {
        let mut devices = self.devices.lock().unwrap();
        let device = devices
            .iter_mut()
            .find(|d| &d.id == id)
            .ok_or(DeviceError::NotFound)?;
        device.status = DeviceStatus::Blocked;
        device.revoked_at = Some(revoked_at);
        device.revoked_reason = Some(reason.to_string());
        Ok(device.clone())
    }

    async fn count_by_status(&self) -> Result<Vec<(DeviceStatus, u64)>, Error> {
        let devices = self.devices.lock().unwrap();
        let mut counts: Vec<(DeviceStatus, u64)> = Vec::new();
        for device in devices.iter() {
            match counts.iter_mut().find(|(s, _)| *s == device.status) {
                Some((_, n)) => *n += 1,
                None => counts.push((device.status, 1)),
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl SecurityEventRepository for InMemoryStore {
    async fn create(&self, event: NewSecurityEvent) -> Result<SecurityEvent, Error> {
        if *self.fail_event_writes.lock().unwrap() {
            return Err(crate::error::StorageError::Database("event log unavailable".to_string()).into());
        }
        let row = SecurityEvent {
            id: SecurityEventId::new_random(),
            user_id: event.user_id,
            tenant_id: event.tenant_id,
            event_type: event.event_type,
            threat_level: event.threat_level,
            description: event.description,
            ip_address: event.ip_address,
            user_agent: event.user_agent,
            device_fingerprint: event.device_fingerprint,
            location: event.location,
            metadata: event.metadata,
            is_resolved: false,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
            created_at: Utc::now(),
        };
        self.events.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn find_by_id(&self, id: &SecurityEventId) -> Result<Option<SecurityEvent>, Error> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .find(|e| &e.id == id)
            .cloned())
    }

    async fn resolve(
        &self,
        id: &SecurityEventId,
        resolution: EventResolution,
    ) -> Result<SecurityEvent, Error> {
        let mut events = self.events.lock().unwrap();
        let event = events
            .iter_mut()
            .find(|e| &e.id == id)
            .ok_or(SecurityEventError::NotFound)?;
        if let Some(resolved_at) = event.resolved_at.filter(|_| event.is_resolved) {
            return Err(SecurityEventError::AlreadyResolved { resolved_at }.into());
        }
        event.is_resolved = true;
        event.resolved_at = Some(resolution.resolved_at);
        event.resolved_by = Some(resolution.resolved_by);
        event.resolution_notes = resolution.notes;
        Ok(event.clone())
    }

    async fn list(&self, query: &SecurityEventQuery) -> Result<Vec<SecurityEvent>, Error> {
        let mut events: Vec<_> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            events.truncate(limit as usize);
        }
        Ok(events)
    }

    async fn summarize(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<EventSummary, Error> {
        let events = self.events.lock().unwrap();
        let mut summary = EventSummary::default();
        for e in events
            .iter()
            .filter(|e| e.created_at >= since && e.created_at <= until)
        {
            summary.total += 1;
            if !e.is_resolved {
                summary.unresolved += 1;
            }
            *summary.by_type.entry(e.event_type.clone()).or_default() += 1;
            *summary.by_threat_level.entry(e.threat_level).or_default() += 1;
        }
        Ok(summary)
    }

    async fn latest_for_credential(
        &self,
        event_type: &str,
        email: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<SecurityEvent>, Error> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| {
                e.event_type == event_type
                    && e.created_at >= since
                    && e.metadata.get("email").and_then(|v| v.as_str()) == Some(email)
            })
            .max_by_key(|e| e.created_at)
            .cloned())
    }
}

impl PasswordPolicyRepositoryProvider for InMemoryStore {
    type PolicyRepo = InMemoryStore;

    fn policy(&self) -> &Self::PolicyRepo {
        self
    }
}

impl PasswordHistoryRepositoryProvider for InMemoryStore {
    type PasswordHistoryRepo = InMemoryStore;

    fn password_history(&self) -> &Self::PasswordHistoryRepo {
        self
    }
}

impl LoginAttemptRepositoryProvider for InMemoryStore {
    type LoginAttemptRepo = InMemoryStore;

    fn login_attempt(&self) -> &Self::LoginAttemptRepo {
        self
    }
}

impl AccountLockoutRepositoryProvider for InMemoryStore {
    type LockoutRepo = InMemoryStore;

    fn lockout(&self) -> &Self::LockoutRepo {
        self
    }
}

impl TrustedDeviceRepositoryProvider for InMemoryStore {
    type DeviceRepo = InMemoryStore;

    fn device(&self) -> &Self::DeviceRepo {
        self
    }
}

impl SecurityEventRepositoryProvider for InMemoryStore {
    type SecurityEventRepo = InMemoryStore;

    fn security_event(&self) -> &Self::SecurityEventRepo {
        self
    }
}

#[async_trait]
impl RepositoryProvider for InMemoryStore {
    async fn migrate(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}
