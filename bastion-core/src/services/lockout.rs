//! Account lockout state machine.
//!
//! A user moves from unlocked to locked when [`AccountLockoutService::lock_account`]
//! creates a lockout row, and back when the row is deactivated, either manually
//! with [`AccountLockoutService::unlock_account`] or by the automatic sweep once a
//! timeboxed lock reaches `unlocks_at`.
//!
//! Reads never trust the stored `is_active` flag alone. A timeboxed lock whose
//! `unlocks_at` has passed is reported as unlocked even before the sweep runs.
//!
//! Locking a user that is already locked fails with
//! [`LockoutError::AlreadyLocked`]; the storage layer enforces this under
//! concurrent calls.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{
    Error,
    config::LockoutConfig,
    error::{LockoutError, ValidationError, utilities::RequiredFieldExt},
    id::UserId,
    repositories::AccountLockoutRepository,
    storage::{AccountLockout, LockType, NewAccountLockout, ThreatLevel},
};

/// Parameters for locking an account.
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub user_id: UserId,
    pub lock_type: LockType,
    /// Shown to the user; defaults to [`LockType::default_reason`]
    pub reason: Option<String>,
    pub threat_level: ThreatLevel,
    /// `None` locks until a manual unlock
    pub duration: Option<Duration>,
}

impl LockRequest {
    pub fn new(user_id: UserId, lock_type: LockType) -> Self {
        let threat_level = match lock_type {
            LockType::FailedLogin | LockType::SuspiciousActivity => ThreatLevel::High,
            LockType::AdminAction => ThreatLevel::Medium,
        };
        Self {
            user_id,
            lock_type,
            reason: None,
            threat_level,
            duration: None,
        }
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn threat_level(mut self, threat_level: ThreatLevel) -> Self {
        self.threat_level = threat_level;
        self
    }
}

/// Lock state of a user at the time of the check.
#[derive(Debug, Clone, PartialEq)]
pub struct LockoutStatus {
    pub user_id: UserId,
    pub is_locked: bool,
    pub reason: Option<String>,
    /// `None` while locked means the lock is indefinite
    pub unlocks_at: Option<DateTime<Utc>>,
    pub lockout: Option<AccountLockout>,
}

impl LockoutStatus {
    fn unlocked(user_id: &UserId) -> Self {
        Self {
            user_id: user_id.clone(),
            is_locked: false,
            reason: None,
            unlocks_at: None,
            lockout: None,
        }
    }
}

/// Service managing account lockouts.
///
/// # Thread Safety
///
/// This service is thread-safe and can be shared across multiple tasks.
pub struct AccountLockoutService<L: AccountLockoutRepository> {
    repository: Arc<L>,
    config: LockoutConfig,
}

impl<L: AccountLockoutRepository> AccountLockoutService<L> {
    pub fn new(repository: Arc<L>, config: LockoutConfig) -> Self {
        Self { repository, config }
    }

    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    /// Lock an account.
    ///
    /// Fails with [`LockoutError::AlreadyLocked`] if the user already has a lock in
    /// effect. The existing lock is left unchanged.
    pub async fn lock_account(&self, request: LockRequest) -> Result<AccountLockout, Error> {
        if let Some(duration) = request.duration {
            if duration <= Duration::zero() {
                return Err(ValidationError::InvalidField(
                    "Lockout duration must be positive".to_string(),
                )
                .into());
            }
        }

        let now = Utc::now();
        let reason = request
            .reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| request.lock_type.default_reason().to_string());

        let lockout = self
            .repository
            .create(NewAccountLockout {
                user_id: request.user_id,
                lock_type: request.lock_type,
                reason,
                threat_level: request.threat_level,
                locked_at: now,
                unlocks_at: request.duration.map(|d| now + d),
            })
            .await?;

        tracing::info!(
            user_id = %lockout.user_id,
            lockout_id = %lockout.id,
            lock_type = %lockout.lock_type,
            unlocks_at = ?lockout.unlocks_at,
            "Account locked"
        );

        Ok(lockout)
    }

    /// Lift the lock currently in effect for a user.
    ///
    /// Fails with [`LockoutError::NoActiveLockout`] when nothing is locked. An
    /// indefinite lock can only be lifted by an administrator, so `unlocked_by`
    /// is required for it.
    pub async fn unlock_account(
        &self,
        user_id: &UserId,
        unlocked_by: Option<&UserId>,
    ) -> Result<AccountLockout, Error> {
        let now = Utc::now();
        let active = self
            .repository
            .find_active(user_id, now)
            .await?
            .ok_or(LockoutError::NoActiveLockout)?;

        if active.is_indefinite() {
            unlocked_by.require_field("unlocked_by")?;
        }

        // A concurrent unlock or sweep may have won the race
        let lockout = self
            .repository
            .deactivate(&active.id, now, unlocked_by)
            .await?
            .ok_or(LockoutError::NoActiveLockout)?;

        tracing::info!(
            user_id = %user_id,
            lockout_id = %lockout.id,
            unlocked_by = ?unlocked_by.map(|u| u.as_str()),
            "Account unlocked"
        );

        Ok(lockout)
    }

    /// Deactivate every timeboxed lock whose `unlocks_at` has passed.
    ///
    /// Safe to run concurrently with manual unlocks: both converge on an inactive row.
    pub async fn process_automatic_unlocks(&self) -> Result<Vec<AccountLockout>, Error> {
        let expired = self.repository.expire_stale(Utc::now()).await?;
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Automatically unlocked expired lockouts");
        }
        Ok(expired)
    }

    /// Current lock state for a user.
    pub async fn check_account_lockout(&self, user_id: &UserId) -> Result<LockoutStatus, Error> {
        let now = Utc::now();
        let Some(lockout) = self.repository.find_active(user_id, now).await? else {
            return Ok(LockoutStatus::unlocked(user_id));
        };

        // A stale is_active flag alone never locks the user
        if !lockout.is_effective_at(now) {
            return Ok(LockoutStatus::unlocked(user_id));
        }

        Ok(LockoutStatus {
            user_id: user_id.clone(),
            is_locked: true,
            reason: Some(lockout.reason.clone()),
            unlocks_at: lockout.unlocks_at,
            lockout: Some(lockout),
        })
    }

    /// Fail with [`LockoutError::AccountLocked`] if the user is locked.
    pub async fn ensure_not_locked(&self, user_id: &UserId) -> Result<(), Error> {
        let status = self.check_account_lockout(user_id).await?;
        if status.is_locked {
            return Err(LockoutError::AccountLocked {
                reason: status.reason.unwrap_or_default(),
                unlocks_at: status.unlocks_at,
            }
            .into());
        }
        Ok(())
    }

    /// Start the background automatic unlock task.
    ///
    /// The task runs [`Self::process_automatic_unlocks`] every
    /// [`LockoutConfig::sweep_interval`] until `shutdown` changes.
    pub fn start_unlock_task(
        &self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let repository = Arc::clone(&self.repository);
        let sweep_interval = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(sweep_interval);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        match repository.expire_stale(Utc::now()).await {
                            Ok(expired) if !expired.is_empty() => {
                                tracing::info!(
                                    count = expired.len(),
                                    "Automatically unlocked expired lockouts"
                                );
                            }
                            Err(e) => {
                                tracing::warn!(
                                    error = %e,
                                    "Failed to process automatic unlocks"
                                );
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down automatic unlock task");
                        break;
                    }
                }
            }
        })
    }
}
