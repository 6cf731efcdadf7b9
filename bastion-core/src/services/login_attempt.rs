//! Login attempt ledger and login gate.
//!
//! Every authentication attempt is recorded once, with a threat level computed
//! before the row is written. Failed attempts then run brute force detection
//! before the call returns, so no detection is dropped.
//!
//! [`LoginAttemptService::validate_login_attempt`] is the advisory gate run
//! before credentials are checked. It never records anything or locks anyone.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::{
    Error,
    config::{LockoutConfig, RetentionConfig},
    error::{LockoutError, ValidationError},
    id::{TenantId, UserId},
    repositories::{
        AccountLockoutRepository, LoginAttemptRepository, PasswordPolicyRepository,
        SecurityEventRepository,
    },
    services::{
        brute_force::{BruteForceDetector, DetectionOutcome},
        lockout::{AccountLockoutService, LockRequest},
        password_policy::resolve_effective_policy,
        threat::{ThreatAnalyzer, ThreatContext},
    },
    storage::{
        AccountLockout, AttemptFilter, LockType, Location, LoginAttempt, LoginOutcome,
        NewLoginAttempt, NewSecurityEvent, PasswordPolicy, ThreatLevel, event_types,
    },
    validation::{normalize_email, validate_ip_address},
};

/// An authentication attempt to record.
#[derive(Debug, Clone)]
pub struct LoginAttemptRequest {
    /// `None` when the credential did not resolve to a known account
    pub user_id: Option<UserId>,
    pub tenant_id: Option<TenantId>,
    pub email: String,
    pub outcome: LoginOutcome,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
    pub failure_reason: Option<String>,
    pub location: Option<Location>,
}

impl LoginAttemptRequest {
    fn with_outcome(email: &str, ip_address: &str, outcome: LoginOutcome) -> Self {
        Self {
            user_id: None,
            tenant_id: None,
            email: normalize_email(email),
            outcome,
            ip_address: ip_address.to_string(),
            user_agent: None,
            device_fingerprint: None,
            failure_reason: None,
            location: None,
        }
    }

    pub fn success(email: &str, ip_address: &str) -> Self {
        Self::with_outcome(email, ip_address, LoginOutcome::Success)
    }

    pub fn failure(email: &str, ip_address: &str, reason: impl Into<String>) -> Self {
        let mut request = Self::with_outcome(email, ip_address, LoginOutcome::Failed);
        request.failure_reason = Some(reason.into());
        request
    }

    /// An attempt refused by the login gate before credentials were checked.
    pub fn blocked(email: &str, ip_address: &str, reason: impl Into<String>) -> Self {
        let mut request = Self::with_outcome(email, ip_address, LoginOutcome::Blocked);
        request.failure_reason = Some(reason.into());
        request
    }

    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn device_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.device_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn location(mut self, location: Location) -> Self {
        self.location = Some(location).filter(|l| !l.is_empty());
        self
    }
}

/// What recording an attempt produced besides the ledger row.
#[derive(Debug, Clone)]
pub struct RecordedAttempt {
    pub attempt: LoginAttempt,
    /// Brute force detection result, `None` for non-failures or when detection failed
    pub detection: Option<DetectionOutcome>,
    /// Lockout created because the failure exhausted the remaining attempts
    pub lockout: Option<AccountLockout>,
}

/// Result of the pre-authentication login gate.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginValidationResult {
    pub is_allowed: bool,
    pub account_locked: bool,
    pub unlocks_at: Option<DateTime<Utc>>,
    pub threat_level: ThreatLevel,
    pub remaining_attempts: u32,
    pub requires_mfa: bool,
    /// Human-readable reason when the attempt is denied
    pub reason: Option<String>,
}

impl LoginValidationResult {
    /// Convert a denial into the matching policy-state error.
    pub fn into_result(self) -> Result<Self, Error> {
        if self.is_allowed {
            return Ok(self);
        }
        if self.account_locked {
            return Err(LockoutError::AccountLocked {
                reason: self.reason.unwrap_or_default(),
                unlocks_at: self.unlocks_at,
            }
            .into());
        }
        Err(LockoutError::TooManyAttempts.into())
    }
}

pub struct LoginAttemptService<A, E, L, P>
where
    A: LoginAttemptRepository,
    E: SecurityEventRepository,
    L: AccountLockoutRepository,
    P: PasswordPolicyRepository,
{
    attempts: Arc<A>,
    events: Arc<E>,
    policies: Arc<P>,
    analyzer: ThreatAnalyzer<A>,
    detector: BruteForceDetector<A, E>,
    lockouts: Arc<AccountLockoutService<L>>,
    config: LockoutConfig,
    retention: RetentionConfig,
}

impl<A, E, L, P> LoginAttemptService<A, E, L, P>
where
    A: LoginAttemptRepository,
    E: SecurityEventRepository,
    L: AccountLockoutRepository,
    P: PasswordPolicyRepository,
{
    pub fn new(
        attempts: Arc<A>,
        events: Arc<E>,
        policies: Arc<P>,
        analyzer: ThreatAnalyzer<A>,
        detector: BruteForceDetector<A, E>,
        lockouts: Arc<AccountLockoutService<L>>,
        retention: RetentionConfig,
    ) -> Self {
        let config = lockouts.config().clone();
        Self {
            attempts,
            events,
            policies,
            analyzer,
            detector,
            lockouts,
            config,
            retention,
        }
    }

    pub fn analyzer(&self) -> &ThreatAnalyzer<A> {
        &self.analyzer
    }

    /// Failed attempts for `email` inside the lockout attempts window.
    async fn recent_failures(&self, email: &str) -> Result<u32, Error> {
        let since = Utc::now() - self.config.attempts_window;
        Ok(self
            .attempts
            .get_stats(&AttemptFilter::failures_for_email(email, since))
            .await?
            .count)
    }

    /// Record one authentication attempt.
    ///
    /// Detection and auto-lock are secondary effects: their failures are logged
    /// and never fail the recording.
    pub async fn record_login_attempt(&self, mut request: LoginAttemptRequest) -> Result<RecordedAttempt, Error> {
        request.email = normalize_email(&request.email);
        if request.email.is_empty() {
            return Err(ValidationError::MissingField("email".to_string()).into());
        }
        validate_ip_address(&request.ip_address)?;

        let threat_level = self
            .analyzer
            .analyze_threat_level(&ThreatContext {
                user_id: request.user_id.as_ref(),
                email: Some(&request.email),
                ip_address: &request.ip_address,
                user_agent: request.user_agent.as_deref(),
            })
            .await?;

        let attempt = self
            .attempts
            .record(NewLoginAttempt {
                user_id: request.user_id.clone(),
                email: request.email.clone(),
                outcome: request.outcome,
                ip_address: request.ip_address.clone(),
                user_agent: request.user_agent.clone(),
                device_fingerprint: request.device_fingerprint.clone(),
                threat_level,
                failure_reason: request.failure_reason.clone(),
                location: request.location.clone(),
                attempted_at: Utc::now(),
            })
            .await?;

        tracing::debug!(
            email = %attempt.email,
            outcome = %attempt.outcome,
            threat_level = %attempt.threat_level,
            "Recorded login attempt"
        );

        if attempt.outcome != LoginOutcome::Failed {
            return Ok(RecordedAttempt {
                attempt,
                detection: None,
                lockout: None,
            });
        }

        if threat_level >= ThreatLevel::High {
            self.log_event(
                NewSecurityEvent::new(
                    event_types::SUSPICIOUS_LOGIN,
                    threat_level,
                    "Failed login with elevated threat level",
                )
                .ip_address(request.ip_address.clone())
                .user_agent(request.user_agent.clone())
                .device_fingerprint(request.device_fingerprint.clone())
                .location(request.location.clone())
                .metadata(json!({ "email": request.email })),
                request.user_id.as_ref(),
                request.tenant_id.as_ref(),
            )
            .await;
        }

        let detection = match self
            .detector
            .process_brute_force_detection(
                &request.email,
                &request.ip_address,
                request.user_id.as_ref(),
            )
            .await
        {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    email = %request.email,
                    "Brute force detection failed"
                );
                None
            }
        };

        let lockout = match &request.user_id {
            Some(user_id) if self.config.auto_lock_on_threshold => {
                self.auto_lock(user_id, &request, threat_level).await
            }
            _ => None,
        };

        Ok(RecordedAttempt {
            attempt,
            detection,
            lockout,
        })
    }

    async fn auto_lock(
        &self,
        user_id: &UserId,
        request: &LoginAttemptRequest,
        threat_level: ThreatLevel,
    ) -> Option<AccountLockout> {
        let result: Result<Option<AccountLockout>, Error> = async {
            let policy = resolve_effective_policy(self.policies.as_ref(), request.tenant_id.as_ref()).await?;
            if remaining_attempts(&policy, self.recent_failures(&request.email).await?) > 0 {
                return Ok(None);
            }

            let lockout = self
                .lockouts
                .lock_account(
                    LockRequest::new(user_id.clone(), LockType::FailedLogin)
                        .duration(policy.lockout_duration())
                        .threat_level(threat_level.max(ThreatLevel::Medium)),
                )
                .await?;
            Ok(Some(lockout))
        }
        .await;

        match result {
            Ok(Some(lockout)) => {
                self.log_event(
                    NewSecurityEvent::new(
                        event_types::ACCOUNT_LOCKED,
                        lockout.threat_level,
                        lockout.reason.clone(),
                    )
                    .ip_address(request.ip_address.clone())
                    .metadata(json!({
                        "email": request.email,
                        "lockout_id": lockout.id,
                        "unlocks_at": lockout.unlocks_at,
                    })),
                    Some(user_id),
                    request.tenant_id.as_ref(),
                )
                .await;
                Some(lockout)
            }
            Ok(None) => None,
            Err(Error::Lockout(LockoutError::AlreadyLocked { .. })) => None,
            Err(e) => {
                tracing::warn!(error = %e, user_id = %user_id, "Automatic lockout failed");
                None
            }
        }
    }

    async fn log_event(
        &self,
        mut event: NewSecurityEvent,
        user_id: Option<&UserId>,
        tenant_id: Option<&TenantId>,
    ) {
        if let Some(user_id) = user_id {
            event = event.user(user_id.clone());
        }
        if let Some(tenant_id) = tenant_id {
            event = event.tenant(tenant_id.clone());
        }
        let event_type = event.event_type.clone();
        if let Err(e) = self.events.create(event).await {
            tracing::warn!(error = %e, event_type = %event_type, "Failed to log security event");
        }
    }

    /// Decide whether a login attempt may proceed to credential verification.
    ///
    /// Checks run in order: an active lockout denies immediately, then the threat
    /// level is computed, then remaining attempts in the trailing window. A high
    /// threat level on an allowed attempt requires MFA.
    pub async fn validate_login_attempt(
        &self,
        user_id: Option<&UserId>,
        tenant_id: Option<&TenantId>,
        email: &str,
        ip_address: &str,
        user_agent: Option<&str>,
    ) -> Result<LoginValidationResult, Error> {
        let email = normalize_email(email);
        let email = email.as_str();

        if let Some(user_id) = user_id {
            let status = self.lockouts.check_account_lockout(user_id).await?;
            if status.is_locked {
                let threat_level = status
                    .lockout
                    .as_ref()
                    .map(|l| l.threat_level)
                    .unwrap_or(ThreatLevel::High);
                return Ok(LoginValidationResult {
                    is_allowed: false,
                    account_locked: true,
                    unlocks_at: status.unlocks_at,
                    threat_level,
                    remaining_attempts: 0,
                    requires_mfa: false,
                    reason: status.reason,
                });
            }
        }

        let threat_level = self
            .analyzer
            .analyze_threat_level(&ThreatContext {
                user_id,
                email: Some(email),
                ip_address,
                user_agent,
            })
            .await?;

        let policy = resolve_effective_policy(self.policies.as_ref(), tenant_id).await?;
        let remaining = remaining_attempts(&policy, self.recent_failures(email).await?);

        if remaining == 0 {
            return Ok(LoginValidationResult {
                is_allowed: false,
                account_locked: false,
                unlocks_at: None,
                threat_level,
                remaining_attempts: 0,
                requires_mfa: false,
                reason: Some(LockType::FailedLogin.default_reason().to_string()),
            });
        }

        Ok(LoginValidationResult {
            is_allowed: true,
            account_locked: false,
            unlocks_at: None,
            threat_level,
            remaining_attempts: remaining,
            requires_mfa: threat_level >= ThreatLevel::High,
            reason: None,
        })
    }

    /// Delete ledger rows older than the retention period.
    pub async fn cleanup_old_attempts(&self) -> Result<u64, Error> {
        let before = Utc::now() - self.retention.login_attempts;
        let count = self.attempts.cleanup_before(before).await?;
        if count > 0 {
            tracing::info!(count = count, "Cleaned up old login attempt records");
        }
        Ok(count)
    }
}

fn remaining_attempts(policy: &PasswordPolicy, failures: u32) -> u32 {
    policy.max_failed_attempts.saturating_sub(failures)
}
