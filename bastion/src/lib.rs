//! # Bastion
//!
//! Bastion is the account security layer that sits in front of your credential check.
//! It decides whether a login may proceed, records every attempt with a threat
//! classification, detects brute force campaigns, locks and unlocks accounts, tracks
//! the devices each user signs in from and keeps an auditable log of security events.
//!
//! Credential verification itself stays in your application: Bastion tells you whether
//! to try it and records what happened afterwards.
//!
//! ## Storage Support
//!
//! - SQLite (feature `sqlite`, enabled by default)
//!
//! Other backends implement the repository traits in [`bastion_core::repositories`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use bastion::{BastionBuilder, LoginAttemptRequest, LoginCheck};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bastion = BastionBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     let gate = bastion
//!         .check_login(&LoginCheck::new("alice@example.com", "203.0.113.7"))
//!         .await?;
//!     if gate.is_allowed {
//!         // verify the credential, then record the outcome
//!         bastion
//!             .record_login(LoginAttemptRequest::success("alice@example.com", "203.0.113.7"))
//!             .await?;
//!     }
//!
//!     Ok(())
//! }
//! ```
use std::sync::Arc;

use bastion_core::{
    repositories::{
        AccountLockoutRepositoryAdapter, LoginAttemptRepositoryAdapter,
        PasswordHistoryRepositoryAdapter, PasswordPolicyRepositoryAdapter, RepositoryProvider,
        SecurityEventRepositoryAdapter, TrustedDeviceRepositoryAdapter,
    },
    services::{
        AccountLockoutService, BruteForceDetector, LoginAttemptService, PasswordPolicyService,
        SecurityAnalyticsService, SecurityEventService, ThreatAnalyzer, TrustedDeviceService,
    },
    storage::event_types,
};
use serde_json::json;

pub mod builder;

pub use builder::{BastionBuilder, BastionBuilderError, NoStorage, WithStorage};

/// Re-export core types from bastion_core
///
/// These types are commonly used when working with the Bastion API.
pub use bastion_core::{
    AccountLockout, DeviceId, DeviceStatus, Error, ErrorKind, LockType, LockoutId, Location,
    LoginAttempt, LoginOutcome, PasswordPolicy, PolicyId, SecurityConfig, SecurityEvent,
    SecurityEventId, TenantId, ThreatLevel, TrustedDevice, UserId,
    config::{
        BruteForceConfig, DeviceTrustConfig, LockoutConfig, PasswordHashingConfig,
        RetentionConfig, ThreatConfig,
    },
    crypto::device_fingerprint,
    services::{
        ActivityContext, CompromisedPasswordChecker, DetectionOutcome, DeviceRegistration,
        DeviceValidationResult, LockRequest, LockoutStatus, LoginAttemptRequest,
        LoginValidationResult, NeverCompromised, PasswordSubject, PasswordValidationResult,
        RecordedAttempt, RiskScore, SecurityDashboard, SecurityReport, StaticDenylist,
        ThreatAssessment, TimeWindow,
    },
    storage::{NewSecurityEvent, SecurityEventQuery},
};

/// Re-export storage backends
///
/// These storage implementations are available when the corresponding feature is enabled.
#[cfg(feature = "sqlite")]
pub use bastion_storage_sqlite::SqliteRepositoryProvider;

type PolicyRepo<R> = PasswordPolicyRepositoryAdapter<R>;
type HistoryRepo<R> = PasswordHistoryRepositoryAdapter<R>;
type AttemptRepo<R> = LoginAttemptRepositoryAdapter<R>;
type LockoutRepo<R> = AccountLockoutRepositoryAdapter<R>;
type DeviceRepo<R> = TrustedDeviceRepositoryAdapter<R>;
type EventRepo<R> = SecurityEventRepositoryAdapter<R>;

/// Request context for the pre-authentication login gate.
#[derive(Debug, Clone)]
pub struct LoginCheck {
    pub email: String,
    pub ip_address: String,
    /// Account the credential resolved to, if any
    pub user_id: Option<UserId>,
    pub tenant_id: Option<TenantId>,
    pub user_agent: Option<String>,
}

impl LoginCheck {
    pub fn new(email: &str, ip_address: &str) -> Self {
        Self {
            email: email.to_string(),
            ip_address: ip_address.to_string(),
            user_id: None,
            tenant_id: None,
            user_agent: None,
        }
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
}

/// Everything [`Bastion::record_login`] did with one attempt.
#[derive(Debug, Clone)]
pub struct LoginRecord {
    pub recorded: RecordedAttempt,
    /// Trust decision for the device of a successful login, taken from the device
    /// state before this login was counted. `None` when the attempt failed, carried
    /// no fingerprint or user, or the device lookup failed.
    pub device: Option<DeviceValidationResult>,
}

impl LoginRecord {
    /// Whether the caller should run a second factor before issuing a session.
    pub fn requires_mfa(&self) -> bool {
        self.device.as_ref().is_some_and(|d| d.requires_mfa)
    }
}

/// The main entry point for Bastion.
///
/// `Bastion` owns one instance of every security service, all sharing the same
/// repository provider, and exposes the login flow on top of them.
///
/// Secondary effects (security events for administrative actions, device activity
/// on successful logins) are logged and never fail the primary operation.
pub struct Bastion<R: RepositoryProvider> {
    repositories: Arc<R>,
    config: SecurityConfig,
    password_policy: Arc<PasswordPolicyService<PolicyRepo<R>, HistoryRepo<R>>>,
    login_attempts:
        Arc<LoginAttemptService<AttemptRepo<R>, EventRepo<R>, LockoutRepo<R>, PolicyRepo<R>>>,
    lockouts: Arc<AccountLockoutService<LockoutRepo<R>>>,
    devices: Arc<TrustedDeviceService<DeviceRepo<R>>>,
    events: Arc<SecurityEventService<EventRepo<R>>>,
    analytics:
        Arc<SecurityAnalyticsService<AttemptRepo<R>, EventRepo<R>, LockoutRepo<R>, DeviceRepo<R>>>,
}

impl<R: RepositoryProvider> Bastion<R> {
    /// Create a new Bastion instance with the default [`SecurityConfig`].
    pub fn new(repositories: Arc<R>) -> Self {
        Self::with_config(repositories, SecurityConfig::default())
    }

    /// Create a new Bastion instance with a custom configuration.
    pub fn with_config(repositories: Arc<R>, config: SecurityConfig) -> Self {
        let policy_repo = Arc::new(PolicyRepo::new(repositories.clone()));
        let attempt_repo = Arc::new(AttemptRepo::new(repositories.clone()));
        let lockout_repo = Arc::new(LockoutRepo::new(repositories.clone()));
        let device_repo = Arc::new(DeviceRepo::new(repositories.clone()));
        let event_repo = Arc::new(EventRepo::new(repositories.clone()));

        let password_policy = Arc::new(PasswordPolicyService::new(
            policy_repo.clone(),
            Arc::new(HistoryRepo::new(repositories.clone())),
            config.hashing.clone(),
            config.retention.clone(),
        ));
        let lockouts = Arc::new(AccountLockoutService::new(
            lockout_repo.clone(),
            config.lockout.clone(),
        ));
        let login_attempts = Arc::new(LoginAttemptService::new(
            attempt_repo.clone(),
            event_repo.clone(),
            policy_repo,
            ThreatAnalyzer::new(attempt_repo.clone(), config.threat.clone()),
            BruteForceDetector::new(
                attempt_repo.clone(),
                event_repo.clone(),
                config.brute_force.clone(),
            ),
            lockouts.clone(),
            config.retention.clone(),
        ));
        let devices = Arc::new(TrustedDeviceService::new(
            device_repo.clone(),
            config.device_trust.clone(),
        ));
        let events = Arc::new(SecurityEventService::new(event_repo.clone()));
        let analytics = Arc::new(SecurityAnalyticsService::new(
            attempt_repo,
            event_repo,
            lockout_repo,
            device_repo,
            config.threat.clone(),
        ));

        Self {
            repositories,
            config,
            password_policy,
            login_attempts,
            lockouts,
            devices,
            events,
            analytics,
        }
    }

    /// Replace the compromised password oracle used by password validation.
    pub fn with_compromised_checker(mut self, checker: Arc<dyn CompromisedPasswordChecker>) -> Self {
        self.password_policy = Arc::new(
            PasswordPolicyService::new(
                Arc::new(PolicyRepo::new(self.repositories.clone())),
                Arc::new(HistoryRepo::new(self.repositories.clone())),
                self.config.hashing.clone(),
                self.config.retention.clone(),
            )
            .with_compromised_checker(checker),
        );
        self
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<(), Error> {
        self.repositories.migrate().await
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        self.repositories.health_check().await
    }

    // ========================================================================
    // Login flow
    // ========================================================================

    /// Decide whether a login may proceed to credential verification.
    ///
    /// Call this before checking the credential. Use
    /// [`LoginValidationResult::into_result`] to turn a denial into an error.
    pub async fn check_login(&self, check: &LoginCheck) -> Result<LoginValidationResult, Error> {
        self.login_attempts
            .validate_login_attempt(
                check.user_id.as_ref(),
                check.tenant_id.as_ref(),
                &check.email,
                &check.ip_address,
                check.user_agent.as_deref(),
            )
            .await
    }

    /// Record the outcome of a credential check.
    ///
    /// Failures run brute force detection and, when enabled, the automatic lockout.
    /// A successful login from a known device updates that device's activity and
    /// trust score. Unknown devices are reported but not registered: call
    /// [`Self::register_device`] once the user has confirmed the device.
    pub async fn record_login(&self, request: LoginAttemptRequest) -> Result<LoginRecord, Error> {
        let recorded = self.login_attempts.record_login_attempt(request).await?;

        let attempt = &recorded.attempt;
        let device = match (&attempt.outcome, &attempt.user_id, &attempt.device_fingerprint) {
            (LoginOutcome::Success, Some(user_id), Some(fingerprint)) => {
                self.observe_device(user_id, fingerprint, &attempt.ip_address)
                    .await
            }
            _ => None,
        };

        Ok(LoginRecord { recorded, device })
    }

    async fn observe_device(
        &self,
        user_id: &UserId,
        fingerprint: &str,
        ip_address: &str,
    ) -> Option<DeviceValidationResult> {
        let validation = match self.devices.validate_device(user_id, fingerprint).await {
            Ok(validation) => validation,
            Err(e) => {
                tracing::warn!(error = %e, user_id = %user_id, "Failed to validate device");
                return None;
            }
        };

        if validation.device.is_some() && !validation.is_blocked {
            if let Err(e) = self
                .devices
                .update_device_activity(user_id, fingerprint, ip_address)
                .await
            {
                tracing::warn!(error = %e, user_id = %user_id, "Failed to update device activity");
            }
        }

        Some(validation)
    }

    /// Assess a session or login after the fact from richer context.
    pub async fn assess_activity(&self, context: &ActivityContext) -> Result<ThreatAssessment, Error> {
        self.login_attempts.analyzer().assess_activity(context).await
    }

    /// Delete login attempts older than the configured retention.
    pub async fn cleanup_old_attempts(&self) -> Result<u64, Error> {
        self.login_attempts.cleanup_old_attempts().await
    }

    // ========================================================================
    // Passwords
    // ========================================================================

    pub async fn password_policy(&self, tenant_id: Option<&TenantId>) -> Result<PasswordPolicy, Error> {
        self.password_policy.effective_policy(tenant_id).await
    }

    /// Create or replace a password policy. Saving an active policy deactivates
    /// the previously active one for the same scope.
    pub async fn save_password_policy(&self, policy: PasswordPolicy) -> Result<PasswordPolicy, Error> {
        self.password_policy.save_policy(policy).await
    }

    pub async fn validate_password(
        &self,
        password: &str,
        subject: &PasswordSubject,
    ) -> Result<PasswordValidationResult, Error> {
        self.password_policy.validate_password(password, subject).await
    }

    /// Validate and hash a new password, record it in the user's history and
    /// log a `password_changed` event. Returns the hash to store.
    pub async fn set_password(
        &self,
        user_id: &UserId,
        password: &str,
        subject: &PasswordSubject,
    ) -> Result<String, Error> {
        let hash = self
            .password_policy
            .set_password(user_id, password, subject)
            .await?;

        let mut event = NewSecurityEvent::new(
            event_types::PASSWORD_CHANGED,
            ThreatLevel::Low,
            "Password changed",
        )
        .user(user_id.clone());
        if let Some(tenant_id) = &subject.tenant_id {
            event = event.tenant(tenant_id.clone());
        }
        self.emit(event).await;

        Ok(hash)
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, Error> {
        self.password_policy.verify_password(password, hash)
    }

    /// Fail with [`bastion_core::error::PasswordError::Expired`] when the user's
    /// current password has outlived the policy's maximum age.
    pub async fn enforce_password_expiry(
        &self,
        user_id: &UserId,
        tenant_id: Option<&TenantId>,
    ) -> Result<(), Error> {
        self.password_policy
            .enforce_password_expiry(user_id, tenant_id)
            .await
    }

    // ========================================================================
    // Lockouts
    // ========================================================================

    /// Lock an account and log an `account_locked` event.
    pub async fn lock_account(&self, request: LockRequest) -> Result<AccountLockout, Error> {
        let lockout = self.lockouts.lock_account(request).await?;

        self.emit(
            NewSecurityEvent::new(
                event_types::ACCOUNT_LOCKED,
                lockout.threat_level,
                lockout.reason.clone(),
            )
            .user(lockout.user_id.clone())
            .metadata(json!({
                "lockout_id": lockout.id,
                "lock_type": lockout.lock_type.as_str(),
                "unlocks_at": lockout.unlocks_at,
            })),
        )
        .await;

        Ok(lockout)
    }

    /// Lift the active lock of an account and log an `account_unlocked` event.
    pub async fn unlock_account(
        &self,
        user_id: &UserId,
        unlocked_by: Option<&UserId>,
    ) -> Result<AccountLockout, Error> {
        let lockout = self.lockouts.unlock_account(user_id, unlocked_by).await?;

        self.emit(
            NewSecurityEvent::new(
                event_types::ACCOUNT_UNLOCKED,
                ThreatLevel::Low,
                "Account unlocked",
            )
            .user(user_id.clone())
            .metadata(json!({
                "lockout_id": lockout.id,
                "unlocked_by": unlocked_by,
            })),
        )
        .await;

        Ok(lockout)
    }

    pub async fn check_account_lockout(&self, user_id: &UserId) -> Result<LockoutStatus, Error> {
        self.lockouts.check_account_lockout(user_id).await
    }

    /// Deactivate every timeboxed lock that has run out.
    pub async fn process_automatic_unlocks(&self) -> Result<Vec<AccountLockout>, Error> {
        self.lockouts.process_automatic_unlocks().await
    }

    /// Start the background sweep that lifts expired locks until `shutdown` changes.
    pub fn start_unlock_task(
        &self,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        self.lockouts.start_unlock_task(shutdown)
    }

    // ========================================================================
    // Devices
    // ========================================================================

    /// Register a device for a user and log a `device_added` event.
    pub async fn register_device(&self, registration: DeviceRegistration) -> Result<TrustedDevice, Error> {
        let ip_address = registration.ip_address.clone();
        let device = self.devices.register_trusted_device(registration).await?;

        let mut event = NewSecurityEvent::new(
            event_types::DEVICE_ADDED,
            ThreatLevel::Low,
            format!("Device '{}' added", device.name),
        )
        .user(device.user_id.clone())
        .device_fingerprint(Some(device.fingerprint.clone()))
        .metadata(json!({ "device_id": device.id }));
        if let Some(ip_address) = ip_address {
            event = event.ip_address(ip_address);
        }
        self.emit(event).await;

        Ok(device)
    }

    pub async fn validate_device(
        &self,
        user_id: &UserId,
        fingerprint: &str,
    ) -> Result<DeviceValidationResult, Error> {
        self.devices.validate_device(user_id, fingerprint).await
    }

    /// Revoke a device and log a `device_revoked` event.
    pub async fn revoke_device(&self, device_id: &DeviceId, reason: &str) -> Result<TrustedDevice, Error> {
        let device = self.devices.revoke_trusted_device(device_id, reason).await?;

        self.emit(
            NewSecurityEvent::new(
                event_types::DEVICE_REVOKED,
                ThreatLevel::Medium,
                format!("Device '{}' revoked", device.name),
            )
            .user(device.user_id.clone())
            .device_fingerprint(Some(device.fingerprint.clone()))
            .metadata(json!({ "device_id": device.id, "reason": device.revoked_reason })),
        )
        .await;

        Ok(device)
    }

    pub async fn list_devices(&self, user_id: &UserId) -> Result<Vec<TrustedDevice>, Error> {
        self.devices.list_devices(user_id).await
    }

    // ========================================================================
    // Security events
    // ========================================================================

    pub async fn log_security_event(&self, event: NewSecurityEvent) -> Result<SecurityEvent, Error> {
        self.events.log_security_event(event).await
    }

    pub async fn get_security_event(&self, id: &SecurityEventId) -> Result<SecurityEvent, Error> {
        self.events.get_event(id).await
    }

    pub async fn resolve_security_event(
        &self,
        id: &SecurityEventId,
        resolved_by: &UserId,
        notes: Option<String>,
    ) -> Result<SecurityEvent, Error> {
        self.events
            .resolve_security_event(id, resolved_by, notes)
            .await
    }

    pub async fn list_security_events(
        &self,
        query: &SecurityEventQuery,
    ) -> Result<Vec<SecurityEvent>, Error> {
        self.events.list_events(query).await
    }

    async fn emit(&self, event: NewSecurityEvent) {
        let event_type = event.event_type.clone();
        if let Err(e) = self.events.log_security_event(event).await {
            tracing::warn!(error = %e, event_type = %event_type, "Failed to log security event");
        }
    }

    // ========================================================================
    // Analytics
    // ========================================================================

    pub async fn security_dashboard(&self, window: &TimeWindow) -> Result<SecurityDashboard, Error> {
        self.analytics.get_security_dashboard(window).await
    }

    pub async fn security_report(&self, window: &TimeWindow) -> Result<SecurityReport, Error> {
        self.analytics.get_security_report(window).await
    }

    pub async fn risk_score(&self, user_id: &UserId, window: &TimeWindow) -> Result<RiskScore, Error> {
        self.analytics.get_risk_score(user_id, window).await
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;

    async fn bastion() -> Bastion<SqliteRepositoryProvider> {
        let repositories = Arc::new(
            SqliteRepositoryProvider::connect("sqlite::memory:")
                .await
                .unwrap(),
        );
        let bastion = Bastion::with_config(
            repositories,
            SecurityConfig::default().with_hashing(PasswordHashingConfig::insecure_fast()),
        );
        bastion.migrate().await.unwrap();
        bastion
    }

    #[tokio::test]
    async fn test_lock_and_unlock_log_events() {
        let bastion = bastion().await;
        let user_id = UserId::new("usr_locked");

        bastion
            .lock_account(LockRequest::new(user_id.clone(), LockType::AdminAction))
            .await
            .unwrap();
        assert!(bastion.check_account_lockout(&user_id).await.unwrap().is_locked);

        let admin = UserId::new("usr_admin");
        bastion.unlock_account(&user_id, Some(&admin)).await.unwrap();
        assert!(!bastion.check_account_lockout(&user_id).await.unwrap().is_locked);

        let events = bastion
            .list_security_events(&SecurityEventQuery {
                user_id: Some(user_id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert!(types.contains(&event_types::ACCOUNT_LOCKED));
        assert!(types.contains(&event_types::ACCOUNT_UNLOCKED));
    }

    #[tokio::test]
    async fn test_failed_login_has_no_device_decision() {
        let bastion = bastion().await;

        let record = bastion
            .record_login(
                LoginAttemptRequest::failure("bob@example.com", "203.0.113.9", "bad password")
                    .user(UserId::new("usr_bob"))
                    .device_fingerprint("fp-bob"),
            )
            .await
            .unwrap();

        assert!(record.device.is_none());
        assert!(!record.requires_mfa());
        assert_eq!(record.recorded.attempt.outcome, LoginOutcome::Failed);
    }
}
