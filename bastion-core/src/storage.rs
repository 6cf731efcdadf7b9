//! Records persisted by the security subsystem
//!
//! | Record                 | Lifecycle                                                        |
//! | ---------------------- | ---------------------------------------------------------------- |
//! | [`PasswordPolicy`]     | Written by administrators, read-only to the security services.   |
//! | [`LoginAttempt`]       | Append-only ledger, never updated after creation.                |
//! | [`AccountLockout`]     | One row per lock episode, deactivated on unlock.                 |
//! | [`TrustedDevice`]      | One row per (user, fingerprint), soft-terminated by revocation.  |
//! | [`PasswordHistoryEntry`] | Append-only, pruned to the retained depth.                     |
//! | [`SecurityEvent`]      | Append-only except for the one-way resolution transition.        |
//!
//! The records reference each other only through the user identifier and are
//! correlated at query time.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    config::{TRUST_SCORE_MAX, TRUST_SCORE_MIN, ThreatConfig},
    error::ValidationError,
    id::{DeviceId, LockoutId, PolicyId, SecurityEventId, TenantId, UserId},
    validation::normalize_email,
};

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ValidationError::InvalidField(format!(
                        "unknown {} '{other}'",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

/// Ordered classification of how risky a request or actor appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

string_enum!(ThreatLevel {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

impl ThreatLevel {
    /// Map an accumulated risk score onto a level.
    ///
    /// Monotonic in `score`: a higher score never yields a lower level.
    pub fn from_score(score: f64, config: &ThreatConfig) -> Self {
        if score >= config.critical_threshold {
            ThreatLevel::Critical
        } else if score >= config.high_threshold {
            ThreatLevel::High
        } else if score >= config.medium_threshold {
            ThreatLevel::Medium
        } else {
            ThreatLevel::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginOutcome {
    Success,
    Failed,
    Blocked,
    Suspicious,
}

string_enum!(LoginOutcome {
    Success => "success",
    Failed => "failed",
    Blocked => "blocked",
    Suspicious => "suspicious",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    FailedLogin,
    SuspiciousActivity,
    AdminAction,
}

string_enum!(LockType {
    FailedLogin => "failed_login",
    SuspiciousActivity => "suspicious_activity",
    AdminAction => "admin_action",
});

impl LockType {
    /// Human-readable reason shown to a locked-out user.
    pub fn default_reason(&self) -> &'static str {
        match self {
            LockType::FailedLogin => "Too many failed login attempts",
            LockType::SuspiciousActivity => "Suspicious activity detected on this account",
            LockType::AdminAction => "Account locked by an administrator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Trusted,
    Untrusted,
    Suspicious,
    Blocked,
}

string_enum!(DeviceStatus {
    Trusted => "trusted",
    Untrusted => "untrusted",
    Suspicious => "suspicious",
    Blocked => "blocked",
});

/// Geo/IP enrichment resolved upstream. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub country: Option<String>,
    pub city: Option<String>,
    pub isp: Option<String>,
    pub timezone: Option<String>,
}

impl Location {
    pub fn is_empty(&self) -> bool {
        self.country.is_none() && self.city.is_none() && self.isp.is_none() && self.timezone.is_none()
    }
}

/// Password rules for a tenant, or the global fallback when `tenant_id` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordPolicy {
    pub id: PolicyId,
    pub tenant_id: Option<TenantId>,
    pub name: String,
    pub min_length: u32,
    pub max_length: u32,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_symbol: bool,
    /// Number of previous passwords that may not be reused
    pub history_count: u32,
    /// Days until a password expires, `0` disables expiry
    pub max_age_days: u32,
    pub max_failed_attempts: u32,
    pub lockout_duration_minutes: u32,
    /// Case-insensitive patterns (regular expressions) a password must not contain
    pub forbidden_patterns: Vec<String>,
    pub prevent_user_info: bool,
    pub prevent_common_passwords: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PasswordPolicy {
    /// The built-in policy used when neither a tenant nor a global policy is stored.
    pub fn builtin_default() -> Self {
        let now = Utc::now();
        Self {
            id: PolicyId::new("pol_builtin_default"),
            tenant_id: None,
            name: "Default".to_string(),
            min_length: 8,
            max_length: 128,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_symbol: true,
            history_count: 5,
            max_age_days: 90,
            max_failed_attempts: 5,
            lockout_duration_minutes: 30,
            forbidden_patterns: Vec::new(),
            prevent_user_info: true,
            prevent_common_passwords: true,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn lockout_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.lockout_duration_minutes))
    }

    pub fn max_age(&self) -> Option<Duration> {
        (self.max_age_days > 0).then(|| Duration::days(i64::from(self.max_age_days)))
    }
}

/// One immutable row of the login ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub id: i64,
    /// `None` when the credential did not resolve to a known account
    pub user_id: Option<UserId>,
    pub email: String,
    pub outcome: LoginOutcome,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
    pub threat_level: ThreatLevel,
    pub failure_reason: Option<String>,
    pub location: Option<Location>,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLoginAttempt {
    pub user_id: Option<UserId>,
    pub email: String,
    pub outcome: LoginOutcome,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
    pub threat_level: ThreatLevel,
    pub failure_reason: Option<String>,
    pub location: Option<Location>,
    pub attempted_at: DateTime<Utc>,
}

/// Filter for counting ledger rows. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AttemptFilter {
    pub email: Option<String>,
    pub ip_address: Option<String>,
    pub user_id: Option<UserId>,
    pub outcome: Option<LoginOutcome>,
    /// Only rows with `attempted_at >= since`
    pub since: Option<DateTime<Utc>>,
    /// Only rows with `attempted_at <= until`
    pub until: Option<DateTime<Utc>>,
}

impl AttemptFilter {
    pub fn failures_for_email(email: &str, since: DateTime<Utc>) -> Self {
        Self {
            email: Some(normalize_email(email)),
            outcome: Some(LoginOutcome::Failed),
            since: Some(since),
            ..Default::default()
        }
    }

    pub fn failures_from_ip(ip_address: &str, since: DateTime<Utc>) -> Self {
        Self {
            ip_address: Some(ip_address.to_string()),
            outcome: Some(LoginOutcome::Failed),
            since: Some(since),
            ..Default::default()
        }
    }

    pub fn matches(&self, attempt: &LoginAttempt) -> bool {
        self.email.as_deref().is_none_or(|e| attempt.email == e)
            && self
                .ip_address
                .as_deref()
                .is_none_or(|ip| attempt.ip_address == ip)
            && self
                .user_id
                .as_ref()
                .is_none_or(|u| attempt.user_id.as_ref() == Some(u))
            && self.outcome.is_none_or(|o| attempt.outcome == o)
            && self.since.is_none_or(|s| attempt.attempted_at >= s)
            && self.until.is_none_or(|u| attempt.attempted_at <= u)
    }
}

/// Count and most recent timestamp of the rows matching an [`AttemptFilter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptStats {
    pub count: u32,
    pub latest_at: Option<DateTime<Utc>>,
}

/// Grouped ledger counts for `since <= attempted_at <= until`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptSummary {
    pub by_outcome: BTreeMap<LoginOutcome, u64>,
    pub by_threat_level: BTreeMap<ThreatLevel, u64>,
    pub unique_ip_addresses: u64,
}

impl AttemptSummary {
    pub fn total(&self) -> u64 {
        self.by_outcome.values().sum()
    }

    pub fn outcome(&self, outcome: LoginOutcome) -> u64 {
        self.by_outcome.get(&outcome).copied().unwrap_or(0)
    }
}

/// Ledger column that failed attempts are ranked by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptGroup {
    Email,
    IpAddress,
}

impl AttemptGroup {
    pub fn column(&self) -> &'static str {
        match self {
            AttemptGroup::Email => "email",
            AttemptGroup::IpAddress => "ip_address",
        }
    }

    pub fn key<'a>(&self, attempt: &'a LoginAttempt) -> &'a str {
        match self {
            AttemptGroup::Email => &attempt.email,
            AttemptGroup::IpAddress => &attempt.ip_address,
        }
    }
}

/// Grouped event log counts for `since <= created_at <= until`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSummary {
    pub total: u64,
    pub unresolved: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_threat_level: BTreeMap<ThreatLevel, u64>,
}

impl EventSummary {
    /// Events at `level` or above.
    pub fn at_least(&self, level: ThreatLevel) -> u64 {
        self.by_threat_level.range(level..).map(|(_, count)| count).sum()
    }

    pub fn of_type(&self, event_type: &str) -> u64 {
        self.by_type.get(event_type).copied().unwrap_or(0)
    }
}

/// One lock episode for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountLockout {
    pub id: LockoutId,
    pub user_id: UserId,
    pub lock_type: LockType,
    pub reason: String,
    pub threat_level: ThreatLevel,
    pub is_active: bool,
    pub locked_at: DateTime<Utc>,
    /// `None` means indefinite: only a manual unlock ends the episode
    pub unlocks_at: Option<DateTime<Utc>>,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub unlocked_by: Option<UserId>,
}

impl AccountLockout {
    /// Whether this row currently locks its user.
    ///
    /// Re-evaluates expiry against `now` instead of trusting `is_active`, since the
    /// automatic unlock sweep runs periodically.
    pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.unlocked_at.is_none()
            && self.unlocks_at.is_none_or(|until| until > now)
    }

    pub fn is_indefinite(&self) -> bool {
        self.unlocks_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAccountLockout {
    pub user_id: UserId,
    pub lock_type: LockType,
    pub reason: String,
    pub threat_level: ThreatLevel,
    pub locked_at: DateTime<Utc>,
    pub unlocks_at: Option<DateTime<Utc>>,
}

/// Device classification derived from a user agent string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_type: String,
    pub os: String,
    pub browser: String,
}

impl DeviceInfo {
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();

        let device_type = if ua.contains("ipad") || ua.contains("tablet") {
            "tablet"
        } else if ua.contains("mobile") || ua.contains("iphone") || ua.contains("android") {
            "mobile"
        } else if ua.contains("bot") || ua.contains("curl") || ua.contains("python") {
            "bot"
        } else if ua.is_empty() {
            "unknown"
        } else {
            "desktop"
        };

        let os = if ua.contains("windows") {
            "Windows"
        } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ios") {
            "iOS"
        } else if ua.contains("mac os") || ua.contains("macintosh") {
            "macOS"
        } else if ua.contains("android") {
            "Android"
        } else if ua.contains("linux") {
            "Linux"
        } else {
            "Unknown"
        };

        // Order matters: Edge and Chrome both advertise "chrome", Chrome advertises "safari".
        let browser = if ua.contains("edg/") || ua.contains("edge") {
            "Edge"
        } else if ua.contains("firefox") {
            "Firefox"
        } else if ua.contains("chrome") || ua.contains("crios") {
            "Chrome"
        } else if ua.contains("safari") {
            "Safari"
        } else {
            "Unknown"
        };

        Self {
            device_type: device_type.to_string(),
            os: os.to_string(),
            browser: browser.to_string(),
        }
    }
}

/// A device fingerprint recognised for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustedDevice {
    pub id: DeviceId,
    pub user_id: UserId,
    pub fingerprint: String,
    pub name: String,
    pub info: DeviceInfo,
    pub status: DeviceStatus,
    /// Confidence on the `[TRUST_SCORE_MIN, TRUST_SCORE_MAX]` scale
    pub trust_score: f64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_ip_address: Option<String>,
    pub access_count: u32,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
}

impl TrustedDevice {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// A revoked device is never trusted, whatever its stored status says.
    pub fn is_trusted(&self) -> bool {
        self.status == DeviceStatus::Trusted && !self.is_revoked()
    }

    pub fn is_blocked(&self) -> bool {
        self.status == DeviceStatus::Blocked || self.is_revoked()
    }
}

/// Clamp a trust score onto the configured scale.
pub fn clamp_trust_score(score: f64) -> f64 {
    score.clamp(TRUST_SCORE_MIN, TRUST_SCORE_MAX)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTrustedDevice {
    pub user_id: UserId,
    pub fingerprint: String,
    pub name: String,
    pub info: DeviceInfo,
    pub trust_score: f64,
    pub ip_address: Option<String>,
    pub seen_at: DateTime<Utc>,
}

/// Changes applied to a device on a recognised login.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceActivity {
    pub seen_at: DateTime<Utc>,
    pub ip_address: String,
    pub trust_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordHistoryEntry {
    pub id: i64,
    pub user_id: UserId,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Conventional event type strings.
pub mod event_types {
    pub const LOGIN_FAILED: &str = "login_failed";
    pub const SUSPICIOUS_LOGIN: &str = "suspicious_login";
    pub const BRUTE_FORCE_DETECTED: &str = "brute_force_detected";
    pub const ACCOUNT_LOCKED: &str = "account_locked";
    pub const ACCOUNT_UNLOCKED: &str = "account_unlocked";
    pub const DEVICE_ADDED: &str = "device_added";
    pub const DEVICE_REVOKED: &str = "device_revoked";
    pub const PASSWORD_CHANGED: &str = "password_changed";
}

/// A durable record of a security-relevant occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: SecurityEventId,
    pub user_id: Option<UserId>,
    pub tenant_id: Option<TenantId>,
    pub event_type: String,
    pub threat_level: ThreatLevel,
    pub description: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
    pub location: Option<Location>,
    pub metadata: serde_json::Value,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<UserId>,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSecurityEvent {
    pub user_id: Option<UserId>,
    pub tenant_id: Option<TenantId>,
    pub event_type: String,
    pub threat_level: ThreatLevel,
    pub description: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
    pub location: Option<Location>,
    pub metadata: serde_json::Value,
}

impl NewSecurityEvent {
    pub fn new(event_type: &str, threat_level: ThreatLevel, description: impl Into<String>) -> Self {
        Self {
            user_id: None,
            tenant_id: None,
            event_type: event_type.to_string(),
            threat_level,
            description: description.into(),
            ip_address: None,
            user_agent: None,
            device_fingerprint: None,
            location: None,
            metadata: serde_json::Value::Object(Default::default()),
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

    pub fn ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn device_fingerprint(mut self, fingerprint: Option<String>) -> Self {
        self.device_fingerprint = fingerprint;
        self
    }

    pub fn location(mut self, location: Option<Location>) -> Self {
        self.location = location.filter(|l| !l.is_empty());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Resolution applied to a security event by an operator.
#[derive(Debug, Clone, PartialEq)]
pub struct EventResolution {
    pub resolved_by: UserId,
    pub notes: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// Filter for listing security events. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SecurityEventQuery {
    pub user_id: Option<UserId>,
    pub tenant_id: Option<TenantId>,
    pub event_type: Option<String>,
    pub min_threat_level: Option<ThreatLevel>,
    pub is_resolved: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl SecurityEventQuery {
    pub fn matches(&self, event: &SecurityEvent) -> bool {
        self.user_id
            .as_ref()
            .is_none_or(|u| event.user_id.as_ref() == Some(u))
            && self
                .tenant_id
                .as_ref()
                .is_none_or(|t| event.tenant_id.as_ref() == Some(t))
            && self
                .event_type
                .as_deref()
                .is_none_or(|t| event.event_type == t)
            && self.min_threat_level.is_none_or(|l| event.threat_level >= l)
            && self.is_resolved.is_none_or(|r| event.is_resolved == r)
            && self.since.is_none_or(|s| event.created_at >= s)
            && self.until.is_none_or(|u| event.created_at <= u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threat_level_ordering() {
        assert!(ThreatLevel::Low < ThreatLevel::Medium);
        assert!(ThreatLevel::Medium < ThreatLevel::High);
        assert!(ThreatLevel::High < ThreatLevel::Critical);
    }

    #[test]
    fn test_threat_level_from_score_thresholds() {
        let config = ThreatConfig::default();
        assert_eq!(ThreatLevel::from_score(0.0, &config), ThreatLevel::Low);
        assert_eq!(ThreatLevel::from_score(0.29, &config), ThreatLevel::Low);
        assert_eq!(ThreatLevel::from_score(0.3, &config), ThreatLevel::Medium);
        assert_eq!(ThreatLevel::from_score(0.5, &config), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_score(0.7, &config), ThreatLevel::Critical);
        assert_eq!(ThreatLevel::from_score(5.0, &config), ThreatLevel::Critical);
    }

    #[test]
    fn test_enum_string_round_trip() {
        for level in [
            ThreatLevel::Low,
            ThreatLevel::Medium,
            ThreatLevel::High,
            ThreatLevel::Critical,
        ] {
            assert_eq!(level.as_str().parse::<ThreatLevel>().unwrap(), level);
        }
        assert_eq!("failed_login".parse::<LockType>().unwrap(), LockType::FailedLogin);
        assert_eq!("blocked".parse::<DeviceStatus>().unwrap(), DeviceStatus::Blocked);
        assert!("sideways".parse::<LoginOutcome>().is_err());
    }

    fn lockout(unlocks_at: Option<DateTime<Utc>>) -> AccountLockout {
        AccountLockout {
            id: LockoutId::new_random(),
            user_id: UserId::new("usr_1"),
            lock_type: LockType::FailedLogin,
            reason: LockType::FailedLogin.default_reason().to_string(),
            threat_level: ThreatLevel::High,
            is_active: true,
            locked_at: Utc::now(),
            unlocks_at,
            unlocked_at: None,
            unlocked_by: None,
        }
    }

    #[test]
    fn test_lockout_effective_predicate() {
        let now = Utc::now();
        assert!(lockout(None).is_effective_at(now));
        assert!(lockout(Some(now + Duration::minutes(5))).is_effective_at(now));
        assert!(!lockout(Some(now - Duration::seconds(1))).is_effective_at(now));

        let mut unlocked = lockout(None);
        unlocked.unlocked_at = Some(now);
        assert!(!unlocked.is_effective_at(now));

        let mut inactive = lockout(None);
        inactive.is_active = false;
        assert!(!inactive.is_effective_at(now));
    }

    #[test]
    fn test_device_info_from_user_agent() {
        let info = DeviceInfo::from_user_agent(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
        );
        assert_eq!(info.device_type, "desktop");
        assert_eq!(info.os, "Windows");
        assert_eq!(info.browser, "Chrome");

        let info = DeviceInfo::from_user_agent(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 Mobile/15E148 Safari/604.1",
        );
        assert_eq!(info.device_type, "mobile");
        assert_eq!(info.os, "iOS");
        assert_eq!(info.browser, "Safari");

        assert_eq!(DeviceInfo::from_user_agent("").device_type, "unknown");
    }

    #[test]
    fn test_revoked_device_is_never_trusted() {
        let now = Utc::now();
        let device = TrustedDevice {
            id: DeviceId::new_random(),
            user_id: UserId::new("usr_1"),
            fingerprint: "fp".to_string(),
            name: "Laptop".to_string(),
            info: DeviceInfo::default(),
            status: DeviceStatus::Trusted,
            trust_score: 0.9,
            first_seen_at: now,
            last_seen_at: now,
            last_ip_address: None,
            access_count: 1,
            revoked_at: Some(now),
            revoked_reason: Some("lost".to_string()),
        };
        assert!(!device.is_trusted());
        assert!(device.is_blocked());
    }

    #[test]
    fn test_clamp_trust_score() {
        assert_eq!(clamp_trust_score(1.3), TRUST_SCORE_MAX);
        assert_eq!(clamp_trust_score(-0.2), TRUST_SCORE_MIN);
        assert_eq!(clamp_trust_score(0.42), 0.42);
    }

    #[test]
    fn test_builtin_policy_fallback_values() {
        let policy = PasswordPolicy::builtin_default();
        assert_eq!(policy.min_length, 8);
        assert!(policy.require_uppercase && policy.require_lowercase);
        assert!(policy.require_digit && policy.require_symbol);
        assert_eq!(policy.max_age_days, 90);
        assert_eq!(policy.history_count, 5);
        assert_eq!(policy.max_age(), Some(Duration::days(90)));
    }
}
