//! Configuration for the security services.
//!
//! Every section has a `Default` that mirrors the reference policy, plus chainable
//! setters so hosts can override single values without spelling out the rest.

use chrono::Duration;

/// Scoring weights and thresholds used by the threat analyzer.
#[derive(Debug, Clone)]
pub struct ThreatConfig {
    /// Trailing window in which failed attempts count toward the score
    pub failure_window: Duration,
    /// Score added per failed attempt in the window
    pub failure_weight: f64,
    /// Score added for a publicly routable IP address
    pub public_ip_weight: f64,
    /// Score subtracted for loopback or private IP addresses
    pub private_ip_discount: f64,
    /// Score added when the request carries no user agent
    pub missing_user_agent_weight: f64,
    /// Score added when the login comes from an unrecognised device
    pub new_device_weight: f64,
    /// Score added when the IP differs from the last one seen for the device
    pub ip_change_weight: f64,
    /// Score added when the country differs from the last one seen for the user
    pub country_change_weight: f64,
    pub medium_threshold: f64,
    pub high_threshold: f64,
    pub critical_threshold: f64,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            failure_window: Duration::hours(1),
            failure_weight: 0.1,
            public_ip_weight: 0.1,
            private_ip_discount: 0.1,
            missing_user_agent_weight: 0.1,
            new_device_weight: 0.2,
            ip_change_weight: 0.1,
            country_change_weight: 0.3,
            medium_threshold: 0.3,
            high_threshold: 0.5,
            critical_threshold: 0.7,
        }
    }
}

/// Brute force detection settings.
#[derive(Debug, Clone)]
pub struct BruteForceConfig {
    pub enabled: bool,
    /// Trailing window in which failures for one credential are counted
    pub window: Duration,
    /// Failure count at which a `brute_force_detected` event is raised
    pub threshold: u32,
    /// After an event is raised, further events for the same credential are
    /// suppressed until this much time has passed
    pub cooldown: Duration,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::hours(1),
            threshold: 10,
            cooldown: Duration::hours(1),
        }
    }
}

impl BruteForceConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Account lockout gate settings.
#[derive(Debug, Clone)]
pub struct LockoutConfig {
    /// Trailing window used to compute remaining attempts
    pub attempts_window: Duration,
    /// Create a formal lockout row when a recorded failure exhausts the
    /// remaining attempts. Off by default: the attempts gate and formal
    /// lockouts are separate mechanisms unless a host opts in.
    pub auto_lock_on_threshold: bool,
    /// Interval of the background automatic unlock sweep
    pub sweep_interval: std::time::Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            attempts_window: Duration::minutes(15),
            auto_lock_on_threshold: false,
            sweep_interval: std::time::Duration::from_secs(60),
        }
    }
}

impl LockoutConfig {
    pub fn auto_lock_on_threshold(mut self, enabled: bool) -> Self {
        self.auto_lock_on_threshold = enabled;
        self
    }
}

/// Lowest possible trust score.
pub const TRUST_SCORE_MIN: f64 = 0.0;
/// Highest possible trust score.
pub const TRUST_SCORE_MAX: f64 = 1.0;

/// Trust score parameters. All values live on the `[TRUST_SCORE_MIN, TRUST_SCORE_MAX]` scale.
#[derive(Debug, Clone)]
pub struct DeviceTrustConfig {
    pub initial_score: f64,
    /// Trusted devices scoring below this require MFA
    pub mfa_threshold: f64,
    /// Access count after which each recognised login raises the score
    pub sustained_use_after: u32,
    pub sustained_use_bonus: f64,
    /// Applied when a login comes from a different IP than the last recorded one
    pub ip_change_penalty: f64,
}

impl Default for DeviceTrustConfig {
    fn default() -> Self {
        Self {
            initial_score: 0.8,
            mfa_threshold: 0.5,
            sustained_use_after: 10,
            sustained_use_bonus: 0.1,
            ip_change_penalty: 0.05,
        }
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone)]
pub struct PasswordHashingConfig {
    /// Memory cost in KiB
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordHashingConfig {
    /// OWASP recommended parameters for Argon2id
    fn default() -> Self {
        Self {
            memory_kib: 19456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl PasswordHashingConfig {
    /// Minimal cost parameters for tests. Never use in production.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Retention limits for append-only data.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Login attempts older than this are removed by cleanup
    pub login_attempts: Duration,
    /// Upper bound on retained password history rows per user
    pub password_history_cap: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            login_attempts: Duration::days(90),
            password_history_cap: 24,
        }
    }
}

/// Aggregate configuration for every security service.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    pub threat: ThreatConfig,
    pub brute_force: BruteForceConfig,
    pub lockout: LockoutConfig,
    pub device_trust: DeviceTrustConfig,
    pub hashing: PasswordHashingConfig,
    pub retention: RetentionConfig,
}

impl SecurityConfig {
    pub fn with_threat(mut self, threat: ThreatConfig) -> Self {
        self.threat = threat;
        self
    }

    pub fn with_brute_force(mut self, brute_force: BruteForceConfig) -> Self {
        self.brute_force = brute_force;
        self
    }

    pub fn with_lockout(mut self, lockout: LockoutConfig) -> Self {
        self.lockout = lockout;
        self
    }

    pub fn with_device_trust(mut self, device_trust: DeviceTrustConfig) -> Self {
        self.device_trust = device_trust;
        self
    }

    pub fn with_hashing(mut self, hashing: PasswordHashingConfig) -> Self {
        self.hashing = hashing;
        self
    }

    pub fn with_retention(mut self, retention: RetentionConfig) -> Self {
        self.retention = retention;
        self
    }
}
