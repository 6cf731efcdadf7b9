//! Service layer for the security engine
//!
//! Each service owns one concern and is generic over the repository traits it
//! reads and writes. Secondary effects such as event logging never fail the
//! primary operation.

pub mod analytics;
pub mod brute_force;
pub mod lockout;
pub mod login_attempt;
pub mod password_policy;
pub mod security_event;
pub mod threat;
pub mod trusted_device;

pub use analytics::{RiskScore, SecurityAnalyticsService, SecurityDashboard, SecurityReport, TimeWindow};
pub use brute_force::{BruteForceDetector, DetectionOutcome};
pub use lockout::{AccountLockoutService, LockRequest, LockoutStatus};
pub use login_attempt::{
    LoginAttemptRequest, LoginAttemptService, LoginValidationResult, RecordedAttempt,
};
pub use password_policy::{
    CompromisedPasswordChecker, NeverCompromised, PasswordPolicyService, PasswordSubject,
    PasswordValidationResult, StaticDenylist,
};
pub use security_event::SecurityEventService;
pub use threat::{ActivityContext, ThreatAnalyzer, ThreatAssessment, ThreatContext};
pub use trusted_device::{DeviceRegistration, DeviceValidationResult, TrustedDeviceService};
