//! Core functionality for the bastion project
//!
//! This crate holds the account security engine: password policy enforcement, the
//! login attempt ledger, threat scoring, brute force detection, the account lockout
//! state machine, trusted device tracking and the security event log.
//!
//! Storage backends implement the traits in [`repositories`]; the services in
//! [`services`] are generic over those traits and never talk to a database directly.
//!
//! Application code normally uses the `bastion` crate, which wires everything together.
pub mod config;
pub mod crypto;
pub mod error;
pub mod id;
pub mod repositories;
pub mod services;
pub mod storage;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use config::SecurityConfig;
pub use error::{Error, ErrorKind};
pub use id::{DeviceId, LockoutId, PolicyId, SecurityEventId, TenantId, UserId};
pub use storage::{
    AccountLockout, DeviceStatus, LockType, Location, LoginAttempt, LoginOutcome,
    PasswordPolicy, SecurityEvent, ThreatLevel, TrustedDevice,
};
