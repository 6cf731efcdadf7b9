pub mod utilities;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::id::LockoutId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Password error: {0}")]
    Password(#[from] PasswordError),

    #[error("Lockout error: {0}")]
    Lockout(#[from] LockoutError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Security event error: {0}")]
    SecurityEvent(#[from] SecurityEventError),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Record not found")]
    NotFound,

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid IP address: {0}")]
    InvalidIpAddress(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid password policy: {0}")]
    InvalidPolicy(String),

    #[error("Password does not satisfy policy: {}", .0.join("; "))]
    PolicyViolations(Vec<String>),
}

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Password expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },

    #[error("No password has been set for this user")]
    NotSet,
}

#[derive(Debug, Error)]
pub enum LockoutError {
    #[error("{reason}")]
    AccountLocked {
        reason: String,
        unlocks_at: Option<DateTime<Utc>>,
    },

    #[error("Too many failed login attempts")]
    TooManyAttempts,

    #[error("Account is already locked")]
    AlreadyLocked {
        lockout_id: LockoutId,
        unlocks_at: Option<DateTime<Utc>>,
    },

    #[error("No active lockout")]
    NoActiveLockout,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device not found")]
    NotFound,

    #[error("Device already registered")]
    AlreadyRegistered,

    #[error("Device already revoked")]
    AlreadyRevoked,
}

#[derive(Debug, Error)]
pub enum SecurityEventError {
    #[error("Security event not found")]
    NotFound,

    #[error("Security event already resolved at {resolved_at}")]
    AlreadyResolved { resolved_at: DateTime<Utc> },
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Password hashing failed: {0}")]
    PasswordHash(String),

    #[error("Invalid hashing parameters: {0}")]
    InvalidParams(String),
}

/// Coarse classification of an [`Error`] for transport adapters.
///
/// HTTP or gRPC layers switch on this instead of matching individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input or policy violations in a request
    Validation,
    /// Nothing to act on (no active lockout, unknown device, unknown event)
    NotFound,
    /// The target is already in the requested terminal state
    Conflict,
    /// The subject is in a state that blocks the operation (locked, expired)
    PolicyState,
    /// Storage or crypto failure
    Infrastructure,
}

impl ErrorKind {
    /// Status code an HTTP adapter should respond with.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::PolicyState => 403,
            ErrorKind::Infrastructure => 500,
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Storage(StorageError::NotFound) => ErrorKind::NotFound,
            Error::Storage(_) => ErrorKind::Infrastructure,
            Error::Crypto(_) => ErrorKind::Infrastructure,
            Error::Password(PasswordError::Expired { .. }) => ErrorKind::PolicyState,
            Error::Password(PasswordError::NotSet) => ErrorKind::NotFound,
            Error::Lockout(LockoutError::AccountLocked { .. })
            | Error::Lockout(LockoutError::TooManyAttempts) => ErrorKind::PolicyState,
            Error::Lockout(LockoutError::AlreadyLocked { .. }) => ErrorKind::Conflict,
            Error::Lockout(LockoutError::NoActiveLockout) => ErrorKind::NotFound,
            Error::Device(DeviceError::NotFound) => ErrorKind::NotFound,
            Error::Device(DeviceError::AlreadyRegistered | DeviceError::AlreadyRevoked) => {
                ErrorKind::Conflict
            }
            Error::SecurityEvent(SecurityEventError::NotFound) => ErrorKind::NotFound,
            Error::SecurityEvent(SecurityEventError::AlreadyResolved { .. }) => ErrorKind::Conflict,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}
