//! Repository traits for the data access layer
//!
//! Services talk to storage only through these traits. Backends implement each
//! `*Repository` trait, expose them through the matching `*RepositoryProvider`
//! trait, and finally implement [`RepositoryProvider`] for lifecycle operations.
//!
//! # Trait Hierarchy
//!
//! - Individual `*Repository` traits define the operations for each record type
//! - Individual `*RepositoryProvider` traits provide access to each repository
//! - [`RepositoryProvider`] combines all provider traits plus migrations and health checks
//!
//! The adapters in [`adapter`] turn a shared provider back into individual
//! repositories so services can stay generic over a single trait.

pub mod adapter;
pub mod device;
pub mod lockout;
pub mod login_attempt;
pub mod password_history;
pub mod policy;
pub mod security_event;

pub use adapter::{
    AccountLockoutRepositoryAdapter, LoginAttemptRepositoryAdapter,
    PasswordHistoryRepositoryAdapter, PasswordPolicyRepositoryAdapter,
    SecurityEventRepositoryAdapter, TrustedDeviceRepositoryAdapter,
};
pub use device::TrustedDeviceRepository;
pub use lockout::AccountLockoutRepository;
pub use login_attempt::LoginAttemptRepository;
pub use password_history::PasswordHistoryRepository;
pub use policy::PasswordPolicyRepository;
pub use security_event::SecurityEventRepository;

use async_trait::async_trait;

use crate::Error;

// ============================================================================
// Individual Repository Provider Traits
// ============================================================================

pub trait PasswordPolicyRepositoryProvider: Send + Sync + 'static {
    type PolicyRepo: PasswordPolicyRepository;

    fn policy(&self) -> &Self::PolicyRepo;
}

pub trait PasswordHistoryRepositoryProvider: Send + Sync + 'static {
    type PasswordHistoryRepo: PasswordHistoryRepository;

    fn password_history(&self) -> &Self::PasswordHistoryRepo;
}

pub trait LoginAttemptRepositoryProvider: Send + Sync + 'static {
    type LoginAttemptRepo: LoginAttemptRepository;

    fn login_attempt(&self) -> &Self::LoginAttemptRepo;
}

pub trait AccountLockoutRepositoryProvider: Send + Sync + 'static {
    type LockoutRepo: AccountLockoutRepository;

    fn lockout(&self) -> &Self::LockoutRepo;
}

pub trait TrustedDeviceRepositoryProvider: Send + Sync + 'static {
    type DeviceRepo: TrustedDeviceRepository;

    fn device(&self) -> &Self::DeviceRepo;
}

pub trait SecurityEventRepositoryProvider: Send + Sync + 'static {
    type SecurityEventRepo: SecurityEventRepository;

    fn security_event(&self) -> &Self::SecurityEventRepo;
}

// ============================================================================
// Unified Repository Provider Trait
// ============================================================================

/// Provider trait that storage implementations must implement to provide all repositories.
///
/// # Example
///
/// ```rust,ignore
/// use bastion_core::repositories::*;
///
/// struct MyStorage { /* ... */ }
///
/// impl LoginAttemptRepositoryProvider for MyStorage {
///     type LoginAttemptRepo = MyLoginAttemptRepository;
///     fn login_attempt(&self) -> &Self::LoginAttemptRepo { &self.login_attempts }
/// }
///
/// // ... implement other provider traits ...
///
/// #[async_trait]
/// impl RepositoryProvider for MyStorage {
///     async fn migrate(&self) -> Result<(), Error> { /* ... */ }
///     async fn health_check(&self) -> Result<(), Error> { /* ... */ }
/// }
/// ```
#[async_trait]
pub trait RepositoryProvider:
    PasswordPolicyRepositoryProvider
    + PasswordHistoryRepositoryProvider
    + LoginAttemptRepositoryProvider
    + AccountLockoutRepositoryProvider
    + TrustedDeviceRepositoryProvider
    + SecurityEventRepositoryProvider
{
    /// Run migrations for all repositories
    async fn migrate(&self) -> Result<(), Error>;

    /// Health check for all repositories
    async fn health_check(&self) -> Result<(), Error>;
}
