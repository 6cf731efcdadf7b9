//! Repository implementations for SQLite storage

pub mod device;
pub mod lockout;
pub mod login_attempt;
pub mod password_history;
pub mod policy;
pub mod security_event;

pub use device::SqliteTrustedDeviceRepository;
pub use lockout::SqliteAccountLockoutRepository;
pub use login_attempt::SqliteLoginAttemptRepository;
pub use password_history::SqlitePasswordHistoryRepository;
pub use policy::SqlitePasswordPolicyRepository;
pub use security_event::SqliteSecurityEventRepository;

use async_trait::async_trait;
use bastion_core::{
    Error,
    error::StorageError,
    repositories::{
        AccountLockoutRepositoryProvider, LoginAttemptRepositoryProvider,
        PasswordHistoryRepositoryProvider, PasswordPolicyRepositoryProvider, RepositoryProvider,
        SecurityEventRepositoryProvider, TrustedDeviceRepositoryProvider,
    },
};
use bastion_migration::MigrationManager;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;

use crate::migrations::{SqliteMigrationManager, all_migrations};

/// Repository provider implementation for SQLite
///
/// This struct implements all the individual repository provider traits
/// as well as the unified `RepositoryProvider` trait.
pub struct SqliteRepositoryProvider {
    pool: SqlitePool,
    policy: SqlitePasswordPolicyRepository,
    password_history: SqlitePasswordHistoryRepository,
    login_attempt: SqliteLoginAttemptRepository,
    lockout: SqliteAccountLockoutRepository,
    device: SqliteTrustedDeviceRepository,
    security_event: SqliteSecurityEventRepository,
}

impl SqliteRepositoryProvider {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            policy: SqlitePasswordPolicyRepository::new(pool.clone()),
            password_history: SqlitePasswordHistoryRepository::new(pool.clone()),
            login_attempt: SqliteLoginAttemptRepository::new(pool.clone()),
            lockout: SqliteAccountLockoutRepository::new(pool.clone()),
            device: SqliteTrustedDeviceRepository::new(pool.clone()),
            security_event: SqliteSecurityEventRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect to the database at `url`, creating the file if it does not exist.
    ///
    /// In-memory databases are private to each connection, so the pool is capped
    /// at a single connection for them.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let max_connections = if url.contains(":memory:") { 1 } else { 10 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl PasswordPolicyRepositoryProvider for SqliteRepositoryProvider {
    type PolicyRepo = SqlitePasswordPolicyRepository;

    fn policy(&self) -> &Self::PolicyRepo {
        &self.policy
    }
}

impl PasswordHistoryRepositoryProvider for SqliteRepositoryProvider {
    type PasswordHistoryRepo = SqlitePasswordHistoryRepository;

    fn password_history(&self) -> &Self::PasswordHistoryRepo {
        &self.password_history
    }
}

impl LoginAttemptRepositoryProvider for SqliteRepositoryProvider {
    type LoginAttemptRepo = SqliteLoginAttemptRepository;

    fn login_attempt(&self) -> &Self::LoginAttemptRepo {
        &self.login_attempt
    }
}

impl AccountLockoutRepositoryProvider for SqliteRepositoryProvider {
    type LockoutRepo = SqliteAccountLockoutRepository;

    fn lockout(&self) -> &Self::LockoutRepo {
        &self.lockout
    }
}

impl TrustedDeviceRepositoryProvider for SqliteRepositoryProvider {
    type DeviceRepo = SqliteTrustedDeviceRepository;

    fn device(&self) -> &Self::DeviceRepo {
        &self.device
    }
}

impl SecurityEventRepositoryProvider for SqliteRepositoryProvider {
    type SecurityEventRepo = SqliteSecurityEventRepository;

    fn security_event(&self) -> &Self::SecurityEventRepo {
        &self.security_event
    }
}

#[async_trait]
impl RepositoryProvider for SqliteRepositoryProvider {
    async fn migrate(&self) -> Result<(), Error> {
        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager.initialize().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize migrations");
            Error::Storage(StorageError::Migration(
                "Failed to initialize migrations".to_string(),
            ))
        })?;

        manager.up(&all_migrations()).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            Error::Storage(StorageError::Migration(
                "Failed to run migrations".to_string(),
            ))
        })?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Connection(e.to_string())))?;
        Ok(())
    }
}
