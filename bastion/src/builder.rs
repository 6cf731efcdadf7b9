//! Builder pattern for constructing Bastion instances
//!
//! This module provides a type-safe builder for creating [`Bastion`] instances with
//! compile-time validation of storage configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use bastion::{BastionBuilder, LockoutConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Build with SQLite and auto-migration
//!     let bastion = BastionBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .with_lockout(LockoutConfig::default().auto_lock_on_threshold(true))
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use bastion_core::{
    SecurityConfig,
    config::{
        BruteForceConfig, DeviceTrustConfig, LockoutConfig, PasswordHashingConfig,
        RetentionConfig, ThreatConfig,
    },
    repositories::RepositoryProvider,
    services::CompromisedPasswordChecker,
};

use crate::Bastion;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when building a Bastion instance.
#[derive(Debug, thiserror::Error)]
pub enum BastionBuilderError {
    /// Failed to connect to storage backend
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Failed to run database migrations
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

// ============================================================================
// Type-State Markers
// ============================================================================

/// Marker type indicating no storage has been configured yet.
///
/// This is the initial state of [`BastionBuilder`].
pub struct NoStorage;

/// Marker type indicating storage has been configured.
pub struct WithStorage<R: RepositoryProvider> {
    repositories: Arc<R>,
}

// ============================================================================
// Builder Implementation
// ============================================================================

/// A type-safe builder for constructing [`Bastion`] instances.
///
/// Storage must be configured before [`BastionBuilder::build`] becomes available.
/// Everything else falls back to [`SecurityConfig::default`].
pub struct BastionBuilder<Storage> {
    storage: Storage,
    config: SecurityConfig,
    compromised_checker: Option<Arc<dyn CompromisedPasswordChecker>>,
    apply_migrations: bool,
}

impl Default for BastionBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl BastionBuilder<NoStorage> {
    /// Create a new builder with default configuration and migrations disabled.
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            config: SecurityConfig::default(),
            compromised_checker: None,
            apply_migrations: false,
        }
    }

    /// Use an already constructed repository provider.
    pub fn with_repositories<R: RepositoryProvider>(
        self,
        repositories: Arc<R>,
    ) -> BastionBuilder<WithStorage<R>> {
        self.into_storage(repositories)
    }

    fn into_storage<R: RepositoryProvider>(self, repositories: Arc<R>) -> BastionBuilder<WithStorage<R>> {
        BastionBuilder {
            storage: WithStorage { repositories },
            config: self.config,
            compromised_checker: self.compromised_checker,
            apply_migrations: self.apply_migrations,
        }
    }
}

#[cfg(feature = "sqlite")]
impl BastionBuilder<NoStorage> {
    /// Configure SQLite storage by connecting to the given URL.
    ///
    /// * `url` - SQLite connection URL (e.g., "sqlite::memory:" or "sqlite://path/to/db.sqlite")
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<BastionBuilder<WithStorage<crate::SqliteRepositoryProvider>>, BastionBuilderError>
    {
        let repositories = crate::SqliteRepositoryProvider::connect(url)
            .await
            .map_err(|e| BastionBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.into_storage(Arc::new(repositories)))
    }

    /// Configure SQLite storage with an existing connection pool.
    ///
    /// An in-memory database needs a pool capped at one connection, otherwise every
    /// connection sees its own empty database.
    pub fn with_sqlite_pool(
        self,
        pool: sqlx::SqlitePool,
    ) -> BastionBuilder<WithStorage<crate::SqliteRepositoryProvider>> {
        self.into_storage(Arc::new(crate::SqliteRepositoryProvider::new(pool)))
    }
}

// ============================================================================
// Configuration Methods (available in any state)
// ============================================================================

impl<S> BastionBuilder<S> {
    /// Replace the whole security configuration.
    pub fn with_config(mut self, config: SecurityConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_threat(mut self, threat: ThreatConfig) -> Self {
        self.config.threat = threat;
        self
    }

    pub fn with_brute_force(mut self, brute_force: BruteForceConfig) -> Self {
        self.config.brute_force = brute_force;
        self
    }

    pub fn with_lockout(mut self, lockout: LockoutConfig) -> Self {
        self.config.lockout = lockout;
        self
    }

    pub fn with_device_trust(mut self, device_trust: DeviceTrustConfig) -> Self {
        self.config.device_trust = device_trust;
        self
    }

    pub fn with_password_hashing(mut self, hashing: PasswordHashingConfig) -> Self {
        self.config.hashing = hashing;
        self
    }

    pub fn with_retention(mut self, retention: RetentionConfig) -> Self {
        self.config.retention = retention;
        self
    }

    /// Plug in a compromised password oracle.
    pub fn with_compromised_checker(mut self, checker: Arc<dyn CompromisedPasswordChecker>) -> Self {
        self.compromised_checker = Some(checker);
        self
    }

    /// Run pending migrations during [`BastionBuilder::build`].
    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }
}

// ============================================================================
// Build
// ============================================================================

impl<R: RepositoryProvider> BastionBuilder<WithStorage<R>> {
    /// Validate the configuration, optionally migrate, and build the instance.
    pub async fn build(self) -> Result<Bastion<R>, BastionBuilderError> {
        validate_config(&self.config)?;

        let repositories = self.storage.repositories;
        if self.apply_migrations {
            repositories
                .migrate()
                .await
                .map_err(|e| BastionBuilderError::Migration(e.to_string()))?;
            tracing::debug!("Applied bastion migrations");
        }

        let mut bastion = Bastion::with_config(repositories, self.config);
        if let Some(checker) = self.compromised_checker {
            bastion = bastion.with_compromised_checker(checker);
        }
        Ok(bastion)
    }
}

fn validate_config(config: &SecurityConfig) -> Result<(), BastionBuilderError> {
    let threat = &config.threat;
    if !(threat.medium_threshold <= threat.high_threshold
        && threat.high_threshold <= threat.critical_threshold)
    {
        return Err(BastionBuilderError::InvalidConfiguration(
            "threat thresholds must be ascending".to_string(),
        ));
    }

    if config.brute_force.enabled && config.brute_force.threshold == 0 {
        return Err(BastionBuilderError::InvalidConfiguration(
            "brute force threshold must be at least 1".to_string(),
        ));
    }

    let trust = &config.device_trust;
    if !(0.0..=1.0).contains(&trust.initial_score) || !(0.0..=1.0).contains(&trust.mfa_threshold) {
        return Err(BastionBuilderError::InvalidConfiguration(
            "trust scores must lie between 0 and 1".to_string(),
        ));
    }

    if config.lockout.sweep_interval.is_zero() {
        return Err(BastionBuilderError::InvalidConfiguration(
            "unlock sweep interval must be positive".to_string(),
        ));
    }

    Ok(())
}
