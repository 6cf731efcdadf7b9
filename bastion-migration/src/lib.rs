//! Versioned schema migrations shared by the bastion storage backends.
//!
//! A backend implements [`MigrationManager`] for its database and ships an ordered
//! list of [`Migration`]s. [`plan`] decides which of them still need to run.
use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::Database;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Duplicate migration version {0}")]
    DuplicateVersion(i64),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, MigrationError>;

#[async_trait]
pub trait Migration<DB: Database>: Send + Sync {
    /// Apply the schema change
    async fn up<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()>;

    /// Revert the schema change
    async fn down<'a>(&'a self, conn: &'a mut <DB as Database>::Connection) -> Result<()>;

    /// Ordering key, unique within a backend
    fn version(&self) -> i64;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    /// Unix seconds
    pub applied_at: i64,
}

#[async_trait]
pub trait MigrationManager<DB: Database>: Send + Sync {
    fn get_migration_table_name(&self) -> &str {
        "_bastion_migrations"
    }

    /// Create the tracking table if it is missing
    async fn initialize(&self) -> Result<()>;

    /// Apply every pending migration in version order
    async fn up(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<()>;

    /// Revert applied migrations, newest first
    async fn down(&self, migrations: &[Box<dyn Migration<DB>>]) -> Result<()>;

    async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>>;

    async fn is_applied(&self, version: i64) -> Result<bool>;
}

/// Indices into `migrations` that are not yet applied, in ascending version order.
///
/// Fails when two migrations share a version.
pub fn plan<DB: Database>(
    migrations: &[Box<dyn Migration<DB>>],
    applied: &[MigrationRecord],
) -> Result<Vec<usize>> {
    let mut seen = HashSet::new();
    for migration in migrations {
        if !seen.insert(migration.version()) {
            return Err(MigrationError::DuplicateVersion(migration.version()));
        }
    }

    let applied: HashSet<i64> = applied.iter().map(|r| r.version).collect();
    let mut pending: Vec<usize> = (0..migrations.len())
        .filter(|&i| !applied.contains(&migrations[i].version()))
        .collect();
    pending.sort_by_key(|&i| migrations[i].version());
    Ok(pending)
}
