use async_trait::async_trait;
use bastion_migration::{Migration, MigrationError, MigrationManager, MigrationRecord, plan};
use chrono::Utc;
use sqlx::{Database, Sqlite, SqlitePool};

pub struct SqliteMigrationManager {
    pool: SqlitePool,
}

impl SqliteMigrationManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Every schema migration for this backend, in version order.
pub fn all_migrations() -> Vec<Box<dyn Migration<Sqlite>>> {
    vec![
        Box::new(CreatePasswordPoliciesTable),
        Box::new(CreateLoginAttemptsTable),
        Box::new(CreateAccountLockoutsTable),
        Box::new(CreateTrustedDevicesTable),
        Box::new(CreatePasswordHistoryTable),
        Box::new(CreateSecurityEventsTable),
    ]
}

#[async_trait]
impl MigrationManager<Sqlite> for SqliteMigrationManager {
    async fn initialize(&self) -> Result<(), MigrationError> {
        sqlx::query(
            format!(
                r#"
            CREATE TABLE IF NOT EXISTS {} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (unixepoch())
            );"#,
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn up(&self, migrations: &[Box<dyn Migration<Sqlite>>]) -> Result<(), MigrationError> {
        let applied = self.get_applied_migrations().await?;

        for index in plan(migrations, &applied)? {
            let migration = &migrations[index];
            let mut tx = self.pool.begin().await?;

            tracing::info!(
                version = migration.version(),
                name = migration.name(),
                "Applying migration"
            );

            migration
                .up(&mut *tx as &mut <Sqlite as Database>::Connection)
                .await?;

            sqlx::query(
                format!(
                    "INSERT INTO {} (version, name, applied_at) VALUES (?, ?, ?)",
                    self.get_migration_table_name()
                )
                .as_str(),
            )
            .bind(migration.version())
            .bind(migration.name())
            .bind(Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
        }
        Ok(())
    }

    async fn down(&self, migrations: &[Box<dyn Migration<Sqlite>>]) -> Result<(), MigrationError> {
        let mut ordered: Vec<&Box<dyn Migration<Sqlite>>> = migrations.iter().collect();
        ordered.sort_by_key(|m| std::cmp::Reverse(m.version()));

        for migration in ordered {
            if !self.is_applied(migration.version()).await? {
                continue;
            }
            let mut tx = self.pool.begin().await?;

            tracing::info!(
                version = migration.version(),
                name = migration.name(),
                "Rolling back migration"
            );

            migration
                .down(&mut *tx as &mut <Sqlite as Database>::Connection)
                .await?;

            sqlx::query(
                format!(
                    "DELETE FROM {} WHERE version = ?",
                    self.get_migration_table_name()
                )
                .as_str(),
            )
            .bind(migration.version())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
        }
        Ok(())
    }

    async fn get_applied_migrations(&self) -> Result<Vec<MigrationRecord>, MigrationError> {
        let records = sqlx::query_as::<_, MigrationRecord>(
            format!(
                "SELECT version, name, applied_at FROM {} ORDER BY version",
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn is_applied(&self, version: i64) -> Result<bool, MigrationError> {
        let result: bool = sqlx::query_scalar(
            format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE version = ?)",
                self.get_migration_table_name()
            )
            .as_str(),
        )
        .bind(version)
        .fetch_one(&self.pool)
        .await?;
        Ok(result)
    }
}

/// Run each statement in order on one connection.
async fn execute_all(
    conn: &mut <Sqlite as Database>::Connection,
    statements: &[&str],
) -> Result<(), MigrationError> {
    for statement in statements {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(())
}

pub struct CreatePasswordPoliciesTable;

#[async_trait]
impl Migration<Sqlite> for CreatePasswordPoliciesTable {
    fn version(&self) -> i64 {
        1
    }

    fn name(&self) -> &str {
        "CreatePasswordPoliciesTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        execute_all(
            conn,
            &[
                r#"
                CREATE TABLE IF NOT EXISTS password_policies (
                    id TEXT PRIMARY KEY,
                    tenant_id TEXT,
                    name TEXT NOT NULL,
                    min_length INTEGER NOT NULL,
                    max_length INTEGER NOT NULL,
                    require_uppercase INTEGER NOT NULL,
                    require_lowercase INTEGER NOT NULL,
                    require_digit INTEGER NOT NULL,
                    require_symbol INTEGER NOT NULL,
                    history_count INTEGER NOT NULL,
                    max_age_days INTEGER NOT NULL,
                    max_failed_attempts INTEGER NOT NULL,
                    lockout_duration_minutes INTEGER NOT NULL,
                    forbidden_patterns TEXT NOT NULL DEFAULT '[]',
                    prevent_user_info INTEGER NOT NULL,
                    prevent_common_passwords INTEGER NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at INTEGER NOT NULL DEFAULT (unixepoch()),
                    updated_at INTEGER NOT NULL DEFAULT (unixepoch())
                )"#,
                "CREATE INDEX IF NOT EXISTS idx_password_policies_tenant ON password_policies(tenant_id, is_active)",
            ],
        )
        .await
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        execute_all(conn, &["DROP TABLE IF EXISTS password_policies"]).await
    }
}

pub struct CreateLoginAttemptsTable;

#[async_trait]
impl Migration<Sqlite> for CreateLoginAttemptsTable {
    fn version(&self) -> i64 {
        2
    }

    fn name(&self) -> &str {
        "CreateLoginAttemptsTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        execute_all(
            conn,
            &[
                r#"
                CREATE TABLE IF NOT EXISTS login_attempts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT,
                    email TEXT NOT NULL,
                    outcome TEXT NOT NULL,
                    ip_address TEXT NOT NULL,
                    user_agent TEXT,
                    device_fingerprint TEXT,
                    threat_level TEXT NOT NULL,
                    failure_reason TEXT,
                    location TEXT,
                    attempted_at INTEGER NOT NULL
                )"#,
                "CREATE INDEX IF NOT EXISTS idx_login_attempts_email ON login_attempts(email, attempted_at)",
                "CREATE INDEX IF NOT EXISTS idx_login_attempts_ip ON login_attempts(ip_address, attempted_at)",
                "CREATE INDEX IF NOT EXISTS idx_login_attempts_user ON login_attempts(user_id, attempted_at)",
                "CREATE INDEX IF NOT EXISTS idx_login_attempts_attempted_at ON login_attempts(attempted_at)",
            ],
        )
        .await
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        execute_all(conn, &["DROP TABLE IF EXISTS login_attempts"]).await
    }
}

pub struct CreateAccountLockoutsTable;

#[async_trait]
impl Migration<Sqlite> for CreateAccountLockoutsTable {
    fn version(&self) -> i64 {
        3
    }

    fn name(&self) -> &str {
        "CreateAccountLockoutsTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        execute_all(
            conn,
            &[
                r#"
                CREATE TABLE IF NOT EXISTS account_lockouts (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    lock_type TEXT NOT NULL,
                    reason TEXT NOT NULL,
                    threat_level TEXT NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    locked_at INTEGER NOT NULL,
                    unlocks_at INTEGER,
                    unlocked_at INTEGER,
                    unlocked_by TEXT
                )"#,
                // At most one active lock per user
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_account_lockouts_one_active ON account_lockouts(user_id) WHERE is_active = 1",
                "CREATE INDEX IF NOT EXISTS idx_account_lockouts_unlocks_at ON account_lockouts(is_active, unlocks_at)",
                "CREATE INDEX IF NOT EXISTS idx_account_lockouts_locked_at ON account_lockouts(locked_at)",
            ],
        )
        .await
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        execute_all(conn, &["DROP TABLE IF EXISTS account_lockouts"]).await
    }
}

pub struct CreateTrustedDevicesTable;

#[async_trait]
impl Migration<Sqlite> for CreateTrustedDevicesTable {
    fn version(&self) -> i64 {
        4
    }

    fn name(&self) -> &str {
        "CreateTrustedDevicesTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        execute_all(
            conn,
            &[
                r#"
                CREATE TABLE IF NOT EXISTS trusted_devices (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    fingerprint TEXT NOT NULL,
                    name TEXT NOT NULL,
                    device_type TEXT NOT NULL,
                    os TEXT NOT NULL,
                    browser TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'trusted',
                    trust_score REAL NOT NULL,
                    first_seen_at INTEGER NOT NULL,
                    last_seen_at INTEGER NOT NULL,
                    last_ip_address TEXT,
                    access_count INTEGER NOT NULL DEFAULT 1,
                    revoked_at INTEGER,
                    revoked_reason TEXT,
                    UNIQUE(user_id, fingerprint)
                )"#,
                "CREATE INDEX IF NOT EXISTS idx_trusted_devices_status ON trusted_devices(status)",
            ],
        )
        .await
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        execute_all(conn, &["DROP TABLE IF EXISTS trusted_devices"]).await
    }
}

pub struct CreatePasswordHistoryTable;

#[async_trait]
impl Migration<Sqlite> for CreatePasswordHistoryTable {
    fn version(&self) -> i64 {
        5
    }

    fn name(&self) -> &str {
        "CreatePasswordHistoryTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        execute_all(
            conn,
            &[
                r#"
                CREATE TABLE IF NOT EXISTS password_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL,
                    password_hash TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                )"#,
                "CREATE INDEX IF NOT EXISTS idx_password_history_user ON password_history(user_id, created_at)",
            ],
        )
        .await
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        execute_all(conn, &["DROP TABLE IF EXISTS password_history"]).await
    }
}

pub struct CreateSecurityEventsTable;

#[async_trait]
impl Migration<Sqlite> for CreateSecurityEventsTable {
    fn version(&self) -> i64 {
        6
    }

    fn name(&self) -> &str {
        "CreateSecurityEventsTable"
    }

    async fn up<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        execute_all(
            conn,
            &[
                r#"
                CREATE TABLE IF NOT EXISTS security_events (
                    id TEXT PRIMARY KEY,
                    user_id TEXT,
                    tenant_id TEXT,
                    event_type TEXT NOT NULL,
                    threat_level TEXT NOT NULL,
                    description TEXT NOT NULL,
                    ip_address TEXT,
                    user_agent TEXT,
                    device_fingerprint TEXT,
                    location TEXT,
                    metadata TEXT NOT NULL DEFAULT '{}',
                    is_resolved INTEGER NOT NULL DEFAULT 0,
                    resolved_at INTEGER,
                    resolved_by TEXT,
                    resolution_notes TEXT,
                    created_at INTEGER NOT NULL
                )"#,
                "CREATE INDEX IF NOT EXISTS idx_security_events_user ON security_events(user_id, created_at)",
                "CREATE INDEX IF NOT EXISTS idx_security_events_type ON security_events(event_type, created_at)",
                "CREATE INDEX IF NOT EXISTS idx_security_events_created_at ON security_events(created_at)",
            ],
        )
        .await
    }

    async fn down<'a>(
        &'a self,
        conn: &'a mut <Sqlite as Database>::Connection,
    ) -> Result<(), MigrationError> {
        execute_all(conn, &["DROP TABLE IF EXISTS security_events"]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn manager() -> SqliteMigrationManager {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create pool");
        let manager = SqliteMigrationManager::new(pool);
        manager.initialize().await.expect("Failed to initialize");
        manager
    }

    async fn table_exists(manager: &SqliteMigrationManager, table: &str) -> bool {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)")
            .bind(table)
            .fetch_one(&manager.pool)
            .await
            .expect("Failed to query schema")
    }

    #[tokio::test]
    async fn test_up_applies_every_migration_once() -> Result<(), MigrationError> {
        let manager = manager().await;
        let migrations = all_migrations();

        manager.up(&migrations).await?;
        manager.up(&migrations).await?;

        let applied = manager.get_applied_migrations().await?;
        let versions: Vec<i64> = applied.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5, 6]);
        assert!(table_exists(&manager, "account_lockouts").await);
        assert!(table_exists(&manager, "security_events").await);
        Ok(())
    }

    #[tokio::test]
    async fn test_up_down_up() -> Result<(), MigrationError> {
        let manager = manager().await;
        let migrations = all_migrations();

        manager.up(&migrations).await?;
        manager.down(&migrations).await?;
        assert!(!manager.is_applied(1).await?);
        assert!(!table_exists(&manager, "login_attempts").await);

        manager.up(&migrations).await?;
        assert!(manager.is_applied(6).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_active_lockout_index_is_partial() -> Result<(), MigrationError> {
        let manager = manager().await;
        manager.up(&all_migrations()).await?;

        let insert = "INSERT INTO account_lockouts (id, user_id, lock_type, reason, threat_level, is_active, locked_at) VALUES (?, 'usr_1', 'admin_action', 'r', 'medium', ?, 0)";
        sqlx::query(insert).bind("lck_a").bind(false).execute(&manager.pool).await?;
        sqlx::query(insert).bind("lck_b").bind(false).execute(&manager.pool).await?;
        sqlx::query(insert).bind("lck_c").bind(true).execute(&manager.pool).await?;
        let second_active = sqlx::query(insert).bind("lck_d").bind(true).execute(&manager.pool).await;
        assert!(second_active.is_err());
        Ok(())
    }
}
