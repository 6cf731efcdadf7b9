//! SQLite implementation of the account lockout repository.
//!
//! The partial unique index `idx_account_lockouts_one_active` allows at most one
//! row with `is_active = 1` per user. Concurrent `create` calls for the same user
//! race on that index and the loser is reported as already locked.

use async_trait::async_trait;
use bastion_core::{
    Error, LockoutId, UserId,
    error::{LockoutError, StorageError, utilities::DatabaseResultExt},
    repositories::AccountLockoutRepository,
    storage::{AccountLockout, NewAccountLockout},
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{from_optional_timestamp, from_timestamp, parse_column};

const COLUMNS: &str = "id, user_id, lock_type, reason, threat_level, is_active, locked_at, unlocks_at, unlocked_at, unlocked_by";

pub struct SqliteAccountLockoutRepository {
    pool: SqlitePool,
}

impl SqliteAccountLockoutRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn find_flagged_active(&self, user_id: &UserId) -> Result<Option<AccountLockout>, Error> {
        let row = sqlx::query_as::<_, SqliteAccountLockout>(&format!(
            "SELECT {COLUMNS} FROM account_lockouts WHERE user_id = ? AND is_active = 1"
        ))
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to find lockout")?;

        row.map(AccountLockout::try_from).transpose()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqliteAccountLockout {
    id: String,
    user_id: String,
    lock_type: String,
    reason: String,
    threat_level: String,
    is_active: bool,
    locked_at: i64,
    unlocks_at: Option<i64>,
    unlocked_at: Option<i64>,
    unlocked_by: Option<String>,
}

impl TryFrom<SqliteAccountLockout> for AccountLockout {
    type Error = Error;

    fn try_from(row: SqliteAccountLockout) -> Result<Self, Self::Error> {
        Ok(AccountLockout {
            id: LockoutId::from(row.id),
            user_id: UserId::from(row.user_id),
            lock_type: parse_column(&row.lock_type)?,
            reason: row.reason,
            threat_level: parse_column(&row.threat_level)?,
            is_active: row.is_active,
            locked_at: from_timestamp(row.locked_at)?,
            unlocks_at: from_optional_timestamp(row.unlocks_at)?,
            unlocked_at: from_optional_timestamp(row.unlocked_at)?,
            unlocked_by: row.unlocked_by.map(UserId::from),
        })
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl AccountLockoutRepository for SqliteAccountLockoutRepository {
    async fn create(&self, lockout: NewAccountLockout) -> Result<AccountLockout, Error> {
        let now = lockout.locked_at.timestamp();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_db_err_with_context("Failed to begin transaction")?;

        // Expired but unswept rows must not block a new episode
        sqlx::query(
            r#"
            UPDATE account_lockouts
            SET is_active = 0, unlocked_at = COALESCE(unlocked_at, ?)
            WHERE user_id = ? AND is_active = 1 AND unlocks_at IS NOT NULL AND unlocks_at <= ?
            "#,
        )
        .bind(now)
        .bind(lockout.user_id.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_db_err_with_context("Failed to expire stale lockout")?;

        let inserted = sqlx::query_as::<_, SqliteAccountLockout>(&format!(
            r#"
            INSERT INTO account_lockouts (id, user_id, lock_type, reason, threat_level, is_active, locked_at, unlocks_at)
            VALUES (?, ?, ?, ?, ?, 1, ?, ?)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(LockoutId::new_random().as_str())
        .bind(lockout.user_id.as_str())
        .bind(lockout.lock_type.as_str())
        .bind(&lockout.reason)
        .bind(lockout.threat_level.as_str())
        .bind(now)
        .bind(lockout.unlocks_at.map(|t| t.timestamp()))
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) => {
                drop(tx);
                let existing = self.find_flagged_active(&lockout.user_id).await?;
                return Err(match existing {
                    Some(existing) => LockoutError::AlreadyLocked {
                        lockout_id: existing.id,
                        unlocks_at: existing.unlocks_at,
                    }
                    .into(),
                    None => StorageError::Constraint(e.to_string()).into(),
                });
            }
            Err(e) => return Err::<AccountLockout, _>(e).map_db_err_with_context("Failed to create lockout"),
        };

        tx.commit()
            .await
            .map_db_err_with_context("Failed to commit lockout")?;

        row.try_into()
    }

    async fn find_active(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<AccountLockout>, Error> {
        let row = sqlx::query_as::<_, SqliteAccountLockout>(&format!(
            r#"
            SELECT {COLUMNS} FROM account_lockouts
            WHERE user_id = ? AND is_active = 1 AND unlocked_at IS NULL
              AND (unlocks_at IS NULL OR unlocks_at > ?)
            ORDER BY locked_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id.as_str())
        .bind(now.timestamp())
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to find active lockout")?;

        row.map(AccountLockout::try_from).transpose()
    }

    async fn deactivate(
        &self,
        id: &LockoutId,
        unlocked_at: DateTime<Utc>,
        unlocked_by: Option<&UserId>,
    ) -> Result<Option<AccountLockout>, Error> {
        let row = sqlx::query_as::<_, SqliteAccountLockout>(&format!(
            r#"
            UPDATE account_lockouts
            SET is_active = 0, unlocked_at = ?, unlocked_by = ?
            WHERE id = ? AND is_active = 1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(unlocked_at.timestamp())
        .bind(unlocked_by.map(UserId::as_str))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to deactivate lockout")?;

        row.map(AccountLockout::try_from).transpose()
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<AccountLockout>, Error> {
        let rows = sqlx::query_as::<_, SqliteAccountLockout>(&format!(
            r#"
            UPDATE account_lockouts
            SET is_active = 0, unlocked_at = ?
            WHERE is_active = 1 AND unlocks_at IS NOT NULL AND unlocks_at <= ?
            RETURNING {COLUMNS}
            "#
        ))
        .bind(now.timestamp())
        .bind(now.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_db_err_with_context("Failed to expire lockouts")?;

        rows.into_iter().map(AccountLockout::try_from).collect()
    }

    async fn count_locked_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64, Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM account_lockouts WHERE locked_at >= ? AND locked_at <= ?",
        )
        .bind(since.timestamp())
        .bind(until.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_db_err_with_context("Failed to count lockouts")?;

        Ok(count as u64)
    }

    async fn count_active(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM account_lockouts
            WHERE is_active = 1 AND unlocked_at IS NULL
              AND (unlocks_at IS NULL OR unlocks_at > ?)
            "#,
        )
        .bind(now.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_db_err_with_context("Failed to count active lockouts")?;

        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_test_db;
    use bastion_core::{LockType, ThreatLevel, repositories::RepositoryProvider};
    use chrono::Duration;
    use std::sync::Arc;

    fn new_lockout(user: &str, locked_at: DateTime<Utc>, unlocks_at: Option<DateTime<Utc>>) -> NewAccountLockout {
        NewAccountLockout {
            user_id: UserId::new(user),
            lock_type: LockType::FailedLogin,
            reason: LockType::FailedLogin.default_reason().to_string(),
            threat_level: ThreatLevel::High,
            locked_at,
            unlocks_at,
        }
    }

    #[tokio::test]
    async fn test_second_lock_reports_existing() {
        let repo = SqliteAccountLockoutRepository::new(setup_test_db().await);
        let now = Utc::now();

        let first = repo
            .create(new_lockout("usr_1", now, Some(now + Duration::minutes(30))))
            .await
            .unwrap();
        assert!(first.id.is_valid());
        assert_eq!(first.lock_type, LockType::FailedLogin);

        let err = repo
            .create(new_lockout("usr_1", now, None))
            .await
            .unwrap_err();
        match err {
            Error::Lockout(LockoutError::AlreadyLocked { lockout_id, .. }) => {
                assert_eq!(lockout_id, first.id)
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Other users are unaffected
        repo.create(new_lockout("usr_2", now, None)).await.unwrap();
        assert_eq!(repo.count_active(now).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_expired_row_does_not_block_new_lock() {
        let repo = SqliteAccountLockoutRepository::new(setup_test_db().await);
        let now = Utc::now();

        repo.create(new_lockout(
            "usr_1",
            now - Duration::hours(2),
            Some(now - Duration::hours(1)),
        ))
        .await
        .unwrap();
        assert!(
            repo.find_active(&UserId::new("usr_1"), now)
                .await
                .unwrap()
                .is_none()
        );

        let fresh = repo
            .create(new_lockout("usr_1", now, Some(now + Duration::minutes(30))))
            .await
            .unwrap();
        let active = repo
            .find_active(&UserId::new("usr_1"), now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, fresh.id);
    }

    #[tokio::test]
    async fn test_deactivate_is_one_shot() {
        let repo = SqliteAccountLockoutRepository::new(setup_test_db().await);
        let now = Utc::now();
        let admin = UserId::new("usr_admin");

        let lockout = repo.create(new_lockout("usr_1", now, None)).await.unwrap();
        let unlocked = repo
            .deactivate(&lockout.id, now, Some(&admin))
            .await
            .unwrap()
            .unwrap();
        assert!(!unlocked.is_active);
        assert_eq!(unlocked.unlocked_by, Some(admin.clone()));

        assert!(repo.deactivate(&lockout.id, now, Some(&admin)).await.unwrap().is_none());
        assert_eq!(repo.count_active(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expire_stale_only_touches_elapsed_timeboxed_rows() {
        let repo = SqliteAccountLockoutRepository::new(setup_test_db().await);
        let now = Utc::now();

        repo.create(new_lockout("usr_elapsed", now - Duration::hours(1), Some(now - Duration::minutes(1))))
            .await
            .unwrap();
        repo.create(new_lockout("usr_running", now, Some(now + Duration::minutes(30))))
            .await
            .unwrap();
        repo.create(new_lockout("usr_forever", now, None)).await.unwrap();

        let expired = repo.expire_stale(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].user_id.as_str(), "usr_elapsed");
        assert!(repo.expire_stale(now).await.unwrap().is_empty());

        let locked = repo
            .count_locked_between(now - Duration::days(1), now)
            .await
            .unwrap();
        assert_eq!(locked, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_leave_one_active_lockout() {
        let path = std::env::temp_dir().join(format!(
            "bastion-lockout-{}-{}.db",
            std::process::id(),
            LockoutId::new_random().as_str()
        ));
        let url = format!("sqlite://{}", path.display());

        let provider = crate::SqliteRepositoryProvider::connect(&url).await.unwrap();
        provider.migrate().await.unwrap();
        let repo = Arc::new(SqliteAccountLockoutRepository::new(provider.pool().clone()));
        let now = Utc::now();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    repo.create(new_lockout("usr_raced", now, Some(now + Duration::minutes(30))))
                        .await
                })
            })
            .collect();

        let mut created = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(Error::Lockout(LockoutError::AlreadyLocked { .. })) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(conflicts, 15);
        assert_eq!(repo.count_active(now).await.unwrap(), 1);

        provider.pool().close().await;
        let _ = std::fs::remove_file(&path);
    }
}
