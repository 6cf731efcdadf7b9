//! SQLite implementation of the password history repository.

use async_trait::async_trait;
use bastion_core::{
    Error, UserId, error::utilities::DatabaseResultExt, repositories::PasswordHistoryRepository,
    storage::PasswordHistoryEntry,
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::from_timestamp;

pub struct SqlitePasswordHistoryRepository {
    pool: SqlitePool,
}

impl SqlitePasswordHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqlitePasswordHistoryEntry {
    id: i64,
    user_id: String,
    password_hash: String,
    created_at: i64,
}

impl TryFrom<SqlitePasswordHistoryEntry> for PasswordHistoryEntry {
    type Error = Error;

    fn try_from(row: SqlitePasswordHistoryEntry) -> Result<Self, Self::Error> {
        Ok(PasswordHistoryEntry {
            id: row.id,
            user_id: UserId::from(row.user_id),
            password_hash: row.password_hash,
            created_at: from_timestamp(row.created_at)?,
        })
    }
}

#[async_trait]
impl PasswordHistoryRepository for SqlitePasswordHistoryRepository {
    async fn add(
        &self,
        user_id: &UserId,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<PasswordHistoryEntry, Error> {
        let row = sqlx::query_as::<_, SqlitePasswordHistoryEntry>(
            r#"
            INSERT INTO password_history (user_id, password_hash, created_at)
            VALUES (?, ?, ?)
            RETURNING id, user_id, password_hash, created_at
            "#,
        )
        .bind(user_id.as_str())
        .bind(password_hash)
        .bind(created_at.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_db_err_with_context("Failed to add password history")?;

        row.try_into()
    }

    async fn recent(&self, user_id: &UserId, limit: u32) -> Result<Vec<PasswordHistoryEntry>, Error> {
        let rows = sqlx::query_as::<_, SqlitePasswordHistoryEntry>(
            r#"
            SELECT id, user_id, password_hash, created_at
            FROM password_history
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_db_err_with_context("Failed to load password history")?;

        rows.into_iter().map(PasswordHistoryEntry::try_from).collect()
    }

    async fn prune(&self, user_id: &UserId, keep: u32) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM password_history
            WHERE user_id = ? AND id NOT IN (
                SELECT id FROM password_history
                WHERE user_id = ?
                ORDER BY created_at DESC, id DESC
                LIMIT ?
            )
            "#,
        )
        .bind(user_id.as_str())
        .bind(user_id.as_str())
        .bind(i64::from(keep))
        .execute(&self.pool)
        .await
        .map_db_err_with_context("Failed to prune password history")?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_test_db;
    use chrono::Duration;

    #[tokio::test]
    async fn test_recent_is_newest_first_and_prune_keeps_newest() {
        let repo = SqlitePasswordHistoryRepository::new(setup_test_db().await);
        let user = UserId::new("usr_1");
        let other = UserId::new("usr_2");
        let now = Utc::now();

        for (i, hash) in ["h1", "h2", "h3", "h4"].iter().enumerate() {
            repo.add(&user, hash, now - Duration::days(10 - i as i64))
                .await
                .unwrap();
        }
        repo.add(&other, "x1", now).await.unwrap();

        let recent = repo.recent(&user, 2).await.unwrap();
        let hashes: Vec<&str> = recent.iter().map(|e| e.password_hash.as_str()).collect();
        assert_eq!(hashes, vec!["h4", "h3"]);

        assert_eq!(repo.prune(&user, 2).await.unwrap(), 2);
        assert_eq!(repo.recent(&user, 10).await.unwrap().len(), 2);
        assert_eq!(repo.recent(&other, 10).await.unwrap().len(), 1);
    }
}
