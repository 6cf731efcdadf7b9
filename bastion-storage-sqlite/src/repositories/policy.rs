//! SQLite implementation of the password policy repository.

use async_trait::async_trait;
use bastion_core::{
    Error, PolicyId, TenantId, error::utilities::DatabaseResultExt,
    repositories::PasswordPolicyRepository, storage::PasswordPolicy,
};
use sqlx::SqlitePool;

use crate::{from_json, from_timestamp, to_json};

pub struct SqlitePasswordPolicyRepository {
    pool: SqlitePool,
}

impl SqlitePasswordPolicyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SqlitePasswordPolicy {
    id: String,
    tenant_id: Option<String>,
    name: String,
    min_length: i64,
    max_length: i64,
    require_uppercase: bool,
    require_lowercase: bool,
    require_digit: bool,
    require_symbol: bool,
    history_count: i64,
    max_age_days: i64,
    max_failed_attempts: i64,
    lockout_duration_minutes: i64,
    forbidden_patterns: String,
    prevent_user_info: bool,
    prevent_common_passwords: bool,
    is_active: bool,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<SqlitePasswordPolicy> for PasswordPolicy {
    type Error = Error;

    fn try_from(row: SqlitePasswordPolicy) -> Result<Self, Self::Error> {
        Ok(PasswordPolicy {
            id: PolicyId::from(row.id),
            tenant_id: row.tenant_id.map(TenantId::from),
            name: row.name,
            min_length: row.min_length as u32,
            max_length: row.max_length as u32,
            require_uppercase: row.require_uppercase,
            require_lowercase: row.require_lowercase,
            require_digit: row.require_digit,
            require_symbol: row.require_symbol,
            history_count: row.history_count as u32,
            max_age_days: row.max_age_days as u32,
            max_failed_attempts: row.max_failed_attempts as u32,
            lockout_duration_minutes: row.lockout_duration_minutes as u32,
            forbidden_patterns: from_json(&row.forbidden_patterns)?,
            prevent_user_info: row.prevent_user_info,
            prevent_common_passwords: row.prevent_common_passwords,
            is_active: row.is_active,
            created_at: from_timestamp(row.created_at)?,
            updated_at: from_timestamp(row.updated_at)?,
        })
    }
}

#[async_trait]
impl PasswordPolicyRepository for SqlitePasswordPolicyRepository {
    async fn find_active(&self, tenant_id: Option<&TenantId>) -> Result<Option<PasswordPolicy>, Error> {
        // `IS` matches NULL against NULL, selecting the global policy for `None`
        let row = sqlx::query_as::<_, SqlitePasswordPolicy>(
            r#"
            SELECT * FROM password_policies
            WHERE tenant_id IS ? AND is_active = 1
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id.map(TenantId::as_str))
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to find password policy")?;

        row.map(PasswordPolicy::try_from).transpose()
    }

    async fn upsert(&self, policy: &PasswordPolicy) -> Result<PasswordPolicy, Error> {
        let tenant_id = policy.tenant_id.as_ref().map(TenantId::as_str);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_db_err_with_context("Failed to begin transaction")?;

        if policy.is_active {
            sqlx::query(
                "UPDATE password_policies SET is_active = 0, updated_at = ? WHERE tenant_id IS ? AND id != ? AND is_active = 1",
            )
            .bind(policy.updated_at.timestamp())
            .bind(tenant_id)
            .bind(policy.id.as_str())
            .execute(&mut *tx)
            .await
            .map_db_err_with_context("Failed to deactivate previous password policy")?;
        }

        sqlx::query(
            r#"
            INSERT INTO password_policies (
                id, tenant_id, name, min_length, max_length, require_uppercase,
                require_lowercase, require_digit, require_symbol, history_count,
                max_age_days, max_failed_attempts, lockout_duration_minutes,
                forbidden_patterns, prevent_user_info, prevent_common_passwords,
                is_active, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                name = excluded.name,
                min_length = excluded.min_length,
                max_length = excluded.max_length,
                require_uppercase = excluded.require_uppercase,
                require_lowercase = excluded.require_lowercase,
                require_digit = excluded.require_digit,
                require_symbol = excluded.require_symbol,
                history_count = excluded.history_count,
                max_age_days = excluded.max_age_days,
                max_failed_attempts = excluded.max_failed_attempts,
                lockout_duration_minutes = excluded.lockout_duration_minutes,
                forbidden_patterns = excluded.forbidden_patterns,
                prevent_user_info = excluded.prevent_user_info,
                prevent_common_passwords = excluded.prevent_common_passwords,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(policy.id.as_str())
        .bind(tenant_id)
        .bind(&policy.name)
        .bind(i64::from(policy.min_length))
        .bind(i64::from(policy.max_length))
        .bind(policy.require_uppercase)
        .bind(policy.require_lowercase)
        .bind(policy.require_digit)
        .bind(policy.require_symbol)
        .bind(i64::from(policy.history_count))
        .bind(i64::from(policy.max_age_days))
        .bind(i64::from(policy.max_failed_attempts))
        .bind(i64::from(policy.lockout_duration_minutes))
        .bind(to_json(&policy.forbidden_patterns)?)
        .bind(policy.prevent_user_info)
        .bind(policy.prevent_common_passwords)
        .bind(policy.is_active)
        .bind(policy.created_at.timestamp())
        .bind(policy.updated_at.timestamp())
        .execute(&mut *tx)
        .await
        .map_db_err_with_context("Failed to store password policy")?;

        tx.commit()
            .await
            .map_db_err_with_context("Failed to commit password policy")?;

        Ok(policy.clone())
    }
}
