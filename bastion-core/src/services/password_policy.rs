//! Password policy engine.
//!
//! Evaluates candidate passwords against the effective policy for a tenant and
//! against the user's password history, hashes accepted passwords and tracks
//! password age.
//!
//! Policy resolution falls back from the tenant policy to the global policy and
//! finally to [`PasswordPolicy::builtin_default`].
//!
//! # Example
//!
//! ```rust,ignore
//! let result = service
//!     .validate_password("hunter2", &PasswordSubject::user(user_id).email("a@b.com"))
//!     .await?;
//! if !result.is_valid {
//!     return Err(ValidationError::PolicyViolations(result.errors).into());
//! }
//! ```

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use regex::RegexBuilder;

use crate::{
    Error,
    config::{PasswordHashingConfig, RetentionConfig},
    crypto,
    error::{PasswordError, ValidationError},
    id::{TenantId, UserId},
    repositories::{PasswordHistoryRepository, PasswordPolicyRepository},
    storage::{PasswordHistoryEntry, PasswordPolicy},
    validation::email_local_part,
};

/// Oracle answering whether a password is known to be compromised.
///
/// Implementations may call out to a breach corpus. Failures are logged and
/// treated as "not compromised" so an unavailable oracle never blocks a user.
#[async_trait]
pub trait CompromisedPasswordChecker: Send + Sync + 'static {
    async fn is_compromised(&self, password: &str) -> Result<bool, Error>;
}

/// Checker that never reports a password as compromised.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCompromised;

#[async_trait]
impl CompromisedPasswordChecker for NeverCompromised {
    async fn is_compromised(&self, _password: &str) -> Result<bool, Error> {
        Ok(false)
    }
}

/// Checker backed by a fixed, case-insensitive denylist.
#[derive(Debug, Clone, Default)]
pub struct StaticDenylist {
    entries: HashSet<String>,
}

impl StaticDenylist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|e| e.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// A small list of the most common leaked passwords.
    pub fn common() -> Self {
        Self::new([
            "123456",
            "123456789",
            "12345678",
            "password",
            "password1",
            "password123",
            "qwerty",
            "qwerty123",
            "111111",
            "abc123",
            "letmein",
            "welcome",
            "welcome1",
            "admin",
            "iloveyou",
            "monkey",
            "dragon",
            "football",
            "baseball",
            "sunshine",
            "princess",
            "passw0rd",
            "p@ssw0rd",
            "p@ssword1",
        ])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CompromisedPasswordChecker for StaticDenylist {
    async fn is_compromised(&self, password: &str) -> Result<bool, Error> {
        Ok(self.entries.contains(&password.to_lowercase()))
    }
}

/// Who a password is being evaluated for.
///
/// Every field is optional: checks that need a missing field are skipped.
#[derive(Debug, Clone, Default)]
pub struct PasswordSubject {
    pub user_id: Option<UserId>,
    pub tenant_id: Option<TenantId>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl PasswordSubject {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn name(mut self, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        self.first_name = Some(first_name.into());
        self.last_name = Some(last_name.into());
        self
    }
}

/// Outcome of evaluating a password. Every violation is listed, not just the first.
#[derive(Debug, Clone)]
pub struct PasswordValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    /// Heuristic strength on a 0 to 100 scale
    pub strength: u8,
    pub is_compromised: bool,
    pub policy: PasswordPolicy,
}

/// User info fragments shorter than this are not matched against passwords.
const MIN_USER_INFO_LEN: usize = 3;

/// Strings whose 3-character windows count as sequential or keyboard runs.
const SEQUENCES: &[&str] = &[
    "abcdefghijklmnopqrstuvwxyz",
    "01234567890",
    "qwertyuiop",
    "asdfghjkl",
    "zxcvbnm",
];

/// Heuristic password strength in `0..=100`.
///
/// Length of 8 or more scores 25, each character class present scores 25 (at most
/// 100 from classes), lengths of 12 and 16 add 10 each. A run of three identical
/// characters and a sequential or keyboard substring each cost 10.
pub fn password_strength(password: &str) -> u8 {
    let length = password.chars().count();
    let mut score: i32 = 0;

    if length >= 8 {
        score += 25;
    }

    let classes = [
        password.chars().any(|c| c.is_lowercase()),
        password.chars().any(|c| c.is_uppercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(is_symbol),
    ];
    score += (classes.iter().filter(|present| **present).count() as i32 * 25).min(100);

    if length >= 12 {
        score += 10;
    }
    if length >= 16 {
        score += 10;
    }

    if has_repeated_run(password) {
        score -= 10;
    }
    if has_sequential_run(password) {
        score -= 10;
    }

    score.clamp(0, 100) as u8
}

fn is_symbol(c: char) -> bool {
    !c.is_alphanumeric() && !c.is_whitespace()
}

fn has_repeated_run(password: &str) -> bool {
    let chars: Vec<char> = password.chars().collect();
    chars.windows(3).any(|w| w[0] == w[1] && w[1] == w[2])
}

fn has_sequential_run(password: &str) -> bool {
    let lowered: Vec<char> = password.to_lowercase().chars().collect();
    lowered.windows(3).any(|w| {
        let window: String = w.iter().collect();
        SEQUENCES.iter().any(|seq| seq.contains(&window))
    })
}

fn contains_forbidden_pattern(password: &str, pattern: &str) -> bool {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => regex.is_match(password),
        Err(_) => password.to_lowercase().contains(&pattern.to_lowercase()),
    }
}

/// Resolve the policy in effect for a tenant: the tenant's active policy, else the
/// global policy, else [`PasswordPolicy::builtin_default`].
pub async fn resolve_effective_policy<P: PasswordPolicyRepository>(
    repository: &P,
    tenant_id: Option<&TenantId>,
) -> Result<PasswordPolicy, Error> {
    if let Some(tenant_id) = tenant_id {
        if let Some(policy) = repository.find_active(Some(tenant_id)).await? {
            return Ok(policy);
        }
    }

    Ok(repository
        .find_active(None)
        .await?
        .unwrap_or_else(PasswordPolicy::builtin_default))
}

/// Service enforcing password policies and password history.
pub struct PasswordPolicyService<P: PasswordPolicyRepository, H: PasswordHistoryRepository> {
    policy_repository: Arc<P>,
    history_repository: Arc<H>,
    compromised_checker: Arc<dyn CompromisedPasswordChecker>,
    hashing: PasswordHashingConfig,
    retention: RetentionConfig,
}

impl<P: PasswordPolicyRepository, H: PasswordHistoryRepository> PasswordPolicyService<P, H> {
    pub fn new(
        policy_repository: Arc<P>,
        history_repository: Arc<H>,
        hashing: PasswordHashingConfig,
        retention: RetentionConfig,
    ) -> Self {
        Self {
            policy_repository,
            history_repository,
            compromised_checker: Arc::new(NeverCompromised),
            hashing,
            retention,
        }
    }

    /// Replace the compromise oracle (defaults to [`NeverCompromised`]).
    pub fn with_compromised_checker(mut self, checker: Arc<dyn CompromisedPasswordChecker>) -> Self {
        self.compromised_checker = checker;
        self
    }

    /// Resolve the policy in effect for a tenant.
    pub async fn effective_policy(&self, tenant_id: Option<&TenantId>) -> Result<PasswordPolicy, Error> {
        resolve_effective_policy(self.policy_repository.as_ref(), tenant_id).await
    }

    /// Store a policy after checking it is internally consistent.
    pub async fn save_policy(&self, mut policy: PasswordPolicy) -> Result<PasswordPolicy, Error> {
        if policy.name.trim().is_empty() {
            return Err(ValidationError::InvalidPolicy("name cannot be empty".to_string()).into());
        }
        if policy.min_length == 0 {
            return Err(
                ValidationError::InvalidPolicy("min_length must be at least 1".to_string()).into(),
            );
        }
        if policy.min_length > policy.max_length {
            return Err(ValidationError::InvalidPolicy(format!(
                "min_length {} exceeds max_length {}",
                policy.min_length, policy.max_length
            ))
            .into());
        }
        if policy.max_failed_attempts == 0 {
            return Err(ValidationError::InvalidPolicy(
                "max_failed_attempts must be at least 1".to_string(),
            )
            .into());
        }
        for pattern in &policy.forbidden_patterns {
            if let Err(e) = RegexBuilder::new(pattern).case_insensitive(true).build() {
                return Err(ValidationError::InvalidPolicy(format!(
                    "forbidden pattern '{pattern}' is not a valid expression: {e}"
                ))
                .into());
            }
        }

        policy.updated_at = Utc::now();
        let saved = self.policy_repository.upsert(&policy).await?;
        tracing::info!(
            policy_id = %saved.id,
            tenant_id = ?saved.tenant_id.as_ref().map(|t| t.as_str()),
            "Saved password policy"
        );
        Ok(saved)
    }

    /// Evaluate a candidate password against the effective policy and history.
    ///
    /// Policy violations are reported in the result, never as an `Err`. Errors are
    /// reserved for infrastructure failures.
    pub async fn validate_password(
        &self,
        password: &str,
        subject: &PasswordSubject,
    ) -> Result<PasswordValidationResult, Error> {
        let policy = self.effective_policy(subject.tenant_id.as_ref()).await?;
        let mut errors = Vec::new();

        let length = password.chars().count() as u32;
        if length < policy.min_length {
            errors.push(format!(
                "Password must be at least {} characters long",
                policy.min_length
            ));
        }
        if length > policy.max_length {
            errors.push(format!(
                "Password must be no more than {} characters long",
                policy.max_length
            ));
        }
        if policy.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            errors.push("Password must contain at least one uppercase letter".to_string());
        }
        if policy.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
            errors.push("Password must contain at least one lowercase letter".to_string());
        }
        if policy.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            errors.push("Password must contain at least one digit".to_string());
        }
        if policy.require_symbol && !password.chars().any(is_symbol) {
            errors.push("Password must contain at least one symbol".to_string());
        }

        if policy
            .forbidden_patterns
            .iter()
            .any(|pattern| contains_forbidden_pattern(password, pattern))
        {
            errors.push("Password contains a forbidden pattern".to_string());
        }

        if policy.prevent_user_info {
            errors.extend(user_info_violations(password, subject));
        }

        let mut is_compromised = false;
        if policy.prevent_common_passwords {
            is_compromised = match self.compromised_checker.is_compromised(password).await {
                Ok(compromised) => compromised,
                Err(e) => {
                    tracing::warn!(error = %e, "Compromised password check failed");
                    false
                }
            };
            if is_compromised {
                errors.push("Password has appeared in a known data breach".to_string());
            }
        }

        if let Some(user_id) = &subject.user_id {
            if self.is_reused(user_id, password, policy.history_count).await? {
                errors.push(format!(
                    "Password cannot match any of your last {} passwords",
                    policy.history_count
                ));
            }
        }

        Ok(PasswordValidationResult {
            is_valid: errors.is_empty(),
            errors,
            strength: password_strength(password),
            is_compromised,
            policy,
        })
    }

    async fn is_reused(&self, user_id: &UserId, password: &str, depth: u32) -> Result<bool, Error> {
        if depth == 0 {
            return Ok(false);
        }

        let history = self.history_repository.recent(user_id, depth).await?;
        for entry in &history {
            // Hashes this crate cannot parse, such as imported legacy formats, never match
            match crypto::verify_password(password, &entry.password_hash) {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        user_id = %user_id,
                        history_id = entry.id,
                        "Skipping unreadable password history entry"
                    );
                }
            }
        }
        Ok(false)
    }

    pub fn hash_password(&self, password: &str) -> Result<String, Error> {
        Ok(crypto::hash_password(password, &self.hashing)?)
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, Error> {
        Ok(crypto::verify_password(password, hash)?)
    }

    /// Number of history rows kept per user under `policy`.
    ///
    /// At least one row is always kept so password age stays known.
    pub fn retained_history_depth(&self, policy: &PasswordPolicy) -> u32 {
        policy
            .history_count
            .min(self.retention.password_history_cap)
            .max(1)
    }

    /// Append a password hash to the user's history and prune older rows.
    pub async fn store_password_history(
        &self,
        user_id: &UserId,
        password_hash: &str,
        policy: &PasswordPolicy,
    ) -> Result<PasswordHistoryEntry, Error> {
        let entry = self
            .history_repository
            .add(user_id, password_hash, Utc::now())
            .await?;

        let keep = self.retained_history_depth(policy);
        let pruned = self.history_repository.prune(user_id, keep).await?;
        if pruned > 0 {
            tracing::debug!(user_id = %user_id, pruned, keep, "Pruned password history");
        }

        Ok(entry)
    }

    /// Fail with [`PasswordError::Expired`] if the current password is older than
    /// the policy's maximum age.
    ///
    /// A user with no recorded password fails with [`PasswordError::NotSet`], since
    /// its age cannot be established.
    pub async fn enforce_password_expiry(
        &self,
        user_id: &UserId,
        tenant_id: Option<&TenantId>,
    ) -> Result<(), Error> {
        let policy = self.effective_policy(tenant_id).await?;
        let Some(max_age) = policy.max_age() else {
            return Ok(());
        };

        let latest = self
            .history_repository
            .recent(user_id, 1)
            .await?
            .into_iter()
            .next()
            .ok_or(PasswordError::NotSet)?;

        let expired_at = latest.created_at + max_age;
        if Utc::now() >= expired_at {
            tracing::info!(user_id = %user_id, %expired_at, "Password expired");
            return Err(PasswordError::Expired { expired_at }.into());
        }

        Ok(())
    }

    /// Validate, hash and record a new password for a user.
    ///
    /// Returns the hash to store with the credential. Policy violations fail with
    /// [`ValidationError::PolicyViolations`] listing every violation.
    pub async fn set_password(&self, user_id: &UserId, password: &str, subject: &PasswordSubject) -> Result<String, Error> {
        let mut subject = subject.clone();
        subject.user_id = Some(user_id.clone());

        let result = self.validate_password(password, &subject).await?;
        if !result.is_valid {
            return Err(ValidationError::PolicyViolations(result.errors).into());
        }

        let hash = self.hash_password(password)?;
        self.store_password_history(user_id, &hash, &result.policy)
            .await?;

        tracing::info!(user_id = %user_id, "Password changed");
        Ok(hash)
    }
}

fn user_info_violations(password: &str, subject: &PasswordSubject) -> Vec<String> {
    let lowered = password.to_lowercase();
    let mut errors = Vec::new();

    if let Some(local) = subject.email.as_deref().and_then(email_local_part) {
        if local.chars().count() >= MIN_USER_INFO_LEN && lowered.contains(&local) {
            errors.push("Password must not contain your email address".to_string());
        }
    }

    let contains_name = [&subject.first_name, &subject.last_name]
        .into_iter()
        .flatten()
        .map(|name| name.trim().to_lowercase())
        .any(|name| name.chars().count() >= MIN_USER_INFO_LEN && lowered.contains(&name));
    if contains_name {
        errors.push("Password must not contain your name".to_string());
    }

    errors
}
