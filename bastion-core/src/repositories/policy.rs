//! Repository trait for password policies.

use async_trait::async_trait;

use crate::{Error, id::TenantId, storage::PasswordPolicy};

/// Storage for per-tenant and global password policies.
#[async_trait]
pub trait PasswordPolicyRepository: Send + Sync + 'static {
    /// Find the active policy stored for exactly this scope.
    ///
    /// `None` looks up the global policy. Falling back from a tenant to the global
    /// policy is the caller's job.
    async fn find_active(&self, tenant_id: Option<&TenantId>) -> Result<Option<PasswordPolicy>, Error>;

    /// Insert or replace the policy for its scope.
    ///
    /// Storing an active policy deactivates any other active policy for the same
    /// scope, so exactly one active policy resolves per tenant.
    async fn upsert(&self, policy: &PasswordPolicy) -> Result<PasswordPolicy, Error>;
}
