//! Identifier types with prefix support
//!
//! Records created by this crate get Stripe-style prefixed IDs (`dev_...`, `evt_...`)
//! carrying at least 96 bits of entropy. Identifiers supplied by the surrounding
//! identity layer (users, tenants) are accepted as opaque strings and never generated
//! here.

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};

/// Generate a prefixed ID with 96 bits of entropy
///
/// The ID format is: `{prefix}_{random_string}`
/// Where the random string is base64 URL-safe encoded without padding.
///
/// # Panics
///
/// Panics if the OS random number generator fails.
pub fn generate_prefixed_id(prefix: &str) -> String {
    let mut bytes = [0u8; 12];
    OsRng
        .try_fill_bytes(&mut bytes)
        .expect("OS RNG failure - system entropy source unavailable");

    let encoded = BASE64_URL_SAFE_NO_PAD.encode(bytes);

    format!("{prefix}_{encoded}")
}

/// Validate that a prefixed ID has the expected format
pub fn validate_prefixed_id(id: &str, expected_prefix: &str) -> bool {
    let Some(random_part) = id
        .strip_prefix(expected_prefix)
        .and_then(|rest| rest.strip_prefix('_'))
    else {
        return false;
    };

    match BASE64_URL_SAFE_NO_PAD.decode(random_part) {
        Ok(decoded) => decoded.len() >= 12,
        Err(_) => false,
    }
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: &str) -> Self {
                Self(id.to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        opaque_id!($(#[$meta])* $name);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn new_random() -> Self {
                Self(generate_prefixed_id($prefix))
            }

            /// Validate that this ID has the correct prefix and entropy
            pub fn is_valid(&self) -> bool {
                validate_prefixed_id(&self.0, $prefix)
            }
        }
    };
}

opaque_id!(
    /// A user identifier supplied by the identity layer. Treated as opaque.
    UserId
);

opaque_id!(
    /// A tenant identifier supplied by the identity layer. Treated as opaque.
    TenantId
);

prefixed_id!(
    /// Identifier of a trusted device row
    DeviceId,
    "dev"
);

prefixed_id!(
    /// Identifier of a single lockout episode
    LockoutId,
    "lck"
);

prefixed_id!(
    /// Identifier of a security event
    SecurityEventId,
    "evt"
);

prefixed_id!(
    /// Identifier of a password policy
    PolicyId,
    "pol"
);
