//! Cryptographic helpers for password hashing and device fingerprints
//!
//! Passwords are hashed with Argon2id using tunable cost parameters and verified with
//! the constant-time comparison built into the PHC verifier. Device fingerprints are
//! SHA-256 digests of request signals, compared with `subtle` to avoid timing leaks.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand::{TryRngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{config::PasswordHashingConfig, error::CryptoError};

fn argon2(config: &PasswordHashingConfig) -> Result<Argon2<'static>, CryptoError> {
    let params = Params::new(
        config.memory_kib,
        config.iterations,
        config.parallelism,
        Some(32),
    )
    .map_err(|e| CryptoError::InvalidParams(e.to_string()))?;

    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password into a salted PHC string.
pub fn hash_password(password: &str, config: &PasswordHashingConfig) -> Result<String, CryptoError> {
    let mut salt_bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut salt_bytes)
        .map_err(|e| CryptoError::PasswordHash(e.to_string()))?;
    let salt =
        SaltString::encode_b64(&salt_bytes).map_err(|e| CryptoError::PasswordHash(e.to_string()))?;

    let hash = argon2(config)?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CryptoError::PasswordHash(e.to_string()))?
        .to_string();

    Ok(hash)
}

/// Verify a password against a stored PHC hash.
///
/// Cost parameters are read from the hash itself, so hashes produced under older
/// configurations still verify. Returns `Ok(false)` on mismatch and an error only
/// when the stored hash cannot be parsed.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, CryptoError> {
    let parsed = PasswordHash::new(hash).map_err(|e| CryptoError::PasswordHash(e.to_string()))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(CryptoError::PasswordHash(e.to_string())),
    }
}

/// Derive a stable device fingerprint from request signals.
///
/// The user agent is normalised (trimmed, lowercased) so cosmetic differences do not
/// produce a new device. `extra` carries optional client-supplied signals such as
/// screen size or timezone.
pub fn device_fingerprint(user_agent: &str, ip_address: &str, extra: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_agent.trim().to_lowercase().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(ip_address.trim().as_bytes());
    for signal in extra {
        hasher.update(b"\x1f");
        hasher.update(signal.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Compare two strings in constant time.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
