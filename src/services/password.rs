//! Password hashing and verification.
//!
//! Primary format is Argon2id. Records imported from the previous system
//! carry a bare SHA-256 hex digest; those still verify, and the auth
//! service re-hashes them with Argon2id on the first successful login.

use anyhow::Result;
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use sha2::{Digest, Sha256};

use crate::config::SecurityConfig;

/// Hash a password using Argon2id with optional custom params.
/// If config is None, uses the library defaults.
pub fn hash_password(password: &str, config: Option<&SecurityConfig>) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let argon2 = if let Some(cfg) = config {
        let params = Params::new(
            cfg.argon2_memory_cost_kib,
            cfg.argon2_time_cost,
            cfg.argon2_parallelism,
            None,
        )
        .map_err(|e| anyhow::anyhow!("Invalid Argon2 params: {e}"))?;
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
    } else {
        Argon2::default()
    };

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

    Ok(hash.to_string())
}

/// Verify a password against an Argon2 hash string.
/// Returns Ok(false) for a well-formed hash that doesn't match; Err only
/// when the stored value isn't a PHC string at all.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(stored_hash)
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {e}"))?;

    let argon2 = Argon2::default();
    Ok(argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Whether a stored hash has the legacy shape: a bare 64-char lowercase hex
/// SHA-256 digest with no salt or parameters embedded.
#[must_use]
pub fn is_legacy_hash(stored_hash: &str) -> bool {
    stored_hash.len() == 64
        && stored_hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Verify against the legacy format. Only called when the adaptive check
/// already failed and the stored value has the legacy shape.
#[must_use]
pub fn verify_legacy(password: &str, stored_hash: &str) -> bool {
    sha256_hex(password) == stored_hash
}

/// SHA-256 hex digest. Also used for OTP codes and security answers, which
/// are short-lived and rate-limited, so the fast hash is deliberate.
#[must_use]
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argon2_round_trip() {
        let hash = hash_password("Secr3t!", None).unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("Secr3t!", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn legacy_shape_detection() {
        let legacy = sha256_hex("hunter2");
        assert!(is_legacy_hash(&legacy));

        let adaptive = hash_password("hunter2", None).unwrap();
        assert!(!is_legacy_hash(&adaptive));

        // Right length, wrong alphabet
        assert!(!is_legacy_hash(&"z".repeat(64)));
        assert!(!is_legacy_hash("deadbeef"));
    }

    #[test]
    fn legacy_verification() {
        let legacy = sha256_hex("hunter2");
        assert!(verify_legacy("hunter2", &legacy));
        assert!(!verify_legacy("hunter3", &legacy));
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
