//! Password Hashing
//! Mission: Turn credentials into salted Argon2id digests and check candidates against them

use anyhow::{anyhow, Result};
use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

/// Outcome of checking a candidate credential against a stored digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
    Valid,
    /// Matched a legacy unsalted SHA-256 digest; the caller should store a fresh hash.
    ValidNeedsRehash,
    Invalid,
}

impl PasswordCheck {
    pub fn is_valid(self) -> bool {
        !matches!(self, PasswordCheck::Invalid)
    }
}

/// Argon2id password handler
pub struct PasswordHandler {
    params: Params,
    // Verified against when the account does not exist, so both paths cost the same.
    dummy_digest: String,
}

impl PasswordHandler {
    /// Handler with the argon2 crate's default (production) cost.
    pub fn new() -> Result<Self> {
        Self::with_params(Params::default())
    }

    /// Handler with explicit cost parameters (memory in KiB, iterations, parallelism).
    pub fn with_cost(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| anyhow!("Invalid Argon2 parameters: {}", e))?;
        Self::with_params(params)
    }

    fn with_params(params: Params) -> Result<Self> {
        let mut handler = Self {
            params,
            dummy_digest: String::new(),
        };
        handler.dummy_digest = handler.hash("dummy-password-for-timing")?;
        Ok(handler)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a credential with a fresh random salt. Returns a PHC-format string.
    pub fn hash(&self, credential: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let digest = self
            .argon2()
            .hash_password(credential.as_bytes(), &salt)
            .map_err(|e| anyhow!("Failed to hash password: {}", e))?;
        Ok(digest.to_string())
    }

    /// Check a candidate against a stored digest (Argon2 PHC or legacy SHA-256 hex).
    pub fn verify(&self, candidate: &str, digest: &str) -> PasswordCheck {
        if is_legacy_digest(digest) {
            let computed = legacy_sha256_hex(candidate);
            return if computed.as_bytes().ct_eq(digest.as_bytes()).into() {
                PasswordCheck::ValidNeedsRehash
            } else {
                PasswordCheck::Invalid
            };
        }

        let parsed = match PasswordHash::new(digest) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Stored password digest is malformed: {}", e);
                return PasswordCheck::Invalid;
            }
        };

        match self.argon2().verify_password(candidate.as_bytes(), &parsed) {
            Ok(()) => PasswordCheck::Valid,
            Err(_) => PasswordCheck::Invalid,
        }
    }

    /// Burn the same work as a real verification. Always returns `Invalid`.
    pub fn verify_dummy(&self, candidate: &str) -> PasswordCheck {
        let _ = self.verify(candidate, &self.dummy_digest);
        PasswordCheck::Invalid
    }
}

/// Bare SHA-256 of the credential as lowercase hex (pre-Argon2 digest format).
pub fn legacy_sha256_hex(credential: &str) -> String {
    hex::encode(Sha256::digest(credential.as_bytes()))
}

fn is_legacy_digest(digest: &str) -> bool {
    digest.len() == 64
        && digest
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
