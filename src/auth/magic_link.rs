//! Magic Link Tokens
//! Mission: Mint single-use, short-lived login tokens for passwordless sign-in
//!
//! A token carries no claims. Its lifetime and single-use state live in the
//! `magic_link_tokens` table; redemption is one conditional update in
//! [`UserStore::redeem_magic_link`](crate::auth::user_store::UserStore::redeem_magic_link).

use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};

/// 32 bytes = 256 bits of entropy, rendered as 64 hex chars.
pub const MAGIC_LINK_TOKEN_BYTES: usize = 32;

pub const MAGIC_LINK_PATH: &str = "/api/user/verify-magic-link";

/// Draw a fresh token from the OS CSPRNG.
pub fn generate() -> String {
    let mut bytes = [0u8; MAGIC_LINK_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A magic link as persisted by the user store
#[derive(Debug, Clone)]
pub struct MagicLink {
    pub token: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl MagicLink {
    pub fn new(user_id: i64, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            token: generate(),
            user_id,
            created_at: now,
            expires_at: now + ttl,
            used_at: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_used() && !self.is_expired_at(now)
    }
}

/// Clickable URL embedded in the login email.
pub fn link_url(base_url: &str, token: &str) -> String {
    format!(
        "{}{}?token={}",
        base_url.trim_end_matches('/'),
        MAGIC_LINK_PATH,
        token
    )
}

/// Cheap shape check so garbage never reaches the database.
pub fn looks_like_token(candidate: &str) -> bool {
    candidate.len() == MAGIC_LINK_TOKEN_BYTES * 2
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
