//! Admin Auth Gate
//! Mission: One deployment-wide admin credential, exchanged for a signed admin session

use crate::auth::cookies::{self, CookieSurface};
use crate::auth::jwt::{JwtHandler, TokenError};
use crate::auth::models::{IssuedToken, Subject};
use axum_extra::extract::cookie::CookieJar;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

#[derive(Debug, PartialEq, Eq)]
pub enum AdminLoginError {
    InvalidPassword,
    Token(TokenError),
}

/// Admin gate. Stateless between requests; all session state lives in the token.
pub struct AdminGate {
    // Digest of the configured password, so comparison time doesn't depend on its length.
    password_digest: [u8; 32],
    jwt_handler: Arc<JwtHandler>,
}

impl AdminGate {
    pub fn new(admin_password: &str, jwt_handler: Arc<JwtHandler>) -> Self {
        Self {
            password_digest: Sha256::digest(admin_password.as_bytes()).into(),
            jwt_handler,
        }
    }

    fn password_matches(&self, candidate: &str) -> bool {
        let candidate: [u8; 32] = Sha256::digest(candidate.as_bytes()).into();
        candidate[..].ct_eq(&self.password_digest[..]).into()
    }

    /// Exchange the admin password for an admin session token.
    pub fn login(&self, password: &str) -> Result<IssuedToken, AdminLoginError> {
        if !self.password_matches(password) {
            warn!("Failed admin login attempt");
            return Err(AdminLoginError::InvalidPassword);
        }

        self.jwt_handler
            .issue(Subject::Admin)
            .map_err(AdminLoginError::Token)
    }

    /// Whether a raw token is a live admin token.
    pub fn token_is_valid(&self, token: &str) -> bool {
        match self.jwt_handler.verify_admin(token) {
            Ok(()) => true,
            Err(e) => {
                debug!("Admin token rejected: {}", e);
                false
            }
        }
    }

    /// Cookie absent or any verification failure means not authenticated.
    pub fn is_authenticated(&self, jar: &CookieJar) -> bool {
        cookies::get_token(jar, CookieSurface::Admin)
            .map(|token| self.token_is_valid(&token))
            .unwrap_or(false)
    }
}
