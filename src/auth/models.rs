//! Authentication Models
//! Mission: Define user records, token claims and request/response bodies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registered user account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // None for passwordless accounts - never serialize
    pub name: Option<String>,
    pub email_verified: bool,
    pub created_at: String,
    pub last_login_at: Option<String>,
}

impl User {
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Who a session token is issued to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Admin,
    User(i64),
}

/// JWT claims payload, tagged by `kind` so each gate can reject the other surface's tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SessionClaims {
    Admin {
        exp: i64,
    },
    User {
        #[serde(rename = "userId")]
        user_id: i64,
        exp: i64,
    },
}

impl SessionClaims {
    pub fn exp(&self) -> i64 {
        match self {
            SessionClaims::Admin { exp } | SessionClaims::User { exp, .. } => *exp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionClaims::Admin { .. } => "admin",
            SessionClaims::User { .. } => "user",
        }
    }
}

/// A freshly signed session token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub max_age_secs: i64, // cookie Max-Age mirrors the token lifetime
}

/// Admin login request body
#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    pub password: String,
}

/// User password login request body
#[derive(Debug, Deserialize)]
pub struct UserLoginRequest {
    pub email: String,
    pub password: String,
}

/// Registration request body; password is optional for passwordless accounts
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Magic link request body
#[derive(Debug, Deserialize)]
pub struct MagicLinkRequest {
    pub email: String,
}

/// Magic link redemption body (POST) or query (GET)
#[derive(Debug, Deserialize)]
pub struct MagicLinkRedeemRequest {
    pub token: String,
}

/// Generic success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Successful user login or registration
#[derive(Debug, Serialize)]
pub struct UserSessionResponse {
    pub success: bool,
    pub user: UserResponse,
}

/// `{authenticated}` status response
#[derive(Debug, Serialize)]
pub struct AuthStatusResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserResponse>,
}

/// User response (sanitized)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub email_verified: bool,
    pub has_password: bool,
    pub created_at: String,
}

impl UserResponse {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            email_verified: user.email_verified,
            has_password: user.has_password(),
            created_at: user.created_at.clone(),
        }
    }
}

/// Normalise an email for lookup and storage.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Loose shape check: one `@`, non-empty local part, dotted domain, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}
