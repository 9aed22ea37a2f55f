//! Application Configuration
//! Mission: Read process-wide settings once at startup and share them immutably

use chrono::Duration;
use std::env;
use std::fmt;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_DB_FILENAME: &str = "library_auth.db";
pub const DEFAULT_EMAIL_FROM: &str = "Library <noreply@localhost>";
pub const DEFAULT_SESSION_TTL_DAYS: i64 = 30;
pub const DEFAULT_MAGIC_LINK_TTL_MINUTES: i64 = 15;
pub const DEFAULT_AUTH_RATE_LIMIT_PER_MINUTE: u32 = 20;

/// Immutable configuration shared by every gate and handler.
#[derive(Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub admin_password: String,
    pub resend_api_key: Option<String>,
    pub email_from: String,
    pub base_url: String,
    pub db_path: String,
    pub bind_addr: String,
    pub trust_forwarded_proto: bool,
    pub trust_forwarded_for: bool,
    pub session_ttl: Duration,
    pub magic_link_ttl: Duration,
    pub auth_rate_limit_per_minute: u32,
}

// Secrets stay out of debug output.
impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("jwt_secret", &"<redacted>")
            .field("admin_password", &"<redacted>")
            .field("resend_api_key", &self.resend_api_key.as_ref().map(|_| "<redacted>"))
            .field("email_from", &self.email_from)
            .field("base_url", &self.base_url)
            .field("db_path", &self.db_path)
            .field("bind_addr", &self.bind_addr)
            .field("trust_forwarded_proto", &self.trust_forwarded_proto)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .field("session_ttl", &self.session_ttl)
            .field("magic_link_ttl", &self.magic_link_ttl)
            .field("auth_rate_limit_per_minute", &self.auth_rate_limit_per_minute)
            .finish()
    }
}

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "required setting {} is not set", key),
            ConfigError::Invalid { key, value } => {
                write!(f, "setting {} has invalid value {:?}", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let admin_password =
            get("ADMIN_PASSWORD").ok_or(ConfigError::Missing("ADMIN_PASSWORD"))?;

        let session_days = parse_positive(get("SESSION_TTL_DAYS"), "SESSION_TTL_DAYS")?
            .unwrap_or(DEFAULT_SESSION_TTL_DAYS);
        let magic_minutes =
            parse_positive(get("MAGIC_LINK_TTL_MINUTES"), "MAGIC_LINK_TTL_MINUTES")?
                .unwrap_or(DEFAULT_MAGIC_LINK_TTL_MINUTES);
        let rate_limit = parse_positive(
            get("AUTH_RATE_LIMIT_PER_MINUTE"),
            "AUTH_RATE_LIMIT_PER_MINUTE",
        )?
        .map(|v| v as u32)
        .unwrap_or(DEFAULT_AUTH_RATE_LIMIT_PER_MINUTE);

        Ok(Self {
            jwt_secret,
            admin_password,
            resend_api_key: get("RESEND_API_KEY"),
            email_from: get("EMAIL_FROM").unwrap_or_else(|| DEFAULT_EMAIL_FROM.to_string()),
            base_url: get("APP_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            db_path: get("AUTH_DB_PATH").unwrap_or_else(|| DEFAULT_DB_FILENAME.to_string()),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            trust_forwarded_proto: get("TRUST_FORWARDED_PROTO")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            trust_forwarded_for: get("TRUST_FORWARDED_FOR")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            session_ttl: Duration::days(session_days),
            magic_link_ttl: Duration::minutes(magic_minutes),
            auth_rate_limit_per_minute: rate_limit,
        })
    }

    /// Minimal configuration with defaults for everything optional.
    pub fn new(jwt_secret: impl Into<String>, admin_password: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            admin_password: admin_password.into(),
            resend_api_key: None,
            email_from: DEFAULT_EMAIL_FROM.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            db_path: DEFAULT_DB_FILENAME.to_string(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            trust_forwarded_proto: false,
            trust_forwarded_for: false,
            session_ttl: Duration::days(DEFAULT_SESSION_TTL_DAYS),
            magic_link_ttl: Duration::minutes(DEFAULT_MAGIC_LINK_TTL_MINUTES),
            auth_rate_limit_per_minute: DEFAULT_AUTH_RATE_LIMIT_PER_MINUTE,
        }
    }
}

pub fn parse_flag(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "on" | "ON")
}

fn parse_positive(raw: Option<String>, key: &'static str) -> Result<Option<i64>, ConfigError> {
    match raw {
        None => Ok(None),
        Some(v) => match v.trim().parse::<i64>() {
            Ok(n) if n > 0 => Ok(Some(n)),
            _ => Err(ConfigError::Invalid { key, value: v }),
        },
    }
}
