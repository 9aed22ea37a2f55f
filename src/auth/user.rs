//! User Auth Gate
//! Mission: Resolve registered users by password or magic link and issue user sessions

use crate::auth::cookies::{self, CookieSurface};
use crate::auth::jwt::JwtHandler;
use crate::auth::magic_link::{self, MagicLink};
use crate::auth::models::{is_valid_email, normalize_email, IssuedToken, Subject, User};
use crate::auth::password::{PasswordCheck, PasswordHandler};
use crate::auth::user_store::{UserStore, UserStoreError};
use axum_extra::extract::cookie::CookieJar;
use chrono::{Duration, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const MIN_PASSWORD_LEN: usize = 6;

/// Failures surfaced by the user gate. Credential failures are deliberately coarse.
#[derive(Debug)]
pub enum UserAuthError {
    /// Unknown email, passwordless account, or wrong password.
    InvalidCredentials,
    /// Magic link unknown, already used, or expired.
    InvalidLink,
    InvalidEmail,
    WeakPassword,
    EmailTaken,
    Internal(anyhow::Error),
}

impl fmt::Display for UserAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserAuthError::InvalidCredentials => write!(f, "invalid credentials"),
            UserAuthError::InvalidLink => write!(f, "magic link invalid or expired"),
            UserAuthError::InvalidEmail => write!(f, "invalid email address"),
            UserAuthError::WeakPassword => write!(f, "password too short"),
            UserAuthError::EmailTaken => write!(f, "email already registered"),
            UserAuthError::Internal(e) => write!(f, "internal error: {:#}", e),
        }
    }
}

impl std::error::Error for UserAuthError {}

impl From<anyhow::Error> for UserAuthError {
    fn from(e: anyhow::Error) -> Self {
        UserAuthError::Internal(e)
    }
}

/// A user together with the session just issued for them
#[derive(Debug)]
pub struct UserSession {
    pub user: User,
    pub token: IssuedToken,
}

pub struct UserGate {
    jwt_handler: Arc<JwtHandler>,
    passwords: Arc<PasswordHandler>,
    user_store: Arc<UserStore>,
    magic_link_ttl: Duration,
}

impl UserGate {
    pub fn new(
        jwt_handler: Arc<JwtHandler>,
        passwords: Arc<PasswordHandler>,
        user_store: Arc<UserStore>,
        magic_link_ttl: Duration,
    ) -> Self {
        Self {
            jwt_handler,
            passwords,
            user_store,
            magic_link_ttl,
        }
    }

    pub fn magic_link_ttl(&self) -> Duration {
        self.magic_link_ttl
    }

    /// User id from the session cookie, or None for absent/invalid/expired/admin tokens.
    pub fn current_user_id(&self, jar: &CookieJar) -> Option<i64> {
        let token = cookies::get_token(jar, CookieSurface::User)?;
        self.user_id_from_token(&token)
    }

    pub fn user_id_from_token(&self, token: &str) -> Option<i64> {
        match self.jwt_handler.verify_user(token) {
            Ok(user_id) => Some(user_id),
            Err(e) => {
                debug!("User token rejected: {}", e);
                None
            }
        }
    }

    fn start_session(&self, user: User) -> Result<UserSession, UserAuthError> {
        let token = self
            .jwt_handler
            .issue(Subject::User(user.id))
            .map_err(|e| UserAuthError::Internal(e.into()))?;
        // The session is already valid; a missed timestamp must not undo the login.
        if let Err(e) = self.user_store.touch_last_login(user.id, Utc::now()) {
            warn!(user_id = user.id, "Failed to record login time: {:#}", e);
        }
        Ok(UserSession { user, token })
    }

    /// Password path: email + password -> session.
    pub fn login_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserSession, UserAuthError> {
        let email = normalize_email(email);

        let user = match self.user_store.get_user_by_email(&email)? {
            Some(user) => user,
            None => {
                self.passwords.verify_dummy(password);
                warn!(email = %email, "Failed login: unknown email");
                return Err(UserAuthError::InvalidCredentials);
            }
        };

        let check = match user.password_hash.as_deref() {
            Some(digest) => self.passwords.verify(password, digest),
            None => self.passwords.verify_dummy(password),
        };

        match check {
            PasswordCheck::Invalid => {
                warn!(user_id = user.id, "Failed login: bad password");
                Err(UserAuthError::InvalidCredentials)
            }
            PasswordCheck::ValidNeedsRehash => {
                let upgraded = self.passwords.hash(password)?;
                self.user_store.update_password_hash(user.id, &upgraded)?;
                info!(user_id = user.id, "Upgraded legacy password digest");
                self.finish_password_login(user)
            }
            PasswordCheck::Valid => self.finish_password_login(user),
        }
    }

    fn finish_password_login(&self, user: User) -> Result<UserSession, UserAuthError> {
        let session = self.start_session(user)?;
        info!(user_id = session.user.id, "User logged in with password");
        Ok(session)
    }

    /// Create an account (password optional) and log it in.
    pub fn register(
        &self,
        email: &str,
        password: Option<&str>,
        name: Option<&str>,
    ) -> Result<UserSession, UserAuthError> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(UserAuthError::InvalidEmail);
        }

        let password = password.filter(|p| !p.is_empty());
        let password_hash = match password {
            Some(p) if p.chars().count() < MIN_PASSWORD_LEN => {
                return Err(UserAuthError::WeakPassword)
            }
            Some(p) => Some(self.passwords.hash(p)?),
            None => None,
        };

        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let user = self
            .user_store
            .create_user(&email, password_hash.as_deref(), name)
            .map_err(|e| match e {
                UserStoreError::EmailTaken => UserAuthError::EmailTaken,
                UserStoreError::Other(e) => UserAuthError::Internal(e),
            })?;

        self.start_session(user)
    }

    /// Magic-link request path. Returns None for unknown emails; callers must
    /// answer identically in both cases.
    pub fn create_magic_link(&self, email: &str) -> Result<Option<(User, MagicLink)>, UserAuthError> {
        let email = normalize_email(email);
        let Some(user) = self.user_store.get_user_by_email(&email)? else {
            info!(email = %email, "Magic link requested for unknown email");
            return Ok(None);
        };

        let link = MagicLink::new(user.id, self.magic_link_ttl, Utc::now());
        self.user_store.insert_magic_link(&link)?;
        info!(user_id = user.id, expires_at = %link.expires_at, "Magic link created");

        Ok(Some((user, link)))
    }

    /// Magic-link redemption path: single-use, in-window token -> session.
    pub fn redeem_magic_link(&self, token: &str) -> Result<UserSession, UserAuthError> {
        let token = token.trim();
        if !magic_link::looks_like_token(token) {
            return Err(UserAuthError::InvalidLink);
        }

        let now = Utc::now();
        let Some(user_id) = self.user_store.redeem_magic_link(token, now)? else {
            let reason = match self.user_store.get_magic_link(token) {
                Ok(None) => "unknown",
                Ok(Some(link)) if link.is_used() => "already used",
                Ok(Some(link)) if !link.is_valid_at(now) => "expired",
                Ok(Some(_)) => "not redeemable",
                Err(_) => "lookup failed",
            };
            warn!(reason, "Magic link redemption refused");
            return Err(UserAuthError::InvalidLink);
        };

        let user = self
            .user_store
            .get_user_by_id(user_id)?
            .ok_or(UserAuthError::InvalidLink)?;

        let session = self.start_session(user)?;
        info!(user_id, "User logged in with magic link");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::legacy_sha256_hex;
    use tempfile::NamedTempFile;

    struct Fixture {
        gate: UserGate,
        store: Arc<UserStore>,
        jwt: Arc<JwtHandler>,
        _temp: NamedTempFile,
    }

    fn fixture() -> Fixture {
        let temp = NamedTempFile::new().unwrap();
        let store = Arc::new(UserStore::new(temp.path().to_str().unwrap()).unwrap());
        let jwt = Arc::new(JwtHandler::new("user-gate-secret", Duration::days(30)));
        let passwords = Arc::new(PasswordHandler::with_cost(1024, 1, 1).unwrap());
        let gate = UserGate::new(jwt.clone(), passwords, store.clone(), Duration::minutes(15));
        Fixture {
            gate,
            store,
            jwt,
            _temp: temp,
        }
    }

    #[test]
    fn test_register_and_password_login() {
        let f = fixture();
        let registered = f
            .gate
            .register(" Reader@Example.com ", Some("hunter22"), Some("Reader"))
            .unwrap();
        assert_eq!(registered.user.email, "reader@example.com");
        assert_eq!(
            f.jwt.verify_user(&registered.token.token).unwrap(),
            registered.user.id
        );

        let session = f
            .gate
            .login_with_password("reader@example.com", "hunter22")
            .unwrap();
        assert_eq!(session.user.id, registered.user.id);
        assert_eq!(
            f.gate.user_id_from_token(&session.token.token),
            Some(registered.user.id)
        );
    }

    #[test]
    fn test_login_failures_are_indistinguishable() {
        let f = fixture();
        f.gate.register("a@example.com", Some("secret1"), None).unwrap();
        f.gate.register("nopass@example.com", None, None).unwrap();

        for (email, password) in [
            ("a@example.com", "wrong-pass"),
            ("missing@example.com", "secret1"),
            ("nopass@example.com", ""),
        ] {
            let err = f.gate.login_with_password(email, password).unwrap_err();
            assert!(matches!(err, UserAuthError::InvalidCredentials));
        }
    }

    #[test]
    fn test_registration_validation() {
        let f = fixture();
        assert!(matches!(
            f.gate.register("not-an-email", None, None).unwrap_err(),
            UserAuthError::InvalidEmail
        ));
        assert!(matches!(
            f.gate.register("b@example.com", Some("12345"), None).unwrap_err(),
            UserAuthError::WeakPassword
        ));

        f.gate.register("b@example.com", Some("123456"), None).unwrap();
        assert!(matches!(
            f.gate.register("B@example.com", None, None).unwrap_err(),
            UserAuthError::EmailTaken
        ));
    }

    #[test]
    fn test_legacy_digest_upgraded_on_login() {
        let f = fixture();
        let legacy = legacy_sha256_hex("old-secret");
        let user = f
            .store
            .create_user("legacy@example.com", Some(&legacy), None)
            .unwrap();

        f.gate
            .login_with_password("legacy@example.com", "old-secret")
            .unwrap();

        let stored = f.store.get_user_by_id(user.id).unwrap().unwrap();
        let digest = stored.password_hash.unwrap();
        assert!(digest.starts_with("$argon2id$"));

        // Still logs in against the upgraded digest.
        f.gate
            .login_with_password("legacy@example.com", "old-secret")
            .unwrap();
    }

    #[test]
    fn test_magic_link_flow_and_replay() {
        let f = fixture();
        let registered = f.gate.register("m@example.com", None, None).unwrap();

        let (user, link) = f.gate.create_magic_link("M@example.com").unwrap().unwrap();
        assert_eq!(user.id, registered.user.id);
        assert_eq!(link.expires_at - link.created_at, Duration::minutes(15));

        let session = f.gate.redeem_magic_link(&link.token).unwrap();
        assert_eq!(session.user.id, user.id);
        assert!(session.user.email_verified);

        assert!(matches!(
            f.gate.redeem_magic_link(&link.token).unwrap_err(),
            UserAuthError::InvalidLink
        ));
    }

    #[test]
    fn test_login_time_failure_does_not_block_session() {
        let f = fixture();
        let registered = f.gate.register("stamp@example.com", None, None).unwrap();
        let (_, link) = f.gate.create_magic_link("stamp@example.com").unwrap().unwrap();

        rusqlite::Connection::open(f._temp.path())
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER block_login_stamp BEFORE UPDATE OF last_login_at ON users
                 BEGIN SELECT RAISE(ABORT, 'stamp blocked'); END;",
            )
            .unwrap();

        let session = f.gate.redeem_magic_link(&link.token).unwrap();
        assert_eq!(session.user.id, registered.user.id);
        assert_eq!(
            f.jwt.verify_user(&session.token.token).unwrap(),
            registered.user.id
        );
    }

    #[test]
    fn test_magic_link_unknown_email() {
        let f = fixture();
        assert!(f.gate.create_magic_link("ghost@example.com").unwrap().is_none());
    }

    #[test]
    fn test_malformed_magic_token() {
        let f = fixture();
        assert!(matches!(
            f.gate.redeem_magic_link("short").unwrap_err(),
            UserAuthError::InvalidLink
        ));
    }

    #[test]
    fn test_admin_token_is_not_a_user() {
        let f = fixture();
        let admin = f.jwt.issue(Subject::Admin).unwrap();
        assert_eq!(f.gate.user_id_from_token(&admin.token), None);
    }
}
