//! JWT Token Handler
//! Mission: Issue and verify signed, expiring session tokens for both auth surfaces

use crate::auth::models::{IssuedToken, SessionClaims, Subject};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use std::fmt;
use tracing::debug;

/// Why a token was not accepted. Gates fold every variant into "not authenticated".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    Malformed,
    BadSignature,
    Expired,
    /// Signature is fine but the claims are not the shape this gate expects.
    WrongKind,
    Encode(String),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Malformed => write!(f, "malformed token"),
            TokenError::BadSignature => write!(f, "token signature mismatch"),
            TokenError::Expired => write!(f, "token expired"),
            TokenError::WrongKind => write!(f, "token claims do not match the expected subject"),
            TokenError::Encode(e) => write!(f, "failed to encode token: {}", e),
        }
    }
}

impl std::error::Error for TokenError {}

/// JWT Handler for token operations
pub struct JwtHandler {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validity: Duration,
}

impl JwtHandler {
    /// Create a new JWT handler with secret key and token lifetime
    pub fn new(secret: &str, validity: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validity,
        }
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Issue a token for the subject, valid from now.
    pub fn issue(&self, subject: Subject) -> Result<IssuedToken, TokenError> {
        self.issue_at(subject, Utc::now())
    }

    pub fn issue_at(&self, subject: Subject, now: DateTime<Utc>) -> Result<IssuedToken, TokenError> {
        let expires_at = now + self.validity;
        let exp = expires_at.timestamp();
        let claims = match subject {
            Subject::Admin => SessionClaims::Admin { exp },
            Subject::User(user_id) => SessionClaims::User { user_id, exp },
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encode(e.to_string()))?;

        debug!(
            "Issued {} token, expires in {}s",
            claims.kind(),
            self.validity.num_seconds()
        );

        Ok(IssuedToken {
            token,
            expires_at: Utc.timestamp_opt(exp, 0).single().unwrap_or(expires_at),
            max_age_secs: self.validity.num_seconds(),
        })
    }

    /// Verify signature and expiry, returning the claims of either kind.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below with a strict `now < exp` and no leeway.
        validation.validate_exp = false;
        validation.leeway = 0;

        let decoded =
            decode::<SessionClaims>(token, &self.decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    ErrorKind::InvalidSignature => TokenError::BadSignature,
                    ErrorKind::Json(_) | ErrorKind::MissingRequiredClaim(_) => {
                        TokenError::WrongKind
                    }
                    _ => TokenError::Malformed,
                }
            })?;

        let claims = decoded.claims;
        if now.timestamp() >= claims.exp() {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    /// Accept only admin tokens.
    pub fn verify_admin(&self, token: &str) -> Result<(), TokenError> {
        self.verify_admin_at(token, Utc::now())
    }

    pub fn verify_admin_at(&self, token: &str, now: DateTime<Utc>) -> Result<(), TokenError> {
        match self.verify_at(token, now)? {
            SessionClaims::Admin { .. } => Ok(()),
            SessionClaims::User { .. } => Err(TokenError::WrongKind),
        }
    }

    /// Accept only user tokens, returning the user id.
    pub fn verify_user(&self, token: &str) -> Result<i64, TokenError> {
        self.verify_user_at(token, Utc::now())
    }

    pub fn verify_user_at(&self, token: &str, now: DateTime<Utc>) -> Result<i64, TokenError> {
        match self.verify_at(token, now)? {
            SessionClaims::User { user_id, .. } => Ok(user_id),
            SessionClaims::Admin { .. } => Err(TokenError::WrongKind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "test-secret-key-12345";

    fn handler() -> JwtHandler {
        JwtHandler::new(SECRET, Duration::days(30))
    }

    #[test]
    fn test_user_token_round_trip() {
        let handler = handler();
        let issued = handler.issue(Subject::User(42)).unwrap();

        assert_eq!(issued.token.split('.').count(), 3);
        assert_eq!(issued.max_age_secs, 30 * 24 * 3600);

        let claims = handler.verify(&issued.token).unwrap();
        assert_eq!(
            claims,
            SessionClaims::User {
                user_id: 42,
                exp: issued.expires_at.timestamp()
            }
        );
        assert_eq!(handler.verify_user(&issued.token).unwrap(), 42);
    }

    #[test]
    fn test_admin_token_round_trip() {
        let handler = handler();
        let issued = handler.issue(Subject::Admin).unwrap();

        assert!(handler.verify_admin(&issued.token).is_ok());
    }

    #[test]
    fn test_invalid_token_rejected() {
        let handler = handler();
        assert_eq!(
            handler.verify("invalid.token.here").unwrap_err(),
            TokenError::Malformed
        );
        assert_eq!(handler.verify("").unwrap_err(), TokenError::Malformed);
    }

    #[test]
    fn test_different_secrets_reject() {
        let handler1 = JwtHandler::new("secret1", Duration::days(30));
        let handler2 = JwtHandler::new("secret2", Duration::days(30));

        let issued = handler1.issue(Subject::User(7)).unwrap();
        assert_eq!(
            handler2.verify(&issued.token).unwrap_err(),
            TokenError::BadSignature
        );
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let handler = handler();
        let user = handler.issue(Subject::User(1)).unwrap();
        let admin = handler.issue(Subject::Admin).unwrap();

        // Splice the admin payload onto the user signature.
        let user_parts: Vec<&str> = user.token.split('.').collect();
        let admin_parts: Vec<&str> = admin.token.split('.').collect();
        let forged = format!("{}.{}.{}", user_parts[0], admin_parts[1], user_parts[2]);

        assert_eq!(
            handler.verify(&forged).unwrap_err(),
            TokenError::BadSignature
        );
    }

    #[test]
    fn test_expiry_boundary() {
        let handler = JwtHandler::new(SECRET, Duration::seconds(100));
        let now = Utc::now();
        let issued = handler.issue_at(Subject::User(5), now).unwrap();

        assert!(handler
            .verify_at(&issued.token, now + Duration::seconds(99))
            .is_ok());
        assert_eq!(
            handler
                .verify_at(&issued.token, now + Duration::seconds(100))
                .unwrap_err(),
            TokenError::Expired
        );
        assert_eq!(
            handler
                .verify_at(&issued.token, now + Duration::seconds(101))
                .unwrap_err(),
            TokenError::Expired
        );
    }

    #[test]
    fn test_gates_reject_other_kind() {
        let handler = handler();
        let user = handler.issue(Subject::User(9)).unwrap();
        let admin = handler.issue(Subject::Admin).unwrap();

        assert_eq!(
            handler.verify_admin(&user.token).unwrap_err(),
            TokenError::WrongKind
        );
        assert_eq!(
            handler.verify_user(&admin.token).unwrap_err(),
            TokenError::WrongKind
        );
    }

    #[test]
    fn test_untagged_claims_rejected() {
        let handler = handler();
        let exp = (Utc::now() + Duration::days(1)).timestamp();
        let key = EncodingKey::from_secret(SECRET.as_bytes());

        let legacy_admin = encode(
            &Header::new(Algorithm::HS256),
            &json!({ "admin": true, "exp": exp }),
            &key,
        )
        .unwrap();
        let legacy_user = encode(
            &Header::new(Algorithm::HS256),
            &json!({ "userId": 3, "exp": exp }),
            &key,
        )
        .unwrap();
        let string_id = encode(
            &Header::new(Algorithm::HS256),
            &json!({ "kind": "user", "userId": "3", "exp": exp }),
            &key,
        )
        .unwrap();

        assert_eq!(
            handler.verify(&legacy_admin).unwrap_err(),
            TokenError::WrongKind
        );
        assert_eq!(
            handler.verify(&legacy_user).unwrap_err(),
            TokenError::WrongKind
        );
        assert_eq!(handler.verify(&string_id).unwrap_err(), TokenError::WrongKind);
    }

    #[test]
    fn test_other_algorithm_rejected() {
        let handler = handler();
        let exp = (Utc::now() + Duration::days(1)).timestamp();
        let token = encode(
            &Header::new(Algorithm::HS512),
            &json!({ "kind": "admin", "exp": exp }),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(handler.verify_admin(&token).is_err());
    }
}
