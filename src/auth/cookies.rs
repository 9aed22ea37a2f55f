//! Session Cookies
//! Mission: Carry session tokens in HttpOnly cookies with per-request security flags

use axum::http::{HeaderMap, Uri};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

pub const ADMIN_COOKIE_NAME: &str = "admin_token";
pub const USER_COOKIE_NAME: &str = "user_token";

/// Which surface a session cookie belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieSurface {
    Admin,
    User,
}

impl CookieSurface {
    pub fn cookie_name(self) -> &'static str {
        match self {
            CookieSurface::Admin => ADMIN_COOKIE_NAME,
            CookieSurface::User => USER_COOKIE_NAME,
        }
    }
}

/// Build the session cookie: HttpOnly, SameSite=Lax, Path=/, Max-Age = token lifetime.
pub fn session_cookie(
    surface: CookieSurface,
    token: String,
    secure: bool,
    max_age_secs: i64,
) -> Cookie<'static> {
    Cookie::build((surface.cookie_name(), token))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(max_age_secs))
        .build()
}

pub fn set_session_cookie(
    jar: CookieJar,
    surface: CookieSurface,
    token: String,
    secure: bool,
    max_age_secs: i64,
) -> CookieJar {
    jar.add(session_cookie(surface, token, secure, max_age_secs))
}

/// Overwrite the cookie with an empty, immediately expiring value.
pub fn clear_session_cookie(jar: CookieJar, surface: CookieSurface) -> CookieJar {
    jar.add(
        Cookie::build((surface.cookie_name(), ""))
            .http_only(true)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::ZERO)
            .build(),
    )
}

/// Raw cookie value, unvalidated. Empty values count as absent.
pub fn get_token(jar: &CookieJar, surface: CookieSurface) -> Option<String> {
    jar.get(surface.cookie_name())
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Whether the inbound request travelled over TLS.
///
/// `X-Forwarded-Proto` is honoured only when the deployment sits behind a
/// proxy that sets it.
pub fn request_is_secure(headers: &HeaderMap, uri: &Uri, trust_forwarded_proto: bool) -> bool {
    if uri.scheme_str() == Some("https") {
        return true;
    }

    trust_forwarded_proto
        && headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|proto| proto.trim().eq_ignore_ascii_case("https"))
            .unwrap_or(false)
}
