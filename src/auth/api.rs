//! Authentication API Endpoints
//! Mission: Provide admin and user login, logout, status, registration and magic-link endpoints

use crate::auth::{
    admin::{AdminGate, AdminLoginError},
    cookies::{self, CookieSurface},
    jwt::JwtHandler,
    magic_link,
    middleware::CurrentUser,
    models::{
        AdminLoginRequest, AuthStatusResponse, IssuedToken, MagicLinkRedeemRequest,
        MagicLinkRequest, RegisterRequest, SuccessResponse, User, UserLoginRequest,
        UserResponse, UserSessionResponse,
    },
    password::PasswordHandler,
    user::{UserAuthError, UserGate, UserSession},
    user_store::UserStore,
};
use crate::config::AppConfig;
use crate::email::{greeting_name, sender_from_config, EmailSender, EmailTemplate};
use anyhow::{Context, Result};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub config: Arc<AppConfig>,
    pub jwt_handler: Arc<JwtHandler>,
    pub admin_gate: Arc<AdminGate>,
    pub user_gate: Arc<UserGate>,
    pub user_store: Arc<UserStore>,
    pub mailer: Arc<dyn EmailSender>,
}

impl AuthState {
    pub fn new(
        config: Arc<AppConfig>,
        user_store: Arc<UserStore>,
        passwords: Arc<PasswordHandler>,
        mailer: Arc<dyn EmailSender>,
    ) -> Self {
        let jwt_handler = Arc::new(JwtHandler::new(&config.jwt_secret, config.session_ttl));
        let admin_gate = Arc::new(AdminGate::new(&config.admin_password, jwt_handler.clone()));
        let user_gate = Arc::new(UserGate::new(
            jwt_handler.clone(),
            passwords,
            user_store.clone(),
            config.magic_link_ttl,
        ));

        Self {
            config,
            jwt_handler,
            admin_gate,
            user_gate,
            user_store,
            mailer,
        }
    }

    /// Production wiring: SQLite store at the configured path, default Argon2 cost,
    /// mail transport picked from configuration.
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self> {
        let user_store = Arc::new(
            UserStore::new(&config.db_path)
                .with_context(|| format!("Failed to open user store at {}", config.db_path))?,
        );
        let passwords = Arc::new(PasswordHandler::new()?);
        let mailer = sender_from_config(&config)?;
        Ok(Self::new(config, user_store, passwords, mailer))
    }
}

/// Whether the current request arrived over TLS; drives the cookie `Secure` flag.
#[derive(Debug, Clone, Copy)]
pub struct SecureRequest(pub bool);

#[async_trait]
impl FromRequestParts<AuthState> for SecureRequest {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AuthState,
    ) -> Result<Self, Self::Rejection> {
        Ok(SecureRequest(cookies::request_is_secure(
            &parts.headers,
            &parts.uri,
            state.config.trust_forwarded_proto,
        )))
    }
}

fn with_session(
    jar: CookieJar,
    surface: CookieSurface,
    issued: IssuedToken,
    secure: bool,
) -> CookieJar {
    cookies::set_session_cookie(jar, surface, issued.token, secure, issued.max_age_secs)
}

/// Run CPU-heavy or blocking gate work (Argon2, SQLite) off the async workers.
async fn run_blocking<T, E, F>(work: F) -> Result<T, AuthApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    E: Into<AuthApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| {
            error!("Blocking auth task failed: {}", e);
            AuthApiError::InternalError
        })?
        .map_err(Into::into)
}

// ---------------------------------------------------------------------------
// Admin surface
// ---------------------------------------------------------------------------

/// Admin login - POST /api/admin/login
pub async fn admin_login(
    State(state): State<AuthState>,
    SecureRequest(secure): SecureRequest,
    jar: CookieJar,
    Json(payload): Json<AdminLoginRequest>,
) -> Result<(CookieJar, Json<SuccessResponse>), AuthApiError> {
    let issued = state.admin_gate.login(&payload.password).map_err(|e| match e {
        AdminLoginError::InvalidPassword => AuthApiError::InvalidPassword,
        AdminLoginError::Token(e) => {
            error!("Failed to issue admin token: {}", e);
            AuthApiError::InternalError
        }
    })?;

    info!("Admin logged in");

    Ok((
        with_session(jar, CookieSurface::Admin, issued, secure),
        Json(SuccessResponse { success: true }),
    ))
}

/// Admin logout - POST /api/admin/logout
pub async fn admin_logout(jar: CookieJar) -> (CookieJar, Json<SuccessResponse>) {
    (
        cookies::clear_session_cookie(jar, CookieSurface::Admin),
        Json(SuccessResponse { success: true }),
    )
}

/// Admin session check - GET /api/admin/check
pub async fn admin_check(State(state): State<AuthState>, jar: CookieJar) -> Json<AuthStatusResponse> {
    Json(AuthStatusResponse {
        authenticated: state.admin_gate.is_authenticated(&jar),
        user: None,
    })
}

/// List all users - GET /api/admin/users (behind require_admin)
pub async fn list_users(
    State(state): State<AuthState>,
) -> Result<Json<Vec<UserResponse>>, AuthApiError> {
    let store = state.user_store.clone();
    let users = run_blocking(move || store.list_users().context("Failed to list users")).await?;

    Ok(Json(users.iter().map(UserResponse::from_user).collect()))
}

/// Delete user - DELETE /api/admin/users/:id (behind require_admin)
pub async fn delete_user(
    State(state): State<AuthState>,
    Path(user_id): Path<i64>,
) -> Result<StatusCode, AuthApiError> {
    let store = state.user_store.clone();
    let deleted = run_blocking(move || {
        store
            .delete_user(user_id)
            .with_context(|| format!("Failed to delete user {}", user_id))
    })
    .await?;

    if !deleted {
        return Err(AuthApiError::UserNotFound);
    }

    info!(user_id, "User deleted by admin");
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// User surface
// ---------------------------------------------------------------------------

/// Password login - POST /api/user/login
pub async fn user_login(
    State(state): State<AuthState>,
    SecureRequest(secure): SecureRequest,
    jar: CookieJar,
    Json(payload): Json<UserLoginRequest>,
) -> Result<(CookieJar, Json<UserSessionResponse>), AuthApiError> {
    let gate = state.user_gate.clone();
    let session = run_blocking(move || {
        gate.login_with_password(&payload.email, &payload.password)
    })
    .await?;

    Ok(session_response(jar, session, secure))
}

fn session_response(
    jar: CookieJar,
    session: UserSession,
    secure: bool,
) -> (CookieJar, Json<UserSessionResponse>) {
    let UserSession { user, token } = session;
    (
        with_session(jar, CookieSurface::User, token, secure),
        Json(UserSessionResponse {
            success: true,
            user: UserResponse::from_user(&user),
        }),
    )
}

/// Registration - POST /api/user/register
pub async fn user_register(
    State(state): State<AuthState>,
    SecureRequest(secure): SecureRequest,
    jar: CookieJar,
    Json(payload): Json<RegisterRequest>,
) -> Result<(CookieJar, Json<UserSessionResponse>), AuthApiError> {
    let gate = state.user_gate.clone();
    let session = run_blocking(move || {
        gate.register(
            &payload.email,
            payload.password.as_deref(),
            payload.name.as_deref(),
        )
    })
    .await?;

    info!(user_id = session.user.id, "User registered");

    let welcome = EmailTemplate::Welcome {
        name: greeting_name(session.user.name.as_deref(), &session.user.email),
        site_url: state.config.base_url.clone(),
    }
    .render(&session.user.email);
    if let Err(e) = state.mailer.send(&welcome).await {
        warn!(user_id = session.user.id, "Welcome email not sent: {:#}", e);
    }

    Ok(session_response(jar, session, secure))
}

/// Request a login link - POST /api/user/send-magic-link
///
/// Lookup, persistence and delivery run in the background, so known and
/// unknown emails get the same answer in the same time.
pub async fn send_magic_link(
    State(state): State<AuthState>,
    Json(payload): Json<MagicLinkRequest>,
) -> Result<Json<SuccessResponse>, AuthApiError> {
    if payload.email.trim().is_empty() {
        return Err(AuthApiError::EmailRequired);
    }

    tokio::spawn(deliver_magic_link(state, payload.email));

    Ok(Json(SuccessResponse { success: true }))
}

async fn deliver_magic_link(state: AuthState, email: String) {
    let gate = state.user_gate.clone();
    let created = match run_blocking(move || gate.create_magic_link(&email)).await {
        Ok(created) => created,
        Err(e) => {
            warn!("Magic link not created: {:?}", e);
            return;
        }
    };

    // Unknown emails: nothing is sent.
    let Some((user, link)) = created else {
        return;
    };

    let message = EmailTemplate::MagicLink {
        name: greeting_name(user.name.as_deref(), &user.email),
        url: magic_link::link_url(&state.config.base_url, &link.token),
        ttl_minutes: state.user_gate.magic_link_ttl().num_minutes(),
    }
    .render(&user.email);

    if let Err(e) = state.mailer.send(&message).await {
        error!(user_id = user.id, "Failed to send magic link: {:#}", e);
    }
}

/// Redeem a login link - POST /api/user/verify-magic-link
pub async fn verify_magic_link_post(
    State(state): State<AuthState>,
    SecureRequest(secure): SecureRequest,
    jar: CookieJar,
    Json(payload): Json<MagicLinkRedeemRequest>,
) -> Result<(CookieJar, Json<UserSessionResponse>), AuthApiError> {
    let gate = state.user_gate.clone();
    let session = run_blocking(move || gate.redeem_magic_link(&payload.token)).await?;

    Ok(session_response(jar, session, secure))
}

#[derive(Debug, Deserialize)]
pub struct MagicLinkQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Redeem a login link from the emailed URL - GET /api/user/verify-magic-link?token=
pub async fn verify_magic_link_get(
    State(state): State<AuthState>,
    SecureRequest(secure): SecureRequest,
    jar: CookieJar,
    Query(query): Query<MagicLinkQuery>,
) -> Response {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return Redirect::to("/?login=invalid").into_response();
    };

    let gate = state.user_gate.clone();
    match run_blocking(move || gate.redeem_magic_link(&token)).await {
        Ok(session) => {
            let jar = with_session(jar, CookieSurface::User, session.token, secure);
            (jar, Redirect::to("/")).into_response()
        }
        Err(_) => Redirect::to("/?login=invalid").into_response(),
    }
}

/// User logout - POST /api/user/logout
pub async fn user_logout(jar: CookieJar) -> (CookieJar, Json<SuccessResponse>) {
    (
        cookies::clear_session_cookie(jar, CookieSurface::User),
        Json(SuccessResponse { success: true }),
    )
}

/// Session status - GET /api/user/me
pub async fn user_me(
    State(state): State<AuthState>,
    jar: CookieJar,
) -> Result<Json<AuthStatusResponse>, AuthApiError> {
    let Some(user_id) = state.user_gate.current_user_id(&jar) else {
        return Ok(Json(AuthStatusResponse {
            authenticated: false,
            user: None,
        }));
    };

    // A token can outlive its account.
    let user = load_user(&state, user_id).await?;

    Ok(Json(AuthStatusResponse {
        authenticated: user.is_some(),
        user: user.as_ref().map(UserResponse::from_user),
    }))
}

/// Profile of the logged-in user - GET /api/user/profile (behind require_user_auth)
pub async fn user_profile(
    State(state): State<AuthState>,
    current: CurrentUser,
) -> Result<Json<UserResponse>, AuthApiError> {
    let user = load_user(&state, current.user_id)
        .await?
        .ok_or(AuthApiError::UserNotFound)?;

    Ok(Json(UserResponse::from_user(&user)))
}

async fn load_user(state: &AuthState, user_id: i64) -> Result<Option<User>, AuthApiError> {
    let store = state.user_store.clone();
    run_blocking(move || {
        store
            .get_user_by_id(user_id)
            .with_context(|| format!("Failed to load user {}", user_id))
    })
    .await
}

/// Auth API errors
#[derive(Debug)]
pub enum AuthApiError {
    InvalidPassword,
    InvalidCredentials,
    InvalidLink,
    EmailRequired,
    InvalidEmail,
    WeakPassword,
    EmailTaken,
    UserNotFound,
    InternalError,
}

impl From<UserAuthError> for AuthApiError {
    fn from(e: UserAuthError) -> Self {
        match e {
            UserAuthError::InvalidCredentials => AuthApiError::InvalidCredentials,
            UserAuthError::InvalidLink => AuthApiError::InvalidLink,
            UserAuthError::InvalidEmail => AuthApiError::InvalidEmail,
            UserAuthError::WeakPassword => AuthApiError::WeakPassword,
            UserAuthError::EmailTaken => AuthApiError::EmailTaken,
            UserAuthError::Internal(e) => AuthApiError::from(e),
        }
    }
}

impl From<anyhow::Error> for AuthApiError {
    fn from(e: anyhow::Error) -> Self {
        error!("Auth request failed: {:#}", e);
        AuthApiError::InternalError
    }
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthApiError::InvalidPassword => (StatusCode::UNAUTHORIZED, "Invalid password"),
            AuthApiError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid email or password")
            }
            AuthApiError::InvalidLink => (StatusCode::BAD_REQUEST, "Link invalid or expired"),
            AuthApiError::EmailRequired => (StatusCode::BAD_REQUEST, "Email is required"),
            AuthApiError::InvalidEmail => (StatusCode::BAD_REQUEST, "Invalid email address"),
            AuthApiError::WeakPassword => (
                StatusCode::BAD_REQUEST,
                "Password must be at least 6 characters",
            ),
            AuthApiError::EmailTaken => (StatusCode::CONFLICT, "Email already registered"),
            AuthApiError::UserNotFound => (StatusCode::NOT_FOUND, "User not found"),
            AuthApiError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        (
            status,
            Json(json!({
                "success": false,
                "error": message,
            })),
        )
            .into_response()
    }
}
