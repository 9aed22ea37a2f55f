//! Authentication Middleware
//! Mission: Protect admin and user endpoints with session cookie validation

use crate::auth::api::AuthState;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;

/// Authenticated user, inserted into request extensions by `require_user_auth`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub user_id: i64,
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .copied()
            .ok_or(AuthError::UserRequired)
    }
}

/// User gate middleware: valid `user_token` cookie or 401
pub async fn require_user_auth(
    State(state): State<AuthState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user_id = state
        .user_gate
        .current_user_id(&jar)
        .ok_or(AuthError::UserRequired)?;

    req.extensions_mut().insert(CurrentUser { user_id });

    Ok(next.run(req).await)
}

/// Admin gate middleware: valid `admin_token` cookie or 401
pub async fn require_admin(
    State(state): State<AuthState>,
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if !state.admin_gate.is_authenticated(&jar) {
        return Err(AuthError::AdminRequired);
    }

    Ok(next.run(req).await)
}

/// Auth error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    UserRequired,
    AdminRequired,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::UserRequired => "Unauthorized. Please login.",
            AuthError::AdminRequired => "Unauthorized",
        };

        (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
    }
}
