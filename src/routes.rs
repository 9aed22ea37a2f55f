//! HTTP Router
//! Mission: Wire the admin and user auth surfaces, their gates and the request middleware

use crate::auth::api::{self as auth_api, AuthState};
use crate::auth::middleware::{require_admin, require_user_auth};
use crate::middleware::{rate_limit_middleware, request_logging, RateLimitLayer};
use axum::{
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Build the full application router.
///
/// Credential endpoints sit behind the per-IP limiter; admin and user
/// resources behind their respective gates.
pub fn build_router(state: AuthState, limiter: RateLimitLayer) -> Router {
    let credential_routes = Router::new()
        .route("/api/admin/login", post(auth_api::admin_login))
        .route("/api/user/login", post(auth_api::user_login))
        .route("/api/user/register", post(auth_api::user_register))
        .route("/api/user/send-magic-link", post(auth_api::send_magic_link))
        .route(
            "/api/user/verify-magic-link",
            get(auth_api::verify_magic_link_get).post(auth_api::verify_magic_link_post),
        )
        .route_layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ));

    let admin_routes = Router::new()
        .route("/api/admin/users", get(auth_api::list_users))
        .route("/api/admin/users/:id", delete(auth_api::delete_user))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let user_routes = Router::new()
        .route("/api/user/profile", get(auth_api::user_profile))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_user_auth,
        ));

    let session_routes = Router::new()
        .route("/api/admin/logout", post(auth_api::admin_logout))
        .route("/api/admin/check", get(auth_api::admin_check))
        .route("/api/user/logout", post(auth_api::user_logout))
        .route("/api/user/me", get(auth_api::user_me));

    Router::new()
        .route("/health", get(health_check))
        .merge(credential_routes)
        .merge(admin_routes)
        .merge(user_routes)
        .merge(session_routes)
        .with_state(state)
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
}
