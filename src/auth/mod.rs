//! Authentication Module
//! Mission: Admin and user sessions backed by signed tokens in HttpOnly cookies

pub mod admin;
pub mod api;
pub mod cookies;
pub mod jwt;
pub mod magic_link;
pub mod middleware;
pub mod models;
pub mod password;
pub mod user;
pub mod user_store;

pub use admin::AdminGate;
pub use api::AuthState;
pub use jwt::JwtHandler;
pub use middleware::{require_admin, require_user_auth, CurrentUser};
pub use password::PasswordHandler;
pub use user::UserGate;
pub use user_store::UserStore;
