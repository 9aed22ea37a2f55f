//! Library authentication backend
//!
//! Admin and registered-user authentication for the library site: password
//! hashing, signed session tokens, magic links, session cookies and the HTTP
//! surface that ties them together.

pub mod auth;
pub mod config;
pub mod email;
pub mod middleware;
pub mod routes;

pub use config::AppConfig;
pub use routes::build_router;
