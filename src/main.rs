//! Library Auth Server
//! Mission: Serve admin and user authentication for the library site

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use library_auth::auth::{
    models::normalize_email, AuthState, PasswordHandler, UserStore,
};
use library_auth::config::{AppConfig, DEFAULT_DB_FILENAME};
use library_auth::middleware::{RateLimitConfig, RateLimitLayer};
use library_auth::routes::build_router;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::interval;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const RATE_LIMIT_CLEANUP_SECS: u64 = 300;
const MAGIC_LINK_PURGE_SECS: u64 = 3600;

#[derive(Parser, Debug)]
#[command(name = "library-auth")]
#[command(about = "Admin and user authentication service for the library site")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,

    /// Create a user account directly in the store
    CreateUser {
        #[arg(long)]
        email: String,

        /// Omit for a passwordless (magic-link only) account
        #[arg(long, env = "NEW_USER_PASSWORD")]
        password: Option<String>,

        #[arg(long)]
        name: Option<String>,

        #[arg(long, env = "AUTH_DB_PATH", default_value = DEFAULT_DB_FILENAME)]
        db: String,
    },

    /// Delete expired and redeemed magic links
    PurgeMagicLinks {
        #[arg(long, env = "AUTH_DB_PATH", default_value = DEFAULT_DB_FILENAME)]
        db: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::CreateUser {
            email,
            password,
            name,
            db,
        } => create_user(&db, &email, password.as_deref(), name.as_deref()),
        Command::PurgeMagicLinks { db } => {
            let store = UserStore::new(&db)?;
            let purged = store.purge_expired_magic_links(Utc::now())?;
            info!(purged, "Magic links purged");
            Ok(())
        }
    }
}

async fn serve() -> Result<()> {
    let config = Arc::new(AppConfig::from_env().context("Invalid configuration")?);
    info!(?config, "Configuration loaded");

    let state = AuthState::from_config(config.clone())?;
    let limiter = RateLimitLayer::new(RateLimitConfig::from_app_config(&config));

    spawn_rate_limit_cleanup(limiter.clone());
    spawn_magic_link_purge(state.user_store.clone());

    let app = build_router(state, limiter);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("API server listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

fn create_user(db: &str, email: &str, password: Option<&str>, name: Option<&str>) -> Result<()> {
    let store = UserStore::new(db)?;
    let password_hash = match password.filter(|p| !p.is_empty()) {
        Some(p) => Some(PasswordHandler::new()?.hash(p)?),
        None => None,
    };

    let user = store
        .create_user(&normalize_email(email), password_hash.as_deref(), name)
        .map_err(|e| anyhow::anyhow!("Failed to create user: {}", e))?;

    info!(user_id = user.id, email = %user.email, "User created");
    Ok(())
}

fn spawn_rate_limit_cleanup(limiter: RateLimitLayer) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            ticker.tick().await;
            limiter.cleanup();
        }
    });
}

fn spawn_magic_link_purge(store: Arc<UserStore>) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(MAGIC_LINK_PURGE_SECS));
        loop {
            ticker.tick().await;
            let store = store.clone();
            match tokio::task::spawn_blocking(move || store.purge_expired_magic_links(Utc::now()))
                .await
            {
                Ok(Ok(0)) => {}
                Ok(Ok(purged)) => info!(purged, "Purged stale magic links"),
                Ok(Err(e)) => warn!("Magic link purge failed: {:#}", e),
                Err(e) => error!("Magic link purge task panicked: {}", e),
            }
        }
    });
}

/// Initialize tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "library_auth=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // 1) Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // 2) Also try the crate root .env when launched from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
