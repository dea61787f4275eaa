//! # tandem-server
//!
//! Real-time chat server between users and a single admin.
//!
//! This binary provides:
//! - **Delivery protocol engine** mediating message send, delivery/read
//!   receipts, presence, typing and unread counters
//! - **WebSocket event channel** at `/ws`, routed through per-identity rooms
//! - **REST API** (axum) for login, paginated history, the user directory,
//!   unread counters and media upload
//! - **Per-sender and per-IP rate limiting**

mod api;
mod config;
mod db;
mod engine;
mod error;
mod hub;
mod media_store;
mod rate_limit;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use tandem_store::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::db::SharedDb;
use crate::engine::Engine;
use crate::hub::Hub;
use crate::media_store::MediaStore;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tandem_server=debug")),
        )
        .init();

    info!("Starting tandem server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store and seed the admin identity
    // -----------------------------------------------------------------------
    let database = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    info!(path = ?database.path(), "Database opened");

    let (admin, created) = database.get_or_create_user(&config.admin_name, &config.admin_email)?;
    info!(email = %admin.email, created, "Admin identity ready");

    let db = SharedDb::new(database);

    // -----------------------------------------------------------------------
    // 4. Initialize subsystems
    // -----------------------------------------------------------------------
    let media = Arc::new(
        MediaStore::new(
            config.upload_dir.clone(),
            config.public_url.clone(),
            config.max_upload_bytes,
        )
        .await?,
    );

    let send_limiter = RateLimiter::new(config.send_rate_limit, config.send_rate_window);
    let http_limiter = RateLimiter::new(config.http_rate_limit, Duration::from_secs(60));

    let engine = Engine::new(db, Hub::new(), send_limiter.clone());

    let app_state = AppState {
        engine,
        media,
        http_limiter: http_limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 5. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict idle windows)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let purged = send_limiter.purge_stale().await + http_limiter.purge_stale().await;
            if purged > 0 {
                tracing::debug!(purged, "Purged idle rate-limit windows");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 6. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
