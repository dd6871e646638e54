//! # swesh-server
//!
//! Backend for the Swesh clothing-swap application.
//!
//! This binary provides:
//! - **REST API** (axum) for listing items, swiping, proposing trades,
//!   chatting, and the two-party exchange confirmation handshake
//! - **Realtime fan-out** over SSE: user-scoped rooms for out-of-band
//!   notifications and chat-scoped rooms for in-conversation events
//! - **SQLite persistence** via `swesh-store`, where every lifecycle
//!   mutation is a single transaction
//! - **Per-client rate limiting** plus the per-user daily proposal ceiling

mod api;
mod config;
mod error;
mod notifier;
mod rate_limit;
mod swap;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swesh_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::notifier::RealtimeHub;
use crate::rate_limit::RequestLimiter;
use crate::swap::SwapService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,swesh_server=debug")),
        )
        .init();

    info!("Starting Swesh server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Database (platform data dir unless DATABASE_PATH is set).
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let db = Arc::new(Mutex::new(db));

    // Realtime hub for SSE fan-out.
    let hub = Arc::new(RealtimeHub::default());

    // Request limiter: 10 req/s sustained, burst of 30, per user or IP.
    let rate_limiter = RequestLimiter::default();

    // Lifecycle orchestration with the hub as its notifier.
    let swap = Arc::new(SwapService::new(
        db,
        hub.clone(),
        config.daily_proposal_limit,
    ));

    let app_state = AppState {
        swap: swap.clone(),
        hub: hub.clone(),
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic request-limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // Periodic realtime-room cleanup (every 5 minutes)
    let hub_cleanup = hub.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            hub_cleanup.purge_empty();
        }
    });

    // Hourly sweep of stale pending proposals.
    let sweeper = swap.clone();
    let expiry_days = config.proposal_expiry_days;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.expire_stale_proposals(expiry_days).await {
                tracing::error!(error = %e, "proposal expiry sweep failed");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the HTTP server or a shutdown
    // signal arrives, we exit cleanly.
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
