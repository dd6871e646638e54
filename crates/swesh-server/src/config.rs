//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use swesh_core::constants::{DAILY_PROPOSAL_LIMIT, DEFAULT_HTTP_PORT, PROPOSAL_EXPIRY_DAYS};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Explicit SQLite database file path.  When unset, the store picks
    /// the platform-appropriate data directory.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Swesh"`
    pub instance_name: String,

    /// Proposals a user may submit per UTC day.
    /// Env: `DAILY_PROPOSAL_LIMIT`
    /// Default: `50`
    pub daily_proposal_limit: u32,

    /// Pending proposals older than this many days are swept to expired.
    /// Env: `PROPOSAL_EXPIRY_DAYS`
    /// Default: `30`
    pub proposal_expiry_days: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            instance_name: "Swesh".to_string(),
            daily_proposal_limit: DAILY_PROPOSAL_LIMIT,
            proposal_expiry_days: PROPOSAL_EXPIRY_DAYS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            if !name.is_empty() {
                config.instance_name = name;
            }
        }

        if let Ok(val) = std::env::var("DAILY_PROPOSAL_LIMIT") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.daily_proposal_limit = n,
                _ => {
                    tracing::warn!(value = %val, "Invalid DAILY_PROPOSAL_LIMIT, using default");
                }
            }
        }

        if let Ok(val) = std::env::var("PROPOSAL_EXPIRY_DAYS") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 => config.proposal_expiry_days = n,
                _ => {
                    tracing::warn!(value = %val, "Invalid PROPOSAL_EXPIRY_DAYS, using default");
                }
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
