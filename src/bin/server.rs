//! Amity sync server.
//!
//! Runs the scheduled sweep, the sync worker pool, and the HTTP surface for
//! triggering syncs and reading their status.
//!
//! # Configuration
//!
//! Environment variables:
//! - `AMITY_PORT`: Port to listen on (default: 8080)
//! - `AMITY_DATABASE_PATH`: SQLite database path (default: ~/.local/share/amity/amity.db)
//! - `AMITY_CONFIG`: Path to config file (default: ~/.config/amity-server/config.yaml)
//! - `AMITY_GIT_WORK_DIR`: Directory for git working clones (default: ~/.local/share/amity/git-work)
//! - `AMITY_SWEEP_INTERVAL`: Seconds between due-account sweeps (default: 60)
//! - `AMITY_SYNC_WORKERS`: Concurrent sync jobs (default: 4)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     vault_id: "6a2f1bc4-52a2-4c5e-8d1c-3f4d5e6a7b8c"
//! ```
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `POST /sync/dav/accounts/{id}/trigger`: Queue a DAV sync run
//! - `GET /sync/dav/accounts/{id}/status`: Last run status + mapping counts
//! - `POST /sync/git/trigger`: Queue a git sync run
//! - `GET /sync/git/status`: Last run status + mapping counts

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use amity::db::init_db;
use amity::server::{build_router, ApiKeyStore, AppState};
use amity::sync::{sync_queue, LocalLock, Scheduler};

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    port: u16,
    database_path: PathBuf,
    config_path: PathBuf,
    git_work_dir: PathBuf,
    sweep_interval: Duration,
    workers: usize,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("AMITY_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("amity");

        let database_path = std::env::var("AMITY_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("amity.db"));

        let config_path = std::env::var("AMITY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("amity-server")
                    .join("config.yaml")
            });

        let git_work_dir = std::env::var("AMITY_GIT_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("git-work"));

        let sweep_interval = std::env::var("AMITY_SWEEP_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60));

        let workers = std::env::var("AMITY_SYNC_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4);

        Self {
            port,
            database_path,
            config_path,
            git_work_dir,
            sweep_interval,
            workers,
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "amity_server=info,amity=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    tracing::info!("Database: {}", config.database_path.display());
    tracing::info!("Config file: {}", config.config_path.display());
    tracing::info!("Git work dir: {}", config.git_work_dir.display());

    let pool = match init_db(Some(config.database_path.clone())).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let api_keys = Arc::new(ApiKeyStore::load(&config.config_path));

    // Job queue + worker pool + periodic sweep
    let (queue, receiver) = sync_queue();
    let scheduler = Arc::new(Scheduler::new(
        pool.clone(),
        Arc::new(LocalLock::new()),
        config.git_work_dir.clone(),
    ));

    let workers = Arc::clone(&scheduler);
    let worker_count = config.workers;
    tokio::spawn(async move {
        workers.run_workers(receiver, worker_count).await;
    });

    let sweeper = Arc::clone(&scheduler);
    let sweep_queue = queue.clone();
    let sweep_interval = config.sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            match sweeper.sweep(&sweep_queue).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Sweep queued {} sync job(s)", n),
                Err(e) => tracing::error!("Sweep failed: {}", e),
            }
        }
    });

    let state = AppState {
        pool,
        queue,
        api_keys,
    };
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
