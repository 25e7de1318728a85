//! HTTP surface for sync: trigger and status endpoints.
//!
//! The CRUD API for contacts and friends lives elsewhere; this server only
//! exposes what operators and clients need to drive synchronization —
//! "sync now" and "how did the last run go". Requests authenticate with a
//! Bearer API key mapped to a vault.

use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::db::{DavAccountRepository, GitConfigRepository, MappingRepository};
use crate::models::SyncStatus;
use crate::sync::{SyncJob, SyncQueue};

// ============================================================================
// Authentication
// ============================================================================

/// API key entry in config
#[derive(Debug, Clone, Deserialize)]
struct ApiKeyEntry {
    key: String,
    vault_id: Uuid,
}

/// Config file structure
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    api_keys: Vec<ApiKeyEntry>,
}

/// Authenticated vault info, added to request extensions after auth
#[derive(Debug, Clone, Copy)]
pub struct AuthVault {
    pub vault_id: Uuid,
}

/// API key store - maps key -> vault
#[derive(Debug, Clone, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, Uuid>,
}

impl ApiKeyStore {
    /// Load API keys from config file
    pub fn load(config_path: &PathBuf) -> Self {
        let keys = match std::fs::read_to_string(config_path) {
            Ok(contents) => match serde_yaml::from_str::<ConfigFile>(&contents) {
                Ok(config) => {
                    let mut map = HashMap::new();
                    for entry in config.api_keys {
                        map.insert(entry.key, entry.vault_id);
                    }
                    tracing::info!("Loaded {} API key(s)", map.len());
                    map
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config file: {}", e);
                    HashMap::new()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}",
                    config_path.display(),
                    e
                );
                tracing::warn!("No API keys loaded - all authenticated requests will fail");
                HashMap::new()
            }
        };

        Self { keys }
    }

    #[cfg(test)]
    pub fn with_key(key: impl Into<String>, vault_id: Uuid) -> Self {
        let mut keys = HashMap::new();
        keys.insert(key.into(), vault_id);
        Self { keys }
    }

    /// Validate an API key and return the associated vault
    fn validate(&self, key: &str) -> Option<AuthVault> {
        self.keys.get(key).map(|vault_id| AuthVault {
            vault_id: *vault_id,
        })
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub queue: SyncQueue,
    pub api_keys: Arc<ApiKeyStore>,
}

/// Error response body
#[derive(Serialize)]
struct ApiError {
    error: &'static str,
    message: String,
}

fn error_response(status: StatusCode, error: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiError {
            error,
            message: message.into(),
        }),
    )
        .into_response()
}

/// Authentication middleware
async fn auth_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) if h.starts_with("Bearer ") => &h[7..],
        Some(_) => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                "invalid_auth",
                "Authorization header must use Bearer scheme",
            );
        }
        None => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                "missing_auth",
                "Authorization header required",
            );
        }
    };

    match state.api_keys.validate(api_key) {
        Some(vault) => {
            request.extensions_mut().insert(vault);
            next.run(request).await
        }
        None => error_response(StatusCode::UNAUTHORIZED, "invalid_key", "Invalid API key"),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct TriggerResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct StatusResponse {
    last_synced_at: Option<DateTime<Utc>>,
    last_sync_status: Option<SyncStatus>,
    last_sync_error: Option<String>,
    mapping_counts: HashMap<String, i64>,
}

/// Enqueue one sync run for a DAV account, returning immediately.
async fn trigger_dav(
    State(state): State<AppState>,
    Extension(vault): Extension<AuthVault>,
    Path(account_id): Path<Uuid>,
) -> Response {
    let accounts = DavAccountRepository::new(state.pool.clone());
    match accounts.get_by_id(account_id).await {
        Ok(Some(account)) if account.vault_id == vault.vault_id => {
            state.queue.enqueue(SyncJob::DavAccount(account.id));
            (
                StatusCode::ACCEPTED,
                Json(TriggerResponse { status: "queued" }),
            )
                .into_response()
        }
        Ok(_) => error_response(StatusCode::NOT_FOUND, "not_found", "No such account"),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "database_error",
            e.to_string(),
        ),
    }
}

async fn status_dav(
    State(state): State<AppState>,
    Extension(vault): Extension<AuthVault>,
    Path(account_id): Path<Uuid>,
) -> Response {
    let accounts = DavAccountRepository::new(state.pool.clone());
    let account = match accounts.get_by_id(account_id).await {
        Ok(Some(account)) if account.vault_id == vault.vault_id => account,
        Ok(_) => return error_response(StatusCode::NOT_FOUND, "not_found", "No such account"),
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "database_error",
                e.to_string(),
            )
        }
    };

    let mappings = MappingRepository::new(state.pool.clone());
    match mappings.counts_by_kind(account.id).await {
        Ok(counts) => Json(StatusResponse {
            last_synced_at: account.last_synced_at,
            last_sync_status: account.last_sync_status,
            last_sync_error: account.last_sync_error,
            mapping_counts: counts,
        })
        .into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "database_error",
            e.to_string(),
        ),
    }
}

/// Enqueue one sync run for the vault's git config.
async fn trigger_git(
    State(state): State<AppState>,
    Extension(vault): Extension<AuthVault>,
) -> Response {
    let configs = GitConfigRepository::new(state.pool.clone());
    match configs.get_for_vault(vault.vault_id).await {
        Ok(Some(config)) => {
            state.queue.enqueue(SyncJob::GitConfig(config.id));
            (
                StatusCode::ACCEPTED,
                Json(TriggerResponse { status: "queued" }),
            )
                .into_response()
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, "not_found", "No git sync configured"),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "database_error",
            e.to_string(),
        ),
    }
}

async fn status_git(
    State(state): State<AppState>,
    Extension(vault): Extension<AuthVault>,
) -> Response {
    let configs = GitConfigRepository::new(state.pool.clone());
    let config = match configs.get_for_vault(vault.vault_id).await {
        Ok(Some(config)) => config,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, "not_found", "No git sync configured")
        }
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "database_error",
                e.to_string(),
            )
        }
    };

    let mappings = MappingRepository::new(state.pool.clone());
    match mappings.counts_by_kind(config.id).await {
        Ok(counts) => Json(StatusResponse {
            last_synced_at: config.last_synced_at,
            last_sync_status: config.last_sync_status,
            last_sync_error: config.last_sync_error,
            mapping_counts: counts,
        })
        .into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "database_error",
            e.to_string(),
        ),
    }
}

/// Build the full router: public health check plus authenticated sync routes.
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(health));

    let protected_routes = Router::new()
        .route("/sync/dav/accounts/{id}/trigger", post(trigger_dav))
        .route("/sync/dav/accounts/{id}/status", get(status_dav))
        .route("/sync/git/trigger", post(trigger_git))
        .route("/sync/git/status", get(status_git))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
