//! HTTP server for daemon status monitoring.
//!
//! Provides endpoints for:
//! - Per-status record counts
//! - The currently active work queue
//! - Health check

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::store::{MetadataRecord, MetadataStore};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub service: String,
    pub status: String,
    pub counts: StatusCountsResponse,
    pub active_records: Vec<ActiveRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusCountsResponse {
    pub pending: u64,
    pub converted: u64,
    pub merged: u64,
    pub completed: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveRecord {
    pub id: i64,
    pub network: String,
    pub station: String,
    pub status: String,
    pub retry_count: u32,
    pub created: String,
    pub updated: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordsResponse {
    pub records: Vec<ActiveRecord>,
}

// ============================================================================
// Shared State
// ============================================================================

pub struct ServerState {
    pub store: Arc<MetadataStore>,
}

// ============================================================================
// Router
// ============================================================================

/// Create the status API router.
pub fn create_router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/status", get(status_handler))
        .route("/records", get(records_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(Extension(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /status - Overall daemon status
async fn status_handler(Extension(state): Extension<Arc<ServerState>>) -> impl IntoResponse {
    let store = &state.store;

    let counts = match store.status_counts().await {
        Ok(c) => StatusCountsResponse {
            pending: c.pending,
            converted: c.converted,
            merged: c.merged,
            completed: c.completed,
            rejected: c.rejected,
        },
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let active_records = store
        .find_active_snapshot()
        .await
        .map(|records| records.into_iter().map(record_to_active).collect())
        .unwrap_or_default();

    let response = StatusResponse {
        service: "metadaemon".to_string(),
        status: if counts.pending + counts.converted + counts.merged > 0 {
            "processing".to_string()
        } else {
            "idle".to_string()
        },
        counts,
        active_records,
    };

    Json(response).into_response()
}

/// GET /records - The currently active work queue
async fn records_handler(Extension(state): Extension<Arc<ServerState>>) -> impl IntoResponse {
    match state.store.find_active_snapshot().await {
        Ok(records) => Json(RecordsResponse {
            records: records.into_iter().map(record_to_active).collect(),
        })
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// GET /health - Health check endpoint
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "metadaemon"
    }))
}

// ============================================================================
// Helpers
// ============================================================================

fn record_to_active(r: MetadataRecord) -> ActiveRecord {
    ActiveRecord {
        id: r.id,
        network: r.key.network,
        station: r.key.station,
        status: r.status.as_str().to_string(),
        retry_count: r.retry_count,
        created: r.created.to_rfc3339(),
        updated: r.updated.to_rfc3339(),
    }
}

/// Start the HTTP server.
pub async fn run_server(state: Arc<ServerState>, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    info!(port = port, "Starting daemon status server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
