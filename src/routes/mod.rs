use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::AppState;
use crate::services::{Network, TokenAddress};

mod jobs;
mod price;

pub(crate) type ApiError = (StatusCode, Json<Value>);

/// Error body with a human-readable message and a machine-readable reason
pub(crate) fn api_error(status: StatusCode, message: &str, reason: &str) -> ApiError {
    (
        status,
        Json(json!({
            "error": message,
            "reason": reason
        })),
    )
}

pub(crate) fn parse_token(raw: &str) -> Result<TokenAddress, ApiError> {
    raw.parse().map_err(|e: String| {
        log::debug!("Rejected token {:?}: {}", raw, e);
        api_error(
            StatusCode::BAD_REQUEST,
            "Invalid token address",
            "invalid_token",
        )
    })
}

pub(crate) fn parse_network(raw: &str) -> Result<Network, ApiError> {
    raw.parse().map_err(|e: String| {
        log::debug!("Rejected network {:?}: {}", raw, e);
        api_error(
            StatusCode::BAD_REQUEST,
            "Invalid network",
            "invalid_network",
        )
    })
}

async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    // Test store connection
    if let Err(e) = state.store.ping().await {
        log::error!("Health check failed: {}", e);
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "store": {
                    "connected": false,
                    "error": "Price store connection failed"
                }
            })),
        ));
    }

    let database = state.db_pool.as_ref().map(|pool| {
        json!({
            "pool_size": pool.size(),
            "idle_connections": pool.num_idle()
        })
    });

    Ok(Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "store": {
            "connected": true,
            "database": database
        },
        "source": state.source.source_name(),
        "backfill": {
            "queued": state.backfill.pending_count(),
            "accepting": !state.backfill.is_closed()
        }
    })))
}

pub fn create_routes(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/api/health", get(health_check))
        // Price resolution
        .route("/api/price", post(price::resolve_price))
        .route("/api/price/history", get(price::get_price_history))
        // Backfill jobs
        .route("/api/schedule", post(jobs::schedule_backfill))
        .route("/api/jobs", get(jobs::list_jobs))
        .route("/api/jobs/{id}", get(jobs::get_job))
        .with_state(state)
}
