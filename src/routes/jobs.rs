use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{ApiError, api_error, parse_network, parse_token};
use crate::AppState;
use crate::services::backfill::{BackfillJob, DEFAULT_PRIORITY};
use crate::services::{Network, TokenAddress};

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub token: String,
    pub network: String,
    pub priority: Option<u8>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
    pub message: &'static str,
    pub job_id: Uuid,
    pub token: TokenAddress,
    pub network: Network,
}

pub async fn schedule_backfill(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        log::debug!("Rejected schedule request: {}", e);
        api_error(
            StatusCode::BAD_REQUEST,
            "Invalid request body",
            "invalid_request",
        )
    })?;

    let token = parse_token(&request.token)?;
    let network = parse_network(&request.network)?;
    let priority = request.priority.unwrap_or(DEFAULT_PRIORITY);

    match state.backfill.enqueue(token.clone(), network, priority) {
        Ok(handle) => Ok(Json(ScheduleResponse {
            message: "History fetch scheduled successfully",
            job_id: handle.id,
            token,
            network,
        })),
        Err(e) => {
            log::warn!("Refused to schedule backfill for {}: {}", token, e);
            Err(api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Backfill queue is not accepting jobs",
                "queue_closed",
            ))
        }
    }
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<BackfillJob>, ApiError> {
    state
        .backfill
        .get(id)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Job not found", "job_not_found"))
}

pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<BackfillJob>> {
    Json(state.backfill.list())
}
