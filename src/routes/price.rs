use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection, rejection::QueryRejection},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use super::{ApiError, api_error, parse_network, parse_token};
use crate::AppState;
use crate::services::{PriceQuery, PriceResult, PriceSample, ResolveError};

#[derive(Debug, Deserialize)]
pub struct PriceRequest {
    pub token: String,
    pub network: String,
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
pub struct PriceHistoryQuery {
    pub token: String,
    pub network: String,
    pub start: i64,
    pub end: i64,
}

pub async fn resolve_price(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PriceRequest>, JsonRejection>,
) -> Result<Json<PriceResult>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        log::debug!("Rejected price request: {}", e);
        api_error(
            StatusCode::BAD_REQUEST,
            "Invalid request body",
            "invalid_request",
        )
    })?;

    if request.timestamp < 0 || DateTime::<Utc>::from_timestamp(request.timestamp, 0).is_none() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Timestamp must be a non-negative unix timestamp within the supported range",
            "invalid_timestamp",
        ));
    }

    let query = PriceQuery {
        token: parse_token(&request.token)?,
        network: parse_network(&request.network)?,
        timestamp: request.timestamp,
    };

    match state.resolver.resolve(&query).await {
        Ok(result) => Ok(Json(result)),
        Err(ResolveError::NoPriceData) => Err(api_error(
            StatusCode::NOT_FOUND,
            "No price data available",
            ResolveError::NoPriceData.reason_code(),
        )),
        Err(e) => {
            log::error!(
                "Failed to resolve price for {} on {} at {}: {}",
                query.token,
                query.network,
                query.timestamp,
                e
            );
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to resolve price",
                e.reason_code(),
            ))
        }
    }
}

pub async fn get_price_history(
    State(state): State<Arc<AppState>>,
    params: Result<Query<PriceHistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<PriceSample>>, ApiError> {
    let Query(params) = params.map_err(|e| {
        log::debug!("Rejected price history query: {}", e);
        api_error(
            StatusCode::BAD_REQUEST,
            "token, network, start and end are required",
            "invalid_request",
        )
    })?;

    if params.start > params.end {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "start must not be after end",
            "invalid_range",
        ));
    }

    let token = parse_token(&params.token)?;
    let network = parse_network(&params.network)?;

    match state
        .store
        .range(&token, network, params.start, params.end)
        .await
    {
        Ok(samples) => Ok(Json(samples)),
        Err(e) => {
            log::error!("Failed to fetch price history for {}: {}", token, e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to fetch price history",
                "store_unavailable",
            ))
        }
    }
}
