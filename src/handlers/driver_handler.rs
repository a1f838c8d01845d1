// src/handlers/driver_handler.rs
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::{
    errors::MarketplaceResult,
    models::{
        driver::Driver,
        metrics::{DriverMetrics, DriverScorecard, TripCompletion, DEFAULT_HISTORY_LIMIT},
    },
    services::{
        driver_metrics_service::DriverMetricsOperations,
        marketplace_service::MarketplaceOperations,
    },
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RatingPayload {
    pub rating: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferResponsePayload {
    pub accepted: bool,
    pub response_seconds: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingResponse {
    pub driver_id: String,
    pub average_rating: f64,
}

pub async fn list_drivers(State(state): State<Arc<AppState>>) -> MarketplaceResult<Json<Vec<Driver>>> {
    Ok(Json(state.marketplace.get_all_drivers().await?))
}

/// 201 when the record was created, 200 when it already existed.
pub async fn initialize_metrics(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
) -> MarketplaceResult<(StatusCode, Json<Value>)> {
    let created = state.metrics_service.initialize_driver_metrics(&driver_id).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(json!({ "driverId": driver_id, "created": created }))))
}

pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
) -> MarketplaceResult<Json<DriverMetrics>> {
    Ok(Json(state.metrics_service.get_driver_metrics(&driver_id).await?))
}

pub async fn get_score(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
) -> MarketplaceResult<Json<DriverScorecard>> {
    Ok(Json(state.metrics_service.get_driver_scorecard(&driver_id).await?))
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> MarketplaceResult<Json<Vec<TripCompletion>>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(state.metrics_service.get_driver_history(&driver_id, limit).await?))
}

pub async fn record_completion(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
    Json(completion): Json<TripCompletion>,
) -> MarketplaceResult<Json<DriverMetrics>> {
    Ok(Json(state.metrics_service.record_trip_completion(&driver_id, completion).await?))
}

pub async fn record_rating(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
    Json(payload): Json<RatingPayload>,
) -> MarketplaceResult<Json<RatingResponse>> {
    let average_rating = state.metrics_service.update_driver_rating(&driver_id, payload.rating).await?;
    Ok(Json(RatingResponse { driver_id, average_rating }))
}

pub async fn record_cancellation(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
) -> MarketplaceResult<Json<DriverMetrics>> {
    Ok(Json(state.metrics_service.record_trip_cancellation(&driver_id).await?))
}

pub async fn record_offer_response(
    State(state): State<Arc<AppState>>,
    Path(driver_id): Path<String>,
    Json(payload): Json<OfferResponsePayload>,
) -> MarketplaceResult<Json<DriverMetrics>> {
    let metrics = state
        .metrics_service
        .record_offer_response(&driver_id, payload.accepted, payload.response_seconds)
        .await?;
    Ok(Json(metrics))
}
