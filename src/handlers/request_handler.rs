// src/handlers/request_handler.rs
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::{
    errors::MarketplaceResult,
    models::request::{DashboardMetrics, TransportRequest},
    services::{assignment_service::AssignmentReceipt, marketplace_service::MarketplaceOperations},
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptPayload {
    pub driver_id: String,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "store": state.store.backend_name(),
        "observers": state.hub.observer_count(),
    }))
}

pub async fn list_requests(State(state): State<Arc<AppState>>) -> MarketplaceResult<Json<Vec<TransportRequest>>> {
    Ok(Json(state.marketplace.get_all_requests().await?))
}

pub async fn dashboard_metrics(State(state): State<Arc<AppState>>) -> MarketplaceResult<Json<DashboardMetrics>> {
    Ok(Json(state.marketplace.get_dashboard_metrics().await?))
}

/// Same transition as the WebSocket `accept_request`; refusals map to 404/409.
pub async fn accept_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
    Json(payload): Json<AcceptPayload>,
) -> MarketplaceResult<Json<AssignmentReceipt>> {
    let receipt = state.assignment_service.accept(&request_id, &payload.driver_id).await?;
    Ok(Json(receipt))
}
