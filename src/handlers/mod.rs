// src/handlers/mod.rs
pub mod driver_handler;
pub mod request_handler;
pub mod ws_handler;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    errors::{MarketplaceError, MarketplaceResult},
    state::AppState,
};

pub fn build_router(state: Arc<AppState>) -> MarketplaceResult<Router> {
    let cors = cors_layer(state.config.cors_origin.as_deref())?;

    let router = Router::new()
        .route("/ws", get(ws_handler::websocket_handler))
        .route("/health", get(request_handler::health))
        .route("/requests", get(request_handler::list_requests))
        .route("/requests/:id/accept", post(request_handler::accept_request))
        .route("/metrics", get(request_handler::dashboard_metrics))
        .route("/drivers", get(driver_handler::list_drivers))
        .route(
            "/drivers/:id/metrics",
            get(driver_handler::get_metrics).post(driver_handler::initialize_metrics),
        )
        .route("/drivers/:id/score", get(driver_handler::get_score))
        .route("/drivers/:id/history", get(driver_handler::get_history))
        .route("/drivers/:id/completions", post(driver_handler::record_completion))
        .route("/drivers/:id/ratings", post(driver_handler::record_rating))
        .route("/drivers/:id/cancellations", post(driver_handler::record_cancellation))
        .route("/drivers/:id/offers", post(driver_handler::record_offer_response))
        .layer(cors)
        .with_state(state);

    Ok(router)
}

// Permissive unless a single allowed origin is configured
fn cors_layer(origin: Option<&str>) -> MarketplaceResult<CorsLayer> {
    match origin {
        None => Ok(CorsLayer::permissive()),
        Some(origin) => {
            let origin = origin.parse::<HeaderValue>().map_err(|e| {
                MarketplaceError::InvalidConfiguration(format!("CORS_ORIGIN {:?}: {}", origin, e))
            })?;
            Ok(CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any))
        }
    }
}
