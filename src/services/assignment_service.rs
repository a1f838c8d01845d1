// src/services/assignment_service.rs
use serde::Serialize;
use std::sync::Arc;
use tracing;

use crate::{
    errors::MarketplaceError as AppError,
    models::messages::ServerMessage,
    services::{
        connection_hub::ConnectionHub,
        marketplace_service::{MarketplaceOperations, MarketplaceService},
    },
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentReceipt {
    pub request_id: String,
    pub driver_id: String,
    pub delivered_to: usize, // Observers connected when the event went out
}

/// Drives the `available -> assigned` transition and announces it.
pub struct AssignmentService {
    marketplace: Arc<MarketplaceService>,
    hub: ConnectionHub,
}

impl AssignmentService {
    pub fn new(marketplace: Arc<MarketplaceService>, hub: ConnectionHub) -> Self {
        Self { marketplace, hub }
    }

    /// Assigns `request_id` to `driver_id` and broadcasts `request_assigned`.
    ///
    /// Nothing is written or published when either record is missing or the
    /// request was already taken; the caller decides how to tell the initiator.
    pub async fn accept(&self, request_id: &str, driver_id: &str) -> Result<AssignmentReceipt, AppError> {
        tracing::info!("Driver {} accepting request {}", driver_id, request_id);

        let request = self
            .marketplace
            .get_request(request_id)
            .await?
            .ok_or_else(|| AppError::request_not_found(request_id))?;

        if self.marketplace.get_driver(driver_id).await?.is_none() {
            return Err(AppError::driver_not_found(driver_id));
        }

        if !self.marketplace.assign_request(&request.id, driver_id).await? {
            tracing::warn!("Request {} is no longer available for driver {}", request_id, driver_id);
            return Err(AppError::request_not_available(request_id));
        }

        let delivered_to = self.hub.publish(ServerMessage::RequestAssigned {
            request_id: request.id.clone(),
            driver_id: driver_id.to_string(),
        });

        Ok(AssignmentReceipt {
            request_id: request.id,
            driver_id: driver_id.to_string(),
            delivered_to,
        })
    }

    /// The event sent back to an initiator whose accept was refused.
    pub fn failure_message(request_id: &str, driver_id: &str, error: &AppError) -> ServerMessage {
        ServerMessage::AcceptFailed {
            request_id: request_id.to_string(),
            driver_id: driver_id.to_string(),
            reason: error.to_string(),
        }
    }
}
