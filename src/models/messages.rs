// src/models/messages.rs
use serde::{Deserialize, Serialize};

use crate::models::{driver::Driver, request::{DashboardMetrics, TransportRequest}};

/// Messages a dashboard client sends over the WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    DriverUpdate {
        driver: Driver,
    },
    AcceptRequest {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "driverId")]
        driver_id: String,
    },
}

/// Events pushed to clients. Fan-out is at-most-once with no
/// acknowledgment, so consumers must reconcile idempotently.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Initial {
        requests: Vec<TransportRequest>,
        metrics: DashboardMetrics,
    },
    NewRequest {
        request: TransportRequest,
    },
    MetricsUpdate {
        metrics: DashboardMetrics,
    },
    RequestAssigned {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "driverId")]
        driver_id: String,
    },
    // Sent only to the client whose accept was refused
    AcceptFailed {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "driverId")]
        driver_id: String,
        reason: String,
    },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Initial { .. } => "initial",
            ServerMessage::NewRequest { .. } => "new_request",
            ServerMessage::MetricsUpdate { .. } => "metrics_update",
            ServerMessage::RequestAssigned { .. } => "request_assigned",
            ServerMessage::AcceptFailed { .. } => "accept_failed",
        }
    }
}
