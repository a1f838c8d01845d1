// src/handlers/ws_handler.rs
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::{
    errors::{MarketplaceError as AppError, MarketplaceResult},
    models::messages::{ClientMessage, ServerMessage},
    services::{
        assignment_service::AssignmentService,
        marketplace_service::MarketplaceOperations,
    },
    state::AppState,
};

const DIRECT_CHANNEL_CAPACITY: usize = 32;

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (direct_tx, mut direct_rx) = mpsc::channel::<ServerMessage>(DIRECT_CHANNEL_CAPACITY);

    // Subscribe before the snapshot so nothing published in between is missed
    let mut events = state.hub.subscribe();
    tracing::info!("Client {} connected ({} observers)", conn_id, state.hub.observer_count());

    match initial_snapshot(&state).await {
        Ok(snapshot) => {
            let _ = direct_tx.send(snapshot).await;
        }
        Err(e) => tracing::error!("Failed to build initial snapshot for {}: {}", conn_id, e),
    }

    let writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                direct = direct_rx.recv() => match direct {
                    Some(message) => message,
                    None => break,
                },
                event = events.recv() => match event {
                    Ok(message) => message,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Client {} lagged, {} event(s) dropped", conn_id, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode {} event: {}", message.kind(), e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => {
                    if let Err(e) = handle_client_message(&state, message, &direct_tx).await {
                        tracing::error!("Error handling message from {}: {}", conn_id, e);
                    }
                }
                Err(e) => tracing::warn!("Ignoring unparseable message from {}: {}", conn_id, e),
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::error!("WebSocket error on {}: {}", conn_id, e);
                break;
            }
            _ => {}
        }
    }

    writer.abort();
    tracing::info!("Client {} disconnected", conn_id);
}

pub async fn initial_snapshot(state: &AppState) -> MarketplaceResult<ServerMessage> {
    Ok(ServerMessage::Initial {
        requests: state.marketplace.get_all_requests().await?,
        metrics: state.marketplace.get_dashboard_metrics().await?,
    })
}

/// Applies one client message. Refused accepts are reported to `direct` only.
pub async fn handle_client_message(
    state: &AppState,
    message: ClientMessage,
    direct: &mpsc::Sender<ServerMessage>,
) -> MarketplaceResult<()> {
    match message {
        ClientMessage::DriverUpdate { mut driver } => {
            driver.last_updated = Utc::now();
            state.marketplace.add_driver(&driver).await?;
            tracing::debug!("Driver {} updated over WebSocket", driver.id);
        }
        ClientMessage::AcceptRequest { request_id, driver_id } => {
            match state.assignment_service.accept(&request_id, &driver_id).await {
                Ok(receipt) => {
                    tracing::debug!("Assignment of {} announced to {} observer(s)", receipt.request_id, receipt.delivered_to);
                }
                Err(
                    e @ (AppError::RequestNotFound(_) | AppError::DriverNotFound(_) | AppError::RequestNotAvailable(_)),
                ) => {
                    let failure = AssignmentService::failure_message(&request_id, &driver_id, &e);
                    direct
                        .send(failure)
                        .await
                        .map_err(|e| AppError::WebSocketMessage(e.to_string()))?;
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}
