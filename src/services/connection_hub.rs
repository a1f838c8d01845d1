// src/services/connection_hub.rs
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::models::messages::ServerMessage;

pub const DEFAULT_HUB_CAPACITY: usize = 256;

/// Fans server events out to every connected dashboard.
///
/// Delivery is at-most-once: an observer that lags past the channel
/// capacity loses the oldest events, and nothing is acknowledged.
#[derive(Clone)]
pub struct ConnectionHub {
    broadcast: Arc<broadcast::Sender<ServerMessage>>,
}

impl fmt::Debug for ConnectionHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHub")
            .field("observers", &self.broadcast.receiver_count())
            .finish()
    }
}

impl ConnectionHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { broadcast: Arc::new(tx) }
    }

    /// Register a new observer
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.broadcast.subscribe()
    }

    /// Send an event to every current observer. Returns how many received it.
    pub fn publish(&self, message: ServerMessage) -> usize {
        let kind = message.kind();
        match self.broadcast.send(message) {
            Ok(delivered) => {
                tracing::debug!("Published {} to {} observer(s)", kind, delivered);
                delivered
            }
            Err(_) => {
                tracing::debug!("Published {} with no observers connected", kind);
                0
            }
        }
    }

    pub fn observer_count(&self) -> usize {
        self.broadcast.receiver_count()
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::DashboardMetrics;

    fn assigned(request_id: &str) -> ServerMessage {
        ServerMessage::RequestAssigned {
            request_id: request_id.to_string(),
            driver_id: "drv-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_observer() {
        let hub = ConnectionHub::default();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        assert_eq!(hub.observer_count(), 2);

        assert_eq!(hub.publish(assigned("req-1")), 2);
        assert_eq!(first.recv().await.unwrap(), assigned("req-1"));
        assert_eq!(second.recv().await.unwrap(), assigned("req-1"));
    }

    #[tokio::test]
    async fn test_publish_without_observers() {
        let hub = ConnectionHub::default();
        assert_eq!(hub.publish(ServerMessage::MetricsUpdate { metrics: DashboardMetrics::default() }), 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let hub = ConnectionHub::default();
        let _early = hub.subscribe();
        hub.publish(assigned("req-1"));

        let mut late = hub.subscribe();
        hub.publish(assigned("req-2"));
        assert_eq!(late.recv().await.unwrap(), assigned("req-2"));
    }

    #[tokio::test]
    async fn test_dropped_observer_is_not_counted() {
        let hub = ConnectionHub::new(4);
        let observer = hub.subscribe();
        drop(observer);
        assert_eq!(hub.observer_count(), 0);
    }
}
