// src/notify.rs - Best-effort push notifications for UI consumers
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

pub const ALARM_TOPIC: &str = "on.alarm";
pub const MACHINE_TOPIC: &str = "on.machine";

const DEFAULT_CAPACITY: usize = 256;

/// One pushed event carrying a fully serialized entity
#[derive(Debug, Clone, Serialize)]
pub struct UiEvent {
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Fan-out of UI events to any number of subscribers.
///
/// Publishing with nobody listening is not an error, and slow subscribers
/// lag rather than block the publisher.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<UiEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, topic: &str, payload: serde_json::Value) -> usize {
        let event = UiEvent {
            topic: topic.to_string(),
            payload,
            timestamp: Utc::now(),
        };
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                trace!("No subscriber for {}", topic);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let hub = EventHub::default();
        assert_eq!(hub.publish(ALARM_TOPIC, serde_json::json!({"name": "A1"})), 0);
    }

    #[test]
    fn test_subscriber_receives_event() {
        let hub = EventHub::new(8);
        let mut rx = hub.subscribe();
        assert_eq!(hub.publish(MACHINE_TOPIC, serde_json::json!({"state": "running"})), 1);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.topic, MACHINE_TOPIC);
        assert_eq!(event.payload["state"], "running");
    }
}
