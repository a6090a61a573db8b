//! State-change broadcasting.
//!
//! The session manager emits an event after every mutation. Presentation
//! layers subscribe and re-render from the payload or from a fresh snapshot.
//!
//! # Example
//!
//! ```rust
//! use quill_core::event_bus::{EventBus, SETTINGS_UPDATED};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.emit(SETTINGS_UPDATED, &serde_json::json!({"temperature": 0.5}));
//!
//! let event = rx.try_recv().unwrap();
//! assert_eq!(event.event_type, SETTINGS_UPDATED);
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Conversation list or active conversation changed. Payload: `{conversationId}`.
pub const CONVERSATIONS_UPDATED: &str = "conversations:updated";
/// A model's status or download progress changed. Payload: the model.
pub const MODELS_UPDATED: &str = "models:updated";
/// Generation settings changed. Payload: the full settings.
pub const SETTINGS_UPDATED: &str = "settings:updated";
/// System status was refreshed. Payload: the full status.
pub const STATUS_UPDATED: &str = "status:updated";
/// The generating flag flipped. Payload: `{generating}`.
pub const GENERATION_STATE: &str = "generation:state";

/// Slow subscribers lag past this many buffered events.
const DEFAULT_CAPACITY: usize = 1024;

/// An event type with its JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl BroadcastEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Fan-out of state changes to any number of subscribers.
pub struct EventBus {
    sender: broadcast::Sender<BroadcastEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event. Returns how many subscribers received it.
    ///
    /// With no subscribers the event is dropped.
    pub fn emit<T: Serialize>(&self, event_type: &str, payload: &T) -> usize {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Failed to serialize {} payload: {}", event_type, e);
                return 0;
            }
        };

        self.sender
            .send(BroadcastEvent::new(event_type, payload))
            .unwrap_or(0)
    }

    /// Subscribe to future events. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain everything currently buffered for `rx`, keeping events of `event_type`.
pub fn drain_events(
    rx: &mut broadcast::Receiver<BroadcastEvent>,
    event_type: &str,
) -> Vec<BroadcastEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) if event.event_type == event_type => events.push(event),
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                log::warn!("Subscriber lagged, skipped {} events", skipped);
            }
            Err(_) => break,
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emit_without_subscribers_returns_zero() {
        let bus = EventBus::new();
        assert_eq!(bus.emit(STATUS_UPDATED, &json!({})), 0);
    }

    #[test]
    fn subscriber_count_tracks_receivers() {
        let bus = EventBus::default();
        let rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn event_serializes_camel_case() {
        let event = BroadcastEvent::new(MODELS_UPDATED, json!({"id": "mistral-7b"}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["eventType"], MODELS_UPDATED);
        assert_eq!(value["payload"]["id"], "mistral-7b");
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(GENERATION_STATE, &json!({"generating": true}));
        bus.emit(GENERATION_STATE, &json!({"generating": false}));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.payload["generating"], true);
        assert_eq!(second.payload["generating"], false);
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        let _early = bus.subscribe();
        bus.emit(SETTINGS_UPDATED, &json!({"n": 1}));

        let mut late = bus.subscribe();
        bus.emit(SETTINGS_UPDATED, &json!({"n": 2}));

        let event = late.recv().await.unwrap();
        assert_eq!(event.payload["n"], 2);
    }

    #[test]
    fn drain_events_filters_by_type() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(MODELS_UPDATED, &json!({"progress": 10}));
        bus.emit(STATUS_UPDATED, &json!({}));
        bus.emit(MODELS_UPDATED, &json!({"progress": 20}));

        let events = drain_events(&mut rx, MODELS_UPDATED);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].payload["progress"], 20);
        assert!(drain_events(&mut rx, MODELS_UPDATED).is_empty());
    }
}
