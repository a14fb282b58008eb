//! Outcome taxonomy and the public event vocabulary.
//!
//! Consumers correlate completions back to the originating request kind by
//! name: for base type `T`, success is `T_SUCCESS` and failure is `T_ERROR`.
//! Queue control events use fixed names.

use crate::{PendingRequest, RequestId};
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use tracing::trace;

/// Wire name of the enqueue event.
pub const QUEUE_REQUEST: &str = "QUEUE_REQUEST";
/// Wire name of the explicit replay trigger.
pub const EXECUTE_QUEUE: &str = "EXECUTE_QUEUE";
/// Wire name of the dequeue event.
pub const DEQUEUE_REQUEST: &str = "DEQUEUE_REQUEST";
/// Wire name of the persisted-state restored event.
pub const REHYDRATE: &str = "REHYDRATE";

/// Default capacity of the event bus.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Success event name for a base type.
pub fn success_event_name(base_type: &str) -> String {
    format!("{}_SUCCESS", base_type)
}

/// Error event name for a base type.
pub fn error_event_name(base_type: &str) -> String {
    format!("{}_ERROR", base_type)
}

/// Terminal completion of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success {
        base_type: String,
        payload: Value,
        /// Set when the request came from the queue.
        parent: Option<PendingRequest>,
    },
    Failure {
        base_type: String,
        error: String,
    },
}

impl Outcome {
    pub fn base_type(&self) -> &str {
        match self {
            Self::Success { base_type, .. } | Self::Failure { base_type, .. } => base_type,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Whether this outcome completed a queued entry.
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Success { parent: Some(_), .. })
    }

    /// `T_SUCCESS` or `T_ERROR`.
    pub fn event_name(&self) -> String {
        match self {
            Self::Success { base_type, .. } => success_event_name(base_type),
            Self::Failure { base_type, .. } => error_event_name(base_type),
        }
    }

    /// Render as a wire message.
    ///
    /// Object responses are merged into the top level next to `type`; any
    /// other response shape is carried under `payload`.
    pub fn to_wire(&self) -> Value {
        let mut body = Map::new();
        body.insert("type".to_string(), Value::String(self.event_name()));

        match self {
            Self::Success {
                payload, parent, ..
            } => {
                match payload {
                    Value::Object(fields) => {
                        for (key, value) in fields {
                            if key != "type" {
                                body.insert(key.clone(), value.clone());
                            }
                        }
                    }
                    Value::Null => {}
                    other => {
                        body.insert("payload".to_string(), other.clone());
                    }
                }
                if let Some(parent) = parent {
                    body.insert("queued".to_string(), Value::Bool(true));
                    body.insert(
                        "parent".to_string(),
                        serde_json::to_value(parent).unwrap_or(Value::Null),
                    );
                }
            }
            Self::Failure { error, .. } => {
                body.insert("error".to_string(), Value::String(error.clone()));
            }
        }

        Value::Object(body)
    }
}

/// Everything broadcast on the outbox bus.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboxEvent {
    /// A request completed.
    Outcome(Outcome),
    /// An entry was appended to the queue.
    QueueRequest { id: RequestId, related: PendingRequest },
    /// Replay everything currently queued.
    ExecuteQueue,
    /// Entries with this id were removed (or were already absent).
    DequeueRequest { id: RequestId },
    /// The queue was replaced by a persisted snapshot.
    Rehydrate { count: usize },
}

impl OutboxEvent {
    /// Wire name of this event.
    pub fn name(&self) -> String {
        match self {
            Self::Outcome(outcome) => outcome.event_name(),
            Self::QueueRequest { .. } => QUEUE_REQUEST.to_string(),
            Self::ExecuteQueue => EXECUTE_QUEUE.to_string(),
            Self::DequeueRequest { .. } => DEQUEUE_REQUEST.to_string(),
            Self::Rehydrate { .. } => REHYDRATE.to_string(),
        }
    }

    /// Render as a wire message (`{"type": NAME, ...}`).
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Outcome(outcome) => outcome.to_wire(),
            Self::QueueRequest { id, related } => json!({
                "type": QUEUE_REQUEST,
                "id": id,
                "relatedAction": related,
            }),
            Self::ExecuteQueue => json!({ "type": EXECUTE_QUEUE }),
            Self::DequeueRequest { id } => json!({
                "type": DEQUEUE_REQUEST,
                "id": id,
            }),
            Self::Rehydrate { count } => json!({
                "type": REHYDRATE,
                "count": count,
            }),
        }
    }
}

/// Broadcast bus for [`OutboxEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OutboxEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: OutboxEvent) {
        trace!(event = %event.name(), "Publishing outbox event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboxEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RequestDescriptor;

    fn entry() -> PendingRequest {
        PendingRequest::new(
            "1234",
            "TEST_QUEUE",
            RequestDescriptor::new("POST", "https://example.com"),
        )
    }

    #[test]
    fn test_event_names() {
        assert_eq!(success_event_name("FETCH_USER"), "FETCH_USER_SUCCESS");
        assert_eq!(error_event_name("FETCH_USER"), "FETCH_USER_ERROR");
    }

    #[test]
    fn test_direct_success_wire_spreads_response() {
        let outcome = Outcome::Success {
            base_type: "TEST".to_string(),
            payload: json!({ "data": "test" }),
            parent: None,
        };

        assert_eq!(
            outcome.to_wire(),
            json!({ "type": "TEST_SUCCESS", "data": "test" })
        );
        assert!(!outcome.is_queued());
    }

    #[test]
    fn test_queued_success_wire_carries_parent() {
        let outcome = Outcome::Success {
            base_type: "TEST_QUEUE".to_string(),
            payload: json!({ "data": true }),
            parent: Some(entry()),
        };

        let wire = outcome.to_wire();
        assert_eq!(wire["type"], "TEST_QUEUE_SUCCESS");
        assert_eq!(wire["data"], true);
        assert_eq!(wire["queued"], true);
        assert_eq!(wire["parent"]["id"], "1234");
        assert_eq!(wire["parent"]["baseType"], "TEST_QUEUE");
        assert!(outcome.is_queued());
    }

    #[test]
    fn test_non_object_payload_is_nested() {
        let outcome = Outcome::Success {
            base_type: "LIST".to_string(),
            payload: json!([1, 2, 3]),
            parent: None,
        };
        assert_eq!(
            outcome.to_wire(),
            json!({ "type": "LIST_SUCCESS", "payload": [1, 2, 3] })
        );
    }

    #[test]
    fn test_failure_wire_preserves_message() {
        let outcome = Outcome::Failure {
            base_type: "TEST".to_string(),
            error: "There was an error".to_string(),
        };
        assert_eq!(
            outcome.to_wire(),
            json!({ "type": "TEST_ERROR", "error": "There was an error" })
        );
    }

    #[test]
    fn test_queue_control_wire() {
        let queued = OutboxEvent::QueueRequest {
            id: RequestId::from("1234"),
            related: entry(),
        };
        let wire = queued.to_wire();
        assert_eq!(wire["type"], QUEUE_REQUEST);
        assert_eq!(wire["id"], "1234");
        assert_eq!(wire["relatedAction"]["url"], "https://example.com");

        assert_eq!(
            OutboxEvent::ExecuteQueue.to_wire(),
            json!({ "type": "EXECUTE_QUEUE" })
        );
        assert_eq!(
            OutboxEvent::DequeueRequest {
                id: RequestId::from("1234")
            }
            .to_wire(),
            json!({ "type": "DEQUEUE_REQUEST", "id": "1234" })
        );
    }

    #[tokio::test]
    async fn test_bus_delivers_to_subscribers() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(OutboxEvent::ExecuteQueue);
        assert_eq!(rx.recv().await.unwrap(), OutboxEvent::ExecuteQueue);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(OutboxEvent::ExecuteQueue);
    }
}
