//! Change events
//!
//! Every mutation publishes one typed event on the configured pub/sub
//! channel. The bus is best-effort: subscribers treat events as refresh
//! hints, so payloads favour compactness over completeness (a large enqueue
//! batch publishes a `force_refresh` marker instead of the message list).

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::message::{Message, QueueKind};
use crate::core::constants::ENQUEUE_EVENT_MAX_MESSAGES;
use crate::utils::time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventKind {
    Enqueue,
    Acknowledge,
    Delete,
    Update,
    Move,
    MoveToDlq,
    Requeue,
}

/// Event envelope published on the change channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    #[serde(rename = "type")]
    pub kind: QueueEventKind,
    pub timestamp_ms: u64,
    pub payload: Value,
}

impl QueueEvent {
    fn new(kind: QueueEventKind, payload: Value) -> Self {
        Self {
            kind,
            timestamp_ms: time::unix_now_ms(),
            payload,
        }
    }

    /// Enqueue notification; switches to a refresh hint above the batch
    /// size threshold
    pub fn enqueue(messages: &[Message]) -> Self {
        let payload = match messages {
            [single] => json!({"count": 1, "message": single}),
            batch if batch.len() <= ENQUEUE_EVENT_MAX_MESSAGES => {
                json!({"count": batch.len(), "messages": batch})
            }
            batch => json!({"count": batch.len(), "force_refresh": true}),
        };
        Self::new(QueueEventKind::Enqueue, payload)
    }

    pub fn acknowledge(id: &str) -> Self {
        Self::new(QueueEventKind::Acknowledge, json!({"id": id}))
    }

    pub fn delete_one(id: &str, queue: QueueKind) -> Self {
        Self::new(
            QueueEventKind::Delete,
            json!({"id": id, "queue": queue.to_string()}),
        )
    }

    pub fn delete_many(ids: &[String]) -> Self {
        Self::new(
            QueueEventKind::Delete,
            json!({"ids": ids, "count": ids.len()}),
        )
    }

    /// Refresh hint after a bulk clear; `queue` is a kind name or `"all"`
    pub fn cleared(queue: &str, count: u64) -> Self {
        Self::new(
            QueueEventKind::Delete,
            json!({"queue": queue, "count": count}),
        )
    }

    pub fn update(id: &str, queue: QueueKind, updates: Value) -> Self {
        Self::new(
            QueueEventKind::Update,
            json!({"id": id, "queue": queue.to_string(), "updates": updates}),
        )
    }

    pub fn moved(from: QueueKind, to: QueueKind, count: usize) -> Self {
        Self::new(
            QueueEventKind::Move,
            json!({"from": from.to_string(), "to": to.to_string(), "count": count}),
        )
    }

    pub fn move_to_dlq(count: usize) -> Self {
        Self::new(QueueEventKind::MoveToDlq, json!({"count": count}))
    }

    pub fn requeue(count: usize) -> Self {
        Self::new(QueueEventKind::Requeue, json!({"count": count}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msgs(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| Message::new("job", json!({"i": i})).with_id(format!("id{:08}", i)))
            .collect()
    }

    #[test]
    fn test_enqueue_single_carries_message() {
        let event = QueueEvent::enqueue(&msgs(1));
        assert_eq!(event.kind, QueueEventKind::Enqueue);
        assert_eq!(event.payload["count"], 1);
        assert_eq!(event.payload["message"]["type"], "job");
        assert!(event.payload.get("messages").is_none());
    }

    #[test]
    fn test_enqueue_small_batch_carries_list() {
        let event = QueueEvent::enqueue(&msgs(50));
        assert_eq!(event.payload["count"], 50);
        assert_eq!(event.payload["messages"].as_array().unwrap().len(), 50);
        assert!(event.payload.get("force_refresh").is_none());
    }

    #[test]
    fn test_enqueue_large_batch_forces_refresh() {
        let event = QueueEvent::enqueue(&msgs(51));
        assert_eq!(event.payload["count"], 51);
        assert_eq!(event.payload["force_refresh"], true);
        assert!(event.payload.get("messages").is_none());
    }

    #[test]
    fn test_envelope_wire_shape() {
        let event = QueueEvent::acknowledge("abc");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "acknowledge");
        assert!(value["timestamp_ms"].as_u64().unwrap() > 0);
        assert_eq!(value["payload"]["id"], "abc");
    }

    #[test]
    fn test_move_payload() {
        let event = QueueEvent::moved(QueueKind::Main, QueueKind::Processing, 3);
        assert_eq!(event.payload, json!({"from": "main", "to": "processing", "count": 3}));
    }

    #[test]
    fn test_delete_shapes() {
        let one = QueueEvent::delete_one("x", QueueKind::Dead);
        assert_eq!(one.payload, json!({"id": "x", "queue": "dead"}));

        let ids = vec!["a".to_string(), "b".to_string()];
        let many = QueueEvent::delete_many(&ids);
        assert_eq!(many.payload, json!({"ids": ["a", "b"], "count": 2}));

        let cleared = QueueEvent::cleared("all", 7);
        assert_eq!(cleared.payload, json!({"queue": "all", "count": 7}));
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(
            serde_json::to_value(QueueEventKind::MoveToDlq).unwrap(),
            json!("move_to_dlq")
        );
        assert_eq!(
            serde_json::to_value(QueueEventKind::Requeue).unwrap(),
            json!("requeue")
        );
    }

    #[test]
    fn test_round_trip() {
        let event = QueueEvent::requeue(4);
        let raw = serde_json::to_string(&event).unwrap();
        let back: QueueEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.kind, QueueEventKind::Requeue);
        assert_eq!(back.payload["count"], 4);
    }
}
