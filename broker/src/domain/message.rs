//! Message records and the per-message metadata kept alongside the streams
//!
//! A message's `payload` is opaque JSON; the broker never inspects it beyond
//! serialisation and substring search in the query path. The optional fields
//! are enrichment: lock fields attached at dequeue, terminal timestamps
//! stamped by ack and dead-letter paths, and metadata merged into query
//! results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Logical queue as presented to clients
///
/// `processing` is virtual: it is derived from the consumer-group PELs of
/// every band plus the manual stream, never from a stream of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Main,
    Processing,
    Dead,
    Acknowledged,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::Main => write!(f, "main"),
            QueueKind::Processing => write!(f, "processing"),
            QueueKind::Dead => write!(f, "dead"),
            QueueKind::Acknowledged => write!(f, "acknowledged"),
        }
    }
}

impl FromStr for QueueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(QueueKind::Main),
            "processing" => Ok(QueueKind::Processing),
            "dead" | "dlq" => Ok(QueueKind::Dead),
            "acknowledged" => Ok(QueueKind::Acknowledged),
            other => Err(format!("unknown queue type: {other}")),
        }
    }
}

/// Clamp a raw priority into the configured band range
pub fn clamp_priority(raw: i64, levels: u8) -> u8 {
    let top = levels.saturating_sub(1) as i64;
    raw.clamp(0, top) as u8
}

/// A queue message
///
/// The serialised form of this struct is the stream-entry `data` field
/// (optionally wrapped in the signature envelope). Enrichment fields are
/// omitted from the wire when unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Opaque URL-safe id, assigned at enqueue when empty
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub priority: u8,
    /// UNIX seconds; stamped at enqueue when zero
    #[serde(default)]
    pub created_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_ack_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_max_attempts: Option<u32>,

    // Lock fields, attached at dequeue. Together they are the sole proof of
    // ownership required by ack.
    #[serde(
        rename = "_stream_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub stream_id: Option<String>,
    #[serde(
        rename = "_stream_name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub stream_name: Option<String>,

    // Enrichment and terminal-state fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dequeued_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Message {
    pub fn new(message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: String::new(),
            message_type: message_type.into(),
            payload,
            priority: 0,
            created_at: 0.0,
            custom_ack_timeout: None,
            custom_max_attempts: None,
            stream_id: None,
            stream_name: None,
            attempt_count: None,
            dequeued_at: None,
            processing_started_at: None,
            acknowledged_at: None,
            failed_at: None,
            last_error: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set a raw priority; out-of-range values are clamped again at enqueue
    /// against the configured band count
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority.clamp(0, u8::MAX as i64) as u8;
        self
    }

    pub fn with_ack_timeout(mut self, seconds: u64) -> Self {
        self.custom_ack_timeout = Some(seconds);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.custom_max_attempts = Some(attempts);
        self
    }

    /// The `(stream_name, stream_id)` lock, when this envelope carries one
    pub fn lock(&self) -> Option<(&str, &str)> {
        match (self.stream_name.as_deref(), self.stream_id.as_deref()) {
            (Some(name), Some(id)) if !name.is_empty() && !id.is_empty() => Some((name, id)),
            _ => None,
        }
    }

    /// Copy with lock fields and processing timestamps removed
    ///
    /// This is the shape written back to band streams and snapshotted into
    /// metadata.
    pub fn scrubbed(&self) -> Self {
        let mut msg = self.clone();
        msg.stream_id = None;
        msg.stream_name = None;
        msg.dequeued_at = None;
        msg.processing_started_at = None;
        msg
    }

    /// Merge the metadata record's enrichment fields into this message
    pub fn merge_meta(&mut self, meta: &MessageMeta) {
        if meta.attempt_count > 0 {
            self.attempt_count = Some(meta.attempt_count);
        }
        if self.dequeued_at.is_none() {
            self.dequeued_at = meta.dequeued_at;
        }
        if self.last_error.is_none() {
            self.last_error = meta.last_error.clone();
        }
        if self.custom_ack_timeout.is_none() {
            self.custom_ack_timeout = meta.custom_ack_timeout;
        }
        if self.custom_max_attempts.is_none() {
            self.custom_max_attempts = meta.custom_max_attempts;
        }
    }

    /// Payload rendered as a JSON string, for substring search and
    /// payload-keyed sorting
    pub fn payload_string(&self) -> String {
        self.payload.to_string()
    }
}

/// Per-message metadata record
///
/// Stored as a JSON value inside a single hash keyed by message id. Created
/// or updated on every delivery; consulted by ack and reclaim; deleted on
/// any terminal transition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessageMeta {
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dequeued_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_ack_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_max_attempts: Option<u32>,
    /// Snapshot of the message captured at delivery, used by ack to recover
    /// a body the consumer did not echo back
    #[serde(
        rename = "_original_message",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub original_message: Option<Message>,
}

impl MessageMeta {
    /// Effective ack timeout: metadata override, then message override,
    /// then the global default
    pub fn effective_ack_timeout(&self, msg: Option<&Message>, global_secs: u64) -> u64 {
        self.custom_ack_timeout
            .or_else(|| msg.and_then(|m| m.custom_ack_timeout))
            .unwrap_or(global_secs)
    }

    /// Effective max attempts: metadata override, then message override,
    /// then the global default
    pub fn effective_max_attempts(&self, msg: Option<&Message>, global: u32) -> u32 {
        self.custom_max_attempts
            .or_else(|| msg.and_then(|m| m.custom_max_attempts))
            .unwrap_or(global)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Message {
        Message::new("email", json!({"to": "x@example.com"}))
            .with_id("abcDEF123_")
            .with_priority(3)
    }

    #[test]
    fn test_queue_kind_round_trip() {
        for kind in [
            QueueKind::Main,
            QueueKind::Processing,
            QueueKind::Dead,
            QueueKind::Acknowledged,
        ] {
            let parsed: QueueKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert_eq!("dlq".parse::<QueueKind>().unwrap(), QueueKind::Dead);
        assert!("bogus".parse::<QueueKind>().is_err());
    }

    #[test]
    fn test_clamp_priority() {
        assert_eq!(clamp_priority(-5, 10), 0);
        assert_eq!(clamp_priority(0, 10), 0);
        assert_eq!(clamp_priority(9, 10), 9);
        assert_eq!(clamp_priority(10, 10), 9);
        assert_eq!(clamp_priority(1000, 10), 9);
        assert_eq!(clamp_priority(5, 1), 0);
    }

    #[test]
    fn test_serde_skips_unset_enrichment() {
        let json = serde_json::to_value(sample()).unwrap();
        let obj = json.as_object().unwrap();
        assert!(obj.contains_key("id"));
        assert!(obj.contains_key("type"));
        assert!(!obj.contains_key("_stream_id"));
        assert!(!obj.contains_key("attempt_count"));
        assert!(!obj.contains_key("acknowledged_at"));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut msg = sample();
        msg.created_at = 1_700_000_000.5;
        msg.stream_id = Some("1-0".to_string());
        msg.stream_name = Some("relay_queue_p3".to_string());
        let raw = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_deserialize_minimal() {
        let msg: Message = serde_json::from_str(r#"{"type":"job"}"#).unwrap();
        assert_eq!(msg.message_type, "job");
        assert!(msg.id.is_empty());
        assert_eq!(msg.priority, 0);
        assert_eq!(msg.created_at, 0.0);
        assert_eq!(msg.payload, Value::Null);
    }

    #[test]
    fn test_lock_requires_both_fields() {
        let mut msg = sample();
        assert!(msg.lock().is_none());

        msg.stream_id = Some("1-0".to_string());
        assert!(msg.lock().is_none());

        msg.stream_name = Some("relay_queue".to_string());
        assert_eq!(msg.lock(), Some(("relay_queue", "1-0")));

        msg.stream_id = Some(String::new());
        assert!(msg.lock().is_none());
    }

    #[test]
    fn test_scrubbed_drops_transient_fields() {
        let mut msg = sample();
        msg.stream_id = Some("1-0".to_string());
        msg.stream_name = Some("relay_queue".to_string());
        msg.dequeued_at = Some(1.0);
        msg.processing_started_at = Some(1.0);
        msg.attempt_count = Some(2);
        msg.last_error = Some("boom".to_string());

        let scrubbed = msg.scrubbed();
        assert!(scrubbed.lock().is_none());
        assert!(scrubbed.dequeued_at.is_none());
        assert!(scrubbed.processing_started_at.is_none());
        // attempt history survives scrubbing
        assert_eq!(scrubbed.attempt_count, Some(2));
        assert_eq!(scrubbed.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_merge_meta_prefers_message_fields() {
        let mut msg = sample();
        msg.last_error = Some("own".to_string());
        let meta = MessageMeta {
            attempt_count: 4,
            dequeued_at: Some(9.0),
            last_error: Some("meta".to_string()),
            custom_ack_timeout: Some(30),
            ..Default::default()
        };
        msg.merge_meta(&meta);
        assert_eq!(msg.attempt_count, Some(4));
        assert_eq!(msg.dequeued_at, Some(9.0));
        assert_eq!(msg.last_error.as_deref(), Some("own"));
        assert_eq!(msg.custom_ack_timeout, Some(30));
    }

    #[test]
    fn test_effective_ack_timeout_precedence() {
        let global = 60;
        let msg = sample().with_ack_timeout(20);
        let meta = MessageMeta {
            custom_ack_timeout: Some(10),
            ..Default::default()
        };

        assert_eq!(meta.effective_ack_timeout(Some(&msg), global), 10);

        let meta = MessageMeta::default();
        assert_eq!(meta.effective_ack_timeout(Some(&msg), global), 20);
        assert_eq!(meta.effective_ack_timeout(None, global), 60);
    }

    #[test]
    fn test_effective_max_attempts_precedence() {
        let global = 3;
        let msg = sample().with_max_attempts(7);
        let meta = MessageMeta {
            custom_max_attempts: Some(5),
            ..Default::default()
        };

        assert_eq!(meta.effective_max_attempts(Some(&msg), global), 5);

        let meta = MessageMeta::default();
        assert_eq!(meta.effective_max_attempts(Some(&msg), global), 7);
        assert_eq!(meta.effective_max_attempts(None, global), 3);
    }
}
