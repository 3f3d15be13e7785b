//! # relayq-broker
//!
//! Durable, priority-aware message broker on a Redis Streams substrate.
//!
//! Producers enqueue typed JSON messages with a priority; consumers take
//! them through a consumer-group protocol that hands out an exclusive
//! per-message lock; unacknowledged deliveries are retried up to a
//! configurable attempt count and then diverted to a dead-letter stream.
//! A bounded history of acknowledged messages is retained for dashboards,
//! and every mutation publishes a change event over pub/sub.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use relayq_broker::{BrokerConfig, Message, QueueService};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), relayq_broker::QueueError> {
//! let queue = QueueService::connect(BrokerConfig::from_env()).await?;
//!
//! queue
//!     .enqueue(Message::new("email", json!({"to": "x@example.com"})).with_priority(5))
//!     .await?;
//!
//! if let Some(msg) = queue.dequeue(Duration::from_secs(5), None).await? {
//!     // ... handle the message, then release the lock
//!     queue.acknowledge(&msg).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Delivery is at-least-once with idempotent acknowledgement; a periodic
//! call to [`QueueService::reclaim_expired`] (one timer per deployment is
//! enough, the sweep is leased) requeues timed-out deliveries or diverts
//! them to the dead letter stream.

pub mod core;
pub mod data;
pub mod domain;
pub mod queue;
pub mod utils;

pub use crate::core::config::{BrokerConfig, PublicConfig, RedisConfig};
pub use crate::data::{RedisStore, StoreError};
pub use crate::domain::{
    CodecError, Message, MessageCodec, MessageMeta, QueueEvent, QueueEventKind, QueueKind,
};
pub use crate::queue::{
    BandMetrics, EventSubscription, HealthReport, MessageUpdate, Pagination, PriorityCount,
    QueueError, QueueMetrics, QueuePage, QueuePreviews, QueueService, QueueStatus, QueryOptions,
    ReclaimReport, SortOrder, StatsSnapshot, StreamLayout,
};
