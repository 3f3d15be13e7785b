//! The broker engine
//!
//! `QueueService` bundles the substrate client, codec, configuration and
//! derived key layout into one explicit container; every operation is a
//! method on it. No module-global state: embedders construct one service
//! per queue and clone the `Arc` they wrap it in.

mod ack;
mod admin;
mod dequeue;
mod enqueue;
mod error;
mod layout;
mod metrics;
mod query;
mod reclaim;

use std::collections::HashMap;

use futures::StreamExt;
use futures::stream::BoxStream;

pub use admin::MessageUpdate;
pub use error::QueueError;
pub use layout::StreamLayout;
pub use metrics::{BandMetrics, HealthReport, ProcessStats, QueueMetrics, StatsSnapshot};
pub use query::{
    Pagination, PriorityCount, QueuePage, QueuePreviews, QueueStatus, QueryOptions, SortOrder,
};
pub use reclaim::ReclaimReport;

use crate::core::config::{BrokerConfig, PublicConfig};
use crate::data::{RedisStore, StreamEntry};
use crate::domain::{Message, MessageCodec, MessageMeta, QueueEvent};

/// Live change-event feed, one dedicated substrate connection each
pub struct EventSubscription {
    inner: BoxStream<'static, QueueEvent>,
}

impl EventSubscription {
    /// Next event; `None` once the connection drops
    pub async fn recv(&mut self) -> Option<QueueEvent> {
        self.inner.next().await
    }
}

/// Priority queue broker over a stream substrate
pub struct QueueService {
    config: BrokerConfig,
    layout: StreamLayout,
    store: RedisStore,
    codec: MessageCodec,
    stats: ProcessStats,
}

impl QueueService {
    /// Connect to the substrate and build the service
    pub async fn connect(config: BrokerConfig) -> Result<Self, QueueError> {
        let config = config.normalize();
        let store = RedisStore::connect(&config.redis).await?;
        let codec = match (&config.secret_key, config.enable_message_encryption) {
            (Some(secret), true) => MessageCodec::signed(secret),
            _ => MessageCodec::plain(),
        };
        let layout = StreamLayout::new(&config.queue_name, config.max_priority_levels);

        tracing::info!(
            queue = %config.queue_name,
            bands = config.max_priority_levels,
            consumer = %config.consumer_name,
            signing = codec.signing(),
            "queue service ready"
        );

        Ok(Self {
            config,
            layout,
            store,
            codec,
            stats: ProcessStats::default(),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// The constants view served to clients
    pub fn public_config(&self) -> PublicConfig {
        self.config.public()
    }

    pub fn layout(&self) -> &StreamLayout {
        &self.layout
    }

    /// In-process operation counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // =========================================================================
    // Change events
    // =========================================================================

    /// Publish a change event. Best-effort: failures are logged and
    /// swallowed, events are hints and never a reliable transport.
    pub(crate) async fn emit(&self, event: QueueEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialise change event");
                return;
            }
        };
        if let Err(e) = self.store.publish(&self.config.events_channel, &payload).await {
            tracing::warn!(error = %e, kind = ?event.kind, "failed to publish change event");
        }
    }

    /// Subscribe to change events on a dedicated connection
    ///
    /// Intended to be called once per process by the notification fan-out
    /// (e.g. an SSE endpoint). Undecodable payloads are dropped with a
    /// warning.
    pub async fn subscribe_events(&self) -> Result<EventSubscription, QueueError> {
        let raw = self
            .store
            .subscribe(self.config.events_channel.clone())
            .await?;
        let inner = raw
            .filter_map(|payload| async move {
                match serde_json::from_str::<QueueEvent>(&payload) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        tracing::warn!(error = %e, "undecodable change event");
                        None
                    }
                }
            })
            .boxed();
        Ok(EventSubscription { inner })
    }

    // =========================================================================
    // Shared internals
    // =========================================================================

    /// Decode the `data` field of a stream entry. `None` covers both a
    /// missing field and a codec failure; callers decide whether to drop
    /// the entry or skip it.
    pub(crate) fn decode_entry(&self, entry: &StreamEntry) -> Option<Message> {
        let data = entry.field(crate::core::constants::DATA_FIELD)?;
        match self.codec.decode(data) {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::warn!(stream_id = %entry.id, error = %e, "undecodable stream entry");
                None
            }
        }
    }

    pub(crate) async fn load_meta(&self, id: &str) -> Result<Option<MessageMeta>, QueueError> {
        let raw = self.store.hget(&self.layout.meta_key(), id).await?;
        Ok(raw.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "corrupt metadata record");
                None
            }
        }))
    }

    pub(crate) async fn save_meta(&self, id: &str, meta: &MessageMeta) -> Result<(), QueueError> {
        let raw = serde_json::to_string(meta)
            .map_err(|e| crate::domain::CodecError::Json(e.to_string()))?;
        self.store.hset(&self.layout.meta_key(), id, &raw).await?;
        Ok(())
    }

    pub(crate) async fn purge_meta(&self, ids: &[String]) -> Result<(), QueueError> {
        self.store.hdel(&self.layout.meta_key(), ids).await?;
        Ok(())
    }

    /// Full metadata hash as a map, for bulk enrichment in the query path
    pub(crate) async fn meta_map(&self) -> Result<HashMap<String, MessageMeta>, QueueError> {
        let pairs = self.store.hgetall(&self.layout.meta_key()).await?;
        let mut map = HashMap::with_capacity(pairs.len());
        for (id, raw) in pairs {
            match serde_json::from_str(&raw) {
                Ok(meta) => {
                    map.insert(id, meta);
                }
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "corrupt metadata record");
                }
            }
        }
        Ok(map)
    }

    pub(crate) fn store(&self) -> &RedisStore {
        &self.store
    }

    pub(crate) fn codec(&self) -> &MessageCodec {
        &self.codec
    }

    pub(crate) fn process_stats(&self) -> &ProcessStats {
        &self.stats
    }

    pub(crate) fn group(&self) -> &str {
        &self.config.consumer_group_name
    }

    pub(crate) fn consumer(&self) -> &str {
        &self.config.consumer_name
    }
}
