//! Dequeue path
//!
//! One dequeue attempt walks the streams in strict order (manual first,
//! then bands high to low) issuing `XREADGROUP COUNT 1 >` against each.
//! The first hit is decoded, stamped with its lock, and its metadata
//! record upserted. An empty pass sleeps with exponential back-off until
//! the caller's deadline.

use std::time::Duration;

use tokio::time::Instant;

use super::{QueueError, QueueService};
use crate::core::constants::{DEQUEUE_BACKOFF_CAP_MS, DEQUEUE_BACKOFF_START_MS};
use crate::data::StreamEntry;
use crate::domain::{Message, MessageMeta};
use crate::utils::time;

impl QueueService {
    /// Take the next message, waiting up to `timeout`
    ///
    /// `ack_timeout_override` wins over any per-message or recorded
    /// override for this delivery. Returns `None` once the deadline passes
    /// with every stream empty.
    pub async fn dequeue(
        &self,
        timeout: Duration,
        ack_timeout_override: Option<u64>,
    ) -> Result<Option<Message>, QueueError> {
        let deadline = Instant::now() + timeout;
        let mut backoff = Duration::from_millis(DEQUEUE_BACKOFF_START_MS);

        loop {
            for stream in self.layout().dequeue_order() {
                if let Some(msg) = self.read_stream(&stream, ack_timeout_override).await? {
                    self.process_stats().record_dequeued();
                    return Ok(Some(msg));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(backoff.min(deadline - now)).await;
            backoff = (backoff * 2).min(Duration::from_millis(DEQUEUE_BACKOFF_CAP_MS));
        }
    }

    /// One `XREADGROUP` attempt against a single stream
    ///
    /// Poison entries (missing `data` field, codec failure) are ACKed and
    /// deleted, then the read repeats so one bad record cannot wedge the
    /// stream.
    async fn read_stream(
        &self,
        stream: &str,
        ack_timeout_override: Option<u64>,
    ) -> Result<Option<Message>, QueueError> {
        loop {
            let Some(entry) = self.read_group_entry(stream).await? else {
                return Ok(None);
            };

            match self.decode_entry(&entry) {
                Some(mut msg) => {
                    msg.stream_id = Some(entry.id.clone());
                    msg.stream_name = Some(stream.to_string());
                    self.record_delivery(&mut msg, ack_timeout_override).await?;
                    tracing::debug!(id = %msg.id, stream = %stream, stream_id = %entry.id, "dequeued");
                    return Ok(Some(msg));
                }
                None => {
                    self.store()
                        .xack_xdel(stream, self.group(), &entry.id)
                        .await?;
                }
            }
        }
    }

    /// `XREADGROUP` with one-shot NOGROUP recovery: create the group at
    /// `0` with MKSTREAM and retry
    pub(crate) async fn read_group_entry(
        &self,
        stream: &str,
    ) -> Result<Option<StreamEntry>, QueueError> {
        let result = self
            .store()
            .xread_group_one(stream, self.group(), self.consumer())
            .await;
        match result {
            Ok(entry) => Ok(entry),
            Err(e) if e.is_nogroup() => {
                self.store().create_group(stream, self.group()).await?;
                Ok(self
                    .store()
                    .xread_group_one(stream, self.group(), self.consumer())
                    .await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Upsert the metadata record for a delivery and stamp the envelope
    ///
    /// Captures the pristine body as `_original_message` before any
    /// enrichment so ack and reclaim can reconstruct it.
    pub(crate) async fn record_delivery(
        &self,
        msg: &mut Message,
        ack_timeout_override: Option<u64>,
    ) -> Result<(), QueueError> {
        let now = time::unix_now();
        let mut meta = self.load_meta(&msg.id).await?.unwrap_or_default();

        meta.original_message = Some(msg.scrubbed());
        meta.attempt_count += 1;
        meta.dequeued_at = Some(now);
        if meta.created_at.is_none() {
            meta.created_at = Some(msg.created_at);
        }
        apply_ack_timeout_override(&mut meta, msg, ack_timeout_override);
        if meta.custom_max_attempts.is_none() {
            meta.custom_max_attempts = msg.custom_max_attempts;
        }

        self.save_meta(&msg.id, &meta).await?;

        msg.attempt_count = Some(meta.attempt_count);
        msg.dequeued_at = Some(now);
        msg.processing_started_at = Some(now);
        if msg.custom_ack_timeout.is_none() {
            msg.custom_ack_timeout = meta.custom_ack_timeout;
        }
        Ok(())
    }
}

/// Ack-timeout precedence for a delivery: call parameter, then the
/// message-embedded override, then whatever the record already holds (the
/// global default stays implicit)
fn apply_ack_timeout_override(meta: &mut MessageMeta, msg: &Message, param: Option<u64>) {
    if let Some(timeout) = param {
        meta.custom_ack_timeout = Some(timeout);
    } else if let Some(timeout) = msg.custom_ack_timeout {
        meta.custom_ack_timeout = Some(timeout);
    }
}
