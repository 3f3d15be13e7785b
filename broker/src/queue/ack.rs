//! Acknowledgement path
//!
//! The lock `(stream_name, stream_id)` from dequeue is the sole proof of
//! ownership. The XACK runs first and alone: a zero result means the lock
//! was already consumed, and the ack degrades to a no-op so a duplicate
//! ack never double-counts or re-appends history. Only after a live XACK
//! does the finalisation pipeline run.

use super::{QueueError, QueueService};
use crate::domain::{Message, QueueEvent};
use crate::utils::time;

impl QueueService {
    /// Acknowledge a dequeued message
    ///
    /// Requires `id` plus the lock fields. A consumer may hand back a bare
    /// envelope (id and lock only); the body is then recovered from the
    /// metadata snapshot, or failing that from the stream entry itself.
    pub async fn acknowledge(&self, envelope: &Message) -> Result<(), QueueError> {
        let Some((stream, entry_id)) = envelope.lock() else {
            tracing::warn!(id = %envelope.id, "acknowledge without lock fields");
            return Err(QueueError::MissingLock);
        };
        if envelope.id.is_empty() {
            tracing::warn!(stream = %stream, stream_id = %entry_id, "acknowledge without id");
            return Err(QueueError::MissingLock);
        }
        let stream = stream.to_string();
        let entry_id = entry_id.to_string();

        let mut body = if envelope.message_type.is_empty() || envelope.payload.is_null() {
            self.recover_body(envelope, &stream, &entry_id).await?
        } else {
            envelope.scrubbed()
        };

        let acked = self.store().xack(&stream, self.group(), &entry_id).await?;
        if acked == 0 {
            tracing::debug!(id = %envelope.id, stream_id = %entry_id, "lock already consumed, ack is a no-op");
            return Ok(());
        }

        body.acknowledged_at = Some(time::unix_now());
        let history_data = self.codec().encode(&body)?;

        // The entry is already out of the PEL; a finalisation hiccup loses
        // bookkeeping, not the acknowledgement itself.
        if let Err(e) = self
            .store()
            .ack_finalize(
                &stream,
                &entry_id,
                &self.layout().acknowledged(),
                self.config().max_acknowledged_history,
                &history_data,
                &self.layout().total_acked_key(),
                &self.layout().meta_key(),
                &envelope.id,
            )
            .await
        {
            tracing::error!(id = %envelope.id, error = %e, "ack finalisation failed");
        }

        tracing::debug!(id = %envelope.id, stream = %stream, "acknowledged");
        self.process_stats().record_acknowledged();
        self.emit(QueueEvent::acknowledge(&envelope.id)).await;
        Ok(())
    }

    /// Reconstruct the full message for the ack-history snapshot:
    /// metadata's `_original_message` first, then a single-entry XRANGE
    /// against the lock, then the envelope as handed in
    async fn recover_body(
        &self,
        envelope: &Message,
        stream: &str,
        entry_id: &str,
    ) -> Result<Message, QueueError> {
        if let Some(meta) = self.load_meta(&envelope.id).await? {
            if let Some(mut original) = meta.original_message {
                original.attempt_count = Some(meta.attempt_count);
                return Ok(original);
            }
        }

        if let Some(entry) = self.store().xrange_entry(stream, entry_id).await? {
            if let Some(msg) = self.decode_entry(&entry) {
                return Ok(msg.scrubbed());
            }
        }

        tracing::warn!(id = %envelope.id, "ack body unrecoverable, storing envelope as-is");
        Ok(envelope.scrubbed())
    }
}
