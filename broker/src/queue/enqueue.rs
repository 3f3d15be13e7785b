//! Enqueue path

use super::{QueueError, QueueService};
use crate::domain::{Message, QueueEvent, clamp_priority};
use crate::utils::{id, time};

impl QueueService {
    /// Append a message to its priority band
    ///
    /// Assigns an id and `created_at` when missing, clamps the priority to
    /// the configured band range, and returns the message as stored.
    pub async fn enqueue(&self, mut msg: Message) -> Result<Message, QueueError> {
        self.prepare(&mut msg);
        let data = self.codec().encode(&msg)?;
        let stream = self.layout().band(msg.priority);

        self.store()
            .xadd(&stream, &data)
            .await
            .map_err(|e| QueueError::EnqueueFailed(e.to_string()))?;

        tracing::debug!(id = %msg.id, stream = %stream, priority = msg.priority, "enqueued");
        self.process_stats().record_enqueued(1);
        self.emit(QueueEvent::enqueue(std::slice::from_ref(&msg))).await;
        Ok(msg)
    }

    /// Pipelined batch append; returns the number of messages stored
    ///
    /// Messages that fail to serialise are dropped from the batch rather
    /// than aborting it.
    pub async fn enqueue_batch(&self, msgs: Vec<Message>) -> Result<usize, QueueError> {
        if msgs.is_empty() {
            return Ok(0);
        }

        let mut prepared = Vec::with_capacity(msgs.len());
        let mut items = Vec::with_capacity(msgs.len());
        for mut msg in msgs {
            self.prepare(&mut msg);
            match self.codec().encode(&msg) {
                Ok(data) => {
                    items.push((self.layout().band(msg.priority), data));
                    prepared.push(msg);
                }
                Err(e) => {
                    tracing::warn!(id = %msg.id, error = %e, "dropping unserialisable message");
                }
            }
        }

        let ids = self
            .store()
            .xadd_batch(&items)
            .await
            .map_err(|e| QueueError::EnqueueFailed(e.to_string()))?;
        let count = ids.len();

        tracing::debug!(count, "batch enqueued");
        self.process_stats().record_enqueued(count as u64);
        self.emit(QueueEvent::enqueue(&prepared)).await;
        Ok(count)
    }

    fn prepare(&self, msg: &mut Message) {
        if msg.id.is_empty() {
            msg.id = id::generate();
        }
        if msg.created_at <= 0.0 {
            msg.created_at = time::unix_now();
        }
        msg.priority = clamp_priority(msg.priority as i64, self.layout().levels());
    }
}
