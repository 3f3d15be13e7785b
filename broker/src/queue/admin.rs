//! Manual mutations: move, edit, delete, clear
//!
//! Moves relocate enriched bodies between logical queues. The special case
//! is moving *into* processing: entries go through the dedicated manual
//! stream, then bounded consumer-group reads against that stream alone put
//! them into its PEL, which is what makes them "processing". A stale
//! foreign entry found in the manual stream during the drain is returned
//! to its natural band.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{QueueError, QueueService};
use crate::core::constants::{MANUAL_DLQ_ERROR, MANUAL_DRAIN_SAFETY_BUDGET, PEL_SCAN_COUNT};
use crate::domain::{Message, QueueEvent, QueueKind, clamp_priority};
use crate::utils::time;

/// Field updates accepted by the edit operation
///
/// `main` and `dead` honour every field; `processing` honours only
/// `custom_ack_timeout` and silently ignores the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageUpdate {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_ack_timeout: Option<u64>,
}

impl MessageUpdate {
    pub fn is_empty(&self) -> bool {
        self.message_type.is_none()
            && self.payload.is_none()
            && self.priority.is_none()
            && self.custom_ack_timeout.is_none()
    }
}

/// Apply an update to a message body, clamping any new priority
fn apply_update(msg: &mut Message, update: &MessageUpdate, levels: u8) {
    if let Some(ref message_type) = update.message_type {
        msg.message_type = message_type.clone();
    }
    if let Some(ref payload) = update.payload {
        msg.payload = payload.clone();
    }
    if let Some(priority) = update.priority {
        msg.priority = clamp_priority(priority, levels);
    }
    if let Some(timeout) = update.custom_ack_timeout {
        msg.custom_ack_timeout = Some(timeout);
    }
}

/// Ids in first-seen order, duplicates and blanks dropped
fn dedup_ids(messages: &[Message]) -> Vec<String> {
    let mut seen = HashSet::new();
    messages
        .iter()
        .filter(|m| !m.id.is_empty())
        .filter(|m| seen.insert(m.id.clone()))
        .map(|m| m.id.clone())
        .collect()
}

impl QueueService {
    // =========================================================================
    // Move
    // =========================================================================

    /// Relocate messages between logical queues
    ///
    /// Each message is re-read from its source stream and enriched with its
    /// metadata before the per-message ACK+DEL+XADD pipeline runs. Ids not
    /// found in the source queue are skipped; the returned count is what
    /// actually moved.
    pub async fn move_messages(
        &self,
        messages: &[Message],
        from: QueueKind,
        to: QueueKind,
        error_reason: Option<&str>,
    ) -> Result<usize, QueueError> {
        if from == to {
            return Err(QueueError::Conflict(format!(
                "cannot move messages from {from} to itself"
            )));
        }

        let wanted = dedup_ids(messages);
        if wanted.is_empty() {
            return Ok(0);
        }

        let index = self.index_queue(from).await?;
        let source_group = matches!(from, QueueKind::Main | QueueKind::Processing)
            .then(|| self.group().to_string());
        let meta_key = self.layout().meta_key();
        let now = time::unix_now();

        let mut moved = 0usize;
        let mut manual_targets = HashSet::new();
        for id in wanted {
            let Some(found) = index.get(&id) else {
                tracing::debug!(id = %id, from = %from, "move target not in source queue");
                continue;
            };
            let (Some(src_stream), Some(entry_id)) =
                (found.stream_name.as_deref(), found.stream_id.as_deref())
            else {
                continue;
            };

            match to {
                QueueKind::Main => {
                    let body = found.scrubbed();
                    let dest = self.layout().band(body.priority);
                    let data = self.codec().encode(&body)?;
                    self.store()
                        .relocate(
                            src_stream,
                            source_group.as_deref(),
                            entry_id,
                            &dest,
                            &data,
                            None,
                            None,
                            None,
                        )
                        .await?;
                }
                QueueKind::Processing => {
                    let body = found.scrubbed();
                    let data = self.codec().encode(&body)?;
                    self.store()
                        .relocate(
                            src_stream,
                            source_group.as_deref(),
                            entry_id,
                            &self.layout().manual(),
                            &data,
                            None,
                            None,
                            None,
                        )
                        .await?;
                    manual_targets.insert(body.id);
                }
                QueueKind::Dead => {
                    let mut body = found.scrubbed();
                    body.failed_at = Some(now);
                    body.last_error = error_reason
                        .map(str::to_string)
                        .or(body.last_error)
                        .or_else(|| Some(MANUAL_DLQ_ERROR.to_string()));
                    let data = self.codec().encode(&body)?;
                    self.store()
                        .relocate(
                            src_stream,
                            source_group.as_deref(),
                            entry_id,
                            &self.layout().dlq(),
                            &data,
                            None,
                            None,
                            Some((meta_key.as_str(), id.as_str())),
                        )
                        .await?;
                }
                QueueKind::Acknowledged => {
                    let mut body = found.scrubbed();
                    body.acknowledged_at = Some(now);
                    let data = self.codec().encode(&body)?;
                    let counter = self.layout().total_acked_key();
                    self.store()
                        .relocate(
                            src_stream,
                            source_group.as_deref(),
                            entry_id,
                            &self.layout().acknowledged(),
                            &data,
                            Some(self.config().max_acknowledged_history),
                            Some(counter.as_str()),
                            Some((meta_key.as_str(), id.as_str())),
                        )
                        .await?;
                }
            }
            moved += 1;
        }

        if !manual_targets.is_empty() {
            self.drain_manual(&manual_targets).await?;
        }

        if moved > 0 {
            tracing::info!(from = %from, to = %to, count = moved, "moved messages");
            self.emit(QueueEvent::moved(from, to, moved)).await;
        }
        Ok(moved)
    }

    /// Pull the target set into the manual stream's PEL
    ///
    /// Bounded consumer-group reads against the manual stream only. Target
    /// entries stay pending (that is the point); foreign entries are sent
    /// back to their natural band and cleared from the manual stream. The
    /// loop stops once the target set is drained or the safety budget runs
    /// out.
    async fn drain_manual(&self, targets: &HashSet<String>) -> Result<(), QueueError> {
        let manual = self.layout().manual();
        let mut remaining = targets.clone();
        let budget = targets.len() + MANUAL_DRAIN_SAFETY_BUDGET;

        for _ in 0..budget {
            if remaining.is_empty() {
                break;
            }
            let Some(entry) = self.read_group_entry(&manual).await? else {
                break;
            };

            match self.decode_entry(&entry) {
                Some(mut msg) if remaining.contains(&msg.id) => {
                    remaining.remove(&msg.id);
                    msg.stream_id = Some(entry.id.clone());
                    msg.stream_name = Some(manual.clone());
                    self.record_delivery(&mut msg, None).await?;
                }
                Some(msg) => {
                    // Stale foreign entry: back to its natural band.
                    let body = msg.scrubbed();
                    let dest = self.layout().band(body.priority);
                    let data = self.codec().encode(&body)?;
                    self.store()
                        .relocate(
                            &manual,
                            Some(self.group()),
                            &entry.id,
                            &dest,
                            &data,
                            None,
                            None,
                            None,
                        )
                        .await?;
                    tracing::debug!(id = %body.id, dest = %dest, "returned stale entry from manual stream");
                }
                None => {
                    self.store()
                        .xack_xdel(&manual, self.group(), &entry.id)
                        .await?;
                }
            }
        }

        if !remaining.is_empty() {
            tracing::warn!(
                unclaimed = remaining.len(),
                "manual drain budget exhausted before all targets were claimed"
            );
        }
        Ok(())
    }

    // =========================================================================
    // Edit
    // =========================================================================

    /// Edit a message in place
    ///
    /// For `main` and `dead` the entry is removed and the updated body
    /// appended, which shifts its position within the band; clients are
    /// told as much and the behaviour is deliberate. For `processing` only
    /// the ack-timeout override is writable, in the metadata record.
    pub async fn update_message(
        &self,
        id: &str,
        queue: QueueKind,
        update: &MessageUpdate,
    ) -> Result<Message, QueueError> {
        let updated = match queue {
            QueueKind::Processing => {
                let Some(mut meta) = self.load_meta(id).await? else {
                    return Err(QueueError::NotFound(id.to_string()));
                };
                if let Some(timeout) = update.custom_ack_timeout {
                    meta.custom_ack_timeout = Some(timeout);
                    self.save_meta(id, &meta).await?;
                }
                let mut msg = meta
                    .original_message
                    .clone()
                    .unwrap_or_else(|| Message::new("", Value::Null).with_id(id));
                msg.merge_meta(&meta);
                msg
            }
            QueueKind::Main | QueueKind::Dead => {
                let index = self.index_queue(queue).await?;
                let Some(found) = index.get(id) else {
                    return Err(QueueError::NotFound(id.to_string()));
                };
                let (Some(src_stream), Some(entry_id)) =
                    (found.stream_name.as_deref(), found.stream_id.as_deref())
                else {
                    return Err(QueueError::NotFound(id.to_string()));
                };

                let mut body = found.scrubbed();
                apply_update(&mut body, update, self.layout().levels());
                let dest = match queue {
                    QueueKind::Main => self.layout().band(body.priority),
                    _ => self.layout().dlq(),
                };
                let data = self.codec().encode(&body)?;
                self.store()
                    .relocate(src_stream, None, entry_id, &dest, &data, None, None, None)
                    .await?;
                body
            }
            QueueKind::Acknowledged => {
                return Err(QueueError::Conflict(
                    "acknowledged messages cannot be edited".to_string(),
                ));
            }
        };

        let changes = serde_json::to_value(update).unwrap_or(Value::Null);
        tracing::info!(id = %id, queue = %queue, "updated message");
        self.emit(QueueEvent::update(id, queue, changes)).await;
        Ok(updated)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete one message from a logical queue
    pub async fn delete_message(&self, id: &str, queue: QueueKind) -> Result<(), QueueError> {
        let removed = self.remove_ids(std::slice::from_ref(&id.to_string()), queue).await?;
        if removed.is_empty() {
            return Err(QueueError::NotFound(id.to_string()));
        }
        tracing::info!(id = %id, queue = %queue, "deleted message");
        self.emit(QueueEvent::delete_one(id, queue)).await;
        Ok(())
    }

    /// Delete a set of ids; returns how many were found and removed
    pub async fn delete_messages(
        &self,
        ids: &[String],
        queue: QueueKind,
    ) -> Result<usize, QueueError> {
        let removed = self.remove_ids(ids, queue).await?;
        if !removed.is_empty() {
            tracing::info!(queue = %queue, count = removed.len(), "bulk deleted messages");
            self.emit(QueueEvent::delete_many(&removed)).await;
        }
        Ok(removed.len())
    }

    async fn remove_ids(
        &self,
        ids: &[String],
        queue: QueueKind,
    ) -> Result<Vec<String>, QueueError> {
        let index = self.index_queue(queue).await?;
        let needs_ack = queue == QueueKind::Processing;

        let mut removed = Vec::new();
        let mut seen = HashSet::new();
        for id in ids {
            if id.is_empty() || !seen.insert(id.clone()) {
                continue;
            }
            let Some(found) = index.get(id) else {
                continue;
            };
            let (Some(stream), Some(entry_id)) =
                (found.stream_name.as_deref(), found.stream_id.as_deref())
            else {
                continue;
            };
            if needs_ack {
                self.store().xack_xdel(stream, self.group(), entry_id).await?;
            } else {
                self.store().xdel(stream, entry_id).await?;
            }
            removed.push(id.clone());
        }
        self.purge_meta(&removed).await?;
        Ok(removed)
    }

    // =========================================================================
    // Clear
    // =========================================================================

    /// Empty one logical queue; returns the number of messages removed
    ///
    /// Clearing `main` leaves PEL entries alone (they belong to the
    /// processing view); clearing `processing` ACKs and deletes exactly the
    /// PEL entries.
    pub async fn clear_queue(&self, queue: QueueKind) -> Result<u64, QueueError> {
        let count = match queue {
            QueueKind::Main => {
                let mut purge = Vec::new();
                let mut count = 0u64;
                for band in self.layout().bands() {
                    let pel = self.pel_ids(&band).await?;
                    for entry in self.store().xrange_all(&band).await? {
                        if pel.contains(&entry.id) {
                            continue;
                        }
                        if let Some(msg) = self.decode_entry(&entry) {
                            purge.push(msg.id);
                        }
                        self.store().xdel(&band, &entry.id).await?;
                        count += 1;
                    }
                }
                self.purge_meta(&purge).await?;
                count
            }
            QueueKind::Processing => {
                let mut purge = Vec::new();
                let mut count = 0u64;
                for stream in self.layout().pel_streams() {
                    let pending = self
                        .store()
                        .xpending(&stream, self.group(), PEL_SCAN_COUNT)
                        .await?;
                    for entry in pending {
                        if let Some(found) = self.store().xrange_entry(&stream, &entry.id).await? {
                            if let Some(msg) = self.decode_entry(&found) {
                                purge.push(msg.id);
                            }
                        }
                        self.store()
                            .xack_xdel(&stream, self.group(), &entry.id)
                            .await?;
                        count += 1;
                    }
                }
                self.purge_meta(&purge).await?;
                count
            }
            QueueKind::Dead => {
                let dlq = self.layout().dlq();
                let count = self.store().xlen(&dlq).await?;
                self.store().del(&[dlq]).await?;
                count
            }
            QueueKind::Acknowledged => {
                let history = self.layout().acknowledged();
                let count = self.store().xlen(&history).await?;
                self.store().del(&[history]).await?;
                count
            }
        };

        tracing::info!(queue = %queue, count, "cleared queue");
        self.emit(QueueEvent::cleared(&queue.to_string(), count)).await;
        Ok(count)
    }

    /// Wipe every stream, the metadata hash and the total-ack counter, and
    /// reset the process stats
    pub async fn clear_all(&self) -> Result<u64, QueueError> {
        let mut count = 0u64;
        for stream in self.layout().all_streams() {
            count += self.store().xlen(&stream).await?;
        }

        let mut keys = self.layout().all_streams();
        keys.push(self.layout().meta_key());
        keys.push(self.layout().total_acked_key());
        self.store().del(&keys).await?;
        self.process_stats().reset();

        tracing::info!(count, "cleared all queues");
        self.emit(QueueEvent::cleared("all", count)).await;
        Ok(count)
    }

    /// First-wins id index over a queue's materialised view
    async fn index_queue(
        &self,
        queue: QueueKind,
    ) -> Result<HashMap<String, Message>, QueueError> {
        let mut index = HashMap::new();
        for msg in self.materialize(queue).await? {
            index.entry(msg.id.clone()).or_insert(msg);
        }
        Ok(index)
    }
}
