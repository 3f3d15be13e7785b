//! Pending-entries reclamation
//!
//! The sweep walks every consumer-group PEL (bands and the manual stream)
//! and decides per entry: leave it alone, re-append it for another
//! attempt, or divert it to the dead letter stream. The whole sweep runs
//! under a short substrate lease so concurrent processes cannot reclaim
//! the same entries; losing the race is silent success.

use serde::{Deserialize, Serialize};

use super::{QueueError, QueueService};
use crate::core::constants::{
    PEL_SCAN_COUNT, RECLAIM_DLQ_ERROR, RECLAIM_FRESH_IDLE_MS, RECLAIM_LEASE_TTL_MS,
};
use crate::data::PendingEntry;
use crate::domain::QueueEvent;
use crate::utils::{id, time};

/// Outcome of one reclaim sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimReport {
    pub requeued: usize,
    pub dead_lettered: usize,
}

/// Per-entry decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReclaimAction {
    Skip,
    Requeue,
    DeadLetter,
}

/// Classify a pending entry
///
/// Entries idle under one second are always left alone so a consumer that
/// just read them is never raced. Past the effective ack timeout, the
/// attempt count decides between another delivery and the dead letter.
pub(crate) fn classify(
    idle_ms: u64,
    attempts: u32,
    ack_timeout_secs: u64,
    max_attempts: u32,
) -> ReclaimAction {
    if idle_ms < RECLAIM_FRESH_IDLE_MS {
        return ReclaimAction::Skip;
    }
    if idle_ms < ack_timeout_secs.saturating_mul(1000) {
        return ReclaimAction::Skip;
    }
    if attempts < max_attempts {
        ReclaimAction::Requeue
    } else {
        ReclaimAction::DeadLetter
    }
}

impl QueueService {
    /// Reclaim timed-out deliveries across every PEL
    ///
    /// Gated by a 30 s lease with a unique token; if another process holds
    /// it, returns an empty report. The lease is released by compare-and-
    /// delete on the way out, including on sweep failure.
    pub async fn reclaim_expired(&self) -> Result<ReclaimReport, QueueError> {
        let lock_key = self.layout().reclaim_lock_key();
        let token = id::random_string(16);

        if !self
            .store()
            .acquire_lease(&lock_key, &token, RECLAIM_LEASE_TTL_MS)
            .await?
        {
            tracing::debug!("another process holds the reclaim lease");
            return Ok(ReclaimReport::default());
        }

        let result = self.sweep_pending().await;

        match self.store().release_lease(&lock_key, &token).await {
            Ok(false) => tracing::warn!("reclaim lease expired before release"),
            Ok(true) => {}
            Err(e) => tracing::warn!(error = %e, "failed to release reclaim lease"),
        }

        let report = result?;
        if report.requeued > 0 {
            self.emit(QueueEvent::requeue(report.requeued)).await;
        }
        if report.dead_lettered > 0 {
            self.emit(QueueEvent::move_to_dlq(report.dead_lettered)).await;
        }
        if report != ReclaimReport::default() {
            tracing::info!(
                requeued = report.requeued,
                dead_lettered = report.dead_lettered,
                "reclaim sweep finished"
            );
        }
        Ok(report)
    }

    async fn sweep_pending(&self) -> Result<ReclaimReport, QueueError> {
        let mut report = ReclaimReport::default();
        for stream in self.layout().pel_streams() {
            let pending = self
                .store()
                .xpending(&stream, self.group(), PEL_SCAN_COUNT)
                .await?;
            for entry in pending {
                if entry.idle_ms < RECLAIM_FRESH_IDLE_MS {
                    continue;
                }
                match self.reclaim_entry(&stream, &entry).await? {
                    ReclaimAction::Requeue => report.requeued += 1,
                    ReclaimAction::DeadLetter => report.dead_lettered += 1,
                    ReclaimAction::Skip => {}
                }
            }
        }
        Ok(report)
    }

    async fn reclaim_entry(
        &self,
        stream: &str,
        pending: &PendingEntry,
    ) -> Result<ReclaimAction, QueueError> {
        // A PEL row whose entry is gone (trimmed or deleted out-of-band)
        // only needs its ack.
        let Some(entry) = self.store().xrange_entry(stream, &pending.id).await? else {
            self.store().xack(stream, self.group(), &pending.id).await?;
            return Ok(ReclaimAction::Skip);
        };

        let Some(msg) = self.decode_entry(&entry) else {
            self.store()
                .xack_xdel(stream, self.group(), &pending.id)
                .await?;
            return Ok(ReclaimAction::Skip);
        };

        let meta = self.load_meta(&msg.id).await?.unwrap_or_default();
        let attempts = if meta.attempt_count > 0 {
            meta.attempt_count
        } else {
            pending.delivery_count as u32
        };
        let ack_timeout = meta.effective_ack_timeout(Some(&msg), self.config().ack_timeout_seconds);
        let max_attempts = meta.effective_max_attempts(Some(&msg), self.config().max_attempts);

        let action = classify(pending.idle_ms, attempts, ack_timeout, max_attempts);
        match action {
            ReclaimAction::Skip => {}
            ReclaimAction::Requeue => {
                let body = meta
                    .original_message
                    .clone()
                    .unwrap_or_else(|| msg.scrubbed());
                // Manual entries go back to their natural band: the manual
                // stream holds UI-initiated moves only.
                let dest = if stream == self.layout().manual() {
                    self.layout().band(body.priority)
                } else {
                    stream.to_string()
                };
                let data = self.codec().encode(&body)?;
                self.store()
                    .relocate(
                        stream,
                        Some(self.group()),
                        &pending.id,
                        &dest,
                        &data,
                        None,
                        None,
                        None,
                    )
                    .await?;
                tracing::debug!(
                    id = %body.id,
                    attempts,
                    idle_ms = pending.idle_ms,
                    dest = %dest,
                    "requeued timed-out delivery"
                );
                self.process_stats().record_requeued(1);
            }
            ReclaimAction::DeadLetter => {
                let mut body = meta
                    .original_message
                    .clone()
                    .unwrap_or_else(|| msg.scrubbed());
                body.attempt_count = Some(attempts);
                body.failed_at = Some(time::unix_now());
                body.last_error = Some(RECLAIM_DLQ_ERROR.to_string());
                let data = self.codec().encode(&body)?;
                let meta_key = self.layout().meta_key();
                self.store()
                    .relocate(
                        stream,
                        Some(self.group()),
                        &pending.id,
                        &self.layout().dlq(),
                        &data,
                        None,
                        None,
                        Some((meta_key.as_str(), body.id.as_str())),
                    )
                    .await?;
                tracing::warn!(id = %body.id, attempts, "delivery exhausted, moved to dead letter");
                self.process_stats().record_failed(1);
            }
        }
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_entries_skipped() {
        // idle under a second skips regardless of attempts or timeout
        assert_eq!(classify(0, 99, 0, 1), ReclaimAction::Skip);
        assert_eq!(classify(999, 99, 0, 1), ReclaimAction::Skip);
    }

    #[test]
    fn test_within_timeout_skipped() {
        assert_eq!(classify(5_000, 1, 30, 3), ReclaimAction::Skip);
        assert_eq!(classify(29_999, 1, 30, 3), ReclaimAction::Skip);
    }

    #[test]
    fn test_timed_out_under_max_requeues() {
        assert_eq!(classify(30_000, 1, 30, 3), ReclaimAction::Requeue);
        assert_eq!(classify(60_000, 2, 30, 3), ReclaimAction::Requeue);
    }

    #[test]
    fn test_timed_out_at_max_dead_letters() {
        assert_eq!(classify(30_000, 3, 30, 3), ReclaimAction::DeadLetter);
        assert_eq!(classify(30_000, 4, 30, 3), ReclaimAction::DeadLetter);
    }

    #[test]
    fn test_boundary_exactly_at_timeout() {
        // idle == timeout counts as timed out
        assert_eq!(classify(2_000, 1, 2, 2), ReclaimAction::Requeue);
        assert_eq!(classify(2_000, 2, 2, 2), ReclaimAction::DeadLetter);
    }

    #[test]
    fn test_huge_timeout_does_not_overflow() {
        assert_eq!(classify(u64::MAX, 1, u64::MAX, 3), ReclaimAction::Skip);
    }

    #[test]
    fn test_retry_then_dead_letter_progression() {
        // ack_timeout=1s, max_attempts=2: first reclaim requeues the single
        // delivery, the second (after another delivery) dead-letters it
        assert_eq!(classify(2_000, 1, 1, 2), ReclaimAction::Requeue);
        assert_eq!(classify(2_000, 2, 1, 2), ReclaimAction::DeadLetter);
    }
}
