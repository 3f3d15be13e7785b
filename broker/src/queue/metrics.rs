//! Metrics, health and per-process statistics

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::{QueueError, QueueService};

/// In-process operation counters. Not durable; reset on full clear.
#[derive(Debug, Default)]
pub struct ProcessStats {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    acknowledged: AtomicU64,
    failed: AtomicU64,
    requeued: AtomicU64,
}

impl ProcessStats {
    pub fn record_enqueued(&self, count: u64) {
        self.enqueued.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dequeued(&self) {
        self.dequeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acknowledged(&self) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, count: u64) {
        self.failed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_requeued(&self, count: u64) {
        self.requeued.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.enqueued.store(0, Ordering::Relaxed);
        self.dequeued.store(0, Ordering::Relaxed);
        self.acknowledged.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.requeued.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the process counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub enqueued: u64,
    pub dequeued: u64,
    pub acknowledged: u64,
    pub failed: u64,
    pub requeued: u64,
}

/// Depth of one priority band
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandMetrics {
    pub priority: u8,
    pub stream: String,
    pub length: u64,
    pub pending: u64,
}

/// Aggregated queue depths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub bands: Vec<BandMetrics>,
    pub manual_length: u64,
    pub manual_pending: u64,
    pub dead_letter_length: u64,
    pub acknowledged_length: u64,
    pub total_acknowledged: u64,
    /// Number of live metadata records
    pub metadata_size: u64,
    pub stats: StatsSnapshot,
}

/// Substrate ping plus a metrics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub latency_ms: f64,
    pub metrics: QueueMetrics,
}

impl QueueService {
    /// Collect per-band depths, terminal stream lengths and counters
    pub async fn metrics(&self) -> Result<QueueMetrics, QueueError> {
        let layout = self.layout();
        let group = self.group();

        let mut bands = Vec::with_capacity(layout.levels() as usize);
        for priority in 0..layout.levels() {
            let stream = layout.band(priority);
            let length = self.store().xlen(&stream).await?;
            let pending = self.store().xpending_count(&stream, group).await?;
            bands.push(BandMetrics {
                priority,
                stream,
                length,
                pending,
            });
        }

        let manual = layout.manual();
        Ok(QueueMetrics {
            manual_length: self.store().xlen(&manual).await?,
            manual_pending: self.store().xpending_count(&manual, group).await?,
            dead_letter_length: self.store().xlen(&layout.dlq()).await?,
            acknowledged_length: self.store().xlen(&layout.acknowledged()).await?,
            total_acknowledged: self.store().get_u64(&layout.total_acked_key()).await?,
            metadata_size: self.store().hlen(&layout.meta_key()).await?,
            stats: self.stats(),
            bands,
        })
    }

    /// Ping the substrate and embed a metrics snapshot
    pub async fn health(&self) -> Result<HealthReport, QueueError> {
        let latency_ms = self.store().ping_ms().await?;
        let metrics = self.metrics().await?;
        Ok(HealthReport {
            healthy: true,
            latency_ms,
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_accumulate() {
        let stats = ProcessStats::default();
        stats.record_enqueued(3);
        stats.record_dequeued();
        stats.record_dequeued();
        stats.record_acknowledged();
        stats.record_failed(1);
        stats.record_requeued(2);

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                enqueued: 3,
                dequeued: 2,
                acknowledged: 1,
                failed: 1,
                requeued: 2,
            }
        );
    }

    #[test]
    fn test_stats_reset() {
        let stats = ProcessStats::default();
        stats.record_enqueued(5);
        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_snapshot_serialization() {
        let snapshot = StatsSnapshot {
            enqueued: 1,
            dequeued: 2,
            acknowledged: 3,
            failed: 4,
            requeued: 5,
        };
        let value = serde_json::to_value(snapshot).unwrap();
        assert_eq!(value["enqueued"], 1);
        assert_eq!(value["requeued"], 5);
    }
}
