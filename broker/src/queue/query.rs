//! Queue views
//!
//! Materialises a filtered, sorted, paginated view of any logical queue.
//! `main` is the union of the bands minus everything pending; `processing`
//! is virtual, collapsed from the consumer-group PELs of every band plus
//! the manual stream; `dead` and `acknowledged` are plain ranges. Entries
//! that fail to decode are skipped and logged, never surfaced.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{QueueError, QueueService};
use crate::core::constants::{PEL_SCAN_COUNT, STATUS_PREVIEW_COUNT};
use crate::domain::{Message, QueueKind};
use crate::utils::time;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Query parameters for a queue view
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// 1-based page; zero is treated as the first page
    pub page: u32,
    /// Page size; zero falls back to the configured batch size
    pub limit: u32,
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
    /// Exact message type
    pub filter_type: Option<String>,
    pub filter_priority: Option<u8>,
    /// Minimum attempt count
    pub filter_min_attempts: Option<u32>,
    /// UNIX-seconds bounds against the queue-appropriate timestamp
    pub start_date: Option<f64>,
    pub end_date: Option<f64>,
    /// Case-insensitive substring over id, payload JSON and error message
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    #[serde(rename = "totalPages")]
    pub total_pages: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePage {
    pub messages: Vec<Message>,
    pub pagination: Pagination,
}

/// Per-band waiting count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityCount {
    pub priority: u8,
    pub count: u64,
}

/// Bounded most-recent previews per queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePreviews {
    pub main: Vec<Message>,
    pub processing: Vec<Message>,
    pub dead: Vec<Message>,
    pub acknowledged: Vec<Message>,
}

/// Aggregate counts for the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Band lengths minus their pending entries
    pub waiting: u64,
    /// PEL sizes across bands plus the manual stream
    pub processing: u64,
    pub dead: u64,
    pub acknowledged: u64,
    pub total_acknowledged: u64,
    pub priorities: Vec<PriorityCount>,
    pub stats: super::StatsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previews: Option<QueuePreviews>,
}

impl QueueService {
    /// Filtered, sorted, paginated view of a logical queue
    pub async fn query(
        &self,
        queue: QueueKind,
        opts: &QueryOptions,
    ) -> Result<QueuePage, QueueError> {
        let mut messages = self.materialize(queue).await?;
        apply_filters(&mut messages, opts, queue);
        sort_messages(&mut messages, opts);

        let limit = if opts.limit == 0 {
            self.config().batch_size
        } else {
            opts.limit
        };
        let (messages, pagination) = paginate(messages, opts.page.max(1), limit);
        Ok(QueuePage {
            messages,
            pagination,
        })
    }

    /// Counts and optional previews across every queue
    pub async fn status(&self, include_messages: bool) -> Result<QueueStatus, QueueError> {
        let layout = self.layout();
        let group = self.group();

        let mut waiting = 0u64;
        let mut processing = 0u64;
        let mut priorities = Vec::with_capacity(layout.levels() as usize);
        for priority in 0..layout.levels() {
            let stream = layout.band(priority);
            let length = self.store().xlen(&stream).await?;
            let pending = self.store().xpending_count(&stream, group).await?;
            let count = length.saturating_sub(pending);
            waiting += count;
            processing += pending;
            priorities.push(PriorityCount { priority, count });
        }
        processing += self.store().xpending_count(&layout.manual(), group).await?;

        let previews = if include_messages {
            Some(self.previews().await?)
        } else {
            None
        };

        Ok(QueueStatus {
            waiting,
            processing,
            dead: self.store().xlen(&layout.dlq()).await?,
            acknowledged: self.store().xlen(&layout.acknowledged()).await?,
            total_acknowledged: self.store().get_u64(&layout.total_acked_key()).await?,
            priorities,
            stats: self.stats(),
            previews,
        })
    }

    // =========================================================================
    // Materialisation
    // =========================================================================

    /// Candidate set for a logical queue, enriched with metadata and the
    /// current stream position of every entry
    pub(crate) async fn materialize(&self, queue: QueueKind) -> Result<Vec<Message>, QueueError> {
        match queue {
            QueueKind::Main => self.materialize_main().await,
            QueueKind::Processing => self.materialize_processing().await,
            QueueKind::Dead => self.materialize_terminal(&self.layout().dlq()).await,
            QueueKind::Acknowledged => {
                self.materialize_terminal(&self.layout().acknowledged()).await
            }
        }
    }

    /// Stream-ids currently pending for a stream's consumer group
    pub(crate) async fn pel_ids(&self, stream: &str) -> Result<HashSet<String>, QueueError> {
        let pending = self
            .store()
            .xpending(stream, self.group(), PEL_SCAN_COUNT)
            .await?;
        Ok(pending.into_iter().map(|p| p.id).collect())
    }

    async fn materialize_main(&self) -> Result<Vec<Message>, QueueError> {
        let meta = self.meta_map().await?;
        let mut messages = Vec::new();
        for band in self.layout().bands() {
            let pel = self.pel_ids(&band).await?;
            for entry in self.store().xrange_all(&band).await? {
                if pel.contains(&entry.id) {
                    continue;
                }
                let Some(mut msg) = self.decode_entry(&entry) else {
                    continue;
                };
                msg.stream_id = Some(entry.id);
                msg.stream_name = Some(band.clone());
                if let Some(meta) = meta.get(&msg.id) {
                    msg.merge_meta(meta);
                }
                messages.push(msg);
            }
        }
        Ok(messages)
    }

    async fn materialize_processing(&self) -> Result<Vec<Message>, QueueError> {
        let meta = self.meta_map().await?;
        let now = time::unix_now();
        let mut messages = Vec::new();
        for stream in self.layout().pel_streams() {
            let pending = self
                .store()
                .xpending(&stream, self.group(), PEL_SCAN_COUNT)
                .await?;
            for entry in pending {
                let Some(found) = self.store().xrange_entry(&stream, &entry.id).await? else {
                    continue;
                };
                let Some(mut msg) = self.decode_entry(&found) else {
                    continue;
                };
                msg.stream_id = Some(entry.id.clone());
                msg.stream_name = Some(stream.clone());

                let record = meta.get(&msg.id);
                let started = record
                    .and_then(|m| m.dequeued_at)
                    .unwrap_or_else(|| now - entry.idle_ms as f64 / 1000.0);
                msg.dequeued_at = Some(started);
                msg.processing_started_at = Some(started);
                msg.attempt_count = Some(
                    record
                        .map(|m| m.attempt_count)
                        .filter(|&n| n > 0)
                        .unwrap_or(entry.delivery_count as u32),
                );
                if let Some(record) = record {
                    msg.merge_meta(record);
                }
                messages.push(msg);
            }
        }
        Ok(messages)
    }

    async fn materialize_terminal(&self, stream: &str) -> Result<Vec<Message>, QueueError> {
        let meta = self.meta_map().await?;
        let mut messages = Vec::new();
        for entry in self.store().xrange_all(stream).await? {
            let Some(mut msg) = self.decode_entry(&entry) else {
                continue;
            };
            msg.stream_id = Some(entry.id);
            msg.stream_name = Some(stream.to_string());
            if let Some(meta) = meta.get(&msg.id) {
                msg.merge_meta(meta);
            }
            messages.push(msg);
        }
        Ok(messages)
    }

    async fn previews(&self) -> Result<QueuePreviews, QueueError> {
        // Main: newest entries per band, minus anything pending.
        let mut main = Vec::new();
        for band in self.layout().bands() {
            let pel = self.pel_ids(&band).await?;
            for entry in self.store().xrevrange(&band, STATUS_PREVIEW_COUNT).await? {
                if pel.contains(&entry.id) {
                    continue;
                }
                if let Some(mut msg) = self.decode_entry(&entry) {
                    msg.stream_id = Some(entry.id);
                    msg.stream_name = Some(band.clone());
                    main.push(msg);
                }
            }
        }
        main.sort_by(|a, b| {
            b.created_at
                .partial_cmp(&a.created_at)
                .unwrap_or(Ordering::Equal)
        });
        main.truncate(STATUS_PREVIEW_COUNT);

        let mut processing = self.materialize_processing().await?;
        processing.sort_by(|a, b| {
            b.processing_started_at
                .partial_cmp(&a.processing_started_at)
                .unwrap_or(Ordering::Equal)
        });
        processing.truncate(STATUS_PREVIEW_COUNT);

        let mut dead = Vec::new();
        for entry in self
            .store()
            .xrevrange(&self.layout().dlq(), STATUS_PREVIEW_COUNT)
            .await?
        {
            if let Some(msg) = self.decode_entry(&entry) {
                dead.push(msg);
            }
        }

        let mut acknowledged = Vec::new();
        for entry in self
            .store()
            .xrevrange(&self.layout().acknowledged(), STATUS_PREVIEW_COUNT)
            .await?
        {
            if let Some(msg) = self.decode_entry(&entry) {
                acknowledged.push(msg);
            }
        }

        Ok(QueuePreviews {
            main,
            processing,
            dead,
            acknowledged,
        })
    }
}

// =============================================================================
// Filtering, sorting, pagination
// =============================================================================

/// The timestamp a date filter compares against, per queue
fn date_key(msg: &Message, queue: QueueKind) -> f64 {
    match queue {
        QueueKind::Processing => msg
            .processing_started_at
            .or(msg.dequeued_at)
            .unwrap_or(msg.created_at),
        QueueKind::Acknowledged => msg.acknowledged_at.unwrap_or(msg.created_at),
        _ => msg.created_at,
    }
}

fn matches_search(msg: &Message, needle: &str) -> bool {
    msg.id.to_lowercase().contains(needle)
        || msg.payload_string().to_lowercase().contains(needle)
        || msg
            .last_error
            .as_ref()
            .is_some_and(|e| e.to_lowercase().contains(needle))
}

fn apply_filters(messages: &mut Vec<Message>, opts: &QueryOptions, queue: QueueKind) {
    let needle = opts.search.as_ref().map(|s| s.to_lowercase());
    messages.retain(|msg| {
        if let Some(ref wanted) = opts.filter_type {
            if &msg.message_type != wanted {
                return false;
            }
        }
        if let Some(priority) = opts.filter_priority {
            if msg.priority != priority {
                return false;
            }
        }
        if let Some(min) = opts.filter_min_attempts {
            if msg.attempt_count.unwrap_or(0) < min {
                return false;
            }
        }
        if opts.start_date.is_some() || opts.end_date.is_some() {
            let ts = date_key(msg, queue);
            if let Some(start) = opts.start_date {
                if ts < start {
                    return false;
                }
            }
            if let Some(end) = opts.end_date {
                if ts > end {
                    return false;
                }
            }
        }
        if let Some(ref needle) = needle {
            if !matches_search(msg, needle) {
                return false;
            }
        }
        true
    });
}

/// Sort key for one field of one message
#[derive(Debug, PartialEq)]
enum SortKey {
    Num(f64),
    Str(String),
    Missing,
}

fn sort_value(msg: &Message, field: &str) -> SortKey {
    fn opt_num(v: Option<f64>) -> SortKey {
        v.map(SortKey::Num).unwrap_or(SortKey::Missing)
    }

    match field {
        "id" => SortKey::Str(msg.id.clone()),
        "type" => SortKey::Str(msg.message_type.clone()),
        "priority" => SortKey::Num(msg.priority as f64),
        "created_at" => SortKey::Num(msg.created_at),
        "attempt_count" => SortKey::Num(msg.attempt_count.unwrap_or(0) as f64),
        "dequeued_at" => opt_num(msg.dequeued_at),
        "processing_started_at" => opt_num(msg.processing_started_at),
        "acknowledged_at" => opt_num(msg.acknowledged_at),
        "failed_at" => opt_num(msg.failed_at),
        "payload" => SortKey::Str(msg.payload_string()),
        "last_error" => msg
            .last_error
            .clone()
            .map(SortKey::Str)
            .unwrap_or(SortKey::Missing),
        _ => SortKey::Missing,
    }
}

fn compare_keys(a: &SortKey, b: &SortKey) -> Ordering {
    match (a, b) {
        (SortKey::Num(x), SortKey::Num(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (SortKey::Str(x), SortKey::Str(y)) => x.cmp(y),
        // mixed kinds: numbers before strings, deterministic either way
        (SortKey::Num(_), SortKey::Str(_)) => Ordering::Less,
        (SortKey::Str(_), SortKey::Num(_)) => Ordering::Greater,
        // absent values sink to the end regardless of direction
        (SortKey::Missing, SortKey::Missing) => Ordering::Equal,
        (SortKey::Missing, _) => Ordering::Greater,
        (_, SortKey::Missing) => Ordering::Less,
    }
}

fn sort_messages(messages: &mut [Message], opts: &QueryOptions) {
    let Some(ref field) = opts.sort_by else {
        return;
    };
    // stable sort keeps stream order within equal keys
    messages.sort_by(|a, b| {
        let ka = sort_value(a, field);
        let kb = sort_value(b, field);
        if matches!(ka, SortKey::Missing) || matches!(kb, SortKey::Missing) {
            return compare_keys(&ka, &kb);
        }
        match opts.sort_order {
            SortOrder::Asc => compare_keys(&ka, &kb),
            SortOrder::Desc => compare_keys(&kb, &ka),
        }
    });
}

fn paginate(messages: Vec<Message>, page: u32, limit: u32) -> (Vec<Message>, Pagination) {
    let total = messages.len() as u64;
    let page = page.max(1);
    let limit = limit.max(1);
    let total_pages = total.div_ceil(limit as u64);
    let start = (page as usize - 1).saturating_mul(limit as usize);
    let slice = messages
        .into_iter()
        .skip(start)
        .take(limit as usize)
        .collect();
    (
        slice,
        Pagination {
            total,
            page,
            limit,
            total_pages,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(id: &str, kind: &str, priority: u8, created_at: f64) -> Message {
        let mut m = Message::new(kind, json!({"body": format!("payload of {id}")}))
            .with_id(id)
            .with_priority(priority as i64);
        m.created_at = created_at;
        m
    }

    fn sample_set() -> Vec<Message> {
        let mut a = msg("aaa1111111", "email", 0, 100.0);
        a.attempt_count = Some(1);
        let mut b = msg("bbb2222222", "email", 5, 200.0);
        b.attempt_count = Some(3);
        b.last_error = Some("Timeout talking to SMTP".to_string());
        let c = msg("ccc3333333", "report", 2, 300.0);
        vec![a, b, c]
    }

    #[test]
    fn test_filter_type_exact() {
        let mut msgs = sample_set();
        let opts = QueryOptions {
            filter_type: Some("email".to_string()),
            ..Default::default()
        };
        apply_filters(&mut msgs, &opts, QueueKind::Main);
        assert_eq!(msgs.len(), 2);
        assert!(msgs.iter().all(|m| m.message_type == "email"));
    }

    #[test]
    fn test_filter_priority() {
        let mut msgs = sample_set();
        let opts = QueryOptions {
            filter_priority: Some(5),
            ..Default::default()
        };
        apply_filters(&mut msgs, &opts, QueueKind::Main);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, "bbb2222222");
    }

    #[test]
    fn test_filter_min_attempts_treats_missing_as_zero() {
        let mut msgs = sample_set();
        let opts = QueryOptions {
            filter_min_attempts: Some(2),
            ..Default::default()
        };
        apply_filters(&mut msgs, &opts, QueueKind::Main);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, "bbb2222222");
    }

    #[test]
    fn test_filter_date_bounds_inclusive() {
        let mut msgs = sample_set();
        let opts = QueryOptions {
            start_date: Some(100.0),
            end_date: Some(200.0),
            ..Default::default()
        };
        apply_filters(&mut msgs, &opts, QueueKind::Main);
        let ids: Vec<_> = msgs.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["aaa1111111", "bbb2222222"]);
    }

    #[test]
    fn test_filter_date_uses_processing_timestamp() {
        let mut a = msg("aaa1111111", "job", 0, 100.0);
        a.processing_started_at = Some(500.0);
        let mut msgs = vec![a];
        let opts = QueryOptions {
            start_date: Some(400.0),
            ..Default::default()
        };
        apply_filters(&mut msgs, &opts, QueueKind::Processing);
        assert_eq!(msgs.len(), 1);

        // against created_at the same bound excludes it
        let mut msgs = vec![msg("aaa1111111", "job", 0, 100.0)];
        apply_filters(&mut msgs, &opts, QueueKind::Main);
        assert!(msgs.is_empty());
    }

    #[test]
    fn test_filter_date_uses_acknowledged_timestamp() {
        let mut a = msg("aaa1111111", "job", 0, 100.0);
        a.acknowledged_at = Some(900.0);
        let mut msgs = vec![a];
        let opts = QueryOptions {
            start_date: Some(800.0),
            ..Default::default()
        };
        apply_filters(&mut msgs, &opts, QueueKind::Acknowledged);
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn test_search_is_case_insensitive_across_fields() {
        let mut msgs = sample_set();
        let opts = QueryOptions {
            search: Some("SMTP".to_string()),
            ..Default::default()
        };
        apply_filters(&mut msgs, &opts, QueueKind::Main);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, "bbb2222222");

        // id substring
        let mut msgs = sample_set();
        let opts = QueryOptions {
            search: Some("CCC3".to_string()),
            ..Default::default()
        };
        apply_filters(&mut msgs, &opts, QueueKind::Main);
        assert_eq!(msgs.len(), 1);

        // payload substring
        let mut msgs = sample_set();
        let opts = QueryOptions {
            search: Some("payload of aaa".to_string()),
            ..Default::default()
        };
        apply_filters(&mut msgs, &opts, QueueKind::Main);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, "aaa1111111");
    }

    #[test]
    fn test_sort_numeric_desc() {
        let mut msgs = sample_set();
        let opts = QueryOptions {
            sort_by: Some("priority".to_string()),
            sort_order: SortOrder::Desc,
            ..Default::default()
        };
        sort_messages(&mut msgs, &opts);
        let priorities: Vec<_> = msgs.iter().map(|m| m.priority).collect();
        assert_eq!(priorities, vec![5, 2, 0]);
    }

    #[test]
    fn test_sort_string_asc() {
        let mut msgs = sample_set();
        let opts = QueryOptions {
            sort_by: Some("type".to_string()),
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        sort_messages(&mut msgs, &opts);
        assert_eq!(msgs.last().unwrap().message_type, "report");
    }

    #[test]
    fn test_sort_missing_values_sink_both_directions() {
        let mut msgs = sample_set();
        for order in [SortOrder::Asc, SortOrder::Desc] {
            let opts = QueryOptions {
                sort_by: Some("last_error".to_string()),
                sort_order: order,
                ..Default::default()
            };
            sort_messages(&mut msgs, &opts);
            assert_eq!(msgs[0].id, "bbb2222222");
        }
    }

    #[test]
    fn test_sort_by_payload_stringifies() {
        let mut msgs = sample_set();
        let opts = QueryOptions {
            sort_by: Some("payload".to_string()),
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        sort_messages(&mut msgs, &opts);
        let ids: Vec<_> = msgs.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["aaa1111111", "bbb2222222", "ccc3333333"]);
    }

    #[test]
    fn test_sort_unknown_field_keeps_order() {
        let mut msgs = sample_set();
        let opts = QueryOptions {
            sort_by: Some("nonsense".to_string()),
            ..Default::default()
        };
        sort_messages(&mut msgs, &opts);
        let ids: Vec<_> = msgs.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["aaa1111111", "bbb2222222", "ccc3333333"]);
    }

    #[test]
    fn test_paginate_math() {
        let msgs: Vec<Message> = (0..25)
            .map(|i| msg(&format!("id{:08}", i), "job", 0, i as f64))
            .collect();
        let (page, meta) = paginate(msgs.clone(), 1, 10);
        assert_eq!(page.len(), 10);
        assert_eq!(meta.total, 25);
        assert_eq!(meta.total_pages, 3);

        let (page, _) = paginate(msgs.clone(), 3, 10);
        assert_eq!(page.len(), 5);
        assert_eq!(page[0].id, "id00000020");

        let (page, meta) = paginate(msgs, 4, 10);
        assert!(page.is_empty());
        assert_eq!(meta.page, 4);
    }

    #[test]
    fn test_paginate_empty() {
        let (page, meta) = paginate(Vec::new(), 1, 10);
        assert!(page.is_empty());
        assert_eq!(meta.total, 0);
        assert_eq!(meta.total_pages, 0);
    }

    #[test]
    fn test_pagination_wire_shape() {
        let (_, meta) = paginate(sample_set(), 1, 2);
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["total"], 3);
        assert_eq!(value["totalPages"], 2);
    }
}
