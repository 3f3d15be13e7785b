//! Reply parsing for stream commands
//!
//! The redis crate hands stream replies back as nested `Value` trees; these
//! helpers flatten them into the two shapes the broker consumes.

use deadpool_redis::redis::Value as RedisValue;

/// One stream entry: id plus field/value pairs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// One XPENDING detail row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    pub idle_ms: u64,
    pub delivery_count: u64,
}

fn as_string(value: &RedisValue) -> Option<String> {
    match value {
        RedisValue::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
        RedisValue::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

fn as_int(value: &RedisValue) -> Option<i64> {
    match value {
        RedisValue::Int(n) => Some(*n),
        _ => None,
    }
}

/// Parse an XRANGE / XREVRANGE reply: `[[id, [field, value, ...]], ...]`
pub fn parse_entries(value: &RedisValue) -> Vec<StreamEntry> {
    let RedisValue::Array(rows) = value else {
        return Vec::new();
    };

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let RedisValue::Array(parts) = row else {
            continue;
        };
        if parts.len() < 2 {
            continue;
        }
        let Some(id) = as_string(&parts[0]) else {
            continue;
        };
        let RedisValue::Array(raw_fields) = &parts[1] else {
            continue;
        };
        let mut fields = Vec::with_capacity(raw_fields.len() / 2);
        let mut iter = raw_fields.iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            if let (Some(k), Some(v)) = (as_string(k), as_string(v)) {
                fields.push((k, v));
            }
        }
        entries.push(StreamEntry { id, fields });
    }
    entries
}

/// Parse an XREADGROUP reply: `[[stream_name, [[id, [field, value, ...]],
/// ...]]]`, flattened across streams
pub fn parse_read_reply(value: &RedisValue) -> Vec<StreamEntry> {
    let RedisValue::Array(streams) = value else {
        return Vec::new();
    };

    let mut entries = Vec::new();
    for stream in streams {
        let RedisValue::Array(parts) = stream else {
            continue;
        };
        if parts.len() < 2 {
            continue;
        }
        entries.extend(parse_entries(&parts[1]));
    }
    entries
}

/// Parse an XPENDING detail reply: `[[id, consumer, idle, deliveries], ...]`
pub fn parse_pending(value: &RedisValue) -> Vec<PendingEntry> {
    let RedisValue::Array(rows) = value else {
        return Vec::new();
    };

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let RedisValue::Array(parts) = row else {
            continue;
        };
        if parts.len() < 4 {
            continue;
        }
        let (Some(id), Some(consumer), Some(idle), Some(deliveries)) = (
            as_string(&parts[0]),
            as_string(&parts[1]),
            as_int(&parts[2]),
            as_int(&parts[3]),
        ) else {
            continue;
        };
        entries.push(PendingEntry {
            id,
            consumer,
            idle_ms: idle.max(0) as u64,
            delivery_count: deliveries.max(0) as u64,
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> RedisValue {
        RedisValue::BulkString(s.as_bytes().to_vec())
    }

    fn entry(id: &str, fields: &[(&str, &str)]) -> RedisValue {
        let mut flat = Vec::new();
        for (k, v) in fields {
            flat.push(bulk(k));
            flat.push(bulk(v));
        }
        RedisValue::Array(vec![bulk(id), RedisValue::Array(flat)])
    }

    #[test]
    fn test_parse_entries() {
        let reply = RedisValue::Array(vec![
            entry("1-0", &[("data", "{}"), ("extra", "x")]),
            entry("2-0", &[("data", "{\"a\":1}")]),
        ]);
        let entries = parse_entries(&reply);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "1-0");
        assert_eq!(entries[0].field("data"), Some("{}"));
        assert_eq!(entries[0].field("extra"), Some("x"));
        assert_eq!(entries[1].field("data"), Some("{\"a\":1}"));
        assert_eq!(entries[1].field("missing"), None);
    }

    #[test]
    fn test_parse_entries_tolerates_garbage() {
        let reply = RedisValue::Array(vec![
            RedisValue::Int(5),
            RedisValue::Array(vec![bulk("3-0")]),
            entry("4-0", &[("data", "ok")]),
        ]);
        let entries = parse_entries(&reply);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "4-0");
    }

    #[test]
    fn test_parse_entries_non_array() {
        assert!(parse_entries(&RedisValue::Nil).is_empty());
        assert!(parse_entries(&RedisValue::Int(1)).is_empty());
    }

    #[test]
    fn test_parse_read_reply() {
        let reply = RedisValue::Array(vec![RedisValue::Array(vec![
            bulk("relay_queue"),
            RedisValue::Array(vec![entry("7-0", &[("data", "{}")])]),
        ])]);
        let entries = parse_read_reply(&reply);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "7-0");
    }

    #[test]
    fn test_parse_pending() {
        let reply = RedisValue::Array(vec![RedisValue::Array(vec![
            bulk("9-0"),
            bulk("worker_1"),
            RedisValue::Int(1500),
            RedisValue::Int(2),
        ])]);
        let pending = parse_pending(&reply);
        assert_eq!(
            pending,
            vec![PendingEntry {
                id: "9-0".to_string(),
                consumer: "worker_1".to_string(),
                idle_ms: 1500,
                delivery_count: 2,
            }]
        );
    }

    #[test]
    fn test_parse_pending_negative_idle_clamped() {
        let reply = RedisValue::Array(vec![RedisValue::Array(vec![
            bulk("9-0"),
            bulk("w"),
            RedisValue::Int(-1),
            RedisValue::Int(1),
        ])]);
        assert_eq!(parse_pending(&reply)[0].idle_ms, 0);
    }
}
