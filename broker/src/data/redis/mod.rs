//! Redis substrate client
//!
//! One pooled connection set serves every command; pub/sub subscribers get
//! a dedicated connection each, never borrowed from the pool. Stream
//! commands are issued raw (`cmd("XADD")…`) and composite mutations are
//! pipelined so a relocation is one round trip.

mod error;
mod types;

use std::time::{Duration, Instant};

use deadpool_redis::redis::{self, Value as RedisValue};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use futures::StreamExt;

pub use error::StoreError;
pub use types::{PendingEntry, StreamEntry};

use crate::core::config::RedisConfig;
use crate::core::constants::{DATA_FIELD, REDIS_POOL_MAX_SIZE, REDIS_POOL_TIMEOUT_SECS};

/// Compare-and-delete used to release the reclaim lease. EVAL rather than
/// EVALSHA: Redis caches scripts by SHA internally and this avoids handling
/// NOSCRIPT after a server restart.
const RELEASE_LEASE_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    else
        return 0
    end
"#;

/// Pooled substrate client
pub struct RedisStore {
    pool: Pool,
    /// Kept for dedicated pub/sub connections
    url: String,
}

impl RedisStore {
    /// Create the pool and validate the connection with a PING
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let url = config.url();
        let sanitized = sanitize_url(&url);

        let mut pool_config = Config::from_url(&url);
        pool_config.pool = Some(deadpool_redis::PoolConfig {
            max_size: REDIS_POOL_MAX_SIZE,
            timeouts: deadpool_redis::Timeouts {
                wait: Some(Duration::from_secs(REDIS_POOL_TIMEOUT_SECS)),
                create: Some(Duration::from_secs(REDIS_POOL_TIMEOUT_SECS)),
                recycle: Some(Duration::from_secs(REDIS_POOL_TIMEOUT_SECS)),
            },
            ..Default::default()
        });

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| {
                StoreError::Unavailable(format!("failed to create pool for {sanitized}: {e}"))
            })?;

        let mut conn = pool.get().await.map_err(|e| {
            StoreError::Unavailable(format!("failed to connect to {sanitized}: {e}"))
        })?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(format!("PING failed for {sanitized}: {e}")))?;

        tracing::debug!(url = %sanitized, "substrate connected");

        Ok(Self { pool, url })
    }

    async fn conn(&self) -> Result<Connection, StoreError> {
        Ok(self.pool.get().await?)
    }

    /// PING round-trip latency in milliseconds
    pub async fn ping_ms(&self) -> Result<f64, StoreError> {
        let mut conn = self.conn().await?;
        let start = Instant::now();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(start.elapsed().as_secs_f64() * 1000.0)
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// Append one encoded record, returning the new stream id
    pub async fn xadd(&self, stream: &str, data: &str) -> Result<String, StoreError> {
        let mut conn = self.conn().await?;
        let id: String = redis::cmd("XADD")
            .arg(stream)
            .arg("*")
            .arg(DATA_FIELD)
            .arg(data)
            .query_async(&mut conn)
            .await?;
        Ok(id)
    }

    /// Append with approximate-maxlen trimming (the ack-history retention)
    pub async fn xadd_trimmed(
        &self,
        stream: &str,
        maxlen: u64,
        data: &str,
    ) -> Result<String, StoreError> {
        let mut conn = self.conn().await?;
        let id: String = redis::cmd("XADD")
            .arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(maxlen)
            .arg("*")
            .arg(DATA_FIELD)
            .arg(data)
            .query_async(&mut conn)
            .await?;
        Ok(id)
    }

    /// Pipelined append of `(stream, data)` pairs; returns the new ids
    pub async fn xadd_batch(&self, items: &[(String, String)]) -> Result<Vec<String>, StoreError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for (stream, data) in items {
            pipe.cmd("XADD").arg(stream).arg("*").arg(DATA_FIELD).arg(data);
        }
        let ids: Vec<String> = pipe.query_async(&mut conn).await?;
        Ok(ids)
    }

    /// Full forward range
    pub async fn xrange_all(&self, stream: &str) -> Result<Vec<StreamEntry>, StoreError> {
        let mut conn = self.conn().await?;
        let reply: RedisValue = redis::cmd("XRANGE")
            .arg(stream)
            .arg("-")
            .arg("+")
            .query_async(&mut conn)
            .await?;
        Ok(types::parse_entries(&reply))
    }

    /// Single-entry lookup by stream id
    pub async fn xrange_entry(
        &self,
        stream: &str,
        id: &str,
    ) -> Result<Option<StreamEntry>, StoreError> {
        let mut conn = self.conn().await?;
        let reply: RedisValue = redis::cmd("XRANGE")
            .arg(stream)
            .arg(id)
            .arg(id)
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;
        Ok(types::parse_entries(&reply).into_iter().next())
    }

    /// Most recent `count` entries, newest first
    pub async fn xrevrange(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>, StoreError> {
        let mut conn = self.conn().await?;
        let reply: RedisValue = redis::cmd("XREVRANGE")
            .arg(stream)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(types::parse_entries(&reply))
    }

    /// Read one new entry for the consumer group
    ///
    /// NOGROUP surfaces as an error so the caller can create the group and
    /// retry.
    pub async fn xread_group_one(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Option<StreamEntry>, StoreError> {
        let mut conn = self.conn().await?;
        let reply: RedisValue = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut conn)
            .await?;
        Ok(types::parse_read_reply(&reply).into_iter().next())
    }

    /// Create the consumer group at `0` with MKSTREAM; existing groups are
    /// fine
    pub async fn create_group(&self, stream: &str, group: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let result: Result<String, _> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result.map_err(StoreError::from) {
            Ok(_) => Ok(()),
            Err(e) if e.is_busygroup() => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn xack(&self, stream: &str, group: &str, id: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn().await?;
        let acked: i64 = redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(id)
            .query_async(&mut conn)
            .await?;
        Ok(acked)
    }

    pub async fn xdel(&self, stream: &str, id: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn().await?;
        let deleted: i64 = redis::cmd("XDEL")
            .arg(stream)
            .arg(id)
            .query_async(&mut conn)
            .await?;
        Ok(deleted)
    }

    /// ACK and DEL in one round trip (poison entries, foreign manual
    /// entries)
    pub async fn xack_xdel(&self, stream: &str, group: &str, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.cmd("XACK").arg(stream).arg(group).arg(id).ignore();
        pipe.cmd("XDEL").arg(stream).arg(id).ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn xlen(&self, stream: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        let len: u64 = redis::cmd("XLEN").arg(stream).query_async(&mut conn).await?;
        Ok(len)
    }

    /// Pending count from the XPENDING summary; missing stream or group is
    /// zero
    pub async fn xpending_count(&self, stream: &str, group: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        let result: Result<RedisValue, _> = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await;
        let reply = match result.map_err(StoreError::from) {
            Ok(reply) => reply,
            Err(e) if e.is_nogroup() => return Ok(0),
            Err(e) => return Err(e),
        };
        if let RedisValue::Array(parts) = reply {
            if let Some(RedisValue::Int(count)) = parts.first() {
                return Ok((*count).max(0) as u64);
            }
        }
        Ok(0)
    }

    /// Pending detail rows; missing stream or group is an empty result
    pub async fn xpending(
        &self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>, StoreError> {
        let mut conn = self.conn().await?;
        let result: Result<RedisValue, _> = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await;
        match result.map_err(StoreError::from) {
            Ok(reply) => Ok(types::parse_pending(&reply)),
            Err(e) if e.is_nogroup() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Composite mutations
    // =========================================================================

    /// Remove an entry from its source and append `data` to `dest`, in one
    /// pipeline. `group` is passed when the source stream has a consumer
    /// group; `incr_key` bumps a counter (moves into the ack history);
    /// `purge_meta` removes the metadata field for terminal moves.
    #[allow(clippy::too_many_arguments)]
    pub async fn relocate(
        &self,
        src: &str,
        group: Option<&str>,
        entry_id: &str,
        dest: &str,
        data: &str,
        dest_maxlen: Option<u64>,
        incr_key: Option<&str>,
        purge_meta: Option<(&str, &str)>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        if let Some(group) = group {
            pipe.cmd("XACK").arg(src).arg(group).arg(entry_id).ignore();
        }
        pipe.cmd("XDEL").arg(src).arg(entry_id).ignore();
        pipe.cmd("XADD").arg(dest);
        if let Some(maxlen) = dest_maxlen {
            pipe.arg("MAXLEN").arg("~").arg(maxlen);
        }
        pipe.arg("*").arg(DATA_FIELD).arg(data).ignore();
        if let Some(key) = incr_key {
            pipe.cmd("INCR").arg(key).ignore();
        }
        if let Some((key, field)) = purge_meta {
            pipe.cmd("HDEL").arg(key).arg(field).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    /// Finalisation pipeline for an acknowledged message: delete the entry,
    /// append the ack-history snapshot with approximate trimming, bump the
    /// total-ack counter, purge metadata. The XACK itself happens first and
    /// separately so a stale lock can be detected.
    #[allow(clippy::too_many_arguments)]
    pub async fn ack_finalize(
        &self,
        stream: &str,
        entry_id: &str,
        history_stream: &str,
        history_maxlen: u64,
        history_data: &str,
        counter_key: &str,
        meta_key: &str,
        msg_id: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.cmd("XDEL").arg(stream).arg(entry_id).ignore();
        pipe.cmd("XADD")
            .arg(history_stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(history_maxlen)
            .arg("*")
            .arg(DATA_FIELD)
            .arg(history_data)
            .ignore();
        pipe.cmd("INCR").arg(counter_key).ignore();
        pipe.cmd("HDEL").arg(meta_key).arg(msg_id).ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    // =========================================================================
    // Keys, hashes, counters
    // =========================================================================

    pub async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key);
        }
        let deleted: u64 = cmd.query_async(&mut conn).await?;
        Ok(deleted)
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        let value: Option<String> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64, StoreError> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("HDEL");
        cmd.arg(key);
        for field in fields {
            cmd.arg(field);
        }
        let removed: u64 = cmd.query_async(&mut conn).await?;
        Ok(removed)
    }

    pub async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        let mut conn = self.conn().await?;
        let pairs: Vec<(String, String)> =
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        Ok(pairs)
    }

    pub async fn hlen(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        let len: u64 = redis::cmd("HLEN").arg(key).query_async(&mut conn).await?;
        Ok(len)
    }

    pub async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn().await?;
        let value: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    /// Read an integer key; absent means zero
    pub async fn get_u64(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    // =========================================================================
    // Pub/sub
    // =========================================================================

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Subscribe on a dedicated connection (never the command pool) and
    /// yield raw payloads until the connection drops
    pub async fn subscribe(
        &self,
        channel: String,
    ) -> Result<futures::stream::BoxStream<'static, String>, StoreError> {
        let client = redis::Client::open(self.url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;

        Ok(Box::pin(async_stream::stream! {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => yield payload,
                    Err(e) => {
                        tracing::warn!(error = %e, channel = %channel, "undecodable pub/sub payload");
                    }
                }
            }
            tracing::debug!(channel = %channel, "pub/sub stream ended");
        }))
    }

    // =========================================================================
    // Lease
    // =========================================================================

    /// `SET key token NX PX ttl`; false when another holder has the lease
    pub async fn acquire_lease(
        &self,
        key: &str,
        token: &str,
        ttl_ms: u64,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    /// Compare-and-delete release; false when the lease expired or was
    /// taken over
    pub async fn release_lease(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let released: i64 = redis::cmd("EVAL")
            .arg(RELEASE_LEASE_SCRIPT)
            .arg(1)
            .arg(key)
            .arg(token)
            .query_async(&mut conn)
            .await?;
        Ok(released == 1)
    }
}

/// Sanitize a Redis URL for logging (removes password)
fn sanitize_url(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
        if let Some(colon_pos) = url[scheme_end..at_pos].find(':') {
            let abs_colon = scheme_end + colon_pos;
            let prefix = &url[..abs_colon + 1];
            let suffix = &url[at_pos..];
            return format!("{prefix}***{suffix}");
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_url() {
        assert_eq!(
            sanitize_url("redis://localhost:6379/0"),
            "redis://localhost:6379/0"
        );
        assert_eq!(
            sanitize_url("redis://:hunter2@localhost:6379/0"),
            "redis://:***@localhost:6379/0"
        );
    }

    #[test]
    fn test_release_script_shape() {
        // the script must compare before deleting and return an integer
        assert!(RELEASE_LEASE_SCRIPT.contains("GET"));
        assert!(RELEASE_LEASE_SCRIPT.contains("DEL"));
        assert!(RELEASE_LEASE_SCRIPT.contains("return 0"));
    }
}
