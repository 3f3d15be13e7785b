//! Broker configuration
//!
//! Every option has a compiled-in default and a `RELAYQ_*` environment
//! override. Unparseable overrides fall back to the default rather than
//! failing startup.

use std::env;

use serde::{Deserialize, Serialize};

use super::constants::{
    DEFAULT_ACK_TIMEOUT_SECS, DEFAULT_BATCH_SIZE, DEFAULT_CONSUMER_GROUP, DEFAULT_MAX_ACK_HISTORY,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_PRIORITY_LEVELS, DEFAULT_QUEUE_NAME, DEFAULT_REDIS_DB,
    DEFAULT_REDIS_HOST, DEFAULT_REDIS_PORT, ENV_ACK_TIMEOUT_SECONDS, ENV_BATCH_SIZE,
    ENV_CONSUMER_GROUP, ENV_CONSUMER_NAME, ENV_ENABLE_MESSAGE_ENCRYPTION, ENV_EVENTS_CHANNEL,
    ENV_MAX_ACK_HISTORY, ENV_MAX_ATTEMPTS, ENV_MAX_PRIORITY_LEVELS, ENV_QUEUE_NAME,
    ENV_REDIS_DB, ENV_REDIS_HOST, ENV_REDIS_PASSWORD, ENV_REDIS_PORT, ENV_SECRET_KEY,
    EVENTS_CHANNEL_SUFFIX, MAX_PRIORITY_LEVELS_LIMIT,
};
use crate::utils::id;

/// Substrate endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_REDIS_HOST.to_string(),
            port: DEFAULT_REDIS_PORT,
            db: DEFAULT_REDIS_DB,
            password: None,
        }
    }
}

impl RedisConfig {
    /// Connection URL for the redis client
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// Full broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub redis: RedisConfig,
    /// Stream prefix for every key the broker owns
    pub queue_name: String,
    /// Global lock lease for a dequeued message, in seconds
    pub ack_timeout_seconds: u64,
    /// Delivery attempts before the reclaimer diverts a message to the DLQ
    pub max_attempts: u32,
    /// Default batch width for queries
    pub batch_size: u32,
    /// Approximate trim target for the acknowledged-history stream
    pub max_acknowledged_history: u64,
    /// Number of priority bands
    pub max_priority_levels: u8,
    /// HMAC secret for the signed message envelope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    /// Whether stream entries carry the `<json>|<hex-sig>` envelope
    pub enable_message_encryption: bool,
    /// Pub/sub topic for change events
    pub events_channel: String,
    pub consumer_group_name: String,
    /// Must be distinct per process; the default embeds the pid plus a
    /// random suffix
    pub consumer_name: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let queue_name = DEFAULT_QUEUE_NAME.to_string();
        Self {
            redis: RedisConfig::default(),
            events_channel: format!("{}{}", queue_name, EVENTS_CHANNEL_SUFFIX),
            queue_name,
            ack_timeout_seconds: DEFAULT_ACK_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            batch_size: DEFAULT_BATCH_SIZE,
            max_acknowledged_history: DEFAULT_MAX_ACK_HISTORY,
            max_priority_levels: DEFAULT_MAX_PRIORITY_LEVELS,
            secret_key: None,
            enable_message_encryption: false,
            consumer_group_name: DEFAULT_CONSUMER_GROUP.to_string(),
            consumer_name: default_consumer_name(),
        }
    }
}

impl BrokerConfig {
    /// Build a configuration from the environment, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(host) = env_string(ENV_REDIS_HOST) {
            config.redis.host = host;
        }
        if let Some(port) = env_parsed(ENV_REDIS_PORT) {
            config.redis.port = port;
        }
        if let Some(db) = env_parsed(ENV_REDIS_DB) {
            config.redis.db = db;
        }
        config.redis.password = env_string(ENV_REDIS_PASSWORD);

        if let Some(name) = env_string(ENV_QUEUE_NAME) {
            config.events_channel = format!("{}{}", name, EVENTS_CHANNEL_SUFFIX);
            config.queue_name = name;
        }
        if let Some(secs) = env_parsed(ENV_ACK_TIMEOUT_SECONDS) {
            config.ack_timeout_seconds = secs;
        }
        if let Some(attempts) = env_parsed(ENV_MAX_ATTEMPTS) {
            config.max_attempts = attempts;
        }
        if let Some(batch) = env_parsed(ENV_BATCH_SIZE) {
            config.batch_size = batch;
        }
        if let Some(history) = env_parsed(ENV_MAX_ACK_HISTORY) {
            config.max_acknowledged_history = history;
        }
        if let Some(levels) = env_parsed(ENV_MAX_PRIORITY_LEVELS) {
            config.max_priority_levels = levels;
        }
        config.secret_key = env_string(ENV_SECRET_KEY);
        if let Some(enabled) = env_parsed(ENV_ENABLE_MESSAGE_ENCRYPTION) {
            config.enable_message_encryption = enabled;
        }
        if let Some(channel) = env_string(ENV_EVENTS_CHANNEL) {
            config.events_channel = channel;
        }
        if let Some(group) = env_string(ENV_CONSUMER_GROUP) {
            config.consumer_group_name = group;
        }
        if let Some(consumer) = env_string(ENV_CONSUMER_NAME) {
            config.consumer_name = consumer;
        }

        config.normalize()
    }

    /// Clamp fields into their valid ranges
    pub fn normalize(mut self) -> Self {
        self.max_priority_levels = self.max_priority_levels.clamp(1, MAX_PRIORITY_LEVELS_LIMIT);
        if self.batch_size == 0 {
            self.batch_size = DEFAULT_BATCH_SIZE;
        }
        if self.max_attempts == 0 {
            self.max_attempts = 1;
        }
        self
    }

    /// The constants view served by `GET /api/queue/config`
    pub fn public(&self) -> PublicConfig {
        PublicConfig {
            ack_timeout_seconds: self.ack_timeout_seconds,
            max_attempts: self.max_attempts,
        }
    }

    /// Whether the codec should sign and verify entries
    pub fn signing_enabled(&self) -> bool {
        self.enable_message_encryption && self.secret_key.is_some()
    }
}

/// Client-visible configuration constants
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicConfig {
    pub ack_timeout_seconds: u64,
    pub max_attempts: u32,
}

fn default_consumer_name() -> String {
    format!("worker_{}_{}", std::process::id(), id::random_string(4))
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.queue_name, DEFAULT_QUEUE_NAME);
        assert_eq!(config.ack_timeout_seconds, DEFAULT_ACK_TIMEOUT_SECS);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.max_priority_levels, DEFAULT_MAX_PRIORITY_LEVELS);
        assert_eq!(config.events_channel, "relay_queue_events");
        assert!(!config.enable_message_encryption);
        assert!(config.secret_key.is_none());
    }

    #[test]
    fn test_consumer_name_unique_per_call() {
        // Distinct processes must use distinct consumer names; the random
        // suffix also separates two configs built in the same process.
        let a = default_consumer_name();
        let b = default_consumer_name();
        assert_ne!(a, b);
        assert!(a.starts_with("worker_"));
    }

    #[test]
    fn test_redis_url() {
        let mut redis = RedisConfig::default();
        assert_eq!(redis.url(), "redis://127.0.0.1:6379/0");

        redis.password = Some("hunter2".to_string());
        redis.host = "redis.internal".to_string();
        redis.port = 6380;
        redis.db = 3;
        assert_eq!(redis.url(), "redis://:hunter2@redis.internal:6380/3");
    }

    #[test]
    fn test_normalize_clamps() {
        let mut config = BrokerConfig::default();
        config.max_priority_levels = 0;
        config.batch_size = 0;
        config.max_attempts = 0;
        let config = config.normalize();
        assert_eq!(config.max_priority_levels, 1);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.max_attempts, 1);

        let mut config = BrokerConfig::default();
        config.max_priority_levels = 255;
        assert_eq!(
            config.normalize().max_priority_levels,
            MAX_PRIORITY_LEVELS_LIMIT
        );
    }

    #[test]
    fn test_public_view() {
        let config = BrokerConfig::default();
        let public = config.public();
        assert_eq!(public.ack_timeout_seconds, config.ack_timeout_seconds);
        assert_eq!(public.max_attempts, config.max_attempts);
    }

    #[test]
    fn test_signing_enabled_requires_both() {
        let mut config = BrokerConfig::default();
        assert!(!config.signing_enabled());

        config.enable_message_encryption = true;
        assert!(!config.signing_enabled());

        config.secret_key = Some("secret".to_string());
        assert!(config.signing_enabled());
    }
}
