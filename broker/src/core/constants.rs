// =============================================================================
// Application Identity
// =============================================================================

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "relayq";

// =============================================================================
// Environment Variables
// =============================================================================

pub const ENV_REDIS_HOST: &str = "RELAYQ_REDIS_HOST";
pub const ENV_REDIS_PORT: &str = "RELAYQ_REDIS_PORT";
pub const ENV_REDIS_DB: &str = "RELAYQ_REDIS_DB";
pub const ENV_REDIS_PASSWORD: &str = "RELAYQ_REDIS_PASSWORD";

pub const ENV_QUEUE_NAME: &str = "RELAYQ_QUEUE_NAME";
pub const ENV_ACK_TIMEOUT_SECONDS: &str = "RELAYQ_ACK_TIMEOUT_SECONDS";
pub const ENV_MAX_ATTEMPTS: &str = "RELAYQ_MAX_ATTEMPTS";
pub const ENV_BATCH_SIZE: &str = "RELAYQ_BATCH_SIZE";
pub const ENV_MAX_ACK_HISTORY: &str = "RELAYQ_MAX_ACK_HISTORY";
pub const ENV_MAX_PRIORITY_LEVELS: &str = "RELAYQ_MAX_PRIORITY_LEVELS";
pub const ENV_SECRET_KEY: &str = "RELAYQ_SECRET_KEY";
pub const ENV_ENABLE_MESSAGE_ENCRYPTION: &str = "RELAYQ_ENABLE_MESSAGE_ENCRYPTION";
pub const ENV_EVENTS_CHANNEL: &str = "RELAYQ_EVENTS_CHANNEL";
pub const ENV_CONSUMER_GROUP: &str = "RELAYQ_CONSUMER_GROUP";
pub const ENV_CONSUMER_NAME: &str = "RELAYQ_CONSUMER_NAME";

// =============================================================================
// Redis Defaults
// =============================================================================

/// Default Redis host
pub const DEFAULT_REDIS_HOST: &str = "127.0.0.1";

/// Default Redis port
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Default Redis logical database
pub const DEFAULT_REDIS_DB: i64 = 0;

/// Connection pool size for the command connection
pub const REDIS_POOL_MAX_SIZE: usize = 32;

/// Pool wait/create/recycle timeout in seconds
pub const REDIS_POOL_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// Queue Defaults
// =============================================================================

/// Default stream prefix
pub const DEFAULT_QUEUE_NAME: &str = "relay_queue";

/// Default lock lease for a dequeued message, in seconds
pub const DEFAULT_ACK_TIMEOUT_SECS: u64 = 60;

/// Default delivery attempts before a message is diverted to the DLQ
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default batch width for queries
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Approximate trim target for the acknowledged-history stream
pub const DEFAULT_MAX_ACK_HISTORY: u64 = 1000;

/// Number of priority bands
pub const DEFAULT_MAX_PRIORITY_LEVELS: u8 = 10;

/// Hard cap on configurable priority bands
pub const MAX_PRIORITY_LEVELS_LIMIT: u8 = 100;

/// Default consumer group name
pub const DEFAULT_CONSUMER_GROUP: &str = "relay_workers";

/// Suffix appended to the queue name for the default events channel
pub const EVENTS_CHANNEL_SUFFIX: &str = "_events";

// =============================================================================
// Protocol Constants
// =============================================================================

/// Length of generated message ids
pub const MESSAGE_ID_LENGTH: usize = 10;

/// Stream entry field holding the encoded message
pub const DATA_FIELD: &str = "data";

/// Dequeue back-off start
pub const DEQUEUE_BACKOFF_START_MS: u64 = 50;

/// Dequeue back-off cap
pub const DEQUEUE_BACKOFF_CAP_MS: u64 = 250;

/// Reclaim lease TTL
pub const RECLAIM_LEASE_TTL_MS: u64 = 30_000;

/// Pending entries younger than this are never reclaimed
pub const RECLAIM_FRESH_IDLE_MS: u64 = 1_000;

/// Error recorded on messages diverted to the DLQ by the reclaimer
pub const RECLAIM_DLQ_ERROR: &str = "Max attempts exceeded";

/// Default error recorded on messages manually moved to the DLQ
pub const MANUAL_DLQ_ERROR: &str = "Manually moved to DLQ";

/// Extra reads allowed while draining a manual move before giving up
pub const MANUAL_DRAIN_SAFETY_BUDGET: usize = 200;

/// Enqueue batches larger than this publish a refresh hint instead of the
/// full message list
pub const ENQUEUE_EVENT_MAX_MESSAGES: usize = 50;

/// Upper bound on pending entries fetched per stream when materialising the
/// processing view
pub const PEL_SCAN_COUNT: usize = 10_000;

/// Status preview size per queue
pub const STATUS_PREVIEW_COUNT: usize = 100;
