//! Data layer: the stream-and-hash substrate client

pub mod redis;

pub use redis::{PendingEntry, RedisStore, StoreError, StreamEntry};
