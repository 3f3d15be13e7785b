//! Core configuration

pub mod config;
pub mod constants;

pub use config::{BrokerConfig, PublicConfig, RedisConfig};
