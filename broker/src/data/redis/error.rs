//! Substrate error types

use std::fmt;

/// Error type for substrate operations
#[derive(Debug)]
pub enum StoreError {
    /// Connectivity failure: pool exhausted, connection refused, ping failed
    Unavailable(String),
    /// Command or protocol failure
    Command(String),
}

impl StoreError {
    /// Consumer group missing for the target stream; recoverable by
    /// creating the group
    pub fn is_nogroup(&self) -> bool {
        matches!(self, StoreError::Command(msg) if msg.contains("NOGROUP"))
    }

    /// Group already exists; benign on create
    pub fn is_busygroup(&self) -> bool {
        matches!(self, StoreError::Command(msg) if msg.contains("BUSYGROUP"))
    }
}

impl std::error::Error for StoreError {}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "substrate unavailable: {}", msg),
            StoreError::Command(msg) => write!(f, "substrate error: {}", msg),
        }
    }
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for StoreError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        if err.is_io_error() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nogroup_detection() {
        let err = StoreError::Command(
            "NOGROUP No such consumer group 'g' for key name 'q'".to_string(),
        );
        assert!(err.is_nogroup());
        assert!(!err.is_busygroup());
    }

    #[test]
    fn test_busygroup_detection() {
        let err = StoreError::Command("BUSYGROUP Consumer Group name already exists".to_string());
        assert!(err.is_busygroup());
        assert!(!err.is_nogroup());
    }

    #[test]
    fn test_unavailable_never_matches() {
        let err = StoreError::Unavailable("NOGROUP-looking io error".to_string());
        assert!(!err.is_nogroup());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            StoreError::Unavailable("x".to_string()).to_string(),
            "substrate unavailable: x"
        );
        assert_eq!(
            StoreError::Command("y".to_string()).to_string(),
            "substrate error: y"
        );
    }
}
