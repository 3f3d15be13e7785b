//! Broker error type

use crate::data::StoreError;
use crate::domain::CodecError;

/// Error surfaced by broker operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Malformed or tampered record. Never reaches clients from the read
    /// paths: dequeue and query drop the offending entry instead.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Substrate connectivity or protocol failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The id is not present in the target queue
    #[error("message {0} not found")]
    NotFound(String),

    /// Invalid transition: identical source and target, or mutation of a
    /// terminal state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Ack envelope without the `(stream_name, stream_id)` lock
    #[error("acknowledge requires the lock fields from dequeue")]
    MissingLock,

    #[error("enqueue failed: {0}")]
    EnqueueFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_passthrough() {
        let err: QueueError = CodecError::InvalidSignature.into();
        assert_eq!(err.to_string(), "invalid message signature");
    }

    #[test]
    fn test_store_error_passthrough() {
        let err: QueueError = StoreError::Unavailable("down".to_string()).into();
        assert_eq!(err.to_string(), "substrate unavailable: down");
    }

    #[test]
    fn test_not_found_names_id() {
        assert_eq!(
            QueueError::NotFound("abc123".to_string()).to_string(),
            "message abc123 not found"
        );
    }
}
