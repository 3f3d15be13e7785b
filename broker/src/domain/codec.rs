//! Message codec
//!
//! Serialises message records for the stream-entry `data` field. With
//! signing enabled the wire form is `"<json>|<hex(HMAC-SHA256(secret,
//! json))>"`; the separator is the last `|` so payloads containing pipes
//! survive. Verification is constant-time.

use serde::{Deserialize, Serialize};

use super::message::Message;
use crate::utils::crypto;

/// Codec failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Signature missing or HMAC mismatch
    #[error("invalid message signature")]
    InvalidSignature,
    /// Malformed JSON
    #[error("codec error: {0}")]
    Json(String),
}

/// Serialises and deserialises messages, optionally signing them
#[derive(Clone)]
pub struct MessageCodec {
    secret: Option<Vec<u8>>,
}

impl MessageCodec {
    /// Codec without a signature envelope
    pub fn plain() -> Self {
        Self { secret: None }
    }

    /// Codec wrapping every record in the HMAC envelope
    pub fn signed(secret: &str) -> Self {
        Self {
            secret: Some(secret.as_bytes().to_vec()),
        }
    }

    pub fn signing(&self) -> bool {
        self.secret.is_some()
    }

    /// Serialise a message for storage
    pub fn encode(&self, msg: &Message) -> Result<String, CodecError> {
        let json = to_json(msg)?;
        match &self.secret {
            Some(secret) => Ok(format!("{}|{}", json, crypto::sign(secret, &json))),
            None => Ok(json),
        }
    }

    /// Parse a stored record, verifying the signature when signing is on
    pub fn decode(&self, raw: &str) -> Result<Message, CodecError> {
        let json = match &self.secret {
            Some(secret) => {
                let (json, signature) =
                    raw.rsplit_once('|').ok_or(CodecError::InvalidSignature)?;
                if !crypto::verify(secret, json, signature) {
                    return Err(CodecError::InvalidSignature);
                }
                json
            }
            None => raw,
        };
        from_json(json)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|e| CodecError::Json(e.to_string()))
}

fn from_json<'a, T: Deserialize<'a>>(raw: &'a str) -> Result<T, CodecError> {
    serde_json::from_str(raw).map_err(|e| CodecError::Json(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Message {
        Message::new("email", json!({"to": "x", "note": "a|b|c"}))
            .with_id("0123456789")
            .with_priority(2)
    }

    #[test]
    fn test_plain_round_trip() {
        let codec = MessageCodec::plain();
        let raw = codec.encode(&sample()).unwrap();
        assert!(raw.starts_with('{'));
        let back = codec.decode(&raw).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_signed_round_trip() {
        let codec = MessageCodec::signed("s3cret");
        let raw = codec.encode(&sample()).unwrap();
        let back = codec.decode(&raw).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_signed_envelope_shape() {
        let codec = MessageCodec::signed("s3cret");
        let raw = codec.encode(&sample()).unwrap();
        // payload itself contains pipes; the signature is after the LAST one
        let (json, sig) = raw.rsplit_once('|').unwrap();
        assert!(json.starts_with('{') && json.ends_with('}'));
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let codec = MessageCodec::signed("s3cret");
        let raw = codec.encode(&sample()).unwrap();
        let tampered = raw.replacen("email", "emaiL", 1);
        assert_eq!(codec.decode(&tampered), Err(CodecError::InvalidSignature));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let codec = MessageCodec::signed("s3cret");
        let mut raw = codec.encode(&sample()).unwrap();
        let flipped = if raw.ends_with('0') { '1' } else { '0' };
        raw.pop();
        raw.push(flipped);
        assert_eq!(codec.decode(&raw), Err(CodecError::InvalidSignature));
    }

    #[test]
    fn test_missing_envelope_rejected_when_signing() {
        let codec = MessageCodec::signed("s3cret");
        let plain = MessageCodec::plain().encode(&sample()).unwrap();
        assert_eq!(codec.decode(&plain), Err(CodecError::InvalidSignature));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let raw = MessageCodec::signed("one").encode(&sample()).unwrap();
        assert_eq!(
            MessageCodec::signed("two").decode(&raw),
            Err(CodecError::InvalidSignature)
        );
    }

    #[test]
    fn test_garbage_json_is_codec_error() {
        let codec = MessageCodec::plain();
        assert!(matches!(codec.decode("not json"), Err(CodecError::Json(_))));
    }
}
