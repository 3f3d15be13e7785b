//! Domain model: messages, metadata, the wire codec and change events

pub mod codec;
pub mod events;
pub mod message;

pub use codec::{CodecError, MessageCodec};
pub use events::{QueueEvent, QueueEventKind};
pub use message::{Message, MessageMeta, QueueKind, clamp_priority};
