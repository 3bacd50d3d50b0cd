//! Cove message data model and wire codec.
//!
//! Defines the canonical in-memory message shapes ([`MessageEntity`],
//! [`MediaAttachment`], [`ReplyPreview`]) and the bidirectional mapping to
//! the schema-less wire record the message store persists.
//!
//! The codec is deliberately forgiving: the wire format is best-effort and
//! forward/backward compatible, so decoding never raises. Strictness lives
//! in the crypto layer, availability lives here.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod ids;
mod message;
mod record;

pub use ids::{ClientMessageId, MessageId, ThreadId, Timestamp, UserId};
pub use message::{
    MediaAttachment, MediaKind, MessageBody, MessageEntity, ReplyPreview, ThreadSummary,
};
pub use record::{DecodedMessage, OutgoingRecord, WireRecord};
