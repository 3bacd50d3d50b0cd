//! In-memory message entities.
//!
//! These are the canonical shapes the rest of the core works with. The wire
//! codec in [`crate::record`] is the only place that knows about historical
//! record layouts; everything past that boundary sees these types.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::{ClientMessageId, MessageId, ThreadId, Timestamp, UserId};

/// Kind of a media attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    /// Still image.
    Image,
    /// Video with an optional poster thumbnail.
    Video,
    /// Audio clip.
    Audio,
}

impl MediaKind {
    /// Wire name of this kind.
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    /// Parse a wire name. Unknown names decode to `None` rather than an
    /// error; the codec drops such attachments.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }
}

/// A media attachment owned by exactly one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAttachment {
    /// Attachment kind.
    pub kind: MediaKind,
    /// Where the uploaded blob lives.
    pub remote_url: String,
    /// Poster frame for videos.
    pub thumbnail_url: Option<String>,
    /// Pixel width, zero when unknown.
    pub width: u32,
    /// Pixel height, zero when unknown.
    pub height: u32,
    /// Playback duration in seconds (video/audio only).
    pub duration: Option<f64>,
    /// Raw bytes staged before upload. Transient: never serialized, dropped
    /// when a send fails.
    #[serde(skip)]
    pub local_bytes: Option<Vec<u8>>,
}

impl MediaAttachment {
    /// An image attachment with known dimensions.
    pub fn image(remote_url: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            kind: MediaKind::Image,
            remote_url: remote_url.into(),
            thumbnail_url: None,
            width,
            height,
            duration: None,
            local_bytes: None,
        }
    }
}

/// Preview of the message a reply refers to.
///
/// `text` is never persisted: reply text would otherwise need its own
/// encryption at rest. It is recomputed client-side from the live decrypted
/// timeline, and stays `None` until the referenced message is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPreview {
    /// Server id of the referenced message (weak reference, lookup only).
    pub message_id: MessageId,
    /// Author of the referenced message.
    pub sender_id: UserId,
    /// Display name, resolved lazily from the directory cache.
    pub sender_name: String,
    /// Decrypted text of the referenced message, resolved from the loaded
    /// timeline.
    pub text: Option<String>,
    /// Media kind of the referenced message, if it carried media.
    pub media_kind: Option<MediaKind>,
}

/// Decrypted state of a message body.
///
/// A record that fails to decrypt stays in the timeline as
/// [`MessageBody::Undecryptable`]: an explicit placeholder, never raw
/// ciphertext and never a crash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Successfully decrypted text (empty for media-only messages).
    Plaintext(String),
    /// Decryption failed; render a placeholder.
    Undecryptable,
}

impl MessageBody {
    /// The plaintext, or `None` when the body could not be decrypted.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Plaintext(text) => Some(text),
            Self::Undecryptable => None,
        }
    }
}

/// A message as perceived by the timeline.
///
/// Created as a pending entity at send time (no server id yet); confirmed
/// once the store feed returns a record with a matching
/// [`ClientMessageId`]. After confirmation only the receipt sets grow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEntity {
    /// Server-assigned id. Empty until the message is confirmed.
    pub id: MessageId,
    /// Client-assigned id, stable across retries.
    pub client_message_id: ClientMessageId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Decrypted body.
    pub body: MessageBody,
    /// Server timestamp; authoritative ordering key once confirmed.
    pub created_at: Timestamp,
    /// Ordered media attachments.
    pub media: Vec<MediaAttachment>,
    /// Users the message has been delivered to. Grows monotonically.
    pub delivered_to: BTreeSet<UserId>,
    /// Users who have read the message. Grows monotonically.
    pub read_by: BTreeSet<UserId>,
    /// Optional reference to an earlier message in the same thread.
    pub reply_to: Option<ReplyPreview>,
}

/// Summary row for a thread list.
///
/// Upserted idempotently the first time two users interact; never
/// destructively overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    /// Deterministic thread id (sorted member ids).
    pub id: ThreadId,
    /// Exactly two participants.
    pub members: [UserId; 2],
    /// Display preview of the latest activity. Deliberately not plaintext:
    /// message text stays encrypted at rest.
    pub last_message_preview: String,
    /// Last activity timestamp.
    pub updated_at: Timestamp,
}
