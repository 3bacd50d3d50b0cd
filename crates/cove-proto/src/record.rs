//! Wire record codec.
//!
//! The transport is schema-less: a record is a loosely-typed JSON field map.
//! Decoding is best-effort by design. Absent or unknown fields decode to
//! their type's empty value, numbers are accepted as native numbers or
//! numeric strings, and two historical attachment layouts are normalized
//! here so the rest of the core only ever sees [`MediaAttachment`].
//!
//! Decoding precedence for media: a non-empty structured `attachments` list
//! wins; otherwise the legacy flat `mediaType`/`mediaURL`/... fields;
//! otherwise no media. Encoding always emits the structured shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{
    ids::{ClientMessageId, MessageId, Timestamp, UserId},
    message::{MediaAttachment, MediaKind, ReplyPreview},
};

/// A persisted or transmitted message record: a loosely-typed field map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct WireRecord(pub Map<String, Value>);

impl WireRecord {
    /// Wrap an existing field map.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Set the server-assigned message id. Called by the store at append
    /// time.
    pub fn set_id(&mut self, id: &MessageId) {
        self.0.insert("id".to_string(), json!(id.0));
    }

    /// Set the server-assigned creation timestamp. Called by the store at
    /// append time.
    pub fn set_created_at(&mut self, at: Timestamp) {
        self.0.insert("createdAt".to_string(), json!(at.0));
    }

    /// Decode into the canonical shape. Never fails: malformed fields
    /// degrade to empty values so one bad record cannot take down a
    /// timeline.
    pub fn decode(&self) -> DecodedMessage {
        DecodedMessage {
            id: MessageId(self.str_field("id")),
            sender_id: UserId(self.str_field("senderId")),
            envelope: self.str_field("text"),
            client_message_id: ClientMessageId(self.str_field("clientMessageId")),
            created_at: Timestamp(self.0.get("createdAt").and_then(lenient_i64).unwrap_or(0)),
            media: self.decode_media(),
            reply_to: self.decode_reply(),
        }
    }

    fn str_field(&self, key: &str) -> String {
        match self.0.get(key) {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    fn decode_media(&self) -> Vec<MediaAttachment> {
        if let Some(Value::Array(items)) = self.0.get("attachments")
            && !items.is_empty()
        {
            return items.iter().filter_map(decode_structured_attachment).collect();
        }
        self.decode_legacy_media().into_iter().collect()
    }

    /// Legacy single-attachment layout: flat fields on the record itself.
    fn decode_legacy_media(&self) -> Option<MediaAttachment> {
        let kind = match self.0.get("mediaType") {
            Some(Value::String(name)) => MediaKind::from_wire(name)?,
            _ => return None,
        };
        let remote_url = match self.0.get("mediaURL") {
            Some(Value::String(url)) if !url.is_empty() => url.clone(),
            _ => return None,
        };

        Some(MediaAttachment {
            kind,
            remote_url,
            thumbnail_url: non_empty_string(self.0.get("thumbnailURL")),
            width: self.0.get("mediaWidth").and_then(lenient_u32).unwrap_or(0),
            height: self.0.get("mediaHeight").and_then(lenient_u32).unwrap_or(0),
            duration: self.0.get("mediaDuration").and_then(lenient_f64),
            local_bytes: None,
        })
    }

    fn decode_reply(&self) -> Option<ReplyPreview> {
        let message_id = match self.0.get("replyToMessageId") {
            Some(Value::String(id)) if !id.is_empty() => MessageId(id.clone()),
            _ => return None,
        };

        Some(ReplyPreview {
            message_id,
            sender_id: UserId(self.str_field("replyToSenderId")),
            sender_name: self.str_field("replyToSenderName"),
            // Reply text is never persisted; it is resolved from the live
            // decrypted timeline
            text: None,
            media_kind: match self.0.get("replyToMediaType") {
                Some(Value::String(name)) => MediaKind::from_wire(name),
                _ => None,
            },
        })
    }
}

fn decode_structured_attachment(value: &Value) -> Option<MediaAttachment> {
    let fields = value.as_object()?;
    let kind = MediaKind::from_wire(fields.get("type")?.as_str()?)?;
    let remote_url = fields.get("url")?.as_str()?.to_string();

    Some(MediaAttachment {
        kind,
        remote_url,
        thumbnail_url: non_empty_string(fields.get("thumbnailURL")),
        width: fields.get("width").and_then(lenient_u32).unwrap_or(0),
        height: fields.get("height").and_then(lenient_u32).unwrap_or(0),
        duration: fields.get("duration").and_then(lenient_f64),
        local_bytes: None,
    })
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Accept a number encoded natively or as a numeric string. Upstream typing
/// has been inconsistent historically, so both must parse.
fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_u32(value: &Value) -> Option<u32> {
    lenient_i64(value).and_then(|n| u32::try_from(n).ok())
}

/// A record decoded to the canonical shape, text still encrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    /// Server-assigned id, empty if the record has not been persisted.
    pub id: MessageId,
    /// Author.
    pub sender_id: UserId,
    /// The encrypted envelope (base64), empty for media-only messages.
    pub envelope: String,
    /// Client-assigned id used for de-duplication, empty for foreign
    /// clients that never set one.
    pub client_message_id: ClientMessageId,
    /// Server timestamp.
    pub created_at: Timestamp,
    /// Normalized attachments.
    pub media: Vec<MediaAttachment>,
    /// Reply reference with unresolved text.
    pub reply_to: Option<ReplyPreview>,
}

/// Fields of a message about to be appended to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingRecord {
    /// Author.
    pub sender_id: UserId,
    /// Encrypted envelope (base64), empty string for media-only messages.
    pub envelope: String,
    /// Client-assigned id for de-duplication.
    pub client_message_id: ClientMessageId,
    /// Attachments to persist (structured shape only).
    pub media: Vec<MediaAttachment>,
    /// Optional reply reference. Its `text` is intentionally dropped.
    pub reply_to: Option<ReplyPreview>,
}

impl OutgoingRecord {
    /// Encode into a wire record. `id` and `createdAt` are left unset for
    /// the store to assign.
    pub fn encode(&self) -> WireRecord {
        let mut fields = Map::new();
        fields.insert("senderId".to_string(), json!(self.sender_id.0));
        fields.insert("text".to_string(), json!(self.envelope));
        fields.insert("clientMessageId".to_string(), json!(self.client_message_id.0));

        if !self.media.is_empty() {
            let attachments: Vec<Value> = self.media.iter().map(encode_attachment).collect();
            fields.insert("attachments".to_string(), Value::Array(attachments));
        }

        if let Some(reply) = &self.reply_to {
            fields.insert("replyToMessageId".to_string(), json!(reply.message_id.0));
            fields.insert("replyToSenderId".to_string(), json!(reply.sender_id.0));
            fields.insert("replyToSenderName".to_string(), json!(reply.sender_name));
            if let Some(kind) = reply.media_kind {
                fields.insert("replyToMediaType".to_string(), json!(kind.as_wire()));
            }
            // replyToText is never persisted: it would need independent
            // encryption at rest
        }

        WireRecord(fields)
    }
}

fn encode_attachment(attachment: &MediaAttachment) -> Value {
    let mut fields = Map::new();
    fields.insert("type".to_string(), json!(attachment.kind.as_wire()));
    fields.insert("url".to_string(), json!(attachment.remote_url));
    if let Some(thumbnail) = &attachment.thumbnail_url {
        fields.insert("thumbnailURL".to_string(), json!(thumbnail));
    }
    fields.insert("width".to_string(), json!(attachment.width));
    fields.insert("height".to_string(), json!(attachment.height));
    if let Some(duration) = attachment.duration {
        fields.insert("duration".to_string(), json!(duration));
    }
    Value::Object(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: Value) -> WireRecord {
        match value {
            Value::Object(map) => WireRecord(map),
            _ => WireRecord::default(),
        }
    }

    #[test]
    fn empty_record_decodes_to_empty_values() {
        let decoded = WireRecord::default().decode();

        assert_eq!(decoded.sender_id, UserId(String::new()));
        assert_eq!(decoded.envelope, "");
        assert_eq!(decoded.created_at, Timestamp(0));
        assert!(decoded.media.is_empty());
        assert!(decoded.reply_to.is_none());
    }

    #[test]
    fn legacy_flat_media_decodes_to_one_attachment() {
        let decoded = record(json!({
            "senderId": "alice",
            "createdAt": 1000,
            "mediaType": "image",
            "mediaURL": "https://x/y.jpg",
            "mediaWidth": 800,
            "mediaHeight": 600,
        }))
        .decode();

        assert_eq!(decoded.media.len(), 1);
        let media = &decoded.media[0];
        assert_eq!(media.kind, MediaKind::Image);
        assert_eq!(media.remote_url, "https://x/y.jpg");
        assert_eq!((media.width, media.height), (800, 600));
        assert_eq!(media.duration, None);
    }

    #[test]
    fn structured_attachments_take_precedence_over_legacy() {
        let decoded = record(json!({
            "attachments": [
                {"type": "video", "url": "https://x/v.mp4", "thumbnailURL": "https://x/t.jpg",
                 "width": 1920, "height": 1080, "duration": 12.5},
            ],
            "mediaType": "image",
            "mediaURL": "https://x/ignored.jpg",
        }))
        .decode();

        assert_eq!(decoded.media.len(), 1);
        assert_eq!(decoded.media[0].kind, MediaKind::Video);
        assert_eq!(decoded.media[0].remote_url, "https://x/v.mp4");
        assert_eq!(decoded.media[0].duration, Some(12.5));
    }

    #[test]
    fn empty_attachments_list_falls_back_to_legacy() {
        let decoded = record(json!({
            "attachments": [],
            "mediaType": "audio",
            "mediaURL": "https://x/a.ogg",
            "mediaDuration": "3.5",
        }))
        .decode();

        assert_eq!(decoded.media.len(), 1);
        assert_eq!(decoded.media[0].kind, MediaKind::Audio);
        assert_eq!(decoded.media[0].duration, Some(3.5));
    }

    #[test]
    fn numeric_fields_accept_strings_and_numbers() {
        let decoded = record(json!({
            "createdAt": "1699999999999",
            "mediaType": "image",
            "mediaURL": "https://x/y.jpg",
            "mediaWidth": "800",
            "mediaHeight": 600,
        }))
        .decode();

        assert_eq!(decoded.created_at, Timestamp(1_699_999_999_999));
        assert_eq!((decoded.media[0].width, decoded.media[0].height), (800, 600));
    }

    #[test]
    fn unknown_attachment_kinds_are_dropped_not_errors() {
        let decoded = record(json!({
            "attachments": [
                {"type": "sticker", "url": "https://x/s.webp"},
                {"type": "image", "url": "https://x/y.jpg"},
            ],
        }))
        .decode();

        assert_eq!(decoded.media.len(), 1);
        assert_eq!(decoded.media[0].kind, MediaKind::Image);
    }

    #[test]
    fn reply_fields_decode_without_text() {
        let decoded = record(json!({
            "replyToMessageId": "msg-9",
            "replyToSenderId": "bob",
            "replyToSenderName": "Bob",
            "replyToMediaType": "video",
        }))
        .decode();

        let reply = decoded.reply_to.unwrap();
        assert_eq!(reply.message_id, MessageId("msg-9".into()));
        assert_eq!(reply.sender_id, UserId("bob".into()));
        assert_eq!(reply.media_kind, Some(MediaKind::Video));
        assert_eq!(reply.text, None);
    }

    #[test]
    fn empty_reply_id_means_no_reply() {
        let decoded = record(json!({"replyToMessageId": ""})).decode();
        assert!(decoded.reply_to.is_none());
    }

    #[test]
    fn encode_emits_structured_shape_and_never_reply_text() {
        let outgoing = OutgoingRecord {
            sender_id: UserId("alice".into()),
            envelope: "b64envelope".into(),
            client_message_id: ClientMessageId("c-1".into()),
            media: vec![MediaAttachment::image("https://x/y.jpg", 800, 600)],
            reply_to: Some(ReplyPreview {
                message_id: MessageId("msg-9".into()),
                sender_id: UserId("bob".into()),
                sender_name: "Bob".into(),
                text: Some("must not be persisted".into()),
                media_kind: None,
            }),
        };

        let wire = outgoing.encode();
        assert!(wire.0.get("attachments").is_some());
        assert!(wire.0.get("mediaType").is_none());
        assert!(wire.0.get("replyToText").is_none());
        assert_eq!(wire.0.get("replyToMessageId"), Some(&json!("msg-9")));

        // And the encoded record decodes back to the same canonical media
        let decoded = wire.decode();
        assert_eq!(decoded.media, outgoing.media);
        assert_eq!(decoded.reply_to.unwrap().text, None);
    }

    #[test]
    fn malformed_fields_degrade_to_defaults() {
        let decoded = record(json!({
            "senderId": 42,
            "text": ["not", "a", "string"],
            "createdAt": {"nested": true},
            "mediaWidth": "not-a-number",
        }))
        .decode();

        assert_eq!(decoded.sender_id, UserId(String::new()));
        assert_eq!(decoded.envelope, "");
        assert_eq!(decoded.created_at, Timestamp(0));
    }
}
