//! Timeline reconciliation.
//!
//! Merges three sources of truth into one ordered, de-duplicated timeline:
//! locally-staged optimistic sends, the store's confirmed snapshots, and the
//! decrypted text cache used to resolve reply previews.
//!
//! This is a pure single-writer state machine: no I/O, no locks. The session
//! runtime serializes all mutation onto it, which keeps reconciliation
//! passes from interleaving.
//!
//! Ordering rule: confirmed entities sort by server timestamp (authoritative,
//! ties broken by server id); pending entities follow all confirmed ones in
//! local-creation order with ties broken by local id, since they have no
//! server timestamp yet.

use std::collections::{HashMap, HashSet};

use cove_proto::{
    ClientMessageId, MediaAttachment, MessageBody, MessageEntity, MessageId, ReplyPreview,
    Timestamp, UserId,
};

/// Handle to a staged optimistic send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingHandle {
    /// Local id of the pending entity, used to abort on send failure.
    pub local_id: u64,
    /// Client-assigned id the confirmed record will echo back.
    pub client_message_id: ClientMessageId,
}

/// Whether a timeline entry is still optimistic or confirmed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Local-only optimistic entity.
    Pending {
        /// Local id of the pending entity.
        local_id: u64,
    },
    /// Present in the store feed.
    Confirmed,
}

/// One visible timeline entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    /// The message.
    pub entity: MessageEntity,
    /// Pending or confirmed.
    pub state: EntryState,
}

#[derive(Debug, Clone)]
struct PendingMessage {
    local_id: u64,
    entity: MessageEntity,
}

/// The reconciliation engine for one open thread.
#[derive(Debug, Default)]
pub struct Timeline {
    confirmed: Vec<MessageEntity>,
    pending: Vec<PendingMessage>,
    /// Incremental `id -> decrypted text` index for reply resolution.
    /// Retains texts across feed updates so referents that scroll out of the
    /// subscription window keep resolving.
    text_by_id: HashMap<MessageId, String>,
    next_local_id: u64,
}

impl Timeline {
    /// Create an empty timeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an optimistic send at the tail of the timeline.
    ///
    /// The entity becomes visible immediately, before any network work. It is
    /// superseded when a confirmed record with the same `client_message_id`
    /// arrives, or removed by [`Timeline::abort_send`] on send failure.
    pub fn stage_send(
        &mut self,
        client_message_id: ClientMessageId,
        sender_id: UserId,
        text: String,
        media: Vec<MediaAttachment>,
        reply_to: Option<ReplyPreview>,
        staged_at: Timestamp,
    ) -> PendingHandle {
        let local_id = self.next_local_id;
        self.next_local_id += 1;

        let mut reply_to = reply_to;
        if let Some(reply) = reply_to.as_mut() {
            self.resolve_reply(reply);
        }

        let entity = MessageEntity {
            id: MessageId(format!("local-{local_id}")),
            client_message_id: client_message_id.clone(),
            sender_id,
            body: MessageBody::Plaintext(text),
            created_at: staged_at,
            media,
            delivered_to: std::collections::BTreeSet::new(),
            read_by: std::collections::BTreeSet::new(),
            reply_to,
        };

        self.pending.push(PendingMessage { local_id, entity });
        self.pending.sort_by(|a, b| {
            (a.entity.created_at, a.local_id).cmp(&(b.entity.created_at, b.local_id))
        });

        PendingHandle { local_id, client_message_id }
    }

    /// Remove a pending entity after its network send failed.
    ///
    /// Returns the removed entity (dropping it discards any staged
    /// attachment bytes), or `None` if it was already confirmed or aborted.
    pub fn abort_send(&mut self, local_id: u64) -> Option<MessageEntity> {
        let index = self.pending.iter().position(|p| p.local_id == local_id)?;
        Some(self.pending.remove(index).entity)
    }

    /// Apply a confirmed, already-decrypted snapshot from the store feed.
    ///
    /// - Confirmed entities replace the previous confirmed set, ordered by
    ///   server timestamp.
    /// - Every pending entity whose `client_message_id` appears among the
    ///   confirmed records is removed: the confirmed version supersedes it.
    /// - Reply previews lacking text are re-resolved against the text index;
    ///   referents may arrive after the messages that quote them.
    pub fn apply_feed(&mut self, mut batch: Vec<MessageEntity>) {
        batch.sort_by(|a, b| (a.created_at, a.id.clone()).cmp(&(b.created_at, b.id.clone())));

        // Defensive: a snapshot should never carry two records for the same
        // client message id, but if it does, keep the earliest
        let mut seen = HashSet::new();
        batch.retain(|entity| {
            entity.client_message_id.0.is_empty() || seen.insert(entity.client_message_id.clone())
        });

        for entity in &batch {
            if let (false, Some(text)) = (entity.id.0.is_empty(), entity.body.text()) {
                self.text_by_id.insert(entity.id.clone(), text.to_string());
            }
        }

        let confirmed_client_ids: HashSet<&ClientMessageId> =
            batch.iter().filter(|e| !e.client_message_id.0.is_empty()).map(|e| &e.client_message_id).collect();
        self.pending.retain(|p| !confirmed_client_ids.contains(&p.entity.client_message_id));

        self.confirmed = batch;

        let index = &self.text_by_id;
        for entity in self.confirmed.iter_mut().chain(self.pending.iter_mut().map(|p| &mut p.entity)) {
            if let Some(reply) = entity.reply_to.as_mut()
                && reply.text.is_none()
                && let Some(text) = index.get(&reply.message_id)
            {
                reply.text = Some(text.clone());
            }
        }

        tracing::debug!(
            confirmed = self.confirmed.len(),
            pending = self.pending.len(),
            "reconciliation pass applied"
        );
    }

    /// The visible timeline: confirmed entities first, then pending.
    ///
    /// At most one entry per `client_message_id` is ever visible: either its
    /// pending form or its confirmed form, never both.
    pub fn entries(&self) -> Vec<TimelineEntry> {
        self.confirmed
            .iter()
            .map(|entity| TimelineEntry { entity: entity.clone(), state: EntryState::Confirmed })
            .chain(self.pending.iter().map(|p| TimelineEntry {
                entity: p.entity.clone(),
                state: EntryState::Pending { local_id: p.local_id },
            }))
            .collect()
    }

    /// Confirmed entities currently in the timeline.
    pub fn confirmed(&self) -> &[MessageEntity] {
        &self.confirmed
    }

    /// Number of pending (unconfirmed) entities.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn resolve_reply(&self, reply: &mut ReplyPreview) {
        if reply.text.is_none()
            && let Some(text) = self.text_by_id.get(&reply.message_id)
        {
            reply.text = Some(text.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn confirmed(id: &str, client_id: &str, sender: &str, text: &str, at: i64) -> MessageEntity {
        MessageEntity {
            id: MessageId(id.into()),
            client_message_id: ClientMessageId(client_id.into()),
            sender_id: UserId(sender.into()),
            body: MessageBody::Plaintext(text.into()),
            created_at: Timestamp(at),
            media: Vec::new(),
            delivered_to: BTreeSet::new(),
            read_by: BTreeSet::new(),
            reply_to: None,
        }
    }

    fn stage(timeline: &mut Timeline, client_id: &str, text: &str, at: i64) -> PendingHandle {
        timeline.stage_send(
            ClientMessageId(client_id.into()),
            UserId("alice".into()),
            text.into(),
            Vec::new(),
            None,
            Timestamp(at),
        )
    }

    #[test]
    fn staged_send_is_visible_immediately() {
        let mut timeline = Timeline::new();
        stage(&mut timeline, "c-1", "hello", 100);

        let entries = timeline.entries();
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0].state, EntryState::Pending { .. }));
        assert_eq!(entries[0].entity.body.text(), Some("hello"));
    }

    #[test]
    fn confirmation_supersedes_pending_exactly_once() {
        let mut timeline = Timeline::new();
        stage(&mut timeline, "c-1", "hello", 100);

        timeline.apply_feed(vec![confirmed("m-1", "c-1", "alice", "hello", 105)]);

        // Never zero, never two
        let entries = timeline.entries();
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0].state, EntryState::Confirmed));
        assert_eq!(entries[0].entity.id, MessageId("m-1".into()));
        assert_eq!(timeline.pending_len(), 0);
    }

    #[test]
    fn unmatched_pending_stays_displayed() {
        let mut timeline = Timeline::new();
        stage(&mut timeline, "c-1", "first", 100);
        stage(&mut timeline, "c-2", "second", 101);

        // Only the first send is confirmed so far
        timeline.apply_feed(vec![confirmed("m-1", "c-1", "alice", "first", 105)]);

        let entries = timeline.entries();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0].state, EntryState::Confirmed));
        assert!(matches!(entries[1].state, EntryState::Pending { .. }));
        assert_eq!(entries[1].entity.body.text(), Some("second"));
    }

    #[test]
    fn pending_entities_sort_after_confirmed_by_local_creation() {
        let mut timeline = Timeline::new();
        stage(&mut timeline, "c-2", "later pending", 200);
        stage(&mut timeline, "c-1", "earlier pending", 150);

        timeline.apply_feed(vec![
            // Confirmed record with a later timestamp than both pendings
            confirmed("m-9", "x-9", "bob", "confirmed", 500),
        ]);

        let entries = timeline.entries();
        let texts: Vec<_> = entries.iter().filter_map(|e| e.entity.body.text()).collect();
        assert_eq!(texts, vec!["confirmed", "earlier pending", "later pending"]);
    }

    #[test]
    fn pending_ties_break_by_local_id() {
        let mut timeline = Timeline::new();
        let first = stage(&mut timeline, "c-1", "first", 100);
        let second = stage(&mut timeline, "c-2", "second", 100);
        assert!(first.local_id < second.local_id);

        let entries = timeline.entries();
        let texts: Vec<_> = entries.iter().filter_map(|e| e.entity.body.text()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn confirmed_order_follows_server_timestamps() {
        let mut timeline = Timeline::new();
        timeline.apply_feed(vec![
            confirmed("m-2", "c-2", "bob", "second", 200),
            confirmed("m-1", "c-1", "alice", "first", 100),
        ]);

        let texts: Vec<_> =
            timeline.entries().iter().filter_map(|e| e.entity.body.text().map(String::from)).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn abort_send_removes_the_pending_entity() {
        let mut timeline = Timeline::new();
        let handle = stage(&mut timeline, "c-1", "doomed", 100);

        let removed = timeline.abort_send(handle.local_id);
        assert!(removed.is_some());
        assert!(timeline.entries().is_empty());

        // Second abort is a no-op
        assert!(timeline.abort_send(handle.local_id).is_none());
    }

    #[test]
    fn abort_after_confirmation_is_a_noop() {
        let mut timeline = Timeline::new();
        let handle = stage(&mut timeline, "c-1", "hello", 100);
        timeline.apply_feed(vec![confirmed("m-1", "c-1", "alice", "hello", 105)]);

        assert!(timeline.abort_send(handle.local_id).is_none());
        assert_eq!(timeline.entries().len(), 1);
    }

    #[test]
    fn reply_text_resolves_once_the_referent_arrives() {
        let mut timeline = Timeline::new();

        // A reply referencing a message not yet loaded
        let mut replying = confirmed("m-2", "c-2", "bob", "what he said", 200);
        replying.reply_to = Some(ReplyPreview {
            message_id: MessageId("m-1".into()),
            sender_id: UserId("alice".into()),
            sender_name: "Alice".into(),
            text: None,
            media_kind: None,
        });

        timeline.apply_feed(vec![replying.clone()]);
        let entries = timeline.entries();
        assert_eq!(entries[0].entity.reply_to.as_ref().unwrap().text, None);

        // The referenced message appears in a later feed update
        timeline.apply_feed(vec![
            confirmed("m-1", "c-1", "alice", "original text", 100),
            replying,
        ]);

        let entries = timeline.entries();
        let reply = entries[1].entity.reply_to.as_ref().unwrap();
        assert_eq!(reply.text.as_deref(), Some("original text"));
    }

    #[test]
    fn reply_referent_surviving_only_in_the_index_still_resolves() {
        let mut timeline = Timeline::new();
        timeline.apply_feed(vec![confirmed("m-1", "c-1", "alice", "original text", 100)]);

        // The referent scrolls out of the subscription window
        let mut replying = confirmed("m-2", "c-2", "bob", "quoting", 200);
        replying.reply_to = Some(ReplyPreview {
            message_id: MessageId("m-1".into()),
            sender_id: UserId("alice".into()),
            sender_name: "Alice".into(),
            text: None,
            media_kind: None,
        });
        timeline.apply_feed(vec![replying]);

        let entries = timeline.entries();
        assert_eq!(entries[0].entity.reply_to.as_ref().unwrap().text.as_deref(), Some("original text"));
    }

    #[test]
    fn staged_reply_resolves_from_loaded_timeline() {
        let mut timeline = Timeline::new();
        timeline.apply_feed(vec![confirmed("m-1", "c-1", "bob", "quote me", 100)]);

        timeline.stage_send(
            ClientMessageId("c-2".into()),
            UserId("alice".into()),
            "replying".into(),
            Vec::new(),
            Some(ReplyPreview {
                message_id: MessageId("m-1".into()),
                sender_id: UserId("bob".into()),
                sender_name: "Bob".into(),
                text: None,
                media_kind: None,
            }),
            Timestamp(200),
        );

        let entries = timeline.entries();
        assert_eq!(entries[1].entity.reply_to.as_ref().unwrap().text.as_deref(), Some("quote me"));
    }

    #[test]
    fn undecryptable_bodies_never_feed_the_reply_index() {
        let mut timeline = Timeline::new();
        let mut broken = confirmed("m-1", "c-1", "bob", "", 100);
        broken.body = MessageBody::Undecryptable;

        let mut replying = confirmed("m-2", "c-2", "alice", "re", 200);
        replying.reply_to = Some(ReplyPreview {
            message_id: MessageId("m-1".into()),
            sender_id: UserId("bob".into()),
            sender_name: "Bob".into(),
            text: None,
            media_kind: None,
        });

        timeline.apply_feed(vec![broken, replying]);
        let entries = timeline.entries();
        assert_eq!(entries[1].entity.reply_to.as_ref().unwrap().text, None);
    }

    #[test]
    fn records_without_client_ids_never_match_pending() {
        let mut timeline = Timeline::new();
        stage(&mut timeline, "", "pending with empty client id", 100);

        timeline.apply_feed(vec![confirmed("m-1", "", "bob", "foreign record", 50)]);

        // Both stay visible: empty client ids are not identity
        assert_eq!(timeline.entries().len(), 2);
    }
}
