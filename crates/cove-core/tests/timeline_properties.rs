//! Property tests for timeline reconciliation.

use std::collections::{BTreeSet, HashSet};

use cove_core::timeline::{EntryState, Timeline};
use cove_proto::{
    ClientMessageId, MessageBody, MessageEntity, MessageId, Timestamp, UserId,
};
use proptest::prelude::*;

fn confirmed(id: u32, client: u32, at: i64) -> MessageEntity {
    MessageEntity {
        id: MessageId(format!("m-{id}")),
        client_message_id: ClientMessageId(format!("c-{client}")),
        sender_id: UserId("alice".into()),
        body: MessageBody::Plaintext(format!("msg {id}")),
        created_at: Timestamp(at),
        media: Vec::new(),
        delivered_to: BTreeSet::new(),
        read_by: BTreeSet::new(),
        reply_to: None,
    }
}

/// An arbitrary confirmed batch: server ids unique, client ids and
/// timestamps free to collide.
fn batch_strategy() -> impl Strategy<Value = Vec<MessageEntity>> {
    prop::collection::vec((0u32..64, 0i64..16), 0..24).prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(n, (client, at))| confirmed(n as u32, client, at))
            .collect()
    })
}

proptest! {
    /// Confirmed output is always sorted by (created_at, id), with pending
    /// entries after every confirmed one.
    #[test]
    fn entries_are_ordered(batch in batch_strategy(), shuffle_seed in any::<u64>()) {
        let mut batch = batch;
        // Deterministic shuffle: reconciliation must not rely on arrival order
        let len = batch.len();
        if len > 1 {
            for i in 0..len {
                let j = (shuffle_seed as usize).wrapping_mul(i + 1) % len;
                batch.swap(i, j);
            }
        }

        let mut timeline = Timeline::new();
        timeline.stage_send(
            ClientMessageId("pending-1".into()),
            UserId("alice".into()),
            "draft".into(),
            Vec::new(),
            None,
            Timestamp(0),
        );
        timeline.apply_feed(batch);

        let entries = timeline.entries();
        let mut saw_pending = false;
        let mut last_key: Option<(Timestamp, String)> = None;
        for entry in &entries {
            match entry.state {
                EntryState::Pending { .. } => saw_pending = true,
                EntryState::Confirmed => {
                    prop_assert!(!saw_pending, "confirmed entry after a pending one");
                    let key = (entry.entity.created_at, entry.entity.id.0.clone());
                    if let Some(prev) = &last_key {
                        prop_assert!(prev <= &key, "confirmed entries out of order");
                    }
                    last_key = Some(key);
                },
            }
        }
    }

    /// No two entries ever share a non-empty client message id.
    #[test]
    fn client_ids_are_unique(batch in batch_strategy()) {
        let mut timeline = Timeline::new();
        // Pending sends that collide with confirmed client ids must be
        // superseded, not duplicated
        for client in 0u32..8 {
            timeline.stage_send(
                ClientMessageId(format!("c-{client}")),
                UserId("alice".into()),
                "draft".into(),
                Vec::new(),
                None,
                Timestamp(0),
            );
        }
        timeline.apply_feed(batch);

        let mut seen = HashSet::new();
        for entry in timeline.entries() {
            let client = entry.entity.client_message_id.0.clone();
            if !client.is_empty() {
                prop_assert!(seen.insert(client), "duplicate client message id");
            }
        }
    }

    /// Reapplying the same confirmed snapshot is a no-op.
    #[test]
    fn apply_feed_is_idempotent(batch in batch_strategy()) {
        let mut timeline = Timeline::new();
        timeline.apply_feed(batch.clone());
        let first = timeline.entries();

        timeline.apply_feed(batch);
        prop_assert_eq!(first, timeline.entries());
    }
}
