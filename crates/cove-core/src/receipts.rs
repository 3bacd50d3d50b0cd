//! Delivery and read receipt tracking.
//!
//! Receipt sets only ever grow. Updates from the store are merged by set
//! union, so replays and out-of-order deliveries are harmless. Status
//! derivation treats read as implying delivered even when the raw delivered
//! set has not caught up.

use std::collections::{BTreeSet, HashMap};

use cove_proto::{MessageId, UserId};

/// Effective delivery status of an outgoing message, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeliveryStatus {
    /// Still a local optimistic entity; not yet confirmed by the store.
    Pending,
    /// Confirmed, but the peer appears in neither receipt set.
    Sent,
    /// The peer's device has received the message.
    Delivered,
    /// The peer has seen the message.
    Read,
}

/// Monotonically-growing receipt sets for one message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiptSets {
    /// Users the message has been delivered to.
    pub delivered_to: BTreeSet<UserId>,
    /// Users who have read the message.
    pub read_by: BTreeSet<UserId>,
}

impl ReceiptSets {
    /// Union `other` into `self`. Returns `true` if anything grew.
    ///
    /// Sets never shrink: an update that is a subset of current state is a
    /// no-op.
    pub fn merge(&mut self, other: &ReceiptSets) -> bool {
        let before = (self.delivered_to.len(), self.read_by.len());
        self.delivered_to.extend(other.delivered_to.iter().cloned());
        self.read_by.extend(other.read_by.iter().cloned());
        before != (self.delivered_to.len(), self.read_by.len())
    }
}

/// Tracks receipt state for the outgoing messages of one thread session.
#[derive(Debug)]
pub struct ReceiptTracker {
    peer_id: UserId,
    states: HashMap<MessageId, ReceiptSets>,
}

impl ReceiptTracker {
    /// Create a tracker for a two-party thread with the given peer.
    pub fn new(peer_id: UserId) -> Self {
        Self { peer_id, states: HashMap::new() }
    }

    /// Merge a receipt update for a message. Returns `true` if state grew.
    pub fn apply(&mut self, message_id: &MessageId, update: &ReceiptSets) -> bool {
        self.states.entry(message_id.clone()).or_default().merge(update)
    }

    /// Receipt sets currently known for a message.
    pub fn sets(&self, message_id: &MessageId) -> Option<&ReceiptSets> {
        self.states.get(message_id)
    }

    /// Effective delivery status of a confirmed outgoing message.
    ///
    /// Read implies delivered: a peer in `read_by` yields
    /// [`DeliveryStatus::Read`] regardless of the raw delivered set.
    pub fn status(&self, message_id: &MessageId) -> DeliveryStatus {
        let Some(sets) = self.states.get(message_id) else {
            return DeliveryStatus::Sent;
        };
        if sets.read_by.contains(&self.peer_id) {
            DeliveryStatus::Read
        } else if sets.delivered_to.contains(&self.peer_id) {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Sent
        }
    }
}
