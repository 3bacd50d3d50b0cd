//! External collaborator interfaces.
//!
//! The core consumes two services it does not implement: a directory for
//! public key lookup and a message store for threaded persistence with live
//! updates. Both are consumed through traits so tests and hosts can inject
//! their own backends; in-memory fakes live in [`crate::memory`].

use async_trait::async_trait;
use cove_proto::{MessageId, ThreadId, ThreadSummary, UserId, WireRecord};
use tokio::sync::{mpsc, watch};

use crate::{
    error::{DirectoryError, StoreError},
    receipts::ReceiptSets,
};

/// Which receipt set an update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptField {
    /// The message reached the user's device.
    DeliveredTo,
    /// The user saw the message.
    ReadBy,
}

/// Live feed of confirmed records for a thread.
///
/// Each item is a full snapshot, ascending by creation time, capped to the
/// subscription's record limit.
pub type FeedReceiver = mpsc::UnboundedReceiver<Vec<WireRecord>>;

/// Live per-message receipt state.
pub type ReceiptReceiver = watch::Receiver<ReceiptSets>;

/// Key-value lookup of a user's published public key.
#[async_trait]
pub trait DirectoryService: Send + Sync + 'static {
    /// The user's published public key (base64), or `None` if never
    /// published.
    async fn public_key(&self, user_id: &UserId) -> Result<Option<String>, DirectoryError>;

    /// Publish (or overwrite) the user's public key.
    ///
    /// Called when the device's current key differs from the directory copy,
    /// which detects key regeneration and reinstalls.
    async fn publish_public_key(
        &self,
        user_id: &UserId,
        key_base64: &str,
    ) -> Result<(), DirectoryError>;
}

/// Threaded message persistence with live change notification.
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Append a record to a thread. The store assigns the server id and
    /// timestamp and rebroadcasts to live subscriptions.
    async fn append(&self, thread_id: &ThreadId, record: WireRecord) -> Result<(), StoreError>;

    /// Subscribe to the thread's confirmed records.
    ///
    /// Delivers the current snapshot immediately, then a new snapshot after
    /// every append, each capped to the most recent `limit` records.
    /// Multiple concurrent subscriptions are allowed; each client holds at
    /// most one per thread and drops it when the thread view closes.
    async fn subscribe(
        &self,
        thread_id: &ThreadId,
        limit: usize,
    ) -> Result<FeedReceiver, StoreError>;

    /// Idempotent set-union receipt update.
    async fn update_receipt(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
        field: ReceiptField,
        user_id: &UserId,
    ) -> Result<(), StoreError>;

    /// Subscribe to a single message's receipt sets.
    async fn subscribe_receipt(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
    ) -> Result<ReceiptReceiver, StoreError>;

    /// Idempotently create or refresh the thread summary row.
    async fn upsert_thread(&self, summary: &ThreadSummary) -> Result<(), StoreError>;
}
