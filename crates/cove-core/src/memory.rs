//! In-memory service fakes.
//!
//! Deterministic stand-ins for the directory and message store, used by the
//! integration tests and by hosts that want an offline mode. Clones share
//! state via `Arc`, so one instance can play "server" for several sessions.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use cove_proto::{MessageId, ThreadId, ThreadSummary, Timestamp, UserId, WireRecord};
use tokio::sync::{mpsc, watch};

use crate::{
    error::{DirectoryError, StoreError},
    receipts::ReceiptSets,
    services::{DirectoryService, FeedReceiver, MessageStore, ReceiptField, ReceiptReceiver},
};

/// In-memory key-value directory of published public keys.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    keys: Arc<Mutex<HashMap<UserId, String>>>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a published key without going through the trait.
    pub fn set(&self, user_id: UserId, key_base64: impl Into<String>) {
        if let Ok(mut keys) = self.keys.lock() {
            keys.insert(user_id, key_base64.into());
        }
    }
}

#[async_trait]
impl DirectoryService for MemoryDirectory {
    async fn public_key(&self, user_id: &UserId) -> Result<Option<String>, DirectoryError> {
        let keys =
            self.keys.lock().map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        Ok(keys.get(user_id).cloned())
    }

    async fn publish_public_key(
        &self,
        user_id: &UserId,
        key_base64: &str,
    ) -> Result<(), DirectoryError> {
        let mut keys =
            self.keys.lock().map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        keys.insert(user_id.clone(), key_base64.to_string());
        Ok(())
    }
}

struct FeedSubscriber {
    sender: mpsc::UnboundedSender<Vec<WireRecord>>,
    limit: usize,
}

#[derive(Default)]
struct StoreInner {
    records: HashMap<ThreadId, Vec<WireRecord>>,
    receipts: HashMap<(ThreadId, MessageId), ReceiptSets>,
    feeds: HashMap<ThreadId, Vec<FeedSubscriber>>,
    receipt_watchers: HashMap<(ThreadId, MessageId), Vec<watch::Sender<ReceiptSets>>>,
    threads: HashMap<ThreadId, ThreadSummary>,
    next_id: u64,
    clock: i64,
    fail_appends: bool,
}

impl StoreInner {
    fn broadcast(&mut self, thread_id: &ThreadId) {
        let Some(subscribers) = self.feeds.get_mut(thread_id) else {
            return;
        };
        let records = self.records.get(thread_id).cloned().unwrap_or_default();
        // Dropped receivers fall out of the list here
        subscribers.retain(|subscriber| {
            let start = records.len().saturating_sub(subscriber.limit);
            subscriber.sender.send(records[start..].to_vec()).is_ok()
        });
    }
}

/// In-memory message store with live feeds.
///
/// `append` assigns the server id and a strictly-increasing timestamp, then
/// rebroadcasts the (capped) snapshot, matching the live-update contract of
/// the production backend.
#[derive(Clone, Default)]
pub struct MemoryMessageStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryMessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `append` fail, for exercising send-failure
    /// paths.
    pub fn set_fail_appends(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_appends = fail;
        }
    }

    /// Records currently persisted for a thread.
    pub fn records(&self, thread_id: &ThreadId) -> Vec<WireRecord> {
        self.inner
            .lock()
            .map(|inner| inner.records.get(thread_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// The stored summary for a thread, if any.
    pub fn thread(&self, thread_id: &ThreadId) -> Option<ThreadSummary> {
        self.inner.lock().ok().and_then(|inner| inner.threads.get(thread_id).cloned())
    }

    /// Receipt sets currently stored for a message.
    pub fn receipt_sets(&self, thread_id: &ThreadId, message_id: &MessageId) -> ReceiptSets {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .receipts
                    .get(&(thread_id.clone(), message_id.clone()))
                    .cloned()
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>, StoreError> {
        self.inner.lock().map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, thread_id: &ThreadId, record: WireRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.fail_appends {
            return Err(StoreError::Unavailable("append rejected".to_string()));
        }

        inner.next_id += 1;
        inner.clock += 1;
        let id = MessageId(format!("m-{}", inner.next_id));
        let at = Timestamp(inner.clock);

        let mut record = record;
        record.set_id(&id);
        record.set_created_at(at);

        inner.records.entry(thread_id.clone()).or_default().push(record);
        inner.broadcast(thread_id);
        Ok(())
    }

    async fn subscribe(
        &self,
        thread_id: &ThreadId,
        limit: usize,
    ) -> Result<FeedReceiver, StoreError> {
        let mut inner = self.lock()?;
        let (sender, receiver) = mpsc::unbounded_channel();

        inner.feeds.entry(thread_id.clone()).or_default().push(FeedSubscriber { sender, limit });
        inner.broadcast(thread_id);
        Ok(receiver)
    }

    async fn update_receipt(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
        field: ReceiptField,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let key = (thread_id.clone(), message_id.clone());

        let sets = inner.receipts.entry(key.clone()).or_default();
        let grew = match field {
            ReceiptField::DeliveredTo => sets.delivered_to.insert(user_id.clone()),
            ReceiptField::ReadBy => sets.read_by.insert(user_id.clone()),
        };
        let snapshot = sets.clone();

        if grew && let Some(watchers) = inner.receipt_watchers.get_mut(&key) {
            watchers.retain(|w| w.send(snapshot.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe_receipt(
        &self,
        thread_id: &ThreadId,
        message_id: &MessageId,
    ) -> Result<ReceiptReceiver, StoreError> {
        let mut inner = self.lock()?;
        let key = (thread_id.clone(), message_id.clone());
        let current = inner.receipts.get(&key).cloned().unwrap_or_default();

        let (sender, receiver) = watch::channel(current);
        inner.receipt_watchers.entry(key).or_default().push(sender);
        Ok(receiver)
    }

    async fn upsert_thread(&self, summary: &ThreadSummary) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        match inner.threads.get_mut(&summary.id) {
            // Refresh activity fields; never destructively overwrite
            Some(existing) => {
                existing.last_message_preview = summary.last_message_preview.clone();
                existing.updated_at = summary.updated_at;
            },
            None => {
                inner.threads.insert(summary.id.clone(), summary.clone());
            },
        }
        Ok(())
    }
}
