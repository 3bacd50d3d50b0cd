//! Thread session runtime.
//!
//! A [`ThreadSession`] is the single owner of one open two-party thread. It
//! fetches the peer's public key once at open time and caches it for the
//! session's lifetime, pumps the store's live feed through decryption and
//! reconciliation, watches receipts for outgoing messages, and publishes
//! timeline snapshots over a `watch` channel for the UI.
//!
//! All timeline mutation is serialized through one async mutex, so
//! reconciliation passes never interleave. Sends are optimistic: the pending
//! entity is visible before any network work, and a send that is past that
//! point keeps running even if the session is closed.

use std::{
    collections::HashSet,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use cove_crypto::CryptoEngine;
use cove_proto::{
    ClientMessageId, MediaAttachment, MessageBody, MessageEntity, MessageId, OutgoingRecord,
    ReplyPreview, ThreadId, ThreadSummary, Timestamp, UserId, WireRecord,
};
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};

use crate::{
    error::{SendError, SessionError},
    receipts::{DeliveryStatus, ReceiptTracker},
    services::{DirectoryService, FeedReceiver, MessageStore, ReceiptField},
    timeline::{EntryState, PendingHandle, Timeline, TimelineEntry},
};

/// Preview text stored on the thread summary. Deliberately not the message
/// plaintext: text stays encrypted at rest.
const THREAD_PREVIEW: &str = "New message";

/// A timeline entry paired with its display status.
///
/// `status` is `Some` only for self-authored messages; incoming messages
/// have no delivery status to display.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotItem {
    /// The timeline entry.
    pub entry: TimelineEntry,
    /// Delivery status for outgoing messages.
    pub status: Option<DeliveryStatus>,
}

/// Out-of-band session notifications.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A send failed after its optimistic insert; the pending entity has
    /// been removed and the user should be offered a retry.
    SendFailed {
        /// Handle of the removed pending entity.
        handle: PendingHandle,
        /// What went wrong.
        error: SendError,
    },
}

struct SessionState {
    self_id: UserId,
    timeline: Timeline,
    receipts: ReceiptTracker,
    watched_receipts: HashSet<MessageId>,
    delivered_marked: HashSet<MessageId>,
    read_marked: HashSet<MessageId>,
}

impl SessionState {
    fn snapshot(&self) -> Vec<SnapshotItem> {
        self.timeline
            .entries()
            .into_iter()
            .map(|entry| {
                let status = (entry.entity.sender_id == self.self_id).then(|| match entry.state {
                    EntryState::Pending { .. } => DeliveryStatus::Pending,
                    EntryState::Confirmed => self.receipts.status(&entry.entity.id),
                });
                SnapshotItem { entry, status }
            })
            .collect()
    }
}

fn publish(state: &SessionState, tx: &watch::Sender<Vec<SnapshotItem>>) {
    // Nothing to do if every receiver is gone
    let _ = tx.send(state.snapshot());
}

/// One open two-party encrypted thread.
pub struct ThreadSession<S: MessageStore> {
    store: Arc<S>,
    self_id: UserId,
    peer_id: UserId,
    thread_id: ThreadId,
    peer_key: String,
    engine: CryptoEngine,
    state: Arc<Mutex<SessionState>>,
    snapshot_tx: watch::Sender<Vec<SnapshotItem>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    feed_task: Option<JoinHandle<()>>,
    watcher_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<S: MessageStore> ThreadSession<S> {
    /// Open a thread with `peer_id`.
    ///
    /// Ensures the device key pair exists, republishes the public key when
    /// the directory holds a stale copy (detecting regeneration and
    /// reinstalls), fetches the peer key once for the whole session, upserts
    /// the thread summary, and starts the live feed pump.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Key`] when the local trust root is broken.
    /// - [`SessionError::PeerKeyUnavailable`] when the peer never published
    ///   a key.
    /// - Directory and store failures pass through as typed errors.
    pub async fn open<D: DirectoryService>(
        directory: &D,
        store: Arc<S>,
        vault: &cove_crypto::KeyVault,
        self_id: UserId,
        peer_id: UserId,
        feed_limit: usize,
    ) -> Result<Self, SessionError> {
        let pair = vault.ensure_key_pair()?;
        let own_key = pair.public_key_base64();

        // Overwrite a stale directory record (fresh install, regenerated key)
        if directory.public_key(&self_id).await?.as_deref() != Some(own_key.as_str()) {
            directory.publish_public_key(&self_id, &own_key).await?;
            tracing::info!(user_id = %self_id, "published device public key");
        }

        let peer_key = directory
            .public_key(&peer_id)
            .await?
            .ok_or_else(|| SessionError::PeerKeyUnavailable { peer_id: peer_id.0.clone() })?;

        let thread_id = ThreadId::for_members(&self_id, &peer_id);
        store
            .upsert_thread(&ThreadSummary {
                id: thread_id.clone(),
                members: [self_id.clone(), peer_id.clone()],
                last_message_preview: String::new(),
                updated_at: Timestamp(now_millis()),
            })
            .await?;

        let feed = store.subscribe(&thread_id, feed_limit).await?;

        let state = Arc::new(Mutex::new(SessionState {
            self_id: self_id.clone(),
            timeline: Timeline::new(),
            receipts: ReceiptTracker::new(peer_id.clone()),
            watched_receipts: HashSet::new(),
            delivered_marked: HashSet::new(),
            read_marked: HashSet::new(),
        }));
        let (snapshot_tx, _) = watch::channel(Vec::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let watcher_tasks = Arc::new(Mutex::new(Vec::new()));

        let engine = CryptoEngine::new(pair);
        let pump = FeedPump {
            store: store.clone(),
            engine: engine.clone(),
            self_id: self_id.clone(),
            peer_id: peer_id.clone(),
            thread_id: thread_id.clone(),
            peer_key: peer_key.clone(),
            state: state.clone(),
            snapshot_tx: snapshot_tx.clone(),
            watcher_tasks: watcher_tasks.clone(),
        };
        let feed_task = tokio::spawn(pump.run(feed));

        Ok(Self {
            store,
            self_id,
            peer_id,
            thread_id,
            peer_key,
            engine,
            state,
            snapshot_tx,
            events_tx,
            events_rx: Some(events_rx),
            feed_task: Some(feed_task),
            watcher_tasks,
        })
    }

    /// Subscribe to timeline snapshots.
    pub fn watch_timeline(&self) -> watch::Receiver<Vec<SnapshotItem>> {
        self.snapshot_tx.subscribe()
    }

    /// Take the out-of-band event stream. Yields `None` on the second call.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.take()
    }

    /// The deterministic id of this thread.
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Stage and send a message.
    ///
    /// Returns as soon as the pending entity is visible; encryption and the
    /// store append continue in the background. On failure the pending
    /// entity is removed and a [`SessionEvent::SendFailed`] is emitted.
    pub async fn send(
        &self,
        plaintext: impl Into<String>,
        media: Vec<MediaAttachment>,
        reply_to: Option<ReplyPreview>,
    ) -> PendingHandle {
        let text: String = plaintext.into();
        let client_message_id = ClientMessageId(fresh_client_id());

        let handle = {
            let mut state = self.state.lock().await;
            let handle = state.timeline.stage_send(
                client_message_id,
                self.self_id.clone(),
                text.clone(),
                media.clone(),
                reply_to.clone(),
                Timestamp(now_millis()),
            );
            publish(&state, &self.snapshot_tx);
            handle
        };

        let store = self.store.clone();
        let engine = self.engine.clone();
        let peer_key = self.peer_key.clone();
        let thread_id = self.thread_id.clone();
        let members = [self.self_id.clone(), self.peer_id.clone()];
        let sender_id = self.self_id.clone();
        let state = self.state.clone();
        let snapshot_tx = self.snapshot_tx.clone();
        let events_tx = self.events_tx.clone();
        let task_handle = handle.clone();

        // Deliberately untracked: a send past the optimistic insert runs to
        // completion even if the session is closed meanwhile
        tokio::spawn(async move {
            let result = async {
                // Media-only messages carry an empty envelope
                let envelope = if text.is_empty() {
                    String::new()
                } else {
                    engine.encrypt(&text, &peer_key)?.to_base64()
                };

                let record = OutgoingRecord {
                    sender_id,
                    envelope,
                    client_message_id: task_handle.client_message_id.clone(),
                    media,
                    reply_to,
                }
                .encode();
                store.append(&thread_id, record).await?;
                Ok::<(), SendError>(())
            }
            .await;

            match result {
                Ok(()) => {
                    let summary = ThreadSummary {
                        id: thread_id.clone(),
                        members,
                        last_message_preview: THREAD_PREVIEW.to_string(),
                        updated_at: Timestamp(now_millis()),
                    };
                    if let Err(error) = store.upsert_thread(&summary).await {
                        tracing::warn!(%error, "thread summary refresh failed");
                    }
                },
                Err(error) => {
                    tracing::warn!(%error, client_message_id = %task_handle.client_message_id, "send failed");
                    let mut state = state.lock().await;
                    // Dropping the removed entity discards staged attachment
                    // bytes
                    if state.timeline.abort_send(task_handle.local_id).is_some() {
                        publish(&state, &snapshot_tx);
                    }
                    drop(state);
                    let _ = events_tx.send(SessionEvent::SendFailed { handle: task_handle, error });
                },
            }
        });

        handle
    }

    /// Mark currently-visible incoming messages as read.
    ///
    /// Fire-and-forget: failures are logged and never retried, and the
    /// writes are idempotent set unions on the store side.
    pub async fn mark_read(&self) {
        let targets = {
            let mut state = self.state.lock().await;
            let ids: Vec<MessageId> = state
                .timeline
                .confirmed()
                .iter()
                .filter(|m| m.sender_id != state.self_id && !m.id.0.is_empty())
                .map(|m| m.id.clone())
                .filter(|id| !state.read_marked.contains(id))
                .collect();
            state.read_marked.extend(ids.iter().cloned());
            ids
        };

        for message_id in targets {
            let store = self.store.clone();
            let thread_id = self.thread_id.clone();
            let self_id = self.self_id.clone();
            tokio::spawn(async move {
                if let Err(error) =
                    store.update_receipt(&thread_id, &message_id, ReceiptField::ReadBy, &self_id).await
                {
                    tracing::warn!(%error, %message_id, "read receipt write failed");
                }
            });
        }
    }

    /// Close the session: cancel the feed pump and every receipt watcher.
    ///
    /// Sends already past their optimistic insert keep running; their
    /// outcome is picked up if the thread is reopened.
    pub async fn close(&mut self) {
        if let Some(task) = self.feed_task.take() {
            task.abort();
        }
        let mut tasks = self.watcher_tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl<S: MessageStore> Drop for ThreadSession<S> {
    fn drop(&mut self) {
        if let Some(task) = self.feed_task.take() {
            task.abort();
        }
    }
}

/// Drives store feed snapshots through decryption and reconciliation.
struct FeedPump<S: MessageStore> {
    store: Arc<S>,
    engine: CryptoEngine,
    self_id: UserId,
    peer_id: UserId,
    thread_id: ThreadId,
    peer_key: String,
    state: Arc<Mutex<SessionState>>,
    snapshot_tx: watch::Sender<Vec<SnapshotItem>>,
    watcher_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<S: MessageStore> FeedPump<S> {
    async fn run(self, mut feed: FeedReceiver) {
        while let Some(records) = feed.recv().await {
            self.apply(records).await;
        }
        tracing::debug!(thread_id = %self.thread_id, "feed subscription ended");
    }

    /// One reconciliation pass over a confirmed snapshot.
    async fn apply(&self, records: Vec<WireRecord>) {
        let batch: Vec<MessageEntity> =
            records.iter().map(|record| self.decrypt_record(record)).collect();

        let (to_watch, to_mark) = {
            let mut state = self.state.lock().await;
            state.timeline.apply_feed(batch);

            let to_watch: Vec<MessageId> = state
                .timeline
                .confirmed()
                .iter()
                .filter(|m| m.sender_id == state.self_id && !m.id.0.is_empty())
                .map(|m| m.id.clone())
                .filter(|id| !state.watched_receipts.contains(id))
                .collect();
            state.watched_receipts.extend(to_watch.iter().cloned());

            let to_mark: Vec<MessageId> = state
                .timeline
                .confirmed()
                .iter()
                .filter(|m| m.sender_id == self.peer_id && !m.id.0.is_empty())
                .map(|m| m.id.clone())
                .filter(|id| !state.delivered_marked.contains(id))
                .collect();
            state.delivered_marked.extend(to_mark.iter().cloned());

            publish(&state, &self.snapshot_tx);
            (to_watch, to_mark)
        };

        for message_id in to_watch {
            self.spawn_receipt_watcher(message_id).await;
        }
        for message_id in to_mark {
            self.mark_delivered(message_id);
        }
    }

    /// Decode and decrypt one record into a timeline entity.
    ///
    /// A record that fails to decrypt stays visible as an explicit
    /// placeholder body rather than raw ciphertext or a dropped message.
    fn decrypt_record(&self, record: &WireRecord) -> MessageEntity {
        let decoded = record.decode();

        let body = if decoded.envelope.is_empty() {
            MessageBody::Plaintext(String::new())
        } else {
            match self.engine.decrypt(&decoded.envelope, &self.peer_key) {
                Ok(text) => MessageBody::Plaintext(text),
                Err(error) => {
                    tracing::warn!(%error, message_id = %decoded.id, "message failed to decrypt");
                    MessageBody::Undecryptable
                },
            }
        };

        MessageEntity {
            id: decoded.id,
            client_message_id: decoded.client_message_id,
            sender_id: decoded.sender_id,
            body,
            created_at: decoded.created_at,
            media: decoded.media,
            delivered_to: std::collections::BTreeSet::new(),
            read_by: std::collections::BTreeSet::new(),
            reply_to: decoded.reply_to,
        }
    }

    /// Watch the receipt record of one outgoing message for the session's
    /// lifetime.
    async fn spawn_receipt_watcher(&self, message_id: MessageId) {
        let mut receipt = match self.store.subscribe_receipt(&self.thread_id, &message_id).await {
            Ok(receiver) => receiver,
            Err(error) => {
                tracing::warn!(%error, %message_id, "receipt subscription failed");
                return;
            },
        };

        let state = self.state.clone();
        let snapshot_tx = self.snapshot_tx.clone();
        let task = tokio::spawn(async move {
            loop {
                let sets = receipt.borrow_and_update().clone();
                {
                    let mut state = state.lock().await;
                    if state.receipts.apply(&message_id, &sets) {
                        publish(&state, &snapshot_tx);
                    }
                }
                if receipt.changed().await.is_err() {
                    break;
                }
            }
        });
        self.watcher_tasks.lock().await.push(task);
    }

    /// Mark an incoming message delivered to this device. Best-effort.
    fn mark_delivered(&self, message_id: MessageId) {
        let store = self.store.clone();
        let thread_id = self.thread_id.clone();
        let self_id = self.self_id.clone();
        tokio::spawn(async move {
            if let Err(error) = store
                .update_receipt(&thread_id, &message_id, ReceiptField::DeliveredTo, &self_id)
                .await
            {
                tracing::warn!(%error, %message_id, "delivered receipt write failed");
            }
        });
    }
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

fn fresh_client_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}
