//! Client-side reconciliation core for two-party encrypted threads.
//!
//! This crate turns the raw services of a messaging backend (a key
//! directory and a threaded message store) into a consistent, live local
//! timeline:
//!
//! - [`ThreadSession`] owns one open thread end to end: key bootstrap,
//!   peer key lookup, the live feed pump, optimistic sends, and receipt
//!   watching.
//! - [`Timeline`] is the pure reconciliation state machine that merges
//!   confirmed snapshots with pending local sends.
//! - [`ReceiptTracker`] folds monotonic receipt sets into a display
//!   status per outgoing message.
//! - [`DirectoryService`] and [`MessageStore`] are the injection seams;
//!   [`MemoryDirectory`] and [`MemoryMessageStore`] are complete
//!   in-memory backends for tests and offline hosts.
//!
//! # Consistency model
//!
//! The store is the single source of truth for confirmed messages. The
//! timeline is always a pure function of (latest confirmed snapshot,
//! current pending set): every feed delivery rebuilds the merged view
//! rather than patching it, so replays, reordering, and duplicate
//! confirmations cannot corrupt local state.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod error;
pub mod memory;
pub mod receipts;
pub mod services;
pub mod session;
pub mod timeline;

pub use error::{DirectoryError, SendError, SessionError, StoreError};
pub use memory::{MemoryDirectory, MemoryMessageStore};
pub use receipts::{DeliveryStatus, ReceiptSets, ReceiptTracker};
pub use services::{DirectoryService, FeedReceiver, MessageStore, ReceiptField, ReceiptReceiver};
pub use session::{SessionEvent, SnapshotItem, ThreadSession};
pub use timeline::{EntryState, PendingHandle, Timeline, TimelineEntry};
