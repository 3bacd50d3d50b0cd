//! Error types for the reconciliation core.
//!
//! Propagation policy: key and crypto errors surface to the caller as typed
//! failures; reconciliation degrades defensively instead of propagating;
//! receipt-write failures are swallowed (logged) at the tracker boundary.

use cove_crypto::{CryptoError, KeyError};
use thiserror::Error;

/// Errors from the user directory service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The directory could not be reached.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the message store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or rejected the operation.
    #[error("message store unavailable: {0}")]
    Unavailable(String),

    /// The referenced thread does not exist.
    #[error("unknown thread: {0}")]
    UnknownThread(String),
}

/// Errors opening a thread session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The local trust root is broken; messaging is blocked for the device.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The directory lookup or publish failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// The store subscription or thread upsert failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The peer has not published a public key; nothing can be encrypted
    /// for them.
    #[error("no public key published for peer `{peer_id}`")]
    PeerKeyUnavailable {
        /// The peer whose key is missing.
        peer_id: String,
    },
}

/// Errors that abort a single optimistic send.
///
/// Retryable from the user's perspective: the pending entity is removed and
/// the caller may stage the send again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The message could not be encrypted before send.
    #[error(transparent)]
    Encryption(#[from] CryptoError),

    /// The store append failed after the optimistic insert.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_wrap_their_sources() {
        let err: SessionError =
            KeyError::KeyGenerationFailed { reason: "denied".into() }.into();
        assert!(matches!(err, SessionError::Key(_)));

        let err: SendError = StoreError::Unavailable("offline".into()).into();
        assert!(matches!(err, SendError::Store(_)));
    }
}
