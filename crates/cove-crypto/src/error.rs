//! Error types for key management and message encryption.
//!
//! Key errors are fatal to messaging for the device (a broken local trust
//! root cannot be retried away). Crypto errors are per-message and
//! non-fatal: a single undecryptable record must never take down a timeline.

use thiserror::Error;

/// Errors from the device key vault and its protected store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// No key pair exists for this device yet.
    #[error("no key pair found for device `{device_id}`")]
    NoKeysFound {
        /// Device identifier the lookup used.
        device_id: String,
    },

    /// The protected store rejected key generation or persistence.
    ///
    /// Fatal to all messaging for this device until resolved; callers must
    /// block sending/receiving and prompt for remediation.
    #[error("key generation failed: {reason}")]
    KeyGenerationFailed {
        /// Store-level failure description.
        reason: String,
    },

    /// The protected store could not be read.
    #[error("protected key store read failed: {reason}")]
    StoreUnavailable {
        /// Store-level failure description.
        reason: String,
    },

    /// Persisted key material is not a valid 32-byte x25519 secret.
    #[error("stored key material is corrupt: {reason}")]
    CorruptKeyMaterial {
        /// What was wrong with the stored bytes.
        reason: String,
    },
}

/// Errors from per-message encryption and decryption.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The peer public key could not be decoded.
    #[error("invalid peer public key: {reason}")]
    InvalidPublicKey {
        /// Why the key failed to decode.
        reason: String,
    },

    /// The envelope is malformed (bad base64 or too short to contain a salt).
    #[error("invalid envelope data: {reason}")]
    InvalidData {
        /// Why the envelope failed to parse.
        reason: String,
    },

    /// The AEAD encryption step failed.
    #[error("encryption failed: {reason}")]
    EncryptionFailed {
        /// AEAD-level failure description.
        reason: String,
    },

    /// Authentication failed or the plaintext was not valid UTF-8.
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// AEAD-level failure description.
        reason: String,
    },
}
