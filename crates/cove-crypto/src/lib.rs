//! Cove Cryptographic Core
//!
//! Device key management and message encryption for two-party encrypted
//! threads.
//!
//! # Key Lifecycle
//!
//! Each device holds one static x25519 key-agreement pair, created lazily by
//! the [`KeyVault`] and persisted in a protected [`SecureKeyStore`]. The
//! public half is exported as base64 and published to the user directory;
//! the private half never leaves the store.
//!
//! ```text
//! Static x25519 pair (per device)
//!        │  ECDH with peer public key
//!        ▼
//! Shared secret (symmetric for both participants)
//!        │  HKDF-SHA256 with fresh 32-byte salt
//!        ▼
//! Per-message key → XChaCha20-Poly1305 → salt ‖ nonce ‖ ciphertext+tag
//! ```
//!
//! # Security
//!
//! - Per-message salt: without it every message between the same two static
//!   keys would encrypt under an identical key. The salt is public and
//!   travels in the envelope.
//! - AEAD authentication: any tampered envelope byte fails decryption.
//! - No forward secrecy: the pair is long-lived and never ratchets.
//!   Compromise of one private key exposes all recorded ciphertexts. This is
//!   a known limitation of the design, not an implementation gap.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod engine;
mod envelope;
mod error;
mod keys;
mod vault;

pub use engine::CryptoEngine;
pub use envelope::{EncryptedEnvelope, NONCE_SIZE, SALT_SIZE, TAG_SIZE};
pub use error::{CryptoError, KeyError};
pub use keys::{DeviceKeyPair, PUBLIC_KEY_SIZE, PeerPublicKey};
pub use vault::{KeyVault, MemoryKeyStore, PlatformKeyStore, SecureKeyStore};
