//! Message encryption and decryption.
//!
//! Every message derives its own symmetric key: x25519 shared secret plus a
//! fresh random 32-byte salt, stretched through HKDF-SHA256 into an
//! XChaCha20-Poly1305 key. Without the salt every message between the same
//! two static keys would encrypt under an identical key, so the salt travels
//! in the clear inside the envelope.
//!
//! Because the shared secret is symmetric, the same derivation decrypts
//! messages authored by either participant. There is no sender/receiver
//! asymmetry in key derivation, only in who encrypts at a given call site.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{
    envelope::{EncryptedEnvelope, NONCE_SIZE, SALT_SIZE},
    error::CryptoError,
    keys::{DeviceKeyPair, PeerPublicKey},
};

/// Encrypts and decrypts message bodies under this device's key pair.
///
/// Operations are synchronous and CPU-bound, with no shared mutable state;
/// the engine is safe to call from multiple concurrent callers.
#[derive(Debug, Clone)]
pub struct CryptoEngine {
    own_keys: DeviceKeyPair,
}

impl CryptoEngine {
    /// Create an engine around the device's key pair.
    pub fn new(own_keys: DeviceKeyPair) -> Self {
        Self { own_keys }
    }

    /// Encrypt a plaintext for the peer identified by the given public key.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidPublicKey`] when the peer key is malformed.
    /// - [`CryptoError::EncryptionFailed`] when the AEAD step errors.
    pub fn encrypt(
        &self,
        plaintext: &str,
        peer_public_key_base64: &str,
    ) -> Result<EncryptedEnvelope, CryptoError> {
        let peer = PeerPublicKey::from_base64(peer_public_key_base64)?;

        let mut salt = [0u8; SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let mut key = self.derive_message_key(&peer, &salt);
        let cipher = XChaCha20Poly1305::new((&key).into());
        key.zeroize();

        let mut nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let sealed = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed { reason: e.to_string() })?;

        let mut ciphertext = Vec::with_capacity(NONCE_SIZE + sealed.len());
        ciphertext.extend_from_slice(&nonce);
        ciphertext.extend_from_slice(&sealed);

        Ok(EncryptedEnvelope { salt, ciphertext })
    }

    /// Decrypt a base64 envelope authored by either participant.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidPublicKey`] when the peer key is malformed.
    /// - [`CryptoError::InvalidData`] when the envelope cannot be parsed.
    /// - [`CryptoError::DecryptionFailed`] when authentication fails or the
    ///   plaintext is not valid UTF-8.
    pub fn decrypt(
        &self,
        envelope_base64: &str,
        peer_public_key_base64: &str,
    ) -> Result<String, CryptoError> {
        let peer = PeerPublicKey::from_base64(peer_public_key_base64)?;
        let envelope = EncryptedEnvelope::from_base64(envelope_base64)?;

        let mut key = self.derive_message_key(&peer, &envelope.salt);
        let cipher = XChaCha20Poly1305::new((&key).into());
        key.zeroize();

        let (nonce, sealed) = envelope.ciphertext.split_at(NONCE_SIZE);
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::DecryptionFailed {
                reason: "authentication failed".to_string(),
            })?;

        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::DecryptionFailed { reason: e.to_string() })
    }

    /// Derive the per-message symmetric key from the shared secret and salt.
    fn derive_message_key(&self, peer: &PeerPublicKey, salt: &[u8; SALT_SIZE]) -> [u8; 32] {
        let mut shared = self.own_keys.shared_secret(peer);
        let hkdf = Hkdf::<Sha256>::new(Some(salt), &shared);
        shared.zeroize();

        let mut key = [0u8; 32];
        let Ok(()) = hkdf.expand(&[], &mut key) else {
            unreachable!("32 bytes is a valid HKDF-SHA256 output length");
        };
        key
    }
}
