//! Device key pair and public key wire encoding.
//!
//! Each device holds one long-lived x25519 key-agreement pair. The private
//! half lives in the protected store and is zeroized on drop; the public
//! half is a 32-byte value that is safe to export as base64 and publish to
//! the directory.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// Size of an x25519 public key on the wire.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// A peer's public key, decoded from its base64 wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPublicKey(PublicKey);

impl PeerPublicKey {
    /// Decode a base64-encoded 32-byte x25519 public key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] on bad base64 or wrong
    /// length.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidPublicKey { reason: e.to_string() })?;
        let array: [u8; PUBLIC_KEY_SIZE] =
            bytes.try_into().map_err(|b: Vec<u8>| CryptoError::InvalidPublicKey {
                reason: format!("expected {PUBLIC_KEY_SIZE} bytes, got {}", b.len()),
            })?;
        Ok(Self(PublicKey::from(array)))
    }

    /// The underlying x25519 public key.
    pub(crate) fn inner(&self) -> &PublicKey {
        &self.0
    }
}

/// A device's static x25519 key-agreement pair.
///
/// The secret is zeroized when the pair is dropped. There is no serialization
/// path for the secret other than [`DeviceKeyPair::secret_bytes`], which the
/// vault uses to write into the protected store.
#[derive(ZeroizeOnDrop)]
pub struct DeviceKeyPair {
    secret_bytes: [u8; 32],
}

impl DeviceKeyPair {
    /// Generate a fresh key pair from the OS random number generator.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        Self { secret_bytes: secret.to_bytes() }
    }

    /// Rebuild a key pair from 32 secret bytes loaded from the protected
    /// store.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self { secret_bytes: bytes }
    }

    /// Raw secret bytes for persistence into the protected store.
    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret_bytes
    }

    /// The exportable public half, base64-encoded for publishing.
    pub fn public_key_base64(&self) -> String {
        let secret = StaticSecret::from(self.secret_bytes);
        STANDARD.encode(PublicKey::from(&secret).as_bytes())
    }

    /// Perform x25519 Diffie-Hellman with a peer's public key.
    ///
    /// The shared secret is symmetric: either side derives the same bytes
    /// from its own secret and the other's public key.
    pub fn shared_secret(&self, peer: &PeerPublicKey) -> [u8; 32] {
        let secret = StaticSecret::from(self.secret_bytes);
        *secret.diffie_hellman(peer.inner()).as_bytes()
    }
}

impl Clone for DeviceKeyPair {
    fn clone(&self) -> Self {
        Self { secret_bytes: self.secret_bytes }
    }
}

impl std::fmt::Debug for DeviceKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print secret material
        f.debug_struct("DeviceKeyPair").field("public", &self.public_key_base64()).finish()
    }
}
