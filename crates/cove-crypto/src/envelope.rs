//! Encrypted envelope wire format.
//!
//! An envelope is `salt(32) || nonce(24) || ciphertext+tag`, base64-encoded
//! for transport. The salt is public: it only feeds the per-message HKDF
//! step, so confidentiality rests on the derived key and the AEAD, not on
//! hiding the salt.

use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::error::CryptoError;

/// Size of the per-message HKDF salt.
pub const SALT_SIZE: usize = 32;

/// Size of the XChaCha20 nonce carried inside the ciphertext portion.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// The transmitted encrypted form of a message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// Fresh random salt for the per-message key derivation.
    pub salt: [u8; SALT_SIZE],
    /// AEAD output: `nonce(24) || body || tag(16)`.
    pub ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Encode as base64 of `salt || ciphertext` for transport.
    pub fn to_base64(&self) -> String {
        let mut buffer = Vec::with_capacity(SALT_SIZE + self.ciphertext.len());
        buffer.extend_from_slice(&self.salt);
        buffer.extend_from_slice(&self.ciphertext);
        STANDARD.encode(buffer)
    }

    /// Decode a base64 envelope back into salt and ciphertext.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidData`] on bad base64, when the decoded
    /// length is not strictly greater than the salt size, or when the
    /// ciphertext portion cannot hold a nonce and tag.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidData { reason: e.to_string() })?;

        if bytes.len() <= SALT_SIZE {
            return Err(CryptoError::InvalidData {
                reason: format!("envelope is {} bytes, need more than {SALT_SIZE}", bytes.len()),
            });
        }

        let (salt_bytes, ciphertext) = bytes.split_at(SALT_SIZE);
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::InvalidData {
                reason: format!(
                    "ciphertext is {} bytes, need at least {}",
                    ciphertext.len(),
                    NONCE_SIZE + TAG_SIZE
                ),
            });
        }

        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(salt_bytes);
        Ok(Self { salt, ciphertext: ciphertext.to_vec() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> EncryptedEnvelope {
        EncryptedEnvelope { salt: [0xA5; SALT_SIZE], ciphertext: vec![0x42; NONCE_SIZE + TAG_SIZE + 8] }
    }

    #[test]
    fn base64_round_trip_preserves_fields() {
        let envelope = sample_envelope();
        let decoded = EncryptedEnvelope::from_base64(&envelope.to_base64()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn envelope_at_salt_boundary_is_invalid() {
        // Exactly 32 bytes decodes to salt with nothing left
        let encoded = STANDARD.encode([0u8; SALT_SIZE]);
        let result = EncryptedEnvelope::from_base64(&encoded);
        assert!(matches!(result, Err(CryptoError::InvalidData { .. })));
    }

    #[test]
    fn envelope_shorter_than_salt_is_invalid() {
        let encoded = STANDARD.encode([0u8; 10]);
        let result = EncryptedEnvelope::from_base64(&encoded);
        assert!(matches!(result, Err(CryptoError::InvalidData { .. })));
    }

    #[test]
    fn envelope_too_short_for_nonce_and_tag_is_invalid() {
        let encoded = STANDARD.encode([0u8; SALT_SIZE + NONCE_SIZE]);
        let result = EncryptedEnvelope::from_base64(&encoded);
        assert!(matches!(result, Err(CryptoError::InvalidData { .. })));
    }

    #[test]
    fn garbage_base64_is_invalid() {
        let result = EncryptedEnvelope::from_base64("%%% not base64 %%%");
        assert!(matches!(result, Err(CryptoError::InvalidData { .. })));
    }
}
