//! Device key vault over a protected key store.
//!
//! The vault owns the lifecycle of the single per-device key pair: lazy
//! creation on first use, persistence into a [`SecureKeyStore`], and export
//! of the public half. Store selection (software fallback vs OS-backed) is a
//! construction-time choice; callers never see the branch.
//!
//! Regenerating the pair invalidates the ability to decrypt anything
//! encrypted under the old key. The vault therefore never regenerates on its
//! own: at most one key pair exists per device identifier.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::{error::KeyError, keys::DeviceKeyPair};

/// Protected, device-bound storage for private key material.
///
/// Implementations must not sync material across devices and must keep it
/// non-exportable outside this interface. The vault serializes access, so
/// implementations only need interior thread safety for their own state.
pub trait SecureKeyStore: Send + Sync {
    /// Load the secret stored under `identifier`, or `None` if absent.
    fn load(&self, identifier: &str) -> Result<Option<Vec<u8>>, KeyError>;

    /// Persist a secret under `identifier`, overwriting any previous value.
    fn store(&self, identifier: &str, secret: &[u8]) -> Result<(), KeyError>;
}

/// Software-only key store for development, simulators, and tests.
///
/// Clones share the same underlying map via `Arc`, mirroring how shared
/// storage fakes behave elsewhere in the workspace.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecureKeyStore for MemoryKeyStore {
    fn load(&self, identifier: &str) -> Result<Option<Vec<u8>>, KeyError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| KeyError::StoreUnavailable { reason: e.to_string() })?;
        Ok(entries.get(identifier).cloned())
    }

    fn store(&self, identifier: &str, secret: &[u8]) -> Result<(), KeyError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| KeyError::KeyGenerationFailed { reason: e.to_string() })?;
        entries.insert(identifier.to_string(), secret.to_vec());
        Ok(())
    }
}

/// Key store backed by the operating system credential store.
///
/// This is the deployment path on real hardware, where the OS store is
/// itself backed by a secure element where available. Secrets are
/// base64-encoded because credential stores hold strings.
#[derive(Debug, Clone)]
pub struct PlatformKeyStore {
    service: String,
}

impl PlatformKeyStore {
    /// Create a store scoped to the given service name.
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }
}

impl SecureKeyStore for PlatformKeyStore {
    fn load(&self, identifier: &str) -> Result<Option<Vec<u8>>, KeyError> {
        let entry = keyring::Entry::new(&self.service, identifier)
            .map_err(|e| KeyError::StoreUnavailable { reason: e.to_string() })?;
        match entry.get_password() {
            Ok(encoded) => {
                let bytes = STANDARD.decode(encoded).map_err(|e| {
                    KeyError::CorruptKeyMaterial { reason: e.to_string() }
                })?;
                Ok(Some(bytes))
            },
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(KeyError::StoreUnavailable { reason: e.to_string() }),
        }
    }

    fn store(&self, identifier: &str, secret: &[u8]) -> Result<(), KeyError> {
        let entry = keyring::Entry::new(&self.service, identifier)
            .map_err(|e| KeyError::KeyGenerationFailed { reason: e.to_string() })?;
        entry
            .set_password(&STANDARD.encode(secret))
            .map_err(|e| KeyError::KeyGenerationFailed { reason: e.to_string() })
    }
}

/// Manages the device-local key pair inside a protected store.
pub struct KeyVault {
    store: Arc<dyn SecureKeyStore>,
    device_id: String,
    // Protected-store access and the lazy-create path are serialized here
    cached: Mutex<Option<DeviceKeyPair>>,
}

impl KeyVault {
    /// Create a vault over the given store, keyed by a fixed device
    /// identifier.
    pub fn new(store: Arc<dyn SecureKeyStore>, device_id: impl Into<String>) -> Self {
        Self { store, device_id: device_id.into(), cached: Mutex::new(None) }
    }

    /// Return the device key pair, generating and persisting one if none
    /// exists yet.
    ///
    /// Idempotent: a second call with an existing key returns the same pair.
    ///
    /// # Errors
    ///
    /// [`KeyError::KeyGenerationFailed`] if the protected store rejects the
    /// write. This is fatal to all messaging for the device.
    pub fn ensure_key_pair(&self) -> Result<DeviceKeyPair, KeyError> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|e| KeyError::StoreUnavailable { reason: e.to_string() })?;

        if let Some(pair) = cached.as_ref() {
            return Ok(pair.clone());
        }

        if let Some(pair) = self.load_existing()? {
            *cached = Some(pair.clone());
            return Ok(pair);
        }

        let pair = DeviceKeyPair::generate();
        self.store.store(&self.device_id, pair.secret_bytes())?;
        tracing::info!(device_id = %self.device_id, "generated new device key pair");

        *cached = Some(pair.clone());
        Ok(pair)
    }

    /// The exportable public key, or `None` if no pair has been created yet.
    pub fn public_key_base64(&self) -> Result<Option<String>, KeyError> {
        let cached = self
            .cached
            .lock()
            .map_err(|e| KeyError::StoreUnavailable { reason: e.to_string() })?;
        if let Some(pair) = cached.as_ref() {
            return Ok(Some(pair.public_key_base64()));
        }
        drop(cached);

        Ok(self.load_existing()?.map(|pair| pair.public_key_base64()))
    }

    fn load_existing(&self) -> Result<Option<DeviceKeyPair>, KeyError> {
        let Some(bytes) = self.store.load(&self.device_id)? else {
            return Ok(None);
        };
        let array: [u8; 32] =
            bytes.try_into().map_err(|b: Vec<u8>| KeyError::CorruptKeyMaterial {
                reason: format!("expected 32 bytes, got {}", b.len()),
            })?;
        Ok(Some(DeviceKeyPair::from_secret_bytes(array)))
    }
}
