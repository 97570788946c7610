//! Vault: in-memory data key unlocked by the user's PIN.
//!
//! The vault holds a random 32-byte data key in memory. At rest the data key
//! only exists wrapped under a PIN-derived key (`WrappedKey`). When the user
//! locks the app (or auto-lock fires), the vault is locked and the key is
//! zeroized from memory.
//!
//! Auto-lock: configurable inactivity timer, 0 disables it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::info;
use zeroize::{Zeroizing, ZeroizeOnDrop};

use sh_crypto::{
    aead,
    kdf::{self, KdfParams, PURPOSE_VAULT_WRAP},
};

use crate::error::StoreError;

pub const DEFAULT_AUTO_LOCK_SECS: u64 = 1800;

// ── Wrapped data key ──────────────────────────────────────────────────────────

/// The vault data key as persisted: AEAD-wrapped under
/// Argon2id(PIN, salt) with the parameters recorded alongside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedKey {
    pub version: u8,
    /// Hex-encoded 16-byte Argon2id salt.
    pub salt: String,
    pub kdf: KdfParams,
    /// Hex-encoded `nonce || wrapped key || tag`.
    pub wrapped: String,
}

impl WrappedKey {
    /// Generate a fresh data key and wrap it under `pin`.
    pub fn create(pin: &[u8], params: &KdfParams) -> Result<(Self, Zeroizing<[u8; 32]>), StoreError> {
        let data_key = kdf::generate_key();
        let wrapped = Self::wrap(&data_key, pin, params)?;
        Ok((wrapped, data_key))
    }

    fn wrap(data_key: &[u8; 32], pin: &[u8], params: &KdfParams) -> Result<Self, StoreError> {
        let salt = kdf::generate_salt();
        let wrapping = kdf::stretch_secret(pin, &salt, params, PURPOSE_VAULT_WRAP)?;
        let wrapped = aead::wrap_key(wrapping.as_bytes(), data_key)?;
        Ok(Self {
            version: 1,
            salt: hex::encode(salt),
            kdf: *params,
            wrapped: hex::encode(wrapped),
        })
    }

    /// Recover the data key. Fails on a wrong PIN or a corrupted record.
    pub fn unwrap_with(&self, pin: &[u8]) -> Result<Zeroizing<[u8; 32]>, StoreError> {
        let salt = hex::decode(&self.salt).map_err(sh_crypto::CryptoError::from)?;
        let wrapped = hex::decode(&self.wrapped).map_err(sh_crypto::CryptoError::from)?;
        let wrapping = kdf::stretch_secret(pin, &salt, &self.kdf, PURPOSE_VAULT_WRAP)?;
        Ok(aead::unwrap_key(wrapping.as_bytes(), &wrapped)?)
    }

    /// Re-wrap the same data key under a new PIN with a fresh salt.
    pub fn rewrap(&self, old_pin: &[u8], new_pin: &[u8], params: &KdfParams) -> Result<Self, StoreError> {
        let data_key = self.unwrap_with(old_pin)?;
        Self::wrap(&data_key, new_pin, params)
    }
}

// ── Vault ─────────────────────────────────────────────────────────────────────

#[derive(ZeroizeOnDrop)]
struct VaultInner {
    key: [u8; 32],
    #[zeroize(skip)]
    last_activity: Instant,
}

/// Thread-safe vault handle.  Clone to share across components.
#[derive(Clone)]
pub struct Vault {
    inner: Arc<RwLock<Option<VaultInner>>>,
    auto_lock_secs: Arc<RwLock<u64>>,
}

impl Vault {
    pub fn new() -> Self {
        Self::with_auto_lock(DEFAULT_AUTO_LOCK_SECS)
    }

    pub fn with_auto_lock(seconds: u64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
            auto_lock_secs: Arc::new(RwLock::new(seconds)),
        }
    }

    /// Unlock with an already-recovered data key.
    pub async fn unlock_with_key(&self, key: &[u8; 32]) {
        let mut guard = self.inner.write().await;
        *guard = Some(VaultInner {
            key: *key,
            last_activity: Instant::now(),
        });
    }

    /// Unlock by unwrapping `wrapped` with `pin`.
    pub async fn unlock_wrapped(&self, wrapped: &WrappedKey, pin: &[u8]) -> Result<(), StoreError> {
        let key = wrapped.unwrap_with(pin)?;
        self.unlock_with_key(&key).await;
        Ok(())
    }

    /// Lock the vault, zeroizing the key.
    pub async fn lock(&self) {
        let mut guard = self.inner.write().await;
        if guard.take().is_some() {
            info!("vault locked");
        }
    }

    pub async fn is_locked(&self) -> bool {
        let expired = {
            let guard = self.inner.read().await;
            match guard.as_ref() {
                Some(inner) => self.expired(inner).await,
                None => return true,
            }
        };
        if expired {
            info!("vault auto-lock after inactivity");
            self.lock().await;
        }
        expired
    }

    async fn expired(&self, inner: &VaultInner) -> bool {
        let secs = *self.auto_lock_secs.read().await;
        secs > 0 && inner.last_activity.elapsed() > Duration::from_secs(secs)
    }

    /// Set the auto-lock timeout in seconds. 0 = disable auto-lock.
    pub async fn set_auto_lock_timeout(&self, seconds: u64) {
        *self.auto_lock_secs.write().await = seconds;
    }

    /// Record activity (resets the auto-lock timer).
    pub async fn touch(&self) {
        let mut guard = self.inner.write().await;
        if let Some(ref mut inner) = *guard {
            inner.last_activity = Instant::now();
        }
    }

    /// Access the raw key for an encrypt/decrypt operation.
    /// Returns Err if vault is locked or auto-lock has expired.
    /// Automatically touches the activity timer.
    pub async fn with_key<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&[u8; 32]) -> Result<R, StoreError>,
    {
        if self.is_locked().await {
            return Err(StoreError::VaultLocked);
        }

        let mut guard = self.inner.write().await;
        match guard.as_mut() {
            Some(inner) => {
                inner.last_activity = Instant::now();
                f(&inner.key)
            }
            None => Err(StoreError::VaultLocked),
        }
    }

    /// Seconds until auto-lock, `None` while locked.
    pub async fn time_until_lock(&self) -> Option<u64> {
        let secs = *self.auto_lock_secs.read().await;
        let guard = self.inner.read().await;
        guard.as_ref().map(|inner| {
            if secs == 0 {
                return u64::MAX;
            }
            secs.saturating_sub(inner.last_activity.elapsed().as_secs())
        })
    }
}

impl Default for Vault {
    fn default() -> Self {
        Self::new()
    }
}
