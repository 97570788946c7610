//! SecureKeyStore: origin-scoped key/value store over a `StorageBackend`.
//!
//! - Every key is namespaced as `"{origin}/{key}"` before it reaches the
//!   backend, so two applications sharing a database never see each other.
//! - Reads are served from an in-memory cache after the first load.
//! - Writes go to the backend first and only then to the cache; `set`
//!   returns after the backend reports the write durable.
//! - `*_sealed` helpers encrypt under the vault data key with the namespaced
//!   key as associated data, so a sealed value cannot be moved to another key.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use sh_crypto::{aead, kdf::KdfParams};

use crate::{
    backend::StorageBackend,
    error::StoreError,
    file::FileBackend,
    sqlite::SqliteBackend,
    vault::{Vault, WrappedKey},
};

const VAULT_KEY_RECORD: &str = "vault/wrapped-key";

/// Where the key store lives on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file. `None` goes straight to the file backend.
    pub sqlite_path: Option<PathBuf>,
    /// Directory for the file backend, used when SQLite is unavailable.
    pub fallback_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: Some(PathBuf::from("shroud-keys.db")),
            fallback_dir: PathBuf::from("shroud-keys"),
        }
    }
}

/// Central key store handle.  Cheap to clone (Arc internally).
#[derive(Clone)]
pub struct SecureKeyStore {
    origin: Arc<str>,
    backend: Arc<dyn StorageBackend>,
    cache: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    vault: Vault,
}

impl SecureKeyStore {
    /// Open the preferred backend, falling back from SQLite to plain files.
    /// The fallback is decided once, here, and logged.
    pub async fn open(origin: &str, config: &StorageConfig, vault: Vault) -> Result<Self, StoreError> {
        let sqlite_err = match &config.sqlite_path {
            Some(path) => match SqliteBackend::open(path).await {
                Ok(backend) => {
                    info!(origin, backend = "sqlite", "key store opened");
                    return Ok(Self::with_backend(origin, Arc::new(backend), vault));
                }
                Err(e) => {
                    warn!(
                        origin,
                        path = %path.display(),
                        error = %e,
                        "sqlite key store unavailable, falling back to file backend"
                    );
                    Some(e.to_string())
                }
            },
            None => None,
        };

        match FileBackend::open(&config.fallback_dir).await {
            Ok(backend) => {
                info!(origin, backend = "file", "key store opened");
                Ok(Self::with_backend(origin, Arc::new(backend), vault))
            }
            Err(e) => Err(StoreError::Unavailable(match sqlite_err {
                Some(s) => format!("sqlite: {s}; file: {e}"),
                None => format!("file: {e}"),
            })),
        }
    }

    pub fn with_backend(origin: &str, backend: Arc<dyn StorageBackend>, vault: Vault) -> Self {
        Self {
            origin: Arc::from(origin),
            backend,
            cache: Arc::new(RwLock::new(HashMap::new())),
            vault,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}/{}", self.origin, key)
    }

    // ── Raw bytes ────────────────────────────────────────────────────────────

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let full = self.namespaced(key);
        if let Some(hit) = self.cache.read().get(&full) {
            return Ok(Some(hit.clone()));
        }
        let loaded = self.backend.get(&full).await?;
        if let Some(ref value) = loaded {
            self.cache.write().insert(full, value.clone());
        }
        Ok(loaded)
    }

    pub async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let full = self.namespaced(key);
        self.backend.set(&full, value).await?;
        self.cache.write().insert(full, value.to_vec());
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let full = self.namespaced(key);
        self.backend.delete(&full).await?;
        self.cache.write().remove(&full);
        Ok(())
    }

    // ── JSON ─────────────────────────────────────────────────────────────────

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, &bytes).await
    }

    // ── Sealed (vault-encrypted) ─────────────────────────────────────────────

    pub async fn set_sealed(&self, key: &str, plaintext: &[u8]) -> Result<(), StoreError> {
        let aad = self.namespaced(key);
        let sealed = self
            .vault
            .with_key(|k| Ok(aead::encrypt(k, plaintext, aad.as_bytes())?))
            .await?;
        self.set(key, &sealed).await
    }

    pub async fn get_sealed(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError> {
        let Some(sealed) = self.get(key).await? else {
            return Ok(None);
        };
        let aad = self.namespaced(key);
        let plaintext = self
            .vault
            .with_key(|k| Ok(aead::decrypt(k, &sealed, aad.as_bytes())?))
            .await?;
        Ok(Some(plaintext))
    }

    pub async fn set_sealed_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = Zeroizing::new(serde_json::to_vec(value)?);
        self.set_sealed(key, &bytes).await
    }

    pub async fn get_sealed_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get_sealed(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // ── Vault data key ───────────────────────────────────────────────────────

    pub async fn has_vault_key(&self) -> Result<bool, StoreError> {
        Ok(self.get(VAULT_KEY_RECORD).await?.is_some())
    }

    /// Unwrap the stored data key with `pin` and unlock the vault, creating
    /// and persisting a fresh data key on first use. Returns `true` when a
    /// new data key was created.
    pub async fn unlock_vault(&self, pin: &[u8], params: &KdfParams) -> Result<bool, StoreError> {
        match self.get_json::<WrappedKey>(VAULT_KEY_RECORD).await? {
            Some(wrapped) => {
                self.vault.unlock_wrapped(&wrapped, pin).await?;
                debug!(origin = %self.origin, "vault unlocked");
                Ok(false)
            }
            None => {
                let (wrapped, key) = WrappedKey::create(pin, params)?;
                self.set_json(VAULT_KEY_RECORD, &wrapped).await?;
                self.vault.unlock_with_key(&key).await;
                info!(origin = %self.origin, "vault data key created");
                Ok(true)
            }
        }
    }

    /// Re-wrap the vault data key under a new PIN. No-op if no data key
    /// exists yet.
    pub async fn rewrap_vault(&self, old_pin: &[u8], new_pin: &[u8], params: &KdfParams) -> Result<(), StoreError> {
        if let Some(wrapped) = self.get_json::<WrappedKey>(VAULT_KEY_RECORD).await? {
            let rewrapped = wrapped.rewrap(old_pin, new_pin, params)?;
            self.set_json(VAULT_KEY_RECORD, &rewrapped).await?;
        }
        Ok(())
    }
}
