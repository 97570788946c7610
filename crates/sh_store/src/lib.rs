//! sh_store: origin-isolated secure key store for Shroud
//!
//! # Layers
//! - `StorageBackend`: flat durable byte map. SQLite (`sqlx`, WAL) is
//!   preferred; a one-file-per-key directory is the logged fallback; an
//!   in-memory map serves tests.
//! - `SecureKeyStore`: origin namespacing, read/write-through cache, JSON
//!   and sealed helpers.
//! - `Vault`: the PIN-wrapped data key that seals records at rest. Held in
//!   memory only while unlocked.

pub mod backend;
pub mod error;
pub mod file;
pub mod keystore;
pub mod sqlite;
pub mod vault;

pub use backend::{MemoryBackend, StorageBackend};
pub use error::StoreError;
pub use keystore::{SecureKeyStore, StorageConfig};
pub use vault::{Vault, WrappedKey};
