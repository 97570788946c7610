//! Storage backend abstraction.
//!
//! A backend is a flat, durable byte map. Namespacing, caching and
//! encryption all live one layer up in `SecureKeyStore`; backends only
//! guarantee that `set` and `delete` are durable once they return.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StoreError;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short label for logs ("sqlite", "file", "memory").
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Volatile backend for tests and throwaway profiles.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Raw view of a stored value, bypassing any cache above.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(key).cloned()
    }

    /// Overwrite a raw value, e.g. to simulate on-disk corruption.
    pub fn put_raw(&self, key: &str, value: Vec<u8>) {
        self.entries.lock().insert(key.to_string(), value);
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
