//! External interfaces the core consumes: the public-key directory and the
//! message transport. Both are traits so the host application plugs in its
//! own REST client / socket; in-memory versions are provided for tests and
//! local demos.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

// ── Directory ────────────────────────────────────────────────────────────────

/// Public-key record as published to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedKeys {
    pub user_id: String,
    /// Base64url X25519 identity public key.
    pub encryption_key: String,
    /// Opaque passthrough; the core never generates or checks it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
    pub published_at: DateTime<Utc>,
}

#[async_trait]
pub trait Directory: Send + Sync {
    /// `Ok(None)` when the user has not published keys yet.
    async fn get_public_key(&self, user_id: &str) -> Result<Option<PublishedKeys>, ProtoError>;

    async fn put_public_key(
        &self,
        user_id: &str,
        encryption_key: &str,
        signing_key: Option<&str>,
    ) -> Result<(), ProtoError>;
}

#[derive(Default)]
pub struct InMemoryDirectory {
    records: Mutex<HashMap<String, PublishedKeys>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a record directly, e.g. to stage a key substitution.
    pub fn insert(&self, keys: PublishedKeys) {
        self.records.lock().insert(keys.user_id.clone(), keys);
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn get_public_key(&self, user_id: &str) -> Result<Option<PublishedKeys>, ProtoError> {
        Ok(self.records.lock().get(user_id).cloned())
    }

    async fn put_public_key(
        &self,
        user_id: &str,
        encryption_key: &str,
        signing_key: Option<&str>,
    ) -> Result<(), ProtoError> {
        self.insert(PublishedKeys {
            user_id: user_id.to_string(),
            encryption_key: encryption_key.to_string(),
            signing_key: signing_key.map(str::to_string),
            published_at: Utc::now(),
        });
        Ok(())
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand an encoded `TransportPayload` to the relay, addressed to
    /// `recipient_id`. Delivery, retries and ordering are the transport's
    /// business.
    async fn send(&self, recipient_id: &str, payload: &[u8]) -> Result<(), ProtoError>;
}

/// Transport that just records what was sent.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything sent so far, oldest first.
    pub fn take(&self) -> Vec<(String, Vec<u8>)> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, recipient_id: &str, payload: &[u8]) -> Result<(), ProtoError> {
        self.sent
            .lock()
            .push((recipient_id.to_string(), payload.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directory_tolerates_unknown_users() {
        let dir = InMemoryDirectory::new();
        assert_eq!(dir.get_public_key("nobody").await.unwrap(), None);

        dir.put_public_key("alice", "pk-a", None).await.unwrap();
        let rec = dir.get_public_key("alice").await.unwrap().unwrap();
        assert_eq!(rec.encryption_key, "pk-a");
        assert_eq!(rec.signing_key, None);
    }

    #[tokio::test]
    async fn transport_records_in_order() {
        let t = RecordingTransport::new();
        t.send("bob", b"one").await.unwrap();
        t.send("carol", b"two").await.unwrap();
        let sent = t.take();
        assert_eq!(sent[0], ("bob".to_string(), b"one".to_vec()));
        assert_eq!(sent[1].0, "carol");
        assert!(t.is_empty());
    }
}
