//! ContactKeys: trust-on-first-use memory of peers' identity keys.
//!
//! The first key seen for a peer is pinned. A different key later marks the
//! contact as changed and drops any verification; the channel refuses to
//! send to a changed contact until the new key is verified out of band.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use sh_crypto::PublicKeyBytes;
use sh_store::SecureKeyStore;

use crate::error::CoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    New,
    Unchanged,
    Changed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRecord {
    pub user_id: String,
    /// Base64url identity key currently pinned.
    pub public_key: String,
    pub verified: bool,
    /// Key changed since it was pinned and has not been verified since.
    pub key_changed: bool,
    pub first_seen: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn record_key(user_id: &str) -> String {
    format!("contact/{user_id}")
}

#[derive(Clone)]
pub struct ContactKeys {
    store: SecureKeyStore,
}

impl ContactKeys {
    pub fn new(store: SecureKeyStore) -> Self {
        Self { store }
    }

    pub async fn get(&self, user_id: &str) -> CoreResult<Option<ContactRecord>> {
        Ok(self.store.get_json(&record_key(user_id)).await?)
    }

    /// Compare `public_key` with what is pinned for `user_id`, pinning it on
    /// first sight and flagging a change otherwise.
    pub async fn observe(&self, user_id: &str, public_key: &PublicKeyBytes) -> CoreResult<KeyStatus> {
        let b64 = public_key.to_b64();
        let now = Utc::now();
        match self.get(user_id).await? {
            None => {
                let record = ContactRecord {
                    user_id: user_id.to_string(),
                    public_key: b64,
                    verified: false,
                    key_changed: false,
                    first_seen: now,
                    updated_at: now,
                };
                self.store.set_json(&record_key(user_id), &record).await?;
                info!(user_id, key = %public_key.short_id(), "contact key pinned");
                Ok(KeyStatus::New)
            }
            Some(record) if record.public_key == b64 => Ok(KeyStatus::Unchanged),
            Some(mut record) => {
                warn!(
                    user_id,
                    new_key = %public_key.short_id(),
                    was_verified = record.verified,
                    "contact identity key changed"
                );
                record.public_key = b64;
                record.verified = false;
                record.key_changed = true;
                record.updated_at = now;
                self.store.set_json(&record_key(user_id), &record).await?;
                Ok(KeyStatus::Changed)
            }
        }
    }

    /// Record a successful out-of-band check of `public_key`.
    pub async fn mark_verified(&self, user_id: &str, public_key: &PublicKeyBytes) -> CoreResult<()> {
        let now = Utc::now();
        let record = match self.get(user_id).await? {
            Some(mut r) => {
                r.public_key = public_key.to_b64();
                r.updated_at = now;
                r
            }
            None => ContactRecord {
                user_id: user_id.to_string(),
                public_key: public_key.to_b64(),
                verified: false,
                key_changed: false,
                first_seen: now,
                updated_at: now,
            },
        };
        let record = ContactRecord {
            verified: true,
            key_changed: false,
            ..record
        };
        self.store.set_json(&record_key(user_id), &record).await?;
        info!(user_id, "contact verified");
        Ok(())
    }

    pub async fn is_verified(&self, user_id: &str) -> CoreResult<bool> {
        Ok(self.get(user_id).await?.is_some_and(|r| r.verified))
    }

    /// True when sending to `user_id` must wait for re-verification.
    pub async fn is_blocked(&self, user_id: &str) -> CoreResult<bool> {
        Ok(self.get(user_id).await?.is_some_and(|r| r.key_changed))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sh_store::{MemoryBackend, Vault};

    use super::*;

    fn pk(b: u8) -> PublicKeyBytes {
        PublicKeyBytes(vec![b; 32])
    }

    #[tokio::test]
    async fn tofu_lifecycle() {
        let store = SecureKeyStore::with_backend("t", Arc::new(MemoryBackend::new()), Vault::new());
        let contacts = ContactKeys::new(store);

        assert_eq!(contacts.observe("bob", &pk(1)).await.unwrap(), KeyStatus::New);
        assert_eq!(contacts.observe("bob", &pk(1)).await.unwrap(), KeyStatus::Unchanged);
        assert!(!contacts.is_verified("bob").await.unwrap());
        assert!(!contacts.is_blocked("bob").await.unwrap());

        contacts.mark_verified("bob", &pk(1)).await.unwrap();
        assert!(contacts.is_verified("bob").await.unwrap());

        assert_eq!(contacts.observe("bob", &pk(2)).await.unwrap(), KeyStatus::Changed);
        assert!(!contacts.is_verified("bob").await.unwrap());
        assert!(contacts.is_blocked("bob").await.unwrap());
        // The new key is pinned now; seeing it again is not another change.
        assert_eq!(contacts.observe("bob", &pk(2)).await.unwrap(), KeyStatus::Unchanged);

        contacts.mark_verified("bob", &pk(2)).await.unwrap();
        assert!(!contacts.is_blocked("bob").await.unwrap());
        assert!(contacts.is_verified("bob").await.unwrap());
    }
}
