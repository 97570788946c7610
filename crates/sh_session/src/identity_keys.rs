//! IdentityKeys: the long-term X25519 keypair, encrypted at rest under the
//! PIN.
//!
//! Record layout (`identity/{user_id}`): public key in the clear, private
//! key as `nonce || ct || tag` under Argon2id(PIN, salt) split for identity
//! wrapping, with the user id as associated data. KDF parameters travel with
//! the record.
//!
//! Backups re-encrypt the private key under a passphrase-derived key into a
//! self-contained, armoured bundle.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroizing;

use sh_crypto::{
    aead,
    kdf::{self, KdfParams, PURPOSE_BACKUP, PURPOSE_IDENTITY_WRAP},
    IdentityKeyPair, PublicKeyBytes,
};
use sh_store::SecureKeyStore;

use crate::{
    error::{CoreError, CoreResult},
    kdf_task,
};

pub const BACKUP_PREFIX: &str = "shroud-backup:";
pub const MIN_PASSPHRASE_LEN: usize = 8;
const RECORD_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub version: u8,
    pub user_id: String,
    /// Base64url public key.
    pub public_key: String,
    pub kdf: KdfParams,
    /// Hex salt.
    pub salt: String,
    /// Hex `nonce || ct || tag`.
    pub encrypted_private: String,
    pub created_at: DateTime<Utc>,
}

/// Portable backup. Same shape as the record, different key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BackupBundle {
    version: u8,
    user_id: String,
    public_key: String,
    kdf: KdfParams,
    salt: String,
    encrypted_private: String,
    created_at: DateTime<Utc>,
}

fn record_key(user_id: &str) -> String {
    format!("identity/{user_id}")
}

fn identity_aad(user_id: &str) -> Vec<u8> {
    format!("sh-identity-v1|{user_id}").into_bytes()
}

fn backup_aad(user_id: &str) -> Vec<u8> {
    format!("sh-backup-v1|{user_id}").into_bytes()
}

/// Encrypt `secret` under a key stretched from `password`.
async fn seal_secret(
    secret: &[u8; 32],
    password: &[u8],
    params: KdfParams,
    purpose: &'static [u8],
    aad: &[u8],
) -> CoreResult<(String, String)> {
    let salt = kdf::generate_salt();
    let key = kdf_task::stretch(password, &salt, params, purpose).await?;
    let ct = aead::encrypt(key.as_bytes(), secret, aad)?;
    Ok((hex::encode(salt), hex::encode(ct)))
}

/// Reverse of `seal_secret`. Every failure is `DecryptionFailed`.
async fn open_secret(
    salt_hex: &str,
    ct_hex: &str,
    password: &[u8],
    params: KdfParams,
    purpose: &'static [u8],
    aad: &[u8],
) -> CoreResult<IdentityKeyPair> {
    let salt = hex::decode(salt_hex).map_err(|_| CoreError::DecryptionFailed)?;
    let ct = hex::decode(ct_hex).map_err(|_| CoreError::DecryptionFailed)?;
    let key = kdf_task::stretch(password, &salt, params, purpose).await?;
    let secret: Zeroizing<Vec<u8>> =
        aead::decrypt(key.as_bytes(), &ct, aad).map_err(|_| CoreError::DecryptionFailed)?;
    IdentityKeyPair::from_bytes(&secret).map_err(|_| CoreError::DecryptionFailed)
}

fn parse_bundle(armoured: &str) -> CoreResult<BackupBundle> {
    let body = armoured
        .trim()
        .strip_prefix(BACKUP_PREFIX)
        .ok_or_else(|| CoreError::InvalidInput("not a backup bundle".into()))?;
    let json = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|e| CoreError::InvalidInput(format!("backup encoding: {e}")))?;
    let bundle: BackupBundle =
        serde_json::from_slice(&json).map_err(|e| CoreError::InvalidInput(format!("backup format: {e}")))?;
    if bundle.version != RECORD_VERSION {
        return Err(CoreError::InvalidInput(format!("unsupported backup version {}", bundle.version)));
    }
    Ok(bundle)
}

/// Owner of a backup bundle, readable without the passphrase.
pub fn backup_user_id(armoured: &str) -> CoreResult<String> {
    Ok(parse_bundle(armoured)?.user_id)
}

#[derive(Clone)]
pub struct IdentityKeys {
    store: SecureKeyStore,
    kdf: KdfParams,
}

impl IdentityKeys {
    pub fn new(store: SecureKeyStore, kdf: KdfParams) -> Self {
        Self { store, kdf }
    }

    async fn record(&self, user_id: &str) -> CoreResult<Option<IdentityRecord>> {
        Ok(self.store.get_json(&record_key(user_id)).await?)
    }

    pub async fn has_keys(&self, user_id: &str) -> CoreResult<bool> {
        Ok(self.record(user_id).await?.is_some())
    }

    /// Public half, no PIN needed.
    pub async fn public_key(&self, user_id: &str) -> CoreResult<Option<PublicKeyBytes>> {
        match self.record(user_id).await? {
            Some(r) => Ok(Some(PublicKeyBytes::from_b64(&r.public_key).map_err(|e| {
                CoreError::StorageUnavailable(format!("identity record for {user_id}: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    /// Create the keypair for `user_id`, or return the existing public key.
    pub async fn generate(&self, user_id: &str, pin: &str) -> CoreResult<PublicKeyBytes> {
        if let Some(existing) = self.public_key(user_id).await? {
            return Ok(existing);
        }
        let keypair = IdentityKeyPair::generate()?;
        self.store_keypair(user_id, &keypair, pin).await?;
        info!(user_id, key = %keypair.public.short_id(), "identity key generated");
        Ok(keypair.public.clone())
    }

    async fn store_keypair(&self, user_id: &str, keypair: &IdentityKeyPair, pin: &str) -> CoreResult<()> {
        let (salt, encrypted_private) = seal_secret(
            keypair.secret_bytes(),
            pin.as_bytes(),
            self.kdf,
            PURPOSE_IDENTITY_WRAP,
            &identity_aad(user_id),
        )
        .await?;
        let record = IdentityRecord {
            version: RECORD_VERSION,
            user_id: user_id.to_string(),
            public_key: keypair.public_b64(),
            kdf: self.kdf,
            salt,
            encrypted_private,
            created_at: Utc::now(),
        };
        self.store.set_json(&record_key(user_id), &record).await?;
        Ok(())
    }

    /// Decrypt the private key into memory. Dropped (and zeroized) by the
    /// caller as soon as the operation is done.
    pub(crate) async fn unlock(&self, user_id: &str, pin: &str) -> CoreResult<IdentityKeyPair> {
        let record = self
            .record(user_id)
            .await?
            .ok_or_else(|| CoreError::ConfigurationMissing(format!("no identity for {user_id}")))?;
        let keypair = open_secret(
            &record.salt,
            &record.encrypted_private,
            pin.as_bytes(),
            record.kdf,
            PURPOSE_IDENTITY_WRAP,
            &identity_aad(user_id),
        )
        .await?;
        if keypair.public_b64() != record.public_key {
            return Err(CoreError::DecryptionFailed);
        }
        Ok(keypair)
    }

    /// Re-encrypt the private key under a new PIN.
    pub async fn rewrap(&self, user_id: &str, old_pin: &str, new_pin: &str) -> CoreResult<()> {
        let keypair = self.unlock(user_id, old_pin).await?;
        self.store_keypair(user_id, &keypair, new_pin).await?;
        info!(user_id, "identity key re-encrypted under new pin");
        Ok(())
    }

    pub async fn export_backup(&self, user_id: &str, pin: &str, passphrase: &str) -> CoreResult<String> {
        if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
            return Err(CoreError::InvalidInput(format!(
                "backup passphrase must be at least {MIN_PASSPHRASE_LEN} characters"
            )));
        }
        let keypair = self.unlock(user_id, pin).await?;
        let (salt, encrypted_private) = seal_secret(
            keypair.secret_bytes(),
            passphrase.as_bytes(),
            self.kdf,
            PURPOSE_BACKUP,
            &backup_aad(user_id),
        )
        .await?;
        let bundle = BackupBundle {
            version: RECORD_VERSION,
            user_id: user_id.to_string(),
            public_key: keypair.public_b64(),
            kdf: self.kdf,
            salt,
            encrypted_private,
            created_at: Utc::now(),
        };
        let json = serde_json::to_vec(&bundle).map_err(|e| CoreError::InvalidInput(e.to_string()))?;
        info!(user_id, "identity backup exported");
        Ok(format!("{BACKUP_PREFIX}{}", URL_SAFE_NO_PAD.encode(json)))
    }

    /// Restore from a backup bundle and re-encrypt under this device's PIN.
    /// Returns the restored user id and public key.
    pub async fn import_backup(
        &self,
        bundle: &str,
        passphrase: &str,
        pin: &str,
    ) -> CoreResult<(String, PublicKeyBytes)> {
        let bundle = parse_bundle(bundle)?;
        let keypair = open_secret(
            &bundle.salt,
            &bundle.encrypted_private,
            passphrase.as_bytes(),
            bundle.kdf,
            PURPOSE_BACKUP,
            &backup_aad(&bundle.user_id),
        )
        .await?;
        if keypair.public_b64() != bundle.public_key {
            return Err(CoreError::DecryptionFailed);
        }

        if let Some(existing) = self.public_key(&bundle.user_id).await? {
            if existing != keypair.public {
                warn!(user_id = %bundle.user_id, "replacing existing identity key from backup");
            }
        }
        self.store_keypair(&bundle.user_id, &keypair, pin).await?;
        info!(user_id = %bundle.user_id, "identity restored from backup");
        Ok((bundle.user_id.clone(), keypair.public.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sh_store::{MemoryBackend, Vault};

    use super::*;

    fn cheap() -> KdfParams {
        KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn keys() -> (IdentityKeys, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let store = SecureKeyStore::with_backend("t", backend.clone(), Vault::new());
        (IdentityKeys::new(store, cheap()), backend)
    }

    #[tokio::test]
    async fn generate_is_idempotent() {
        let (ids, _) = keys();
        assert!(!ids.has_keys("alice").await.unwrap());
        let first = ids.generate("alice", "4821").await.unwrap();
        let second = ids.generate("alice", "0000").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(ids.public_key("alice").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn private_key_is_never_stored_in_clear() {
        let (ids, backend) = keys();
        ids.generate("alice", "4821").await.unwrap();
        let secret = ids.unlock("alice", "4821").await.unwrap();
        let raw = backend.raw("t/identity/alice").unwrap();
        let raw = String::from_utf8(raw).unwrap();
        assert!(!raw.contains(&hex::encode(secret.secret_bytes())));
    }

    #[tokio::test]
    async fn wrong_pin_is_a_decryption_failure() {
        let (ids, _) = keys();
        ids.generate("alice", "4821").await.unwrap();
        assert!(matches!(ids.unlock("alice", "0000").await, Err(CoreError::DecryptionFailed)));
        assert!(matches!(
            ids.unlock("bob", "4821").await,
            Err(CoreError::ConfigurationMissing(_))
        ));
    }

    #[tokio::test]
    async fn rewrap_moves_to_new_pin() {
        let (ids, _) = keys();
        let pk = ids.generate("alice", "4821").await.unwrap();
        ids.rewrap("alice", "4821", "1357").await.unwrap();
        assert!(ids.unlock("alice", "4821").await.is_err());
        assert_eq!(ids.unlock("alice", "1357").await.unwrap().public, pk);
    }

    #[tokio::test]
    async fn backup_restores_on_another_device() {
        let (old_device, _) = keys();
        let pk = old_device.generate("alice", "4821").await.unwrap();
        let bundle = old_device
            .export_backup("alice", "4821", "correct horse")
            .await
            .unwrap();
        assert!(bundle.starts_with(BACKUP_PREFIX));

        let (new_device, _) = keys();
        assert!(matches!(
            new_device.import_backup(&bundle, "wrong passphrase", "9999").await,
            Err(CoreError::DecryptionFailed)
        ));
        let (user, restored) = new_device
            .import_backup(&bundle, "correct horse", "9999")
            .await
            .unwrap();
        assert_eq!(user, "alice");
        assert_eq!(restored, pk);
        assert_eq!(new_device.unlock("alice", "9999").await.unwrap().public, pk);
    }

    #[tokio::test]
    async fn short_passphrase_and_garbage_bundles_rejected() {
        let (ids, _) = keys();
        ids.generate("alice", "4821").await.unwrap();
        assert!(matches!(
            ids.export_backup("alice", "4821", "short").await,
            Err(CoreError::InvalidInput(_))
        ));
        assert!(ids.import_backup("nope", "whatever1", "4821").await.is_err());
        assert!(ids
            .import_backup(&format!("{BACKUP_PREFIX}e30"), "whatever1", "4821")
            .await
            .is_err());
    }
}
