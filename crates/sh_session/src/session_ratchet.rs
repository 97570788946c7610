//! SessionRatchet: per-chat ephemeral key exchange plus the message-indexed
//! ratchet.
//!
//! State machine per chat:
//!
//!   UNINITIALIZED ──init_session──▶ INITIATED ──complete_session──▶ ESTABLISHED
//!                                                                        │
//!                                          rekey_session (fresh keypair) ┘
//!
//! Session records are stored sealed under the vault data key, so the
//! ephemeral private key and the session key are protected by the PIN at
//! rest. `message_count` is the sender's ratchet clock: it only increments,
//! and only after the ciphertext has been produced and the new count is
//! durable. A re-key replaces the keys but keeps the count.
//!
//! Each record also checkpoints the last chain key used to send and the
//! chain key of the highest index received, so derivation walks forward
//! from there instead of from the session key. Incoming indices more than
//! `max_skip` past the highest one received are dropped before any
//! derivation.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use sh_crypto::{
    ratchet::{self, ChainKey},
    EphemeralKeyPair, PublicKeyBytes,
};
use sh_store::SecureKeyStore;

use crate::{
    config::RatchetConfig,
    error::{CoreError, CoreResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    Uninitialized,
    Initiated,
    Established,
}

#[derive(Serialize, Deserialize)]
struct SessionRecord {
    version: u8,
    chat_id: String,
    /// User the session is bound to, set by the first handshake.
    #[serde(default)]
    peer_id: Option<String>,
    /// Base64url.
    local_public: String,
    /// Hex.
    local_private: String,
    remote_public: Option<String>,
    /// Hex session key (HKDF output, step 0 of the ratchet).
    shared_secret: Option<String>,
    message_count: u64,
    /// Hex chain key last used to send, at `send_step`.
    #[serde(default)]
    send_chain: Option<String>,
    #[serde(default)]
    send_step: u64,
    /// First index the peer sends under the current key.
    #[serde(default)]
    recv_floor: u64,
    #[serde(default)]
    recv_high: Option<u64>,
    /// Hex chain key covering `recv_high`, at `recv_step`.
    #[serde(default)]
    recv_chain: Option<String>,
    #[serde(default)]
    recv_step: u64,
    created_at: DateTime<Utc>,
    established_at: Option<DateTime<Utc>>,
}

impl Drop for SessionRecord {
    fn drop(&mut self) {
        self.local_private.zeroize();
        self.shared_secret.zeroize();
        self.send_chain.zeroize();
        self.recv_chain.zeroize();
    }
}

impl SessionRecord {
    fn phase(&self) -> SessionPhase {
        if self.shared_secret.is_some() {
            SessionPhase::Established
        } else {
            SessionPhase::Initiated
        }
    }

    fn decode_key(&self, hex_key: &str) -> CoreResult<Zeroizing<[u8; 32]>> {
        let mut key = Zeroizing::new([0u8; 32]);
        hex::decode_to_slice(hex_key, &mut key[..])
            .map_err(|e| CoreError::StorageUnavailable(format!("session {}: {e}", self.chat_id)))?;
        Ok(key)
    }

    fn session_key(&self) -> CoreResult<Zeroizing<[u8; 32]>> {
        let hex_key = self
            .shared_secret
            .as_deref()
            .ok_or_else(|| CoreError::SessionNotEstablished(self.chat_id.clone()))?;
        self.decode_key(hex_key)
    }

    fn ephemeral(&self) -> CoreResult<EphemeralKeyPair> {
        let bytes = Zeroizing::new(
            hex::decode(&self.local_private)
                .map_err(|e| CoreError::StorageUnavailable(format!("session {}: {e}", self.chat_id)))?,
        );
        Ok(EphemeralKeyPair::from_bytes(&bytes)?)
    }

    /// Checkpoint at or before `target`, falling back to the session key.
    fn start_for(&self, chain: Option<&str>, step: u64, target: u64) -> CoreResult<ChainKey> {
        match chain {
            Some(hex_key) if step <= target => Ok(ChainKey::resume(&*self.decode_key(hex_key)?, step)),
            _ => Ok(ChainKey::root(&*self.session_key()?)),
        }
    }

    fn set_send_checkpoint(&mut self, chain: &ChainKey) {
        self.send_chain.zeroize();
        self.send_chain = Some(hex::encode(chain.as_bytes()));
        self.send_step = chain.step();
    }

    fn set_recv_checkpoint(&mut self, index: u64, chain: &ChainKey) {
        self.recv_chain.zeroize();
        self.recv_chain = Some(hex::encode(chain.as_bytes()));
        self.recv_step = chain.step();
        self.recv_high = Some(index);
    }

    /// Install a new agreed key. The sender's count carries over.
    fn install(&mut self, remote: &PublicKeyBytes, key: &[u8; 32], peer_next_index: u64) {
        self.shared_secret.zeroize();
        self.shared_secret = Some(hex::encode(key));
        self.remote_public = Some(remote.to_b64());
        self.send_chain.zeroize();
        self.send_chain = None;
        self.send_step = 0;
        self.recv_chain.zeroize();
        self.recv_chain = None;
        self.recv_step = 0;
        self.recv_high = None;
        self.recv_floor = peer_next_index;
        self.established_at = Some(Utc::now());
    }
}

/// Output of `encrypt_with_session`. The index travels with the ciphertext.
#[derive(Debug, Clone)]
pub struct SessionCiphertext {
    /// `nonce || ciphertext + tag`
    pub ciphertext: Vec<u8>,
    pub message_index: u64,
}

fn record_key(chat_id: &str) -> String {
    format!("session/{chat_id}")
}

pub struct SessionRatchet {
    store: SecureKeyStore,
    config: RatchetConfig,
    chat_locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionRatchet {
    pub fn new(store: SecureKeyStore, config: RatchetConfig) -> Self {
        Self {
            store,
            config,
            chat_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn chat_lock(&self, chat_id: &str) -> Arc<Mutex<()>> {
        self.chat_locks
            .lock()
            .entry(chat_id.to_string())
            .or_default()
            .clone()
    }

    async fn load(&self, chat_id: &str) -> CoreResult<Option<SessionRecord>> {
        Ok(self.store.get_sealed_json(&record_key(chat_id)).await?)
    }

    async fn save(&self, record: &SessionRecord) -> CoreResult<()> {
        self.store
            .set_sealed_json(&record_key(&record.chat_id), record)
            .await?;
        Ok(())
    }

    /// Generate this side's ephemeral keypair for `chat_id`. Returns the
    /// existing public key if the chat is already initiated or established.
    pub async fn init_session(&self, chat_id: &str) -> CoreResult<PublicKeyBytes> {
        let lock = self.chat_lock(chat_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.load(chat_id).await? {
            return Ok(PublicKeyBytes::from_b64(&existing.local_public)?);
        }

        let eph = EphemeralKeyPair::generate();
        let record = SessionRecord {
            version: 1,
            chat_id: chat_id.to_string(),
            peer_id: None,
            local_public: eph.public.to_b64(),
            local_private: hex::encode(eph.secret_bytes()),
            remote_public: None,
            shared_secret: None,
            message_count: 0,
            send_chain: None,
            send_step: 0,
            recv_floor: 0,
            recv_high: None,
            recv_chain: None,
            recv_step: 0,
            created_at: Utc::now(),
            established_at: None,
        };
        self.save(&record).await?;
        info!(chat_id, "session initiated");
        Ok(eph.public.clone())
    }

    /// Agree with the peer's ephemeral key and store the session key.
    /// `Ok(false)` if the chat was never initiated, the key is unusable, or
    /// the chat is already established under a different key.
    pub async fn complete_session(&self, chat_id: &str, remote: &PublicKeyBytes) -> CoreResult<bool> {
        self.complete_session_from(chat_id, remote, 0).await
    }

    /// `complete_session` for a peer whose first message under this key
    /// carries index `peer_next_index`.
    pub async fn complete_session_from(
        &self,
        chat_id: &str,
        remote: &PublicKeyBytes,
        peer_next_index: u64,
    ) -> CoreResult<bool> {
        let lock = self.chat_lock(chat_id);
        let _guard = lock.lock().await;

        let Some(mut record) = self.load(chat_id).await? else {
            debug!(chat_id, "complete_session without init");
            return Ok(false);
        };

        if record.phase() == SessionPhase::Established {
            if record.remote_public.as_deref() == Some(remote.to_b64().as_str()) {
                return Ok(true);
            }
            warn!(chat_id, "refusing different peer key on established session");
            return Ok(false);
        }

        let eph = record.ephemeral()?;
        let key = match eph.agree(remote) {
            Ok(k) => k,
            Err(e) => {
                warn!(chat_id, error = %e, "rejected peer ephemeral key");
                return Ok(false);
            }
        };

        record.install(remote, &key, peer_next_index);
        self.save(&record).await?;
        info!(chat_id, "session established");
        Ok(true)
    }

    /// Replace this side's ephemeral keypair and agree with the peer's new
    /// key on an established chat. Returns the new local public key, which
    /// the peer needs to complete its side.
    pub async fn rekey_session(
        &self,
        chat_id: &str,
        remote: &PublicKeyBytes,
        peer_next_index: u64,
    ) -> CoreResult<PublicKeyBytes> {
        let lock = self.chat_lock(chat_id);
        let _guard = lock.lock().await;

        let mut record = match self.load(chat_id).await? {
            Some(r) if r.phase() == SessionPhase::Established => r,
            _ => return Err(CoreError::SessionNotEstablished(chat_id.to_string())),
        };

        let eph = EphemeralKeyPair::generate();
        let key = eph
            .agree(remote)
            .map_err(|e| CoreError::InvalidInput(format!("peer ephemeral key: {e}")))?;

        record.local_private.zeroize();
        record.local_private = hex::encode(eph.secret_bytes());
        record.local_public = eph.public.to_b64();
        record.install(remote, &key, peer_next_index);
        self.save(&record).await?;
        warn!(chat_id, message_count = record.message_count, "session re-keyed");
        Ok(eph.public.clone())
    }

    /// Bind the chat to `peer_id` if it is not bound yet. `Ok(false)` when
    /// there is no session or it belongs to someone else.
    pub async fn bind_peer(&self, chat_id: &str, peer_id: &str) -> CoreResult<bool> {
        let lock = self.chat_lock(chat_id);
        let _guard = lock.lock().await;

        let Some(mut record) = self.load(chat_id).await? else {
            return Ok(false);
        };
        match record.peer_id.as_deref() {
            Some(bound) => Ok(bound == peer_id),
            None => {
                record.peer_id = Some(peer_id.to_string());
                self.save(&record).await?;
                Ok(true)
            }
        }
    }

    pub async fn session_phase(&self, chat_id: &str) -> CoreResult<SessionPhase> {
        Ok(self
            .load(chat_id)
            .await?
            .map_or(SessionPhase::Uninitialized, |r| r.phase()))
    }

    pub async fn has_active_session(&self, chat_id: &str) -> CoreResult<bool> {
        Ok(self.session_phase(chat_id).await? == SessionPhase::Established)
    }

    pub async fn message_count(&self, chat_id: &str) -> CoreResult<u64> {
        Ok(self.load(chat_id).await?.map_or(0, |r| r.message_count))
    }

    pub async fn local_public_key(&self, chat_id: &str) -> CoreResult<Option<PublicKeyBytes>> {
        match self.load(chat_id).await? {
            Some(r) => Ok(Some(PublicKeyBytes::from_b64(&r.local_public)?)),
            None => Ok(None),
        }
    }

    pub async fn remote_public_key(&self, chat_id: &str) -> CoreResult<Option<PublicKeyBytes>> {
        match self.load(chat_id).await?.and_then(|r| r.remote_public.clone()) {
            Some(b64) => Ok(Some(PublicKeyBytes::from_b64(&b64)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_session(&self, chat_id: &str) -> CoreResult<()> {
        let lock = self.chat_lock(chat_id);
        let _guard = lock.lock().await;
        self.store.delete(&record_key(chat_id)).await?;
        info!(chat_id, "session deleted");
        Ok(())
    }

    /// Encrypt under the key for the current `message_count`, then advance
    /// the count.
    pub async fn encrypt_with_session(&self, chat_id: &str, plaintext: &[u8]) -> CoreResult<SessionCiphertext> {
        let lock = self.chat_lock(chat_id);
        let _guard = lock.lock().await;

        let mut record = self
            .load(chat_id)
            .await?
            .ok_or_else(|| CoreError::SessionNotEstablished(chat_id.to_string()))?;
        if record.phase() != SessionPhase::Established {
            return Err(CoreError::SessionNotEstablished(chat_id.to_string()));
        }

        let index = record.message_count;
        let target = ratchet::step_for_index(index, self.config.step);
        let start = record.start_for(record.send_chain.as_deref(), record.send_step, target)?;
        let chain = ratchet::advance_to(&start, index, self.config.step, self.config.max_steps)
            .map_err(|e| CoreError::InvalidInput(format!("session {chat_id} exhausted: {e}")))?;
        let ciphertext = ratchet::seal_message(&chain, chat_id, index, plaintext)?;

        record.message_count = index + 1;
        record.set_send_checkpoint(&chain);
        self.save(&record).await?;
        debug!(chat_id, message_index = index, "encrypted with session");
        Ok(SessionCiphertext {
            ciphertext,
            message_index: index,
        })
    }

    /// Derive the key for `message_index` and decrypt. `Ok(None)` on any
    /// cryptographic failure or an index outside the receive window.
    pub async fn decrypt_with_session(
        &self,
        chat_id: &str,
        ciphertext: &[u8],
        message_index: u64,
    ) -> CoreResult<Option<Zeroizing<Vec<u8>>>> {
        let lock = self.chat_lock(chat_id);
        let _guard = lock.lock().await;

        let mut record = self
            .load(chat_id)
            .await?
            .ok_or_else(|| CoreError::SessionNotEstablished(chat_id.to_string()))?;
        if record.phase() != SessionPhase::Established {
            return Err(CoreError::SessionNotEstablished(chat_id.to_string()));
        }

        let high = record.recv_high.unwrap_or(record.recv_floor).max(record.recv_floor);
        if message_index < record.recv_floor || message_index > high.saturating_add(self.config.max_skip) {
            debug!(chat_id, message_index, high, "index outside receive window");
            return Ok(None);
        }

        let target = ratchet::step_for_index(message_index, self.config.step);
        let start = record.start_for(record.recv_chain.as_deref(), record.recv_step, target)?;
        let chain = match ratchet::advance_to(&start, message_index, self.config.step, self.config.max_steps) {
            Ok(k) => k,
            Err(e) => {
                debug!(chat_id, message_index, error = %e, "index out of range");
                return Ok(None);
            }
        };
        let plaintext = match ratchet::open_message(&chain, chat_id, message_index, ciphertext) {
            Ok(pt) => pt,
            Err(_) => {
                debug!(chat_id, message_index, "session decrypt failed");
                return Ok(None);
            }
        };

        if record.recv_high.map_or(true, |h| message_index > h) {
            record.set_recv_checkpoint(message_index, &chain);
            self.save(&record).await?;
        }
        Ok(Some(plaintext))
    }
}
