//! SecureChannel: one local user's view of the whole core.
//!
//! Wires PinGuard, IdentityKeys, AsymmetricChannel, SessionRatchet,
//! ContactKeys and IdentityVerifier to an injected directory and transport.
//!
//! Path selection on send: an ESTABLISHED ratchet session for the chat
//! always wins. Only without one does a message go out as a sealed box to
//! the peer's directory key.

use std::sync::Arc;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use sh_crypto::PublicKeyBytes;
use sh_proto::{Directory, Transport, TransportPayload};
use sh_store::{SecureKeyStore, Vault};

use crate::{
    asymmetric::AsymmetricChannel,
    clock::{Clock, SystemClock},
    config::ShroudConfig,
    contacts::{ContactKeys, KeyStatus},
    error::{CoreError, CoreResult},
    identity_keys::{self, IdentityKeys},
    pin_guard::PinGuard,
    session_ratchet::{SessionPhase, SessionRatchet},
    verifier::{IdentityVerifier, SecurityCode},
};

/// Which path `send` took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Session { message_index: u64 },
    Sealed,
}

/// What `receive` made of an incoming payload.
#[derive(Debug)]
pub enum Received {
    /// Handshake processed; the chat is now established. `replied` is set
    /// when this side answered with its own handshake, either for a new
    /// session or after re-keying one the peer restarted.
    SessionEstablished { chat_id: String, peer_id: String, replied: bool },
    Message {
        chat_id: String,
        sender_id: String,
        message_index: u64,
        plaintext: Zeroizing<Vec<u8>>,
    },
    /// Ciphertext that failed to decrypt. Drop it and wait for a resend.
    Undecryptable { chat_id: String, message_index: u64 },
    /// Sealed box for this user; open with `open_sealed` and the PIN.
    Sealed { sender_id: String, ciphertext: Vec<u8> },
}

pub struct SecureChannel {
    user_id: String,
    config: ShroudConfig,
    store: SecureKeyStore,
    pin: PinGuard,
    identity: IdentityKeys,
    asymmetric: AsymmetricChannel,
    ratchet: SessionRatchet,
    contacts: ContactKeys,
    verifier: IdentityVerifier,
    directory: Arc<dyn Directory>,
    transport: Arc<dyn Transport>,
}

impl SecureChannel {
    /// Open the configured key store and build the channel on the system
    /// clock.
    pub async fn open(
        user_id: &str,
        config: ShroudConfig,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let vault = Vault::with_auto_lock(config.vault.auto_lock_secs);
        let store = SecureKeyStore::open(&config.origin, &config.storage, vault).await?;
        Ok(Self::new(user_id, config, store, Arc::new(SystemClock), directory, transport))
    }

    pub fn new(
        user_id: &str,
        config: ShroudConfig,
        store: SecureKeyStore,
        clock: Arc<dyn Clock>,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let pin = PinGuard::new(store.clone(), clock, config.pin.clone(), config.kdf);
        let identity = IdentityKeys::new(store.clone(), config.kdf);
        let asymmetric = AsymmetricChannel::new(identity.clone());
        let ratchet = SessionRatchet::new(store.clone(), config.ratchet.clone());
        let contacts = ContactKeys::new(store.clone());
        Self {
            user_id: user_id.to_string(),
            config,
            store,
            pin,
            identity,
            asymmetric,
            ratchet,
            contacts,
            verifier: IdentityVerifier::new(),
            directory,
            transport,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn pin_guard(&self) -> &PinGuard {
        &self.pin
    }

    pub fn identity(&self) -> &IdentityKeys {
        &self.identity
    }

    pub fn ratchet(&self) -> &SessionRatchet {
        &self.ratchet
    }

    pub fn contacts(&self) -> &ContactKeys {
        &self.contacts
    }

    pub fn verifier(&self) -> &IdentityVerifier {
        &self.verifier
    }

    // ── PIN gate ─────────────────────────────────────────────────────────────

    /// Verify `pin` through PinGuard, clearing failures on success.
    async fn authenticate(&self, pin: &str) -> CoreResult<()> {
        let remaining_ms = self.pin.remaining_lockout_ms().await?;
        if remaining_ms > 0 {
            return Err(CoreError::LockedOut { remaining_ms });
        }
        if self.pin.verify(pin).await? {
            self.pin.clear_failures().await?;
            return Ok(());
        }
        match self.pin.remaining_lockout_ms().await? {
            0 => Err(CoreError::AuthenticationFailed),
            remaining_ms => Err(CoreError::LockedOut { remaining_ms }),
        }
    }

    /// First-run setup: configure the PIN if needed, create the identity key
    /// and publish it. Safe to repeat with the same PIN.
    pub async fn bootstrap(&self, pin: &str) -> CoreResult<PublicKeyBytes> {
        if self.pin.is_configured().await? {
            self.authenticate(pin).await?;
        } else if !self.pin.setup(pin).await? {
            return Err(CoreError::InvalidInput(format!(
                "pin must be exactly {} digits",
                self.config.pin.length
            )));
        }

        let public = self.identity.generate(&self.user_id, pin).await?;
        self.directory
            .put_public_key(&self.user_id, &public.to_b64(), None)
            .await?;
        info!(user_id = %self.user_id, key = %public.short_id(), "identity published");
        Ok(public)
    }

    /// Verify the PIN and open the vault that seals session records.
    pub async fn unlock(&self, pin: &str) -> CoreResult<()> {
        if !self.pin.is_configured().await? {
            return Err(CoreError::ConfigurationMissing("no pin set up".into()));
        }
        self.authenticate(pin).await?;
        let created = self.store.unlock_vault(pin.as_bytes(), &self.config.kdf).await?;
        info!(user_id = %self.user_id, new_vault_key = created, "unlocked");
        Ok(())
    }

    pub async fn lock(&self) {
        self.store.vault().lock().await;
    }

    pub async fn is_locked(&self) -> bool {
        self.store.vault().is_locked().await
    }

    /// Replace the PIN, re-wrapping everything protected by the old one.
    pub async fn change_pin(&self, old_pin: &str, new_pin: &str) -> CoreResult<()> {
        if !self.pin.policy().accepts(new_pin) {
            return Err(CoreError::InvalidInput(format!(
                "pin must be exactly {} digits",
                self.config.pin.length
            )));
        }
        self.authenticate(old_pin).await?;
        self.store
            .rewrap_vault(old_pin.as_bytes(), new_pin.as_bytes(), &self.config.kdf)
            .await?;
        if self.identity.has_keys(&self.user_id).await? {
            self.identity.rewrap(&self.user_id, old_pin, new_pin).await?;
        }
        self.pin.setup(new_pin).await?;
        info!(user_id = %self.user_id, "pin changed");
        Ok(())
    }

    // ── Sessions and messages ────────────────────────────────────────────────

    /// Start a ratchet session for `chat_id` and send our handshake.
    pub async fn start_session(&self, chat_id: &str, peer_id: &str) -> CoreResult<()> {
        let public = self.ratchet.init_session(chat_id).await?;
        self.bind_session_peer(chat_id, peer_id).await?;
        self.send_payload(peer_id, &TransportPayload::handshake(chat_id, &self.user_id, &public))
            .await
    }

    async fn bind_session_peer(&self, chat_id: &str, peer_id: &str) -> CoreResult<()> {
        if self.ratchet.bind_peer(chat_id, peer_id).await? {
            return Ok(());
        }
        warn!(chat_id, peer_id, "session belongs to another peer");
        Err(CoreError::InvalidInput(format!("{peer_id} is not the peer of {chat_id}")))
    }

    /// Apply an incoming handshake. Returns whether we answered with one.
    async fn accept_handshake(
        &self,
        chat_id: &str,
        sender_id: &str,
        remote: &PublicKeyBytes,
        reply: bool,
        next_index: u64,
    ) -> CoreResult<bool> {
        let rejected = || CoreError::InvalidInput(format!("handshake for {chat_id} rejected"));
        match self.ratchet.session_phase(chat_id).await? {
            SessionPhase::Uninitialized => {
                if reply {
                    return Err(CoreError::InvalidInput(format!("handshake reply for unknown chat {chat_id}")));
                }
                let public = self.ratchet.init_session(chat_id).await?;
                self.bind_session_peer(chat_id, sender_id).await?;
                if !self.ratchet.complete_session_from(chat_id, remote, next_index).await? {
                    return Err(rejected());
                }
                self.send_payload(
                    sender_id,
                    &TransportPayload::handshake_reply(chat_id, &self.user_id, &public, 0),
                )
                .await?;
                Ok(true)
            }
            SessionPhase::Initiated => {
                self.bind_session_peer(chat_id, sender_id).await?;
                if !self.ratchet.complete_session_from(chat_id, remote, next_index).await? {
                    return Err(rejected());
                }
                Ok(false)
            }
            SessionPhase::Established => {
                self.bind_session_peer(chat_id, sender_id).await?;
                if self.ratchet.remote_public_key(chat_id).await?.as_ref() == Some(remote) {
                    return Ok(false);
                }
                if reply {
                    warn!(chat_id, sender_id, "stale handshake reply rejected");
                    return Err(rejected());
                }
                let our_next = self.ratchet.message_count(chat_id).await?;
                let public = self.ratchet.rekey_session(chat_id, remote, next_index).await?;
                self.send_payload(
                    sender_id,
                    &TransportPayload::handshake_reply(chat_id, &self.user_id, &public, our_next),
                )
                .await?;
                Ok(true)
            }
        }
    }

    pub async fn send(&self, chat_id: &str, peer_id: &str, plaintext: &[u8]) -> CoreResult<Delivery> {
        if self.contacts.is_blocked(peer_id).await? {
            return Err(CoreError::UntrustedKeyChange(peer_id.to_string()));
        }

        if self.ratchet.has_active_session(chat_id).await? {
            let out = self.ratchet.encrypt_with_session(chat_id, plaintext).await?;
            let payload =
                TransportPayload::ciphertext(chat_id, &self.user_id, out.message_index, &out.ciphertext)?;
            self.send_payload(peer_id, &payload).await?;
            return Ok(Delivery::Session {
                message_index: out.message_index,
            });
        }

        let peer_key = self.peer_key(peer_id).await?.ok_or_else(|| {
            CoreError::ConfigurationMissing(format!("no published key for {peer_id}"))
        })?;
        if self.contacts.observe(peer_id, &peer_key).await? == KeyStatus::Changed {
            return Err(CoreError::UntrustedKeyChange(peer_id.to_string()));
        }
        let sealed = self.asymmetric.encrypt(plaintext, &peer_key)?;
        self.send_payload(peer_id, &TransportPayload::sealed(&self.user_id, peer_id, &sealed))
            .await?;
        debug!(chat_id, peer_id, "sent sealed box");
        Ok(Delivery::Sealed)
    }

    pub async fn receive(&self, bytes: &[u8]) -> CoreResult<Received> {
        let payload = TransportPayload::decode(bytes)?;
        match &payload {
            TransportPayload::Handshake {
                chat_id,
                sender_id,
                reply,
                next_index,
                ..
            } => {
                let remote = payload.handshake_key()?;
                let replied = self
                    .accept_handshake(chat_id, sender_id, &remote, *reply, *next_index)
                    .await?;
                Ok(Received::SessionEstablished {
                    chat_id: chat_id.clone(),
                    peer_id: sender_id.clone(),
                    replied,
                })
            }
            TransportPayload::Ciphertext {
                chat_id,
                sender_id,
                message_index,
                ..
            } => {
                let ciphertext = payload.ciphertext_bytes()?;
                match self
                    .ratchet
                    .decrypt_with_session(chat_id, &ciphertext, *message_index)
                    .await?
                {
                    Some(plaintext) => Ok(Received::Message {
                        chat_id: chat_id.clone(),
                        sender_id: sender_id.clone(),
                        message_index: *message_index,
                        plaintext,
                    }),
                    None => Ok(Received::Undecryptable {
                        chat_id: chat_id.clone(),
                        message_index: *message_index,
                    }),
                }
            }
            TransportPayload::Sealed {
                sender_id,
                recipient_id,
                ..
            } => {
                if recipient_id != &self.user_id {
                    warn!(recipient_id, "sealed box addressed to another user");
                    return Err(CoreError::InvalidInput("sealed box not addressed to this user".into()));
                }
                Ok(Received::Sealed {
                    sender_id: sender_id.clone(),
                    ciphertext: payload.ciphertext_bytes()?,
                })
            }
        }
    }

    /// Open a sealed box. The PIN goes through the lockout gate first so
    /// this cannot be used to brute-force the identity key.
    pub async fn open_sealed(&self, ciphertext: &[u8], pin: &str) -> CoreResult<Zeroizing<Vec<u8>>> {
        self.authenticate(pin).await?;
        self.asymmetric.decrypt(ciphertext, &self.user_id, pin).await
    }

    // ── Verification ─────────────────────────────────────────────────────────

    async fn peer_key(&self, peer_id: &str) -> CoreResult<Option<PublicKeyBytes>> {
        match self.directory.get_public_key(peer_id).await? {
            Some(rec) => Ok(Some(PublicKeyBytes::from_b64(&rec.encryption_key).map_err(|e| {
                CoreError::InvalidInput(format!("directory key for {peer_id}: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    /// Security code for a pairwise chat, bound to both identity keys when
    /// both are known.
    pub async fn security_code(&self, chat_id: &str, peer_id: &str) -> CoreResult<SecurityCode> {
        let ids = [self.user_id.clone(), peer_id.to_string()];
        let own = self.identity.public_key(&self.user_id).await?;
        let peer = self.peer_key(peer_id).await?;
        if let Some(ref pk) = peer {
            self.contacts.observe(peer_id, pk).await?;
        }
        let keys = match (own, peer) {
            (Some(a), Some(b)) => Some(vec![a, b]),
            _ => None,
        };
        Ok(self.verifier.generate_code(chat_id, &ids, keys.as_deref()))
    }

    pub async fn security_qr(&self, chat_id: &str, peer_id: &str) -> CoreResult<String> {
        let code = self.security_code(chat_id, peer_id).await?;
        self.verifier.encode_qr(&code)
    }

    /// Compare a code the peer showed (typed or scanned) with ours and, on a
    /// key-bound match, mark the peer's current key as verified.
    pub async fn confirm_peer_code(&self, chat_id: &str, peer_id: &str, peer_code: &str) -> CoreResult<bool> {
        let code = self.security_code(chat_id, peer_id).await?;
        let shown = match self.verifier.decode_qr(peer_code) {
            Ok(qr) if qr.chat_id == chat_id => qr.code,
            Ok(_) => return Ok(false),
            Err(_) => peer_code.to_string(),
        };
        if !code.bound_to_keys || !self.verifier.verify_codes_match(&code.display_code, &shown) {
            return Ok(false);
        }
        if let Some(pk) = self.peer_key(peer_id).await? {
            self.contacts.mark_verified(peer_id, &pk).await?;
        }
        Ok(true)
    }

    // ── Backup ───────────────────────────────────────────────────────────────

    pub async fn export_backup(&self, pin: &str, passphrase: &str) -> CoreResult<String> {
        self.authenticate(pin).await?;
        self.identity.export_backup(&self.user_id, pin, passphrase).await
    }

    /// Restore the identity onto this device under `pin`, setting the PIN
    /// up first on a fresh device.
    pub async fn import_backup(&self, bundle: &str, passphrase: &str, pin: &str) -> CoreResult<PublicKeyBytes> {
        let owner = identity_keys::backup_user_id(bundle)?;
        if owner != self.user_id {
            return Err(CoreError::InvalidInput(format!(
                "backup belongs to {owner}, not {}",
                self.user_id
            )));
        }
        if self.pin.is_configured().await? {
            self.authenticate(pin).await?;
        } else if !self.pin.setup(pin).await? {
            return Err(CoreError::InvalidInput(format!(
                "pin must be exactly {} digits",
                self.config.pin.length
            )));
        }
        let (_, public) = self.identity.import_backup(bundle, passphrase, pin).await?;
        self.directory
            .put_public_key(&self.user_id, &public.to_b64(), None)
            .await?;
        Ok(public)
    }

    async fn send_payload(&self, peer_id: &str, payload: &TransportPayload) -> CoreResult<()> {
        let bytes = payload.encode()?;
        self.transport.send(peer_id, &bytes).await?;
        Ok(())
    }
}
