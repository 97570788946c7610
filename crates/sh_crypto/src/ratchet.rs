//! Message-indexed symmetric ratchet.
//!
//! The key that encrypts message `i` is the session key advanced by
//! `floor(i / step)` applications of a one-way step function:
//!
//!   K_0     = session key (HKDF of the ephemeral ECDH output)
//!   K_{n+1} = HKDF-SHA256(ikm = K_n, salt = "ratchet-step-{n}", info = "sh-ratchet-v1")
//!
//! The derivation is a pure function of (session key, index), so the
//! receiver can re-derive from K_0 for whatever index arrives and
//! out-of-order delivery needs no skipped-key bookkeeping. Callers that
//! keep a checkpoint use `advance_to` to walk forward from it instead.
//!
//! Forward secrecy within a session: there is no operation mapping K_n back
//! to K_{n-1}. `ChainKey` only moves forward via `advance`.

use zeroize::{Zeroizing, ZeroizeOnDrop};

use crate::{aead, error::CryptoError, kdf};

pub const DEFAULT_RATCHET_STEP: u64 = 10;
const RATCHET_INFO: &[u8] = b"sh-ratchet-v1";

/// A ratchet chain key at a given step. Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct ChainKey {
    key: [u8; 32],
    #[zeroize(skip)]
    step: u64,
}

impl ChainKey {
    /// Step 0: the raw session key.
    pub fn root(session_key: &[u8; 32]) -> Self {
        Self {
            key: *session_key,
            step: 0,
        }
    }

    /// Rebuild a chain key from a stored checkpoint.
    pub fn resume(key: &[u8; 32], step: u64) -> Self {
        Self { key: *key, step }
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// One-way advance: K_n → K_{n+1}.
    pub fn advance(&self) -> Result<Self, CryptoError> {
        let salt = format!("ratchet-step-{}", self.step);
        let mut next = [0u8; 32];
        kdf::hkdf_expand(&self.key, Some(salt.as_bytes()), RATCHET_INFO, &mut next)?;
        Ok(Self {
            key: next,
            step: self.step + 1,
        })
    }
}

/// Ratchet step that covers message `index`.
pub fn step_for_index(index: u64, step_size: u64) -> u64 {
    index / step_size.max(1)
}

/// Derive the chain key used for message `index`, replaying from the
/// session key. Fails when the required step exceeds `max_steps`.
pub fn key_for_index(
    session_key: &[u8; 32],
    index: u64,
    step_size: u64,
    max_steps: u64,
) -> Result<ChainKey, CryptoError> {
    advance_to(&ChainKey::root(session_key), index, step_size, max_steps)
}

/// Walk `from` forward to the step covering `index`. A checkpoint past
/// that step cannot go back and yields `RatchetBehind`.
pub fn advance_to(
    from: &ChainKey,
    index: u64,
    step_size: u64,
    max_steps: u64,
) -> Result<ChainKey, CryptoError> {
    let target = step_for_index(index, step_size);
    if target > max_steps {
        return Err(CryptoError::RatchetLimit {
            requested: target,
            limit: max_steps,
        });
    }
    if target < from.step() {
        return Err(CryptoError::RatchetBehind {
            requested: target,
            current: from.step(),
        });
    }
    let mut key = from.clone();
    while key.step() < target {
        key = key.advance()?;
    }
    Ok(key)
}

/// Associated data binding a ciphertext to its conversation and index.
pub fn message_aad(chat_id: &str, index: u64) -> Vec<u8> {
    let mut aad = Vec::with_capacity(chat_id.len() + 9);
    aad.extend_from_slice(chat_id.as_bytes());
    aad.push(0);
    aad.extend_from_slice(&index.to_be_bytes());
    aad
}

/// Encrypt one message at `index`. Output is `nonce || ciphertext + tag`.
pub fn seal_message(
    key: &ChainKey,
    chat_id: &str,
    index: u64,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    aead::encrypt(key.as_bytes(), plaintext, &message_aad(chat_id, index))
}

/// Decrypt one message at `index`.
pub fn open_message(
    key: &ChainKey,
    chat_id: &str,
    index: u64,
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    aead::decrypt(key.as_bytes(), ciphertext, &message_aad(chat_id, index))
}
