//! Identity key material
//!
//! Each *user* has one long-term `IdentityKeyPair` per device. It is an
//! X25519 keypair used for direct (sealed-box) encryption to that user.
//! The public half is what the external directory publishes; the secret
//! half only ever exists in memory inside a `IdentityKeyPair`, which clears
//! itself on drop.
//!
//! Ephemeral session keys use the same newtypes so both paths share one
//! wire encoding: base64url without padding of the 32 raw bytes.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;

// ── Newtype wrappers ──────────────────────────────────────────────────────────

/// 32-byte X25519 public key, base64url-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKeyBytes(pub Vec<u8>);

impl PublicKeyBytes {
    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE_NO_PAD.decode(s.trim())?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "Public key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn to_x25519(&self) -> Result<X25519Public, CryptoError> {
        let arr: [u8; KEY_LEN] = self
            .0
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("public key not 32 bytes".into()))?;
        Ok(X25519Public::from(arr))
    }

    /// Short hex fingerprint for logs and debugging output (first 8 bytes).
    pub fn short_id(&self) -> String {
        hex::encode(&self.0[..self.0.len().min(8)])
    }
}

impl From<&X25519Public> for PublicKeyBytes {
    fn from(pk: &X25519Public) -> Self {
        Self(pk.as_bytes().to_vec())
    }
}

// ── Identity keypair ──────────────────────────────────────────────────────────

/// Long-term identity key.  Drop clears memory via ZeroizeOnDrop.
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)]
    pub public: PublicKeyBytes,
    secret_bytes: [u8; KEY_LEN],
}

impl IdentityKeyPair {
    pub fn generate() -> Result<Self, CryptoError> {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKeyBytes::from(&X25519Public::from(&secret));
        Ok(Self {
            public,
            secret_bytes: secret.to_bytes(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "Identity key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; KEY_LEN];
        arr.copy_from_slice(bytes);
        let secret = StaticSecret::from(arr);
        let public = PublicKeyBytes::from(&X25519Public::from(&secret));
        Ok(Self {
            public,
            secret_bytes: secret.to_bytes(),
        })
    }

    pub fn secret_bytes(&self) -> &[u8; KEY_LEN] {
        &self.secret_bytes
    }

    pub(crate) fn static_secret(&self) -> StaticSecret {
        StaticSecret::from(self.secret_bytes)
    }

    /// Export the public key in base64 format for directory upload.
    pub fn public_b64(&self) -> String {
        self.public.to_b64()
    }
}

// ── Ephemeral keypair ─────────────────────────────────────────────────────────

/// Per-session X25519 keypair. Same layout as the identity key but never
/// published to the directory and never reused across sessions.
#[derive(ZeroizeOnDrop)]
pub struct EphemeralKeyPair {
    #[zeroize(skip)]
    pub public: PublicKeyBytes,
    secret_bytes: [u8; KEY_LEN],
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKeyBytes::from(&X25519Public::from(&secret));
        Self {
            public,
            secret_bytes: secret.to_bytes(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let inner = IdentityKeyPair::from_bytes(bytes)?;
        Ok(Self {
            public: inner.public.clone(),
            secret_bytes: *inner.secret_bytes(),
        })
    }

    pub fn secret_bytes(&self) -> &[u8; KEY_LEN] {
        &self.secret_bytes
    }

    /// X25519 agreement with the peer's ephemeral public key, followed by
    /// HKDF under the versioned session context. Both sides obtain the same
    /// key regardless of which one calls first.
    pub fn agree(&self, remote: &PublicKeyBytes) -> Result<zeroize::Zeroizing<[u8; 32]>, CryptoError> {
        let remote_pk = remote.to_x25519()?;
        let shared = StaticSecret::from(self.secret_bytes).diffie_hellman(&remote_pk);
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }

        let (lo, hi) = if self.public <= *remote {
            (&self.public, remote)
        } else {
            (remote, &self.public)
        };
        let mut transcript = Vec::with_capacity(2 * KEY_LEN);
        transcript.extend_from_slice(lo.as_bytes());
        transcript.extend_from_slice(hi.as_bytes());

        let key = crate::kdf::derive_session_key(shared.as_bytes(), &transcript)?;
        Ok(zeroize::Zeroizing::new(key))
    }
}
