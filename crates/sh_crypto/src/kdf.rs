//! Key derivation functions
//!
//! `stretch_secret`: Argon2id followed by an HKDF purpose split. Used for
//!   every PIN- or passphrase-derived key (PIN verification, identity key
//!   wrapping, vault key wrapping, backups).
//!
//! `hkdf_expand` / `derive_session_key`: HKDF-SHA256, used for session key
//!   material.

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Purpose labels. Each PIN-derived key is split off with its own label so a
/// stored verification tag never doubles as an encryption key.
pub const PURPOSE_PIN_VERIFY: &[u8] = b"sh-pin-verify-v1";
pub const PURPOSE_IDENTITY_WRAP: &[u8] = b"sh-identity-wrap-v1";
pub const PURPOSE_VAULT_WRAP: &[u8] = b"sh-vault-wrap-v1";
pub const PURPOSE_BACKUP: &[u8] = b"sh-backup-v1";

/// Versioned context string for ephemeral session keys.
pub const SESSION_CONTEXT: &[u8] = b"sh-session-v1";

pub const SALT_LEN: usize = 16;

// ── Argon2id parameters ───────────────────────────────────────────────────────

/// Argon2id cost parameters. Stored next to every record they protect, so
/// changing the configured defaults never orphans existing records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// m_cost in KiB
    pub memory_kib: u32,
    /// t_cost
    pub iterations: u32,
    /// p_cost
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// Tuned for interactive (desktop/mobile) use: 64 MiB, 3 passes, 1 lane.
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    fn argon2_params(&self) -> Result<Params, CryptoError> {
        Params::new(self.memory_kib, self.iterations, self.parallelism, Some(32))
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
    }

    /// Reject parameter sets Argon2 would refuse at derivation time.
    pub fn validate(&self) -> Result<(), CryptoError> {
        self.argon2_params().map(|_| ())
    }
}

// ── Derived keys ──────────────────────────────────────────────────────────────

/// 32-byte key derived from a low-entropy secret. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct DerivedKey([u8; 32]);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Derive a purpose-bound key from a PIN or passphrase + salt.
/// The salt should be stored alongside the protected record (not secret).
pub fn stretch_secret(
    secret: &[u8],
    salt: &[u8],
    params: &KdfParams,
    purpose: &[u8],
) -> Result<DerivedKey, CryptoError> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.argon2_params()?);
    let mut stretched = zeroize::Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(secret, salt, &mut stretched[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let mut out = [0u8; 32];
    hkdf_expand(&stretched[..], None, purpose, &mut out)?;
    Ok(DerivedKey(out))
}

/// Generate a fresh random 16-byte salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    use rand::RngCore;
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Generate a random 32-byte symmetric key.
pub fn generate_key() -> zeroize::Zeroizing<[u8; 32]> {
    use rand::RngCore;
    let mut key = zeroize::Zeroizing::new([0u8; 32]);
    rand::rngs::OsRng.fill_bytes(&mut key[..]);
    key
}

// ── Verification tags ─────────────────────────────────────────────────────────

/// HMAC-SHA256 tag stored in place of the PIN. Needs the PIN and the salt to
/// reproduce.
pub fn verification_tag(key: &DerivedKey) -> Result<[u8; 32], CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac.update(PURPOSE_PIN_VERIFY);
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time comparison of a recomputed tag against the stored one.
pub fn verify_tag(key: &DerivedKey, expected: &[u8]) -> bool {
    match HmacSha256::new_from_slice(key.as_bytes()) {
        Ok(mut mac) => {
            mac.update(PURPOSE_PIN_VERIFY);
            mac.verify_slice(expected).is_ok()
        }
        Err(_) => false,
    }
}

// ── HKDF-SHA256 ───────────────────────────────────────────────────────────────

/// Expand `ikm` + `info` into `output.len()` bytes of key material.
///
/// `salt` may be `None` (HKDF will use a zeroed salt).
pub fn hkdf_expand(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Derive the 256-bit session key from a raw ECDH output.
/// `transcript` binds both ephemeral public keys (order-independent).
pub fn derive_session_key(dh_output: &[u8], transcript: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut key = [0u8; 32];
    hkdf_expand(dh_output, Some(SESSION_CONTEXT), transcript, &mut key)?;
    Ok(key)
}
