//! Sealed box: encryption directly under a recipient's long-term public key.
//!
//! Construction (ECIES over X25519):
//!   eph      = fresh X25519 keypair
//!   shared   = DH(eph, recipient_pub)
//!   key      = HKDF-SHA256(ikm = shared, salt = eph_pub || recipient_pub, info = "sh-sealed-v1")
//!   body     = AES-256-GCM(key, plaintext, aad = eph_pub)
//!
//! Wire format:
//!   [ version (1) | eph_pub (32) | nonce (12) | ciphertext + tag ]
//!
//! Only short payloads are accepted. Anything larger belongs on a ratchet
//! session.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::{
    aead,
    error::CryptoError,
    identity::{IdentityKeyPair, PublicKeyBytes, KEY_LEN},
    kdf,
};

pub const SEALED_VERSION: u8 = 1;
const SEALED_INFO: &[u8] = b"sh-sealed-v1";

/// Plaintext ceiling, kept at the RSA-OAEP-2048/SHA-256 limit so callers
/// written against that contract behave the same.
pub const MAX_SEALED_PLAINTEXT: usize = 190;

/// Smallest well-formed sealed box (empty plaintext).
pub const MIN_SEALED_LEN: usize = 1 + KEY_LEN + aead::NONCE_LEN + aead::TAG_LEN;

fn sealing_key(
    shared: &[u8],
    eph_pub: &[u8],
    recipient_pub: &[u8],
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut salt = Vec::with_capacity(2 * KEY_LEN);
    salt.extend_from_slice(eph_pub);
    salt.extend_from_slice(recipient_pub);
    let mut key = Zeroizing::new([0u8; 32]);
    kdf::hkdf_expand(shared, Some(&salt), SEALED_INFO, &mut key[..])?;
    Ok(key)
}

/// Encrypt `plaintext` for `recipient`.
pub fn seal(plaintext: &[u8], recipient: &PublicKeyBytes) -> Result<Vec<u8>, CryptoError> {
    if plaintext.len() > MAX_SEALED_PLAINTEXT {
        return Err(CryptoError::PayloadTooLarge {
            len: plaintext.len(),
            max: MAX_SEALED_PLAINTEXT,
        });
    }
    let recipient_pk = recipient.to_x25519()?;

    let eph = StaticSecret::random_from_rng(OsRng);
    let eph_pub = X25519Public::from(&eph);
    let shared = eph.diffie_hellman(&recipient_pk);
    if !shared.was_contributory() {
        return Err(CryptoError::NonContributory);
    }

    let key = sealing_key(shared.as_bytes(), eph_pub.as_bytes(), recipient.as_bytes())?;
    let body = aead::encrypt(&key, plaintext, eph_pub.as_bytes())?;

    let mut out = Vec::with_capacity(1 + KEY_LEN + body.len());
    out.push(SEALED_VERSION);
    out.extend_from_slice(eph_pub.as_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decrypt a sealed box with the recipient's identity key.
pub fn open(sealed: &[u8], identity: &IdentityKeyPair) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if sealed.len() < MIN_SEALED_LEN {
        return Err(CryptoError::MalformedCiphertext("sealed box too short".into()));
    }
    if sealed[0] != SEALED_VERSION {
        return Err(CryptoError::MalformedCiphertext(format!(
            "unknown sealed box version {}",
            sealed[0]
        )));
    }
    let (eph_bytes, body) = sealed[1..].split_at(KEY_LEN);
    let eph_pub = PublicKeyBytes::from_slice(eph_bytes)?.to_x25519()?;

    let shared = identity.static_secret().diffie_hellman(&eph_pub);
    if !shared.was_contributory() {
        return Err(CryptoError::NonContributory);
    }

    let key = sealing_key(shared.as_bytes(), eph_bytes, identity.public.as_bytes())?;
    aead::decrypt(&key, body, eph_bytes)
}
