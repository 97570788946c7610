//! sh_crypto: Shroud cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Stateless: nothing in this crate touches storage, clocks or the network.
//!
//! # Module layout
//! - `identity`:      X25519 identity and ephemeral keypairs, base64url public keys
//! - `sealed`:        sealed box (ECIES) to a long-term public key
//! - `ratchet`:       message-indexed one-way symmetric ratchet
//! - `security_code`: numeric conversation fingerprints for out-of-band checks
//! - `aead`:          AES-256-GCM helpers and key wrapping
//! - `kdf`:           Argon2id stretching, HKDF, PIN verification tags
//! - `error`:         unified error type

pub mod aead;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod ratchet;
pub mod sealed;
pub mod security_code;

pub use error::CryptoError;
pub use identity::{EphemeralKeyPair, IdentityKeyPair, PublicKeyBytes};
pub use kdf::KdfParams;
