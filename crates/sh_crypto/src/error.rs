use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD decryption failed (authentication tag mismatch, possible tampering)")]
    AeadDecrypt,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Key agreement produced a non-contributory shared secret")]
    NonContributory,

    #[error("Plaintext too large for sealed box: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("Ratchet step {requested} exceeds limit {limit}")]
    RatchetLimit { requested: u64, limit: u64 },

    #[error("Ratchet checkpoint at step {current} is past requested step {requested}")]
    RatchetBehind { requested: u64, current: u64 },

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
