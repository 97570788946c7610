//! The error type every component returns.
//!
//! Primitive and storage errors are folded into this taxonomy here, in one
//! place, so no `CryptoError` or `sqlx::Error` escapes the crate.

use thiserror::Error;

use sh_crypto::CryptoError;
use sh_proto::ProtoError;
use sh_store::StoreError;

#[derive(Debug, Error)]
pub enum CoreError {
    /// No PIN or keys set up yet. Expected, not exceptional.
    #[error("Not configured: {0}")]
    ConfigurationMissing(String),

    /// Wrong PIN or no PIN configured. Deliberately the same variant.
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Locked out for another {remaining_ms} ms")]
    LockedOut { remaining_ms: u64 },

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("No established session for chat {0}")]
    SessionNotEstablished(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Vault is locked")]
    VaultLocked,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Key material error: {0}")]
    KeyMaterial(String),

    /// Peer's identity key changed since it was last verified.
    #[error("Identity key for {0} changed and has not been re-verified")]
    UntrustedKeyChange(String),

    #[error("Directory or transport error: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<CryptoError> for CoreError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::PayloadTooLarge { len, max } => {
                CoreError::InvalidInput(format!("payload of {len} bytes exceeds {max}"))
            }
            CryptoError::KeyGeneration(m) | CryptoError::KeyDerivation(m) => CoreError::KeyMaterial(m),
            CryptoError::AeadEncrypt => CoreError::KeyMaterial("encryption failed".into()),
            CryptoError::Serialisation(e) => CoreError::InvalidInput(e.to_string()),
            CryptoError::AeadDecrypt
            | CryptoError::InvalidKey(_)
            | CryptoError::NonContributory
            | CryptoError::MalformedCiphertext(_)
            | CryptoError::RatchetLimit { .. }
            | CryptoError::RatchetBehind { .. }
            | CryptoError::HexDecode(_)
            | CryptoError::Base64Decode(_) => CoreError::DecryptionFailed,
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::VaultLocked => CoreError::VaultLocked,
            // A sealed record that fails to open was tampered with or
            // belongs to a different data key.
            StoreError::Crypto(e) => CoreError::from(e),
            other => CoreError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<ProtoError> for CoreError {
    fn from(e: ProtoError) -> Self {
        match e {
            ProtoError::Directory(m) | ProtoError::Transport(m) => CoreError::Transport(m),
            other => CoreError::InvalidInput(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_errors_are_normalised() {
        assert!(matches!(CoreError::from(CryptoError::AeadDecrypt), CoreError::DecryptionFailed));
        assert!(matches!(
            CoreError::from(CryptoError::PayloadTooLarge { len: 300, max: 190 }),
            CoreError::InvalidInput(_)
        ));
        assert!(matches!(
            CoreError::from(StoreError::Crypto(CryptoError::AeadDecrypt)),
            CoreError::DecryptionFailed
        ));
        assert!(matches!(
            CoreError::from(StoreError::Unavailable("disk".into())),
            CoreError::StorageUnavailable(_)
        ));
        assert!(matches!(CoreError::from(StoreError::VaultLocked), CoreError::VaultLocked));
    }
}
