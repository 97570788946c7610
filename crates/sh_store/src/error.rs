use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No storage backend available: {0}")]
    Unavailable(String),

    #[error("Vault is locked, unlock with PIN first")]
    VaultLocked,

    #[error("Crypto error: {0}")]
    Crypto(#[from] sh_crypto::CryptoError),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
}
