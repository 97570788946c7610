use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("Missing or empty field: {0}")]
    MissingField(&'static str),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Transport error: {0}")]
    Transport(String),
}
