//! sh_proto: wire types and external interfaces for Shroud
//!
//! All on-wire types are serialised to JSON and carry a version so the
//! format can change without breaking older peers.
//!
//! # Modules
//! - `payload`: tagged transport payload (handshake / ciphertext / sealed)
//! - `qr`:      scan-to-verify payload
//! - `api`:     directory and transport traits, plus in-memory versions

pub mod api;
pub mod error;
pub mod payload;
pub mod qr;

pub use api::{Directory, InMemoryDirectory, PublishedKeys, RecordingTransport, Transport};
pub use error::ProtoError;
pub use payload::{TransportPayload, PROTOCOL_VERSION};
pub use qr::VerificationQr;
