//! Transport payload: the only thing that crosses the wire.
//!
//! The relay sees, per payload:
//!   - the variant tag (handshake / ciphertext / sealed)
//!   - chat_id and sender_id (needed for routing)
//!   - message_index on ciphertext (not secret, required to pick the
//!     ratchet step)
//!   - public keys and opaque ciphertext, base64url-encoded
//!
//! It never sees plaintext, private keys or session keys.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use sh_crypto::{aead::NONCE_LEN, PublicKeyBytes};

use crate::error::ProtoError;

pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportPayload {
    /// Ephemeral public key for session establishment.
    Handshake {
        version: u8,
        chat_id: String,
        sender_id: String,
        /// Base64url X25519 ephemeral public key.
        public_key: String,
        /// Set when answering the peer's handshake. A reply is never
        /// answered.
        #[serde(default)]
        reply: bool,
        /// First message index the sender will use under this key.
        #[serde(default)]
        next_index: u64,
    },
    /// Message encrypted under a ratchet session.
    Ciphertext {
        version: u8,
        chat_id: String,
        sender_id: String,
        message_index: u64,
        /// Base64url 12-byte AES-GCM nonce.
        nonce: String,
        /// Base64url ciphertext + tag.
        ciphertext: String,
    },
    /// Sealed box under the recipient's long-term key.
    Sealed {
        version: u8,
        sender_id: String,
        recipient_id: String,
        /// Base64url sealed box.
        ciphertext: String,
    },
}

impl TransportPayload {
    pub fn handshake(chat_id: &str, sender_id: &str, public_key: &PublicKeyBytes) -> Self {
        Self::Handshake {
            version: PROTOCOL_VERSION,
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            public_key: public_key.to_b64(),
            reply: false,
            next_index: 0,
        }
    }

    pub fn handshake_reply(
        chat_id: &str,
        sender_id: &str,
        public_key: &PublicKeyBytes,
        next_index: u64,
    ) -> Self {
        Self::Handshake {
            version: PROTOCOL_VERSION,
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            public_key: public_key.to_b64(),
            reply: true,
            next_index,
        }
    }

    /// Build a ciphertext payload from `nonce || ciphertext + tag`.
    pub fn ciphertext(
        chat_id: &str,
        sender_id: &str,
        message_index: u64,
        sealed: &[u8],
    ) -> Result<Self, ProtoError> {
        if sealed.len() < NONCE_LEN {
            return Err(ProtoError::Malformed("ciphertext shorter than nonce".into()));
        }
        let (nonce, body) = sealed.split_at(NONCE_LEN);
        Ok(Self::Ciphertext {
            version: PROTOCOL_VERSION,
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            message_index,
            nonce: URL_SAFE_NO_PAD.encode(nonce),
            ciphertext: URL_SAFE_NO_PAD.encode(body),
        })
    }

    pub fn sealed(sender_id: &str, recipient_id: &str, sealed_box: &[u8]) -> Self {
        Self::Sealed {
            version: PROTOCOL_VERSION,
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            ciphertext: URL_SAFE_NO_PAD.encode(sealed_box),
        }
    }

    pub fn version(&self) -> u8 {
        match self {
            Self::Handshake { version, .. }
            | Self::Ciphertext { version, .. }
            | Self::Sealed { version, .. } => *version,
        }
    }

    pub fn sender_id(&self) -> &str {
        match self {
            Self::Handshake { sender_id, .. }
            | Self::Ciphertext { sender_id, .. }
            | Self::Sealed { sender_id, .. } => sender_id,
        }
    }

    /// Handshake public key, decoded and length-checked.
    pub fn handshake_key(&self) -> Result<PublicKeyBytes, ProtoError> {
        match self {
            Self::Handshake { public_key, .. } => PublicKeyBytes::from_b64(public_key)
                .map_err(|e| ProtoError::Malformed(e.to_string())),
            _ => Err(ProtoError::Malformed("not a handshake".into())),
        }
    }

    /// Ciphertext re-joined as `nonce || ciphertext + tag`.
    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        match self {
            Self::Ciphertext { nonce, ciphertext, .. } => {
                let nonce = URL_SAFE_NO_PAD.decode(nonce)?;
                if nonce.len() != NONCE_LEN {
                    return Err(ProtoError::Malformed(format!(
                        "nonce must be {NONCE_LEN} bytes, got {}",
                        nonce.len()
                    )));
                }
                let mut out = nonce;
                out.extend_from_slice(&URL_SAFE_NO_PAD.decode(ciphertext)?);
                Ok(out)
            }
            Self::Sealed { ciphertext, .. } => Ok(URL_SAFE_NO_PAD.decode(ciphertext)?),
            Self::Handshake { .. } => Err(ProtoError::Malformed("handshake carries no ciphertext".into())),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and version-check a payload received from the transport.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        let payload: Self = serde_json::from_slice(bytes)?;
        if payload.version() != PROTOCOL_VERSION {
            return Err(ProtoError::UnsupportedVersion(payload.version()));
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ciphertext_splits_and_rejoins_nonce() {
        let sealed: Vec<u8> = (0u8..40).collect();
        let payload = TransportPayload::ciphertext("c1", "alice", 7, &sealed).unwrap();
        let wire = payload.encode().unwrap();
        let back = TransportPayload::decode(&wire).unwrap();
        assert_eq!(back, payload);
        assert_eq!(back.ciphertext_bytes().unwrap(), sealed);
        assert!(TransportPayload::ciphertext("c1", "alice", 0, &[0u8; 4]).is_err());
    }

    #[test]
    fn wire_shape_is_tagged() {
        let pk = PublicKeyBytes(vec![9u8; 32]);
        let wire = TransportPayload::handshake("c1", "bob", &pk).encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&wire).unwrap();
        assert_eq!(json["type"], "handshake");
        assert_eq!(json["chat_id"], "c1");
        assert_eq!(
            TransportPayload::decode(&wire).unwrap().handshake_key().unwrap(),
            pk
        );
    }

    #[test]
    fn reply_flag_defaults_to_false() {
        let pk = PublicKeyBytes(vec![9u8; 32]);
        let wire = TransportPayload::handshake_reply("c1", "bob", &pk, 42).encode().unwrap();
        assert!(matches!(
            TransportPayload::decode(&wire).unwrap(),
            TransportPayload::Handshake { reply: true, next_index: 42, .. }
        ));

        let legacy = format!(
            r#"{{"type":"handshake","version":1,"chat_id":"c1","sender_id":"bob","public_key":"{}"}}"#,
            pk.to_b64()
        );
        assert!(matches!(
            TransportPayload::decode(legacy.as_bytes()).unwrap(),
            TransportPayload::Handshake { reply: false, next_index: 0, .. }
        ));
    }

    #[test]
    fn rejects_unknown_version_and_garbage() {
        let wire = br#"{"type":"sealed","version":9,"sender_id":"a","recipient_id":"b","ciphertext":""}"#;
        assert!(matches!(
            TransportPayload::decode(wire),
            Err(ProtoError::UnsupportedVersion(9))
        ));
        assert!(TransportPayload::decode(b"{\"type\":\"teleport\"}").is_err());
        assert!(TransportPayload::decode(b"not json").is_err());
    }

    #[test]
    fn short_handshake_key_rejected() {
        let payload = TransportPayload::Handshake {
            version: PROTOCOL_VERSION,
            chat_id: "c1".into(),
            sender_id: "bob".into(),
            public_key: URL_SAFE_NO_PAD.encode([1u8; 31]),
            reply: false,
            next_index: 0,
        };
        assert!(payload.handshake_key().is_err());
    }
}
