//! Scan-to-verify QR payload.
//!
//! Text form: `shroud-verify:` + base64url(JSON `{chatId, code, timestamp}`).
//! Every field is required; a payload missing one is rejected outright.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

pub const QR_PREFIX: &str = "shroud-verify:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationQr {
    pub chat_id: String,
    /// Display code as shown on screen.
    pub code: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QrWire {
    chat_id: Option<String>,
    code: Option<String>,
    /// Milliseconds since the Unix epoch.
    timestamp: Option<i64>,
}

fn required(field: Option<String>, name: &'static str) -> Result<String, ProtoError> {
    match field {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(ProtoError::MissingField(name)),
    }
}

impl VerificationQr {
    pub fn new(chat_id: &str, code: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            code: code.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtoError> {
        let wire = QrWire {
            chat_id: Some(self.chat_id.clone()),
            code: Some(self.code.clone()),
            timestamp: Some(self.timestamp.timestamp_millis()),
        };
        let json = serde_json::to_vec(&wire)?;
        Ok(format!("{QR_PREFIX}{}", URL_SAFE_NO_PAD.encode(json)))
    }

    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        let body = text
            .trim()
            .strip_prefix(QR_PREFIX)
            .ok_or_else(|| ProtoError::Malformed("not a verification code".into()))?;
        let json = URL_SAFE_NO_PAD.decode(body)?;
        let wire: QrWire = serde_json::from_slice(&json)?;

        let chat_id = required(wire.chat_id, "chatId")?;
        let code = required(wire.code, "code")?;
        let millis = wire.timestamp.ok_or(ProtoError::MissingField("timestamp"))?;
        let timestamp = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| ProtoError::Malformed(format!("timestamp out of range: {millis}")))?;

        Ok(Self {
            chat_id,
            code,
            timestamp,
        })
    }
}
