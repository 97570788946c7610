//! Security codes: human-comparable fingerprints of a conversation.
//!
//! Input string (canonical, identical on both sides):
//!   bound   : "sh-code-v3|{chat_id}|{id_1}:{pk_1},{id_2}:{pk_2},..."
//!   id-only : "sh-code-v3-ids|{chat_id}|{id_1},{id_2},..."
//! with participants sorted by id and public keys base64url-encoded. The
//! chat id and every participant id are written as `{byte_len}:{value}`,
//! so separators inside an id cannot shift field boundaries.
//!
//! The SHA-256 digest is rendered as 12 groups of 5 decimal digits (60
//! digits), the same layout as Signal safety numbers.
//!
//! An id-only code says nothing about which keys are in use. It is flagged
//! with `bound_to_keys = false` and renders with an explicit suffix.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::identity::PublicKeyBytes;

const BOUND_TAG: &str = "sh-code-v3";
const UNBOUND_TAG: &str = "sh-code-v3-ids";
const GROUPS: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityCode {
    /// Hex SHA-256 of the canonical input.
    pub code_hash: String,
    /// Twelve groups of five digits, read aloud by users.
    pub display_code: String,
    pub chat_id: String,
    /// Sorted, de-duplicated.
    pub participant_ids: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub bound_to_keys: bool,
}

impl fmt::Display for SecurityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bound_to_keys {
            write!(f, "{}", self.display_code)
        } else {
            write!(f, "{} (not bound to keys)", self.display_code)
        }
    }
}

/// Derive the security code for a conversation.
///
/// `public_keys`, when given, must be index-aligned with `participant_ids`.
/// Keys are only bound if every participant has one; otherwise the code
/// falls back to ids only.
pub fn generate_code(
    chat_id: &str,
    participant_ids: &[String],
    public_keys: Option<&[PublicKeyBytes]>,
) -> SecurityCode {
    let mut pairs: Vec<(&str, Option<&PublicKeyBytes>)> = match public_keys {
        Some(keys) if keys.len() == participant_ids.len() => participant_ids
            .iter()
            .map(String::as_str)
            .zip(keys.iter().map(Some))
            .collect(),
        _ => participant_ids.iter().map(|id| (id.as_str(), None)).collect(),
    };
    pairs.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.cmp(&b.1)));
    pairs.dedup();

    let bound = !pairs.is_empty() && pairs.iter().all(|(_, pk)| pk.is_some_and(|k| !k.0.is_empty()));

    let canonical = if bound {
        let body = pairs
            .iter()
            .filter_map(|(id, pk)| pk.map(|k| format!("{}:{}", field(id), k.to_b64())))
            .collect::<Vec<_>>()
            .join(",");
        format!("{BOUND_TAG}|{}|{body}", field(chat_id))
    } else {
        let body = pairs.iter().map(|(id, _)| field(id)).collect::<Vec<_>>().join(",");
        format!("{UNBOUND_TAG}|{}|{body}", field(chat_id))
    };

    let digest: [u8; 32] = Sha256::digest(canonical.as_bytes()).into();

    let mut participant_ids: Vec<String> = pairs.iter().map(|(id, _)| id.to_string()).collect();
    participant_ids.dedup();

    SecurityCode {
        code_hash: hex::encode(digest),
        display_code: numeric_code(&digest),
        chat_id: chat_id.to_string(),
        participant_ids,
        generated_at: Utc::now(),
        bound_to_keys: bound,
    }
}

fn field(value: &str) -> String {
    format!("{}:{value}", value.len())
}

/// 12 groups of 5 digits, 20 bits of digest per group.
fn numeric_code(digest: &[u8; 32]) -> String {
    let mut groups = Vec::with_capacity(GROUPS);
    for i in 0..GROUPS {
        let offset = i * 5 / 2;
        let val = if i % 2 == 0 {
            ((digest[offset] as u32) << 12)
                | ((digest[offset + 1] as u32) << 4)
                | ((digest[offset + 2] as u32) >> 4)
        } else {
            (((digest[offset] & 0x0F) as u32) << 16)
                | ((digest[offset + 1] as u32) << 8)
                | (digest[offset + 2] as u32)
        };
        groups.push(format!("{:05}", val % 100_000));
    }
    groups.join(" ")
}

/// Whitespace- and case-insensitive equality of two displayed codes.
pub fn codes_match(a: &str, b: &str) -> bool {
    let norm = |s: &str| {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect::<String>()
    };
    let (a, b) = (norm(a), norm(b));
    !a.is_empty() && a == b
}
