//! IdentityVerifier: security codes and scan-to-verify QR payloads.

use sh_crypto::{security_code, PublicKeyBytes};
use sh_proto::VerificationQr;

use crate::error::CoreResult;

pub use sh_crypto::security_code::SecurityCode;

#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityVerifier;

impl IdentityVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Keys are bound only when one is supplied for every participant.
    pub fn generate_code(
        &self,
        chat_id: &str,
        participant_ids: &[String],
        public_keys: Option<&[PublicKeyBytes]>,
    ) -> SecurityCode {
        security_code::generate_code(chat_id, participant_ids, public_keys)
    }

    pub fn verify_codes_match(&self, a: &str, b: &str) -> bool {
        security_code::codes_match(a, b)
    }

    pub fn encode_qr(&self, code: &SecurityCode) -> CoreResult<String> {
        let qr = VerificationQr {
            chat_id: code.chat_id.clone(),
            code: code.display_code.clone(),
            timestamp: code.generated_at,
        };
        Ok(qr.encode()?)
    }

    pub fn decode_qr(&self, text: &str) -> CoreResult<VerificationQr> {
        Ok(VerificationQr::decode(text)?)
    }

    /// Does a scanned QR match the locally computed code?
    pub fn matches_scan(&self, local: &SecurityCode, scanned: &VerificationQr) -> bool {
        local.chat_id == scanned.chat_id && self.verify_codes_match(&local.display_code, &scanned.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qr_roundtrip_matches_code() {
        let v = IdentityVerifier::new();
        let ids = vec!["alice".to_string(), "bob".to_string()];
        let keys = [PublicKeyBytes(vec![1; 32]), PublicKeyBytes(vec![2; 32])];
        let code = v.generate_code("c1", &ids, Some(&keys));

        let scanned = v.decode_qr(&v.encode_qr(&code).unwrap()).unwrap();
        assert!(v.matches_scan(&code, &scanned));

        let other = v.generate_code("c2", &ids, Some(&keys));
        assert!(!v.matches_scan(&other, &scanned));
    }
}
