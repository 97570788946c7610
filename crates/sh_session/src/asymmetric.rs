//! AsymmetricChannel: short messages sealed to a long-term public key,
//! usable before any session exists.

use tracing::debug;
use zeroize::Zeroizing;

use sh_crypto::{sealed, PublicKeyBytes};

use crate::{
    error::{CoreError, CoreResult},
    identity_keys::IdentityKeys,
};

pub use sh_crypto::sealed::MAX_SEALED_PLAINTEXT;

#[derive(Clone)]
pub struct AsymmetricChannel {
    identity: IdentityKeys,
}

impl AsymmetricChannel {
    pub fn new(identity: IdentityKeys) -> Self {
        Self { identity }
    }

    /// Seal `plaintext` (at most `MAX_SEALED_PLAINTEXT` bytes) to `recipient`.
    pub fn encrypt(&self, plaintext: &[u8], recipient: &PublicKeyBytes) -> CoreResult<Vec<u8>> {
        Ok(sealed::seal(plaintext, recipient)?)
    }

    /// Open a sealed box addressed to `user_id`. Wrong PIN, missing keys and
    /// bad ciphertext all come back as `DecryptionFailed`.
    pub async fn decrypt(&self, ciphertext: &[u8], user_id: &str, pin: &str) -> CoreResult<Zeroizing<Vec<u8>>> {
        let keypair = match self.identity.unlock(user_id, pin).await {
            Ok(k) => k,
            Err(CoreError::StorageUnavailable(m)) => return Err(CoreError::StorageUnavailable(m)),
            Err(_) => return Err(CoreError::DecryptionFailed),
        };
        let result = sealed::open(ciphertext, &keypair).map_err(|_| CoreError::DecryptionFailed);
        drop(keypair);
        if result.is_err() {
            debug!(user_id, "sealed box rejected");
        }
        result
    }
}
