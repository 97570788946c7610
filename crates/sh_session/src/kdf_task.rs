use zeroize::Zeroizing;

use sh_crypto::kdf::{self, DerivedKey, KdfParams};

use crate::error::{CoreError, CoreResult};

/// Argon2id off the async executor. The secret is copied into a zeroizing
/// buffer for the blocking task.
pub(crate) async fn stretch(
    secret: &[u8],
    salt: &[u8],
    params: KdfParams,
    purpose: &'static [u8],
) -> CoreResult<DerivedKey> {
    let secret = Zeroizing::new(secret.to_vec());
    let salt = salt.to_vec();
    tokio::task::spawn_blocking(move || kdf::stretch_secret(&secret, &salt, &params, purpose))
        .await
        .map_err(|e| CoreError::KeyMaterial(e.to_string()))?
        .map_err(CoreError::from)
}
