#![allow(dead_code)]

use std::sync::Arc;

use sh_crypto::KdfParams;
use sh_proto::{InMemoryDirectory, RecordingTransport};
use sh_session::{Received, SecureChannel, ShroudConfig};
use sh_store::{MemoryBackend, SecureKeyStore, Vault};

pub use sh_session::ManualClock;

/// Small Argon2 cost so tests stay fast.
pub const CHEAP_KDF: KdfParams = KdfParams {
    memory_kib: 64,
    iterations: 1,
    parallelism: 1,
};

pub const START_MS: i64 = 1_700_000_000_000;

pub fn config() -> ShroudConfig {
    ShroudConfig {
        kdf: CHEAP_KDF,
        ..ShroudConfig::default()
    }
}

pub fn memory_store() -> SecureKeyStore {
    SecureKeyStore::with_backend("shroud", Arc::new(MemoryBackend::new()), Vault::new())
}

pub async fn unlocked_store() -> SecureKeyStore {
    let store = memory_store();
    store.vault().unlock_with_key(&[7u8; 32]).await;
    store
}

pub struct Peer {
    pub channel: SecureChannel,
    pub outbox: Arc<RecordingTransport>,
    pub clock: Arc<ManualClock>,
}

pub fn peer(user_id: &str, directory: &Arc<InMemoryDirectory>) -> Peer {
    let outbox = Arc::new(RecordingTransport::new());
    let clock = Arc::new(ManualClock::new(START_MS));
    let channel = SecureChannel::new(
        user_id,
        config(),
        memory_store(),
        clock.clone(),
        directory.clone(),
        outbox.clone(),
    );
    Peer { channel, outbox, clock }
}

/// Feed everything `from` sent to `to` into `to.receive`.
pub async fn pump(from: &Peer, to: &Peer) -> Vec<Received> {
    let mut out = Vec::new();
    for (recipient, bytes) in from.outbox.take() {
        assert_eq!(recipient, to.channel.user_id());
        out.push(to.channel.receive(&bytes).await.unwrap());
    }
    out
}
