//! Two local users over an in-memory directory and relay: bootstrap,
//! a sealed first message, session handshake, then ratchet traffic.
//!
//! Storage goes to a temp directory unless SHROUD_SQLITE_PATH /
//! SHROUD_FALLBACK_DIR say otherwise.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use sh_proto::{InMemoryDirectory, RecordingTransport};
use sh_session::{logging::init_logging, Received, SecureChannel, ShroudConfig};

async fn deliver(from: &RecordingTransport, to: &SecureChannel) -> Result<Vec<Received>> {
    let mut out = Vec::new();
    for (recipient, bytes) in from.take() {
        if recipient != to.user_id() {
            continue;
        }
        out.push(to.receive(&bytes).await?);
    }
    Ok(out)
}

fn config_for(user: &str) -> Result<ShroudConfig> {
    let mut config = ShroudConfig::from_env()?;
    let base = std::env::temp_dir().join("shroud-demo").join(user);
    std::fs::create_dir_all(&base).context("creating demo directory")?;
    if std::env::var("SHROUD_SQLITE_PATH").is_err() {
        config.storage.sqlite_path = Some(base.join("keys.db"));
    }
    if std::env::var("SHROUD_FALLBACK_DIR").is_err() {
        config.storage.fallback_dir = base.join("kv");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let directory = Arc::new(InMemoryDirectory::new());
    let alice_out = Arc::new(RecordingTransport::new());
    let bob_out = Arc::new(RecordingTransport::new());

    let alice = SecureChannel::open("alice", config_for("alice")?, directory.clone(), alice_out.clone()).await?;
    let bob = SecureChannel::open("bob", config_for("bob")?, directory.clone(), bob_out.clone()).await?;

    alice.bootstrap("4821").await?;
    bob.bootstrap("1357").await?;
    alice.unlock("4821").await?;
    bob.unlock("1357").await?;

    alice.send("c1", "bob", b"hi bob, sealed").await?;
    for r in deliver(&alice_out, &bob).await? {
        if let Received::Sealed { ciphertext, sender_id } = r {
            let pt = bob.open_sealed(&ciphertext, "1357").await?;
            info!(from = %sender_id, len = pt.len(), "bob opened sealed box");
        }
    }

    alice.start_session("c1", "bob").await?;
    deliver(&alice_out, &bob).await?;
    deliver(&bob_out, &alice).await?;
    if !alice.ratchet().has_active_session("c1").await? {
        bail!("session did not establish");
    }

    for i in 0..3 {
        alice.send("c1", "bob", format!("ratchet message {i}").as_bytes()).await?;
    }
    for r in deliver(&alice_out, &bob).await? {
        if let Received::Message { message_index, plaintext, .. } = r {
            info!(message_index, len = plaintext.len(), "bob received");
        }
    }

    let a = alice.security_code("c1", "bob").await?;
    let b = bob.security_code("c1", "alice").await?;
    info!(alice = %a, bob = %b, "security codes");
    if !alice.verifier().verify_codes_match(&a.display_code, &b.display_code) {
        bail!("security codes differ");
    }
    Ok(())
}
