mod common;

use std::sync::Arc;

use sh_crypto::EphemeralKeyPair;
use sh_proto::{Directory, InMemoryDirectory, TransportPayload};
use sh_session::{CoreError, Delivery, Received};

use common::{peer, pump};

#[tokio::test]
async fn bootstrap_publishes_identity() {
    let directory = Arc::new(InMemoryDirectory::new());
    let alice = peer("alice", &directory);

    let public = alice.channel.bootstrap("4821").await.unwrap();
    let published = directory.get_public_key("alice").await.unwrap().unwrap();
    assert_eq!(published.encryption_key, public.to_b64());

    // Repeating with the right PIN is harmless and keeps the key.
    assert_eq!(alice.channel.bootstrap("4821").await.unwrap(), public);
    assert!(matches!(
        alice.channel.bootstrap("1111").await,
        Err(CoreError::AuthenticationFailed)
    ));
}

#[tokio::test]
async fn bootstrap_rejects_malformed_pin() {
    let directory = Arc::new(InMemoryDirectory::new());
    let alice = peer("alice", &directory);
    assert!(matches!(
        alice.channel.bootstrap("12").await,
        Err(CoreError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn unlock_requires_setup() {
    let directory = Arc::new(InMemoryDirectory::new());
    let alice = peer("alice", &directory);
    assert!(matches!(
        alice.channel.unlock("4821").await,
        Err(CoreError::ConfigurationMissing(_))
    ));
    assert!(alice.channel.is_locked().await);
}

#[tokio::test]
async fn sealed_message_before_any_session() {
    let directory = Arc::new(InMemoryDirectory::new());
    let alice = peer("alice", &directory);
    let bob = peer("bob", &directory);
    alice.channel.bootstrap("4821").await.unwrap();
    bob.channel.bootstrap("1357").await.unwrap();

    let delivery = alice.channel.send("c1", "bob", b"first contact").await.unwrap();
    assert_eq!(delivery, Delivery::Sealed);

    let mut received = pump(&alice, &bob).await;
    let Some(Received::Sealed { sender_id, ciphertext }) = received.pop() else {
        panic!("expected sealed box");
    };
    assert_eq!(sender_id, "alice");

    assert!(matches!(
        bob.channel.open_sealed(&ciphertext, "0000").await,
        Err(CoreError::AuthenticationFailed)
    ));
    let pt = bob.channel.open_sealed(&ciphertext, "1357").await.unwrap();
    assert_eq!(&pt[..], b"first contact");
}

#[tokio::test]
async fn sealed_box_for_someone_else_is_refused() {
    let directory = Arc::new(InMemoryDirectory::new());
    let alice = peer("alice", &directory);
    let carol = peer("carol", &directory);
    alice.channel.bootstrap("4821").await.unwrap();

    let stray = TransportPayload::sealed("mallory", "bob", b"not for carol")
        .encode()
        .unwrap();
    assert!(matches!(
        carol.channel.receive(&stray).await,
        Err(CoreError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn send_without_directory_key_is_configuration_missing() {
    let directory = Arc::new(InMemoryDirectory::new());
    let alice = peer("alice", &directory);
    alice.channel.bootstrap("4821").await.unwrap();
    assert!(matches!(
        alice.channel.send("c1", "nobody", b"hello?").await,
        Err(CoreError::ConfigurationMissing(_))
    ));
    assert!(alice.outbox.is_empty());
}

#[tokio::test]
async fn handshake_then_session_messages() {
    let directory = Arc::new(InMemoryDirectory::new());
    let alice = peer("alice", &directory);
    let bob = peer("bob", &directory);
    alice.channel.bootstrap("4821").await.unwrap();
    bob.channel.bootstrap("1357").await.unwrap();
    alice.channel.unlock("4821").await.unwrap();
    bob.channel.unlock("1357").await.unwrap();

    alice.channel.start_session("c1", "bob").await.unwrap();
    let at_bob = pump(&alice, &bob).await;
    assert!(matches!(
        at_bob.as_slice(),
        [Received::SessionEstablished { replied: true, .. }]
    ));
    let at_alice = pump(&bob, &alice).await;
    assert!(matches!(
        at_alice.as_slice(),
        [Received::SessionEstablished { replied: false, .. }]
    ));
    assert!(bob.outbox.is_empty());

    for expected in 0..3u64 {
        let delivery = alice.channel.send("c1", "bob", b"over the ratchet").await.unwrap();
        assert_eq!(delivery, Delivery::Session { message_index: expected });
    }
    for (i, r) in pump(&alice, &bob).await.into_iter().enumerate() {
        match r {
            Received::Message {
                chat_id,
                sender_id,
                message_index,
                plaintext,
            } => {
                assert_eq!(chat_id, "c1");
                assert_eq!(sender_id, "alice");
                assert_eq!(message_index, i as u64);
                assert_eq!(&plaintext[..], b"over the ratchet");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    let reply = bob.channel.send("c1", "alice", b"ack").await.unwrap();
    assert_eq!(reply, Delivery::Session { message_index: 0 });
    assert!(matches!(
        pump(&bob, &alice).await.as_slice(),
        [Received::Message { message_index: 0, .. }]
    ));
}

#[tokio::test]
async fn restarted_peer_gets_a_fresh_handshake_back() {
    let directory = Arc::new(InMemoryDirectory::new());
    let alice = peer("alice", &directory);
    let bob = peer("bob", &directory);
    for (p, pin) in [(&alice, "4821"), (&bob, "1357")] {
        p.channel.bootstrap(pin).await.unwrap();
        p.channel.unlock(pin).await.unwrap();
    }
    alice.channel.start_session("c1", "bob").await.unwrap();
    pump(&alice, &bob).await;
    pump(&bob, &alice).await;
    for _ in 0..3 {
        alice.channel.send("c1", "bob", b"before").await.unwrap();
    }
    assert_eq!(pump(&alice, &bob).await.len(), 3);

    // Bob loses the session and starts over.
    bob.channel.ratchet().delete_session("c1").await.unwrap();
    bob.channel.start_session("c1", "alice").await.unwrap();
    assert!(matches!(
        pump(&bob, &alice).await.as_slice(),
        [Received::SessionEstablished { replied: true, .. }]
    ));
    assert_eq!(alice.outbox.len(), 1);
    assert!(matches!(
        pump(&alice, &bob).await.as_slice(),
        [Received::SessionEstablished { replied: false, .. }]
    ));
    assert!(bob.channel.ratchet().has_active_session("c1").await.unwrap());

    // Alice's index keeps counting across the new key.
    assert_eq!(
        alice.channel.send("c1", "bob", b"after").await.unwrap(),
        Delivery::Session { message_index: 3 }
    );
    match pump(&alice, &bob).await.pop() {
        Some(Received::Message {
            message_index,
            plaintext,
            ..
        }) => {
            assert_eq!(message_index, 3);
            assert_eq!(&plaintext[..], b"after");
        }
        other => panic!("unexpected {other:?}"),
    }

    assert_eq!(
        bob.channel.send("c1", "alice", b"back").await.unwrap(),
        Delivery::Session { message_index: 0 }
    );
    assert!(matches!(
        pump(&bob, &alice).await.as_slice(),
        [Received::Message { message_index: 0, .. }]
    ));
}

#[tokio::test]
async fn handshake_from_outside_the_session_is_refused() {
    let directory = Arc::new(InMemoryDirectory::new());
    let alice = peer("alice", &directory);
    let bob = peer("bob", &directory);
    for (p, pin) in [(&alice, "4821"), (&bob, "1357")] {
        p.channel.bootstrap(pin).await.unwrap();
        p.channel.unlock(pin).await.unwrap();
    }
    alice.channel.start_session("c1", "bob").await.unwrap();
    pump(&alice, &bob).await;
    pump(&bob, &alice).await;
    let bob_key = alice.channel.ratchet().remote_public_key("c1").await.unwrap();

    let intruder = EphemeralKeyPair::generate();
    let foreign = TransportPayload::handshake("c1", "mallory", &intruder.public)
        .encode()
        .unwrap();
    assert!(matches!(
        alice.channel.receive(&foreign).await,
        Err(CoreError::InvalidInput(_))
    ));

    // A reply is never taken as a re-key, even from the bound peer.
    let stale = TransportPayload::handshake_reply("c1", "bob", &intruder.public, 0)
        .encode()
        .unwrap();
    assert!(matches!(
        alice.channel.receive(&stale).await,
        Err(CoreError::InvalidInput(_))
    ));

    assert!(alice.outbox.is_empty());
    assert_eq!(alice.channel.ratchet().remote_public_key("c1").await.unwrap(), bob_key);
    alice.channel.send("c1", "bob", b"unchanged").await.unwrap();
    assert!(matches!(
        pump(&alice, &bob).await.as_slice(),
        [Received::Message { message_index: 0, .. }]
    ));
}

#[tokio::test]
async fn established_session_wins_over_sealed_box() {
    let directory = Arc::new(InMemoryDirectory::new());
    let alice = peer("alice", &directory);
    let bob = peer("bob", &directory);
    alice.channel.bootstrap("4821").await.unwrap();
    bob.channel.bootstrap("1357").await.unwrap();
    alice.channel.unlock("4821").await.unwrap();
    bob.channel.unlock("1357").await.unwrap();

    // Initiated but not established: still sealed.
    alice.channel.start_session("c1", "bob").await.unwrap();
    let handshake = alice.outbox.take();
    assert_eq!(
        alice.channel.send("c1", "bob", b"x").await.unwrap(),
        Delivery::Sealed
    );
    alice.outbox.take();

    for (_, bytes) in handshake {
        bob.channel.receive(&bytes).await.unwrap();
    }
    pump(&bob, &alice).await;
    assert_eq!(
        alice.channel.send("c1", "bob", b"y").await.unwrap(),
        Delivery::Session { message_index: 0 }
    );

    // Other chats with the same peer are unaffected.
    assert_eq!(
        alice.channel.send("c2", "bob", b"z").await.unwrap(),
        Delivery::Sealed
    );
}

#[tokio::test]
async fn tampered_session_message_is_undecryptable() {
    let directory = Arc::new(InMemoryDirectory::new());
    let alice = peer("alice", &directory);
    let bob = peer("bob", &directory);
    for (p, pin) in [(&alice, "4821"), (&bob, "1357")] {
        p.channel.bootstrap(pin).await.unwrap();
        p.channel.unlock(pin).await.unwrap();
    }
    alice.channel.start_session("c1", "bob").await.unwrap();
    pump(&alice, &bob).await;
    pump(&bob, &alice).await;

    alice.channel.send("c1", "bob", b"genuine").await.unwrap();
    let (_, bytes) = alice.outbox.take().pop().unwrap();
    let mut payload = TransportPayload::decode(&bytes).unwrap();
    if let TransportPayload::Ciphertext { message_index, .. } = &mut payload {
        *message_index = 7;
    }
    let forged = payload.encode().unwrap();
    assert!(matches!(
        bob.channel.receive(&forged).await.unwrap(),
        Received::Undecryptable { message_index: 7, .. }
    ));
}

#[tokio::test]
async fn locked_vault_stops_session_traffic() {
    let directory = Arc::new(InMemoryDirectory::new());
    let alice = peer("alice", &directory);
    let bob = peer("bob", &directory);
    for (p, pin) in [(&alice, "4821"), (&bob, "1357")] {
        p.channel.bootstrap(pin).await.unwrap();
        p.channel.unlock(pin).await.unwrap();
    }
    alice.channel.start_session("c1", "bob").await.unwrap();
    pump(&alice, &bob).await;
    pump(&bob, &alice).await;

    alice.channel.lock().await;
    assert!(matches!(
        alice.channel.send("c1", "bob", b"while locked").await,
        Err(CoreError::VaultLocked)
    ));
    alice.channel.unlock("4821").await.unwrap();
    assert!(matches!(
        alice.channel.send("c1", "bob", b"after unlock").await,
        Ok(Delivery::Session { .. })
    ));
}

#[tokio::test]
async fn change_pin_keeps_identity_and_vault() {
    let directory = Arc::new(InMemoryDirectory::new());
    let alice = peer("alice", &directory);
    let bob = peer("bob", &directory);
    alice.channel.bootstrap("4821").await.unwrap();
    bob.channel.bootstrap("1357").await.unwrap();
    alice.channel.unlock("4821").await.unwrap();

    assert!(matches!(
        alice.channel.change_pin("4821", "99").await,
        Err(CoreError::InvalidInput(_))
    ));
    assert!(matches!(
        alice.channel.change_pin("0000", "2468").await,
        Err(CoreError::AuthenticationFailed)
    ));
    alice.channel.change_pin("4821", "2468").await.unwrap();

    alice.channel.lock().await;
    assert!(alice.channel.unlock("4821").await.is_err());
    alice.channel.unlock("2468").await.unwrap();

    bob.channel.send("c1", "alice", b"still readable").await.unwrap();
    let mut received = pump(&bob, &alice).await;
    let Some(Received::Sealed { ciphertext, .. }) = received.pop() else {
        panic!("expected sealed box");
    };
    let pt = alice.channel.open_sealed(&ciphertext, "2468").await.unwrap();
    assert_eq!(&pt[..], b"still readable");
}

#[tokio::test]
async fn backup_restores_identity_on_new_device() {
    let directory = Arc::new(InMemoryDirectory::new());
    let alice = peer("alice", &directory);
    let bob = peer("bob", &directory);
    let original = alice.channel.bootstrap("4821").await.unwrap();
    bob.channel.bootstrap("1357").await.unwrap();

    assert!(matches!(
        alice.channel.export_backup("4821", "short").await,
        Err(CoreError::InvalidInput(_))
    ));
    let bundle = alice
        .channel
        .export_backup("4821", "correct horse battery")
        .await
        .unwrap();

    // Someone else's device refuses the bundle outright.
    assert!(matches!(
        bob.channel.import_backup(&bundle, "correct horse battery", "1357").await,
        Err(CoreError::InvalidInput(_))
    ));

    let laptop = peer("alice", &directory);
    assert!(matches!(
        laptop.channel.import_backup(&bundle, "wrong passphrase", "8642").await,
        Err(CoreError::DecryptionFailed)
    ));
    let restored = laptop
        .channel
        .import_backup(&bundle, "correct horse battery", "8642")
        .await
        .unwrap();
    assert_eq!(restored, original);

    bob.channel.send("c9", "alice", b"to the new laptop").await.unwrap();
    let mut received = pump(&bob, &laptop).await;
    let Some(Received::Sealed { ciphertext, .. }) = received.pop() else {
        panic!("expected sealed box");
    };
    let pt = laptop.channel.open_sealed(&ciphertext, "8642").await.unwrap();
    assert_eq!(&pt[..], b"to the new laptop");
}
