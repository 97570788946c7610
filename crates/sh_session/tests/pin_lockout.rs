mod common;

use std::{sync::Arc, time::Duration};

use proptest::prelude::*;
use sh_proto::InMemoryDirectory;
use sh_session::{
    config::PinPolicy,
    pin_guard::{lockout_window, AttemptState, PinGuard},
    CoreError, ManualClock,
};

fn guard(clock: Arc<ManualClock>) -> PinGuard {
    PinGuard::new(common::memory_store(), clock, PinPolicy::default(), common::CHEAP_KDF)
}

#[tokio::test]
async fn fifth_wrong_pin_locks_for_one_minute() {
    let clock = Arc::new(ManualClock::new(common::START_MS));
    let pin = guard(clock.clone());
    assert!(pin.setup("4821").await.unwrap());

    for attempt in 1..=4 {
        assert!(!pin.verify("0000").await.unwrap());
        assert!(!pin.is_locked_out().await.unwrap(), "locked after {attempt}");
    }
    assert!(!pin.verify("0000").await.unwrap());
    assert!(pin.is_locked_out().await.unwrap());
    assert_eq!(pin.remaining_lockout_ms().await.unwrap(), 60_000);

    // Correct PIN is refused while the window is open and does not count.
    assert!(!pin.verify("4821").await.unwrap());
    assert_eq!(pin.failed_attempts().await.unwrap(), 5);

    clock.advance(Duration::from_secs(30));
    assert_eq!(pin.remaining_lockout_ms().await.unwrap(), 30_000);
    assert!(!pin.verify("4821").await.unwrap());

    clock.advance(Duration::from_secs(30));
    assert!(!pin.is_locked_out().await.unwrap());
    assert!(pin.verify("4821").await.unwrap());
}

#[tokio::test]
async fn malformed_pin_counts_as_failure() {
    let clock = Arc::new(ManualClock::new(common::START_MS));
    let pin = guard(clock);
    assert!(!pin.setup("12a4").await.unwrap());
    assert!(!pin.is_configured().await.unwrap());

    assert!(pin.setup("4821").await.unwrap());
    assert!(!pin.verify("482").await.unwrap());
    assert!(!pin.verify("48210").await.unwrap());
    assert_eq!(pin.failed_attempts().await.unwrap(), 2);
}

#[tokio::test]
async fn verify_without_setup_is_false_and_not_counted() {
    let clock = Arc::new(ManualClock::new(common::START_MS));
    let pin = guard(clock);
    assert!(!pin.verify("4821").await.unwrap());
    assert_eq!(pin.failed_attempts().await.unwrap(), 0);
}

#[tokio::test]
async fn lockout_escalates_on_second_tier() {
    let clock = Arc::new(ManualClock::new(common::START_MS));
    let pin = guard(clock.clone());
    assert!(pin.setup("4821").await.unwrap());

    for _ in 0..5 {
        pin.verify("0000").await.unwrap();
    }
    for _ in 0..5 {
        clock.advance(Duration::from_secs(120));
        assert!(!pin.verify("1111").await.unwrap());
    }
    assert_eq!(pin.failed_attempts().await.unwrap(), 10);
    assert_eq!(pin.remaining_lockout_ms().await.unwrap(), 120_000);
}

#[tokio::test]
async fn setup_resets_attempts() {
    let clock = Arc::new(ManualClock::new(common::START_MS));
    let pin = guard(clock);
    assert!(pin.setup("4821").await.unwrap());
    for _ in 0..5 {
        pin.verify("0000").await.unwrap();
    }
    assert!(pin.is_locked_out().await.unwrap());
    assert!(pin.setup("9999").await.unwrap());
    assert!(!pin.is_locked_out().await.unwrap());
    assert!(pin.verify("9999").await.unwrap());
}

#[tokio::test]
async fn every_verify_outcome_waits_out_the_floor() {
    let clock = Arc::new(ManualClock::new(common::START_MS));
    let pin = guard(clock.clone());
    let floor = Duration::from_millis(PinPolicy::default().min_verify_ms);

    // No PIN configured yet.
    assert!(!pin.verify("4821").await.unwrap());
    assert_eq!(clock.take_sleeps(), vec![floor]);

    assert!(pin.setup("4821").await.unwrap());
    assert!(clock.take_sleeps().is_empty());

    assert!(pin.verify("4821").await.unwrap());
    assert_eq!(clock.take_sleeps(), vec![floor]);

    assert!(!pin.verify("0000").await.unwrap());
    assert_eq!(clock.take_sleeps(), vec![floor]);

    for _ in 0..4 {
        pin.verify("0000").await.unwrap();
    }
    clock.take_sleeps();
    assert!(pin.is_locked_out().await.unwrap());
    assert!(!pin.verify("4821").await.unwrap());
    assert_eq!(clock.take_sleeps(), vec![floor]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_guesses_cannot_outrun_the_lockout() {
    let clock = Arc::new(ManualClock::new(common::START_MS));
    let pin = Arc::new(guard(clock.clone()));
    assert!(pin.setup("4821").await.unwrap());

    let guesses: Vec<_> = (0..20)
        .map(|i| {
            let pin = pin.clone();
            tokio::spawn(async move { pin.verify(&format!("{:04}", 1000 + i)).await })
        })
        .collect();
    for guess in guesses {
        assert!(!guess.await.unwrap().unwrap());
    }

    assert_eq!(pin.failed_attempts().await.unwrap(), 5);
    assert!(pin.is_locked_out().await.unwrap());
    assert!(!pin.verify("4821").await.unwrap());
}

#[tokio::test]
async fn facade_reports_lockout_with_remaining_time() {
    let directory = Arc::new(InMemoryDirectory::new());
    let alice = common::peer("alice", &directory);
    alice.channel.bootstrap("4821").await.unwrap();

    for _ in 0..4 {
        let err = alice.channel.unlock("0000").await.unwrap_err();
        assert!(matches!(err, CoreError::AuthenticationFailed), "{err:?}");
    }
    let err = alice.channel.unlock("0000").await.unwrap_err();
    assert!(matches!(err, CoreError::LockedOut { remaining_ms: 60_000 }), "{err:?}");

    let err = alice.channel.unlock("4821").await.unwrap_err();
    assert!(matches!(err, CoreError::LockedOut { .. }), "{err:?}");

    alice.clock.advance(Duration::from_secs(60));
    alice.channel.unlock("4821").await.unwrap();
    assert_eq!(alice.channel.pin_guard().failed_attempts().await.unwrap(), 0);
    assert!(!alice.channel.is_locked().await);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn lockout_window_is_monotone_and_capped(attempts in 0u32..10_000) {
        let policy = PinPolicy::default();
        let now = lockout_window(attempts, &policy);
        let next = lockout_window(attempts + 1, &policy);
        prop_assert!(next >= now);
        prop_assert!(now <= Duration::from_secs(policy.max_lockout_secs));
        if attempts < policy.lockout_threshold {
            prop_assert_eq!(now, Duration::ZERO);
        } else {
            prop_assert!(now >= Duration::from_secs(policy.base_lockout_secs));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn lockout_deadline_never_moves_backwards(steps in prop::collection::vec(0u64..300, 1..30)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let clock = Arc::new(ManualClock::new(common::START_MS));
            let store = common::memory_store();
            let pin = PinGuard::new(store.clone(), clock.clone(), PinPolicy::default(), common::CHEAP_KDF);

            let mut last_deadline = None;
            for secs in steps {
                clock.advance(Duration::from_secs(secs));
                pin.record_failure().await.unwrap();
                let state: AttemptState = store.get_json("pin/attempts").await.unwrap().unwrap();
                if let Some(prev) = last_deadline {
                    assert!(state.lockout_until_ms.unwrap() >= prev);
                }
                if state.lockout_until_ms.is_some() {
                    last_deadline = state.lockout_until_ms;
                }
            }
        });
    }
}
