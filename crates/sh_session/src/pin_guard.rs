//! PinGuard: PIN verification with exponential lockout.
//!
//! Stored state, two records in the key store:
//!   `pin/record`   { salt, verification_hash, kdf }  written by `setup`
//!   `pin/attempts` { failed_attempts, lockout_until_ms }
//!
//! The verification hash is HMAC-SHA256 under Argon2id(PIN, salt); the PIN
//! itself is never stored. Lockout tiers are `floor(attempts / threshold)`:
//! tier 1 locks for `base`, each further tier doubles, capped at `max`.
//! `lockout_until` only ever moves forward until `clear_failures`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use sh_crypto::kdf::{self, KdfParams, PURPOSE_PIN_VERIFY};
use sh_store::SecureKeyStore;

use crate::{
    clock::Clock,
    config::PinPolicy,
    error::{CoreError, CoreResult},
    kdf_task,
};

const RECORD_KEY: &str = "pin/record";
const ATTEMPTS_KEY: &str = "pin/attempts";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinRecord {
    pub version: u8,
    /// Hex-encoded 16-byte salt.
    pub salt: String,
    /// Hex-encoded HMAC tag.
    pub verification_hash: String,
    pub kdf: KdfParams,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttemptState {
    pub failed_attempts: u32,
    pub lockout_until_ms: Option<i64>,
}

/// Lockout length after `attempts` consecutive failures. Zero below the
/// first threshold.
pub fn lockout_window(attempts: u32, policy: &PinPolicy) -> Duration {
    let threshold = policy.lockout_threshold.max(1);
    let tier = attempts / threshold;
    if tier == 0 {
        return Duration::ZERO;
    }
    let factor = 1u64.checked_shl(tier - 1).unwrap_or(u64::MAX);
    let secs = policy
        .base_lockout_secs
        .saturating_mul(factor)
        .min(policy.max_lockout_secs);
    Duration::from_secs(secs)
}

pub struct PinGuard {
    store: SecureKeyStore,
    clock: Arc<dyn Clock>,
    policy: PinPolicy,
    kdf: KdfParams,
    /// Serialises read-modify-write of the attempts record.
    state_lock: Mutex<()>,
    /// Held from the lockout check to the failure record, so concurrent
    /// guesses are counted one at a time.
    verify_lock: Mutex<()>,
}

impl PinGuard {
    pub fn new(store: SecureKeyStore, clock: Arc<dyn Clock>, policy: PinPolicy, kdf: KdfParams) -> Self {
        Self {
            store,
            clock,
            policy,
            kdf,
            state_lock: Mutex::new(()),
            verify_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &PinPolicy {
        &self.policy
    }

    pub async fn is_configured(&self) -> CoreResult<bool> {
        Ok(self.store.get(RECORD_KEY).await?.is_some())
    }

    /// Store a new PIN. Returns `false` if it fails the format policy.
    /// Replaces any previous PIN and clears lockout state.
    pub async fn setup(&self, pin: &str) -> CoreResult<bool> {
        if !self.policy.accepts(pin) {
            return Ok(false);
        }
        let salt = kdf::generate_salt();
        let key = kdf_task::stretch(pin.as_bytes(), &salt, self.kdf, PURPOSE_PIN_VERIFY).await?;
        let record = PinRecord {
            version: 1,
            salt: hex::encode(salt),
            verification_hash: hex::encode(kdf::verification_tag(&key)?),
            kdf: self.kdf,
        };

        let _guard = self.state_lock.lock().await;
        self.store.set_json(RECORD_KEY, &record).await?;
        self.store.delete(ATTEMPTS_KEY).await?;
        info!("pin configured");
        Ok(true)
    }

    /// Check a PIN. Wrong PINs are recorded as failures. Returns `false`
    /// without touching the KDF while locked out, and `false` when no PIN is
    /// configured. Every call takes at least `min_verify_ms`.
    pub async fn verify(&self, pin: &str) -> CoreResult<bool> {
        let started = self.clock.now_ms();
        let outcome = {
            let _guard = self.verify_lock.lock().await;
            self.verify_inner(pin).await
        };

        let floor = self.policy.min_verify_ms as i64;
        let elapsed = self.clock.now_ms().saturating_sub(started);
        if elapsed < floor {
            self.clock
                .sleep(Duration::from_millis((floor - elapsed) as u64))
                .await;
        }
        outcome
    }

    async fn verify_inner(&self, pin: &str) -> CoreResult<bool> {
        if self.is_locked_out().await? {
            debug!("pin verify refused during lockout");
            return Ok(false);
        }
        let Some(record) = self.store.get_json::<PinRecord>(RECORD_KEY).await? else {
            return Ok(false);
        };

        let matches = if self.policy.accepts(pin) {
            let salt = hex::decode(&record.salt).map_err(|e| CoreError::StorageUnavailable(format!("pin record: {e}")))?;
            let expected = hex::decode(&record.verification_hash)
                .map_err(|e| CoreError::StorageUnavailable(format!("pin record: {e}")))?;
            let key = kdf_task::stretch(pin.as_bytes(), &salt, record.kdf, PURPOSE_PIN_VERIFY).await?;
            kdf::verify_tag(&key, &expected)
        } else {
            false
        };

        if !matches {
            self.record_failure().await?;
        }
        Ok(matches)
    }

    /// Count one failed attempt and extend the lockout if a threshold was
    /// crossed.
    pub async fn record_failure(&self) -> CoreResult<()> {
        let _guard = self.state_lock.lock().await;
        let mut state = self.attempts().await?;
        state.failed_attempts = state.failed_attempts.saturating_add(1);

        let window = lockout_window(state.failed_attempts, &self.policy);
        if !window.is_zero() {
            let candidate = self.clock.now_ms().saturating_add(window.as_millis() as i64);
            let until = state.lockout_until_ms.map_or(candidate, |cur| cur.max(candidate));
            state.lockout_until_ms = Some(until);
            warn!(
                attempts = state.failed_attempts,
                window_secs = window.as_secs(),
                "pin lockout engaged"
            );
        }
        self.store.set_json(ATTEMPTS_KEY, &state).await?;
        Ok(())
    }

    /// Reset attempts and lockout. Only call after a verified-correct PIN.
    pub async fn clear_failures(&self) -> CoreResult<()> {
        let _guard = self.state_lock.lock().await;
        self.store.delete(ATTEMPTS_KEY).await?;
        Ok(())
    }

    pub async fn failed_attempts(&self) -> CoreResult<u32> {
        Ok(self.attempts().await?.failed_attempts)
    }

    pub async fn is_locked_out(&self) -> CoreResult<bool> {
        Ok(self.remaining_lockout_ms().await? > 0)
    }

    pub async fn remaining_lockout_ms(&self) -> CoreResult<u64> {
        let state = self.attempts().await?;
        Ok(match state.lockout_until_ms {
            Some(until) => until.saturating_sub(self.clock.now_ms()).max(0) as u64,
            None => 0,
        })
    }

    async fn attempts(&self) -> CoreResult<AttemptState> {
        Ok(self
            .store
            .get_json::<AttemptState>(ATTEMPTS_KEY)
            .await?
            .unwrap_or_default())
    }
}
