//! Runtime configuration.
//!
//! Defaults are usable as-is; `from_env` overlays `SHROUD_*` variables and
//! `from_json_file` loads a full or partial JSON document.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use sh_crypto::KdfParams;
pub use sh_store::StorageConfig;

use crate::error::CoreError;

const MAX_PIN_LENGTH: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PinPolicy {
    /// Exact number of digits.
    pub length: usize,
    /// Failures per lockout tier.
    pub lockout_threshold: u32,
    pub base_lockout_secs: u64,
    pub max_lockout_secs: u64,
    /// Floor on wall-clock time per `verify`, success or not.
    pub min_verify_ms: u64,
}

impl Default for PinPolicy {
    fn default() -> Self {
        Self {
            length: 4,
            lockout_threshold: 5,
            base_lockout_secs: 60,
            max_lockout_secs: 16 * 60,
            min_verify_ms: 100,
        }
    }
}

impl PinPolicy {
    pub fn accepts(&self, pin: &str) -> bool {
        pin.len() == self.length && pin.bytes().all(|b| b.is_ascii_digit())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatchetConfig {
    /// Messages per ratchet step.
    pub step: u64,
    /// Highest step any index may require.
    pub max_steps: u64,
    /// How far past the highest index received so far an incoming index
    /// may reach before it is dropped without derivation.
    pub max_skip: u64,
}

impl Default for RatchetConfig {
    fn default() -> Self {
        Self {
            step: sh_crypto::ratchet::DEFAULT_RATCHET_STEP,
            max_steps: 100_000,
            max_skip: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// 0 disables auto-lock.
    pub auto_lock_secs: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            auto_lock_secs: sh_store::vault::DEFAULT_AUTO_LOCK_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShroudConfig {
    /// Key-store namespace.
    pub origin: String,
    pub storage: StorageConfig,
    pub pin: PinPolicy,
    pub kdf: KdfParams,
    pub ratchet: RatchetConfig,
    pub vault: VaultConfig,
}

impl Default for ShroudConfig {
    fn default() -> Self {
        Self {
            origin: "shroud".into(),
            storage: StorageConfig::default(),
            pin: PinPolicy::default(),
            kdf: KdfParams::default(),
            ratchet: RatchetConfig::default(),
            vault: VaultConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, CoreError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CoreError::Config(format!("{name}={raw} is not valid"))),
        Err(_) => Ok(None),
    }
}

impl ShroudConfig {
    /// Defaults overlaid with `SHROUD_*` environment variables.
    pub fn from_env() -> Result<Self, CoreError> {
        let mut config = Self::default();
        if let Ok(origin) = std::env::var("SHROUD_ORIGIN") {
            config.origin = origin;
        }
        if let Ok(path) = std::env::var("SHROUD_SQLITE_PATH") {
            config.storage.sqlite_path = if path.is_empty() { None } else { Some(PathBuf::from(path)) };
        }
        if let Ok(dir) = std::env::var("SHROUD_FALLBACK_DIR") {
            config.storage.fallback_dir = PathBuf::from(dir);
        }
        if let Some(len) = env_parse("SHROUD_PIN_LENGTH")? {
            config.pin.length = len;
        }
        if let Some(mem) = env_parse("SHROUD_KDF_MEMORY_KIB")? {
            config.kdf.memory_kib = mem;
        }
        if let Some(step) = env_parse("SHROUD_RATCHET_STEP")? {
            config.ratchet.step = step;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read(path)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_slice(&raw)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.origin.is_empty() || self.origin.contains('/') {
            return Err(CoreError::Config("origin must be non-empty and contain no '/'".into()));
        }
        if self.pin.length == 0 || self.pin.length > MAX_PIN_LENGTH {
            return Err(CoreError::Config(format!(
                "pin length must be 1..={MAX_PIN_LENGTH}, got {}",
                self.pin.length
            )));
        }
        if self.pin.lockout_threshold == 0 {
            return Err(CoreError::Config("lockout threshold must be at least 1".into()));
        }
        if self.pin.max_lockout_secs < self.pin.base_lockout_secs {
            return Err(CoreError::Config("max lockout shorter than base lockout".into()));
        }
        if self.ratchet.step == 0 {
            return Err(CoreError::Config("ratchet step must be at least 1".into()));
        }
        if self.ratchet.max_skip == 0 {
            return Err(CoreError::Config("ratchet max_skip must be at least 1".into()));
        }
        self.kdf
            .validate()
            .map_err(|e| CoreError::Config(format!("kdf: {e}")))
    }
}
