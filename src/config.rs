//! Session configuration
//!
//! Tunables for the orchestration engine plus the opaque feature-toggle
//! store owned by the surrounding application.

use crate::capture::traits::Resolution;
use crate::recovery::policy::MAX_RETRIES;
use crate::utils::error::ConfigError;
use anyhow::Context;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Toggle read by `SessionController::start_preferred`
pub const MULTI_CAM_TOGGLE: &str = "multiCamEnabled";

/// Whether the engine runs against real hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareEnvironment {
    /// Real capture hardware is required; an empty enumeration is logged as an error
    Physical,
    /// Simulator, CI or test host; an empty enumeration is expected
    Virtualized,
}

impl Default for HardwareEnvironment {
    fn default() -> Self {
        Self::Virtualized
    }
}

/// How long feedback events stay visible, per severity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedbackDurations {
    pub info_ms: u64,
    pub success_ms: u64,
    pub warning_ms: u64,
    pub error_ms: u64,
}

impl Default for FeedbackDurations {
    fn default() -> Self {
        Self {
            info_ms: 2000,
            success_ms: 2000,
            warning_ms: 3000,
            error_ms: 4000,
        }
    }
}

/// Engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Stream synchronization cadence
    pub sync_interval_ms: u64,

    /// Delay before a recovery procedure is dispatched
    pub recovery_delay_ms: u64,

    /// Thermal state sampling interval during thermal recovery
    pub thermal_poll_ms: u64,

    /// Upper bound on a thermal recovery wait
    pub thermal_timeout_ms: u64,

    /// Recovery attempts allowed between two `clear_error` calls
    pub max_retries: u32,

    /// Formats with more scan lines than this are never paired
    pub reliable_line_ceiling: u32,

    /// Resolution paired formats are scored against
    pub target_resolution: Resolution,

    /// Frame rate requested for paired capture
    pub target_frame_rate: u32,

    /// Physical or virtualized hardware
    pub environment: HardwareEnvironment,

    /// Feedback display durations
    pub feedback: FeedbackDurations,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: 100,
            recovery_delay_ms: 1000,
            thermal_poll_ms: 1000,
            thermal_timeout_ms: 10_000,
            max_retries: MAX_RETRIES,
            reliable_line_ceiling: 1080,
            target_resolution: Resolution::new(1080, 1920),
            target_frame_rate: 30,
            environment: HardwareEnvironment::default(),
            feedback: FeedbackDurations::default(),
        }
    }
}

impl SessionConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        tracing::info!("Loaded session config from {:?}", path);
        Ok(config)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }

    pub fn thermal_poll(&self) -> Duration {
        Duration::from_millis(self.thermal_poll_ms)
    }

    pub fn thermal_timeout(&self) -> Duration {
        Duration::from_millis(self.thermal_timeout_ms)
    }
}

/// Persisted user feature toggles. The schema belongs to the application;
/// keys are opaque here.
pub trait ConfigStore: Send + Sync {
    fn get_toggle(&self, key: &str) -> anyhow::Result<Option<bool>>;
    fn set_toggle(&self, key: &str, value: bool) -> anyhow::Result<()>;
}

/// In-memory toggle store
#[derive(Default)]
pub struct MemoryConfigStore {
    toggles: RwLock<BTreeMap<String, bool>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get_toggle(&self, key: &str) -> anyhow::Result<Option<bool>> {
        Ok(self.toggles.read().get(key).copied())
    }

    fn set_toggle(&self, key: &str, value: bool) -> anyhow::Result<()> {
        self.toggles.write().insert(key.to_string(), value);
        Ok(())
    }
}

/// Toggle store backed by a JSON object on disk
pub struct JsonFileConfigStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl JsonFileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    fn read_all(&self) -> anyhow::Result<BTreeMap<String, bool>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading {:?}", self.path))?;
        serde_json::from_str(&contents).with_context(|| format!("parsing {:?}", self.path))
    }
}

impl ConfigStore for JsonFileConfigStore {
    fn get_toggle(&self, key: &str) -> anyhow::Result<Option<bool>> {
        let _guard = self.lock.read();
        Ok(self.read_all()?.get(key).copied())
    }

    fn set_toggle(&self, key: &str, value: bool) -> anyhow::Result<()> {
        let _guard = self.lock.write();
        let mut toggles = self.read_all()?;
        toggles.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&toggles)?;
        std::fs::write(&self.path, json).with_context(|| format!("writing {:?}", self.path))?;
        Ok(())
    }
}
