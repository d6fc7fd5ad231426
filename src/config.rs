//! Configuration loading and management
//!
//! Handles parsing of the `.weekboard.toml` file at the board root.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::lock::DEFAULT_LOCK_TIMEOUT_MS;
use crate::task::FULL_DAY_SHIFT;

/// Name of the configuration file at the board root
pub const CONFIG_FILE: &str = ".weekboard.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Document store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Schedule synchronization configuration
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Actor configuration
    #[serde(default)]
    pub actor: ActorConfig,
}

/// File store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory (relative to the board root) holding the documents
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// How long to wait for the store lock before failing
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// Schedule synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Shift value that means "whole day"; it never prefixes labels
    #[serde(default = "default_full_day_shift")]
    pub full_day_shift: String,

    /// Create the Monday-Saturday week on demand when a task day has none
    #[serde(default)]
    pub auto_create_weeks: bool,
}

fn default_full_day_shift() -> String {
    FULL_DAY_SHIFT.to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            full_day_shift: default_full_day_shift(),
            auto_create_weeks: false,
        }
    }
}

/// Actor-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Actor recorded in the change log when none is given
    #[serde(default = "default_actor")]
    pub default: String,
}

fn default_actor() -> String {
    crate::changelog::SYSTEM_ACTOR_ID.to_string()
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            default: default_actor(),
        }
    }
}

impl Config {
    /// Load configuration from a `.weekboard.toml` file
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a board root, or return defaults
    pub fn load_from_root(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Self::default();
        }
        match Self::load(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %config_path.display(), error = %err, "ignoring invalid config");
                Self::default()
            }
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> crate::error::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> crate::error::Result<()> {
        let data_dir = self.store.data_dir.trim();
        if data_dir.is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "store.data_dir cannot be empty".to_string(),
            ));
        }
        if Path::new(data_dir).is_absolute() || data_dir.split(['/', '\\']).any(|s| s == "..") {
            return Err(crate::error::Error::InvalidConfig(
                "store.data_dir must stay inside the board root".to_string(),
            ));
        }
        if self.store.lock_timeout_ms == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "store.lock_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.schedule.full_day_shift.trim().is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "schedule.full_day_shift cannot be empty".to_string(),
            ));
        }
        if self.actor.default.trim().is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "actor.default cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
