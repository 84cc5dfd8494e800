//! Configuration management.
//!
//! flowline configuration can come from:
//! - Environment variables (FLOWLINE_*)
//! - Config file (~/.config/flowline/config.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// flowline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Execution engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Trigger dispatch configuration
    #[serde(default)]
    pub triggers: TriggerConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// Execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default per-action timeout for actions without their own (seconds).
    /// Delay actions are exempt; their duration is the parameter itself.
    #[serde(default = "default_action_timeout")]
    pub default_action_timeout_secs: u64,

    /// Optional wall-clock ceiling for a whole execution (seconds)
    #[serde(default)]
    pub max_execution_secs: Option<u64>,

    /// Allow webhook actions to target localhost and private networks
    #[serde(default)]
    pub allow_private_webhooks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_action_timeout_secs: default_action_timeout(),
            max_execution_secs: None,
            allow_private_webhooks: false,
        }
    }
}

fn default_action_timeout() -> u64 {
    30
}

/// Trigger dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Cadence of the schedule tick (seconds)
    #[serde(default = "default_schedule_tick")]
    pub schedule_tick_secs: u64,

    /// Capacity of the in-process event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer_size: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            schedule_tick_secs: default_schedule_tick(),
            event_buffer_size: default_event_buffer(),
        }
    }
}

fn default_schedule_tick() -> u64 {
    30
}

fn default_event_buffer() -> usize {
    4096
}

impl Config {
    /// Load configuration from default locations.
    pub fn load() -> Self {
        let mut config = Self::default();

        let primary_path = Self::config_dir().join("config.toml");
        if let Ok(partial) = Self::load_partial_from_path(&primary_path) {
            config.apply_partial(partial);
        }

        config.apply_env_overrides();
        config.sanitize();
        config
    }

    /// Zero is not a usable value for any of these: the broadcast channel
    /// rejects a zero capacity, a zero tick cadence means continuous
    /// ticking, and a zero default timeout would expire every provider call
    /// immediately. Fall back to the defaults instead.
    fn sanitize(&mut self) {
        if self.triggers.event_buffer_size == 0 {
            warn!(
                "event_buffer_size 0 is not usable; using {}",
                default_event_buffer()
            );
            self.triggers.event_buffer_size = default_event_buffer();
        }
        if self.triggers.schedule_tick_secs == 0 {
            warn!(
                "schedule_tick_secs 0 is not usable; using {}",
                default_schedule_tick()
            );
            self.triggers.schedule_tick_secs = default_schedule_tick();
        }
        if self.engine.default_action_timeout_secs == 0 {
            warn!(
                "default_action_timeout_secs 0 is not usable; using {}",
                default_action_timeout()
            );
            self.engine.default_action_timeout_secs = default_action_timeout();
        }
    }

    /// Get the data directory.
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("flowline"))
            .unwrap_or_else(|| PathBuf::from(".flowline"))
    }

    /// Get the config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("flowline"))
            .unwrap_or_else(|| PathBuf::from(".flowline"))
    }

    /// Resolved database path: configured, or the default under the data dir.
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("flowline.db"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("FLOWLINE_DATABASE_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
        if let Ok(timeout) = std::env::var("FLOWLINE_ACTION_TIMEOUT_SECS") {
            if let Ok(parsed) = timeout.parse::<u64>() {
                self.engine.default_action_timeout_secs = parsed;
            }
        }
        if let Ok(ceiling) = std::env::var("FLOWLINE_MAX_EXECUTION_SECS") {
            if let Ok(parsed) = ceiling.parse::<u64>() {
                self.engine.max_execution_secs = Some(parsed);
            }
        }
        if let Ok(allow) = std::env::var("FLOWLINE_ALLOW_PRIVATE_WEBHOOKS") {
            self.engine.allow_private_webhooks = allow.to_lowercase() == "true";
        }
        if let Ok(tick) = std::env::var("FLOWLINE_SCHEDULE_TICK_SECS") {
            if let Ok(parsed) = tick.parse::<u64>() {
                self.triggers.schedule_tick_secs = parsed;
            }
        }
        if let Ok(buffer) = std::env::var("FLOWLINE_EVENT_BUFFER_SIZE") {
            if let Ok(parsed) = buffer.parse::<usize>() {
                self.triggers.event_buffer_size = parsed;
            }
        }
    }

    fn load_partial_from_path(path: &Path) -> std::result::Result<PartialConfig, ()> {
        let content = std::fs::read_to_string(path).map_err(|_| ())?;
        toml::from_str(&content).map_err(|_| ())
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(storage) = partial.storage {
            self.storage = storage;
        }
        if let Some(engine) = partial.engine {
            self.engine = engine;
        }
        if let Some(triggers) = partial.triggers {
            self.triggers = triggers;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    storage: Option<StorageConfig>,
    engine: Option<EngineConfig>,
    triggers: Option<TriggerConfig>,
}
