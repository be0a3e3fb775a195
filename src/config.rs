//! Configuration loading and management
//!
//! The hotkey configuration is a single immutable `Config` value. The daemon
//! keeps it as JSON under its data directory; the core only ever sees whole
//! validated snapshots.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::hotkey::Key;
use crate::state::BindingConflict;

/// Longest accepted long-press threshold
pub const MAX_RESPONSE_TIME: Duration = Duration::from_secs(10);

/// How a qualifying long press affects the touchpad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Touchpad active only while the hotkey is held past the threshold
    #[default]
    Hold,
    /// Each long press flips the touchpad; state persists after release
    Toggle,
}

impl Mode {
    pub fn flipped(self) -> Self {
        match self {
            Mode::Hold => Mode::Toggle,
            Mode::Toggle => Mode::Hold,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Hold => write!(f, "hold"),
            Mode::Toggle => write!(f, "toggle"),
        }
    }
}

/// Hotkey configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hold duration that turns a tap into a long press
    #[serde(with = "duration_secs")]
    pub response_time: Duration,

    /// Key whose tap/hold pattern drives the touchpad
    #[serde(rename = "hot_key")]
    pub hotkey: Key,

    /// Key emulating the left mouse button while the touchpad is active
    #[serde(rename = "left_click")]
    pub left_click_key: Key,

    /// Key emulating the right mouse button while the touchpad is active
    #[serde(rename = "right_click")]
    pub right_click_key: Key,

    pub mode: Mode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            response_time: Duration::from_millis(200),
            hotkey: Key::new("f1"),
            left_click_key: Key::new("f2"),
            right_click_key: Key::new("f3"),
            mode: Mode::Hold,
        }
    }
}

/// Errors from validating or persisting configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("response time must be greater than 0 and at most {max}s, got {got:?}", max = MAX_RESPONSE_TIME.as_secs())]
    InvalidResponseTime { got: Duration },

    #[error("{0} key must not be empty")]
    EmptyKey(&'static str),

    #[error(transparent)]
    Conflict(#[from] BindingConflict),

    #[error("failed to access configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl Config {
    /// Check response time bounds, key presence and key distinctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.response_time.is_zero() || self.response_time > MAX_RESPONSE_TIME {
            return Err(ConfigError::InvalidResponseTime {
                got: self.response_time,
            });
        }

        for (role, key) in self.roles() {
            if key.is_empty() {
                return Err(ConfigError::EmptyKey(role));
            }
        }

        BindingConflict::check(&self.roles())?;
        Ok(())
    }

    /// The three configured keys with their role names
    pub fn roles(&self) -> [(&'static str, &Key); 3] {
        [
            ("hotkey", &self.hotkey),
            ("left click", &self.left_click_key),
            ("right click", &self.right_click_key),
        ]
    }
}

/// Loads and saves the JSON configuration file
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the configuration file
    pub fn read(&self) -> Result<Config, ConfigError> {
        let contents = std::fs::read_to_string(&self.path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration, falling back to defaults
    ///
    /// A missing file is created with the defaults. A file that cannot be
    /// read or parsed is left alone and the defaults are used.
    pub fn load_or_default(&self) -> Config {
        match self.read() {
            Ok(config) => {
                info!(path = ?self.path, "configuration loaded");
                config
            }
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Config::default();
                if let Err(e) = self.save(&config) {
                    error!(?e, path = ?self.path, "failed to write default configuration");
                } else {
                    info!(path = ?self.path, "default configuration written");
                }
                config
            }
            Err(e) => {
                error!(%e, path = ?self.path, "failed to load configuration, using defaults");
                Config::default()
            }
        }
    }

    /// Write the configuration file
    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(config)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Daemon file locations
#[derive(Debug, Clone)]
pub struct Paths {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Path to the JSON hotkey configuration
    pub config_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,
}

impl Paths {
    /// Derive paths from the environment
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("touchpad-hotkey");

        Ok(Self::in_dir(data_dir))
    }

    pub fn in_dir(data_dir: PathBuf) -> Self {
        Self {
            socket_path: data_dir.join("daemon.sock"),
            config_path: data_dir.join("config.json"),
            data_dir,
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

/// Serde adapter storing a `Duration` as fractional seconds
mod duration_secs {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}
