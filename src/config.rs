//! Shutdown step configuration.
//!
//! The configuration is read once when the pipeline is assembled and never
//! mutated afterwards. It can be built in code or loaded from a TOML file:
//!
//! ```toml
//! shutdown_command = "sudo shutdown -P now"
//! timeout = "5m"
//! post_stop_delay = "2s"
//! disable_shutdown = false
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name for config file storage.
const APP_NAME: &str = "vmhalt";

/// Default config file name inside the app config directory.
const CONFIG_FILE: &str = "shutdown.toml";

/// Default upper bound on the wait for the VM to stop.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Identifier of the machine being shut down, opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmId(pub String);

impl VmId {
    /// Create a new VmId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for VmId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Configuration for the shutdown step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    /// Command run inside the guest to shut it down gracefully.
    /// Empty or absent means the driver force-stops the VM.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_command: Option<String>,

    /// How long to wait for the VM to report stopped (default: 5m).
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Grace period after the VM stopped, for backend locks to clear (default: 0).
    #[serde(with = "humantime_serde")]
    pub post_stop_delay: Duration,

    /// Never send a shutdown request; the operator stops the VM by hand.
    pub disable_shutdown: bool,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            shutdown_command: None,
            timeout: DEFAULT_TIMEOUT,
            post_stop_delay: Duration::ZERO,
            disable_shutdown: false,
        }
    }
}

impl StepConfig {
    /// Default path of the configuration file.
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::config("could not determine config directory"))?;
        Ok(dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Load configuration from a TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigLoad(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
            .map_err(|e| Error::ConfigLoad(format!("{}: {}", path.display(), e)))
    }

    /// Load configuration from the default path.
    ///
    /// If the file doesn't exist, returns the default configuration.
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::config(e.to_string()))
    }

    /// Resolve which shutdown channel this configuration selects.
    pub fn mode(&self) -> ShutdownMode {
        if self.disable_shutdown {
            return ShutdownMode::Disabled;
        }
        match self.shutdown_command.as_deref().map(str::trim) {
            Some(cmd) if !cmd.is_empty() => ShutdownMode::GracefulCommand(cmd.to_string()),
            _ => ShutdownMode::ForcedStop,
        }
    }
}

/// How the step asks the VM to stop. Chosen once from [`StepConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownMode {
    /// No request is sent; the operator must stop the VM.
    Disabled,
    /// Run this command inside the guest.
    GracefulCommand(String),
    /// Ask the driver to stop the VM.
    ForcedStop,
}

impl ShutdownMode {
    /// Get the mode name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            ShutdownMode::Disabled => "disabled",
            ShutdownMode::GracefulCommand(_) => "graceful",
            ShutdownMode::ForcedStop => "forced",
        }
    }
}

impl std::fmt::Display for ShutdownMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Durations as humantime strings ("5m", "500ms"); bare integers are seconds.
mod humantime_serde {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => humantime::parse_duration(text.trim()).map_err(de::Error::custom),
        }
    }
}
