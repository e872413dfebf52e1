//! Configuration loading for the coordinator.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;
use crate::transfer::UnroutedTransferPolicy;

pub type Result<T> = std::result::Result<T, Error>;

/// Get the devicemesh home directory (~/.devicemesh).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".devicemesh"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from ~/.devicemesh/settings.json, falling back to defaults.
pub fn load_settings() -> Result<Settings> {
    let path = get_settings_path()?;

    if !path.exists() {
        tracing::debug!("No settings at {}, using defaults", path.display());
        let settings = Settings::default();
        validate_settings(&settings)?;
        return Ok(settings);
    }

    load_settings_from(&path)
}

/// Load settings from an explicit path. The file must exist.
pub fn load_settings_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found at {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)?;
    validate_settings(&settings)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Resolve the optional `--config` flag.
pub fn resolve_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => load_settings_from(path),
        None => load_settings(),
    }
}

fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.coordinator_id.trim().is_empty() {
        return Err(Error::Config("coordinator_id must not be empty".to_string()));
    }
    if settings.callback_timeout_ms == 0 {
        return Err(Error::Config(
            "callback_timeout_ms must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Coordinator settings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Settings {
    /// Identity used as `sender_id` on responses.
    #[serde(default = "default_coordinator_id")]
    pub coordinator_id: String,

    /// Upper bound on a single device channel invocation.
    #[serde(default = "default_callback_timeout_ms")]
    pub callback_timeout_ms: u64,

    /// Period of the expiry sweep. Zero disables it.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,

    /// TTL for messages queued by `send_message_to_device` without one.
    #[serde(default)]
    pub default_message_ttl_seconds: Option<u64>,

    #[serde(default)]
    pub unrouted_transfer_policy: UnroutedTransferPolicy,

    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_coordinator_id() -> String {
    "device-coordinator".to_string()
}

fn default_callback_timeout_ms() -> u64 {
    30_000
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            coordinator_id: default_coordinator_id(),
            callback_timeout_ms: default_callback_timeout_ms(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            default_message_ttl_seconds: None,
            unrouted_transfer_policy: UnroutedTransferPolicy::default(),
            log_dir: None,
        }
    }
}

impl Settings {
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_seconds > 0).then(|| Duration::from_secs(self.sweep_interval_seconds))
    }

    pub fn default_message_ttl(&self) -> Option<Duration> {
        self.default_message_ttl_seconds.map(Duration::from_secs)
    }
}
