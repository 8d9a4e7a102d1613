//! Host configuration, `framescope-host.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use framescope_ipc::contract::{DEFAULT_CONTROL_CHANNEL, DEFAULT_SENSOR_CHANNEL};
use serde::Deserialize;

use crate::error::HostError;

pub const CONFIG_FILE_NAME: &str = "framescope-host.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Bootstrap module handed to the injector.
    pub loader_path: PathBuf,
    pub control_channel: String,
    pub sensor_channel: String,
    pub sensor_monitor_path: PathBuf,
    /// How long the monitor process gets to exit after `Command/Stop`.
    pub sensor_stop_timeout_ms: u64,
    pub client_wait_timeout_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            loader_path: PathBuf::from("framescope_loader.dll"),
            control_channel: DEFAULT_CONTROL_CHANNEL.to_string(),
            sensor_channel: DEFAULT_SENSOR_CHANNEL.to_string(),
            sensor_monitor_path: PathBuf::from("framescope-sensors.exe"),
            sensor_stop_timeout_ms: 10_000,
            client_wait_timeout_ms: 10_000,
        }
    }
}

impl HostConfig {
    /// Unlike the hook side, a present but unreadable file is an error.
    pub fn load(path: &Path) -> Result<Self, HostError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| HostError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| HostError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn sensor_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_stop_timeout_ms)
    }

    pub fn client_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.client_wait_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig::load(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config, HostConfig::default());
        assert_eq!(config.sensor_channel, "framescope-sensors");
        assert_eq!(config.sensor_stop_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "loader_path = 'bin/loader.dll'\nclient_wait_timeout_ms = 500\n").unwrap();

        let config = HostConfig::load(&path).unwrap();
        assert_eq!(config.loader_path, PathBuf::from("bin/loader.dll"));
        assert_eq!(config.client_wait_timeout(), Duration::from_millis(500));
        assert_eq!(config.control_channel, "framescope");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "sensor_stop_timeout_ms = 'later'").unwrap();
        assert!(matches!(HostConfig::load(&path), Err(HostError::ConfigParse { .. })));
    }
}
