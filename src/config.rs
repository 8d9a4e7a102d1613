// config.rs: Optional `framescope.toml` next to the instrumentation module.
//
// Every key is optional; a missing file yields the defaults and a malformed
// file yields the defaults plus a warning in the hook log.

use std::path::Path;
use std::time::Duration;

use framescope_ipc::contract::DEFAULT_CONTROL_CHANNEL;
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "framescope.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Name of the host's control channel.
    pub control_channel: String,
    pub connect_timeout_ms: u64,
    /// Upper bound on one request/response exchange with the host.
    pub request_timeout_ms: u64,
    pub detect_timeout_ms: u64,
    pub detect_interval_ms: u64,
    /// `off`, `error`, `warn`, `info`, `debug` or `trace`.
    pub log_level: String,
    /// Also log every frame sample at trace level.
    pub log_frame_times: bool,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            control_channel: DEFAULT_CONTROL_CHANNEL.to_string(),
            connect_timeout_ms: 1000,
            request_timeout_ms: 250,
            detect_timeout_ms: 5000,
            detect_interval_ms: 100,
            log_level: "info".to_string(),
            log_frame_times: false,
        }
    }
}

impl HookConfig {
    /// Reads `framescope.toml` from `dir`, falling back to defaults.
    pub fn load(dir: Option<&Path>) -> Self {
        let Some(dir) = dir else {
            return Self::default();
        };
        let path = dir.join(CONFIG_FILE_NAME);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) => return Self::default(),
        };
        match Self::from_toml(&text) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("ignoring {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Unknown level names fall back to `info`.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }

    pub fn detect_interval(&self) -> Duration {
        Duration::from_millis(self.detect_interval_ms)
    }
}
