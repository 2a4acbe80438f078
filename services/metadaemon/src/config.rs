//! Configuration loading for the metadata daemon.
//!
//! Loads daemon settings from a YAML file; every field has a default so a
//! missing file degrades to a usable configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

/// Root configuration loaded from the daemon YAML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub seiscomp: SeiscompConfig,
    #[serde(default)]
    pub fdsnws: FdsnwsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// External SeisComP tool configuration (converter and merger).
#[derive(Debug, Clone, Deserialize)]
pub struct SeiscompConfig {
    /// Path to the seiscomp dispatcher executable
    #[serde(default = "default_executable")]
    pub executable: PathBuf,
    /// Directory holding per-network prototype inventories
    #[serde(default = "default_prototype_dir")]
    pub prototype_dir: PathBuf,
    /// Per-invocation subprocess timeout in seconds
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
    /// Timed-out invocations tolerated before a record is rejected
    #[serde(default = "default_max_tool_retries")]
    pub max_tool_retries: u32,
}

fn default_executable() -> PathBuf {
    PathBuf::from("/opt/seiscomp/bin/seiscomp")
}

fn default_prototype_dir() -> PathBuf {
    PathBuf::from("prototypes")
}

fn default_tool_timeout() -> u64 {
    300
}

fn default_max_tool_retries() -> u32 {
    3
}

impl Default for SeiscompConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            prototype_dir: default_prototype_dir(),
            timeout_secs: default_tool_timeout(),
            max_tool_retries: default_max_tool_retries(),
        }
    }
}

/// Remote FDSNWS station service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FdsnwsConfig {
    /// Station query endpoint
    #[serde(default = "default_station_url")]
    pub station_url: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_station_url() -> String {
    "https://www.orfeus-eu.org/fdsnws/station/1/query".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for FdsnwsConfig {
    fn default() -> Self {
        Self {
            station_url: default_station_url(),
            timeout_secs: default_http_timeout(),
        }
    }
}

/// Polling schedule for the daemon loop.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Sleep between processing cycles once the queue is exhausted
    #[serde(default = "default_sleep_interval")]
    pub sleep_interval_ms: u64,
}

fn default_sleep_interval() -> u64 {
    60_000
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            sleep_interval_ms: default_sleep_interval(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: DaemonConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        debug!(path = %path.display(), "Loaded daemon config");
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    pub fn sleep_interval(&self) -> Duration {
        Duration::from_millis(self.schedule.sleep_interval_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.seiscomp.timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.fdsnws.timeout_secs)
    }
}
