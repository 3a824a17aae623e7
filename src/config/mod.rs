//! # Configuration Management
//!
//! Optional TOML configuration for defaults the CLI flags can override.
//! Precedence is CLI args > config file > built-in defaults; a missing file
//! simply falls back to defaults.
//!
//! ```toml
//! [device]
//! port = "/dev/ttyACM0"
//! baud_rate = 115200
//!
//! [probe]
//! listen_seconds = 10
//!
//! [logging]
//! level = "info"
//! # file = "meshtac.log"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial port path. Empty means auto-detect.
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Seconds to listen for the firmware acknowledgement after sending.
    #[serde(default = "default_listen_seconds")]
    pub listen_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level when no -v flags are given: error|warn|info|debug|trace
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file; console output stays on when stdout is a TTY.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_listen_seconds() -> u64 {
    crate::probe::DEFAULT_LISTEN_SECONDS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            listen_seconds: default_listen_seconds(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| anyhow!("Failed to parse {}: {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.device.baud_rate == 0 {
            return Err(anyhow!("device.baud_rate must be non-zero"));
        }
        if self.probe.listen_seconds == 0 {
            return Err(anyhow!("probe.listen_seconds must be non-zero"));
        }
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            other => Err(anyhow!("unknown logging.level '{}'", other)),
        }
    }
}
