//! Bridge configuration: serial parameters, discovery filter and mode flags.
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::serial::link::{DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT, DEFAULT_SETTLE, DEFAULT_WRITE_TIMEOUT};
use crate::serial::{PortSettings, UsbId};

/// Port name that switches a module into simulated mode
pub const VIRTUAL_PORT: &str = "virtual";

/// Arduino Uno and Raspberry Pi Pico
pub const DEFAULT_VID_PID_FILTER: [UsbId; 2] = [UsbId::new(0x2341, 0x0043), UsbId::new(0x2E8A, 0x0005)];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Explicit port path; auto-discovered when absent
    pub port: Option<String>,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub settle_ms: u64,
    pub auto_discover: bool,
    pub vid_pid_filter: Vec<UsbId>,
    /// Answer every command locally without touching a port
    pub simulated: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT.as_millis() as u64,
            settle_ms: DEFAULT_SETTLE.as_millis() as u64,
            auto_discover: true,
            vid_pid_filter: DEFAULT_VID_PID_FILTER.to_vec(),
            simulated: false,
        }
    }
}

impl BridgeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&text)?;
        log::debug!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn is_simulated(&self) -> bool {
        self.simulated || self.port.as_deref() == Some(VIRTUAL_PORT)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn port_settings(&self, port_name: impl Into<String>) -> PortSettings {
        PortSettings::new(port_name)
            .baud_rate(self.baud_rate)
            .read_timeout(self.read_timeout())
            .write_timeout(self.write_timeout())
            .settle(Duration::from_millis(self.settle_ms))
    }
}
