use serde::{Deserialize, Serialize};

/// Module connection state as seen by the host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Static module information reported to the host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleInfo {
    pub model: String,
    pub version: String,
    pub serial: String,
}

impl ModuleInfo {
    pub const MODEL: &'static str = "Custom Serial Module";

    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            model: Self::MODEL.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            serial: serial.into(),
        }
    }

    pub fn simulated() -> Self {
        Self::new("SIMULATION")
    }
}
