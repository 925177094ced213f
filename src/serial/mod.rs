pub mod discovery;
pub mod interface;
pub mod link;
pub mod loopback;
pub mod protocol;
pub mod types;

pub use discovery::{DiscoveredPorts, Discovery, PortEnumerator, StaticPorts, SystemPorts};
pub use interface::{ConnectionGuard, SerialInterface};
pub use link::{PortOpener, PortSettings, SerialLink, SystemOpener};
pub use protocol::{CommandProtocol, Session};
pub use types::{DeviceHello, DeviceStatus, ParameterValue, Response, ResponseStatus, VersionInfo};

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Port path that routes traffic to an in-process reference responder
pub const VIRTUAL_SIM_PORT: &str = "virtual-sim";

/// USB vendor/product pair used to filter discovered ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl UsbId {
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)
    }
}

impl FromStr for UsbId {
    type Err = String;

    /// Parses `"2341:0043"` (hexadecimal, optional `0x` prefixes)
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (vid, pid) = s
            .split_once(':')
            .ok_or_else(|| format!("expected VID:PID, got '{}'", s))?;
        let parse = |part: &str| {
            u16::from_str_radix(part.trim().trim_start_matches("0x"), 16)
                .map_err(|e| format!("invalid id '{}': {}", part, e))
        };
        Ok(Self::new(parse(vid)?, parse(pid)?))
    }
}

/// Snapshot of an OS-visible serial endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPort {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub description: String,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl DiscoveredPort {
    pub fn usb_id(&self) -> Option<UsbId> {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => Some(UsbId::new(vid, pid)),
            _ => None,
        }
    }

    pub fn matches(&self, filter: &[UsbId]) -> bool {
        self.usb_id().map_or(false, |id| filter.contains(&id))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("No serial device found")]
    NoDeviceFound,

    #[error("Connection failed on {port}: {source}")]
    ConnectionFailed {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not connected")]
    NotConnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid UTF-8 in response: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Device error: {0}")]
    DeviceError(String),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

impl SerialError {
    /// The link failed to move bytes (device didn't answer)
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SerialError::ConnectionFailed { .. }
                | SerialError::WriteFailed(_)
                | SerialError::Timeout(_)
                | SerialError::NotConnected
                | SerialError::Io(_)
        )
    }

    /// Bytes arrived but were not a valid response (device answered with garbage)
    pub fn is_protocol(&self) -> bool {
        matches!(self, SerialError::Decode(_) | SerialError::ProtocolError(_))
    }
}

pub type Result<T> = std::result::Result<T, SerialError>;
