//! JSON-over-serial command bridge.
//!
//! A host writes one JSON command per line to a microcontroller and reads one
//! JSON response line back. [`serial`] holds the transport and the command
//! protocol, [`responder`] models the firmware side of the wire, and
//! [`device`] wraps both into the handle an automation host drives.

pub mod config;
pub mod device;
pub mod responder;
pub mod serial;

pub use config::BridgeConfig;
pub use device::{ConnectionState, DeviceError, DeviceManager};
pub use responder::Responder;
pub use serial::{CommandProtocol, PortSettings, Response, SerialError, SerialInterface};
