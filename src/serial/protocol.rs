use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::{Map, Value};

use super::link::PortSettings;
use super::types::{encode_command, DeviceHello, DeviceStatus, ParameterValue, Response, VersionInfo};
use super::{Result, SerialError, SerialInterface};

/// JSON command/response protocol on top of [`SerialInterface`].
///
/// Each exchange writes one request line and blocks for one reply line. The
/// wire carries no request ids, so exchanges are serialized by a lock that
/// spans the write and the read; two callers queue instead of interleaving.
/// Input left over from an earlier exchange, such as a reply that arrived
/// after its request timed out, is discarded before each request is written.
pub struct CommandProtocol {
    interface: Arc<SerialInterface>,
    exchange: Mutex<()>,
}

impl CommandProtocol {
    pub fn new(interface: SerialInterface) -> Self {
        Self::from_shared(Arc::new(interface))
    }

    pub fn from_shared(interface: Arc<SerialInterface>) -> Self {
        Self {
            interface,
            exchange: Mutex::new(()),
        }
    }

    fn exchange_lock(&self) -> MutexGuard<'_, ()> {
        self.exchange.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect(&self, settings: &PortSettings) -> Result<()> {
        let _exchange = self.exchange_lock();
        self.interface.connect(settings)
    }

    pub fn disconnect(&self) {
        let _exchange = self.exchange_lock();
        self.interface.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.interface.is_connected()
    }

    /// Connect for the lifetime of the returned guard
    pub fn session(&self, settings: &PortSettings) -> Result<Session<'_>> {
        self.connect(settings)?;
        Ok(Session { protocol: self })
    }

    /// Send `{"command": name, ...params}` and return the decoded reply object.
    ///
    /// `params` must serialize to a JSON object; `()` sends no parameters.
    pub fn send_command<P: Serialize>(&self, name: &str, params: P) -> Result<Map<String, Value>> {
        let params = match serde_json::to_value(params) {
            Ok(Value::Object(map)) => map,
            Ok(Value::Null) => Map::new(),
            Ok(other) => {
                return Err(SerialError::ProtocolError(format!(
                    "Command parameters must be a JSON object, got {}",
                    other
                )))
            }
            Err(e) => return Err(SerialError::ProtocolError(format!("Failed to encode parameters: {}", e))),
        };
        let line = encode_command(name, params)?;
        self.exchange(&line)
    }

    /// Send a caller-built command object as-is
    pub fn send_structured(&self, command: &Map<String, Value>) -> Result<Map<String, Value>> {
        let line = serde_json::to_string(command)
            .map_err(|e| SerialError::ProtocolError(format!("Failed to encode command: {}", e)))?;
        self.exchange(&line)
    }

    /// [`Self::send_command`] with the reply checked for a valid `status`
    pub fn request<P: Serialize>(&self, name: &str, params: P) -> Result<Response> {
        Response::from_map(self.send_command(name, params)?)
    }

    fn exchange(&self, line: &str) -> Result<Map<String, Value>> {
        let reply = {
            let _exchange = self.exchange_lock();
            self.interface.discard_input()?;
            self.interface.write_line(line)?;
            self.interface.read_line()?
        };

        match serde_json::from_str::<Value>(&reply) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(SerialError::ProtocolError(format!("Expected a JSON object, got: {}", other))),
            Err(e) => Err(SerialError::ProtocolError(format!("Failed to parse JSON response {:?}: {}", reply, e))),
        }
    }

    /// `CONNECT`: mark the device session open
    pub fn connect_device(&self) -> Result<DeviceHello> {
        self.request("CONNECT", ())?.parse_data()
    }

    /// `DISCONNECT`: close the device session
    pub fn disconnect_device(&self) -> Result<String> {
        self.request("DISCONNECT", ())?.into_message()
    }

    pub fn get_status(&self) -> Result<DeviceStatus> {
        self.request("STATUS", ())?.parse_data()
    }

    /// `RESET`: clear parameters and restart uptime
    pub fn reset(&self) -> Result<String> {
        let message = self.request("RESET", ())?.into_message()?;
        log::warn!("Device reset: {}", message);
        Ok(message)
    }

    pub fn get_version(&self) -> Result<VersionInfo> {
        self.request("GET_VERSION", ())?.parse_data()
    }

    pub fn set_parameter(&self, parameter: &str, value: impl Into<Value>) -> Result<ParameterValue> {
        let value: Value = value.into();
        let params = serde_json::json!({ "parameter": parameter, "value": value });
        self.request("SET_PARAMETER", params)?.parse_data()
    }

    pub fn get_parameter(&self, parameter: &str) -> Result<ParameterValue> {
        let params = serde_json::json!({ "parameter": parameter });
        self.request("GET_PARAMETER", params)?.parse_data()
    }

    pub fn interface(&self) -> &SerialInterface {
        &self.interface
    }
}

/// Protocol-level scoped connection; disconnects when dropped
pub struct Session<'a> {
    protocol: &'a CommandProtocol,
}

impl Deref for Session<'_> {
    type Target = CommandProtocol;

    fn deref(&self) -> &CommandProtocol {
        self.protocol
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.protocol.disconnect();
    }
}
