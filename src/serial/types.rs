//! Wire types shared by the host protocol and the device responder
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Result, SerialError};

/// Outcome reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// One response line: `{"status": ..., "message": ...?, "data": {...}?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl Response {
    pub fn success(message: impl Into<String>) -> Self {
        Self { status: ResponseStatus::Success, message: Some(message.into()), data: None }
    }

    pub fn success_with(message: impl Into<String>, data: Map<String, Value>) -> Self {
        Self { status: ResponseStatus::Success, message: Some(message.into()), data: Some(data) }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { status: ResponseStatus::Error, message: Some(message.into()), data: None }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Parse a decoded reply; a missing or unknown `status` is malformed
    pub fn from_map(map: Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(map))
            .map_err(|e| SerialError::ProtocolError(format!("Malformed response: {}", e)))
    }

    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("status".into(), serde_json::to_value(self.status).unwrap_or(Value::Null));
        if let Some(message) = &self.message {
            map.insert("message".into(), Value::String(message.clone()));
        }
        if let Some(data) = &self.data {
            map.insert("data".into(), Value::Object(data.clone()));
        }
        map
    }

    /// `data` of a success response (empty when absent); an `error` status
    /// becomes [`SerialError::DeviceError`]
    pub fn into_data(self) -> Result<Map<String, Value>> {
        match self.status {
            ResponseStatus::Success => Ok(self.data.unwrap_or_default()),
            ResponseStatus::Error => Err(SerialError::DeviceError(
                self.message.unwrap_or_else(|| "unspecified device error".to_string()),
            )),
        }
    }

    /// Message of a success response; an `error` status becomes [`SerialError::DeviceError`]
    pub fn into_message(self) -> Result<String> {
        match self.status {
            ResponseStatus::Success => Ok(self.message.unwrap_or_default()),
            ResponseStatus::Error => Err(SerialError::DeviceError(
                self.message.unwrap_or_else(|| "unspecified device error".to_string()),
            )),
        }
    }

    /// Decode the `data` object of a success response into `T`
    pub fn parse_data<T: DeserializeOwned>(self) -> Result<T> {
        let data = self.into_data()?;
        serde_json::from_value(Value::Object(data))
            .map_err(|e| SerialError::ProtocolError(format!("Unexpected response data: {}", e)))
    }
}

/// Encode a request line: `{"command": name, ...params}` with `command` first
pub fn encode_command(name: &str, params: Map<String, Value>) -> Result<String> {
    #[derive(Serialize)]
    struct Request<'a> {
        command: &'a str,
        #[serde(flatten)]
        params: Map<String, Value>,
    }

    let mut params = params;
    params.remove("command");
    serde_json::to_string(&Request { command: name, params })
        .map_err(|e| SerialError::ProtocolError(format!("Failed to encode command: {}", e)))
}

/// Data returned by `CONNECT`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceHello {
    pub device_name: String,
    pub firmware_version: String,
}

/// Data returned by `STATUS`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub connected: bool,
    pub temperature: f64,
    pub humidity: f64,
    pub uptime: u64,
}

/// Data returned by `GET_VERSION`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub device_name: String,
    pub firmware_version: String,
    pub api_version: String,
}

/// Data returned by `SET_PARAMETER` and `GET_PARAMETER`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub parameter: String,
    pub value: Value,
}
