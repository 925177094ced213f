use serde_json::{Map, Value};

/// Every command the responder understands
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    Connect,
    Disconnect,
    Status,
    Reset,
    GetVersion,
    SetParameter { parameter: Option<String>, value: Value },
    GetParameter { parameter: Option<String> },
    CustomMeasurement { parameter1: Value, parameter2: Value },
    StartMeasurement { duration: Value },
    GetResults,
    BlinkLed { count: u64, delay: u64 },
    /// Upper-cased name of anything else
    Unknown(String),
}

impl DeviceCommand {
    /// Decode a command object. The `command` field is matched case-insensitively;
    /// a missing or non-string field decodes as `Unknown("")`.
    pub fn parse(object: &Map<String, Value>) -> Self {
        let name = object
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_uppercase();

        match name.as_str() {
            "CONNECT" => DeviceCommand::Connect,
            "DISCONNECT" => DeviceCommand::Disconnect,
            "STATUS" => DeviceCommand::Status,
            "RESET" => DeviceCommand::Reset,
            "GET_VERSION" => DeviceCommand::GetVersion,
            "SET_PARAMETER" => DeviceCommand::SetParameter {
                parameter: parameter_name(object),
                value: object.get("value").cloned().unwrap_or(Value::Null),
            },
            "GET_PARAMETER" => DeviceCommand::GetParameter { parameter: parameter_name(object) },
            "CUSTOM_MEASUREMENT" => DeviceCommand::CustomMeasurement {
                parameter1: object.get("parameter1").cloned().unwrap_or(Value::from(0)),
                parameter2: object.get("parameter2").cloned().unwrap_or(Value::from("")),
            },
            "START_MEASUREMENT" => DeviceCommand::StartMeasurement {
                duration: object.get("duration").cloned().unwrap_or(Value::from(10)),
            },
            "GET_RESULTS" => DeviceCommand::GetResults,
            "BLINK_LED" => DeviceCommand::BlinkLed {
                count: object.get("count").and_then(Value::as_u64).unwrap_or(3),
                delay: object.get("delay").and_then(Value::as_u64).unwrap_or(200),
            },
            _ => DeviceCommand::Unknown(name),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DeviceCommand::Connect => "CONNECT",
            DeviceCommand::Disconnect => "DISCONNECT",
            DeviceCommand::Status => "STATUS",
            DeviceCommand::Reset => "RESET",
            DeviceCommand::GetVersion => "GET_VERSION",
            DeviceCommand::SetParameter { .. } => "SET_PARAMETER",
            DeviceCommand::GetParameter { .. } => "GET_PARAMETER",
            DeviceCommand::CustomMeasurement { .. } => "CUSTOM_MEASUREMENT",
            DeviceCommand::StartMeasurement { .. } => "START_MEASUREMENT",
            DeviceCommand::GetResults => "GET_RESULTS",
            DeviceCommand::BlinkLed { .. } => "BLINK_LED",
            DeviceCommand::Unknown(name) => name,
        }
    }
}

// Empty and non-string names count as missing
fn parameter_name(object: &Map<String, Value>) -> Option<String> {
    object
        .get("parameter")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}
