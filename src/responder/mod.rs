//! Reference firmware model: turns one command object into one response.
//!
//! State lives in an explicit [`DeviceState`] owned by each [`Responder`], so
//! several simulated devices can run side by side.

pub mod command;
pub mod state;

pub use command::DeviceCommand;
pub use state::{Clock, DeviceInfo, DeviceState, LinkState, LiveData, ManualClock, MeasurementRun, SystemClock};

use std::io::{self, BufRead, Write};

use serde_json::{json, Map, Value};

use crate::serial::Response;

/// Apply `command` to `state` at clock reading `now_ms`
pub fn dispatch(state: &mut DeviceState, info: &DeviceInfo, command: DeviceCommand, now_ms: u64) -> Response {
    match command {
        DeviceCommand::Connect => {
            state.link = LinkState::Connected;
            Response::success_with(
                format!("Connected to {}", info.device_name),
                object(json!({
                    "device_name": info.device_name,
                    "firmware_version": info.firmware_version,
                })),
            )
        }
        DeviceCommand::Disconnect => {
            state.link = LinkState::Disconnected;
            Response::success(format!("Disconnected from {}", info.device_name))
        }
        DeviceCommand::Status => {
            state.live.refresh(state.elapsed_ms(now_ms));
            Response::success_with(
                "Device status retrieved",
                object(json!({
                    "connected": state.is_connected(),
                    "temperature": state.live.temperature,
                    "humidity": state.live.humidity,
                    "uptime": state.live.uptime,
                })),
            )
        }
        DeviceCommand::Reset => {
            *state = DeviceState::new(now_ms);
            Response::success(format!("{} reset successfully", info.device_name))
        }
        DeviceCommand::GetVersion => Response::success_with(
            "Version information retrieved",
            object(json!({
                "device_name": info.device_name,
                "firmware_version": info.firmware_version,
                "api_version": info.api_version,
            })),
        ),
        DeviceCommand::SetParameter { parameter, value } => {
            let Some(parameter) = parameter else {
                return Response::error("Parameter name is required");
            };
            let message = format!("Parameter '{}' set to '{}'", parameter, display(&value));
            state.parameters.insert(parameter.clone(), value.clone());
            Response::success_with(message, object(json!({ "parameter": parameter, "value": value })))
        }
        DeviceCommand::GetParameter { parameter } => {
            let Some(parameter) = parameter else {
                return Response::error("Parameter name is required");
            };
            match state.parameters.get(&parameter) {
                Some(value) => Response::success_with(
                    format!("Parameter '{}' retrieved", parameter),
                    object(json!({ "parameter": parameter, "value": value })),
                ),
                None => Response::error(format!("Parameter '{}' not found", parameter)),
            }
        }
        DeviceCommand::CustomMeasurement { parameter1, parameter2 } => {
            state.live.refresh(state.elapsed_ms(now_ms));
            Response::success_with(
                "Custom measurement completed",
                object(json!({
                    "internal_temperature": state.live.temperature,
                    "parameter1": parameter1,
                    "parameter2": parameter2,
                    "timestamp": now_ms,
                })),
            )
        }
        DeviceCommand::StartMeasurement { duration } => {
            state.measurement = Some(MeasurementRun { duration: duration.clone(), started_at: now_ms });
            Response::success_with(
                "Measurement started",
                object(json!({ "duration": duration, "started_at": now_ms })),
            )
        }
        DeviceCommand::GetResults => {
            state.live.refresh(state.elapsed_ms(now_ms));
            Response::success_with(
                "Measurement results retrieved",
                object(json!({
                    "temperature": state.live.temperature,
                    "humidity": state.live.humidity,
                    "uptime": state.live.uptime,
                })),
            )
        }
        DeviceCommand::BlinkLed { count, delay } => Response::success_with(
            format!("LED blinked {} times", count),
            object(json!({ "count": count, "delay": delay })),
        ),
        DeviceCommand::Unknown(name) => Response::error(format!("Unknown command: {}", name)),
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One simulated device: identity, mutable state and the clock that ages it
pub struct Responder {
    info: DeviceInfo,
    state: DeviceState,
    clock: Box<dyn Clock>,
}

impl Responder {
    pub fn new(info: DeviceInfo) -> Self {
        Self::with_clock(info, SystemClock::default())
    }

    pub fn with_clock(info: DeviceInfo, clock: impl Clock + 'static) -> Self {
        let state = DeviceState::new(clock.now_ms());
        Self { info, state, clock: Box::new(clock) }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Handle one decoded command object
    pub fn handle(&mut self, command: &Map<String, Value>) -> Response {
        let command = DeviceCommand::parse(command);
        log::debug!("Responder handling {}", command.name());
        dispatch(&mut self.state, &self.info, command, self.clock.now_ms())
    }

    /// Handle one raw request line and produce the reply line (without the
    /// terminator). Blank lines get no reply.
    pub fn serve_line(&mut self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let response = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(command)) => self.handle(&command),
            Ok(_) => Response::error("Command must be a JSON object"),
            Err(_) => Response::error("Invalid JSON format"),
        };

        Some(serde_json::to_string(&response).unwrap_or_else(|e| {
            json!({ "status": "error", "message": format!("JSON serialization error: {}", e) }).to_string()
        }))
    }

    /// Run the firmware loop over a byte stream until EOF. A line that is not
    /// valid UTF-8 is answered like any other malformed line; only I/O errors
    /// end the loop.
    pub fn serve<R: BufRead, W: Write>(&mut self, mut reader: R, mut writer: W) -> io::Result<()> {
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                return Ok(());
            }
            if let Some(reply) = self.serve_line(&String::from_utf8_lossy(&line)) {
                writer.write_all(reply.as_bytes())?;
                writer.write_all(b"\n")?;
                writer.flush()?;
            }
        }
    }
}

impl Default for Responder {
    fn default() -> Self {
        Self::new(DeviceInfo::default())
    }
}
