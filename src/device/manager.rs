use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{ConnectionState, DeviceError, ModuleInfo, Result};
use crate::config::{BridgeConfig, VIRTUAL_PORT};
use crate::serial::{self, CommandProtocol, DiscoveredPort, Discovery, SerialError, SerialInterface};

/// Host-facing handle for one serial module.
///
/// Built once by the host, then driven through `send_command` and friends;
/// `cleanup` releases the port. Blocking serial exchanges run on tokio's
/// blocking pool so the host's runtime keeps moving.
pub struct DeviceManager {
    config: BridgeConfig,
    simulated: bool,
    protocol: Arc<CommandProtocol>,
    discovery: Arc<Discovery>,
    state: Arc<RwLock<ConnectionState>>,
    live_data: Arc<RwLock<Map<String, Value>>>,
    info: Arc<RwLock<ModuleInfo>>,
}

impl DeviceManager {
    /// Build a module on the system serial stack
    pub async fn build(config: BridgeConfig) -> Self {
        let discovery = Discovery::new(config.vid_pid_filter.clone());
        Self::build_with(config, SerialInterface::new(), discovery).await
    }

    /// Build a module on a caller-supplied transport and port source.
    ///
    /// Connection problems do not fail the build; they leave the module in
    /// [`ConnectionState::Error`].
    pub async fn build_with(config: BridgeConfig, interface: SerialInterface, discovery: Discovery) -> Self {
        let simulated = config.is_simulated();
        let manager = Self {
            simulated,
            info: Arc::new(RwLock::new(if simulated { ModuleInfo::simulated() } else { ModuleInfo::new("UNKNOWN") })),
            config,
            protocol: Arc::new(CommandProtocol::new(interface)),
            discovery: Arc::new(discovery),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            live_data: Arc::new(RwLock::new(Map::new())),
        };

        if simulated {
            log::info!("Serial module running in simulated mode");
            manager.set_state(ConnectionState::Connected).await;
        } else if let Err(e) = manager.connect().await {
            log::error!("Failed to connect to serial module: {}", e);
            manager.set_state(ConnectionState::Error(e.to_string())).await;
        }

        manager
    }

    async fn connect(&self) -> Result<()> {
        self.set_state(ConnectionState::Connecting).await;

        let config = self.config.clone();
        let discovery = self.discovery.clone();
        let port = self
            .run_blocking(move |protocol| {
                let port = resolve_port(&config, &discovery)?;
                protocol.connect(&config.port_settings(port.port_name.clone()))?;
                Ok(port)
            })
            .await?;

        if let Some(serial) = port.serial_number.clone() {
            self.info.write().await.serial = serial;
        }

        match self.run_blocking(|protocol| protocol.request("STATUS", ())).await {
            Ok(response) if response.is_success() => {
                self.live_data.write().await.extend(response.data.unwrap_or_default());
                self.set_state(ConnectionState::Connected).await;
            }
            Ok(response) => {
                let message = response.message.unwrap_or_else(|| "status request rejected".to_string());
                log::warn!("Device on {} rejected STATUS: {}", port.port_name, message);
                self.set_state(ConnectionState::Error(message)).await;
            }
            Err(e) => {
                // The port is open; a silent device is still usable
                log::warn!("Could not get device status: {}", e);
                self.set_state(ConnectionState::Connected).await;
            }
        }
        Ok(())
    }

    async fn run_blocking<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&CommandProtocol) -> serial::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let protocol = self.protocol.clone();
        tokio::task::spawn_blocking(move || f(&protocol))
            .await
            .map_err(|e| DeviceError::Worker(e.to_string()))?
            .map_err(DeviceError::from)
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    /// Send a command with key/value parameters and return the raw response object.
    ///
    /// A device-level `"error"` status is returned as-is, not as an `Err`.
    pub async fn send_command(&self, command: &str, params: Value) -> Result<Map<String, Value>> {
        if self.simulated {
            let data = match params {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            let mut response = Map::new();
            response.insert("status".into(), Value::from("success"));
            response.insert("message".into(), Value::from(format!("Simulated command: {}", command)));
            response.insert("data".into(), Value::Object(data));
            return Ok(response);
        }

        let command = command.to_string();
        self.run_blocking(move |protocol| protocol.send_command(&command, params)).await
    }

    pub async fn get_device_status(&self) -> Result<Map<String, Value>> {
        let response = self.send_command("STATUS", Value::Null).await?;
        if response.get("status").and_then(Value::as_str) == Some("success") {
            if let Some(Value::Object(data)) = response.get("data") {
                self.live_data.write().await.extend(data.clone());
            }
        }
        Ok(response)
    }

    pub async fn reset_device(&self) -> Result<Map<String, Value>> {
        let response = self.send_command("RESET", Value::Null).await?;
        if response.get("status").and_then(Value::as_str) == Some("success") {
            self.set_state(ConnectionState::Connected).await;
        }
        Ok(response)
    }

    /// Enumerate candidate ports through the configured filter
    pub async fn discover_devices(&self) -> Result<Vec<DiscoveredPort>> {
        if self.simulated {
            return Ok(vec![DiscoveredPort {
                port_name: VIRTUAL_PORT.to_string(),
                vid: None,
                pid: None,
                description: "Simulated device".to_string(),
                serial_number: None,
                manufacturer: None,
                product: None,
            }]);
        }

        let discovery = self.discovery.clone();
        tokio::task::spawn_blocking(move || discovery.discover().map(|ports| ports.collect::<Vec<_>>()))
            .await
            .map_err(|e| DeviceError::Worker(e.to_string()))?
            .map_err(DeviceError::from)
    }

    /// Tell the device the session is over. Failures are logged.
    /// A simulated module has no session and keeps its state.
    pub async fn deactivate(&self) {
        if self.simulated {
            return;
        }
        if self.protocol.is_connected() {
            if let Err(e) = self.run_blocking(|protocol| protocol.disconnect_device()).await {
                log::warn!("Error during deactivation: {}", e);
            }
        }
        self.set_state(ConnectionState::Disconnected).await;
    }

    /// Deactivate and release the port. Never fails.
    pub async fn cleanup(&self) {
        self.deactivate().await;
        let protocol = self.protocol.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || protocol.disconnect()).await {
            log::error!("Error during cleanup: {}", e);
        }
    }

    pub fn is_simulated(&self) -> bool {
        self.simulated
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn protocol(&self) -> Arc<CommandProtocol> {
        self.protocol.clone()
    }

    pub async fn status(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    pub async fn live_data(&self) -> Map<String, Value> {
        self.live_data.read().await.clone()
    }

    pub async fn module_info(&self) -> ModuleInfo {
        self.info.read().await.clone()
    }
}

/// Explicit port from config, else the first auto-discovered match
fn resolve_port(config: &BridgeConfig, discovery: &Discovery) -> serial::Result<DiscoveredPort> {
    if let Some(port_name) = &config.port {
        return Ok(DiscoveredPort {
            port_name: port_name.clone(),
            vid: None,
            pid: None,
            description: "Configured port".to_string(),
            serial_number: None,
            manufacturer: None,
            product: None,
        });
    }
    if !config.auto_discover {
        log::warn!("No serial port configured and auto-discovery is disabled");
        return Err(SerialError::NoDeviceFound);
    }
    discovery.auto_select_port(&config.vid_pid_filter)
}
