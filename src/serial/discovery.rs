use serialport::SerialPortType;

use super::{DiscoveredPort, Result, SerialError, UsbId};

/// Source of serial endpoints visible to the host
pub trait PortEnumerator: Send + Sync {
    fn enumerate(&self) -> Result<Vec<DiscoveredPort>>;
}

/// Enumerates OS serial ports through `serialport`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn enumerate(&self) -> Result<Vec<DiscoveredPort>> {
        let ports = serialport::available_ports()?;
        Ok(ports
            .into_iter()
            .map(|port| match port.port_type {
                SerialPortType::UsbPort(usb) => DiscoveredPort {
                    description: usb
                        .product
                        .clone()
                        .unwrap_or_else(|| format!("USB serial {:04x}:{:04x}", usb.vid, usb.pid)),
                    port_name: port.port_name,
                    vid: Some(usb.vid),
                    pid: Some(usb.pid),
                    serial_number: usb.serial_number,
                    manufacturer: usb.manufacturer,
                    product: usb.product,
                },
                other => DiscoveredPort {
                    description: match other {
                        SerialPortType::PciPort => "PCI serial port".to_string(),
                        SerialPortType::BluetoothPort => "Bluetooth serial port".to_string(),
                        _ => "Serial port".to_string(),
                    },
                    port_name: port.port_name,
                    vid: None,
                    pid: None,
                    serial_number: None,
                    manufacturer: None,
                    product: None,
                },
            })
            .collect())
    }
}

/// Fixed port list, for hosts that enumerate on their own and for tests
#[derive(Debug, Default, Clone)]
pub struct StaticPorts(pub Vec<DiscoveredPort>);

impl PortEnumerator for StaticPorts {
    fn enumerate(&self) -> Result<Vec<DiscoveredPort>> {
        Ok(self.0.clone())
    }
}

/// Lazily filtered view over one enumeration pass
pub struct DiscoveredPorts {
    ports: std::vec::IntoIter<DiscoveredPort>,
    filter: Vec<UsbId>,
}

impl Iterator for DiscoveredPorts {
    type Item = DiscoveredPort;

    fn next(&mut self) -> Option<DiscoveredPort> {
        let filter = &self.filter;
        self.ports.find(|port| filter.is_empty() || port.matches(filter))
    }
}

/// Port discovery with an optional vendor/product filter
pub struct Discovery {
    enumerator: Box<dyn PortEnumerator>,
    filter: Vec<UsbId>,
}

impl Discovery {
    pub fn new(filter: Vec<UsbId>) -> Self {
        Self::with_enumerator(Box::new(SystemPorts), filter)
    }

    pub fn with_enumerator(enumerator: Box<dyn PortEnumerator>, filter: Vec<UsbId>) -> Self {
        Self { enumerator, filter }
    }

    pub fn filter(&self) -> &[UsbId] {
        &self.filter
    }

    /// Enumerate afresh; only ports matching the filter are yielded when it is non-empty
    pub fn discover(&self) -> Result<DiscoveredPorts> {
        self.discover_matching(&self.filter)
    }

    fn discover_matching(&self, filter: &[UsbId]) -> Result<DiscoveredPorts> {
        let ports = self.enumerator.enumerate()?;
        Ok(DiscoveredPorts { ports: ports.into_iter(), filter: filter.to_vec() })
    }

    /// First port matching `filter`, or the first port at all when `filter` is empty
    pub fn auto_select_port(&self, filter: &[UsbId]) -> Result<DiscoveredPort> {
        match self.discover_matching(filter)?.next() {
            Some(port) => {
                log::info!("Auto-discovered device: {} ({})", port.port_name, port.description);
                Ok(port)
            }
            None => {
                log::warn!("No serial devices found during auto-discovery");
                Err(SerialError::NoDeviceFound)
            }
        }
    }
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
