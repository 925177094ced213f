use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::loopback::ResponderLink;
use super::VIRTUAL_SIM_PORT;
use crate::responder::Responder;

pub const DEFAULT_BAUD_RATE: u32 = 115200;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);

/// Byte-level access to one open serial endpoint
pub trait SerialLink: Read + Write + Send {
    /// Timeout applied to the next blocking read or write
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Drop anything still sitting in the input and output buffers
    fn clear_buffers(&mut self) -> io::Result<()>;
}

impl SerialLink for Box<dyn SerialPort> {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        SerialPort::set_timeout(&mut **self, timeout).map_err(io::Error::from)
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::All).map_err(io::Error::from)
    }
}

/// Serial parameters for one connection (8N1 is fixed)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Pause after opening a real port before buffers are cleared
    pub settle: Duration,
}

impl PortSettings {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            settle: DEFAULT_SETTLE,
        }
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

/// Opens a [`SerialLink`] for a set of port settings
pub trait PortOpener: Send + Sync {
    fn open(&self, settings: &PortSettings) -> serialport::Result<Box<dyn SerialLink>>;
}

/// Opens OS serial ports, or the in-process responder for [`VIRTUAL_SIM_PORT`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl PortOpener for SystemOpener {
    fn open(&self, settings: &PortSettings) -> serialport::Result<Box<dyn SerialLink>> {
        if settings.port_name == VIRTUAL_SIM_PORT {
            log::debug!("Opening in-process responder for {}", VIRTUAL_SIM_PORT);
            return Ok(Box::new(ResponderLink::new(Responder::default())));
        }

        let port = serialport::new(&settings.port_name, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.read_timeout)
            .open()?;

        // Boards that reset on DTR need a moment before they listen
        if !settings.settle.is_zero() {
            std::thread::sleep(settings.settle);
        }

        Ok(Box::new(port))
    }
}

impl<F> PortOpener for F
where
    F: Fn(&PortSettings) -> serialport::Result<Box<dyn SerialLink>> + Send + Sync,
{
    fn open(&self, settings: &PortSettings) -> serialport::Result<Box<dyn SerialLink>> {
        self(settings)
    }
}
