use std::io::{ErrorKind, Read, Write};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::link::{PortOpener, PortSettings, SerialLink, SystemOpener};
use super::{Result, SerialError};

const READ_CHUNK: usize = 256;

/// The one open endpoint owned by a [`SerialInterface`]
struct Connection {
    port_name: String,
    link: Box<dyn SerialLink>,
    read_timeout: Duration,
    write_timeout: Duration,
    /// Bytes read past the last line terminator
    carry: Vec<u8>,
}

/// Line-framed transport over a single serial endpoint.
///
/// Every call locks the connection for its own duration only; pairing a
/// write with its reply is the job of [`super::CommandProtocol`].
pub struct SerialInterface {
    opener: Arc<dyn PortOpener>,
    connection: Mutex<Option<Connection>>,
}

impl SerialInterface {
    pub fn new() -> Self {
        Self::with_opener(Arc::new(SystemOpener))
    }

    pub fn with_opener(opener: Arc<dyn PortOpener>) -> Self {
        Self {
            opener,
            connection: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the port and clear stale buffers. No-op when already connected.
    pub fn connect(&self, settings: &PortSettings) -> Result<()> {
        let mut guard = self.lock();
        if let Some(existing) = guard.as_ref() {
            log::debug!("Already connected to {}", existing.port_name);
            return Ok(());
        }

        let connection_failed = |source: serialport::Error| SerialError::ConnectionFailed {
            port: settings.port_name.clone(),
            source,
        };

        let mut link = self.opener.open(settings).map_err(connection_failed)?;
        link.clear_buffers()
            .map_err(|e| connection_failed(serialport::Error::from(e)))?;

        *guard = Some(Connection {
            port_name: settings.port_name.clone(),
            link,
            read_timeout: settings.read_timeout,
            write_timeout: settings.write_timeout,
            carry: Vec::new(),
        });

        log::info!("Connected to serial device on {} ({} baud)", settings.port_name, settings.baud_rate);
        Ok(())
    }

    /// Close the port if open. Never fails; close problems are logged.
    pub fn disconnect(&self) {
        let mut guard = self.lock();
        if let Some(mut connection) = guard.take() {
            if let Err(e) = connection.link.flush() {
                log::warn!("Error flushing {} during disconnect: {}", connection.port_name, e);
            }
            log::info!("Disconnected from serial device on {}", connection.port_name);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    pub fn port_name(&self) -> Option<String> {
        self.lock().as_ref().map(|c| c.port_name.clone())
    }

    /// Open a connection that is closed again when the guard drops
    pub fn session(&self, settings: &PortSettings) -> Result<ConnectionGuard<'_>> {
        self.connect(settings)?;
        Ok(ConnectionGuard { interface: self })
    }

    /// Write `text` followed by a single `\n`, then flush
    pub fn write_line(&self, text: &str) -> Result<()> {
        let mut guard = self.lock();
        let connection = guard
            .as_mut()
            .ok_or_else(|| SerialError::WriteFailed("not connected".to_string()))?;

        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(b'\n');

        connection
            .link
            .set_timeout(connection.write_timeout)
            .map_err(|e| SerialError::WriteFailed(e.to_string()))?;

        let mut written = 0;
        while written < bytes.len() {
            match connection.link.write(&bytes[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    return Err(SerialError::WriteFailed(format!(
                        "write timed out after {:?} ({} of {} bytes sent)",
                        connection.write_timeout,
                        written,
                        bytes.len()
                    )));
                }
                Err(e) => return Err(SerialError::WriteFailed(e.to_string())),
            }
        }
        if written != bytes.len() {
            return Err(SerialError::WriteFailed(format!(
                "short write: expected {} bytes, wrote {}",
                bytes.len(),
                written
            )));
        }

        connection
            .link
            .flush()
            .map_err(|e| SerialError::WriteFailed(e.to_string()))?;

        log::debug!("-> {}: {}", connection.port_name, text);
        Ok(())
    }

    /// Drop buffered input: carried-over bytes and whatever the link holds.
    /// No-op when not connected.
    pub fn discard_input(&self) -> Result<()> {
        let mut guard = self.lock();
        if let Some(connection) = guard.as_mut() {
            if !connection.carry.is_empty() {
                log::debug!(
                    "Discarding {} stale bytes from {}",
                    connection.carry.len(),
                    connection.port_name
                );
                connection.carry.clear();
            }
            connection.link.clear_buffers()?;
        }
        Ok(())
    }

    /// Block until a full line arrives or the read timeout elapses.
    /// Trailing `\r`/`\n` are stripped; partial lines are discarded on timeout.
    pub fn read_line(&self) -> Result<String> {
        let mut guard = self.lock();
        let connection = guard.as_mut().ok_or(SerialError::NotConnected)?;

        let deadline = Instant::now() + connection.read_timeout;
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(pos) = connection.carry.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = connection.carry.drain(..=pos).collect();
                while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
                    line.pop();
                }
                let text = String::from_utf8(line)?;
                log::debug!("<- {}: {}", connection.port_name, text);
                return Ok(text);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                if !connection.carry.is_empty() {
                    log::warn!(
                        "Discarding {} bytes of partial line from {}",
                        connection.carry.len(),
                        connection.port_name
                    );
                    connection.carry.clear();
                }
                return Err(SerialError::Timeout(connection.read_timeout));
            }

            connection.link.set_timeout(remaining)?;
            match connection.link.read(&mut chunk) {
                Ok(0) => std::thread::sleep(remaining.min(Duration::from_millis(10))),
                Ok(n) => connection.carry.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
                Err(e) => return Err(SerialError::Io(e)),
            }
        }
    }
}

impl Default for SerialInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SerialInterface {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Scoped connection: disconnects on every exit path
pub struct ConnectionGuard<'a> {
    interface: &'a SerialInterface,
}

impl Deref for ConnectionGuard<'_> {
    type Target = SerialInterface;

    fn deref(&self) -> &SerialInterface {
        self.interface
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.interface.disconnect();
    }
}
