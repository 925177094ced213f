//! In-memory serial link that feeds every written line to a [`Responder`]
//! and queues its reply for the next reads.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::link::{SerialLink, DEFAULT_READ_TIMEOUT};
use crate::responder::Responder;

pub struct ResponderLink {
    responder: Responder,
    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
    timeout: Duration,
}

impl ResponderLink {
    pub fn new(responder: Responder) -> Self {
        Self {
            responder,
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }
}

impl Read for ResponderLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.outbound.is_empty() {
            // Behave like an idle port: wait out the timeout, then report it
            std::thread::sleep(self.timeout);
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data from responder"));
        }
        let n = buf.len().min(self.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ResponderLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inbound.extend_from_slice(buf);
        while let Some(pos) = self.inbound.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.inbound.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..pos]);
            if let Some(reply) = self.responder.serve_line(&text) {
                self.outbound.extend(reply.as_bytes());
                self.outbound.push_back(b'\n');
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for ResponderLink {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.inbound.clear();
        self.outbound.clear();
        Ok(())
    }
}
