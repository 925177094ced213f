use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};

use serial_bridge::responder::{DeviceInfo, ManualClock, Responder};
use serial_bridge::serial::loopback::ResponderLink;
use serial_bridge::serial::{
    CommandProtocol, PortSettings, SerialError, SerialInterface, SerialLink, VIRTUAL_SIM_PORT,
};

type OpenResult = serialport::Result<Box<dyn SerialLink>>;

/// Responder link that also records every request line it receives
struct RecordingLink {
    inner: ResponderLink,
    pending: Vec<u8>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl Read for RecordingLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for RecordingLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.seen
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl SerialLink for RecordingLink {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.inner.set_timeout(timeout)
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.inner.clear_buffers()
    }
}

fn settings(port: &str) -> PortSettings {
    PortSettings::new(port).read_timeout(Duration::from_millis(500))
}

fn simulated_protocol() -> CommandProtocol {
    let protocol = CommandProtocol::new(SerialInterface::new());
    protocol.connect(&settings(VIRTUAL_SIM_PORT)).unwrap();
    protocol
}

/// Protocol on a manual-clock responder so sensor readings are deterministic
fn manual_clock_protocol() -> (CommandProtocol, ManualClock, Arc<Mutex<Vec<String>>>) {
    let clock = ManualClock::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let link_clock = clock.clone();
    let link_seen = seen.clone();
    let interface = SerialInterface::with_opener(Arc::new(move |_: &PortSettings| -> OpenResult {
        let responder = Responder::with_clock(DeviceInfo::default(), link_clock.clone());
        Ok(Box::new(RecordingLink {
            inner: ResponderLink::new(responder),
            pending: Vec::new(),
            seen: link_seen.clone(),
        }) as Box<dyn SerialLink>)
    }));

    let protocol = CommandProtocol::new(interface);
    protocol.connect(&settings("/dev/ttyMOCK")).unwrap();
    (protocol, clock, seen)
}

fn status(reply: &Map<String, Value>) -> &str {
    reply["status"].as_str().unwrap()
}

#[test]
fn status_reflects_connect() {
    let (protocol, _clock, _seen) = manual_clock_protocol();

    let before = protocol.send_command("STATUS", ()).unwrap();
    assert_eq!(status(&before), "success");
    assert_eq!(before["message"], "Device status retrieved");
    assert_eq!(before["data"]["connected"], false);
    assert_eq!(before["data"]["temperature"], 25.0);
    assert_eq!(before["data"]["humidity"], 50.0);

    let hello = protocol.connect_device().unwrap();
    assert_eq!(hello.device_name, "MockDevice");
    assert_eq!(hello.firmware_version, "1.0.0");

    let after = protocol.get_status().unwrap();
    assert!(after.connected);
    assert_eq!(after.uptime, 0);
}

#[test]
fn set_then_get_parameter_round_trips() {
    let protocol = simulated_protocol();

    let set = protocol
        .send_command("SET_PARAMETER", json!({"parameter": "led_state", "value": "true"}))
        .unwrap();
    assert_eq!(status(&set), "success");
    assert_eq!(set["message"], "Parameter 'led_state' set to 'true'");

    let get = protocol.get_parameter("led_state").unwrap();
    assert_eq!(get.parameter, "led_state");
    assert_eq!(get.value, json!("true"));
}

#[test]
fn request_is_encoded_with_command_first_and_params_unmodified() {
    let (protocol, _clock, seen) = manual_clock_protocol();

    let params = json!({"parameter": "gain", "value": {"coarse": 3, "fine": [0.5, 1.5]}});
    protocol.send_command("SET_PARAMETER", params.clone()).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].starts_with(r#"{"command":"SET_PARAMETER","#), "{}", seen[0]);

    let decoded: Map<String, Value> = serde_json::from_str(&seen[0]).unwrap();
    assert_eq!(decoded["command"], "SET_PARAMETER");
    assert_eq!(decoded["parameter"], params["parameter"]);
    assert_eq!(decoded["value"], params["value"]);
    assert_eq!(decoded.len(), 3);
}

#[test]
fn explicit_name_overrides_command_key_in_params() {
    let (protocol, _clock, seen) = manual_clock_protocol();

    let reply = protocol
        .send_command("GET_VERSION", json!({"command": "RESET"}))
        .unwrap();
    assert_eq!(reply["message"], "Version information retrieved");
    assert_eq!(seen.lock().unwrap()[0], r#"{"command":"GET_VERSION"}"#);
}

#[test]
fn non_object_params_are_rejected_before_sending() {
    let (protocol, _clock, seen) = manual_clock_protocol();

    let err = protocol.send_command("STATUS", json!([1, 2, 3])).unwrap_err();
    assert!(matches!(err, SerialError::ProtocolError(_)));
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn unknown_command_is_a_device_error_not_a_failure() {
    let protocol = simulated_protocol();

    let reply = protocol.send_command("fly_away", ()).unwrap();
    assert_eq!(status(&reply), "error");
    assert_eq!(reply["message"], "Unknown command: FLY_AWAY");

    // The link is still usable afterwards
    assert_eq!(protocol.get_version().unwrap().api_version, "1.0");
}

#[test]
fn missing_parameter_reports_device_error() {
    let protocol = simulated_protocol();

    let reply = protocol
        .send_command("GET_PARAMETER", json!({"parameter": "missing"}))
        .unwrap();
    assert_eq!(status(&reply), "error");
    assert_eq!(reply["message"], "Parameter 'missing' not found");

    match protocol.get_parameter("missing") {
        Err(SerialError::DeviceError(message)) => assert_eq!(message, "Parameter 'missing' not found"),
        other => panic!("expected device error, got {:?}", other),
    }
}

#[test]
fn reset_clears_parameters_and_session() {
    let (protocol, clock, _seen) = manual_clock_protocol();

    protocol.connect_device().unwrap();
    protocol.set_parameter("mode", "fast").unwrap();
    clock.advance(7_500);
    assert_eq!(protocol.get_status().unwrap().uptime, 7);

    assert_eq!(protocol.reset().unwrap(), "MockDevice reset successfully");

    let status = protocol.get_status().unwrap();
    assert!(!status.connected);
    assert_eq!(status.uptime, 0);
    assert_eq!(status.temperature, 25.0);
    assert_eq!(status.humidity, 50.0);
    assert!(matches!(protocol.get_parameter("mode"), Err(SerialError::DeviceError(_))));
}

#[test]
fn sensor_readings_drift_with_uptime() {
    let (protocol, clock, _seen) = manual_clock_protocol();

    // Quarter period of the temperature wave: peak
    clock.advance(2_500);
    let status = protocol.get_status().unwrap();
    assert_eq!(status.temperature, 30.0);
    assert_eq!(status.uptime, 2);
    assert!(status.humidity > 50.0 && status.humidity <= 60.0);
}

#[test]
fn measurement_results_follow_start() {
    let (protocol, clock, _seen) = manual_clock_protocol();

    let started = protocol
        .send_command("START_MEASUREMENT", json!({"duration": 2}))
        .unwrap();
    assert_eq!(status(&started), "success");
    assert_eq!(started["data"]["duration"], 2);

    clock.advance(500);
    let results = protocol.send_command("GET_RESULTS", ()).unwrap();
    assert_eq!(status(&results), "success");
    assert_eq!(results["message"], "Measurement results retrieved");
    assert_eq!(results["data"]["uptime"], 0);
}

#[test]
fn concurrent_callers_never_see_each_others_replies() {
    let protocol = Arc::new(simulated_protocol());

    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let protocol = protocol.clone();
            thread::spawn(move || {
                for round in 0..20 {
                    let name = format!("p{}", worker);
                    let value = format!("{}-{}", worker, round);
                    let echoed = protocol.set_parameter(&name, value.clone()).unwrap();
                    assert_eq!(echoed.parameter, name);
                    assert_eq!(echoed.value, json!(value));
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    for worker in 0..8 {
        let value = protocol.get_parameter(&format!("p{}", worker)).unwrap().value;
        assert_eq!(value, json!(format!("{}-19", worker)));
    }
}

#[test]
fn session_releases_port_on_drop() {
    let protocol = CommandProtocol::new(SerialInterface::new());
    {
        let session = protocol.session(&settings(VIRTUAL_SIM_PORT)).unwrap();
        assert!(session.get_version().is_ok());
        assert!(protocol.is_connected());
    }
    assert!(!protocol.is_connected());
    assert!(matches!(protocol.get_status(), Err(SerialError::WriteFailed(_))));
}

#[test]
fn garbage_reply_is_a_protocol_error() {
    let interface = SerialInterface::with_opener(Arc::new(|_: &PortSettings| -> OpenResult {
        Ok(Box::new(BannerLink::default()) as Box<dyn SerialLink>)
    }));
    let protocol = CommandProtocol::new(interface);
    protocol.connect(&settings("/dev/ttyBANNER")).unwrap();

    let err = protocol.send_command("STATUS", ()).unwrap_err();
    assert!(err.is_protocol(), "{:?}", err);
    assert!(!err.is_transport());

    // A JSON reply without a status is parsed but rejected as malformed by `request`
    let err = protocol.request("STATUS", ()).unwrap_err();
    assert!(matches!(err, SerialError::ProtocolError(_)));
}

/// Answers the first line with a boot banner and every later one with a status-less object
#[derive(Default)]
struct BannerLink {
    rx: std::collections::VecDeque<u8>,
    answered: usize,
}

impl Read for BannerLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "idle"));
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for BannerLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for _ in buf.iter().filter(|b| **b == b'\n') {
            let reply: &[u8] = if self.answered == 0 { b"Booting firmware v2...\n" } else { b"{\"ok\":true}\n" };
            self.rx.extend(reply.iter().copied());
            self.answered += 1;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for BannerLink {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.rx.clear();
        Ok(())
    }
}

/// Answers request `n` with `{"status":"success","message":"<n>"}`. The first
/// reply can be delayed past the read timeout, and every reply can be
/// followed by an unsolicited line.
struct TardyLink {
    requests: usize,
    first_reply_delay: Duration,
    trailing_noise: bool,
    scheduled: Vec<(Instant, Vec<u8>)>,
    rx: std::collections::VecDeque<u8>,
}

impl TardyLink {
    fn new(first_reply_delay: Duration, trailing_noise: bool) -> Self {
        Self {
            requests: 0,
            first_reply_delay,
            trailing_noise,
            scheduled: Vec::new(),
            rx: std::collections::VecDeque::new(),
        }
    }

    fn deliver_due(&mut self) {
        let now = Instant::now();
        let (due, later): (Vec<_>, Vec<_>) = self.scheduled.drain(..).partition(|(at, _)| *at <= now);
        self.scheduled = later;
        for (_, bytes) in due {
            self.rx.extend(bytes);
        }
    }
}

impl Read for TardyLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.deliver_due();
        if self.rx.is_empty() {
            thread::sleep(Duration::from_millis(5));
            return Err(io::Error::new(io::ErrorKind::TimedOut, "idle"));
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for TardyLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for _ in buf.iter().filter(|b| **b == b'\n') {
            self.requests += 1;
            let mut reply = format!(r#"{{"status":"success","message":"{}"}}"#, self.requests).into_bytes();
            reply.push(b'\n');
            if self.trailing_noise {
                reply.extend_from_slice(b"{\"status\":\"success\",\"message\":\"noise\"}\n");
            }
            let delay = if self.requests == 1 { self.first_reply_delay } else { Duration::ZERO };
            self.scheduled.push((Instant::now() + delay, reply));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for TardyLink {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        // Whatever already reached the port is in its input buffer
        self.deliver_due();
        self.rx.clear();
        Ok(())
    }
}

fn tardy_protocol(first_reply_delay: Duration, trailing_noise: bool) -> CommandProtocol {
    let slot = Mutex::new(Some(TardyLink::new(first_reply_delay, trailing_noise)));
    let interface = SerialInterface::with_opener(Arc::new(move |_: &PortSettings| -> OpenResult {
        slot.lock()
            .unwrap()
            .take()
            .map(|link| Box::new(link) as Box<dyn SerialLink>)
            .ok_or_else(|| serialport::Error::new(serialport::ErrorKind::NoDevice, "already opened"))
    }));
    let protocol = CommandProtocol::new(interface);
    protocol
        .connect(&PortSettings::new("/dev/ttyTARDY").read_timeout(Duration::from_millis(50)))
        .unwrap();
    protocol
}

#[test]
fn unsolicited_lines_do_not_leak_into_the_next_exchange() {
    let protocol = tardy_protocol(Duration::ZERO, true);

    assert_eq!(protocol.send_command("STATUS", ()).unwrap()["message"], "1");
    assert_eq!(protocol.send_command("STATUS", ()).unwrap()["message"], "2");
}

#[test]
fn late_reply_is_dropped_before_the_next_request() {
    let protocol = tardy_protocol(Duration::from_millis(150), false);

    assert!(matches!(protocol.send_command("STATUS", ()), Err(SerialError::Timeout(_))));
    thread::sleep(Duration::from_millis(200));

    assert_eq!(protocol.send_command("STATUS", ()).unwrap()["message"], "2");
}
