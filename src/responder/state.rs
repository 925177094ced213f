use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_TEMPERATURE: f64 = 25.0;
pub const DEFAULT_HUMIDITY: f64 = 50.0;

/// Static identity reported by the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_name: String,
    pub firmware_version: String,
    pub api_version: String,
}

impl DeviceInfo {
    pub fn new(device_name: impl Into<String>, firmware_version: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            firmware_version: firmware_version.into(),
            api_version: "1.0".to_string(),
        }
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self::new("MockDevice", "1.0.0")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connected,
}

/// Simulated sensor readings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveData {
    pub temperature: f64,
    pub humidity: f64,
    /// Seconds since the uptime baseline
    pub uptime: u64,
}

impl Default for LiveData {
    fn default() -> Self {
        Self { temperature: DEFAULT_TEMPERATURE, humidity: DEFAULT_HUMIDITY, uptime: 0 }
    }
}

impl LiveData {
    /// Recompute readings for `elapsed_ms` past the baseline. Sensors drift as
    /// sine waves around their defaults so they sit exactly on them at zero.
    pub fn refresh(&mut self, elapsed_ms: u64) {
        let t = elapsed_ms as f64;
        let wave = |period_ms: f64| (std::f64::consts::TAU * t / period_ms).sin();
        self.temperature = round2(DEFAULT_TEMPERATURE + 5.0 * wave(10_000.0));
        self.humidity = round2(DEFAULT_HUMIDITY + 10.0 * wave(20_000.0));
        self.uptime = elapsed_ms / 1000;
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// A measurement started by `START_MEASUREMENT`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRun {
    pub duration: Value,
    pub started_at: u64,
}

/// Everything the command handlers mutate
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceState {
    pub link: LinkState,
    pub live: LiveData,
    pub parameters: BTreeMap<String, Value>,
    /// Clock reading (ms) that uptime is measured from
    pub uptime_baseline_ms: u64,
    pub measurement: Option<MeasurementRun>,
}

impl DeviceState {
    pub fn new(now_ms: u64) -> Self {
        Self { uptime_baseline_ms: now_ms, ..Self::default() }
    }

    pub fn is_connected(&self) -> bool {
        self.link == LinkState::Connected
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.uptime_baseline_ms)
    }
}

/// Millisecond clock driving uptime and sensor drift
pub trait Clock: Send {
    fn now_ms(&self) -> u64;
}

pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-advanced clock; clones share the same reading
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}
