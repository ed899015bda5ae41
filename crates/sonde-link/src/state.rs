//! Shared vehicle state: current telemetry, ADS-B traffic, the status log
//! and the rolling history buffers the profile plots are built from.
//!
//! One [`VehicleState`] lives for the whole application. In steady state
//! it has a single writer (the IO loop) and any number of readers going
//! through [`SharedVehicleState::snapshot`] or [`SharedVehicleState::read`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Cap on every rolling history buffer.
pub const MAX_HISTORY: usize = 3000;

/// Cap on the status-text log.
pub const MAX_STATUS_MESSAGES: usize = 200;

/// HDOP value displayed while the GPS reports "unknown".
pub const HDOP_UNKNOWN: f64 = 99.99;

/// MAV_SEVERITY levels carried by STATUSTEXT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
    Unknown,
}

impl Severity {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Severity::Emergency,
            1 => Severity::Alert,
            2 => Severity::Critical,
            3 => Severity::Error,
            4 => Severity::Warning,
            5 => Severity::Notice,
            6 => Severity::Info,
            7 => Severity::Debug,
            _ => Severity::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Severity::Emergency => "EMERGENCY",
            Severity::Alert => "ALERT",
            Severity::Critical => "CRITICAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Notice => "NOTICE",
            Severity::Info => "INFO",
            Severity::Debug => "DEBUG",
            Severity::Unknown => "UNKNOWN",
        }
    }
}

/// One entry in the vehicle status log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub severity: Severity,
    pub text: String,
    /// Unix seconds at receipt.
    pub timestamp: f64,
}

/// ADS-B traffic target, upserted by transponder address. Staleness-based
/// pruning is left to the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdsbTarget {
    pub icao: u32,
    pub callsign: String,
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f64,
    pub heading_deg: f64,
    pub speed_ms: f64,
    /// Unix seconds at last receipt.
    pub last_seen: f64,
}

/// One fused sensor reading destined for the history buffers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySample {
    pub time_since_boot: f64,
    pub lat: f64,
    pub lon: f64,
    pub alt_rel: f64,
    pub alt_amsl: f64,
    pub temperature_c: f64,
    pub humidity: f64,
    pub dew_point_c: f64,
    pub wind_speed: f64,
    pub wind_dir: f64,
    pub vertical_wind: f64,
    pub temp_sensors: Vec<f64>,
    pub rh_sensors: Vec<f64>,
    pub vz_cms: f64,
}

/// Parallel time-ordered buffers, all capped at [`MAX_HISTORY`] and always
/// index-aligned: sample `i` across every buffer belongs to one fused
/// sensor reading. [`History::push`] is the only growth point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub time_s: VecDeque<f64>,
    pub lat: VecDeque<f64>,
    pub lon: VecDeque<f64>,
    pub alt_rel: VecDeque<f64>,
    pub alt_amsl: VecDeque<f64>,
    pub temperature_c: VecDeque<f64>,
    pub humidity: VecDeque<f64>,
    pub dew_point_c: VecDeque<f64>,
    pub wind_speed: VecDeque<f64>,
    pub wind_dir: VecDeque<f64>,
    pub vertical_wind: VecDeque<f64>,
    pub temp_sensors: VecDeque<Vec<f64>>,
    pub rh_sensors: VecDeque<Vec<f64>>,
    pub vz_cms: VecDeque<f64>,
}

impl History {
    pub fn len(&self) -> usize {
        self.time_s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_s.is_empty()
    }

    /// Append one sample to every buffer, evicting the oldest sample from
    /// every buffer in lockstep once the cap is reached.
    pub fn push(&mut self, sample: HistorySample) {
        if self.time_s.len() == MAX_HISTORY {
            self.time_s.pop_front();
            self.lat.pop_front();
            self.lon.pop_front();
            self.alt_rel.pop_front();
            self.alt_amsl.pop_front();
            self.temperature_c.pop_front();
            self.humidity.pop_front();
            self.dew_point_c.pop_front();
            self.wind_speed.pop_front();
            self.wind_dir.pop_front();
            self.vertical_wind.pop_front();
            self.temp_sensors.pop_front();
            self.rh_sensors.pop_front();
            self.vz_cms.pop_front();
        }
        self.time_s.push_back(sample.time_since_boot);
        self.lat.push_back(sample.lat);
        self.lon.push_back(sample.lon);
        self.alt_rel.push_back(sample.alt_rel);
        self.alt_amsl.push_back(sample.alt_amsl);
        self.temperature_c.push_back(sample.temperature_c);
        self.humidity.push_back(sample.humidity);
        self.dew_point_c.push_back(sample.dew_point_c);
        self.wind_speed.push_back(sample.wind_speed);
        self.wind_dir.push_back(sample.wind_dir);
        self.vertical_wind.push_back(sample.vertical_wind);
        self.temp_sensors.push_back(sample.temp_sensors);
        self.rh_sensors.push_back(sample.rh_sensors);
        self.vz_cms.push_back(sample.vz_cms);
        debug_assert!(self.aligned());
    }

    pub fn clear(&mut self) {
        *self = History::default();
    }

    fn aligned(&self) -> bool {
        let n = self.time_s.len();
        n == self.lat.len()
            && n == self.lon.len()
            && n == self.alt_rel.len()
            && n == self.alt_amsl.len()
            && n == self.temperature_c.len()
            && n == self.humidity.len()
            && n == self.dew_point_c.len()
            && n == self.wind_speed.len()
            && n == self.wind_dir.len()
            && n == self.vertical_wind.len()
            && n == self.temp_sensors.len()
            && n == self.rh_sensors.len()
            && n == self.vz_cms.len()
    }
}

/// Mutable container for all vehicle telemetry.
#[derive(Debug, Clone)]
pub struct VehicleState {
    // GPS / position
    pub lat: f64,
    pub lon: f64,
    pub alt_amsl: f64,
    pub alt_rel: f64,
    pub fix_type: u8,
    pub satellites: u8,
    pub hdop: f64,

    // Attitude (radians) and heading (degrees)
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub heading_deg: f64,

    // Speeds; vx/vy/vz in cm/s as received (NED, vz positive down)
    pub groundspeed: f64,
    pub airspeed: f64,
    pub vx: i16,
    pub vy: i16,
    pub vz: i16,
    pub throttle: u16,

    // Power
    pub voltage: f64,
    pub current_ma: f64,
    pub battery_pct: i8,

    // Radio
    pub rssi_percent: u8,

    // System
    pub armed: bool,
    pub flight_mode: String,
    pub system_status: u8,
    pub last_heartbeat: Option<Instant>,

    // Atmospheric sensors
    pub temperature_sensors: Vec<f64>,
    pub humidity_sensors: Vec<f64>,
    /// Mean raw temperature, Kelvin.
    pub mean_temp: f64,
    /// Mean relative humidity, percent.
    pub mean_rh: f64,

    // Wind (derived)
    pub wind_speed: f64,
    pub wind_direction: f64,
    pub vertical_wind: f64,

    // ADS-B traffic
    pub adsb_targets: HashMap<u32, AdsbTarget>,

    // Status log, oldest first
    pub status_messages: VecDeque<StatusMessage>,

    // Diagnostics
    pub servo_raw: [u16; 8],
    pub time_since_boot: f64,
    pub utc_time: Option<f64>,
    pub last_command_ack: Option<(u16, u8)>,

    pub history: History,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            lat: 0.0,
            lon: 0.0,
            alt_amsl: 0.0,
            alt_rel: 0.0,
            fix_type: 0,
            satellites: 0,
            hdop: HDOP_UNKNOWN,
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            heading_deg: 0.0,
            groundspeed: 0.0,
            airspeed: 0.0,
            vx: 0,
            vy: 0,
            vz: 0,
            throttle: 0,
            voltage: 0.0,
            current_ma: 0.0,
            battery_pct: 0,
            rssi_percent: 0,
            armed: false,
            flight_mode: "---".to_string(),
            system_status: 0,
            last_heartbeat: None,
            temperature_sensors: Vec::new(),
            humidity_sensors: Vec::new(),
            mean_temp: 0.0,
            mean_rh: 0.0,
            wind_speed: 0.0,
            wind_direction: 0.0,
            vertical_wind: 0.0,
            adsb_targets: HashMap::new(),
            status_messages: VecDeque::new(),
            servo_raw: [0; 8],
            time_since_boot: 0.0,
            utc_time: None,
            last_command_ack: None,
            history: History::default(),
        }
    }
}

impl VehicleState {
    pub fn heartbeat_age(&self) -> Duration {
        match self.last_heartbeat {
            Some(at) => at.elapsed(),
            None => Duration::MAX,
        }
    }

    pub fn is_healthy(&self, timeout: Duration) -> bool {
        self.heartbeat_age() < timeout
    }

    /// Append a status-log entry, dropping from the oldest end past the cap.
    pub fn push_status(&mut self, severity: Severity, text: String) {
        self.status_messages.push_back(StatusMessage {
            severity,
            text,
            timestamp: unix_now(),
        });
        while self.status_messages.len() > MAX_STATUS_MESSAGES {
            self.status_messages.pop_front();
        }
    }

    pub fn snapshot(&self, heartbeat_timeout: Duration) -> StateSnapshot {
        StateSnapshot {
            lat: self.lat,
            lon: self.lon,
            alt_amsl: self.alt_amsl,
            alt_rel: self.alt_rel,
            fix_type: self.fix_type,
            satellites: self.satellites,
            hdop: self.hdop,
            roll: self.roll,
            pitch: self.pitch,
            yaw: self.yaw,
            heading_deg: self.heading_deg,
            groundspeed: self.groundspeed,
            airspeed: self.airspeed,
            vx: self.vx,
            vy: self.vy,
            vz: self.vz,
            throttle: self.throttle,
            voltage: self.voltage,
            current_ma: self.current_ma,
            battery_pct: self.battery_pct,
            rssi_percent: self.rssi_percent,
            armed: self.armed,
            flight_mode: self.flight_mode.clone(),
            system_status: self.system_status,
            healthy: self.is_healthy(heartbeat_timeout),
            mean_temp: self.mean_temp,
            mean_rh: self.mean_rh,
            wind_speed: self.wind_speed,
            wind_direction: self.wind_direction,
            vertical_wind: self.vertical_wind,
            time_since_boot: self.time_since_boot,
        }
    }
}

/// Flat copy of the current-value fields, safe to send across tasks or
/// serialize toward a UI layer. History is intentionally excluded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub lat: f64,
    pub lon: f64,
    pub alt_amsl: f64,
    pub alt_rel: f64,
    pub fix_type: u8,
    pub satellites: u8,
    pub hdop: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub heading_deg: f64,
    pub groundspeed: f64,
    pub airspeed: f64,
    pub vx: i16,
    pub vy: i16,
    pub vz: i16,
    pub throttle: u16,
    pub voltage: f64,
    pub current_ma: f64,
    pub battery_pct: i8,
    pub rssi_percent: u8,
    pub armed: bool,
    pub flight_mode: String,
    pub system_status: u8,
    pub healthy: bool,
    pub mean_temp: f64,
    pub mean_rh: f64,
    pub wind_speed: f64,
    pub wind_direction: f64,
    pub vertical_wind: f64,
    pub time_since_boot: f64,
}

/// Shared handle over the single [`VehicleState`].
#[derive(Debug, Clone, Default)]
pub struct SharedVehicleState {
    inner: Arc<RwLock<VehicleState>>,
}

impl SharedVehicleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, VehicleState> {
        self.inner.read().expect("vehicle state lock poisoned")
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, VehicleState> {
        self.inner.write().expect("vehicle state lock poisoned")
    }

    pub fn snapshot(&self, heartbeat_timeout: Duration) -> StateSnapshot {
        self.read().snapshot(heartbeat_timeout)
    }

    /// Clear only the history buffers; current-value fields are untouched.
    pub fn clear_history(&self) {
        self.write().history.clear();
    }

    /// Reset every field to defaults (explicit user action, not part of
    /// reconnect).
    pub fn reset(&self) {
        *self.write() = VehicleState::default();
    }
}

pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: usize) -> HistorySample {
        HistorySample {
            time_since_boot: i as f64,
            alt_rel: i as f64 * 2.0,
            temp_sensors: vec![300.0 + i as f64],
            ..HistorySample::default()
        }
    }

    #[test]
    fn history_buffers_stay_aligned_and_capped() {
        let mut history = History::default();
        for i in 0..MAX_HISTORY + 100 {
            history.push(sample(i));
        }
        assert_eq!(history.len(), MAX_HISTORY);
        assert!(history.aligned());
        // Oldest 100 evicted: first surviving sample is number 100.
        assert_eq!(history.time_s.front().copied(), Some(100.0));
        assert_eq!(history.alt_rel.front().copied(), Some(200.0));
        assert_eq!(history.temp_sensors.front().cloned(), Some(vec![400.0]));
    }

    #[test]
    fn history_clear_preserves_current_values() {
        let state = SharedVehicleState::new();
        {
            let mut s = state.write();
            s.lat = 35.2;
            s.mean_temp = 300.0;
            s.history.push(sample(0));
        }
        state.clear_history();
        let s = state.read();
        assert!(s.history.is_empty());
        assert_eq!(s.lat, 35.2);
        assert_eq!(s.mean_temp, 300.0);
    }

    #[test]
    fn status_log_keeps_most_recent_200_in_order() {
        let mut state = VehicleState::default();
        for i in 0..250 {
            state.push_status(Severity::Info, format!("msg {i}"));
        }
        assert_eq!(state.status_messages.len(), MAX_STATUS_MESSAGES);
        assert_eq!(state.status_messages.front().map(|m| m.text.as_str()), Some("msg 50"));
        assert_eq!(state.status_messages.back().map(|m| m.text.as_str()), Some("msg 249"));
    }

    #[test]
    fn heartbeat_age_without_heartbeat_is_unhealthy() {
        let state = VehicleState::default();
        assert!(!state.is_healthy(Duration::from_secs(3)));
    }

    #[test]
    fn recent_heartbeat_is_healthy() {
        let mut state = VehicleState::default();
        state.last_heartbeat = Some(Instant::now());
        assert!(state.is_healthy(Duration::from_secs(3)));
    }

    #[test]
    fn snapshot_copies_current_fields() {
        let mut state = VehicleState::default();
        state.lat = 35.18;
        state.armed = true;
        state.flight_mode = "GUIDED".to_string();
        let snap = state.snapshot(Duration::from_secs(3));
        assert_eq!(snap.lat, 35.18);
        assert!(snap.armed);
        assert_eq!(snap.flight_mode, "GUIDED");
        assert!(!snap.healthy);
    }

    #[test]
    fn severity_mapping() {
        assert_eq!(Severity::from_raw(0), Severity::Emergency);
        assert_eq!(Severity::from_raw(6), Severity::Info);
        assert_eq!(Severity::from_raw(42), Severity::Unknown);
        assert_eq!(Severity::from_raw(4).name(), "WARNING");
    }
}
