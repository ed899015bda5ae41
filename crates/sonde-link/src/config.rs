use std::time::Duration;

/// Runtime configuration for a [`crate::MavClient`].
///
/// Defaults match the conventional ground-station identity (sysid 255,
/// compid 190, distinct from QGC's 0) and the cadences the CopterSonde
/// radio link is tuned for.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub gcs_system_id: u8,
    pub gcs_component_id: u8,
    /// Telemetry stream rate requested from the autopilot, in Hz.
    pub stream_rate_hz: u16,
    /// Heartbeat silence after which the link counts as unhealthy.
    pub heartbeat_timeout: Duration,
    /// Interval between outbound GCS heartbeats.
    pub gcs_heartbeat_interval: Duration,
    /// Interval between snapshot emissions on the data-updated topic.
    pub data_emit_interval: Duration,
    /// Interval at which stream requests are re-issued once streaming
    /// has been requested. Survives autopilot reboots and lost requests.
    pub stream_request_interval: Duration,
    /// Silence window after which a bulk parameter download completes
    /// with whatever arrived.
    pub param_silence_timeout: Duration,
    /// Bound on how long `stop()` waits for the IO task to exit.
    pub stop_timeout: Duration,
    /// RC channel the vehicle-side mission script watches for the
    /// AutoVP trigger pulse.
    pub autovp_channel: u8,
    /// Parameter carrying the AutoVP target altitude.
    pub autovp_altitude_param: String,
    /// CRC_EXTRA seed for the vendor sensor message (id 227), taken from
    /// the external message definition. When unset, frames for that id
    /// are accepted on structural length alone.
    pub cass_extra_crc: Option<u8>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gcs_system_id: 255,
            gcs_component_id: 190,
            stream_rate_hz: 10,
            heartbeat_timeout: Duration::from_secs(3),
            gcs_heartbeat_interval: Duration::from_secs(1),
            data_emit_interval: Duration::from_millis(100),
            stream_request_interval: Duration::from_secs(5),
            param_silence_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            autovp_channel: 7,
            autovp_altitude_param: "USR_AUTOVP_ALT".to_string(),
            cass_extra_crc: None,
        }
    }
}
