//! Codec for the vendor atmospheric-sensor message (CASS_SENSOR_RAW,
//! MAVLink message id 227).
//!
//! The message multiplexes several payloads behind a data-type
//! discriminator; only the temperature and humidity banks feed the
//! profiling pipeline. Wire layout (MAVLink field ordering, little
//! endian): `time_boot_ms: u32`, `values: [f32; 4]`, `app_datatype: u8`.
//! MAVLink v2 truncates trailing zero bytes, so short payloads decode by
//! zero extension.

pub const CASS_SENSOR_RAW_ID: u32 = 227;

/// Serialized payload length before v2 truncation.
pub const CASS_PAYLOAD_LEN: usize = 21;

/// Number of sensor channels carried per frame.
pub const CASS_CHANNELS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CassDataType {
    /// iMet bead thermistor temperatures, Kelvin.
    Temperature,
    /// HYT humidity probes, percent.
    Humidity,
    /// iMet raw resistance; not consumed by the ground station.
    Resistance,
    /// Vehicle-computed wind; superseded by the pitch-based estimate.
    Wind,
    Other(u8),
}

impl CassDataType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => CassDataType::Temperature,
            1 => CassDataType::Humidity,
            2 => CassDataType::Resistance,
            3 => CassDataType::Wind,
            other => CassDataType::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CassSensorRaw {
    pub time_boot_ms: u32,
    pub values: [f32; CASS_CHANNELS],
    pub app_datatype: u8,
}

impl CassSensorRaw {
    pub fn data_type(&self) -> CassDataType {
        CassDataType::from_raw(self.app_datatype)
    }

    /// Decode from a (possibly v2-truncated) payload.
    pub fn decode(payload: &[u8]) -> Self {
        let mut buf = [0u8; CASS_PAYLOAD_LEN];
        let n = payload.len().min(CASS_PAYLOAD_LEN);
        buf[..n].copy_from_slice(&payload[..n]);

        let time_boot_ms = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let mut values = [0.0f32; CASS_CHANNELS];
        for (i, value) in values.iter_mut().enumerate() {
            let at = 4 + i * 4;
            *value = f32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        }
        let app_datatype = buf[20];

        Self {
            time_boot_ms,
            values,
            app_datatype,
        }
    }

    /// Encode to the full (untruncated) payload.
    pub fn encode(&self) -> [u8; CASS_PAYLOAD_LEN] {
        let mut buf = [0u8; CASS_PAYLOAD_LEN];
        buf[..4].copy_from_slice(&self.time_boot_ms.to_le_bytes());
        for (i, value) in self.values.iter().enumerate() {
            let at = 4 + i * 4;
            buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
        }
        buf[20] = self.app_datatype;
        buf
    }
}

/// Drop sensor-not-connected channels (zero or negative readings) before
/// averaging.
pub fn valid_channels(values: &[f32]) -> Vec<f64> {
    values
        .iter()
        .filter(|v| **v > 0.0)
        .map(|v| f64::from(*v))
        .collect()
}
