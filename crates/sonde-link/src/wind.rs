//! Wind estimation from vehicle attitude.
//!
//! The CopterSonde airframe weathervanes into the wind, so yaw gives the
//! wind direction and the pitch needed to hold position maps to wind
//! speed through a calibrated quadratic regression.

use serde::{Deserialize, Serialize};

/// Default regression coefficients from CopterSonde calibration flights.
pub const DEFAULT_WS_A: f64 = 37.1;
pub const DEFAULT_WS_B: f64 = 3.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindEstimator {
    pub ws_a: f64,
    pub ws_b: f64,
}

impl Default for WindEstimator {
    fn default() -> Self {
        Self {
            ws_a: DEFAULT_WS_A,
            ws_b: DEFAULT_WS_B,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindEstimate {
    /// Horizontal wind speed, m/s.
    pub speed: f64,
    /// Wind direction, radians (vehicle yaw).
    pub direction: f64,
    /// Vertical wind, m/s, positive = updraft.
    pub vertical: f64,
}

impl WindEstimator {
    pub fn new(ws_a: f64, ws_b: f64) -> Self {
        Self { ws_a, ws_b }
    }

    /// Horizontal wind speed for a pitch angle in radians:
    /// `max(0, a * tan|pitch| + b * sqrt(tan|pitch|))`.
    pub fn horizontal(&self, pitch_rad: f64) -> f64 {
        let tan_p = pitch_rad.abs().tan();
        if tan_p > 0.0 {
            (self.ws_a * tan_p + self.ws_b * tan_p.sqrt()).max(0.0)
        } else {
            0.0
        }
    }

    /// Full estimate from pitch/yaw (radians) and the NED down-velocity
    /// in cm/s as received on the wire.
    pub fn estimate(&self, pitch_rad: f64, yaw_rad: f64, vz_cms: i16) -> WindEstimate {
        WindEstimate {
            speed: self.horizontal(pitch_rad),
            direction: yaw_rad,
            vertical: -f64::from(vz_cms) / 100.0,
        }
    }
}

/// Magnus-formula dew point approximation, °C in, °C out.
///
/// Degenerate inputs (no humidity yet, or implausibly cold air) fall back
/// to `temp_c - 10` so plots stay bounded before the sensors settle.
pub fn dew_point(temp_c: f64, rh: f64) -> f64 {
    if rh <= 0.0 || temp_c < -50.0 {
        return temp_c - 10.0;
    }
    const A: f64 = 17.625;
    const B: f64 = 243.04;
    let alpha = (rh / 100.0).ln() + A * temp_c / (B + temp_c);
    B * alpha / (A - alpha)
}
