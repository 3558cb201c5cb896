//! Position and orientation messages
//!
//! Produced by GNSS/IMU I/O modules, consumed by guidance and section
//! control. Wire parsing (NMEA sentences, PGN frames) happens in the
//! transport modules; these are the already-decoded values.

use furrow_core::TimestampMetadata;
use serde::{Deserialize, Serialize};

/// GNSS fix quality, worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixQuality {
    NoFix,
    Gps,
    Dgps,
    RtkFloat,
    RtkFixed,
}

/// A single position fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub stamp: TimestampMetadata,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
    /// Ground speed in meters per second.
    pub speed_mps: f64,
    /// True heading in degrees, 0..360.
    pub heading_deg: f64,
    pub quality: FixQuality,
    /// Horizontal dilution of precision.
    pub hdop: f32,
    pub satellites: u8,
}

impl PositionFix {
    pub fn new(latitude_deg: f64, longitude_deg: f64, stamp: TimestampMetadata) -> Self {
        Self {
            stamp,
            latitude_deg,
            longitude_deg,
            altitude_m: 0.0,
            speed_mps: 0.0,
            heading_deg: 0.0,
            quality: FixQuality::NoFix,
            hdop: 99.9,
            satellites: 0,
        }
    }

    /// Whether any position solution is available.
    pub fn has_fix(&self) -> bool {
        self.quality != FixQuality::NoFix
    }

    /// Centimeter-level solution suitable for guidance.
    pub fn is_rtk(&self) -> bool {
        matches!(self.quality, FixQuality::RtkFloat | FixQuality::RtkFixed)
    }

    pub fn speed_kph(&self) -> f64 {
        self.speed_mps * 3.6
    }
}

/// Vehicle attitude sample from the IMU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrientationSample {
    pub stamp: TimestampMetadata,
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
    /// Yaw rate in degrees per second.
    pub yaw_rate_dps: f64,
}

impl OrientationSample {
    pub fn new(roll_deg: f64, pitch_deg: f64, yaw_deg: f64, stamp: TimestampMetadata) -> Self {
        Self {
            stamp,
            roll_deg,
            pitch_deg,
            yaw_deg,
            yaw_rate_dps: 0.0,
        }
    }

    /// Lateral antenna offset on sloped ground, for terrain
    /// compensation: `height * sin(roll)`.
    pub fn roll_offset_m(&self, antenna_height_m: f64) -> f64 {
        antenna_height_m * self.roll_deg.to_radians().sin()
    }
}
