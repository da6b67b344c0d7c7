//! Published sensor data and consumer-facing event types

use crate::math::quaternion::{Quaternion, TaitBryan};

/// Why a blocking wait returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Fresh DMP data was published
    DataReady,
    /// A tap gesture fired
    TapDetected,
    /// The driver is shutting down; no more data will arrive
    Shutdown,
}

/// Tap direction as reported by the DMP gesture engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapDirection {
    /// Positive X
    XUp,
    /// Negative X
    XDown,
    /// Positive Y
    YUp,
    /// Negative Y
    YDown,
    /// Positive Z
    ZUp,
    /// Negative Z
    ZDown,
}

impl TapDirection {
    /// Decode the 3-bit direction field from the gesture bytes
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::XUp),
            2 => Some(Self::XDown),
            3 => Some(Self::YUp),
            4 => Some(Self::YDown),
            5 => Some(Self::ZUp),
            6 => Some(Self::ZDown),
            _ => None,
        }
    }
}

/// A detected tap gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapEvent {
    /// Which face was tapped
    pub direction: Option<TapDirection>,
    /// Raw 3-bit direction value from the gesture engine
    pub raw_direction: u8,
}

/// Snapshot of everything the driver knows about the sensor state
///
/// In DMP mode the acquisition thread refreshes this once per interrupt; in
/// polling mode the individual `read_*` calls fill in their slices of it.
#[derive(Debug, Clone, Default)]
pub struct MpuData {
    /// Accelerometer, m/s^2
    pub accel: [f64; 3],
    /// Gyroscope, deg/s
    pub gyro: [f64; 3],
    /// Magnetometer with user calibration applied, µT
    pub mag: [f64; 3],
    /// Die temperature, deg C
    pub temp: f64,

    /// Raw accelerometer counts
    pub raw_accel: [i16; 3],
    /// Raw gyroscope counts
    pub raw_gyro: [i16; 3],

    /// Conversion factor raw accel counts -> m/s^2 for the active FSR
    pub accel_to_ms2: f64,
    /// Conversion factor raw gyro counts -> deg/s for the active FSR
    pub gyro_to_degs: f64,

    /// DMP 6-axis quaternion
    pub dmp_quat: Quaternion,
    /// DMP quaternion as Tait-Bryan angles
    pub dmp_tait_bryan: TaitBryan,

    /// Magnetometer-fused orientation quaternion (DMP mode with
    /// magnetometer enabled)
    pub fused_quat: Quaternion,
    /// Fused orientation as Tait-Bryan angles
    pub fused_tait_bryan: TaitBryan,
    /// Filtered compass heading, radians, wrapped to (-pi, pi]
    pub compass_heading: f64,
    /// Instantaneous tilt-compensated compass heading, radians
    pub compass_heading_raw: f64,

    /// Last tap gesture seen, if any
    pub last_tap: Option<TapEvent>,
}
