#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod calibration;
pub mod config;
pub mod data;
pub mod device;
pub mod interface;
pub mod registers;

pub mod fifo;
pub mod fusion;
pub mod interrupt;
pub mod mag;
pub mod math;
pub mod session;

pub mod dmp;

// Re-export main types
pub use calibration::CalibrationStore;
pub use config::{AccelDlpf, AccelFsr, Config, GyroDlpf, GyroFsr, Orientation};
pub use data::{MpuData, TapDirection, TapEvent, WakeReason};
pub use device::Mpu9250;
pub use interface::{I2cBus, RegisterBus};
pub use interrupt::{InterruptEvent, InterruptSource, SysfsInterruptPin};
pub use math::quaternion::{Quaternion, TaitBryan};
pub use session::Session;

/// Driver errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Communication error on the sensor bus
    #[error("bus error: {0}")]
    Bus(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// GPIO interrupt line error
    #[error("interrupt line error: {0}")]
    Interrupt(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Calibration file or firmware file I/O error
    #[error("file i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid `WHO_AM_I` register value (contains the actual value read)
    #[error("unexpected WHO_AM_I value {0:#04x}")]
    InvalidDevice(u8),
    /// Invalid configuration parameter
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Magnetometer error
    #[error("magnetometer error: {0}")]
    Magnetometer(&'static str),
    /// Device was moving during calibration (variance exceeds threshold)
    #[error("device moving during calibration")]
    DeviceMoving,
    /// Calibration produced offsets outside the usable range
    #[error("calibration offsets out of range")]
    CalibrationOutOfRange,
    /// DMP firmware image is missing, malformed or failed verification
    #[error("dmp firmware error: {0}")]
    Firmware(&'static str),
    /// DMP FIFO held corrupt or unexpected data and was reset
    #[error("dmp fifo error: {0}")]
    Fifo(&'static str),
    /// Initialization timed out (device did not reset or wake as expected)
    #[error("initialization timed out")]
    InitializationTimeout,
    /// Operation requires the acquisition thread, which is not running
    #[error("acquisition thread not running")]
    NotRunning,
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
