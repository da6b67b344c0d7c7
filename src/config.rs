//! Driver configuration
//!
//! [`Config`] follows the builder pattern: start from `Config::default()` and
//! chain `with_*` methods. Validation happens inside the initialization
//! routines, which also coerce a few DMP-incompatible settings with warnings
//! rather than failing outright.

use std::path::PathBuf;

/// Standard gravity, used for accelerometer unit conversion
pub const G_TO_MS2: f64 = 9.80665;

/// Accelerometer full scale range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccelFsr {
    /// ±2 g
    #[default]
    Fsr2G,
    /// ±4 g
    Fsr4G,
    /// ±8 g
    Fsr8G,
    /// ±16 g
    Fsr16G,
}

impl AccelFsr {
    /// ACCEL_CONFIG register value (full scale select in bits 4:3)
    pub const fn register_value(self) -> u8 {
        match self {
            Self::Fsr2G => 0x00,
            Self::Fsr4G => 0x08,
            Self::Fsr8G => 0x10,
            Self::Fsr16G => 0x18,
        }
    }

    /// Conversion factor from raw counts to m/s^2
    pub fn to_ms2(self) -> f64 {
        let g = match self {
            Self::Fsr2G => 2.0,
            Self::Fsr4G => 4.0,
            Self::Fsr8G => 8.0,
            Self::Fsr16G => 16.0,
        };
        G_TO_MS2 * g / 32768.0
    }
}

/// Gyroscope full scale range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GyroFsr {
    /// ±250 deg/s
    Fsr250Dps,
    /// ±500 deg/s
    Fsr500Dps,
    /// ±1000 deg/s
    Fsr1000Dps,
    /// ±2000 deg/s
    #[default]
    Fsr2000Dps,
}

impl GyroFsr {
    /// GYRO_CONFIG register value (full scale select in bits 4:3, DLPF
    /// enabled through fchoice_b = 0)
    pub const fn register_value(self) -> u8 {
        match self {
            Self::Fsr250Dps => 0x00,
            Self::Fsr500Dps => 0x08,
            Self::Fsr1000Dps => 0x10,
            Self::Fsr2000Dps => 0x18,
        }
    }

    /// Conversion factor from raw counts to deg/s
    pub fn to_dps(self) -> f64 {
        let dps = match self {
            Self::Fsr250Dps => 250.0,
            Self::Fsr500Dps => 500.0,
            Self::Fsr1000Dps => 1000.0,
            Self::Fsr2000Dps => 2000.0,
        };
        dps / 32768.0
    }
}

/// Accelerometer digital low pass filter bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Default)]
pub enum AccelDlpf {
    /// Filter bypassed (1.13 kHz bandwidth)
    Off,
    /// 460 Hz
    Bw460,
    /// 184 Hz
    #[default]
    Bw184,
    /// 92 Hz
    Bw92,
    /// 41 Hz
    Bw41,
    /// 20 Hz
    Bw20,
    /// 10 Hz
    Bw10,
    /// 5 Hz
    Bw5,
}

impl AccelDlpf {
    /// A_DLPF_CFG field for ACCEL_CONFIG_2 (`None` means bypass via
    /// accel_fchoice_b)
    pub const fn cfg_bits(self) -> Option<u8> {
        match self {
            Self::Off => None,
            Self::Bw460 => Some(0),
            Self::Bw184 => Some(1),
            Self::Bw92 => Some(2),
            Self::Bw41 => Some(3),
            Self::Bw20 => Some(4),
            Self::Bw10 => Some(5),
            Self::Bw5 => Some(6),
        }
    }

    /// Whether this setting is wider than the 184 Hz bandwidth the DMP needs
    pub const fn wider_than_184(self) -> bool {
        matches!(self, Self::Off | Self::Bw460)
    }
}

/// Gyroscope digital low pass filter bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Default)]
pub enum GyroDlpf {
    /// Filter effectively off (3600 Hz bandwidth)
    Off,
    /// 250 Hz
    Bw250,
    /// 184 Hz
    #[default]
    Bw184,
    /// 92 Hz
    Bw92,
    /// 41 Hz
    Bw41,
    /// 20 Hz
    Bw20,
    /// 10 Hz
    Bw10,
    /// 5 Hz
    Bw5,
}

impl GyroDlpf {
    /// DLPF_CFG field for the CONFIG register
    pub const fn cfg_bits(self) -> u8 {
        match self {
            Self::Off => 7,
            Self::Bw250 => 0,
            Self::Bw184 => 1,
            Self::Bw92 => 2,
            Self::Bw41 => 3,
            Self::Bw20 => 4,
            Self::Bw10 => 5,
            Self::Bw5 => 6,
        }
    }

    /// Whether this setting is wider than the 184 Hz bandwidth the DMP needs
    pub const fn wider_than_184(self) -> bool {
        matches!(self, Self::Off | Self::Bw250)
    }
}

/// Physical mounting orientation of the sensor
///
/// The discriminants are the packed scalar form of the 3x3 signed mounting
/// matrix consumed by the DMP orientation download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    /// Component side up (default)
    #[default]
    ZUp = 136,
    /// Component side down
    ZDown = 396,
    /// X axis pointing up
    XUp = 14,
    /// X axis pointing down
    XDown = 266,
    /// Y axis pointing up
    YUp = 112,
    /// Y axis pointing down
    YDown = 336,
    /// X axis pointing forward
    XForward = 133,
    /// X axis pointing backward
    XBack = 161,
}

impl Orientation {
    /// Packed scalar representation
    pub const fn scalar(self) -> u16 {
        self as u16
    }

    /// The signed 3x3 mounting matrix, row major
    pub const fn matrix(self) -> [i8; 9] {
        match self {
            Self::ZUp => [1, 0, 0, 0, 1, 0, 0, 0, 1],
            Self::ZDown => [-1, 0, 0, 0, 1, 0, 0, 0, -1],
            Self::XUp => [0, 0, -1, 0, 1, 0, 1, 0, 0],
            Self::XDown => [0, 0, 1, 0, 1, 0, -1, 0, 0],
            Self::YUp => [1, 0, 0, 0, 0, -1, 0, 1, 0],
            Self::YDown => [1, 0, 0, 0, 0, 1, 0, -1, 0],
            Self::XForward => [0, -1, 0, 1, 0, 0, 0, 0, 1],
            Self::XBack => [0, 1, 0, -1, 0, 0, 0, 0, 1],
        }
    }
}

/// Slowest DMP output rate the firmware supports
pub const DMP_MIN_SAMPLE_RATE: u16 = 4;
/// Fastest DMP output rate; also the fixed internal sensor sample rate
pub const DMP_MAX_SAMPLE_RATE: u16 = 200;

/// Full driver configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// GPIO number wired to the MPU interrupt pin
    pub gpio_interrupt_pin: u64,
    /// I2C bus number, used for the advisory bus claim
    pub i2c_bus: u8,
    /// MPU I2C address
    pub i2c_addr: u8,
    /// Emit `warn!` logs for recoverable oddities
    pub show_warnings: bool,

    /// Accelerometer full scale range
    pub accel_fsr: AccelFsr,
    /// Gyroscope full scale range
    pub gyro_fsr: GyroFsr,
    /// Accelerometer low pass filter
    pub accel_dlpf: AccelDlpf,
    /// Gyroscope low pass filter
    pub gyro_dlpf: GyroDlpf,
    /// Bring up the AK8963 magnetometer
    pub enable_magnetometer: bool,

    /// DMP output rate in Hz; must divide 200 and be at least 4
    pub dmp_sample_rate: u16,
    /// Also stream raw accel/gyro samples through the DMP FIFO
    pub dmp_fetch_accel_gyro: bool,
    /// Let the DMP continuously estimate gyro bias
    pub dmp_auto_calibrate_gyro: bool,
    /// Mounting orientation
    pub orientation: Orientation,
    /// Complementary filter time constant for heading fusion, seconds
    pub compass_time_constant: f64,
    /// SCHED_FIFO priority for the acquisition thread; `None` picks
    /// max-priority minus one
    pub thread_priority: Option<i32>,
    /// Read the magnetometer after the data callback rather than before
    pub read_mag_after_callback: bool,
    /// Read the magnetometer every Nth DMP interrupt
    pub mag_sample_rate_div: u16,
    /// Tap detection threshold (DMP units)
    pub tap_threshold: u16,

    /// Where calibration files live
    pub calibration_dir: PathBuf,
    /// DMP firmware image path
    pub firmware_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gpio_interrupt_pin: 117,
            i2c_bus: 2,
            i2c_addr: crate::registers::MPU_I2C_ADDR,
            show_warnings: false,
            accel_fsr: AccelFsr::Fsr2G,
            gyro_fsr: GyroFsr::Fsr2000Dps,
            accel_dlpf: AccelDlpf::Bw184,
            gyro_dlpf: GyroDlpf::Bw184,
            enable_magnetometer: false,
            dmp_sample_rate: 100,
            dmp_fetch_accel_gyro: false,
            dmp_auto_calibrate_gyro: false,
            orientation: Orientation::ZUp,
            compass_time_constant: 20.0,
            thread_priority: None,
            read_mag_after_callback: true,
            mag_sample_rate_div: 4,
            tap_threshold: 150,
            calibration_dir: PathBuf::from("/var/lib/mpu9250"),
            firmware_path: PathBuf::from("/lib/firmware/mpu9250_dmp_firmware.bin"),
        }
    }
}

impl Config {
    /// Set the interrupt GPIO number
    pub fn with_gpio_interrupt_pin(mut self, pin: u64) -> Self {
        self.gpio_interrupt_pin = pin;
        self
    }

    /// Set the I2C bus number used for the advisory claim
    pub fn with_i2c_bus(mut self, bus: u8) -> Self {
        self.i2c_bus = bus;
        self
    }

    /// Set the accelerometer full scale range
    pub fn with_accel_fsr(mut self, fsr: AccelFsr) -> Self {
        self.accel_fsr = fsr;
        self
    }

    /// Set the gyroscope full scale range
    pub fn with_gyro_fsr(mut self, fsr: GyroFsr) -> Self {
        self.gyro_fsr = fsr;
        self
    }

    /// Set the accelerometer low pass filter
    pub fn with_accel_dlpf(mut self, dlpf: AccelDlpf) -> Self {
        self.accel_dlpf = dlpf;
        self
    }

    /// Set the gyroscope low pass filter
    pub fn with_gyro_dlpf(mut self, dlpf: GyroDlpf) -> Self {
        self.gyro_dlpf = dlpf;
        self
    }

    /// Enable or disable the magnetometer
    pub fn with_magnetometer(mut self, enable: bool) -> Self {
        self.enable_magnetometer = enable;
        self
    }

    /// Set the DMP output rate in Hz
    pub fn with_dmp_sample_rate(mut self, rate: u16) -> Self {
        self.dmp_sample_rate = rate;
        self
    }

    /// Also stream raw accel/gyro samples through the FIFO
    pub fn with_fetch_accel_gyro(mut self, enable: bool) -> Self {
        self.dmp_fetch_accel_gyro = enable;
        self
    }

    /// Let the DMP auto-calibrate the gyro bias
    pub fn with_auto_calibrate_gyro(mut self, enable: bool) -> Self {
        self.dmp_auto_calibrate_gyro = enable;
        self
    }

    /// Set the mounting orientation
    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Set the heading fusion time constant in seconds
    pub fn with_compass_time_constant(mut self, seconds: f64) -> Self {
        self.compass_time_constant = seconds;
        self
    }

    /// Set the acquisition thread SCHED_FIFO priority
    pub fn with_thread_priority(mut self, priority: i32) -> Self {
        self.thread_priority = Some(priority);
        self
    }

    /// Enable recoverable-oddity warnings
    pub fn with_warnings(mut self, enable: bool) -> Self {
        self.show_warnings = enable;
        self
    }

    /// Set the calibration file directory
    pub fn with_calibration_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.calibration_dir = dir.into();
        self
    }

    /// Set the DMP firmware image path
    pub fn with_firmware_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.firmware_path = path.into();
        self
    }
}
