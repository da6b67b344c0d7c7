//! MPU-9250 and AK8963 register map
//!
//! Flat `const` register addresses and bit masks for the MPU-9250 motion
//! processor and its on-package AK8963 magnetometer (reached over I2C bypass
//! at its own bus address).

#![allow(missing_docs)]

/// Default MPU-9250 I2C address (AD0 low)
pub const MPU_I2C_ADDR: u8 = 0x68;
/// Alternative MPU-9250 I2C address (AD0 high)
pub const MPU_I2C_ADDR_ALT: u8 = 0x69;
/// AK8963 magnetometer I2C address (fixed)
pub const AK8963_I2C_ADDR: u8 = 0x0C;

/// Gyro offset cancellation registers (H/L pairs for X, Y, Z follow)
pub const XG_OFFSET_H: u8 = 0x13;

pub const SMPLRT_DIV: u8 = 0x19;
pub const CONFIG: u8 = 0x1A;
pub const GYRO_CONFIG: u8 = 0x1B;
pub const ACCEL_CONFIG: u8 = 0x1C;
pub const ACCEL_CONFIG_2: u8 = 0x1D;
pub const FIFO_EN: u8 = 0x23;
pub const I2C_MST_CTRL: u8 = 0x24;
pub const INT_PIN_CFG: u8 = 0x37;
pub const INT_ENABLE: u8 = 0x38;
pub const ACCEL_XOUT_H: u8 = 0x3B;
pub const TEMP_OUT_H: u8 = 0x41;
pub const GYRO_XOUT_H: u8 = 0x43;
pub const USER_CTRL: u8 = 0x6A;
pub const PWR_MGMT_1: u8 = 0x6B;
pub const PWR_MGMT_2: u8 = 0x6C;

// DMP memory window: select bank/address, then burst through MEM_R_W
pub const BANK_SEL: u8 = 0x6D;
pub const MEM_R_W: u8 = 0x6F;
pub const PRGM_START_H: u8 = 0x70;

pub const FIFO_COUNTH: u8 = 0x72;
pub const FIFO_R_W: u8 = 0x74;
pub const WHO_AM_I: u8 = 0x75;

// PWR_MGMT_1 bits
pub const BIT_H_RESET: u8 = 0x80;
pub const BIT_SLEEP: u8 = 0x40;

// USER_CTRL bits
pub const BIT_DMP_EN: u8 = 0x80;
pub const BIT_FIFO_EN: u8 = 0x40;
pub const BIT_I2C_MST_EN: u8 = 0x20;
pub const BIT_DMP_RST: u8 = 0x08;
pub const BIT_FIFO_RST: u8 = 0x04;

// INT_PIN_CFG bits
pub const BIT_ACTL_ACTIVE_LOW: u8 = 0x80;
pub const BIT_LATCH_INT_EN: u8 = 0x20;
pub const BIT_INT_ANYRD_CLEAR: u8 = 0x10;
pub const BIT_BYPASS_EN: u8 = 0x02;

// INT_ENABLE bits
pub const BIT_DMP_INT_EN: u8 = 0x02;

// FIFO_EN bits (gyro axes, used during offset capture)
pub const FIFO_GYRO_X_EN: u8 = 0x40;
pub const FIFO_GYRO_Y_EN: u8 = 0x20;
pub const FIFO_GYRO_Z_EN: u8 = 0x10;

// ACCEL_CONFIG_2: partitions 1024 bytes of the 4 kB FIFO to the DMP
pub const BIT_FIFO_SIZE_1024: u8 = 0x40;

// AK8963 registers
pub const AK8963_ST1: u8 = 0x02;
pub const AK8963_XOUT_L: u8 = 0x03;
pub const AK8963_ST2: u8 = 0x09;
pub const AK8963_CNTL: u8 = 0x0A;
pub const AK8963_ASAX: u8 = 0x10;

// AK8963 bits and modes
pub const AK8963_DATA_READY: u8 = 0x01;
/// Magnetic sensor overflow (saturation) flag in ST2
pub const AK8963_HOFL: u8 = 0x08;
pub const AK8963_POWER_DOWN: u8 = 0x00;
pub const AK8963_FUSE_ROM_ACCESS: u8 = 0x0F;
/// Continuous measurement mode 2 (100 Hz)
pub const AK8963_CONT_MODE_2: u8 = 0x06;
/// 16-bit output resolution
pub const AK8963_16BIT: u8 = 0x10;

/// µT per LSB in 16-bit mode (4912 µT over ±32760 counts)
pub const MAG_RAW_TO_UT: f64 = 0.15;

/// Temperature conversion: degC = TEMP_OFFSET_DEGC + adc / TEMP_SENSITIVITY
pub const TEMP_OFFSET_DEGC: f64 = 21.0;
pub const TEMP_SENSITIVITY: f64 = 333.87;

/// Values WHO_AM_I may legitimately report across MPU-9250 silicon revisions
/// and close siblings (MPU-6500, MPU-9255)
pub const WHO_AM_I_WHITELIST: [u8; 5] = [0x68, 0x69, 0x70, 0x71, 0x75];
