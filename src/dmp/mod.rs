//! Digital Motion Processor programming
//!
//! The DMP is configured by poking byte programs into firmware memory at
//! known offsets. The programs and offsets come from InvenSense's motion
//! driver and are not otherwise documented; they are kept here verbatim as
//! named constants.

pub mod firmware;

use crate::device::Mpu9250;
use crate::interface::RegisterBus;
use crate::{Error, Result};

/// Fixed internal rate the DMP firmware runs at
pub const DMP_SAMPLE_RATE: u16 = 200;
/// Gyro integration scale factor baked into the firmware
pub const GYRO_SF: i32 = 46_850_825;

// Feature mask bits
pub(crate) const FEATURE_TAP: u16 = 0x001;
pub(crate) const FEATURE_ANDROID_ORIENT: u16 = 0x002;
pub(crate) const FEATURE_6X_LP_QUAT: u16 = 0x010;
pub(crate) const FEATURE_GYRO_CAL: u16 = 0x020;
pub(crate) const FEATURE_SEND_RAW_ACCEL: u16 = 0x040;
pub(crate) const FEATURE_SEND_RAW_GYRO: u16 = 0x080;
pub(crate) const FEATURE_SEND_CAL_GYRO: u16 = 0x100;
pub(crate) const FEATURE_SEND_ANY_GYRO: u16 = FEATURE_SEND_RAW_GYRO | FEATURE_SEND_CAL_GYRO;

// Firmware memory offsets (bank << 8 | address)
const CFG_6: u16 = 2753;
const CFG_8: u16 = 2718;
const CFG_15: u16 = 2727;
const CFG_20: u16 = 2224;
const CFG_27: u16 = 2742;
const CFG_LP_QUAT: u16 = 2712;
const CFG_FIFO_ON_EVENT: u16 = 2690;
const CFG_MOTION_BIAS: u16 = 1208;
const CFG_GYRO_RAW_DATA: u16 = 2722;
const CFG_ANDROID_ORIENT_INT: u16 = 1853;
const FCFG_1: u16 = 1062;
const FCFG_2: u16 = 1066;
const FCFG_3: u16 = 1110;
const FCFG_7: u16 = 1073;
const D_0_22: u16 = 534;
const D_0_104: u16 = 104;
const D_1_36: u16 = 292;
const D_1_40: u16 = 296;
const D_1_44: u16 = 300;
const D_1_72: u16 = 328;
const D_1_79: u16 = 335;
const D_1_88: u16 = 344;
const D_1_90: u16 = 346;
const D_1_92: u16 = 348;
const D_1_218: u16 = 474;
const DMP_TAP_THX: u16 = 268;
const DMP_TAP_THY: u16 = 272;
const DMP_TAP_THZ: u16 = 276;
const DMP_TAPW_MIN: u16 = 278;

const TAP_X: u8 = 0x01;
const TAP_Y: u8 = 0x02;
const TAP_Z: u8 = 0x04;
const TAP_XYZ: u8 = 0x07;

/// FIFO bytes per packet for a given feature mask
pub(crate) fn packet_length(mask: u16) -> usize {
    let mut len = 0;
    if mask & FEATURE_SEND_RAW_ACCEL != 0 {
        len += 6;
    }
    if mask & FEATURE_SEND_ANY_GYRO != 0 {
        len += 6;
    }
    if mask & FEATURE_6X_LP_QUAT != 0 {
        len += 16;
    }
    if mask & (FEATURE_TAP | FEATURE_ANDROID_ORIENT) != 0 {
        len += 4;
    }
    len
}

impl<B: RegisterBus> Mpu9250<B> {
    /// Push the mounting orientation into the DMP (chip-to-body axis map
    /// and signs, derived from the packed scalar form)
    pub fn dmp_set_orientation(&mut self, orient: u16) -> Result<()> {
        const GYRO_AXES: [u8; 3] = [0x4c, 0xcd, 0x6c];
        const ACCEL_AXES: [u8; 3] = [0x0c, 0xc9, 0x2c];
        const GYRO_SIGN: [u8; 3] = [0x36, 0x56, 0x76];
        const ACCEL_SIGN: [u8; 3] = [0x26, 0x46, 0x66];

        let gyro_regs = [
            GYRO_AXES[(orient & 3) as usize],
            GYRO_AXES[((orient >> 3) & 3) as usize],
            GYRO_AXES[((orient >> 6) & 3) as usize],
        ];
        let accel_regs = [
            ACCEL_AXES[(orient & 3) as usize],
            ACCEL_AXES[((orient >> 3) & 3) as usize],
            ACCEL_AXES[((orient >> 6) & 3) as usize],
        ];
        self.write_mem(FCFG_1, &gyro_regs)?;
        self.write_mem(FCFG_2, &accel_regs)?;

        let mut gyro_sign = GYRO_SIGN;
        let mut accel_sign = ACCEL_SIGN;
        if orient & 0x004 != 0 {
            gyro_sign[0] |= 1;
            accel_sign[0] |= 1;
        }
        if orient & 0x020 != 0 {
            gyro_sign[1] |= 1;
            accel_sign[1] |= 1;
        }
        if orient & 0x100 != 0 {
            gyro_sign[2] |= 1;
            accel_sign[2] |= 1;
        }
        self.write_mem(FCFG_3, &gyro_sign)?;
        self.write_mem(FCFG_7, &accel_sign)
    }

    /// Set the DMP FIFO output rate
    pub fn dmp_set_fifo_rate(&mut self, rate: u16) -> Result<()> {
        const REGS_END: [u8; 12] = [
            0xfe, 0xf2, 0xab, 0xc4, 0xaa, 0xf1, 0xdf, 0xdf, 0xbb, 0xaf, 0xdf, 0xdf,
        ];
        if rate == 0 || rate > DMP_SAMPLE_RATE {
            return Err(Error::InvalidConfig("dmp rate must be 1..=200 Hz"));
        }
        let div = DMP_SAMPLE_RATE / rate - 1;
        self.write_mem(D_0_22, &div.to_be_bytes())?;
        self.write_mem(CFG_6, &REGS_END)
    }

    /// Turn the automatic gyro bias estimation on or off
    fn dmp_enable_gyro_cal(&mut self, enable: bool) -> Result<()> {
        let regs: [u8; 9] = if enable {
            [0xb8, 0xaa, 0xb3, 0x8d, 0xb4, 0x98, 0x0d, 0x35, 0x5d]
        } else {
            [0xb8, 0xaa, 0xaa, 0xaa, 0xb0, 0x88, 0xc3, 0xc5, 0xc7]
        };
        self.write_mem(CFG_MOTION_BIAS, &regs)
    }

    /// Turn the 6-axis (accel + gyro) quaternion output on or off
    fn dmp_enable_6x_lp_quat(&mut self, enable: bool) -> Result<()> {
        let regs: [u8; 4] = if enable {
            [0x20, 0x28, 0x30, 0x38]
        } else {
            [0xa3; 4]
        };
        self.write_mem(CFG_8, &regs)
    }

    /// Program the DMP to raise an interrupt every sample rather than only
    /// on gestures
    pub fn dmp_set_interrupt_mode_continuous(&mut self) -> Result<()> {
        const REGS_CONTINUOUS: [u8; 11] = [
            0xd8, 0xb1, 0xb9, 0xf3, 0x8b, 0xa3, 0x91, 0xb6, 0x09, 0xb4, 0xd9,
        ];
        self.write_mem(CFG_FIFO_ON_EVENT, &REGS_CONTINUOUS)
    }

    fn dmp_set_tap_thresh(&mut self, thresh: u16) -> Result<()> {
        if thresh > 1600 {
            return Err(Error::InvalidConfig("tap threshold above 1600 mg/ms"));
        }
        let scaled = f64::from(thresh) / f64::from(DMP_SAMPLE_RATE);
        // counts per g at the active FSR, and 0.75x for the second threshold
        let (counts, counts_2) = match self.config.accel_fsr {
            crate::config::AccelFsr::Fsr2G => (16384.0, 12288.0),
            crate::config::AccelFsr::Fsr4G => (8192.0, 6144.0),
            crate::config::AccelFsr::Fsr8G => (4096.0, 3072.0),
            crate::config::AccelFsr::Fsr16G => (2048.0, 1536.0),
        };
        let dmp_thresh = ((scaled * counts) as u16).to_be_bytes();
        let dmp_thresh_2 = ((scaled * counts_2) as u16).to_be_bytes();

        self.write_mem(DMP_TAP_THX, &dmp_thresh)?;
        self.write_mem(D_1_36, &dmp_thresh_2)?;
        self.write_mem(DMP_TAP_THY, &dmp_thresh)?;
        self.write_mem(D_1_40, &dmp_thresh_2)?;
        self.write_mem(DMP_TAP_THZ, &dmp_thresh)?;
        self.write_mem(D_1_44, &dmp_thresh_2)
    }

    fn dmp_set_tap_axes(&mut self, axes: u8) -> Result<()> {
        let mut tmp = 0u8;
        if axes & TAP_X != 0 {
            tmp |= 0x30;
        }
        if axes & TAP_Y != 0 {
            tmp |= 0x0c;
        }
        if axes & TAP_Z != 0 {
            tmp |= 0x03;
        }
        self.write_mem(D_1_72, &[tmp])
    }

    fn dmp_set_tap_count(&mut self, min_taps: u8) -> Result<()> {
        let tmp = min_taps.clamp(1, 4) - 1;
        self.write_mem(D_1_79, &[tmp])
    }

    fn dmp_set_tap_time(&mut self, ms: u16) -> Result<()> {
        let dmp_time = ms / (1000 / DMP_SAMPLE_RATE);
        self.write_mem(DMP_TAPW_MIN, &dmp_time.to_be_bytes())
    }

    fn dmp_set_tap_time_multi(&mut self, ms: u16) -> Result<()> {
        let dmp_time = ms / (1000 / DMP_SAMPLE_RATE);
        self.write_mem(D_1_218, &dmp_time.to_be_bytes())
    }

    fn dmp_set_shake_reject_thresh(&mut self, thresh_dps: u16) -> Result<()> {
        let scaled = GYRO_SF / 1000 * i32::from(thresh_dps);
        self.write_mem(D_1_92, &scaled.to_be_bytes())
    }

    fn dmp_set_shake_reject_time(&mut self, ms: u16) -> Result<()> {
        let t = ms / (1000 / DMP_SAMPLE_RATE);
        self.write_mem(D_1_90, &t.to_be_bytes())
    }

    fn dmp_set_shake_reject_timeout(&mut self, ms: u16) -> Result<()> {
        let t = ms / (1000 / DMP_SAMPLE_RATE);
        self.write_mem(D_1_88, &t.to_be_bytes())
    }

    /// Enable DMP features per the mask and reset the FIFO
    ///
    /// Returns the resulting FIFO packet length in bytes.
    pub fn dmp_enable_features(&mut self, mask: u16) -> Result<usize> {
        // integration scale factor
        self.write_mem(D_0_104, &GYRO_SF.to_be_bytes())?;

        // which sensor data flows to the FIFO; 0xa3 is the no-op filler
        let mut tmp = [0xa3u8; 10];
        if mask & FEATURE_SEND_RAW_ACCEL != 0 {
            tmp[1] = 0xc0;
            tmp[2] = 0xc8;
            tmp[3] = 0xc2;
        }
        if mask & FEATURE_SEND_ANY_GYRO != 0 {
            tmp[4] = 0xc4;
            tmp[5] = 0xcc;
            tmp[6] = 0xc6;
        }
        self.write_mem(CFG_15, &tmp)?;

        // gesture data on or off
        let gesture = if mask & (FEATURE_TAP | FEATURE_ANDROID_ORIENT) != 0 {
            0x20
        } else {
            0xd8
        };
        self.write_mem(CFG_27, &[gesture])?;

        self.dmp_enable_gyro_cal(mask & FEATURE_GYRO_CAL != 0)?;

        if mask & FEATURE_SEND_ANY_GYRO != 0 {
            let regs: [u8; 4] = if mask & FEATURE_SEND_CAL_GYRO != 0 {
                [0xb2, 0x8b, 0xb6, 0x9b]
            } else {
                [0xc0, 0x80, 0xc2, 0x90]
            };
            self.write_mem(CFG_GYRO_RAW_DATA, &regs)?;
        }

        if mask & FEATURE_TAP != 0 {
            self.write_mem(CFG_20, &[0xf8])?;
            let tap_threshold = self.config.tap_threshold;
            self.dmp_set_tap_thresh(tap_threshold)?;
            self.dmp_set_tap_axes(TAP_XYZ)?;
            self.dmp_set_tap_count(1)?;
            self.dmp_set_tap_time(100)?;
            self.dmp_set_tap_time_multi(500)?;
            // shake rejection suppresses taps while the system moves; set
            // the threshold high so normal motion does not mask real taps
            self.dmp_set_shake_reject_thresh(600)?;
            self.dmp_set_shake_reject_time(40)?;
            self.dmp_set_shake_reject_timeout(10)?;
        } else {
            self.write_mem(CFG_20, &[0xd8])?;
        }

        let orient_int = if mask & FEATURE_ANDROID_ORIENT != 0 {
            0xd9
        } else {
            0xd8
        };
        self.write_mem(CFG_ANDROID_ORIENT_INT, &[orient_int])?;

        // gyro-only quaternion stays off; the no-op filler is 0x8b
        self.write_mem(CFG_LP_QUAT, &[0x8b; 4])?;
        self.dmp_enable_6x_lp_quat(mask & FEATURE_6X_LP_QUAT != 0)?;

        self.reset_fifo()?;
        Ok(packet_length(mask))
    }
}
