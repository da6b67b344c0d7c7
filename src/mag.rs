//! AK8963 magnetometer handling
//!
//! The magnetometer is its own device behind the MPU, reached at its own bus
//! address while I2C bypass is on. It self-samples at 100 Hz; reads that find
//! no fresh data simply leave the previous values in place.
//!
//! Axis note: the AK8963 coordinate frame differs from the accel/gyro frame,
//! so X and Y swap and Z negates to line everything up.

use std::thread::sleep;
use std::time::Duration;

use log::warn;

use crate::data::MpuData;
use crate::device::Mpu9250;
use crate::interface::RegisterBus;
use crate::registers::*;
use crate::{Error, Result};

impl<B: RegisterBus> Mpu9250<B> {
    /// Bring up the magnetometer for continuous 16-bit 100 Hz sampling
    ///
    /// Reads the factory sensitivity values out of fuse ROM first. Leaves
    /// bypass mode on so later reads can reach the device directly.
    pub fn init_magnetometer(&mut self) -> Result<()> {
        self.set_bypass(true)?;
        self.bus.set_device_address(AK8963_I2C_ADDR);

        self.bus.write_register(AK8963_CNTL, AK8963_POWER_DOWN)?;
        sleep(Duration::from_millis(1));
        self.bus
            .write_register(AK8963_CNTL, AK8963_FUSE_ROM_ACCESS)?;
        sleep(Duration::from_millis(1));

        let mut raw = [0u8; 3];
        if let Err(e) = self.bus.read_registers(AK8963_ASAX, &mut raw) {
            self.bus.set_device_address(self.config.i2c_addr);
            self.set_bypass(false)?;
            return Err(e);
        }
        for i in 0..3 {
            self.mag_factory_adjust[i] = (f64::from(raw[i]) - 128.0) / 256.0 + 1.0;
        }

        self.bus.write_register(AK8963_CNTL, AK8963_POWER_DOWN)?;
        sleep(Duration::from_micros(100));
        self.bus
            .write_register(AK8963_CNTL, AK8963_16BIT | AK8963_CONT_MODE_2)?;
        sleep(Duration::from_micros(100));

        self.bus.set_device_address(self.config.i2c_addr);
        Ok(())
    }

    /// Power the magnetometer down
    pub fn power_off_magnetometer(&mut self) -> Result<()> {
        self.bus.set_device_address(self.config.i2c_addr);
        self.set_bypass(true)?;
        self.bus.set_device_address(AK8963_I2C_ADDR);
        self.bus.write_register(AK8963_CNTL, AK8963_POWER_DOWN)?;
        self.bus.set_device_address(self.config.i2c_addr);
        Ok(())
    }

    /// Read the magnetometer if it has fresh data
    ///
    /// Returns `Ok(false)` when no new sample was ready (`data` untouched).
    /// Saturated samples are discarded with an error since a nearby field
    /// source makes the reading meaningless.
    pub fn read_mag(&mut self, data: &mut MpuData) -> Result<bool> {
        if !self.config.enable_magnetometer {
            return Err(Error::Magnetometer(
                "magnetometer not enabled in configuration",
            ));
        }
        self.bus.set_device_address(AK8963_I2C_ADDR);

        let st1 = self.bus.read_register(AK8963_ST1)?;
        if st1 & AK8963_DATA_READY == 0 {
            if self.config.show_warnings {
                warn!("no new magnetometer data ready, skipping read");
            }
            self.bus.set_device_address(self.config.i2c_addr);
            return Ok(false);
        }

        // six data bytes plus ST2, which must be read to release the latch
        let mut raw = [0u8; 7];
        self.bus.read_registers(AK8963_XOUT_L, &mut raw)?;
        self.bus.set_device_address(self.config.i2c_addr);

        if raw[6] & AK8963_HOFL != 0 {
            if self.config.show_warnings {
                warn!("magnetometer saturated, discarding data");
            }
            return Err(Error::Magnetometer("sensor saturated"));
        }

        let adc = [
            i16::from_le_bytes([raw[0], raw[1]]),
            i16::from_le_bytes([raw[2], raw[3]]),
            i16::from_le_bytes([raw[4], raw[5]]),
        ];

        // remap into the accel/gyro frame, applying each source axis's own
        // factory sensitivity
        let factory = [
            f64::from(adc[1]) * self.mag_factory_adjust[1] * MAG_RAW_TO_UT,
            f64::from(adc[0]) * self.mag_factory_adjust[0] * MAG_RAW_TO_UT,
            f64::from(-adc[2]) * self.mag_factory_adjust[2] * MAG_RAW_TO_UT,
        ];

        for i in 0..3 {
            // guard against an uninitialized calibration file
            if self.mag_scales[i] == 0.0 {
                self.mag_scales[i] = 1.0;
            }
            data.mag[i] = (factory[i] - self.mag_offsets[i]) * self.mag_scales[i];
        }
        Ok(true)
    }

    /// Magnetometer field in µT with factory sensitivity and the axis remap
    /// applied, but without the user hard/soft-iron correction
    ///
    /// Used by the calibration routine, which must see the uncorrected
    /// ellipsoid in the same frame `read_mag` reports. Returns `Ok(None)`
    /// when no fresh sample was ready.
    pub fn read_mag_raw(&mut self) -> Result<Option<[f64; 3]>> {
        self.bus.set_device_address(AK8963_I2C_ADDR);
        let st1 = self.bus.read_register(AK8963_ST1)?;
        if st1 & AK8963_DATA_READY == 0 {
            self.bus.set_device_address(self.config.i2c_addr);
            return Ok(None);
        }
        let mut raw = [0u8; 7];
        self.bus.read_registers(AK8963_XOUT_L, &mut raw)?;
        self.bus.set_device_address(self.config.i2c_addr);
        if raw[6] & AK8963_HOFL != 0 {
            return Err(Error::Magnetometer("sensor saturated"));
        }
        let adc = [
            i16::from_le_bytes([raw[0], raw[1]]),
            i16::from_le_bytes([raw[2], raw[3]]),
            i16::from_le_bytes([raw[4], raw[5]]),
        ];
        Ok(Some([
            f64::from(adc[1]) * self.mag_factory_adjust[1] * MAG_RAW_TO_UT,
            f64::from(adc[0]) * self.mag_factory_adjust[0] * MAG_RAW_TO_UT,
            -f64::from(adc[2]) * self.mag_factory_adjust[2] * MAG_RAW_TO_UT,
        ]))
    }

    /// Install user calibration (hard-iron offsets in µT and soft-iron
    /// scales)
    pub fn set_mag_calibration(&mut self, offsets: [f64; 3], scales: [f64; 3]) {
        self.mag_offsets = offsets;
        self.mag_scales = scales;
    }
}
