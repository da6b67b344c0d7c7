//! Low-level MPU-9250 driver
//!
//! [`Mpu9250`] owns the bus and implements the register-level operations the
//! higher layers compose: reset, identity check, range/filter setup, FIFO
//! access and the bank-addressed DMP memory window. Magnetometer and DMP
//! programming live in their own modules as further `impl` blocks.

use std::thread::sleep;
use std::time::Duration;

use log::{debug, warn};

use crate::config::Config;
use crate::data::MpuData;
use crate::interface::RegisterBus;
use crate::registers::*;
use crate::{Error, Result};

/// DMP memory bank size; transfers must not cross a bank boundary
pub const DMP_BANK_SIZE: usize = 256;

/// MPU-9250 driver over a [`RegisterBus`]
pub struct Mpu9250<B> {
    pub(crate) bus: B,
    pub(crate) config: Config,
    /// DMP FIFO currently enabled; changes what USER_CTRL gets on bypass
    /// toggles
    pub(crate) dmp_en: bool,
    pub(crate) accel_to_ms2: f64,
    pub(crate) gyro_to_degs: f64,
    /// AK8963 factory sensitivity from fuse ROM
    pub(crate) mag_factory_adjust: [f64; 3],
    /// User hard-iron offsets, µT
    pub(crate) mag_offsets: [f64; 3],
    /// User soft-iron scales
    pub(crate) mag_scales: [f64; 3],
}

impl<B: RegisterBus> Mpu9250<B> {
    /// Wrap a bus; no I/O happens until an initialize routine runs
    pub fn new(bus: B, config: Config) -> Self {
        let accel_to_ms2 = config.accel_fsr.to_ms2();
        let gyro_to_degs = config.gyro_fsr.to_dps();
        Self {
            bus,
            config,
            dmp_en: false,
            accel_to_ms2,
            gyro_to_degs,
            mag_factory_adjust: [1.0; 3],
            mag_offsets: [0.0; 3],
            mag_scales: [1.0; 3],
        }
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the driver and return the bus
    pub fn release(self) -> B {
        self.bus
    }

    /// Full device reset, then wake with all power management features off
    ///
    /// Each write gets one retry after 10 ms since the device NAKs while a
    /// previous reset is still in flight. Ends with the 100 ms settle the
    /// part needs after reset.
    pub fn reset(&mut self) -> Result<()> {
        self.bus.set_device_address(self.config.i2c_addr);
        if self
            .bus
            .write_register(PWR_MGMT_1, BIT_H_RESET)
            .is_err()
        {
            sleep(Duration::from_millis(10));
            self.bus.write_register(PWR_MGMT_1, BIT_H_RESET)?;
        }
        if self.bus.write_register(PWR_MGMT_1, 0).is_err() {
            sleep(Duration::from_millis(10));
            self.bus.write_register(PWR_MGMT_1, 0)?;
        }
        sleep(Duration::from_millis(100));
        Ok(())
    }

    /// Verify the chip identifies as an MPU-9250 or a close sibling
    pub fn check_who_am_i(&mut self) -> Result<()> {
        let c = self.bus.read_register(WHO_AM_I)?;
        if !WHO_AM_I_WHITELIST.contains(&c) {
            return Err(Error::InvalidDevice(c));
        }
        debug!("WHO_AM_I {c:#04x}");
        Ok(())
    }

    /// Set accelerometer full scale range and remember the unit conversion
    pub fn set_accel_fsr(&mut self) -> Result<()> {
        self.accel_to_ms2 = self.config.accel_fsr.to_ms2();
        self.bus
            .write_register(ACCEL_CONFIG, self.config.accel_fsr.register_value())
    }

    /// Set gyroscope full scale range and remember the unit conversion
    pub fn set_gyro_fsr(&mut self) -> Result<()> {
        self.gyro_to_degs = self.config.gyro_fsr.to_dps();
        self.bus
            .write_register(GYRO_CONFIG, self.config.gyro_fsr.register_value())
    }

    /// Program the accelerometer DLPF (shares a register with the FIFO
    /// partition bit, which stays set)
    pub fn set_accel_dlpf(&mut self) -> Result<()> {
        let c = match self.config.accel_dlpf.cfg_bits() {
            // fchoice_b bypass, 1.13 kHz bandwidth
            None => 0x08 | BIT_FIFO_SIZE_1024,
            Some(bits) => bits | BIT_FIFO_SIZE_1024,
        };
        self.bus.write_register(ACCEL_CONFIG_2, c)
    }

    /// Program the gyroscope DLPF (FIFO set to replace-oldest mode)
    pub fn set_gyro_dlpf(&mut self) -> Result<()> {
        self.bus
            .write_register(CONFIG, self.config.gyro_dlpf.cfg_bits())
    }

    /// Set the internal sample rate divider off the 1 kHz base
    pub fn set_sample_rate(&mut self, rate: u16) -> Result<()> {
        if !(4..=1000).contains(&rate) {
            return Err(Error::InvalidConfig("sample rate must be 4..=1000 Hz"));
        }
        let div = (1000 / rate - 1) as u8;
        self.bus.write_register(SMPLRT_DIV, div)
    }

    /// Toggle I2C bypass so the AK8963 is visible at its own address
    ///
    /// USER_CTRL keeps the FIFO enabled while the DMP runs, and runs the I2C
    /// master instead of bypass when bypass is off.
    pub fn set_bypass(&mut self, bypass_on: bool) -> Result<()> {
        self.bus.set_device_address(self.config.i2c_addr);
        let mut tmp = 0u8;
        if self.dmp_en {
            tmp |= BIT_FIFO_EN;
        }
        if !bypass_on {
            tmp |= BIT_I2C_MST_EN;
        }
        self.bus.write_register(USER_CTRL, tmp)?;
        sleep(Duration::from_millis(3));

        let mut pin_cfg = BIT_LATCH_INT_EN | BIT_INT_ANYRD_CLEAR | BIT_ACTL_ACTIVE_LOW;
        if bypass_on {
            pin_cfg |= BIT_BYPASS_EN;
        }
        self.bus.write_register(INT_PIN_CFG, pin_cfg)
    }

    /// Push gyro offsets (full-resolution counts) into the hardware bias
    /// registers
    ///
    /// The registers expect 32.9 LSB/deg/s, a quarter of the sensor
    /// resolution, negated so the steady state bias subtracts out.
    pub fn write_gyro_offsets(&mut self, offsets: [i32; 3]) -> Result<()> {
        let mut data = [0u8; 6];
        for (i, &off) in offsets.iter().enumerate() {
            let bias = (-off / 4) as i16;
            let [h, l] = bias.to_be_bytes();
            data[2 * i] = h;
            data[2 * i + 1] = l;
        }
        self.bus.write_registers(XG_OFFSET_H, &data)
    }

    /// Latest accelerometer sample in raw counts and m/s^2
    pub fn read_accel(&mut self, data: &mut MpuData) -> Result<()> {
        self.bus.set_device_address(self.config.i2c_addr);
        let mut raw = [0u8; 6];
        self.bus.read_registers(ACCEL_XOUT_H, &mut raw)?;
        for i in 0..3 {
            data.raw_accel[i] = i16::from_be_bytes([raw[2 * i], raw[2 * i + 1]]);
            data.accel[i] = f64::from(data.raw_accel[i]) * self.accel_to_ms2;
        }
        data.accel_to_ms2 = self.accel_to_ms2;
        Ok(())
    }

    /// Latest gyroscope sample in raw counts and deg/s
    pub fn read_gyro(&mut self, data: &mut MpuData) -> Result<()> {
        self.bus.set_device_address(self.config.i2c_addr);
        let mut raw = [0u8; 6];
        self.bus.read_registers(GYRO_XOUT_H, &mut raw)?;
        for i in 0..3 {
            data.raw_gyro[i] = i16::from_be_bytes([raw[2 * i], raw[2 * i + 1]]);
            data.gyro[i] = f64::from(data.raw_gyro[i]) * self.gyro_to_degs;
        }
        data.gyro_to_degs = self.gyro_to_degs;
        Ok(())
    }

    /// Die temperature in deg C
    pub fn read_temp(&mut self, data: &mut MpuData) -> Result<()> {
        self.bus.set_device_address(self.config.i2c_addr);
        let mut raw = [0u8; 2];
        self.bus.read_registers(TEMP_OUT_H, &mut raw)?;
        let adc = i16::from_be_bytes(raw);
        data.temp = TEMP_OFFSET_DEGC + f64::from(adc) / TEMP_SENSITIVITY;
        Ok(())
    }

    /// Number of bytes currently in the FIFO
    pub fn fifo_count(&mut self) -> Result<u16> {
        let mut raw = [0u8; 2];
        self.bus.read_registers(FIFO_COUNTH, &mut raw)?;
        Ok(u16::from_be_bytes(raw))
    }

    /// Drain `buf.len()` bytes from the FIFO, with exactly one retry
    pub fn read_fifo(&mut self, buf: &mut [u8]) -> Result<()> {
        if let Err(first) = self.bus.read_registers(FIFO_R_W, buf) {
            if self.config.show_warnings {
                warn!("fifo read failed, retrying: {first}");
            }
            self.bus.read_registers(FIFO_R_W, buf)?;
        }
        Ok(())
    }

    /// Enable or disable the DMP interrupt, leaving all raw-sensor FIFO
    /// sources off
    pub fn set_int_enable(&mut self, enable: bool) -> Result<()> {
        let tmp = if enable { BIT_DMP_INT_EN } else { 0 };
        self.bus.write_register(INT_ENABLE, tmp)?;
        self.bus.write_register(FIFO_EN, 0)
    }

    /// Reset the FIFO and DMP engines and re-arm the DMP interrupt
    ///
    /// Sequence and the 50 ms settle follow the part's errata-safe bringup:
    /// quiesce everything, pulse both reset bits, re-enable, re-arm.
    pub fn reset_fifo(&mut self) -> Result<()> {
        self.bus.set_device_address(self.config.i2c_addr);
        self.bus.write_register(INT_ENABLE, 0)?;
        self.bus.write_register(FIFO_EN, 0)?;
        self.bus.write_register(USER_CTRL, 0)?;

        self.bus
            .write_register(USER_CTRL, BIT_FIFO_RST | BIT_DMP_RST)?;
        sleep(Duration::from_millis(50));

        self.bus
            .write_register(USER_CTRL, BIT_DMP_EN | BIT_FIFO_EN)?;
        self.bus.write_register(INT_ENABLE, BIT_DMP_INT_EN)?;
        self.bus.write_register(FIFO_EN, 0)
    }

    /// Turn the DMP engine on or off
    pub fn set_dmp_state(&mut self, enable: bool) -> Result<()> {
        if enable {
            self.set_int_enable(false)?;
            self.set_bypass(true)?;
            self.bus.write_register(FIFO_EN, 0)?;
            self.set_int_enable(true)?;
            self.reset_fifo()
        } else {
            self.set_int_enable(false)?;
            self.bus.write_register(FIFO_EN, 0)?;
            self.reset_fifo()
        }
    }

    /// Write to DMP memory at `bank << 8 | addr`
    ///
    /// The transfer must fit within a single 256-byte bank.
    pub fn write_mem(&mut self, mem_addr: u16, data: &[u8]) -> Result<()> {
        let start = (mem_addr & 0xFF) as usize;
        if start + data.len() > DMP_BANK_SIZE {
            return Err(Error::Firmware("memory write crosses bank boundary"));
        }
        self.bus
            .write_registers(BANK_SEL, &mem_addr.to_be_bytes())?;
        self.bus.write_registers(MEM_R_W, data)
    }

    /// Read from DMP memory at `bank << 8 | addr`
    pub fn read_mem(&mut self, mem_addr: u16, buf: &mut [u8]) -> Result<()> {
        let start = (mem_addr & 0xFF) as usize;
        if start + buf.len() > DMP_BANK_SIZE {
            return Err(Error::Firmware("memory read crosses bank boundary"));
        }
        self.bus
            .write_registers(BANK_SEL, &mem_addr.to_be_bytes())?;
        self.bus.read_registers(MEM_R_W, buf)
    }

    /// Final power-down: reset then sleep, each with one retry
    pub fn power_down(&mut self) -> Result<()> {
        self.bus.set_device_address(self.config.i2c_addr);
        if self
            .bus
            .write_register(PWR_MGMT_1, BIT_H_RESET)
            .is_err()
        {
            sleep(Duration::from_millis(1));
            if self.bus.write_register(PWR_MGMT_1, BIT_H_RESET).is_err() {
                warn!("failed to write reset bit during power down");
            }
        }
        if self.bus.write_register(PWR_MGMT_1, BIT_SLEEP).is_err() {
            sleep(Duration::from_millis(1));
            if self.bus.write_register(PWR_MGMT_1, BIT_SLEEP).is_err() {
                warn!("failed to write sleep bit during power down");
            }
        }
        Ok(())
    }
}
