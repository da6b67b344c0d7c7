//! Calibration routines and the on-disk calibration store
//!
//! Two text files hold the calibration results. The gyro file is three
//! integer zero-rate offsets in raw counts, one per line. The magnetometer
//! file is three hard-iron offsets in µT followed by three soft-iron scale
//! factors, one per line. Missing files are not an error; readers fall back
//! to neutral values and warn.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use log::{info, warn};

use crate::config::Config;
use crate::device::Mpu9250;
use crate::interface::{bus_claimed, claim_bus, release_bus, RegisterBus};
use crate::math::linalg::fit_ellipsoid;
use crate::registers::*;
use crate::{Error, Result};

const GYRO_CAL_FILE: &str = "gyro.cal";
const MAG_CAL_FILE: &str = "mag.cal";

/// Maximum per-axis standard deviation of raw gyro counts for a sample
/// window to count as steady
const GYRO_CAL_THRESH: f64 = 50.0;
/// Maximum believable magnitude of a steady-state gyro offset, raw counts
const GYRO_OFFSET_THRESH: i32 = 500;
/// How many sample windows to try before giving up on a steady reading
const GYRO_CAL_MAX_ATTEMPTS: u32 = 6;

const MAG_CAL_SAMPLES: usize = 200;
const MAG_CAL_RATE_HZ: u64 = 15;

/// Reads and writes calibration files under a configurable directory
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    dir: PathBuf,
}

impl CalibrationStore {
    /// Store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store for the directory named in `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.calibration_dir)
    }

    fn gyro_path(&self) -> PathBuf {
        self.dir.join(GYRO_CAL_FILE)
    }

    fn mag_path(&self) -> PathBuf {
        self.dir.join(MAG_CAL_FILE)
    }

    /// Whether a gyro calibration file exists
    pub fn is_gyro_calibrated(&self) -> bool {
        self.gyro_path().exists()
    }

    /// Whether a magnetometer calibration file exists
    pub fn is_mag_calibrated(&self) -> bool {
        self.mag_path().exists()
    }

    /// Load saved gyro offsets, falling back to zeros when no calibration
    /// has been run yet
    pub fn load_gyro_offsets(&self) -> [i32; 3] {
        match read_numbers::<i32>(&self.gyro_path(), 3) {
            Some(v) => [v[0], v[1], v[2]],
            None => {
                warn!("no gyro calibration data found, using zero offsets");
                [0, 0, 0]
            }
        }
    }

    /// Persist gyro offsets, creating the directory on first use
    pub fn save_gyro_offsets(&self, offsets: [i32; 3]) -> Result<()> {
        let text = format!("{}\n{}\n{}\n", offsets[0], offsets[1], offsets[2]);
        self.write_file(&self.gyro_path(), &text)
    }

    /// Load saved magnetometer offsets and scales, falling back to the
    /// neutral correction when no calibration has been run yet
    pub fn load_mag_calibration(&self) -> ([f64; 3], [f64; 3]) {
        match read_numbers::<f64>(&self.mag_path(), 6) {
            Some(v) => {
                let mut scales = [v[3], v[4], v[5]];
                for s in &mut scales {
                    // a zero scale would wipe the axis entirely
                    if *s == 0.0 {
                        warn!("zero magnetometer scale in calibration file, using 1.0");
                        *s = 1.0;
                    }
                }
                ([v[0], v[1], v[2]], scales)
            }
            None => {
                warn!("no magnetometer calibration data found, using raw values");
                ([0.0, 0.0, 0.0], [1.0, 1.0, 1.0])
            }
        }
    }

    /// Persist magnetometer offsets and scales
    pub fn save_mag_calibration(&self, offsets: [f64; 3], scales: [f64; 3]) -> Result<()> {
        let text = format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n",
            offsets[0], offsets[1], offsets[2], scales[0], scales[1], scales[2]
        );
        self.write_file(&self.mag_path(), &text)
    }

    fn write_file(&self, path: &Path, text: &str) -> Result<()> {
        if fs::write(path, text).is_err() {
            // directory may not exist yet
            fs::create_dir_all(&self.dir)?;
            fs::write(path, text)?;
        }
        Ok(())
    }
}

fn read_numbers<T: std::str::FromStr>(path: &Path, count: usize) -> Option<Vec<T>> {
    let text = fs::read_to_string(path).ok()?;
    let values: Vec<T> = text
        .split_whitespace()
        .take(count)
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    (values.len() == count).then_some(values)
}

fn std_dev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let sq_sum: f64 = samples.iter().map(|s| (s - mean) * (s - mean)).sum();
    (sq_sum / (samples.len() - 1) as f64).sqrt()
}

/// Sample the gyro at rest and save its steady-state offsets to disk
///
/// The device must sit still on a solid surface. Windows of FIFO samples are
/// collected until one is steady; a window right after a noisy one is
/// discarded so the device has settled after being put down. Returns the bus
/// for reuse, or [`Error::DeviceMoving`] /
/// [`Error::CalibrationOutOfRange`] after too many bad windows.
pub fn calibrate_gyro_routine<B: RegisterBus>(bus: B, config: &Config) -> Result<B> {
    if bus_claimed(config.i2c_bus) {
        return Err(Error::InvalidConfig(
            "i2c bus claimed by another session, aborting gyro calibration",
        ));
    }
    claim_bus(config.i2c_bus);

    // calibration runs with fixed full-scale ranges, keep only the bus
    // wiring and the output directory from the caller's config
    let cal_config = Config {
        i2c_bus: config.i2c_bus,
        i2c_addr: config.i2c_addr,
        calibration_dir: config.calibration_dir.clone(),
        ..Config::default()
    };

    let mut mpu = Mpu9250::new(bus, cal_config);
    let result = run_gyro_calibration(&mut mpu);
    release_bus(config.i2c_bus);

    let offsets = result?;
    let store = CalibrationStore::new(&config.calibration_dir);
    store.save_gyro_offsets(offsets)?;
    info!(
        "gyro offsets: {} {} {}",
        offsets[0], offsets[1], offsets[2]
    );
    Ok(mpu.release())
}

fn run_gyro_calibration<B: RegisterBus>(mpu: &mut Mpu9250<B>) -> Result<[i32; 3]> {
    mpu.reset()?;

    // wake with PLL clock, then configure for the bias measurement:
    // 184Hz DLPF, 200Hz sample rate, most sensitive full-scale ranges
    mpu.bus.write_register(PWR_MGMT_1, 0x01)?;
    mpu.bus.write_register(PWR_MGMT_2, 0x00)?;
    sleep(Duration::from_millis(200));
    mpu.bus.write_register(INT_ENABLE, 0x00)?;
    mpu.bus.write_register(FIFO_EN, 0x00)?;
    mpu.bus.write_register(PWR_MGMT_1, 0x00)?;
    mpu.bus.write_register(I2C_MST_CTRL, 0x00)?;
    mpu.bus.write_register(USER_CTRL, 0x00)?;
    mpu.bus
        .write_register(USER_CTRL, BIT_DMP_RST | BIT_FIFO_RST)?;
    sleep(Duration::from_millis(15));
    mpu.bus.write_register(CONFIG, 0x01)?;
    mpu.bus.write_register(SMPLRT_DIV, 0x04)?;
    mpu.bus.write_register(GYRO_CONFIG, 0x00)?;
    mpu.bus.write_register(ACCEL_CONFIG, 0x00)?;

    let mut was_last_steady = true;
    let mut last_failure = Error::DeviceMoving;
    for _ in 0..GYRO_CAL_MAX_ATTEMPTS {
        // route gyro samples into the FIFO for 0.4s
        mpu.bus.write_register(USER_CTRL, BIT_FIFO_EN)?;
        mpu.bus
            .write_register(FIFO_EN, FIFO_GYRO_X_EN | FIFO_GYRO_Y_EN | FIFO_GYRO_Z_EN)?;
        sleep(Duration::from_millis(400));
        mpu.bus.write_register(FIFO_EN, 0x00)?;

        let samples = usize::from(mpu.fifo_count()? / 6);
        if samples == 0 {
            last_failure = Error::Fifo("no gyro samples captured");
            continue;
        }

        let mut axes: [Vec<f64>; 3] = std::array::from_fn(|_| Vec::with_capacity(samples));
        let mut sums = [0i32; 3];
        let mut raw = [0u8; 6];
        for _ in 0..samples {
            mpu.read_fifo(&mut raw)?;
            for axis in 0..3 {
                let v = i16::from_be_bytes([raw[2 * axis], raw[2 * axis + 1]]);
                sums[axis] += i32::from(v);
                axes[axis].push(f64::from(v));
            }
        }

        if axes.iter().any(|a| std_dev(a) > GYRO_CAL_THRESH) {
            info!("gyro data too noisy, put the device down and keep it still");
            was_last_steady = false;
            last_failure = Error::DeviceMoving;
            continue;
        }
        // skip the first steady window after a noisy one so the device has
        // fully settled after being picked up
        if !was_last_steady {
            was_last_steady = true;
            continue;
        }

        let offsets = [
            sums[0] / samples as i32,
            sums[1] / samples as i32,
            sums[2] / samples as i32,
        ];
        if offsets.iter().any(|o| o.abs() > GYRO_OFFSET_THRESH) {
            info!("gyro offsets out of bounds, put the device down and keep it still");
            last_failure = Error::CalibrationOutOfRange;
            continue;
        }
        return Ok(offsets);
    }
    Err(last_failure)
}

/// Sample the magnetometer while the user slowly rotates the device through
/// all orientations, then fit an ellipsoid to the data and save hard-iron
/// offsets and soft-iron scales that map it onto a 70µT sphere
pub fn calibrate_mag_routine<B: RegisterBus>(bus: B, config: &Config) -> Result<B> {
    if bus_claimed(config.i2c_bus) {
        return Err(Error::InvalidConfig(
            "i2c bus claimed by another session, aborting magnetometer calibration",
        ));
    }
    claim_bus(config.i2c_bus);

    let cal_config = Config {
        enable_magnetometer: true,
        i2c_bus: config.i2c_bus,
        i2c_addr: config.i2c_addr,
        calibration_dir: config.calibration_dir.clone(),
        ..Config::default()
    };

    let mut mpu = Mpu9250::new(bus, cal_config);
    let result = run_mag_sampling(&mut mpu);
    release_bus(config.i2c_bus);
    let points = result?;

    info!("calculating magnetometer calibration constants");
    let (center, lengths) =
        fit_ellipsoid(&points).ok_or(Error::Magnetometer("failed to fit ellipsoid"))?;

    if center.iter().any(|c| c.abs() > 200.0) {
        return Err(Error::CalibrationOutOfRange);
    }
    if lengths.iter().any(|l| !(5.0..=200.0).contains(l)) {
        warn!("fitted ellipsoid axis lengths out of the expected range");
    }
    // map the fitted ellipsoid onto a 70uT sphere
    let scales = [70.0 / lengths[0], 70.0 / lengths[1], 70.0 / lengths[2]];
    info!(
        "mag offsets: {:.3} {:.3} {:.3} scales: {:.3} {:.3} {:.3}",
        center[0], center[1], center[2], scales[0], scales[1], scales[2]
    );

    let store = CalibrationStore::new(&config.calibration_dir);
    store.save_mag_calibration(center, scales)?;
    Ok(mpu.release())
}

fn run_mag_sampling<B: RegisterBus>(mpu: &mut Mpu9250<B>) -> Result<Vec<[f64; 3]>> {
    mpu.reset()?;
    mpu.check_who_am_i()?;
    mpu.init_magnetometer()?;

    info!("rotate the device slowly through all orientations");
    let mut points = Vec::with_capacity(MAG_CAL_SAMPLES);
    while points.len() < MAG_CAL_SAMPLES {
        match mpu.read_mag_raw()? {
            Some(p) if p != [0.0, 0.0, 0.0] => {
                points.push(p);
                if points.len() % (MAG_CAL_RATE_HZ as usize * 4) == 0 {
                    info!("keep spinning ({}/{})", points.len(), MAG_CAL_SAMPLES);
                }
            }
            // not ready or all zeros, try again next period
            _ => {}
        }
        sleep(Duration::from_millis(1000 / MAG_CAL_RATE_HZ));
    }

    mpu.power_off_magnetometer()?;
    mpu.power_down()?;
    Ok(points)
}
