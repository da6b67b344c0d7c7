//! AK8963 bring-up, axis remap and error paths

use crate::common::mock_interface::MockBus;
use mpu9250_dmp::registers::*;
use mpu9250_dmp::{Config, Error, Mpu9250, MpuData};

fn mag_mpu() -> (Mpu9250<MockBus>, MockBus) {
    let bus = MockBus::new();
    let config = Config {
        enable_magnetometer: true,
        ..Config::default()
    };
    (Mpu9250::new(bus.clone(), config), bus)
}

#[test]
fn test_init_configures_continuous_mode() {
    let (mut mpu, bus) = mag_mpu();
    mpu.init_magnetometer().unwrap();
    assert_eq!(
        bus.mag_register(AK8963_CNTL),
        AK8963_16BIT | AK8963_CONT_MODE_2
    );
    // bypass must be on so the AK8963 is reachable directly
    assert_ne!(bus.register(INT_PIN_CFG) & BIT_BYPASS_EN, 0);
}

#[test]
fn test_read_applies_axis_remap() {
    let (mut mpu, bus) = mag_mpu();
    mpu.init_magnetometer().unwrap();
    // fuse ROM is 128 in the mock so factory adjust is exactly 1.0
    bus.set_mag_sample(100, 200, -50, 0);

    let mut data = MpuData::default();
    assert!(mpu.read_mag(&mut data).unwrap());
    // X and Y swap, Z negates, 0.15uT per count
    assert!((data.mag[0] - 200.0 * 0.15).abs() < 1e-9);
    assert!((data.mag[1] - 100.0 * 0.15).abs() < 1e-9);
    assert!((data.mag[2] - 50.0 * 0.15).abs() < 1e-9);
}

#[test]
fn test_read_applies_user_calibration() {
    let (mut mpu, bus) = mag_mpu();
    mpu.init_magnetometer().unwrap();
    mpu.set_mag_calibration([3.0, -1.5, 0.0], [2.0, 1.0, 0.5]);
    bus.set_mag_sample(100, 200, -50, 0);

    let mut data = MpuData::default();
    assert!(mpu.read_mag(&mut data).unwrap());
    assert!((data.mag[0] - (200.0 * 0.15 - 3.0) * 2.0).abs() < 1e-9);
    assert!((data.mag[1] - (100.0 * 0.15 + 1.5) * 1.0).abs() < 1e-9);
    assert!((data.mag[2] - (50.0 * 0.15) * 0.5).abs() < 1e-9);
}

#[test]
fn test_read_without_fresh_sample() {
    let (mut mpu, bus) = mag_mpu();
    mpu.init_magnetometer().unwrap();
    bus.set_mag_register(AK8963_ST1, 0);

    let mut data = MpuData::default();
    data.mag = [1.0, 2.0, 3.0];
    assert!(!mpu.read_mag(&mut data).unwrap());
    // stale data is left alone
    assert_eq!(data.mag, [1.0, 2.0, 3.0]);
}

#[test]
fn test_saturated_sample_is_discarded() {
    let (mut mpu, bus) = mag_mpu();
    mpu.init_magnetometer().unwrap();
    bus.set_mag_sample(32760, 0, 0, AK8963_HOFL);

    let mut data = MpuData::default();
    assert!(matches!(
        mpu.read_mag(&mut data),
        Err(Error::Magnetometer(_))
    ));
}

#[test]
fn test_read_disabled_magnetometer() {
    let bus = MockBus::new();
    let mut mpu = Mpu9250::new(bus, Config::default());
    let mut data = MpuData::default();
    assert!(matches!(
        mpu.read_mag(&mut data),
        Err(Error::Magnetometer(_))
    ));
}

#[test]
fn test_fuse_rom_sensitivity() {
    let bus = MockBus::new();
    // asa value 148 means (148-128)/256 + 1 = 1.078125 sensitivity
    bus.set_mag_register(AK8963_ASAX, 148);
    let config = Config {
        enable_magnetometer: true,
        ..Config::default()
    };
    let mut mpu = Mpu9250::new(bus.clone(), config);
    mpu.init_magnetometer().unwrap();
    bus.set_mag_sample(100, 1000, 0, 0);

    let mut data = MpuData::default();
    assert!(mpu.read_mag(&mut data).unwrap());
    // the adjusted X axis lands in the body Y slot after the remap
    assert!((data.mag[1] - 100.0 * 1.078125 * 0.15).abs() < 1e-9);
}
