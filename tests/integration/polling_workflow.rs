//! Polling-mode session workflow against the mock device

use crate::common::mock_interface::MockBus;
use crate::common::test_utils::test_config;
use mpu9250_dmp::registers::*;
use mpu9250_dmp::Session;

#[test]
fn test_polling_reads() {
    let bus = MockBus::new();
    // 1g on Z at 2G full scale
    bus.set_registers(ACCEL_XOUT_H, &[0, 0, 0, 0, 0x40, 0x00]);
    // slow roll about X at 2000DPS full scale
    bus.set_registers(GYRO_XOUT_H, &[0x01, 0x00, 0, 0, 0, 0]);
    // about 31 degrees C: raw = (31 - 21) * 333.87
    let temp_raw = (10.0f64 * 333.87) as i16;
    bus.set_registers(TEMP_OUT_H, &temp_raw.to_be_bytes());

    let mut config = test_config("polling");
    config.i2c_bus = 1;
    let mut session = Session::initialize(bus.clone(), config).unwrap();

    let accel = session.read_accel().unwrap();
    assert!(accel[0].abs() < 1e-9);
    assert!((accel[2] - 9.80665).abs() < 1e-6);

    let gyro = session.read_gyro().unwrap();
    assert!((gyro[0] - 256.0 * 2000.0 / 32768.0).abs() < 1e-6);

    let temp = session.read_temp().unwrap();
    assert!((temp - 31.0).abs() < 0.01);

    // snapshot reflects the reads
    let data = session.data();
    assert_eq!(data.raw_accel, [0, 0, 0x4000]);
    assert!((data.temp - 31.0).abs() < 0.01);

    session.power_off().unwrap();
    // power down puts the device back to sleep
    assert!(bus.wrote(PWR_MGMT_1, BIT_SLEEP));
}

#[test]
fn test_polling_init_sequence() {
    let bus = MockBus::new();
    let mut config = test_config("polling-init");
    config.i2c_bus = 2;
    let _session = Session::initialize(bus.clone(), config).unwrap();

    // 1kHz sampling and a device reset must both have happened
    assert!(bus.wrote(SMPLRT_DIV, 0));
    assert!(bus.wrote(PWR_MGMT_1, BIT_H_RESET));
    // gyro offsets register gets the stored (zero) calibration
    assert_eq!(bus.register(XG_OFFSET_H), 0);
}

#[test]
fn test_polling_mag_read() {
    let bus = MockBus::new();
    bus.set_mag_sample(40, -80, 100, 0);

    let mut config = test_config("polling-mag");
    config.i2c_bus = 3;
    config.enable_magnetometer = true;
    let mut session = Session::initialize(bus.clone(), config).unwrap();

    let mag = session.read_mag().unwrap().unwrap();
    assert!((mag[0] - (-80.0 * 0.15)).abs() < 1e-9);
    assert!((mag[1] - 40.0 * 0.15).abs() < 1e-9);
    assert!((mag[2] - (-100.0 * 0.15)).abs() < 1e-9);

    // the latch released on ST2, a second read sees nothing new
    assert!(session.read_mag().unwrap().is_none());
}
