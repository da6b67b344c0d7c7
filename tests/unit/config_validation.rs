//! DMP config validation and identity checks

use crate::common::mock_interface::MockBus;
use crate::common::test_utils::{test_config, FakeInterrupt};
use mpu9250_dmp::{Error, Session};

#[test]
fn test_rejects_sample_rate_out_of_range() {
    for rate in [0u16, 3, 201, 1000] {
        let mut config = test_config("rate-range");
        config.i2c_bus = 10;
        config.dmp_sample_rate = rate;
        let result = Session::initialize_dmp(MockBus::new(), FakeInterrupt::edges(0), config);
        assert!(matches!(result, Err(Error::InvalidConfig(_))), "rate {rate}");
    }
}

#[test]
fn test_rejects_sample_rate_not_dividing_200() {
    for rate in [7u16, 30, 60, 150] {
        let mut config = test_config("rate-div");
        config.i2c_bus = 10;
        config.dmp_sample_rate = rate;
        let result = Session::initialize_dmp(MockBus::new(), FakeInterrupt::edges(0), config);
        assert!(matches!(result, Err(Error::InvalidConfig(_))), "rate {rate}");
    }
}

#[test]
fn test_rejects_short_compass_time_constant() {
    let mut config = test_config("compass-tc");
    config.i2c_bus = 10;
    config.enable_magnetometer = true;
    config.compass_time_constant = 0.05;
    let result = Session::initialize_dmp(MockBus::new(), FakeInterrupt::edges(0), config);
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[test]
fn test_rejects_unknown_device() {
    let mut config = test_config("who-am-i");
    config.i2c_bus = 11;
    let bus = MockBus::new();
    bus.set_who_am_i(0x55);
    match Session::initialize(bus, config) {
        Err(Error::InvalidDevice(value)) => assert_eq!(value, 0x55),
        Err(e) => panic!("expected InvalidDevice, got {e}"),
        Ok(_) => panic!("expected InvalidDevice, got a session"),
    }
}

#[test]
fn test_accepts_whole_who_am_i_whitelist() {
    for value in mpu9250_dmp::registers::WHO_AM_I_WHITELIST {
        let mut config = test_config("whitelist");
        config.i2c_bus = 12;
        let bus = MockBus::new();
        bus.set_who_am_i(value);
        let session = Session::initialize(bus, config);
        assert!(session.is_ok(), "WHO_AM_I {value:#04x} should be accepted");
    }
}
