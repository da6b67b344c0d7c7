//! End-to-end DMP session: bring-up, acquisition thread, callbacks, shutdown

use std::sync::mpsc;
use std::time::Duration;

use crate::common::mock_interface::MockBus;
use crate::common::test_utils::{identity_packet, init_logging, test_config, FakeInterrupt};
use mpu9250_dmp::registers::*;
use mpu9250_dmp::{Error, MpuData, Session, TapDirection, WakeReason};

#[test]
fn test_dmp_bringup_programs_the_device() {
    init_logging();
    let bus = MockBus::new();
    let mut config = test_config("dmp-bringup");
    config.i2c_bus = 4;
    let mut session =
        Session::initialize_dmp(bus.clone(), FakeInterrupt::edges(0), config).unwrap();
    session.power_off().unwrap();

    // FIFO partition, 200Hz internal rate and the DMP engine bit
    assert!(bus.wrote(ACCEL_CONFIG_2, BIT_FIFO_SIZE_1024 | 0x8));
    assert!(bus.wrote(SMPLRT_DIV, 4));
    let user_ctrl = bus.register(USER_CTRL);
    assert_ne!(user_ctrl & BIT_DMP_EN, 0);
    assert_ne!(user_ctrl & BIT_FIFO_EN, 0);
    // firmware landed and the start vector points at it
    assert_eq!(bus.register(PRGM_START_H), 0x04);
    assert_eq!(bus.register(PRGM_START_H + 1), 0x00);
}

#[test]
fn test_data_flows_to_callback_and_snapshot() {
    init_logging();
    let bus = MockBus::new();
    // first edge is the suppressed warm-up read, second one publishes
    bus.queue_fifo(identity_packet(None));
    bus.queue_fifo(identity_packet(None));

    let mut config = test_config("dmp-data");
    config.i2c_bus = 5;
    let mut session =
        Session::initialize_dmp(bus, FakeInterrupt::edges(2), config).unwrap();

    let (tx, rx) = mpsc::channel::<MpuData>();
    session.set_data_callback(move |data| {
        let _ = tx.send(data.clone());
    });

    let data = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("no data published within 2s");
    assert!((data.dmp_quat.w - 1.0).abs() < 1e-9);
    assert!(data.dmp_quat.x.abs() < 1e-9);
    assert!(data.dmp_tait_bryan.yaw.abs() < 1e-9);

    // the snapshot and the timestamp agree with the callback
    assert!((session.data().dmp_quat.w - 1.0).abs() < 1e-9);
    assert!(session.nanos_since_last_interrupt().unwrap() < 5_000_000_000);
    assert!(session.last_read_successful());

    // staleness only grows while the line is quiet
    let first = session.nanos_since_last_interrupt().unwrap();
    std::thread::sleep(Duration::from_millis(5));
    let second = session.nanos_since_last_interrupt().unwrap();
    assert!(second > first);

    session.power_off().unwrap();
}

#[test]
fn test_tap_reaches_tap_callback() {
    init_logging();
    let bus = MockBus::new();
    bus.queue_fifo(identity_packet(None));
    // direction 1 is a positive-X tap
    bus.queue_fifo(identity_packet(Some(1)));

    let mut config = test_config("dmp-tap");
    config.i2c_bus = 6;
    let mut session =
        Session::initialize_dmp(bus, FakeInterrupt::edges(2), config).unwrap();

    let (tx, rx) = mpsc::channel();
    session.set_tap_callback(move |event| {
        let _ = tx.send(event);
    });

    let event = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("no tap published within 2s");
    assert_eq!(event.direction, Some(TapDirection::XUp));
    assert_eq!(event.raw_direction, 1);

    assert!(session.nanos_since_last_tap().is_ok());
    assert_eq!(session.data().last_tap, Some(event));

    session.power_off().unwrap();
}

#[test]
fn test_power_off_stops_thread_and_sleeps_device() {
    init_logging();
    let bus = MockBus::new();
    let mut config = test_config("dmp-shutdown");
    config.i2c_bus = 7;
    let mut session =
        Session::initialize_dmp(bus.clone(), FakeInterrupt::edges(0), config).unwrap();

    session.power_off().unwrap();
    assert!(bus.wrote(PWR_MGMT_1, BIT_SLEEP));

    // consumers are turned away after shutdown
    assert!(matches!(session.block_until_data(), Err(Error::NotRunning)));
    assert!(matches!(session.block_until_tap(), Err(Error::NotRunning)));

    // calling power_off again is harmless
    session.power_off().unwrap();
}

#[test]
fn test_block_until_data_wakes_only_on_a_publish() {
    init_logging();
    let bus = MockBus::new();
    bus.queue_fifo(identity_packet(None));
    bus.queue_fifo(identity_packet(None));

    let mut config = test_config("dmp-block");
    config.i2c_bus = 5;
    let interrupt = FakeInterrupt::edges_after(2, Duration::from_millis(150));
    let mut session = Session::initialize_dmp(bus, interrupt, config).unwrap();

    // the warm-up edge publishes nothing, so this must sleep through it and
    // wake on the second edge with the data tag
    assert!(matches!(session.block_until_data(), Ok(WakeReason::DataReady)));

    session.power_off().unwrap();
}

#[test]
fn test_partial_fifo_backlog_issues_reset_sequence() {
    init_logging();
    let bus = MockBus::new();
    // two and a half packets is not a backlog the parser can recover from
    bus.queue_fifo(vec![0u8; 50]);

    let mut config = test_config("dmp-partial-fifo");
    config.i2c_bus = 8;
    let interrupt = FakeInterrupt::edges_after(1, Duration::from_millis(300));
    let mut session = Session::initialize_dmp(bus.clone(), interrupt, config).unwrap();

    // quiesce, pulse both reset bits, re-enable, re-arm
    let sequence = [
        (INT_ENABLE, 0),
        (FIFO_EN, 0),
        (USER_CTRL, 0),
        (USER_CTRL, BIT_FIFO_RST | BIT_DMP_RST),
        (USER_CTRL, BIT_DMP_EN | BIT_FIFO_EN),
        (INT_ENABLE, BIT_DMP_INT_EN),
        (FIFO_EN, 0),
    ];

    // bringup and the thread-start flush settle well before the edge fires
    std::thread::sleep(Duration::from_millis(150));
    let before_edge = bus.wrote_sequence(&sequence);
    assert!(before_edge >= 1);

    std::thread::sleep(Duration::from_millis(400));
    session.power_off().unwrap();

    // the unparsable backlog added exactly one more full reset
    assert_eq!(bus.wrote_sequence(&sequence), before_edge + 1);
    assert!(!session.last_read_successful());
}

#[test]
fn test_first_interrupt_never_reaches_the_callback() {
    init_logging();
    let bus = MockBus::new();
    for _ in 0..5 {
        bus.queue_fifo(identity_packet(None));
    }

    let mut config = test_config("dmp-warmup");
    config.i2c_bus = 4;
    let mut session =
        Session::initialize_dmp(bus, FakeInterrupt::edges(5), config).unwrap();

    let (tx, rx) = mpsc::channel::<()>();
    session.set_data_callback(move |_| {
        let _ = tx.send(());
    });

    // five edges, the warm-up one swallowed
    for _ in 0..4 {
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

    session.power_off().unwrap();
}

#[test]
fn test_corrupt_fifo_is_flushed_without_publishing() {
    init_logging();
    let bus = MockBus::new();
    // warm-up packet, then garbage that fails the magnitude check
    bus.queue_fifo(identity_packet(None));
    bus.queue_fifo(vec![0x7F; 20]);

    let mut config = test_config("dmp-corrupt");
    config.i2c_bus = 0;
    let mut session =
        Session::initialize_dmp(bus, FakeInterrupt::edges(2), config).unwrap();

    let (tx, rx) = mpsc::channel::<()>();
    session.set_data_callback(move |_| {
        let _ = tx.send(());
    });

    // nothing may be published for the corrupt packet
    assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    assert!(!session.last_read_successful());

    session.power_off().unwrap();
}
