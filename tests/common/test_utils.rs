//! Helpers shared by the integration tests

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::sleep;
use std::time::Duration;

use mpu9250_dmp::dmp::firmware::DMP_CODE_SIZE;
use mpu9250_dmp::{Config, InterruptEvent, InterruptSource, Result};

static DIR_SEQ: AtomicU32 = AtomicU32::new(0);

/// Route driver log output through the test harness
///
/// Safe to call from every test; only the first call installs the logger.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A fresh unique directory under the system temp dir
///
/// Not created on disk; the code under test is expected to create it.
pub fn temp_dir(tag: &str) -> PathBuf {
    let n = DIR_SEQ.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("mpu9250-test-{tag}-{}-{n}", std::process::id()))
}

/// Write a dummy firmware image of the correct size and return its path
pub fn write_firmware_image(dir: &PathBuf) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join("firmware.bin");
    let image: Vec<u8> = (0..DMP_CODE_SIZE).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, image).unwrap();
    path
}

/// Config pointing at throwaway calibration and firmware locations
pub fn test_config(tag: &str) -> Config {
    let dir = temp_dir(tag);
    let firmware = write_firmware_image(&dir);
    Config {
        calibration_dir: dir,
        firmware_path: firmware,
        ..Config::default()
    }
}

/// A 20-byte quaternion+gesture DMP packet
///
/// `quat` is in raw DMP fixed point where `1 << 30` is unit magnitude.
pub fn quat_packet(quat: [i32; 4], tap_dir: Option<u8>) -> Vec<u8> {
    let mut packet = vec![0u8; 20];
    for (i, q) in quat.iter().enumerate() {
        packet[4 * i..4 * i + 4].copy_from_slice(&q.to_be_bytes());
    }
    if let Some(dir) = tap_dir {
        packet[17] = 0x01;
        packet[19] = dir << 3;
    }
    packet
}

/// An identity-orientation packet, optionally carrying a tap
pub fn identity_packet(tap_dir: Option<u8>) -> Vec<u8> {
    quat_packet([1 << 30, 0, 0, 0], tap_dir)
}

/// Scripted interrupt line
///
/// Returns each scripted event in turn, pausing `pre_delay` before each so
/// the main thread can install callbacks or queue FIFO data. After the
/// script runs out every wait returns `Timeout`.
pub struct FakeInterrupt {
    events: Vec<InterruptEvent>,
    next: usize,
    pre_delay: Duration,
}

impl FakeInterrupt {
    pub fn new(events: Vec<InterruptEvent>) -> Self {
        Self {
            events,
            next: 0,
            pre_delay: Duration::from_millis(20),
        }
    }

    /// `count` falling edges, then timeouts forever
    pub fn edges(count: usize) -> Self {
        Self::new(vec![InterruptEvent::Edge; count])
    }

    /// Like [`Self::edges`] but pausing `delay` before each event, so a test
    /// can observe the session between deliveries
    pub fn edges_after(count: usize, delay: Duration) -> Self {
        Self {
            events: vec![InterruptEvent::Edge; count],
            next: 0,
            pre_delay: delay,
        }
    }
}

impl InterruptSource for FakeInterrupt {
    fn wait(&mut self, timeout_ms: isize) -> Result<InterruptEvent> {
        sleep(self.pre_delay);
        match self.events.get(self.next) {
            Some(event) => {
                self.next += 1;
                Ok(*event)
            }
            None => {
                // behave like a quiet line, not a busy loop
                sleep(Duration::from_millis((timeout_ms.max(0) as u64).min(50)));
                Ok(InterruptEvent::Timeout)
            }
        }
    }
}
