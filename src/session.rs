//! Driver session: bring-up state machines and the acquisition thread
//!
//! A [`Session`] owns the sensor in one of two modes. Polling mode keeps the
//! driver in the caller's thread for one-shot register reads. DMP mode hands
//! the driver to a real-time acquisition thread that blocks on the GPIO
//! interrupt line and refreshes a shared [`MpuData`] snapshot at the
//! configured rate.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::calibration::CalibrationStore;
use crate::config::{AccelDlpf, AccelFsr, Config, GyroDlpf, GyroFsr, DMP_MAX_SAMPLE_RATE, DMP_MIN_SAMPLE_RATE};
use crate::data::{MpuData, TapEvent, WakeReason};
use crate::device::Mpu9250;
use crate::dmp::{self, firmware::read_firmware_image};
use crate::fifo::DmpFifoRead;
use crate::fusion::FusionState;
use crate::interface::{bus_claimed, claim_bus, release_bus, RegisterBus};
use crate::interrupt::{InterruptEvent, InterruptSource};
use crate::registers::{ACCEL_CONFIG_2, BIT_FIFO_SIZE_1024};
use crate::{Error, Result};

/// How long the acquisition thread blocks on the interrupt line before
/// rechecking the shutdown flag, milliseconds
const IMU_POLL_TIMEOUT_MS: isize = 300;

/// How long `power_off` waits for the acquisition thread to exit
const THREAD_EXIT_TIMEOUT: Duration = Duration::from_secs(1);

type DataCallback = Box<dyn FnMut(&MpuData) + Send>;
type TapCallback = Box<dyn FnMut(TapEvent) + Send>;

/// State shared between the acquisition thread and consumer calls
struct SharedState {
    /// Monotonic origin for the interrupt and tap timestamps, so staleness
    /// queries cannot jump when the wall clock is stepped
    start: Instant,
    data: Mutex<MpuData>,
    data_ready: Condvar,
    tap_ready: Condvar,
    shutdown: AtomicBool,
    thread_running: AtomicBool,
    last_read_successful: AtomicBool,
    /// 0 means no interrupt has been seen yet
    last_interrupt_ns: AtomicU64,
    /// 0 means no tap has been seen yet
    last_tap_ns: AtomicU64,
    /// Publish counters, bumped under the data lock before each notify so
    /// waiters can tell a real wake from a spurious one
    data_seq: AtomicU64,
    tap_seq: AtomicU64,
    data_callback: Mutex<Option<DataCallback>>,
    tap_callback: Mutex<Option<TapCallback>>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            data: Mutex::new(MpuData::default()),
            data_ready: Condvar::new(),
            tap_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            thread_running: AtomicBool::new(false),
            last_read_successful: AtomicBool::new(false),
            last_interrupt_ns: AtomicU64::new(0),
            last_tap_ns: AtomicU64::new(0),
            data_seq: AtomicU64::new(0),
            tap_seq: AtomicU64::new(0),
            data_callback: Mutex::new(None),
            tap_callback: Mutex::new(None),
        }
    }

    /// Monotonic nanoseconds since this session was created
    fn monotonic_ns(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An initialized sensor in either polling or DMP mode
pub struct Session<B: RegisterBus + 'static> {
    config: Config,
    shared: Arc<SharedState>,
    /// Present in polling mode, or in DMP mode after `power_off` recovered
    /// the driver from the acquisition thread
    driver: Option<Mpu9250<B>>,
    thread: Option<JoinHandle<Mpu9250<B>>>,
}

impl<B: RegisterBus + 'static> Session<B> {
    /// Bring the sensor up for one-shot polled register reads
    ///
    /// Resets the device, verifies its identity, loads saved calibration and
    /// configures full-scale ranges and filters from `config`. No thread is
    /// started; use the `read_*` methods to sample.
    pub fn initialize(bus: B, config: Config) -> Result<Self> {
        if bus_claimed(config.i2c_bus) {
            // another session may be mid-transaction, but polling init is
            // what the caller asked for
            warn!("i2c bus claimed by another session, continuing anyway");
        }
        claim_bus(config.i2c_bus);
        let mut mpu = Mpu9250::new(bus, config.clone());
        let result = Self::polling_bringup(&mut mpu);
        release_bus(config.i2c_bus);
        result?;
        Ok(Self {
            config,
            shared: Arc::new(SharedState::new()),
            driver: Some(mpu),
            thread: None,
        })
    }

    fn polling_bringup(mpu: &mut Mpu9250<B>) -> Result<()> {
        mpu.reset()?;
        mpu.check_who_am_i()?;

        let store = CalibrationStore::from_config(mpu.config());
        mpu.write_gyro_offsets(store.load_gyro_offsets())?;

        // 1kHz internal sampling so reads always see fresh data
        mpu.set_sample_rate(1000)?;
        mpu.set_gyro_fsr()?;
        mpu.set_accel_fsr()?;
        mpu.set_gyro_dlpf()?;
        mpu.set_accel_dlpf()?;

        if mpu.config().enable_magnetometer {
            mpu.init_magnetometer()?;
            let (offsets, scales) = store.load_mag_calibration();
            mpu.set_mag_calibration(offsets, scales);
        } else {
            mpu.power_off_magnetometer()?;
        }
        Ok(())
    }

    /// Bring the sensor up in DMP mode and start the acquisition thread
    ///
    /// Loads the DMP firmware, programs the quaternion/tap features and
    /// spawns a thread that blocks on `interrupt` and refreshes the shared
    /// data snapshot at `config.dmp_sample_rate`. The thread asks for
    /// SCHED_FIFO priority and logs a warning if the process lacks the
    /// privilege to get it.
    pub fn initialize_dmp<I>(bus: B, interrupt: I, config: Config) -> Result<Self>
    where
        I: InterruptSource + 'static,
    {
        let config = validate_dmp_config(config)?;

        claim_bus(config.i2c_bus);
        let mut mpu = Mpu9250::new(bus, config.clone());
        let result = Self::dmp_bringup(&mut mpu);
        release_bus(config.i2c_bus);
        let packet_len = result?;

        let shared = Arc::new(SharedState::new());
        let thread_shared = Arc::clone(&shared);
        let thread_config = config.clone();
        let handle = thread::Builder::new()
            .name("mpu-dmp".into())
            .spawn(move || acquisition_loop(mpu, interrupt, thread_shared, thread_config, packet_len))?;
        shared.thread_running.store(true, Ordering::SeqCst);
        // give the thread a moment to start predictably
        thread::sleep(Duration::from_millis(1));

        Ok(Self {
            config,
            shared,
            driver: None,
            thread: Some(handle),
        })
    }

    fn dmp_bringup(mpu: &mut Mpu9250<B>) -> Result<usize> {
        mpu.reset()?;
        mpu.check_who_am_i()?;

        // the DMP needs the first 3kB of the shared memory, leave the last
        // 1kB to the FIFO
        mpu.bus
            .write_register(ACCEL_CONFIG_2, BIT_FIFO_SIZE_1024 | 0x8)?;

        let store = CalibrationStore::from_config(mpu.config());
        mpu.write_gyro_offsets(store.load_gyro_offsets())?;

        mpu.set_gyro_fsr()?;
        mpu.set_accel_fsr()?;
        mpu.set_gyro_dlpf()?;
        mpu.set_accel_dlpf()?;

        // the DMP filters internally at 200Hz regardless of the output rate
        mpu.set_sample_rate(dmp::DMP_SAMPLE_RATE)?;
        mpu.set_bypass(true)?;

        if mpu.config().enable_magnetometer {
            mpu.init_magnetometer()?;
            let (offsets, scales) = store.load_mag_calibration();
            mpu.set_mag_calibration(offsets, scales);
        } else {
            mpu.power_off_magnetometer()?;
        }

        mpu.dmp_en = true;
        let image = read_firmware_image(&mpu.config().firmware_path)?;
        mpu.load_firmware(&image)?;
        mpu.dmp_set_orientation(mpu.config().orientation.scalar())?;

        // the tap feature must stay enabled to get interrupts below 200Hz
        let mut features = dmp::FEATURE_6X_LP_QUAT | dmp::FEATURE_TAP;
        if mpu.config().dmp_auto_calibrate_gyro {
            features |= dmp::FEATURE_GYRO_CAL;
        }
        if mpu.config().dmp_fetch_accel_gyro {
            features |= dmp::FEATURE_SEND_RAW_ACCEL | dmp::FEATURE_SEND_ANY_GYRO;
        }
        let packet_len = mpu.dmp_enable_features(features)?;
        let rate = mpu.config().dmp_sample_rate;
        mpu.dmp_set_fifo_rate(rate)?;
        mpu.set_dmp_state(true)?;
        mpu.dmp_set_interrupt_mode_continuous()?;
        Ok(packet_len)
    }

    /// Latest snapshot of the sensor state
    pub fn data(&self) -> MpuData {
        lock(&self.shared.data).clone()
    }

    /// Install a closure called from the acquisition thread after each
    /// successful DMP read, replacing any previous one
    pub fn set_data_callback<F>(&self, callback: F)
    where
        F: FnMut(&MpuData) + Send + 'static,
    {
        *lock(&self.shared.data_callback) = Some(Box::new(callback));
    }

    /// Install a closure called from the acquisition thread when a tap
    /// gesture arrives, replacing any previous one
    pub fn set_tap_callback<F>(&self, callback: F)
    where
        F: FnMut(TapEvent) + Send + 'static,
    {
        *lock(&self.shared.tap_callback) = Some(Box::new(callback));
    }

    /// Sleep until the acquisition thread publishes the next DMP sample
    ///
    /// Returns the reason the call woke up so shutdown can be told apart
    /// from fresh data.
    pub fn block_until_data(&self) -> Result<WakeReason> {
        if self.shared.shutdown.load(Ordering::SeqCst)
            || !self.shared.thread_running.load(Ordering::SeqCst)
        {
            return Err(Error::NotRunning);
        }
        let mut guard = lock(&self.shared.data);
        let seen = self.shared.data_seq.load(Ordering::SeqCst);
        // re-enter the wait on a spurious wakeup, nothing was published
        while self.shared.data_seq.load(Ordering::SeqCst) == seen
            && !self.shared.shutdown.load(Ordering::SeqCst)
        {
            guard = self
                .shared
                .data_ready
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if self.shared.data_seq.load(Ordering::SeqCst) != seen {
            Ok(WakeReason::DataReady)
        } else {
            Ok(WakeReason::Shutdown)
        }
    }

    /// Sleep until the acquisition thread sees a tap gesture
    pub fn block_until_tap(&self) -> Result<WakeReason> {
        if self.shared.shutdown.load(Ordering::SeqCst)
            || !self.shared.thread_running.load(Ordering::SeqCst)
        {
            return Err(Error::NotRunning);
        }
        let mut guard = lock(&self.shared.data);
        let seen = self.shared.tap_seq.load(Ordering::SeqCst);
        while self.shared.tap_seq.load(Ordering::SeqCst) == seen
            && !self.shared.shutdown.load(Ordering::SeqCst)
        {
            guard = self
                .shared
                .tap_ready
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if self.shared.tap_seq.load(Ordering::SeqCst) != seen {
            Ok(WakeReason::TapDetected)
        } else {
            Ok(WakeReason::Shutdown)
        }
    }

    /// Nanoseconds elapsed since the last DMP interrupt, or
    /// [`Error::NotRunning`] if none has been seen yet
    pub fn nanos_since_last_interrupt(&self) -> Result<u64> {
        let last = self.shared.last_interrupt_ns.load(Ordering::SeqCst);
        if last == 0 {
            return Err(Error::NotRunning);
        }
        Ok(self.shared.monotonic_ns().saturating_sub(last))
    }

    /// Nanoseconds elapsed since the last tap gesture, or
    /// [`Error::NotRunning`] if none has been seen yet
    pub fn nanos_since_last_tap(&self) -> Result<u64> {
        let last = self.shared.last_tap_ns.load(Ordering::SeqCst);
        if last == 0 {
            return Err(Error::NotRunning);
        }
        Ok(self.shared.monotonic_ns().saturating_sub(last))
    }

    /// Whether the most recent interrupt produced a good DMP packet
    pub fn last_read_successful(&self) -> bool {
        self.shared.last_read_successful.load(Ordering::SeqCst)
    }

    fn polling_driver(&mut self) -> Result<&mut Mpu9250<B>> {
        self.driver.as_mut().ok_or(Error::InvalidConfig(
            "sensor registers belong to the acquisition thread in dmp mode",
        ))
    }

    /// Read the latest accelerometer sample (polling mode)
    pub fn read_accel(&mut self) -> Result<[f64; 3]> {
        let shared = Arc::clone(&self.shared);
        let mpu = self.polling_driver()?;
        let mut data = lock(&shared.data);
        mpu.read_accel(&mut data)?;
        Ok(data.accel)
    }

    /// Read the latest gyroscope sample (polling mode)
    pub fn read_gyro(&mut self) -> Result<[f64; 3]> {
        let shared = Arc::clone(&self.shared);
        let mpu = self.polling_driver()?;
        let mut data = lock(&shared.data);
        mpu.read_gyro(&mut data)?;
        Ok(data.gyro)
    }

    /// Read the die temperature (polling mode)
    pub fn read_temp(&mut self) -> Result<f64> {
        let shared = Arc::clone(&self.shared);
        let mpu = self.polling_driver()?;
        let mut data = lock(&shared.data);
        mpu.read_temp(&mut data)?;
        Ok(data.temp)
    }

    /// Read the magnetometer if a fresh sample is ready (polling mode)
    ///
    /// Returns `Ok(None)` when the AK8963 has not produced a new sample
    /// since the last read.
    pub fn read_mag(&mut self) -> Result<Option<[f64; 3]>> {
        let shared = Arc::clone(&self.shared);
        let mpu = self.polling_driver()?;
        let mut data = lock(&shared.data);
        if mpu.read_mag(&mut data)? {
            Ok(Some(data.mag))
        } else {
            Ok(None)
        }
    }

    /// Stop the acquisition thread and put the sensor to sleep
    ///
    /// Safe to call more than once. If the thread fails to exit within a
    /// second it is left detached and the registers are not touched.
    pub fn power_off(&mut self) -> Result<()> {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let deadline = Instant::now() + THREAD_EXIT_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                match handle.join() {
                    Ok(mpu) => self.driver = Some(mpu),
                    Err(_) => warn!("acquisition thread panicked"),
                }
            } else {
                warn!("acquisition thread exit timeout, leaving it detached");
                return Ok(());
            }
        }
        if let Some(mpu) = self.driver.as_mut() {
            claim_bus(self.config.i2c_bus);
            let result = mpu.power_down();
            release_bus(self.config.i2c_bus);
            result?;
        }
        Ok(())
    }

    /// Tear the session down and hand the bus back, powering the sensor
    /// down first
    pub fn release(mut self) -> Result<Option<B>> {
        self.power_off()?;
        Ok(self.driver.take().map(Mpu9250::release))
    }
}

/// Apply the DMP-mode constraints to a user config, warning where a value
/// has to be coerced and failing where no sensible coercion exists
fn validate_dmp_config(mut config: Config) -> Result<Config> {
    if !(DMP_MIN_SAMPLE_RATE..=DMP_MAX_SAMPLE_RATE).contains(&config.dmp_sample_rate) {
        return Err(Error::InvalidConfig("dmp_sample_rate must be 4..=200 Hz"));
    }
    if dmp::DMP_SAMPLE_RATE % config.dmp_sample_rate != 0 {
        return Err(Error::InvalidConfig(
            "dmp_sample_rate must divide 200 (200,100,50,40,25,20,10,8,5,4)",
        ));
    }
    if config.enable_magnetometer && config.compass_time_constant <= 0.1 {
        return Err(Error::InvalidConfig(
            "compass_time_constant must be greater than 0.1s",
        ));
    }
    if let Some(priority) = config.thread_priority {
        let min = unsafe { libc::sched_get_priority_min(libc::SCHED_FIFO) };
        let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
        if priority < min || priority > max {
            return Err(Error::InvalidConfig(
                "thread_priority outside the SCHED_FIFO range",
            ));
        }
    }
    // the DMP expects 184Hz bandwidth and the most permissive ranges
    if config.gyro_dlpf.wider_than_184() {
        warn!("gyro dlpf bandwidth must be <= 184Hz in dmp mode, coercing");
        config.gyro_dlpf = GyroDlpf::Bw184;
    }
    if config.accel_dlpf.wider_than_184() {
        warn!("accel dlpf bandwidth must be <= 184Hz in dmp mode, coercing");
        config.accel_dlpf = AccelDlpf::Bw184;
    }
    if config.gyro_fsr != GyroFsr::Fsr2000Dps {
        warn!("gyro FSR must be 2000DPS in dmp mode, coercing");
        config.gyro_fsr = GyroFsr::Fsr2000Dps;
    }
    if config.accel_fsr != AccelFsr::Fsr2G {
        warn!("accel FSR must be 2G in dmp mode, coercing");
        config.accel_fsr = AccelFsr::Fsr2G;
    }
    Ok(config)
}

fn request_sched_fifo(priority: Option<i32>) {
    let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
    let priority = priority.unwrap_or(max - 1);
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let ret = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if ret != 0 {
        warn!("failed to set SCHED_FIFO priority {priority} (need CAP_SYS_NICE), continuing");
    }
}

/// Body of the acquisition thread
///
/// Blocks on the interrupt line, services the DMP FIFO on each falling edge
/// and publishes the result. Returns the driver so `power_off` can put the
/// hardware to sleep after the thread exits.
fn acquisition_loop<B, I>(
    mut mpu: Mpu9250<B>,
    mut interrupt: I,
    shared: Arc<SharedState>,
    config: Config,
    packet_len: usize,
) -> Mpu9250<B>
where
    B: RegisterBus,
    I: InterruptSource,
{
    request_sched_fifo(config.thread_priority);

    // start the divider at its limit so the magnetometer is read on the
    // very first interrupt
    let mut mag_div_step = config.mag_sample_rate_div;
    let mut first_run = true;
    let mut fusion = config.enable_magnetometer.then(|| {
        FusionState::new(
            config.orientation,
            config.dmp_sample_rate,
            config.compass_time_constant,
            config.show_warnings,
        )
    });

    // the FIFO has been filling since dmp bringup, start from empty
    if let Err(e) = mpu.reset_fifo() {
        warn!("failed to reset FIFO at thread start: {e}");
    }

    while !shared.shutdown.load(Ordering::SeqCst) {
        let event = match interrupt.wait(IMU_POLL_TIMEOUT_MS) {
            Ok(event) => event,
            Err(e) => {
                warn!("interrupt line error: {e}");
                continue;
            }
        };
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        if event != InterruptEvent::Edge {
            continue;
        }
        let timestamp = shared.monotonic_ns();
        shared.last_interrupt_ns.store(timestamp, Ordering::SeqCst);

        // service the FIFO no matter the claim state, the data is perishable
        if bus_claimed(config.i2c_bus) {
            warn!("i2c bus claimed while servicing a DMP interrupt, reading anyway");
        }
        claim_bus(config.i2c_bus);

        let mut tap = None;
        {
            let mut data = lock(&shared.data);
            match mpu.read_dmp_fifo(packet_len, first_run, &mut data) {
                Ok(DmpFifoRead::Data { tap: packet_tap }) => {
                    shared.last_read_successful.store(true, Ordering::SeqCst);
                    if let Some(fusion) = fusion.as_mut() {
                        fusion.update(&mut data);
                    }
                    if let Some(event) = packet_tap {
                        shared.last_tap_ns.store(timestamp, Ordering::SeqCst);
                        tap = Some(event);
                    }
                }
                Ok(DmpFifoRead::NoData) => {
                    shared.last_read_successful.store(false, Ordering::SeqCst);
                }
                Err(e) => {
                    if config.show_warnings {
                        warn!("DMP FIFO read failed: {e}");
                    }
                    shared.last_read_successful.store(false, Ordering::SeqCst);
                }
            }

            if config.enable_magnetometer && !config.read_mag_after_callback {
                read_mag_divided(&mut mpu, &mut data, &mut mag_div_step, &config);
            }

            if first_run {
                // the filters have not settled, suppress consumers
                first_run = false;
            } else if shared.last_read_successful.load(Ordering::SeqCst) {
                if let Some(callback) = lock(&shared.data_callback).as_mut() {
                    callback(&data);
                }
                shared.data_seq.fetch_add(1, Ordering::SeqCst);
                shared.data_ready.notify_all();
                if let Some(event) = tap {
                    if let Some(callback) = lock(&shared.tap_callback).as_mut() {
                        callback(event);
                    }
                    shared.tap_seq.fetch_add(1, Ordering::SeqCst);
                    shared.tap_ready.notify_all();
                }
            }
        }

        if config.enable_magnetometer && config.read_mag_after_callback {
            let mut data = lock(&shared.data);
            read_mag_divided(&mut mpu, &mut data, &mut mag_div_step, &config);
        }
        release_bus(config.i2c_bus);
    }

    // wake anything still blocked before going away
    {
        let _data = lock(&shared.data);
        shared.data_ready.notify_all();
        shared.tap_ready.notify_all();
    }
    shared.thread_running.store(false, Ordering::SeqCst);
    debug!("acquisition thread exiting");
    mpu
}

/// Read the magnetometer every `mag_sample_rate_div`-th interrupt
fn read_mag_divided<B: RegisterBus>(
    mpu: &mut Mpu9250<B>,
    data: &mut MpuData,
    step: &mut u16,
    config: &Config,
) {
    if *step >= config.mag_sample_rate_div {
        match mpu.read_mag(data) {
            Ok(_) => {}
            Err(e) => {
                if config.show_warnings {
                    warn!("magnetometer read failed: {e}");
                }
            }
        }
        *step = 1;
    } else {
        *step += 1;
    }
}
