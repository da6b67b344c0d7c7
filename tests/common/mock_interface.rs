//! Mock register bus for driver tests
//!
//! Simulates the MPU-9250 register file, the AK8963 behind bypass mode, the
//! banked DMP memory window and the hardware FIFO. State lives behind an
//! `Arc<Mutex<..>>` so a clone of the mock can inspect traffic while the
//! acquisition thread owns the original.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use mpu9250_dmp::registers::*;
use mpu9250_dmp::{Error, RegisterBus, Result};

/// One bus transaction as seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Register read at a device address
    Read { addr: u8, reg: u8, len: usize },
    /// Register write at a device address
    Write { addr: u8, reg: u8, data: Vec<u8> },
}

#[derive(Debug, Default)]
struct MockState {
    /// MPU register file
    registers: HashMap<u8, u8>,
    /// AK8963 register file, reachable at address 0x0C
    mag_registers: HashMap<u8, u8>,
    current_address: u8,

    /// DMP memory, 256-byte banks behind BANK_SEL/MEM_R_W
    dmp_memory: HashMap<u16, u8>,
    mem_pointer: u16,

    /// Bytes waiting in the hardware FIFO
    fifo: VecDeque<u8>,
    /// Blobs that refill the FIFO one at a time whenever its count is read
    /// while empty
    pending_fifo: VecDeque<Vec<u8>>,

    operations: Vec<Operation>,

    fail_next_read: bool,
    fail_next_write: bool,
    /// Flip the first byte read back from DMP memory (firmware verify tests)
    corrupt_mem_readback: bool,
}

/// Cloneable handle to the simulated device
#[derive(Clone)]
pub struct MockBus {
    state: Arc<Mutex<MockState>>,
}

fn bus_err(msg: &str) -> Error {
    Error::Bus(Box::new(std::io::Error::new(
        std::io::ErrorKind::Other,
        msg.to_string(),
    )))
}

impl MockBus {
    /// A powered, healthy device with a valid identity
    pub fn new() -> Self {
        let mut state = MockState {
            current_address: MPU_I2C_ADDR,
            ..MockState::default()
        };
        state.registers.insert(WHO_AM_I, 0x71);
        // AK8963 fuse ROM sensitivity of exactly 1.0 on every axis
        state.mag_registers.insert(AK8963_ASAX, 128);
        state.mag_registers.insert(AK8963_ASAX + 1, 128);
        state.mag_registers.insert(AK8963_ASAX + 2, 128);
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Overwrite the WHO_AM_I response
    pub fn set_who_am_i(&self, value: u8) {
        self.lock().registers.insert(WHO_AM_I, value);
    }

    /// Preload an MPU register
    pub fn set_register(&self, reg: u8, value: u8) {
        self.lock().registers.insert(reg, value);
    }

    /// Preload consecutive MPU registers
    pub fn set_registers(&self, start: u8, values: &[u8]) {
        let mut state = self.lock();
        for (i, v) in values.iter().enumerate() {
            state.registers.insert(start + i as u8, *v);
        }
    }

    /// Current value of an MPU register (0 if never written)
    pub fn register(&self, reg: u8) -> u8 {
        *self.lock().registers.get(&reg).unwrap_or(&0)
    }

    /// Preload an AK8963 register
    pub fn set_mag_register(&self, reg: u8, value: u8) {
        self.lock().mag_registers.insert(reg, value);
    }

    /// Value of an AK8963 register (0 if never written)
    pub fn mag_register(&self, reg: u8) -> u8 {
        *self.lock().mag_registers.get(&reg).unwrap_or(&0)
    }

    /// Make a fresh magnetometer sample available
    pub fn set_mag_sample(&self, x: i16, y: i16, z: i16, st2: u8) {
        let mut state = self.lock();
        state.mag_registers.insert(AK8963_ST1, AK8963_DATA_READY);
        for (i, v) in [x, y, z].into_iter().enumerate() {
            let [lo, hi] = v.to_le_bytes();
            state.mag_registers.insert(AK8963_XOUT_L + 2 * i as u8, lo);
            state
                .mag_registers
                .insert(AK8963_XOUT_L + 2 * i as u8 + 1, hi);
        }
        state.mag_registers.insert(AK8963_ST2, st2);
    }

    /// Queue a blob that will appear in the FIFO the next time its count is
    /// read while the FIFO is empty
    pub fn queue_fifo(&self, bytes: Vec<u8>) {
        self.lock().pending_fifo.push_back(bytes);
    }

    /// Byte at a DMP memory location, if anything was written there
    pub fn dmp_memory(&self, mem_addr: u16) -> Option<u8> {
        self.lock().dmp_memory.get(&mem_addr).copied()
    }

    /// Fail the next read with a bus error
    pub fn fail_next_read(&self) {
        self.lock().fail_next_read = true;
    }

    /// Fail the next write with a bus error
    pub fn fail_next_write(&self) {
        self.lock().fail_next_write = true;
    }

    /// Corrupt the next DMP memory read-back
    pub fn corrupt_mem_readback(&self) {
        self.lock().corrupt_mem_readback = true;
    }

    /// Every transaction seen so far
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().operations.clone()
    }

    /// Whether `reg` was ever written with `value` at the MPU address
    pub fn wrote(&self, reg: u8, value: u8) -> bool {
        self.lock().operations.iter().any(|op| {
            matches!(op, Operation::Write { addr, reg: r, data }
                if *addr == MPU_I2C_ADDR && *r == reg && data.as_slice() == [value])
        })
    }

    /// How many times `sequence` appeared as consecutive single-byte writes
    /// at the MPU address, in the given order
    pub fn wrote_sequence(&self, sequence: &[(u8, u8)]) -> usize {
        let writes: Vec<(u8, u8)> = self
            .lock()
            .operations
            .iter()
            .filter_map(|op| match op {
                Operation::Write { addr, reg, data }
                    if *addr == MPU_I2C_ADDR && data.len() == 1 =>
                {
                    Some((*reg, data[0]))
                }
                _ => None,
            })
            .collect();
        writes.windows(sequence.len()).filter(|w| *w == sequence).count()
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockState {
    fn read_byte(&mut self, reg: u8) -> u8 {
        if self.current_address == AK8963_I2C_ADDR {
            let value = *self.mag_registers.get(&reg).unwrap_or(&0);
            // reading ST2 ends the measurement cycle
            if reg == AK8963_ST2 {
                self.mag_registers.insert(AK8963_ST1, 0);
            }
            return value;
        }
        match reg {
            // count high and low bytes
            FIFO_COUNTH => {
                if self.fifo.is_empty() {
                    if let Some(blob) = self.pending_fifo.pop_front() {
                        self.fifo.extend(blob);
                    }
                }
                (self.fifo.len() as u16 >> 8) as u8
            }
            r if r == FIFO_COUNTH + 1 => (self.fifo.len() & 0xFF) as u8,
            FIFO_R_W => self.fifo.pop_front().unwrap_or(0),
            MEM_R_W => {
                let value = *self.dmp_memory.get(&self.mem_pointer).unwrap_or(&0);
                self.mem_pointer = self.mem_pointer.wrapping_add(1);
                value
            }
            _ => *self.registers.get(&reg).unwrap_or(&0),
        }
    }

    fn write_byte(&mut self, reg: u8, value: u8) {
        if self.current_address == AK8963_I2C_ADDR {
            self.mag_registers.insert(reg, value);
            return;
        }
        match reg {
            FIFO_R_W => {
                self.fifo.push_back(value);
            }
            MEM_R_W => {
                self.dmp_memory.insert(self.mem_pointer, value);
                self.mem_pointer = self.mem_pointer.wrapping_add(1);
            }
            USER_CTRL => {
                if value & BIT_FIFO_RST != 0 {
                    self.fifo.clear();
                }
                self.registers.insert(reg, value);
            }
            _ => {
                self.registers.insert(reg, value);
            }
        }
    }
}

impl RegisterBus for MockBus {
    fn read_register(&mut self, reg: u8) -> Result<u8> {
        let mut state = self.lock();
        if state.fail_next_read {
            state.fail_next_read = false;
            return Err(bus_err("injected read failure"));
        }
        let addr = state.current_address;
        let value = state.read_byte(reg);
        state.operations.push(Operation::Read { addr, reg, len: 1 });
        Ok(value)
    }

    fn read_registers(&mut self, reg: u8, buf: &mut [u8]) -> Result<()> {
        let mut state = self.lock();
        if state.fail_next_read {
            state.fail_next_read = false;
            return Err(bus_err("injected read failure"));
        }
        let addr = state.current_address;
        // FIFO and memory windows do not auto-increment the register
        let windowed = reg == FIFO_R_W || reg == MEM_R_W;
        for (i, slot) in buf.iter_mut().enumerate() {
            let r = if windowed { reg } else { reg + i as u8 };
            *slot = state.read_byte(r);
        }
        if reg == MEM_R_W && state.corrupt_mem_readback {
            state.corrupt_mem_readback = false;
            buf[0] ^= 0xFF;
        }
        state.operations.push(Operation::Read {
            addr,
            reg,
            len: buf.len(),
        });
        Ok(())
    }

    fn write_register(&mut self, reg: u8, value: u8) -> Result<()> {
        self.write_registers(reg, &[value])
    }

    fn write_registers(&mut self, reg: u8, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if state.fail_next_write {
            state.fail_next_write = false;
            return Err(bus_err("injected write failure"));
        }
        let addr = state.current_address;
        if addr != AK8963_I2C_ADDR && reg == BANK_SEL && data.len() == 2 {
            state.mem_pointer = u16::from_be_bytes([data[0], data[1]]);
        } else {
            let windowed = reg == FIFO_R_W || reg == MEM_R_W;
            for (i, byte) in data.iter().enumerate() {
                let r = if windowed { reg } else { reg + i as u8 };
                state.write_byte(r, *byte);
            }
        }
        state.operations.push(Operation::Write {
            addr,
            reg,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn set_device_address(&mut self, addr: u8) {
        self.lock().current_address = addr;
    }
}
