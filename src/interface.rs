//! Bus interface for the MPU-9250
//!
//! The driver talks to the device through the [`RegisterBus`] trait so tests
//! can substitute a mock. The production implementation wraps any
//! `embedded_hal::i2c::I2c` bus, typically `linux_embedded_hal::I2cdev`.
//!
//! The module also carries the process-wide advisory bus claim. The claim
//! does not block anyone; it lets the acquisition thread and foreground
//! helpers warn when they are about to stomp on each other's transactions.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::registers::MPU_I2C_ADDR;
use crate::{Error, Result};

/// Register-oriented bus access, addressable per peripheral
///
/// All multi-byte transfers are single bus transactions (register address
/// followed by a burst), which the FIFO and DMP memory windows require.
pub trait RegisterBus: Send {
    /// Read one register
    fn read_register(&mut self, reg: u8) -> Result<u8>;
    /// Burst-read consecutive registers (or a FIFO window) into `buf`
    fn read_registers(&mut self, reg: u8, buf: &mut [u8]) -> Result<()>;
    /// Write one register
    fn write_register(&mut self, reg: u8, value: u8) -> Result<()>;
    /// Burst-write `data` starting at `reg` in one transaction
    fn write_registers(&mut self, reg: u8, data: &[u8]) -> Result<()>;
    /// Switch which peripheral address subsequent transfers target
    ///
    /// Used to reach the AK8963 at its own address while bypass mode is on.
    fn set_device_address(&mut self, addr: u8);
}

/// I2C implementation of [`RegisterBus`]
pub struct I2cBus<I2C> {
    i2c: I2C,
    address: u8,
    bus_id: u8,
}

impl<I2C> I2cBus<I2C> {
    /// Wrap an I2C peripheral, targeting the default MPU address (0x68)
    ///
    /// `bus_id` identifies the bus for the advisory claim (e.g. 2 for
    /// `/dev/i2c-2`).
    pub const fn new(i2c: I2C, bus_id: u8) -> Self {
        Self {
            i2c,
            address: MPU_I2C_ADDR,
            bus_id,
        }
    }

    /// Wrap an I2C peripheral with a non-default device address
    pub const fn with_address(i2c: I2C, bus_id: u8, address: u8) -> Self {
        Self {
            i2c,
            address,
            bus_id,
        }
    }

    /// Advisory claim identifier for this bus
    pub const fn bus_id(&self) -> u8 {
        self.bus_id
    }

    /// Consume the wrapper and return the I2C peripheral
    pub fn release(self) -> I2C {
        self.i2c
    }
}

impl I2cBus<linux_embedded_hal::I2cdev> {
    /// Open a Linux I2C character device, e.g. `open("/dev/i2c-2", 2)`
    ///
    /// # Errors
    /// Returns [`Error::Bus`] if the device node cannot be opened.
    pub fn open(path: &str, bus_id: u8) -> Result<Self> {
        let i2c = linux_embedded_hal::I2cdev::new(path).map_err(|e| Error::Bus(Box::new(e)))?;
        Ok(Self::new(i2c, bus_id))
    }
}

impl<I2C, E> RegisterBus for I2cBus<I2C>
where
    I2C: embedded_hal::i2c::I2c<Error = E> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    fn read_register(&mut self, reg: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(self.address, &[reg], &mut buf)
            .map_err(|e| Error::Bus(Box::new(e)))?;
        Ok(buf[0])
    }

    fn read_registers(&mut self, reg: u8, buf: &mut [u8]) -> Result<()> {
        self.i2c
            .write_read(self.address, &[reg], buf)
            .map_err(|e| Error::Bus(Box::new(e)))
    }

    fn write_register(&mut self, reg: u8, value: u8) -> Result<()> {
        self.i2c
            .write(self.address, &[reg, value])
            .map_err(|e| Error::Bus(Box::new(e)))
    }

    fn write_registers(&mut self, reg: u8, data: &[u8]) -> Result<()> {
        // Register address plus up to 32 payload bytes in one transaction
        let mut buffer = [0u8; 33];
        if data.len() > 32 {
            return Err(Error::InvalidConfig("burst write longer than 32 bytes"));
        }
        buffer[0] = reg;
        let len = data.len();
        buffer[1..=len].copy_from_slice(&data[..len]);
        self.i2c
            .write(self.address, &buffer[..=len])
            .map_err(|e| Error::Bus(Box::new(e)))
    }

    fn set_device_address(&mut self, addr: u8) {
        self.address = addr;
    }
}

const MAX_BUS: usize = 16;

static BUS_CLAIMED: [AtomicBool; MAX_BUS] =
    [const { AtomicBool::new(false) }; MAX_BUS];

/// Mark a bus as in use by this module. Returns the previous state.
pub fn claim_bus(bus_id: u8) -> bool {
    BUS_CLAIMED[bus_id as usize % MAX_BUS].swap(true, Ordering::SeqCst)
}

/// Release the advisory claim on a bus
pub fn release_bus(bus_id: u8) {
    BUS_CLAIMED[bus_id as usize % MAX_BUS].store(false, Ordering::SeqCst);
}

/// Whether someone currently holds the advisory claim on a bus
pub fn bus_claimed(bus_id: u8) -> bool {
    BUS_CLAIMED[bus_id as usize % MAX_BUS].load(Ordering::SeqCst)
}
