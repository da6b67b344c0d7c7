//! DMP firmware loading
//!
//! The firmware blob is InvenSense's proprietary motion driver image. It is
//! not distributable with this crate, so it is read from a file at runtime
//! (`Config::firmware_path`, typically under `/lib/firmware/`) and pushed
//! into DMP memory in 16-byte chunks with read-back verification.

use std::fs;
use std::path::Path;

use log::debug;

use crate::device::Mpu9250;
use crate::interface::RegisterBus;
use crate::registers::PRGM_START_H;
use crate::{Error, Result};

/// Size of the motion driver firmware image
pub const DMP_CODE_SIZE: usize = 3062;
/// Program entry point written to PRGM_START_H
pub const DMP_START_ADDRESS: u16 = 0x0400;
/// Chunk size for loads; divides the bank size so no chunk crosses a bank
const DMP_LOAD_CHUNK: usize = 16;

/// Read the firmware image from disk and check its size
pub fn read_firmware_image(path: &Path) -> Result<Vec<u8>> {
    let image = fs::read(path)?;
    if image.len() != DMP_CODE_SIZE {
        return Err(Error::Firmware("firmware image has wrong size"));
    }
    Ok(image)
}

impl<B: RegisterBus> Mpu9250<B> {
    /// Load the motion driver firmware into DMP memory
    ///
    /// Every chunk is read back and compared; any mismatch means the
    /// transport corrupted the write and the DMP must not be started.
    pub fn load_firmware(&mut self, image: &[u8]) -> Result<()> {
        if image.len() != DMP_CODE_SIZE {
            return Err(Error::Firmware("firmware image has wrong size"));
        }
        self.bus.set_device_address(self.config.i2c_addr);

        let mut verify = [0u8; DMP_LOAD_CHUNK];
        for (i, chunk) in image.chunks(DMP_LOAD_CHUNK).enumerate() {
            let addr = (i * DMP_LOAD_CHUNK) as u16;
            self.write_mem(addr, chunk)?;
            self.read_mem(addr, &mut verify[..chunk.len()])?;
            if &verify[..chunk.len()] != chunk {
                return Err(Error::Firmware("firmware verification failed"));
            }
        }
        debug!("dmp firmware loaded, {} bytes", image.len());

        self.bus
            .write_registers(PRGM_START_H, &DMP_START_ADDRESS.to_be_bytes())
    }
}
