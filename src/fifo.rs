//! DMP FIFO packet parsing
//!
//! Every DMP batch lands in the hardware FIFO as one fixed-size packet:
//! a 16-byte big-endian quaternion, optionally 6 bytes of raw accel and 6 of
//! raw gyro, then 4 gesture bytes. The interrupt normally fires once per
//! packet, but when servicing slips behind a few packets pile up; the
//! occupancy policy below picks which packet to parse and when to give up
//! and reset the FIFO instead.

use log::warn;

use crate::data::{MpuData, TapDirection, TapEvent};
use crate::device::Mpu9250;
use crate::interface::RegisterBus;
use crate::math::quaternion::Quaternion;
use crate::Result;

/// Packet length with quaternion and gesture data only
pub const FIFO_LEN_QUAT_TAP: usize = 20;
/// Packet length with raw accel and gyro as well
pub const FIFO_LEN_QUAT_ACCEL_GYRO_TAP: usize = 32;
/// Largest burst the occupancy policy will ever read (5 packets)
pub const MAX_FIFO_BUFFER: usize = FIFO_LEN_QUAT_ACCEL_GYRO_TAP * 5;

// The DMP quaternion is Q30; shifted to Q14 its squared magnitude must be
// 2^28 within a 2^16 tolerance
const QUAT_ERROR_THRESH: i64 = 1 << 16;
const QUAT_MAG_SQ_NORMALIZED: i64 = 1 << 28;
const QUAT_MAG_SQ_MIN: i64 = QUAT_MAG_SQ_NORMALIZED - QUAT_ERROR_THRESH;
const QUAT_MAG_SQ_MAX: i64 = QUAT_MAG_SQ_NORMALIZED + QUAT_ERROR_THRESH;

/// Tap flag bit in the second gesture byte
const INT_SRC_TAP: u8 = 0x01;

/// What the occupancy policy decided about the FIFO contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FifoOccupancy {
    /// Nothing buffered
    Empty,
    /// Read everything, parse the packet starting at this byte offset
    ParseAt(usize),
    /// Not a whole number of packets (or more than five); reset required
    Invalid,
}

/// Decide how to handle `fifo_count` buffered bytes
///
/// One packet parses at offset 0. Two packets parse at one packet length
/// in, three to five at two packet lengths in; the offsets are kept exactly
/// as consumers have historically calibrated their latency against them.
pub(crate) fn occupancy(fifo_count: u16, packet_len: usize) -> FifoOccupancy {
    let count = fifo_count as usize;
    if count == 0 {
        FifoOccupancy::Empty
    } else if count == packet_len {
        FifoOccupancy::ParseAt(0)
    } else if count == 2 * packet_len {
        FifoOccupancy::ParseAt(packet_len)
    } else if count == 3 * packet_len || count == 4 * packet_len || count == 5 * packet_len {
        FifoOccupancy::ParseAt(2 * packet_len)
    } else {
        FifoOccupancy::Invalid
    }
}

/// Check the Q14 squared magnitude of the raw quaternion words
pub(crate) fn quaternion_in_bounds(words: [i32; 4]) -> bool {
    let mut mag_sq: i64 = 0;
    for w in words {
        let q14 = i64::from(w >> 16);
        mag_sq += q14 * q14;
    }
    (QUAT_MAG_SQ_MIN..=QUAT_MAG_SQ_MAX).contains(&mag_sq)
}

/// One parsed DMP packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DmpPacket {
    pub quat: Quaternion,
    pub raw_accel: Option<[i16; 3]>,
    pub raw_gyro: Option<[i16; 3]>,
    pub tap: Option<TapEvent>,
}

/// Parse one packet at `offset`; `None` means the quaternion failed the
/// magnitude check and the FIFO should be reset
pub(crate) fn parse_packet(raw: &[u8], offset: usize, packet_len: usize) -> Option<DmpPacket> {
    let mut i = offset;
    let mut words = [0i32; 4];
    for (j, w) in words.iter_mut().enumerate() {
        *w = i32::from_be_bytes([
            raw[i + 4 * j],
            raw[i + 4 * j + 1],
            raw[i + 4 * j + 2],
            raw[i + 4 * j + 3],
        ]);
    }
    i += 16;
    if !quaternion_in_bounds(words) {
        return None;
    }

    // normalize in double precision, the raw fixed-point values are huge
    let q = Quaternion::new(
        f64::from(words[0]),
        f64::from(words[1]),
        f64::from(words[2]),
        f64::from(words[3]),
    )
    .normalize();

    let (raw_accel, raw_gyro) = if packet_len == FIFO_LEN_QUAT_ACCEL_GYRO_TAP {
        let mut accel = [0i16; 3];
        for (j, a) in accel.iter_mut().enumerate() {
            *a = i16::from_be_bytes([raw[i + 2 * j], raw[i + 2 * j + 1]]);
        }
        i += 6;
        let mut gyro = [0i16; 3];
        for (j, g) in gyro.iter_mut().enumerate() {
            *g = i16::from_be_bytes([raw[i + 2 * j], raw[i + 2 * j + 1]]);
        }
        i += 6;
        (Some(accel), Some(gyro))
    } else {
        (None, None)
    };

    let tap = if raw[i + 1] & INT_SRC_TAP != 0 {
        let tap_bits = raw[i + 3] & 0x3f;
        let raw_direction = tap_bits >> 3;
        Some(TapEvent {
            direction: TapDirection::from_raw(raw_direction),
            raw_direction,
        })
    } else {
        None
    };

    Some(DmpPacket {
        quat: q,
        raw_accel,
        raw_gyro,
        tap,
    })
}

/// Result of servicing one DMP interrupt
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum DmpFifoRead {
    /// Nothing usable this cycle (empty, corrupt, or reset performed)
    NoData,
    /// Fresh data was written into the caller's [`MpuData`]
    Data { tap: Option<TapEvent> },
}

impl<B: RegisterBus> Mpu9250<B> {
    /// Service the DMP FIFO once: apply the occupancy policy, read, parse
    /// and update `data`
    ///
    /// `first_run` suppresses the warnings that are expected while the DMP
    /// is still spinning up.
    pub(crate) fn read_dmp_fifo(
        &mut self,
        packet_len: usize,
        first_run: bool,
        data: &mut MpuData,
    ) -> Result<DmpFifoRead> {
        debug_assert!(
            packet_len == FIFO_LEN_QUAT_TAP || packet_len == FIFO_LEN_QUAT_ACCEL_GYRO_TAP
        );
        self.bus.set_device_address(self.config.i2c_addr);
        let fifo_count = self.fifo_count()?;

        let offset = match occupancy(fifo_count, packet_len) {
            FifoOccupancy::Empty => {
                if self.config.show_warnings && !first_run {
                    warn!("empty fifo");
                }
                return Ok(DmpFifoRead::NoData);
            }
            FifoOccupancy::ParseAt(offset) => {
                if offset != 0 && self.config.show_warnings && !first_run {
                    warn!(
                        "fifo contains {} packets",
                        fifo_count as usize / packet_len
                    );
                }
                offset
            }
            FifoOccupancy::Invalid => {
                if self.config.show_warnings && !first_run {
                    warn!("{fifo_count} bytes in fifo, expected multiple of {packet_len}");
                }
                self.reset_fifo()?;
                return Ok(DmpFifoRead::NoData);
            }
        };

        let mut raw = [0u8; MAX_FIFO_BUFFER];
        self.read_fifo(&mut raw[..fifo_count as usize])?;

        let Some(packet) = parse_packet(&raw, offset, packet_len) else {
            if self.config.show_warnings {
                warn!("quaternion out of bounds, fifo_count: {fifo_count}");
            }
            self.reset_fifo()?;
            return Ok(DmpFifoRead::NoData);
        };

        data.dmp_quat = packet.quat;
        data.dmp_tait_bryan = packet.quat.to_tait_bryan();
        if let Some(accel) = packet.raw_accel {
            data.raw_accel = accel;
            for j in 0..3 {
                data.accel[j] = f64::from(accel[j]) * self.accel_to_ms2;
            }
            data.accel_to_ms2 = self.accel_to_ms2;
        }
        if let Some(gyro) = packet.raw_gyro {
            data.raw_gyro = gyro;
            for j in 0..3 {
                data.gyro[j] = f64::from(gyro[j]) * self.gyro_to_degs;
            }
            data.gyro_to_degs = self.gyro_to_degs;
        }
        if packet.tap.is_some() {
            data.last_tap = packet.tap;
        }
        Ok(DmpFifoRead::Data { tap: packet.tap })
    }
}
