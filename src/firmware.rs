//! Firmware packet decoding and flash programming.
//!
//! UPLOAD frames carry one packet:
//!
//! ```text
//! [packet_index:4 LE][packet_total:4 LE][crc32:4 LE][payload:<= packet_size]
//! ```
//!
//! The CRC is carried for the host's benefit and is not checked here.

use crate::config::BootConfig;
use crate::error::ErrorCode;
use crate::hal::Flash;

/// Index, total and CRC fields preceding the payload
pub const CHUNK_HEADER_LEN: usize = 12;

/// Value of erased flash, used to pad short packets
pub const ERASED_BYTE: u8 = 0xFF;

/// Largest program unit supported by the writer
pub const MAX_PROGRAM_UNIT: usize = 256;

/// A decoded UPLOAD payload
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FirmwareChunk<'a> {
    pub packet_index: u32,
    pub packet_total: u32,
    pub crc32: u32,
    pub payload: &'a [u8],
}

impl<'a> FirmwareChunk<'a> {
    /// Split UPLOAD frame data into header fields and payload
    pub fn decode(data: &'a [u8]) -> Result<Self, ErrorCode> {
        if data.len() < CHUNK_HEADER_LEN {
            return Err(ErrorCode::InvalidFirmwareData);
        }

        let word = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);

        Ok(Self {
            packet_index: word(0),
            packet_total: word(4),
            crc32: word(8),
            payload: &data[CHUNK_HEADER_LEN..],
        })
    }

    /// Encode header and payload into `out`, returning the length used
    pub fn encode(&self, out: &mut [u8]) -> Option<usize> {
        let len = CHUNK_HEADER_LEN + self.payload.len();
        if out.len() < len {
            return None;
        }

        out[0..4].copy_from_slice(&self.packet_index.to_le_bytes());
        out[4..8].copy_from_slice(&self.packet_total.to_le_bytes());
        out[8..12].copy_from_slice(&self.crc32.to_le_bytes());
        out[CHUNK_HEADER_LEN..len].copy_from_slice(self.payload);

        Some(len)
    }
}

/// Flash address the packet lands at, if aligned and inside the application
/// region. Packets must span whole program units so no write spills into the
/// next packet or past `flash_end`.
pub fn target_address(config: &BootConfig, packet_index: u32) -> Result<u32, ErrorCode> {
    let offset = packet_index
        .checked_mul(config.packet_size)
        .ok_or(ErrorCode::FlashError)?;
    let target = config
        .app_address
        .checked_add(offset)
        .ok_or(ErrorCode::FlashError)?;

    let unit = config.program_unit;
    if config.packet_size == 0
        || unit == 0
        || config.packet_size % unit != 0
        || target % unit != 0
    {
        return Err(ErrorCode::FlashError);
    }

    let last = target
        .checked_add(config.packet_size - 1)
        .ok_or(ErrorCode::FlashError)?;
    if last > config.flash_end {
        return Err(ErrorCode::FlashError);
    }

    Ok(target)
}

/// Validate an UPLOAD frame's data and program its packet into flash.
///
/// The whole packet is written, short payloads padded with erased bytes. Flash
/// is locked again whatever the outcome. A failed packet is not rolled back,
/// the host re-sends it.
pub fn program<F>(config: &BootConfig, flash: &mut F, data: &[u8]) -> Result<(), ErrorCode>
where
    F: Flash,
{
    let chunk = FirmwareChunk::decode(data)?;

    if chunk.packet_index >= chunk.packet_total {
        warn!(
            "Packet index {} out of range (total {})",
            chunk.packet_index, chunk.packet_total
        );
        return Err(ErrorCode::InvalidFirmwareData);
    }

    if chunk.payload.len() > config.packet_size as usize {
        warn!(
            "Packet payload {} exceeds packet size {}",
            chunk.payload.len(),
            config.packet_size
        );
        return Err(ErrorCode::InvalidFirmwareData);
    }

    let unit = config.program_unit as usize;
    if unit == 0 || unit > MAX_PROGRAM_UNIT {
        return Err(ErrorCode::FlashError);
    }

    let target = target_address(config, chunk.packet_index).map_err(|e| {
        warn!("Packet {} has no valid target address", chunk.packet_index);
        e
    })?;

    debug!(
        "Programming packet {}/{} at 0x{:08x} ({} bytes)",
        chunk.packet_index + 1,
        chunk.packet_total,
        target,
        chunk.payload.len()
    );

    if let Err(e) = flash.unlock() {
        error!("Flash unlock failed: {:?}", e);
        return Err(ErrorCode::FlashError);
    }

    let written = write_packet(flash, target, chunk.payload, config.packet_size as usize, unit);

    if let Err(e) = flash.lock() {
        error!("Flash lock failed: {:?}", e);
        return Err(ErrorCode::FlashError);
    }

    written
}

fn write_packet<F: Flash>(
    flash: &mut F,
    target: u32,
    payload: &[u8],
    packet_size: usize,
    unit: usize,
) -> Result<(), ErrorCode> {
    let mut buf = [ERASED_BYTE; MAX_PROGRAM_UNIT];

    for offset in (0..packet_size).step_by(unit) {
        let word = &mut buf[..unit];
        word.iter_mut().for_each(|b| *b = ERASED_BYTE);

        if offset < payload.len() {
            let end = core::cmp::min(offset + unit, payload.len());
            word[..end - offset].copy_from_slice(&payload[offset..end]);
        }

        let address = target + offset as u32;
        if let Err(e) = flash.program(address, word) {
            error!("Flash program failed at 0x{:08x}: {:?}", address, e);
            return Err(ErrorCode::FlashError);
        }
    }

    Ok(())
}
