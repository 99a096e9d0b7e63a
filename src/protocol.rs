//! Frame format shared by the bootloader and the host.
//!
//! ```text
//! [0xAA][0x55][command:1][data_length:2 LE][data:data_length][checksum:1]
//! ```
//!
//! The checksum is the bitwise NOT of the byte sum of everything from the
//! command byte to the end of the data. The two header bytes are not covered.

use core::convert::TryFrom;

use thiserror::Error;

pub const FRAME_HEADER1: u8 = 0xAA;
pub const FRAME_HEADER2: u8 = 0x55;

/// Capacity of a frame's data field. Frames must declare strictly less.
pub const MAX_DATA: usize = 2048;

/// Header (2) + command (1) + length (2) + checksum (1)
pub const FRAME_OVERHEAD: usize = 6;

/// Largest frame the builder will ever produce
pub const MAX_FRAME: usize = MAX_DATA - 1 + FRAME_OVERHEAD;

/// Lower sentinel, commands must be strictly greater
pub const COMMAND_VALID_START: u8 = 0x00;
/// Upper sentinel, commands must be strictly less
pub const COMMAND_VALID_END: u8 = 0x08;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Enter maintenance mode and fetch the device information record
    EnterBoot = 0x01,

    /// Program one firmware packet
    Upload = 0x02,

    /// Verify the uploaded image
    Verify = 0x03,

    /// Leave the bootloader and start the application
    RunApp = 0x04,

    /// Positive acknowledgement, also accepted as a liveness probe
    Ack = 0x05,

    /// Negative acknowledgement
    Nack = 0x06,

    /// Error report, data carries the error code and message
    ErrorResponse = 0x07,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::EnterBoot,
        Command::Upload,
        Command::Verify,
        Command::RunApp,
        Command::Ack,
        Command::Nack,
        Command::ErrorResponse,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether a raw byte lies in the open interval between the sentinels
    pub fn is_valid(code: u8) -> bool {
        code > COMMAND_VALID_START && code < COMMAND_VALID_END
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x01 => Ok(Command::EnterBoot),
            0x02 => Ok(Command::Upload),
            0x03 => Ok(Command::Verify),
            0x04 => Ok(Command::RunApp),
            0x05 => Ok(Command::Ack),
            0x06 => Ok(Command::Nack),
            0x07 => Ok(Command::ErrorResponse),
            other => Err(other),
        }
    }
}

/// Errors returned by the frame builder
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("data length {0} exceeds frame capacity")]
    DataTooLong(usize),

    #[error("output buffer holds {available} bytes, frame needs {required}")]
    BufferTooSmall { required: usize, available: usize },
}

/// Running checksum over the command, length and data bytes of a frame.
///
/// Shared by the builder and the parser so both sides compute it over the
/// exact same byte sequence.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct Checksum(u8);

impl Checksum {
    pub(crate) fn push(&mut self, byte: u8) {
        self.0 = self.0.wrapping_add(byte);
    }

    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push(b);
        }
    }

    pub(crate) fn finish(self) -> u8 {
        !self.0
    }
}

/// Compute the frame checksum for a command, declared length and data
pub fn checksum(command: u8, data_length: u16, data: &[u8]) -> u8 {
    let mut sum = Checksum::default();
    sum.push(command);
    sum.extend(&data_length.to_le_bytes());
    sum.extend(data);
    sum.finish()
}

/// Number of bytes a frame carrying `data_len` bytes occupies on the wire
pub const fn frame_len(data_len: usize) -> usize {
    data_len + FRAME_OVERHEAD
}

/// Write a complete frame into `out`, returning the number of bytes used
pub fn build(command: Command, data: &[u8], out: &mut [u8]) -> Result<usize, BuildError> {
    if data.len() >= MAX_DATA {
        return Err(BuildError::DataTooLong(data.len()));
    }

    let required = frame_len(data.len());
    if out.len() < required {
        return Err(BuildError::BufferTooSmall {
            required,
            available: out.len(),
        });
    }

    let length = data.len() as u16;
    let mut index = 0;

    out[index] = FRAME_HEADER1;
    out[index + 1] = FRAME_HEADER2;
    index += 2;

    out[index] = command.code();
    index += 1;

    out[index..index + 2].copy_from_slice(&length.to_le_bytes());
    index += 2;

    out[index..index + data.len()].copy_from_slice(data);
    index += data.len();

    // Covers command through data, as written above
    let mut sum = Checksum::default();
    sum.extend(&out[2..index]);
    out[index] = sum.finish();
    index += 1;

    Ok(index)
}
