//! Byte-at-a-time frame decoder.

use core::convert::TryFrom;

use thiserror::Error;

use crate::protocol::{Checksum, Command, FRAME_HEADER1, FRAME_HEADER2, MAX_DATA};

/// A received command frame
#[derive(Clone)]
pub struct Frame {
    command: Command,
    data_length: u16,
    data: [u8; MAX_DATA],
    checksum: u8,
}

impl Frame {
    /// Create an empty frame for the provided command
    pub const fn new(command: Command) -> Self {
        Self {
            command,
            data_length: 0,
            data: [0u8; MAX_DATA],
            checksum: 0,
        }
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn data_length(&self) -> u16 {
        self.data_length
    }

    /// The received data, `data_length` bytes long
    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_length as usize]
    }

    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    fn clear(&mut self) {
        self.command = Command::Ack;
        self.data_length = 0;
        self.checksum = 0;
        self.data.iter_mut().for_each(|b| *b = 0);
    }
}

/// Only the received data takes part, the rest of the buffer is scratch
impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.command == other.command
            && self.data() == other.data()
            && self.checksum == other.checksum
    }
}

impl Eq for Frame {}

impl core::fmt::Debug for Frame {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Frame")
            .field("command", &self.command)
            .field("data_length", &self.data_length)
            .field("data", &self.data())
            .field("checksum", &self.checksum)
            .finish()
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ParserState {
    AwaitHeader1,
    AwaitHeader2,
    Command,
    LengthLow,
    LengthHigh,
    Data,
    Checksum,
}

/// Protocol violations reported by the parser
#[derive(Copy, Clone, PartialEq, Eq, Debug, Error)]
pub enum ParseError {
    #[error("second header byte mismatch (0x{0:02x})")]
    Header(u8),

    #[error("invalid command 0x{0:02x}")]
    InvalidCommand(u8),

    #[error("declared length {0} exceeds frame capacity")]
    Length(u16),

    #[error("checksum mismatch (expected 0x{expected:02x}, received 0x{received:02x})")]
    Checksum { expected: u8, received: u8 },
}

/// Stateful frame parser.
///
/// Bytes are fed one at a time with [`Parser::ingest`]. Any protocol violation
/// drops the partial frame and returns the parser to header search, so the
/// next `0xAA 0x55` pair always starts a fresh frame.
pub struct Parser {
    state: ParserState,
    frame: Frame,
    received: u16,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub const fn new() -> Self {
        Self {
            state: ParserState::AwaitHeader1,
            frame: Frame::new(Command::Ack),
            received: 0,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Drop any partial frame and wait for a new header
    pub fn reset(&mut self) {
        self.state = ParserState::AwaitHeader1;
        self.received = 0;
        self.frame.clear();
    }

    /// Feed a single byte into the parser.
    ///
    /// Returns `Ok(Some(frame))` once a complete frame with a valid checksum
    /// has been received, `Ok(None)` while a frame is still incomplete.
    pub fn ingest(&mut self, byte: u8) -> Result<Option<&Frame>, ParseError> {
        match self.state {
            ParserState::AwaitHeader1 => {
                if byte == FRAME_HEADER1 {
                    self.state = ParserState::AwaitHeader2;
                }
            }
            ParserState::AwaitHeader2 => {
                if byte != FRAME_HEADER2 {
                    self.reset();
                    return Err(ParseError::Header(byte));
                }
                self.state = ParserState::Command;
            }
            ParserState::Command => match Command::try_from(byte) {
                Ok(command) => {
                    self.frame.command = command;
                    self.state = ParserState::LengthLow;
                }
                Err(code) => {
                    self.reset();
                    return Err(ParseError::InvalidCommand(code));
                }
            },
            ParserState::LengthLow => {
                self.frame.data_length = byte as u16;
                self.state = ParserState::LengthHigh;
            }
            ParserState::LengthHigh => {
                self.frame.data_length |= (byte as u16) << 8;
                self.received = 0;

                let length = self.frame.data_length;

                // Bytes left over from a longer previous frame
                let tail = core::cmp::min(length as usize, MAX_DATA);
                self.frame.data[tail..].iter_mut().for_each(|b| *b = 0);
                if length == 0 {
                    self.state = ParserState::Checksum;
                } else if (length as usize) < MAX_DATA {
                    self.state = ParserState::Data;
                } else {
                    self.reset();
                    return Err(ParseError::Length(length));
                }
            }
            ParserState::Data => {
                self.frame.data[self.received as usize] = byte;
                self.received += 1;
                if self.received == self.frame.data_length {
                    self.state = ParserState::Checksum;
                }
            }
            ParserState::Checksum => {
                self.frame.checksum = byte;
                self.state = ParserState::AwaitHeader1;
                self.received = 0;

                let expected = self.expected_checksum();
                if expected != byte {
                    self.frame.clear();
                    return Err(ParseError::Checksum {
                        expected,
                        received: byte,
                    });
                }

                return Ok(Some(&self.frame));
            }
        }

        Ok(None)
    }

    fn expected_checksum(&self) -> u8 {
        let mut sum = Checksum::default();
        sum.push(self.frame.command.code());
        sum.extend(&self.frame.data_length.to_le_bytes());
        sum.extend(self.frame.data());
        sum.finish()
    }
}
