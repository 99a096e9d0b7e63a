//! Bootloader error codes and the message catalog reported to the host.

use core::convert::TryFrom;

use crate::parser::ParseError;

/// Message returned for codes outside the catalog
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";

/// Error codes reported in `ErrorResponse` frames
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    NoError = 0x00,
    /// Frame header mismatch
    ParseFailed = 0x01,
    /// Command outside the accepted set
    UnknownCommand = 0x02,
    /// Declared data length exceeds the frame capacity
    LengthError = 0x03,
    ChecksumError = 0x04,
    /// Malformed or out of order firmware packet
    InvalidFirmwareData = 0x05,
    /// Flash unlock, program or lock failure, or a bad target address
    FlashError = 0x06,
    /// Reserved, image verification is not performed
    VerifyFailed = 0x07,
}

const MESSAGES: [&str; 8] = [
    "No error",
    "Frame parse failed",
    "Unknown command",
    "Invalid frame length",
    "Checksum mismatch",
    "Invalid firmware data",
    "Flash operation failed",
    "Firmware verification failed",
];

impl ErrorCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Catalog message for this code
    pub fn message(self) -> &'static str {
        MESSAGES[self as usize]
    }

    pub fn is_error(self) -> bool {
        self != ErrorCode::NoError
    }
}

/// Catalog lookup by raw code, falling back to [`UNKNOWN_ERROR_MESSAGE`]
pub fn error_message(code: u8) -> &'static str {
    ErrorCode::try_from(code)
        .map(ErrorCode::message)
        .unwrap_or(UNKNOWN_ERROR_MESSAGE)
}

impl TryFrom<u8> for ErrorCode {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x00 => Ok(ErrorCode::NoError),
            0x01 => Ok(ErrorCode::ParseFailed),
            0x02 => Ok(ErrorCode::UnknownCommand),
            0x03 => Ok(ErrorCode::LengthError),
            0x04 => Ok(ErrorCode::ChecksumError),
            0x05 => Ok(ErrorCode::InvalidFirmwareData),
            0x06 => Ok(ErrorCode::FlashError),
            0x07 => Ok(ErrorCode::VerifyFailed),
            other => Err(other),
        }
    }
}

impl From<ParseError> for ErrorCode {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::Header(_) => ErrorCode::ParseFailed,
            ParseError::InvalidCommand(_) => ErrorCode::UnknownCommand,
            ParseError::Length(_) => ErrorCode::LengthError,
            ParseError::Checksum { .. } => ErrorCode::ChecksumError,
        }
    }
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{} (0x{:02x})", self.message(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_code_has_a_message() {
        for code in 0..MESSAGES.len() as u8 {
            let e = ErrorCode::try_from(code).unwrap();
            assert_eq!(e.code(), code);
            assert_eq!(error_message(code), MESSAGES[code as usize]);
        }
    }

    #[test]
    fn unknown_codes_fall_back() {
        assert_eq!(error_message(0x08), UNKNOWN_ERROR_MESSAGE);
        assert_eq!(error_message(0xFF), UNKNOWN_ERROR_MESSAGE);
    }

    #[test]
    fn parse_errors_map_to_codes() {
        assert_eq!(ErrorCode::from(ParseError::Header(0)), ErrorCode::ParseFailed);
        assert_eq!(
            ErrorCode::from(ParseError::InvalidCommand(9)),
            ErrorCode::UnknownCommand
        );
        assert_eq!(ErrorCode::from(ParseError::Length(4096)), ErrorCode::LengthError);
        assert_eq!(
            ErrorCode::from(ParseError::Checksum {
                expected: 1,
                received: 2
            }),
            ErrorCode::ChecksumError
        );
    }
}
