//! Maps received frames to bootloader actions.

use crate::config::BootConfig;
use crate::error::ErrorCode;
use crate::firmware;
use crate::hal::Flash;
use crate::parser::Frame;
use crate::protocol::{build, BuildError, Command, MAX_DATA};

/// What the bootloader does in response to a frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Reply with the device information record
    SendInfo,
    /// Reply with an ACK frame
    Ack,
    /// Reply with an ACK frame, then attempt to start the application
    AckAndLaunch,
    /// Reply with an error frame now
    Reject(ErrorCode),
    /// Send nothing, raise a pending error for the next tick
    Defer(ErrorCode),
}

/// Interpret a frame. Only UPLOAD has side effects (flash programming).
pub fn dispatch<F: Flash>(config: &BootConfig, flash: &mut F, frame: &Frame) -> Action {
    debug!(
        "Dispatching {:?} ({} bytes)",
        frame.command(),
        frame.data_length()
    );

    match frame.command() {
        Command::EnterBoot => Action::SendInfo,
        Command::Upload => match firmware::program(config, flash, frame.data()) {
            Ok(()) => Action::Ack,
            Err(code) => Action::Defer(code),
        },
        // Image verification is not performed, the host is acknowledged
        Command::Verify => Action::Ack,
        Command::RunApp => Action::AckAndLaunch,
        Command::Ack => Action::Ack,
        Command::Nack | Command::ErrorResponse => Action::Reject(ErrorCode::UnknownCommand),
    }
}

impl Action {
    /// Build the reply frame for this action into `out`.
    ///
    /// Returns `Ok(0)` for actions that send nothing.
    pub fn respond(&self, config: &BootConfig, out: &mut [u8]) -> Result<usize, BuildError> {
        match self {
            Action::SendInfo => {
                let mut payload = [0u8; MAX_DATA - 1];
                let info = config.device_info();
                let n = info
                    .encode(&mut payload)
                    .ok_or_else(|| BuildError::DataTooLong(info.encoded_len()))?;
                build(Command::EnterBoot, &payload[..n], out)
            }
            Action::Ack | Action::AckAndLaunch => build(Command::Ack, &[], out),
            Action::Reject(code) => error_response(*code, out),
            Action::Defer(_) => Ok(0),
        }
    }
}

/// Build an ERROR_RESPONSE frame: `[code][catalog message]`
pub fn error_response(code: ErrorCode, out: &mut [u8]) -> Result<usize, BuildError> {
    let message = code.message().as_bytes();
    let mut payload = [0u8; 64];
    let len = core::cmp::min(message.len(), payload.len() - 1);

    payload[0] = code.code();
    payload[1..1 + len].copy_from_slice(&message[..len]);

    build(Command::ErrorResponse, &payload[..1 + len], out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::FirmwareChunk;
    use crate::info::DeviceInfo;
    use crate::parser::Parser;
    use crate::protocol::MAX_FRAME;
    use crate::sim::SimFlash;

    fn frame(command: Command, data: &[u8]) -> Frame {
        let mut buf = [0u8; MAX_FRAME];
        let n = build(command, data, &mut buf).unwrap();
        frame_from_bytes(&buf[..n])
    }

    fn frame_from_bytes(bytes: &[u8]) -> Frame {
        let mut p = Parser::new();
        let mut out = None;
        for &b in bytes {
            if let Some(f) = p.ingest(b).unwrap() {
                out = Some(f.clone());
            }
        }
        out.unwrap()
    }

    #[test]
    fn ack_loopback_matches_wire_bytes() {
        let config = BootConfig::default();
        let mut flash = SimFlash::new(&config);

        let f = frame(Command::Ack, &[]);
        let action = dispatch(&config, &mut flash, &f);
        assert_eq!(action, Action::Ack);

        let mut out = [0u8; 16];
        let n = action.respond(&config, &mut out).unwrap();
        assert_eq!(&out[..n], &[0xAA, 0x55, 0x05, 0x00, 0x00, 0xFA]);
    }

    #[test]
    fn enter_boot_replies_device_info() {
        let config = BootConfig::default();
        let mut flash = SimFlash::new(&config);

        let action = dispatch(&config, &mut flash, &frame(Command::EnterBoot, &[]));
        assert_eq!(action, Action::SendInfo);

        let mut out = [0u8; MAX_FRAME];
        let n = action.respond(&config, &mut out).unwrap();
        let reply = frame_from_bytes(&out[..n]);
        assert_eq!(reply.command(), Command::EnterBoot);
        assert_eq!(DeviceInfo::decode(reply.data()), Some(config.device_info()));
    }

    #[test]
    fn upload_programs_and_acks() {
        let config = BootConfig::default();
        let mut flash = SimFlash::new(&config);

        let mut data = [0u8; 12 + 512];
        let n = FirmwareChunk {
            packet_index: 0,
            packet_total: 1,
            crc32: 0,
            payload: &[0x42; 512],
        }
        .encode(&mut data)
        .unwrap();

        let action = dispatch(&config, &mut flash, &frame(Command::Upload, &data[..n]));
        assert_eq!(action, Action::Ack);
        assert_eq!(flash.read(config.app_address, 4), &[0x42; 4]);
    }

    #[test]
    fn failed_upload_defers_error() {
        let config = BootConfig::default();
        let mut flash = SimFlash::new(&config);

        let action = dispatch(&config, &mut flash, &frame(Command::Upload, &[1, 2, 3]));
        assert_eq!(action, Action::Defer(ErrorCode::InvalidFirmwareData));

        let mut out = [0u8; 16];
        assert_eq!(action.respond(&config, &mut out), Ok(0));
    }

    #[test]
    fn verify_and_run_app_ack() {
        let config = BootConfig::default();
        let mut flash = SimFlash::new(&config);

        assert_eq!(
            dispatch(&config, &mut flash, &frame(Command::Verify, &[])),
            Action::Ack
        );
        assert_eq!(
            dispatch(&config, &mut flash, &frame(Command::RunApp, &[])),
            Action::AckAndLaunch
        );
    }

    #[test]
    fn responses_from_host_are_rejected() {
        let config = BootConfig::default();
        let mut flash = SimFlash::new(&config);

        for &command in [Command::Nack, Command::ErrorResponse].iter() {
            let action = dispatch(&config, &mut flash, &frame(command, &[]));
            assert_eq!(action, Action::Reject(ErrorCode::UnknownCommand));

            let mut out = [0u8; 64];
            let n = action.respond(&config, &mut out).unwrap();
            let reply = frame_from_bytes(&out[..n]);
            assert_eq!(reply.command(), Command::ErrorResponse);
            assert_eq!(reply.data()[0], ErrorCode::UnknownCommand.code());
            assert_eq!(&reply.data()[1..], b"Unknown command");
        }
    }

    #[test]
    fn oversized_device_info_reports_its_length() {
        let config = BootConfig {
            model: Box::leak("M".repeat(2040).into_boxed_str()),
            ..BootConfig::default()
        };

        let expected = config.device_info().encoded_len();
        assert!(expected > MAX_DATA - 1);

        let mut out = [0u8; MAX_FRAME];
        assert_eq!(
            Action::SendInfo.respond(&config, &mut out),
            Err(BuildError::DataTooLong(expected))
        );
    }
}
