//! Programmer over a linux tty.

use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::time::Duration;

use serial_core::{
    BaudRate, CharSize, Error as SerialError, FlowControl, Parity, SerialDevice,
    SerialPortSettings as _, StopBits,
};
use linux_embedded_hal::{Delay, Serial};

use crate::host::{Options, Programmer};

pub type LinuxProgrammer = Programmer<Serial, Delay, IoErrorKind>;

/// 8N1, no flow control
fn configure<S: SerialDevice>(tty: &mut S, baud: usize) -> Result<(), SerialError> {
    let mut settings = tty.read_settings()?;

    settings.set_baud_rate(BaudRate::from_speed(baud))?;
    settings.set_char_size(CharSize::Bits8);
    settings.set_parity(Parity::ParityNone);
    settings.set_stop_bits(StopBits::Stop1);
    settings.set_flow_control(FlowControl::FlowNone);

    tty.write_settings(&settings)
}

impl LinuxProgrammer {
    /// Open `port` at `baud` and create a programmer over it
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        options: Options,
    ) -> Result<Self, SerialError> {
        let path = port.as_ref();
        debug!("Opening {} at {} baud", path.display(), baud);

        let mut serial = Serial::open(path)?;
        configure(&mut serial.0, baud)?;

        // Reads give up after one poll period so the response timeout applies
        let poll = Duration::from_millis(u64::from(options.poll_delay_ms.max(1)));
        serial.0.set_timeout(poll)?;

        Ok(Self::new(serial, Delay {}, options))
    }
}
