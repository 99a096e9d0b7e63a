//! Host-side programmer, drives a device bootloader over a serial port.

use core::convert::TryFrom;
use core::fmt::Debug;
use core::marker::PhantomData;

use crc::{Crc, CRC_32_ISO_HDLC};
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use crate::error::error_message;
use crate::firmware::{FirmwareChunk, CHUNK_HEADER_LEN};
use crate::info::DeviceInfo;
use crate::parser::{Frame, ParseError, Parser};
use crate::protocol::{build, BuildError, Command, MAX_DATA, MAX_FRAME};

/// Checksum filled into each firmware packet header
pub const PACKET_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Debug, thiserror::Error)]
pub enum Error<E: Debug> {
    #[error("serial error: {0:?}")]
    Serial(E),

    #[error("device responded with NACK")]
    Nack,

    #[error("device error: {}", error_message(*.0))]
    Device(u8),

    #[error("timeout waiting for response")]
    ResponseTimeout,

    #[error("unexpected {0:?} response")]
    InvalidResponse(Command),

    #[error("malformed device information")]
    InvalidInfo,

    #[error("packet size {0} does not fit a frame")]
    PacketSize(u32),

    #[error("firmware image is empty")]
    EmptyImage,

    #[error("firmware image of {0} bytes is too large")]
    ImageTooLarge(usize),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Timeout to wait for bootloader responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1000"))]
    pub response_timeout_ms: u32,

    /// Period to poll for bootloader responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub poll_delay_ms: u32,

    /// Delay between firmware packets
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "0"))]
    pub packet_delay_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            response_timeout_ms: 1000,
            poll_delay_ms: 1,
            packet_delay_ms: 0,
        }
    }
}

pub struct Programmer<P, D, E> {
    options: Options,
    port: P,
    delay: D,
    parser: Parser,
    response: Frame,
    buf: [u8; MAX_FRAME],
    _err: PhantomData<E>,
}

impl<P, D, E> Programmer<P, D, E>
where
    P: Read<u8, Error = E> + Write<u8, Error = E>,
    D: DelayMs<u32>,
    E: Debug,
{
    /// Create a new programmer instance
    pub fn new(port: P, delay: D, options: Options) -> Self {
        Self {
            options,
            port,
            delay,
            parser: Parser::new(),
            response: Frame::new(Command::Ack),
            buf: [0u8; MAX_FRAME],
            _err: PhantomData,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Release the underlying port and delay
    pub fn release(self) -> (P, D) {
        (self.port, self.delay)
    }

    /// Request device information, the device must be in maintenance mode
    pub fn enter_boot(&mut self) -> Result<DeviceInfo<'_>, Error<E>> {
        debug!("Requesting device information");

        self.send(Command::EnterBoot, &[])?;
        match self.await_response()? {
            Command::EnterBoot => (),
            Command::ErrorResponse => return Err(self.device_error()),
            c => return Err(Error::InvalidResponse(c)),
        }

        DeviceInfo::decode(self.response.data()).ok_or(Error::InvalidInfo)
    }

    /// ACK loopback
    pub fn ping(&mut self) -> Result<(), Error<E>> {
        self.command(Command::Ack)
    }

    /// Write `image` to the application region in `packet_size` chunks.
    ///
    /// `progress` is called with (packets written, packets total) after each
    /// acknowledged packet.
    pub fn upload<F>(
        &mut self,
        image: &[u8],
        packet_size: u32,
        mut progress: F,
    ) -> Result<(), Error<E>>
    where
        F: FnMut(u32, u32),
    {
        if packet_size == 0 || CHUNK_HEADER_LEN + packet_size as usize >= MAX_DATA {
            return Err(Error::PacketSize(packet_size));
        }
        if image.is_empty() {
            return Err(Error::EmptyImage);
        }

        let chunks = image.chunks(packet_size as usize);
        let total =
            u32::try_from(chunks.len()).map_err(|_| Error::ImageTooLarge(image.len()))?;

        debug!("Uploading {} bytes in {} packets", image.len(), total);

        let mut data = [0u8; MAX_DATA - 1];
        for (index, payload) in (0u32..).zip(chunks) {
            let chunk = FirmwareChunk {
                packet_index: index,
                packet_total: total,
                crc32: PACKET_CRC.checksum(payload),
                payload,
            };
            let n = chunk
                .encode(&mut data)
                .ok_or(Error::PacketSize(packet_size))?;

            trace!("Packet {}/{} crc 0x{:08x}", index + 1, total, chunk.crc32);

            self.send(Command::Upload, &data[..n])?;
            self.await_ack()?;

            progress(index + 1, total);

            if self.options.packet_delay_ms > 0 {
                self.delay.delay_ms(self.options.packet_delay_ms);
            }
        }

        Ok(())
    }

    /// Request image verification
    pub fn verify(&mut self) -> Result<(), Error<E>> {
        self.command(Command::Verify)
    }

    /// Request the device start its application
    pub fn run_app(&mut self) -> Result<(), Error<E>> {
        self.command(Command::RunApp)
    }

    fn command(&mut self, command: Command) -> Result<(), Error<E>> {
        debug!("Sending {:?}", command);
        self.send(command, &[])?;
        self.await_ack()
    }

    fn send(&mut self, command: Command, data: &[u8]) -> Result<(), Error<E>> {
        let n = build(command, data, &mut self.buf)?;

        // Drop any partial response left over from a previous exchange
        self.parser.reset();

        for &b in &self.buf[..n] {
            block!(self.port.write(b)).map_err(Error::Serial)?;
        }
        block!(self.port.flush()).map_err(Error::Serial)?;

        Ok(())
    }

    fn await_ack(&mut self) -> Result<(), Error<E>> {
        match self.await_response()? {
            Command::Ack => {
                debug!("Received bootloader ack");
                Ok(())
            }
            Command::Nack => {
                debug!("Received bootloader nack");
                Err(Error::Nack)
            }
            Command::ErrorResponse => Err(self.device_error()),
            c => {
                debug!("Received unexpected {:?} frame", c);
                Err(Error::InvalidResponse(c))
            }
        }
    }

    fn device_error(&self) -> Error<E> {
        let code = self.response.data().first().copied().unwrap_or(0);
        error!("Device error 0x{:02x}: {}", code, error_message(code));
        Error::Device(code)
    }

    /// Poll the port until a complete frame is parsed, storing it as the
    /// current response
    fn await_response(&mut self) -> Result<Command, Error<E>> {
        let mut t = 0;

        loop {
            match self.port.read() {
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(e)) => return Err(Error::Serial(e)),
                Ok(b) => {
                    if let Some(frame) = self.parser.ingest(b)? {
                        self.response.clone_from(frame);
                        return Ok(self.response.command());
                    }
                    continue;
                }
            }

            // Wait for delay period
            self.delay.delay_ms(self.options.poll_delay_ms);
            t += core::cmp::max(self.options.poll_delay_ms, 1);

            if t > self.options.response_timeout_ms {
                error!("Receive timeout");
                return Err(Error::ResponseTimeout);
            }
        }
    }
}
