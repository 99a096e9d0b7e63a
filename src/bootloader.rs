//! Boot orchestration state machine.

use crate::config::{BootConfig, ConfigError};
use crate::dispatch::{dispatch, error_response, Action};
use crate::error::ErrorCode;
use crate::hal::{Clock, Flash, Key, KeyState, StatusLed, Transmit};
use crate::launch::{self, Launch, Launcher};
use crate::protocol::MAX_FRAME;
use crate::receiver::Inbox;

/// Text sent whenever maintenance mode is entered
pub const MODE_ENTRY_NOTICE: &[u8] = b"Entered bootloader mode\r\n";

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BootState {
    /// Power-up window, waiting for the maintenance key
    Wait,
    /// Maintenance mode, host commands are accepted
    Bootloader,
    /// About to validate and start the application
    ApplicationJump,
}

pub struct Bootloader<T, K, L, C, F> {
    config: BootConfig,
    state: BootState,
    wait_start: Option<u32>,
    tx: T,
    key: K,
    led: L,
    clock: C,
    flash: F,
    tx_buf: [u8; MAX_FRAME],
}

impl<T, K, L, C, F> Bootloader<T, K, L, C, F>
where
    T: Transmit,
    K: Key,
    L: StatusLed,
    C: Clock,
    F: Flash,
{
    /// Create a new bootloader instance in the `Wait` state.
    ///
    /// Fails if `config` describes a layout the firmware writer cannot
    /// program safely.
    pub fn new(
        config: BootConfig,
        tx: T,
        key: K,
        led: L,
        clock: C,
        flash: F,
    ) -> Result<Self, ConfigError> {
        if let Err(e) = config.validate() {
            error!("Invalid boot configuration: {}", e);
            return Err(e);
        }

        Ok(Self {
            config,
            state: BootState::Wait,
            wait_start: None,
            tx,
            key,
            led,
            clock,
            flash,
            tx_buf: [0u8; MAX_FRAME],
        })
    }

    /// Fetch the bootloader state
    pub fn state(&self) -> BootState {
        self.state
    }

    pub fn config(&self) -> &BootConfig {
        &self.config
    }

    pub fn transmitter(&self) -> &T {
        &self.tx
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Run one iteration of the state machine.
    ///
    /// Returns a [`Launch`] when a valid application image should be started;
    /// the caller performs the jump.
    pub fn step<I: Inbox>(&mut self, inbox: &mut I) -> Option<Launch> {
        let now = self.clock.now_ms();

        match self.state {
            BootState::Wait => {
                let start = *self.wait_start.get_or_insert(now);

                if now.wrapping_sub(start) >= self.config.boot_wait_ms {
                    debug!("Boot wait elapsed");
                    self.state = BootState::ApplicationJump;
                } else if self.key.key_state(now) == KeyState::Down {
                    info!("Maintenance key pressed");
                    self.enter_bootloader();
                }
                None
            }
            BootState::Bootloader => {
                self.service(inbox, now);
                None
            }
            BootState::ApplicationJump => match launch::is_valid(&self.config, &self.flash) {
                Some(l) => Some(l),
                None => {
                    warn!("No valid application at 0x{:08x}", self.config.app_address);
                    self.enter_bootloader();
                    None
                }
            },
        }
    }

    /// Superloop, returns only by jumping into the application
    pub fn run<I, J>(&mut self, inbox: &mut I, launcher: &mut J) -> !
    where
        I: Inbox,
        J: Launcher,
    {
        loop {
            if let Some(l) = self.step(inbox) {
                launch::jump_to_application(launcher, &l);
            }
        }
    }

    fn enter_bootloader(&mut self) {
        info!("Entering bootloader mode");
        self.state = BootState::Bootloader;
        self.send_notice();
    }

    fn service<I: Inbox>(&mut self, inbox: &mut I, now: u32) {
        self.led.blink(self.config.blink_period_ms, now);

        if inbox.frame_pending() && !inbox.pending_error().is_error() {
            if let Some(frame) = inbox.take_frame() {
                let action = dispatch(&self.config, &mut self.flash, &frame);
                self.execute(inbox, action);
            }
        } else if let Some(code) = inbox.take_error() {
            warn!("Reporting error: {}", code);
            self.send_error(code);
        }

        if self.key.key_state(now) == KeyState::Down {
            info!("Maintenance key pressed, starting application");
            self.state = BootState::ApplicationJump;
        }
    }

    fn execute<I: Inbox>(&mut self, inbox: &mut I, action: Action) {
        match action {
            Action::Defer(code) => {
                debug!("Deferring error: {}", code);
                inbox.raise(code);
            }
            _ => {
                match action.respond(&self.config, &mut self.tx_buf) {
                    Ok(n) => self.transmit(n),
                    Err(e) => error!("Failed to build response: {}", e),
                }

                if action == Action::AckAndLaunch {
                    self.state = BootState::ApplicationJump;
                }
            }
        }
    }

    fn send_error(&mut self, code: ErrorCode) {
        match error_response(code, &mut self.tx_buf) {
            Ok(n) => self.transmit(n),
            Err(e) => error!("Failed to build error response: {}", e),
        }
    }

    fn send_notice(&mut self) {
        if let Err(e) = self.tx.send(MODE_ENTRY_NOTICE) {
            warn!("Notice send failed: {:?}", e);
        }
    }

    fn transmit(&mut self, len: usize) {
        if let Err(e) = self.tx.send(&self.tx_buf[..len]) {
            warn!("Frame send failed: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::parser::{Frame, Parser};
    use crate::protocol::{build, Command};
    use crate::receiver::Receiver;
    use crate::sim::SimFlash;

    #[derive(Default)]
    struct Wire(Vec<u8>);

    impl Transmit for Wire {
        type Error = ();

        fn send(&mut self, bytes: &[u8]) -> Result<(), ()> {
            self.0.extend_from_slice(bytes);
            Ok(())
        }
    }

    /// Reports a queued press once, `None` otherwise
    #[derive(Clone, Default)]
    struct Button(Rc<Cell<Option<KeyState>>>);

    impl Button {
        fn press(&self) {
            self.0.set(Some(KeyState::Down));
        }
    }

    impl Key for Button {
        fn key_state(&mut self, _now_ms: u32) -> KeyState {
            self.0.take().unwrap_or(KeyState::None)
        }
    }

    #[derive(Clone, Default)]
    struct Led(Rc<Cell<u32>>);

    impl StatusLed for Led {
        fn blink(&mut self, _period_ms: u32, _now_ms: u32) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[derive(Clone, Default)]
    struct Ticks(Rc<Cell<u32>>);

    impl Ticks {
        fn set(&self, ms: u32) {
            self.0.set(ms);
        }
    }

    impl Clock for Ticks {
        fn now_ms(&self) -> u32 {
            self.0.get()
        }
    }

    const SP: u32 = 0x2001_0000;
    const RESET: u32 = 0x0801_0199;

    struct Board {
        boot: Bootloader<Wire, Button, Led, Ticks, SimFlash>,
        rx: Receiver,
        key: Button,
        led: Led,
        clock: Ticks,
    }

    impl Board {
        fn new() -> Self {
            let config = BootConfig::default();
            let flash = SimFlash::new(&config);
            let (key, led, clock) = (Button::default(), Led::default(), Ticks::default());
            let boot = Bootloader::new(
                config,
                Wire::default(),
                key.clone(),
                led.clone(),
                clock.clone(),
                flash,
            )
            .unwrap();
            Self {
                boot,
                rx: Receiver::new(),
                key,
                led,
                clock,
            }
        }

        /// Enter maintenance mode with the key and discard the notice
        fn in_bootloader() -> Self {
            let mut b = Self::new();
            b.key.press();
            assert_eq!(b.step(), None);
            assert_eq!(b.boot.state(), BootState::Bootloader);
            b.boot.tx.0.clear();
            b
        }

        fn step(&mut self) -> Option<Launch> {
            self.boot.step(&mut self.rx)
        }

        fn host_sends(&mut self, command: Command, data: &[u8]) {
            let mut buf = [0u8; MAX_FRAME];
            let n = build(command, data, &mut buf).unwrap();
            buf[..n].iter().for_each(|&b| self.rx.receive(b));
        }

        fn load_valid_image(&mut self) {
            let base = self.boot.config().app_address;
            self.boot.flash_mut().load_words(base, &[SP, RESET]);
        }

        /// Frames transmitted so far, clearing the wire
        fn replies(&mut self) -> Vec<Frame> {
            let mut p = Parser::new();
            let mut frames = vec![];
            for b in self.boot.tx.0.drain(..) {
                if let Ok(Some(f)) = p.ingest(b) {
                    frames.push(f.clone());
                }
            }
            frames
        }
    }

    #[test]
    fn wait_times_out_into_application_jump() {
        let mut b = Board::new();
        b.clock.set(100);

        assert_eq!(b.step(), None);
        b.clock.set(2099);
        assert_eq!(b.step(), None);
        assert_eq!(b.boot.state(), BootState::Wait);

        b.clock.set(2100);
        assert_eq!(b.step(), None);
        assert_eq!(b.boot.state(), BootState::ApplicationJump);
        assert!(b.boot.transmitter().0.is_empty());
    }

    #[test]
    fn wait_survives_clock_wrap() {
        let mut b = Board::new();
        b.clock.set(u32::MAX - 500);
        b.step();

        b.clock.set(1000);
        b.step();
        assert_eq!(b.boot.state(), BootState::Wait);

        b.clock.set(1500);
        b.step();
        assert_eq!(b.boot.state(), BootState::ApplicationJump);
    }

    #[test]
    fn key_enters_bootloader_with_notice() {
        let mut b = Board::new();
        b.step();
        b.key.press();
        b.clock.set(50);
        b.step();

        assert_eq!(b.boot.state(), BootState::Bootloader);
        assert_eq!(b.boot.transmitter().0, MODE_ENTRY_NOTICE);
    }

    #[test]
    fn invalid_image_falls_back_to_bootloader() {
        let mut b = Board::new();
        b.step();
        b.clock.set(2000);
        b.step();
        assert_eq!(b.boot.state(), BootState::ApplicationJump);

        assert_eq!(b.step(), None);
        assert_eq!(b.boot.state(), BootState::Bootloader);
        assert_eq!(b.boot.transmitter().0, MODE_ENTRY_NOTICE);
    }

    #[test]
    fn valid_image_is_launched() {
        let mut b = Board::new();
        b.load_valid_image();
        b.step();
        b.clock.set(2000);
        b.step();

        let launch = b.step().unwrap();
        assert_eq!(launch.base, 0x0801_0000);
        assert_eq!(launch.vector.stack_pointer, SP);
        assert_eq!(launch.vector.reset_handler, RESET);
    }

    #[test]
    fn bootloader_blinks_every_tick() {
        let mut b = Board::in_bootloader();
        let before = b.led.0.get();
        b.step();
        b.step();
        assert_eq!(b.led.0.get(), before + 2);
    }

    #[test]
    fn enter_boot_replies_with_device_info() {
        let mut b = Board::in_bootloader();
        b.host_sends(Command::EnterBoot, &[]);
        b.step();

        let replies = b.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].command(), Command::EnterBoot);
        assert_eq!(
            crate::info::DeviceInfo::decode(replies[0].data()),
            Some(b.boot.config().device_info())
        );
        assert!(!b.rx.frame_pending());
    }

    #[test]
    fn parse_error_is_reported_once() {
        let mut b = Board::in_bootloader();
        [0xAA, 0x55, 0x05, 0x00, 0x00, 0x00]
            .iter()
            .for_each(|&byte| b.rx.receive(byte));

        b.step();
        let replies = b.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].command(), Command::ErrorResponse);
        assert_eq!(replies[0].data()[0], ErrorCode::ChecksumError.code());
        assert_eq!(&replies[0].data()[1..], b"Checksum mismatch");

        b.step();
        assert!(b.replies().is_empty());
    }

    #[test]
    fn pending_error_is_reported_before_frame() {
        let mut b = Board::in_bootloader();
        [0xAA, 0x13].iter().for_each(|&byte| b.rx.receive(byte));
        b.host_sends(Command::Ack, &[]);

        b.step();
        let first = b.replies();
        assert_eq!(first[0].command(), Command::ErrorResponse);
        assert_eq!(first[0].data()[0], ErrorCode::ParseFailed.code());

        b.step();
        let second = b.replies();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].command(), Command::Ack);
    }

    #[test]
    fn failed_upload_is_reported_next_tick() {
        let mut b = Board::in_bootloader();
        b.host_sends(Command::Upload, &[0; 4]);

        b.step();
        assert!(b.replies().is_empty());
        assert_eq!(b.rx.pending_error(), ErrorCode::InvalidFirmwareData);

        b.step();
        let replies = b.replies();
        assert_eq!(replies[0].command(), Command::ErrorResponse);
        assert_eq!(replies[0].data()[0], ErrorCode::InvalidFirmwareData.code());
    }

    #[test]
    fn run_app_without_image_bounces_back() {
        let mut b = Board::in_bootloader();
        b.host_sends(Command::RunApp, &[]);

        b.step();
        assert_eq!(b.replies()[0].command(), Command::Ack);
        assert_eq!(b.boot.state(), BootState::ApplicationJump);

        assert_eq!(b.step(), None);
        assert_eq!(b.boot.state(), BootState::Bootloader);
        assert_eq!(b.boot.transmitter().0, MODE_ENTRY_NOTICE);
    }

    #[test]
    fn run_app_with_image_launches() {
        let mut b = Board::in_bootloader();
        b.load_valid_image();
        b.host_sends(Command::RunApp, &[]);

        assert_eq!(b.step(), None);
        assert!(b.step().is_some());
    }

    #[test]
    fn key_leaves_bootloader() {
        let mut b = Board::in_bootloader();
        b.key.press();
        b.step();
        assert_eq!(b.boot.state(), BootState::ApplicationJump);
    }

    #[test]
    fn rejects_layout_with_partial_program_units() {
        let config = BootConfig {
            packet_size: 48,
            ..BootConfig::default()
        };
        let flash = SimFlash::new(&config);

        let r = Bootloader::new(
            config,
            Wire::default(),
            Button::default(),
            Led::default(),
            Ticks::default(),
            flash,
        );
        assert_eq!(r.err(), Some(ConfigError::PacketSize(48)));
    }
}
