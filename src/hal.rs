//! Peripheral capabilities consumed by the bootloader core, and adapters
//! implementing them over `embedded-hal` traits.

use core::fmt::Debug;

use embedded_hal::blocking::serial::Write as BlockingWrite;
use embedded_hal::digital::v2::{InputPin, OutputPin};

/// Byte sink towards the host
pub trait Transmit {
    type Error: Debug;

    /// Send a complete frame or text notice
    fn send(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// Debounced maintenance key event
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum KeyState {
    /// Key released since the last report
    Up,
    /// Key pressed since the last report
    Down,
    /// No change
    None,
}

/// Maintenance-entry input
pub trait Key {
    fn key_state(&mut self, now_ms: u32) -> KeyState;
}

/// Status indicator driven while in maintenance mode
pub trait StatusLed {
    fn blink(&mut self, period_ms: u32, now_ms: u32);
}

/// Monotonic millisecond tick, expected to wrap
pub trait Clock {
    fn now_ms(&self) -> u32;
}

/// Internal flash programming primitives
pub trait Flash {
    type Error: Debug;

    /// Acquire write access to the flash controller
    fn unlock(&mut self) -> Result<(), Self::Error>;

    /// Program one aligned flash word, `word.len()` equals the program unit
    fn program(&mut self, address: u32, word: &[u8]) -> Result<(), Self::Error>;

    /// Release write access
    fn lock(&mut self) -> Result<(), Self::Error>;

    /// Read a 32-bit word from flash
    fn read_word(&self, address: u32) -> u32;
}

/// [`Transmit`] over a blocking `embedded-hal` serial writer
pub struct SerialTransmit<S>(pub S);

impl<S> Transmit for SerialTransmit<S>
where
    S: BlockingWrite<u8>,
    S::Error: Debug,
{
    type Error = S::Error;

    fn send(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        self.0.bwrite_all(bytes)?;
        self.0.bflush()
    }
}

/// Default debounce interval for [`DebouncedKey`]
pub const KEY_DEBOUNCE_MS: u32 = 20;

/// [`Key`] over an input pin, reporting debounced edges
pub struct DebouncedKey<P> {
    pin: P,
    active_high: bool,
    debounce_ms: u32,
    state: KeyState,
    /// Time of the first sample differing from `state`
    changed_at: Option<u32>,
}

impl<P, E> DebouncedKey<P>
where
    P: InputPin<Error = E>,
    E: Debug,
{
    /// Create a key reading `pin`, pressed when the pin level equals `active_high`
    pub fn new(pin: P, active_high: bool) -> Self {
        Self {
            pin,
            active_high,
            debounce_ms: KEY_DEBOUNCE_MS,
            state: KeyState::None,
            changed_at: None,
        }
    }

    pub fn with_debounce(mut self, debounce_ms: u32) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }

    pub fn release(self) -> P {
        self.pin
    }
}

impl<P, E> Key for DebouncedKey<P>
where
    P: InputPin<Error = E>,
    E: Debug,
{
    fn key_state(&mut self, now_ms: u32) -> KeyState {
        let level = match self.pin.is_high() {
            Ok(v) => v,
            Err(e) => {
                warn!("Key read failed: {:?}", e);
                return KeyState::None;
            }
        };

        let current = if level == self.active_high {
            KeyState::Down
        } else {
            KeyState::Up
        };

        if current == self.state {
            self.changed_at = None;
            return KeyState::None;
        }

        let since = *self.changed_at.get_or_insert(now_ms);
        if now_ms.wrapping_sub(since) > self.debounce_ms {
            self.state = current;
            self.changed_at = None;
            return current;
        }

        KeyState::None
    }
}

/// [`StatusLed`] toggling an output pin every `period_ms`
pub struct BlinkLed<P> {
    pin: P,
    lit: bool,
    last_toggle: u32,
}

impl<P, E> BlinkLed<P>
where
    P: OutputPin<Error = E>,
    E: Debug,
{
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            lit: false,
            last_toggle: 0,
        }
    }

    pub fn release(self) -> P {
        self.pin
    }
}

impl<P, E> StatusLed for BlinkLed<P>
where
    P: OutputPin<Error = E>,
    E: Debug,
{
    fn blink(&mut self, period_ms: u32, now_ms: u32) {
        if now_ms.wrapping_sub(self.last_toggle) <= period_ms {
            return;
        }
        self.last_toggle = now_ms;

        let r = if self.lit {
            self.pin.set_low()
        } else {
            self.pin.set_high()
        };

        match r {
            Ok(()) => self.lit = !self.lit,
            Err(e) => warn!("LED update failed: {:?}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::pin::{Mock as PinMock, State as PinState, Transaction as PinTransaction};

    #[test]
    fn key_reports_debounced_press_once() {
        let expectations = [
            PinTransaction::get(PinState::High),
            PinTransaction::get(PinState::High),
            PinTransaction::get(PinState::Low),
            PinTransaction::get(PinState::Low),
            PinTransaction::get(PinState::Low),
            PinTransaction::get(PinState::Low),
        ];
        let mut key = DebouncedKey::new(PinMock::new(&expectations), false);

        // Released at power up, reported once stable
        assert_eq!(key.key_state(0), KeyState::None);
        assert_eq!(key.key_state(25), KeyState::Up);
        // Pressed, still bouncing
        assert_eq!(key.key_state(30), KeyState::None);
        assert_eq!(key.key_state(40), KeyState::None);
        // Stable past the debounce interval
        assert_eq!(key.key_state(55), KeyState::Down);
        // Held
        assert_eq!(key.key_state(60), KeyState::None);

        key.release().done();
    }

    #[test]
    fn single_glitch_after_polling_gap_is_ignored() {
        let expectations = [
            PinTransaction::get(PinState::High),
            PinTransaction::get(PinState::High),
            PinTransaction::get(PinState::Low),
            PinTransaction::get(PinState::High),
            PinTransaction::get(PinState::High),
        ];
        let mut key = DebouncedKey::new(PinMock::new(&expectations), false);

        key.key_state(0);
        assert_eq!(key.key_state(25), KeyState::Up);

        // Long gap since the last stable sample, then one low reading
        assert_eq!(key.key_state(200), KeyState::None);
        assert_eq!(key.key_state(210), KeyState::None);
        assert_eq!(key.key_state(300), KeyState::None);

        key.release().done();
    }

    #[test]
    fn key_waits_for_debounce_at_start() {
        let expectations = [
            PinTransaction::get(PinState::High),
            PinTransaction::get(PinState::High),
            PinTransaction::get(PinState::High),
        ];
        let mut key = DebouncedKey::new(PinMock::new(&expectations), true);

        assert_eq!(key.key_state(5), KeyState::None);
        assert_eq!(key.key_state(25), KeyState::None);
        assert_eq!(key.key_state(26), KeyState::Down);

        key.release().done();
    }

    #[test]
    fn key_debounce_is_configurable() {
        let expectations = [
            PinTransaction::get(PinState::High),
            PinTransaction::get(PinState::High),
        ];
        let mut key = DebouncedKey::new(PinMock::new(&expectations), true).with_debounce(5);

        assert_eq!(key.key_state(0), KeyState::None);
        assert_eq!(key.key_state(6), KeyState::Down);

        key.release().done();
    }

    #[test]
    fn led_toggles_once_per_period() {
        let expectations = [
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
        ];
        let mut led = BlinkLed::new(PinMock::new(&expectations));

        led.blink(100, 50);
        led.blink(100, 101);
        led.blink(100, 150);
        led.blink(100, 202);

        led.release().done();
    }

    struct Sink {
        written: [u8; 16],
        len: usize,
        flushed: bool,
    }

    impl BlockingWrite<u8> for Sink {
        type Error = ();

        fn bwrite_all(&mut self, buffer: &[u8]) -> Result<(), ()> {
            if self.len + buffer.len() > self.written.len() {
                return Err(());
            }
            self.written[self.len..self.len + buffer.len()].copy_from_slice(buffer);
            self.len += buffer.len();
            Ok(())
        }

        fn bflush(&mut self) -> Result<(), ()> {
            self.flushed = true;
            Ok(())
        }
    }

    #[test]
    fn serial_transmit_writes_and_flushes() {
        let mut tx = SerialTransmit(Sink {
            written: [0; 16],
            len: 0,
            flushed: false,
        });

        tx.send(&[0xAA, 0x55, 0x05, 0x00, 0x00, 0xFA]).unwrap();
        assert_eq!(&tx.0.written[..tx.0.len], &[0xAA, 0x55, 0x05, 0x00, 0x00, 0xFA]);
        assert!(tx.0.flushed);

        assert_eq!(tx.send(&[0u8; 16]), Err(()));
    }
}
