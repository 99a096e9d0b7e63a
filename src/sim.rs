//! In-memory flash used to exercise the bootloader off target.

use crate::config::BootConfig;
use crate::firmware::ERASED_BYTE;
use crate::hal::Flash;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SimError {
    Locked,
    OutOfRange(u32),
    Misaligned(u32),
    Injected,
}

/// Flash region covering `app_address..=flash_end`.
///
/// Programming follows NOR semantics: bits can only be cleared, so writing
/// over erased memory stores the data and writing erased bytes is a no-op.
pub struct SimFlash {
    base: u32,
    unit: u32,
    mem: Vec<u8>,
    unlocked: bool,
    fail_unlock: bool,
    fail_at: Option<u32>,
    unlocks: usize,
    locks: usize,
    programs: usize,
}

impl SimFlash {
    pub fn new(config: &BootConfig) -> Self {
        let len = (config.flash_end - config.app_address + 1) as usize;
        Self {
            base: config.app_address,
            unit: config.program_unit,
            mem: vec![ERASED_BYTE; len],
            unlocked: false,
            fail_unlock: false,
            fail_at: None,
            unlocks: 0,
            locks: 0,
            programs: 0,
        }
    }

    fn offset(&self, address: u32, len: usize) -> Option<usize> {
        let offset = address.checked_sub(self.base)? as usize;
        if offset + len > self.mem.len() {
            return None;
        }
        Some(offset)
    }

    /// Borrow `len` bytes at `address`
    pub fn read(&self, address: u32, len: usize) -> &[u8] {
        match self.offset(address, len) {
            Some(o) => &self.mem[o..o + len],
            None => &[],
        }
    }

    /// Store words directly, bypassing lock and program semantics
    pub fn load_words(&mut self, address: u32, words: &[u32]) {
        for (i, w) in words.iter().enumerate() {
            if let Some(o) = self.offset(address + 4 * i as u32, 4) {
                self.mem[o..o + 4].copy_from_slice(&w.to_le_bytes());
            }
        }
    }

    /// Erase the whole region
    pub fn erase(&mut self) {
        self.mem.iter_mut().for_each(|b| *b = ERASED_BYTE);
    }

    /// Make the program call at `address` fail
    pub fn fail_program_at(&mut self, address: u32) {
        self.fail_at = Some(address);
    }

    pub fn fail_unlock(&mut self, fail: bool) {
        self.fail_unlock = fail;
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    pub fn unlock_count(&self) -> usize {
        self.unlocks
    }

    pub fn lock_count(&self) -> usize {
        self.locks
    }

    /// Number of successful word programs
    pub fn program_count(&self) -> usize {
        self.programs
    }
}

impl Flash for SimFlash {
    type Error = SimError;

    fn unlock(&mut self) -> Result<(), SimError> {
        if self.fail_unlock {
            return Err(SimError::Injected);
        }
        self.unlocks += 1;
        self.unlocked = true;
        Ok(())
    }

    fn program(&mut self, address: u32, word: &[u8]) -> Result<(), SimError> {
        if !self.unlocked {
            return Err(SimError::Locked);
        }
        if self.fail_at == Some(address) {
            return Err(SimError::Injected);
        }
        if address % self.unit != 0 || word.len() != self.unit as usize {
            return Err(SimError::Misaligned(address));
        }
        let o = self
            .offset(address, word.len())
            .ok_or(SimError::OutOfRange(address))?;

        for (m, w) in self.mem[o..o + word.len()].iter_mut().zip(word) {
            *m &= *w;
        }
        self.programs += 1;
        Ok(())
    }

    fn lock(&mut self) -> Result<(), SimError> {
        self.locks += 1;
        self.unlocked = false;
        Ok(())
    }

    fn read_word(&self, address: u32) -> u32 {
        let b = self.read(address, 4);
        if b.len() != 4 {
            return 0xFFFF_FFFF;
        }
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }
}
