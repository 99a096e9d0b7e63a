//! Application image validation and the hand-over into it.

use crate::config::BootConfig;
use crate::hal::Flash;

/// Words of the vector table scanned for content
pub const VECTOR_SCAN_WORDS: u32 = 16;

const ERASED_WORD: u32 = 0xFFFF_FFFF;

/// First two entries of a Cortex-M vector table
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VectorTable {
    pub stack_pointer: u32,
    pub reset_handler: u32,
}

impl VectorTable {
    pub fn read<F: Flash>(flash: &F, base: u32) -> Self {
        Self {
            stack_pointer: flash.read_word(base),
            reset_handler: flash.read_word(base + 4),
        }
    }
}

/// A validated request to start the application at `base`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Launch {
    pub base: u32,
    pub vector: VectorTable,
}

/// Check the image at `config.app_address` looks like a bootable application.
///
/// The initial stack pointer must point into RAM, the reset handler into the
/// application flash region, and the first words of the vector table must not
/// be all erased or all zero.
pub fn is_valid<F: Flash>(config: &BootConfig, flash: &F) -> Option<Launch> {
    let base = config.app_address;
    let vector = VectorTable::read(flash, base);

    if vector.stack_pointer < config.ram_start || vector.stack_pointer > config.ram_end {
        debug!("Invalid stack pointer 0x{:08x}", vector.stack_pointer);
        return None;
    }

    if vector.reset_handler < base || vector.reset_handler > config.flash_end {
        debug!("Invalid reset handler 0x{:08x}", vector.reset_handler);
        return None;
    }

    let populated = (0..VECTOR_SCAN_WORDS)
        .map(|i| flash.read_word(base + 4 * i))
        .any(|w| w != ERASED_WORD && w != 0);
    if !populated {
        debug!("Vector table at 0x{:08x} is empty", base);
        return None;
    }

    Some(Launch { base, vector })
}

/// Processor operations making up the jump into the application.
///
/// Each step is called exactly once, in the order fixed by [`hand_over`].
pub trait Launcher {
    /// Mask all interrupts
    fn disable_interrupts(&mut self);

    /// Return clocks and peripherals to their reset state
    fn deinit_peripherals(&mut self);

    /// Stop the system tick timer and clear its reload and current values
    fn stop_systick(&mut self);

    /// Clear every interrupt enable and pending bit
    fn clear_interrupts(&mut self);

    /// Point the vector table offset register at `base`
    fn relocate_vector_table(&mut self, base: u32);

    /// Load the main stack pointer.
    ///
    /// Implementations running on that stack may record the value and load
    /// it in [`branch`](Launcher::branch) instead. Interrupts are enabled
    /// before that load, which is safe only because every NVIC enable bit and
    /// SysTick are already cleared, so nothing can be taken in between.
    fn set_main_stack_pointer(&mut self, stack_pointer: u32);

    /// Privileged thread mode using the main stack
    fn enter_privileged_thread_mode(&mut self);

    fn enable_interrupts(&mut self);

    /// Transfer control to `reset_handler`.
    ///
    /// # Safety
    /// Execution continues in code this program knows nothing about; on
    /// hardware this must not return.
    unsafe fn branch(&mut self, reset_handler: u32);
}

/// Bring the processor into the state the application expects, without
/// performing the final branch.
pub fn hand_over<L: Launcher>(launcher: &mut L, launch: &Launch) {
    launcher.disable_interrupts();
    launcher.deinit_peripherals();
    launcher.stop_systick();
    launcher.clear_interrupts();
    launcher.relocate_vector_table(launch.base);
    launcher.set_main_stack_pointer(launch.vector.stack_pointer);
    launcher.enter_privileged_thread_mode();
    launcher.enable_interrupts();
}

/// Jump into the application. Never returns; should the application ever
/// hand control back the processor spins here.
pub fn jump_to_application<L: Launcher>(launcher: &mut L, launch: &Launch) -> ! {
    info!(
        "Starting application at 0x{:08x} (reset handler 0x{:08x})",
        launch.base, launch.vector.reset_handler
    );

    hand_over(launcher, launch);

    unsafe { launcher.branch(launch.vector.reset_handler) };

    error!("Application returned");
    loop {
        core::hint::spin_loop();
    }
}
