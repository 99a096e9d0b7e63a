//! [`Launcher`] for Cortex-M (ARMv7-M) targets.

use cortex_m::peripheral::{NVIC, SCB, SYST};
use cortex_m::register::control::{self, Npriv, Spsel};

use crate::launch::Launcher;

/// Hands the processor over to an application image.
///
/// `deinit` is called to return board clocks and drivers to their reset
/// state before the core registers are reset.
pub struct CortexMLauncher<D> {
    deinit: D,
    stack_pointer: u32,
}

impl<D: FnMut()> CortexMLauncher<D> {
    pub fn new(deinit: D) -> Self {
        Self {
            deinit,
            stack_pointer: 0,
        }
    }
}

impl<D: FnMut()> Launcher for CortexMLauncher<D> {
    fn disable_interrupts(&mut self) {
        cortex_m::interrupt::disable();
    }

    fn deinit_peripherals(&mut self) {
        (self.deinit)();
    }

    fn stop_systick(&mut self) {
        unsafe {
            let syst = &*SYST::PTR;
            syst.csr.write(0);
            syst.rvr.write(0);
            syst.cvr.write(0);
        }
    }

    fn clear_interrupts(&mut self) {
        unsafe {
            let nvic = &*NVIC::PTR;
            for (icer, icpr) in nvic.icer.iter().zip(nvic.icpr.iter()) {
                icer.write(0xFFFF_FFFF);
                icpr.write(0xFFFF_FFFF);
            }
        }
    }

    fn relocate_vector_table(&mut self, base: u32) {
        unsafe {
            (*SCB::PTR).vtor.write(base);
        }
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    /// Deferred, MSP is loaded by [`branch`](Launcher::branch) in the same
    /// instruction sequence as the jump since this stack frame is still live.
    fn set_main_stack_pointer(&mut self, stack_pointer: u32) {
        self.stack_pointer = stack_pointer;
    }

    fn enter_privileged_thread_mode(&mut self) {
        let mut c = control::read();
        c.set_npriv(Npriv::Privileged);
        c.set_spsel(Spsel::Msp);
        unsafe { control::write(c) };
        cortex_m::asm::isb();
    }

    fn enable_interrupts(&mut self) {
        unsafe { cortex_m::interrupt::enable() };
    }

    unsafe fn branch(&mut self, reset_handler: u32) {
        cortex_m::asm::bootstrap(self.stack_pointer as *const u32, reset_handler as *const u32);
    }
}
