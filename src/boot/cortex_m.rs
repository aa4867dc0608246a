use crate::{boot::Boot, hal::Interrupts};

/// Bootload mechanism and interrupt control for Cortex-M without TrustZone.
pub struct SimpleCortexM;

impl Boot for SimpleCortexM {
    unsafe fn boot(addr: *const u32) -> ! {
        unsafe {
            let p = cortex_m::Peripherals::steal();
            p.SCB.vtor.write(addr as u32);
            cortex_m::asm::bootload(addr)
        }
    }
}

impl Interrupts for SimpleCortexM {
    fn disable() -> bool {
        let was_enabled = cortex_m::register::primask::read().is_inactive();
        cortex_m::interrupt::disable();
        was_enabled
    }

    fn enable() {
        unsafe { cortex_m::interrupt::enable() }
    }
}
