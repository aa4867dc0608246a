#[cfg(feature = "cortex_m")]
pub mod cortex_m;

/// Bootload mechanism that jumps to the application entry.
///
/// Peripheral state is left as the communication module's `exit` handed it over.
pub trait Boot {
    /// Address of the application entry, typically pointing to its vector table.
    ///
    /// # Safety
    /// `addr` must point to a valid image. Nothing of the bootloader survives the jump
    /// except what is reachable through the trampoline table.
    unsafe fn boot(addr: *const u32) -> !;
}
