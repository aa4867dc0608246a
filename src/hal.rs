//! Hardware the bootloader consumes.
//!
//! All calls are blocking: they return only after the hardware reports it is ready.

use crate::Error;

/// Byte-addressable non-volatile memory, typically on-chip EEPROM.
pub trait Eeprom {
    /// Read the byte at `address`, waiting for any pending write first.
    fn read(&mut self, address: u16) -> u8;

    /// Write `value` to `address` and wait until the cell has been programmed.
    fn write(&mut self, address: u16, value: u8);
}

/// Self-programming interface of the program memory.
///
/// Programming is page-based: words are collected in a temporary page buffer by [`fill_word`](ProgramMemory::fill_word),
/// and the whole buffer is written with [`commit`](ProgramMemory::commit) to a previously erased page.
pub trait ProgramMemory {
    /// Wait for any outstanding non-volatile operation, including EEPROM writes.
    fn wait_ready(&mut self);

    /// Erase the page starting at `page_address`, setting all bits.
    fn erase(&mut self, page_address: u32) -> Result<(), Error>;

    /// Store a little-endian `word` at byte `offset` in the temporary page buffer.
    fn fill_word(&mut self, offset: u16, word: u16);

    /// Write the temporary page buffer to the page starting at `page_address`.
    fn commit(&mut self, page_address: u32) -> Result<(), Error>;

    /// Make the region that was just programmed readable again.
    fn enable_read_while_write(&mut self);

    /// Read program memory starting at `address` into `buf`.
    fn read(&mut self, address: u32, buf: &mut [u8]);
}

/// Global interrupt enable of the core.
pub trait Interrupts {
    /// Disable interrupts, returning whether they were enabled before.
    fn disable() -> bool;

    /// Enable interrupts.
    fn enable();
}

/// Interrupt-free region that restores the interrupt state it found.
///
/// Nesting is safe: an inner region entered with interrupts already disabled leaves them disabled.
pub struct CriticalSection<I: Interrupts> {
    was_enabled: bool,
    _interrupts: core::marker::PhantomData<I>,
}

impl<I: Interrupts> CriticalSection<I> {
    pub fn enter() -> Self {
        Self {
            was_enabled: I::disable(),
            _interrupts: core::marker::PhantomData,
        }
    }
}

impl<I: Interrupts> Drop for CriticalSection<I> {
    fn drop(&mut self) {
        if self.was_enabled {
            I::enable();
        }
    }
}

/// Board services used by the bootloader event loop.
pub trait Device {
    type Interrupts: Interrupts;
    type Boot: crate::boot::Boot;

    /// Reset the watchdog timer.
    fn pet_watchdog(&mut self);

    /// Returns `true` once for every elapsed period of the tick timer.
    fn poll_tick(&mut self) -> bool;
}

impl<D: Device + ?Sized> Device for &mut D {
    type Interrupts = D::Interrupts;
    type Boot = D::Boot;

    fn pet_watchdog(&mut self) {
        (**self).pet_watchdog()
    }

    fn poll_tick(&mut self) -> bool {
        (**self).poll_tick()
    }
}

/// Power and clock control of a CAN controller, separate from its frame interface.
#[cfg(feature = "can")]
pub trait CanPeripheral {
    /// Configure pins and bit timing and join the bus.
    fn enable(&mut self, bitrate_kbps: u16);

    /// Leave the bus and return the peripheral to its reset configuration.
    fn disable(&mut self);
}
