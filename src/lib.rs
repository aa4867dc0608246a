//! Modular in-field firmware updater for resource-constrained microcontrollers.
//!
//! The bootloader decides on every reset whether to resume the installed application
//! or to stay in update mode, based on a persistent clean/dirty marker.
//! In update mode a single, statically selected communication [`module`] feeds firmware
//! pages to the [`flash`] programmer.
//! The application talks back to the bootloader through the fixed-address [`trampoline`] table.
#![no_std]

use core::ops::Range;

#[macro_use]
mod log;

pub mod boot;
pub mod bootloader;
pub mod flash;
pub mod hal;
pub mod marker;
pub mod module;
pub mod trampoline;

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod mock;

/// Failure reported by the hardware abstraction or by one of the components.
///
/// None of these are fatal: the bootloader keeps waiting for a corrected retransmission.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Erasing a page of program memory failed.
    Erase,
    /// Committing the page buffer to program memory failed.
    Program,
    /// Read-back of a freshly written page did not match the page buffer.
    Verify,
    /// Request addressed memory outside of the writable application region.
    OutOfBounds,
    /// Request did not start on a page boundary, or the data does not fit a page.
    Misaligned,
    /// The trampoline table was built for another ABI version.
    AbiMismatch,
}

/// Memory layout of the combined bootloader and application image.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Layout {
    /// Region of program memory the bootloader may program, end exclusive.
    pub application: Range<u32>,
    /// Address the bootloader jumps to when resuming the application.
    pub entry: u32,
}

impl Layout {
    pub const fn new(application: Range<u32>, entry: u32) -> Self {
        Self { application, entry }
    }

    /// Whether `[address, address + len)` lies completely within the application region.
    pub fn contains_window(&self, address: u32, len: u32) -> bool {
        match address.checked_add(len) {
            Some(end) => {
                address >= self.application.start && end <= self.application.end && len > 0
            }
            None => false,
        }
    }
}
