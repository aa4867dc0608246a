//! Persistent clean/dirty marker of the application.
//!
//! The application marks itself clean right before a controlled shutdown.
//! The bootloader marks it dirty right before jumping to it, so that a crash or watchdog reset
//! of the application ends up in update mode on the next boot.

use core::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::hal::{CriticalSection, Eeprom, Interrupts};

#[cfg(feature = "simple_state")]
pub mod simple;

/// Health of the installed application as recorded in non-volatile memory.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Marker {
    /// The application shut down normally and can be resumed.
    Clean,
    /// Anything else, including erased or garbled storage.
    Dirty,
}

impl Marker {
    /// Only this exact byte value reads as [`Marker::Clean`].
    pub const CLEAN_BYTE: u8 = 0xC1;
    pub const DIRTY_BYTE: u8 = 0x00;

    pub const fn from_byte(value: u8) -> Self {
        if value == Self::CLEAN_BYTE {
            Marker::Clean
        } else {
            Marker::Dirty
        }
    }

    pub const fn to_byte(self) -> u8 {
        match self {
            Marker::Clean => Self::CLEAN_BYTE,
            Marker::Dirty => Self::DIRTY_BYTE,
        }
    }
}

/// Storage of the application marker.
///
/// Writes block until the non-volatile cell has been programmed.
/// Every write costs an erase/write cycle, so this is not meant to be called at high frequency.
pub trait MarkerStore {
    fn read_marker(&mut self) -> Marker;

    fn write_marker(&mut self, marker: Marker);

    fn mark_clean(&mut self) {
        self.write_marker(Marker::Clean)
    }

    fn mark_dirty(&mut self) {
        self.write_marker(Marker::Dirty)
    }
}

impl<T: MarkerStore + ?Sized> MarkerStore for &mut T {
    fn read_marker(&mut self) -> Marker {
        (**self).read_marker()
    }

    fn write_marker(&mut self, marker: Marker) {
        (**self).write_marker(marker)
    }
}

/// Marker kept in a single EEPROM byte.
pub struct EepromMarker<E: Eeprom, I: Interrupts> {
    eeprom: E,
    address: u16,
    _interrupts: PhantomData<I>,
}

impl<E: Eeprom, I: Interrupts> EepromMarker<E, I> {
    pub const fn new(eeprom: E, address: u16) -> Self {
        Self {
            eeprom,
            address,
            _interrupts: PhantomData,
        }
    }

    pub fn release(self) -> E {
        self.eeprom
    }
}

impl<E: Eeprom, I: Interrupts> MarkerStore for EepromMarker<E, I> {
    fn read_marker(&mut self) -> Marker {
        let _cs = CriticalSection::<I>::enter();
        Marker::from_byte(self.eeprom.read(self.address))
    }

    fn write_marker(&mut self, marker: Marker) {
        let _cs = CriticalSection::<I>::enter();

        let value = marker.to_byte();
        if self.eeprom.read(self.address) == value {
            // Spare the cell a write cycle.
            return;
        }

        debug!("marker <- {}", marker);
        self.eeprom.write(self.address, value);
    }
}
