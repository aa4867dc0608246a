//! Fixed-address interface between the bootloader and an independently linked application.
//!
//! The bootloader image carries a [`TrampolineTable`] in a linker-reserved section.
//! The application has no symbols of the bootloader to link against; it only knows the table's
//! base address and calls slot *N* through the pointer stored at `base + N * size_of::<usize>()`.
//!
//! Slot order, slot signatures and the layout of [`BootloaderInfo`] and [`ModuleInfo`] form the
//! binary contract between both images. Changing any of them requires bumping [`ABI_VERSION`]
//! and flashing both images together. The layout is pinned by compile-time assertions below.
//!
//! Exporting the table from the bootloader image:
//!
//! ```ignore
//! struct Services;
//!
//! impl modboot::trampoline::Services for Services {
//!     type Marker = EepromMarker<BoardEeprom, SimpleCortexM>;
//!
//!     fn marker() -> Self::Marker {
//!         EepromMarker::new(BoardEeprom::steal(), MARKER_ADDRESS)
//!     }
//!
//!     fn bootloader_info() -> BootloaderInfo {
//!         BootloaderInfo::new(&LAYOUT, PAGE_SIZE as u16)
//!     }
//!
//!     fn module_info() -> ModuleInfo {
//!         ModuleInfo::new(ModuleKind::Can, NODE_ID, 500)
//!     }
//! }
//!
//! modboot::export_trampoline!(Services);
//! ```

use core::mem::{offset_of, size_of};

use konst::{parsing::Parser, result};
use static_assertions::const_assert_eq;

use crate::{Error, Layout, marker::MarkerStore};

/// Version of the table and record layouts.
///
/// Slot [`TrampolineSlot::BootloaderInfo`] and the `abi_version` field keep their position in every version,
/// so that the check in [`Trampoline::at`] is itself safe across versions.
pub const ABI_VERSION: u16 = 1;

/// Constants of the bootloader build, shared with the application.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootloaderInfo {
    pub abi_version: u16,
    pub version_major: u8,
    pub version_minor: u8,
    pub version_patch: u8,
    pub reserved: u8,
    pub page_size: u16,
    pub application_start: u32,
    pub application_end: u32,
}

impl BootloaderInfo {
    pub const fn new(layout: &Layout, page_size: u16) -> Self {
        Self {
            abi_version: ABI_VERSION,
            version_major: parse_u8(env!("CARGO_PKG_VERSION_MAJOR")),
            version_minor: parse_u8(env!("CARGO_PKG_VERSION_MINOR")),
            version_patch: parse_u8(env!("CARGO_PKG_VERSION_PATCH")),
            reserved: 0,
            page_size,
            application_start: layout.application.start,
            application_end: layout.application.end,
        }
    }
}

/// Parse a version component at compile time; anything but a `u8` fails the build.
const fn parse_u8(s: &str) -> u8 {
    let mut p = Parser::new(s);
    result::unwrap!(p.parse_u8())
}

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModuleKind {
    Isp = 1,
    Can = 2,
}

/// Constants of the communication module linked into the bootloader, shared with the application.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModuleInfo {
    /// A [`ModuleKind`] discriminant.
    pub kind: u8,
    pub node_id: u8,
    pub bitrate_kbps: u16,
    pub reserved: [u8; 4],
}

impl ModuleInfo {
    pub const fn new(kind: ModuleKind, node_id: u8, bitrate_kbps: u16) -> Self {
        Self {
            kind: kind as u8,
            node_id,
            bitrate_kbps,
            reserved: [0; 4],
        }
    }
}

/// Position of each entry point in the table.
#[repr(usize)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TrampolineSlot {
    MarkClean = 0,
    MarkDirty = 1,
    BootloaderInfo = 2,
    ModuleInfo = 3,
}

impl TrampolineSlot {
    pub const COUNT: usize = 4;

    /// Byte offset of the slot from the table base.
    pub const fn offset(self) -> usize {
        self as usize * size_of::<usize>()
    }
}

/// The table as placed in the bootloader image.
#[repr(C)]
pub struct TrampolineTable {
    pub mark_clean: extern "C" fn(),
    pub mark_dirty: extern "C" fn(),
    pub bootloader_info: unsafe extern "C" fn(*mut BootloaderInfo),
    pub module_info: unsafe extern "C" fn(*mut ModuleInfo),
}

const_assert_eq!(size_of::<extern "C" fn()>(), size_of::<usize>());
const_assert_eq!(
    size_of::<TrampolineTable>(),
    TrampolineSlot::COUNT * size_of::<usize>()
);
const_assert_eq!(
    offset_of!(TrampolineTable, mark_clean),
    TrampolineSlot::MarkClean.offset()
);
const_assert_eq!(
    offset_of!(TrampolineTable, mark_dirty),
    TrampolineSlot::MarkDirty.offset()
);
const_assert_eq!(
    offset_of!(TrampolineTable, bootloader_info),
    TrampolineSlot::BootloaderInfo.offset()
);
const_assert_eq!(
    offset_of!(TrampolineTable, module_info),
    TrampolineSlot::ModuleInfo.offset()
);

const_assert_eq!(size_of::<BootloaderInfo>(), 16);
const_assert_eq!(offset_of!(BootloaderInfo, abi_version), 0);
const_assert_eq!(offset_of!(BootloaderInfo, page_size), 6);
const_assert_eq!(offset_of!(BootloaderInfo, application_start), 8);
const_assert_eq!(offset_of!(BootloaderInfo, application_end), 12);
const_assert_eq!(size_of::<ModuleInfo>(), 8);
const_assert_eq!(offset_of!(ModuleInfo, bitrate_kbps), 2);

/// Bootloader services reachable through the table.
///
/// The entry points run in application context, long after the bootloader's own objects are gone,
/// so every call constructs what it needs from scratch.
pub trait Services {
    type Marker: MarkerStore;

    fn marker() -> Self::Marker;

    fn bootloader_info() -> BootloaderInfo;

    fn module_info() -> ModuleInfo;
}

extern "C" fn mark_clean<S: Services>() {
    S::marker().mark_clean()
}

extern "C" fn mark_dirty<S: Services>() {
    S::marker().mark_dirty()
}

/// # Safety
/// `out` is null or valid for writing a [`BootloaderInfo`].
unsafe extern "C" fn bootloader_info<S: Services>(out: *mut BootloaderInfo) {
    if !out.is_null() {
        unsafe { out.write(S::bootloader_info()) }
    }
}

/// # Safety
/// `out` is null or valid for writing a [`ModuleInfo`].
unsafe extern "C" fn module_info<S: Services>(out: *mut ModuleInfo) {
    if !out.is_null() {
        unsafe { out.write(S::module_info()) }
    }
}

impl TrampolineTable {
    pub const fn new<S: Services>() -> Self {
        Self {
            mark_clean: mark_clean::<S>,
            mark_dirty: mark_dirty::<S>,
            bootloader_info: bootloader_info::<S>,
            module_info: module_info::<S>,
        }
    }
}

/// Place the trampoline table for `$services` in the `.trampoline` section.
///
/// The linker script of the bootloader pins that section to the address the application is built against.
#[macro_export]
macro_rules! export_trampoline {
    ($services:ty) => {
        #[used]
        #[unsafe(no_mangle)]
        #[unsafe(link_section = ".trampoline")]
        pub static MODBOOT_TRAMPOLINE: $crate::trampoline::TrampolineTable =
            $crate::trampoline::TrampolineTable::new::<$services>();
    };
}

/// Application-side handle to the table, addressed by its base only.
#[derive(Clone, Copy, Debug)]
pub struct Trampoline {
    base: usize,
}

impl Trampoline {
    /// Bind to the table at `base` and check that it speaks [`ABI_VERSION`].
    ///
    /// # Safety
    /// `base` must be the address of a [`TrampolineTable`] of some ABI version in a bootloader image.
    pub unsafe fn at(base: usize) -> Result<Self, Error> {
        let trampoline = Self { base };

        let info = trampoline.bootloader_info();
        if info.abi_version != ABI_VERSION {
            return Err(Error::AbiMismatch);
        }

        Ok(trampoline)
    }

    /// Read the function pointer stored in `slot`.
    ///
    /// # Safety
    /// `F` must be the pointer type of that slot.
    unsafe fn slot<F: Copy>(&self, slot: TrampolineSlot) -> F {
        unsafe { core::ptr::read_volatile((self.base + slot.offset()) as *const F) }
    }

    pub fn mark_clean(&self) {
        let f: extern "C" fn() = unsafe { self.slot(TrampolineSlot::MarkClean) };
        f()
    }

    pub fn mark_dirty(&self) {
        let f: extern "C" fn() = unsafe { self.slot(TrampolineSlot::MarkDirty) };
        f()
    }

    pub fn bootloader_info(&self) -> BootloaderInfo {
        let f: unsafe extern "C" fn(*mut BootloaderInfo) =
            unsafe { self.slot(TrampolineSlot::BootloaderInfo) };

        let mut info = core::mem::MaybeUninit::<BootloaderInfo>::zeroed();
        unsafe {
            f(info.as_mut_ptr());
            info.assume_init()
        }
    }

    pub fn module_info(&self) -> ModuleInfo {
        let f: unsafe extern "C" fn(*mut ModuleInfo) =
            unsafe { self.slot(TrampolineSlot::ModuleInfo) };

        let mut info = core::mem::MaybeUninit::<ModuleInfo>::zeroed();
        unsafe {
            f(info.as_mut_ptr());
            info.assume_init()
        }
    }
}
