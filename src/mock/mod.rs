#[cfg(feature = "can")]
pub mod can;

use core::cell::Cell;
use std::{collections::BTreeMap, collections::VecDeque, vec, vec::Vec};

use embedded_storage_async::nor_flash::{ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash};

use crate::{
    Error,
    boot::Boot,
    hal::{Device, Eeprom, Interrupts, ProgramMemory},
    module::{Action, Module, Reply, UpdateMessage},
    trampoline::{BootloaderInfo, ModuleInfo, ModuleKind},
};

pub const MOCK_PAGE_SIZE: usize = 256;
const FLASH_SIZE: usize = 0x9000;

std::thread_local! {
    static INTERRUPTS_ENABLED: Cell<bool> = const { Cell::new(false) };
}

/// Global interrupt flag of the test thread.
pub struct MockInterrupts;

impl MockInterrupts {
    pub fn set(enabled: bool) {
        INTERRUPTS_ENABLED.set(enabled)
    }

    pub fn enabled() -> bool {
        INTERRUPTS_ENABLED.get()
    }
}

impl Interrupts for MockInterrupts {
    fn disable() -> bool {
        INTERRUPTS_ENABLED.replace(false)
    }

    fn enable() {
        INTERRUPTS_ENABLED.set(true)
    }
}

#[derive(Clone, Debug)]
pub struct MockEeprom {
    pub cells: [u8; 64],
    pub writes: usize,
}

impl MockEeprom {
    pub const fn new() -> Self {
        Self {
            cells: [0xff; 64],
            writes: 0,
        }
    }
}

impl Eeprom for MockEeprom {
    fn read(&mut self, address: u16) -> u8 {
        self.cells[address as usize]
    }

    fn write(&mut self, address: u16, value: u8) {
        self.cells[address as usize] = value;
        self.writes += 1;
    }
}

#[derive(Debug)]
pub struct WearTracker(BTreeMap<u32, usize>);

impl WearTracker {
    pub const fn new() -> Self {
        WearTracker(BTreeMap::new())
    }

    pub fn increase(&mut self, page_address: u32) {
        *self.0.entry(page_address).or_insert(0) += 1;
    }

    /// Check all pages for worst wear.
    pub fn check(&self, wear_level: usize) -> bool {
        self.0.values().all(|v| *v <= wear_level)
    }
}

/// Program memory with NOR semantics and failure injection.
pub struct MockFlash {
    pub memory: Vec<u8>,
    /// Temporary page buffer, one entry per word.
    pub words: Vec<u16>,
    pub erased: Vec<u32>,
    pub committed: Vec<u32>,
    pub wear: WearTracker,
    /// Number of upcoming erases that fail.
    pub fail_erase: usize,
    /// Number of upcoming commits that fail.
    pub fail_commit: usize,
    /// Flip a bit in every committed page.
    pub corrupt_commit: bool,
    pub rww_enabled: bool,
    /// Hardware accesses made while interrupts were enabled.
    pub accesses_with_interrupts_enabled: usize,
}

impl MockFlash {
    pub fn new() -> Self {
        Self {
            memory: vec![0xff; FLASH_SIZE],
            words: vec![0xffff; MOCK_PAGE_SIZE / 2],
            erased: Vec::new(),
            committed: Vec::new(),
            wear: WearTracker::new(),
            fail_erase: 0,
            fail_commit: 0,
            corrupt_commit: false,
            rww_enabled: true,
            accesses_with_interrupts_enabled: 0,
        }
    }

    fn access(&mut self) {
        if MockInterrupts::enabled() {
            self.accesses_with_interrupts_enabled += 1;
        }
    }
}

impl ProgramMemory for MockFlash {
    fn wait_ready(&mut self) {
        self.access();
    }

    fn erase(&mut self, page_address: u32) -> Result<(), Error> {
        self.access();
        self.rww_enabled = false;

        if self.fail_erase > 0 {
            self.fail_erase -= 1;
            return Err(Error::Erase);
        }

        let start = page_address as usize;
        self.memory[start..start + MOCK_PAGE_SIZE].fill(0xff);
        self.erased.push(page_address);
        self.wear.increase(page_address);
        Ok(())
    }

    fn fill_word(&mut self, offset: u16, word: u16) {
        self.access();
        self.words[offset as usize / 2] = word;
    }

    fn commit(&mut self, page_address: u32) -> Result<(), Error> {
        self.access();
        self.rww_enabled = false;

        if self.fail_commit > 0 {
            self.fail_commit -= 1;
            return Err(Error::Program);
        }

        let start = page_address as usize;
        for (i, word) in self.words.iter().enumerate() {
            let [low, high] = word.to_le_bytes();
            // Programming only clears bits.
            self.memory[start + 2 * i] &= low;
            self.memory[start + 2 * i + 1] &= high;
        }
        if self.corrupt_commit {
            self.memory[start] ^= 0x01;
        }
        self.committed.push(page_address);
        Ok(())
    }

    fn enable_read_while_write(&mut self) {
        self.access();
        self.rww_enabled = true;
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) {
        let start = address as usize;
        buf.copy_from_slice(&self.memory[start..start + buf.len()]);
    }
}

/// NOR flash partition in RAM, for the flash-backed marker.
pub struct MockNorFlash {
    pub data: Vec<u8>,
    pub writes: usize,
    /// Reject every write and erase.
    pub fail_writes: bool,
    pub accesses_with_interrupts_enabled: usize,
}

impl MockNorFlash {
    const PAGES: usize = 4;

    pub fn new() -> Self {
        Self {
            data: vec![0xff; Self::PAGES * <Self as NorFlash>::ERASE_SIZE],
            writes: 0,
            fail_writes: false,
            accesses_with_interrupts_enabled: 0,
        }
    }

    fn access(&mut self) {
        if MockInterrupts::enabled() {
            self.accesses_with_interrupts_enabled += 1;
        }
    }

    fn modify(&mut self) -> Result<(), NorFlashErrorKind> {
        self.access();
        if self.fail_writes {
            return Err(NorFlashErrorKind::Other);
        }
        Ok(())
    }

    fn check(&self, offset: u32, len: usize, align: usize) -> Result<usize, NorFlashErrorKind> {
        let offset = offset as usize;
        if offset % align != 0 || len % align != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        if offset + len > self.data.len() {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        Ok(offset)
    }
}

impl ErrorType for MockNorFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MockNorFlash {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.access();
        let offset = self.check(offset, bytes.len(), Self::READ_SIZE)?;
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for MockNorFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 256;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.modify()?;
        let from = self.check(from, 0, Self::ERASE_SIZE)?;
        let to = self.check(to, 0, Self::ERASE_SIZE)?;
        self.data[from..to].fill(0xff);
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.modify()?;
        let offset = self.check(offset, bytes.len(), Self::WRITE_SIZE)?;
        for (cell, byte) in self.data[offset..offset + bytes.len()].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        self.writes += 1;
        Ok(())
    }
}

pub struct MockBoot;

impl Boot for MockBoot {
    unsafe fn boot(_addr: *const u32) -> ! {
        unimplemented!()
    }
}

pub struct MockDevice {
    pub watchdog_pets: usize,
    tick_every: Option<usize>,
    polls: usize,
}

impl MockDevice {
    pub const fn new() -> Self {
        Self {
            watchdog_pets: 0,
            tick_every: None,
            polls: 0,
        }
    }

    pub const fn with_tick_every(polls: usize) -> Self {
        Self {
            watchdog_pets: 0,
            tick_every: Some(polls),
            polls: 0,
        }
    }
}

impl Device for MockDevice {
    type Interrupts = MockInterrupts;
    type Boot = MockBoot;

    fn pet_watchdog(&mut self) {
        self.watchdog_pets += 1;
    }

    fn poll_tick(&mut self) -> bool {
        self.polls += 1;
        self.tick_every.is_some_and(|n| self.polls % n == 0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Call {
    Init,
    Exit,
    Idle,
    Periodic,
    Receive,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum RecordedReply {
    Info(BootloaderInfo),
    WriteStatus(Result<(), Error>),
    ReadData(Vec<u8>),
}

/// Module fed from a script of decoded messages.
pub struct MockModule {
    pub calls: Vec<Call>,
    pub replies: Vec<RecordedReply>,
    /// Resume the application on this many periodic ticks.
    pub periodic_after: Option<usize>,
    inbox: VecDeque<UpdateMessage>,
    periodic: usize,
}

impl MockModule {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            replies: Vec::new(),
            periodic_after: None,
            inbox: VecDeque::new(),
            periodic: 0,
        }
    }

    pub fn push(&mut self, message: UpdateMessage) {
        self.inbox.push_back(message);
    }

    pub fn pending(&self) -> usize {
        self.inbox.len()
    }
}

impl Module for MockModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new(ModuleKind::Isp, 0, 0)
    }

    fn init(&mut self) {
        self.calls.push(Call::Init);
    }

    fn exit(&mut self) {
        self.calls.push(Call::Exit);
    }

    fn on_idle(&mut self) -> Action {
        self.calls.push(Call::Idle);
        Action::Continue
    }

    fn on_periodic(&mut self) -> Action {
        self.calls.push(Call::Periodic);
        self.periodic += 1;

        match self.periodic_after {
            Some(n) if self.periodic >= n => Action::RunApplication,
            _ => Action::Continue,
        }
    }

    fn receive(&mut self) -> Option<UpdateMessage> {
        let message = self.inbox.pop_front()?;
        self.calls.push(Call::Receive);
        Some(message)
    }

    fn reply(&mut self, reply: Reply<'_>) {
        self.replies.push(match reply {
            Reply::Info(info) => RecordedReply::Info(*info),
            Reply::WriteStatus(result) => RecordedReply::WriteStatus(result),
            Reply::ReadData(data) => RecordedReply::ReadData(data.to_vec()),
        });
    }
}
