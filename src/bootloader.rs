//! Boot-time decision and update-mode event loop.
//!
//! ```text
//! CheckMarker ──clean──────────────────────────────────────────────┐
//!      │ dirty                                                     v
//! ModuleInit ─> Waiting <─> Flashing      Waiting ─> ModuleExit ─> RunApplication
//! ```
//!
//! There is no error state. Whatever goes wrong in update mode, the device keeps waiting for
//! a corrected retransmission, since a device that neither runs nor accepts firmware is bricked.

use crate::{
    Error, Layout,
    boot::Boot,
    flash::FlashProgrammer,
    hal::{Device, Interrupts, ProgramMemory},
    marker::{Marker, MarkerStore},
    module::{Action, Chunk, Module, Reply, UpdateMessage},
    trampoline::BootloaderInfo,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    CheckMarker,
    ModuleInit,
    Waiting,
    Flashing,
    ModuleExit,
    RunApplication,
}

/// Position within the open write window.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct WriteCursor {
    /// Page the page buffer is assembled for.
    page_address: u32,
    /// Bytes of the page buffer filled so far.
    fill: usize,
    /// Address the next write data lands on.
    position: u32,
    /// End of the window, exclusive.
    end: u32,
}

pub struct Bootloader<D, M, S, P, const PAGE_SIZE: usize>
where
    D: Device,
    M: Module,
    S: MarkerStore,
    P: ProgramMemory,
{
    device: D,
    module: M,
    marker: S,
    programmer: FlashProgrammer<P, D::Interrupts, PAGE_SIZE>,
    layout: Layout,
    info: BootloaderInfo,
    state: State,
    module_active: bool,
    cursor: Option<WriteCursor>,
    page: [u8; PAGE_SIZE],
}

impl<D, M, S, P, const PAGE_SIZE: usize> Bootloader<D, M, S, P, PAGE_SIZE>
where
    D: Device,
    M: Module,
    S: MarkerStore,
    P: ProgramMemory,
{
    pub fn new(device: D, module: M, marker: S, memory: P, layout: Layout) -> Self {
        let info = BootloaderInfo::new(&layout, PAGE_SIZE as u16);

        Self {
            device,
            module,
            marker,
            programmer: FlashProgrammer::new(memory),
            layout,
            info,
            state: State::CheckMarker,
            module_active: false,
            cursor: None,
            page: [0u8; PAGE_SIZE],
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn info(&self) -> &BootloaderInfo {
        &self.info
    }

    /// Run the bootloader to completion and jump to the application.
    pub fn run(mut self) -> ! {
        if self.start() == Action::Continue {
            while self.poll() == Action::Continue {}
        }

        let entry = self.finish();
        info!("jumping to {=u32:#x}", entry);

        unsafe { <D::Boot as Boot>::boot(entry as *const u32) }
    }

    /// Decide between resuming the application and entering update mode.
    ///
    /// A clean marker returns [`Action::RunApplication`] without touching any peripheral.
    pub fn start(&mut self) -> Action {
        self.state = State::CheckMarker;

        match self.marker.read_marker() {
            Marker::Clean => {
                info!("application shut down cleanly");
                self.state = State::RunApplication;
                Action::RunApplication
            }
            Marker::Dirty => {
                info!("entering update mode");
                self.state = State::ModuleInit;
                self.module.init();
                self.module_active = true;
                D::Interrupts::enable();

                self.state = State::Waiting;
                Action::Continue
            }
        }
    }

    /// Single iteration of the update-mode event loop.
    pub fn poll(&mut self) -> Action {
        if self.state != State::Waiting {
            return Action::RunApplication;
        }

        self.device.pet_watchdog();

        if self.device.poll_tick() && self.module.on_periodic() == Action::RunApplication {
            return Action::RunApplication;
        }

        match self.module.receive() {
            Some(message) => self.dispatch(message),
            None => self.module.on_idle(),
        }
    }

    /// Leave the bootloader: hand the peripherals back and mark the application dirty.
    ///
    /// Returns the entry address to jump to. The application proves it shut down normally by marking
    /// itself clean through the trampoline; until then, any reset lands in update mode.
    pub fn finish(&mut self) -> u32 {
        D::Interrupts::disable();

        if self.module_active {
            self.state = State::ModuleExit;
            self.module.exit();
            self.module_active = false;
        }

        self.state = State::RunApplication;
        self.marker.mark_dirty();

        self.layout.entry
    }

    fn dispatch(&mut self, message: UpdateMessage) -> Action {
        trace!("message {}", message);

        match message {
            UpdateMessage::ResetRequest => {
                info!("reset requested");
                return Action::RunApplication;
            }
            UpdateMessage::GetInfo => {
                self.module.reply(Reply::Info(&self.info));
            }
            UpdateMessage::WriteMemory { address, len } => self.open_window(address, len),
            UpdateMessage::WriteData(chunk) => self.write_data(chunk.as_slice()),
            UpdateMessage::ReadMemory { address, len } => self.read_memory(address, len),
            // Only ever sent by devices.
            UpdateMessage::ReadData(_) | UpdateMessage::UploaderAlert { .. } => {}
        }

        Action::Continue
    }

    fn open_window(&mut self, address: u32, len: u32) {
        if !self.layout.contains_window(address, len) {
            warn!("window {=u32:#x}+{=u32} out of bounds", address, len);
            return;
        }
        if address % PAGE_SIZE as u32 != 0 {
            warn!("window {=u32:#x} not page aligned", address);
            return;
        }

        debug!("window {=u32:#x}+{=u32}", address, len);
        self.cursor = Some(WriteCursor {
            page_address: address,
            fill: 0,
            position: address,
            end: address + len,
        });
    }

    fn write_data(&mut self, data: &[u8]) {
        let Some(mut cursor) = self.cursor else {
            warn!("write data without window");
            return;
        };

        if cursor.end - cursor.position < data.len() as u32 {
            warn!("write data overruns window");
            return;
        }

        let mut rest = data;
        while !rest.is_empty() {
            let n = rest.len().min(PAGE_SIZE - cursor.fill);
            self.page[cursor.fill..cursor.fill + n].copy_from_slice(&rest[..n]);
            cursor.fill += n;
            cursor.position += n as u32;
            rest = &rest[n..];

            if cursor.fill == PAGE_SIZE || cursor.position == cursor.end {
                if self.flash(cursor.page_address, cursor.fill).is_err() {
                    // The uploader retries by sending the window again.
                    self.cursor = None;
                    return;
                }

                cursor.page_address += PAGE_SIZE as u32;
                cursor.fill = 0;
            }
        }

        self.cursor = (cursor.position != cursor.end).then_some(cursor);
    }

    fn flash(&mut self, page_address: u32, len: usize) -> Result<(), Error> {
        self.state = State::Flashing;
        self.device.pet_watchdog();

        let data = &self.page[..len];
        let result = self
            .programmer
            .flash_page(page_address, data)
            .and_then(|()| self.programmer.verify(page_address, data));

        self.device.pet_watchdog();
        self.state = State::Waiting;

        self.module.reply(Reply::WriteStatus(result));
        result
    }

    fn read_memory(&mut self, address: u32, len: u32) {
        if !self.layout.contains_window(address, len) {
            warn!("read {=u32:#x}+{=u32} out of bounds", address, len);
            return;
        }

        let mut buf = [0u8; Chunk::CAPACITY];
        let end = address + len;
        let mut address = address;
        while address < end {
            let n = ((end - address) as usize).min(buf.len());
            self.programmer.read(address, &mut buf[..n]);
            self.module.reply(Reply::ReadData(&buf[..n]));
            self.device.pet_watchdog();
            address += n as u32;
        }
    }

    #[cfg(test)]
    fn cursor(&self) -> Option<WriteCursor> {
        self.cursor
    }

    #[cfg(test)]
    fn programmer(&mut self) -> &mut FlashProgrammer<P, D::Interrupts, PAGE_SIZE> {
        &mut self.programmer
    }
}
