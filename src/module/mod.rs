//! Communication modules supplying firmware through one fixed capability set.
//!
//! Exactly one module is linked into a bootloader image. The controller is generic over it,
//! so selecting a module is a matter of picking the type when building the image.

use crate::{Error, trampoline::BootloaderInfo, trampoline::ModuleInfo};

#[cfg(feature = "can")]
pub mod can;
pub mod isp;

/// What the controller should do after a module callback.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    Continue,
    /// Leave update mode and resume the installed application.
    RunApplication,
}

/// Payload of a single data message, at most [`Chunk::CAPACITY`] bytes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Chunk {
    len: u8,
    bytes: [u8; Chunk::CAPACITY],
}

impl Chunk {
    pub const CAPACITY: usize = 8;

    pub fn new(data: &[u8]) -> Option<Self> {
        if data.len() > Self::CAPACITY {
            return None;
        }

        let mut bytes = [0u8; Self::CAPACITY];
        bytes[..data.len()].copy_from_slice(data);
        Some(Self {
            len: data.len() as u8,
            bytes,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

/// Update protocol message, as decoded by a transport.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateMessage {
    /// Stop updating and run the application.
    ResetRequest,
    /// Ask for the bootloader and module constants.
    GetInfo,
    /// Open a write window. Must precede the [`UpdateMessage::WriteData`] filling it.
    WriteMemory { address: u32, len: u32 },
    /// Next bytes of the open write window.
    WriteData(Chunk),
    /// Ask for the contents of program memory.
    ReadMemory { address: u32, len: u32 },
    /// Program memory contents, sent by a device.
    ReadData(Chunk),
    /// A device announcing it waits for firmware.
    UploaderAlert { node_id: u8 },
}

/// Answer of the controller, sent back over the transport.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Reply<'a> {
    Info(&'a BootloaderInfo),
    /// Outcome of programming the page the last write data completed.
    WriteStatus(Result<(), Error>),
    ReadData(&'a [u8]),
}

/// Transport-specific half of the update protocol.
pub trait Module {
    /// Constants shared with the application through the trampoline.
    fn info(&self) -> ModuleInfo;

    /// Claim the peripherals the transport needs. Called once per boot, before the event loop.
    fn init(&mut self);

    /// Return the peripherals to their state before [`Module::init`]. Called once, before the jump.
    fn exit(&mut self);

    /// Called whenever there is no pending work.
    fn on_idle(&mut self) -> Action;

    /// Called on every tick of the periodic timer.
    fn on_periodic(&mut self) -> Action;

    /// Next decoded message, if any arrived.
    fn receive(&mut self) -> Option<UpdateMessage> {
        None
    }

    fn reply(&mut self, _reply: Reply<'_>) {}
}

impl<M: Module + ?Sized> Module for &mut M {
    fn info(&self) -> ModuleInfo {
        (**self).info()
    }

    fn init(&mut self) {
        (**self).init()
    }

    fn exit(&mut self) {
        (**self).exit()
    }

    fn on_idle(&mut self) -> Action {
        (**self).on_idle()
    }

    fn on_periodic(&mut self) -> Action {
        (**self).on_periodic()
    }

    fn receive(&mut self) -> Option<UpdateMessage> {
        (**self).receive()
    }

    fn reply(&mut self, reply: Reply<'_>) {
        (**self).reply(reply)
    }
}
