//! Message-ID contract of the CAN update protocol.
//!
//! Every node owns a block of [`NODE_STRIDE`] standard identifiers starting at
//! `base_id + node_id * NODE_STRIDE`. The first six carry requests from the uploader, the six at
//! [`RESPONSE_OFFSET`] carry the node's answers. [`UPLOADER_ALERT_ID`] is shared by all nodes.
//!
//! Payloads, all little-endian:
//!
//! | message      | payload                              |
//! |--------------|--------------------------------------|
//! | write-memory | address `u32`, length `u16`          |
//! | write-data   | 1 to 8 data bytes                    |
//! | read-memory  | address `u32`, length `u16`          |
//! | read-data    | 1 to 8 data bytes                    |
//! | alert        | node id, module kind, bitrate `u16`  |

use crate::{
    Error,
    module::{Chunk, UpdateMessage},
    trampoline::{BootloaderInfo, ModuleInfo},
};

pub const NODE_STRIDE: u16 = 0x10;
pub const RESPONSE_OFFSET: u16 = 0x08;
pub const DEFAULT_BASE_ID: u16 = 0x600;

/// Identifier a device sends on to tell an uploader it waits for firmware.
pub const UPLOADER_ALERT_ID: u16 = 0x7f0;

#[repr(u16)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageId {
    ResetRequest = 0,
    GetInfo = 1,
    WriteMemory = 2,
    WriteData = 3,
    ReadMemory = 4,
    ReadData = 5,
}

impl MessageId {
    const fn from_offset(offset: u16) -> Option<Self> {
        Some(match offset {
            0 => Self::ResetRequest,
            1 => Self::GetInfo,
            2 => Self::WriteMemory,
            3 => Self::WriteData,
            4 => Self::ReadMemory,
            5 => Self::ReadData,
            _ => return None,
        })
    }
}

/// Identifier block of one node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IdMap {
    base: u16,
}

impl IdMap {
    /// Blocks reaching beyond the 11-bit identifier space cannot be sent on and stay silent.
    pub const fn new(base_id: u16, node_id: u8) -> Self {
        Self {
            base: base_id.wrapping_add((node_id as u16).wrapping_mul(NODE_STRIDE)),
        }
    }

    pub const fn request(&self, id: MessageId) -> u16 {
        self.base.wrapping_add(id as u16)
    }

    pub const fn response(&self, id: MessageId) -> u16 {
        self.base.wrapping_add(RESPONSE_OFFSET + id as u16)
    }

    /// Request kind of a raw identifier, if it is one of this node's requests.
    pub fn classify(&self, raw: u16) -> Option<MessageId> {
        raw.checked_sub(self.base).and_then(MessageId::from_offset)
    }
}

/// Decode a standard frame into a message. Malformed and foreign frames yield `None`.
pub fn decode(ids: &IdMap, raw_id: u16, data: &[u8]) -> Option<UpdateMessage> {
    if raw_id == UPLOADER_ALERT_ID {
        return data
            .first()
            .map(|&node_id| UpdateMessage::UploaderAlert { node_id });
    }

    let message = match ids.classify(raw_id)? {
        MessageId::ResetRequest => UpdateMessage::ResetRequest,
        MessageId::GetInfo => UpdateMessage::GetInfo,
        MessageId::WriteMemory => {
            let (address, len) = decode_window(data)?;
            UpdateMessage::WriteMemory { address, len }
        }
        MessageId::ReadMemory => {
            let (address, len) = decode_window(data)?;
            UpdateMessage::ReadMemory { address, len }
        }
        MessageId::WriteData if !data.is_empty() => UpdateMessage::WriteData(Chunk::new(data)?),
        MessageId::ReadData if !data.is_empty() => UpdateMessage::ReadData(Chunk::new(data)?),
        MessageId::WriteData | MessageId::ReadData => return None,
    };

    Some(message)
}

fn decode_window(data: &[u8]) -> Option<(u32, u32)> {
    let address = u32::from_le_bytes(data.get(0..4)?.try_into().ok()?);
    let len = u16::from_le_bytes(data.get(4..6)?.try_into().ok()?);
    Some((address, len as u32))
}

/// Payload of a write-memory or read-memory request.
pub fn encode_window(address: u32, len: u16) -> [u8; 6] {
    let mut payload = [0u8; 6];
    payload[..4].copy_from_slice(&address.to_le_bytes());
    payload[4..].copy_from_slice(&len.to_le_bytes());
    payload
}

/// Answer to a get-info request.
pub fn encode_info(bootloader: &BootloaderInfo, module: &ModuleInfo) -> [u8; 8] {
    let page_size = bootloader.page_size.to_le_bytes();
    [
        bootloader.abi_version as u8,
        bootloader.version_major,
        bootloader.version_minor,
        bootloader.version_patch,
        page_size[0],
        page_size[1],
        module.node_id,
        module.kind,
    ]
}

pub fn encode_alert(module: &ModuleInfo) -> [u8; 4] {
    let bitrate = module.bitrate_kbps.to_le_bytes();
    [module.node_id, module.kind, bitrate[0], bitrate[1]]
}

/// Single byte answer to write data that completed a page.
pub const fn status_code(result: Result<(), Error>) -> u8 {
    match result {
        Ok(()) => 0x00,
        Err(Error::Erase) => 0x01,
        Err(Error::Program) => 0x02,
        Err(Error::Verify) => 0x03,
        Err(Error::OutOfBounds) => 0x04,
        Err(Error::Misaligned) => 0x05,
        Err(Error::AbiMismatch) => 0xff,
    }
}
