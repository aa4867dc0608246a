//! Firmware transfer over CAN.
//!
//! On `init` the node joins the bus and alerts uploaders that it waits for firmware,
//! repeating the alert until an uploader talks to it.
//! Without any message for [`CanConfig::timeout_ticks`] ticks it gives up and resumes the installed application.

use embedded_can::{Frame, Id, StandardId};

use crate::{
    hal::CanPeripheral,
    module::{Action, Module, Reply, UpdateMessage},
    trampoline::{ModuleInfo, ModuleKind},
};

pub mod protocol;

use protocol::{IdMap, MessageId};

/// Frames drained per [`Module::receive`] call while looking for one addressed to this node.
const MAX_FRAMES_PER_POLL: usize = 16;

/// Transmit attempts on full mailboxes before a frame is dropped, so that a bus-off controller
/// cannot stall the event loop past the watchdog.
const MAX_TRANSMIT_ATTEMPTS: usize = 1024;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanConfig {
    pub base_id: u16,
    pub node_id: u8,
    pub bitrate_kbps: u16,
    /// Periodic ticks without a message before the application is resumed.
    pub timeout_ticks: u16,
    /// Periodic ticks between uploader alerts, until the first message arrives.
    pub alert_interval_ticks: u16,
}

impl CanConfig {
    pub const fn new(node_id: u8) -> Self {
        Self {
            base_id: protocol::DEFAULT_BASE_ID,
            node_id,
            bitrate_kbps: 500,
            timeout_ticks: 50,
            alert_interval_ticks: 10,
        }
    }
}

pub struct CanModule<C> {
    can: C,
    config: CanConfig,
    ids: IdMap,
    idle_ticks: u16,
    alert_ticks: u16,
    contacted: bool,
}

impl<C> CanModule<C>
where
    C: embedded_can::nb::Can + CanPeripheral,
{
    pub fn new(can: C, config: CanConfig) -> Self {
        Self {
            can,
            ids: IdMap::new(config.base_id, config.node_id),
            config,
            idle_ticks: 0,
            alert_ticks: 0,
            contacted: false,
        }
    }

    pub fn release(self) -> C {
        self.can
    }

    fn send(&mut self, raw_id: u16, data: &[u8]) {
        let Some(frame) = StandardId::new(raw_id).and_then(|id| C::Frame::new(id, data)) else {
            warn!("cannot build frame {=u16:#x}", raw_id);
            return;
        };

        for _ in 0..MAX_TRANSMIT_ATTEMPTS {
            match self.can.transmit(&frame) {
                Ok(_) => return,
                Err(nb::Error::WouldBlock) => continue,
                Err(nb::Error::Other(_)) => {
                    warn!("transmit on {=u16:#x} failed", raw_id);
                    return;
                }
            }
        }

        warn!("mailboxes full, dropped frame on {=u16:#x}", raw_id);
    }

    fn send_alert(&mut self) {
        debug!("alerting uploader");
        let payload = protocol::encode_alert(&self.info());
        self.send(protocol::UPLOADER_ALERT_ID, &payload);
    }

    fn decode(&self, frame: &C::Frame) -> Option<UpdateMessage> {
        if frame.is_remote_frame() {
            return None;
        }

        match frame.id() {
            Id::Standard(id) => protocol::decode(&self.ids, id.as_raw(), frame.data()),
            Id::Extended(_) => None,
        }
    }
}

impl<C> Module for CanModule<C>
where
    C: embedded_can::nb::Can + CanPeripheral,
{
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new(ModuleKind::Can, self.config.node_id, self.config.bitrate_kbps)
    }

    fn init(&mut self) {
        info!(
            "CAN node {=u8} at {=u16} kbit/s",
            self.config.node_id, self.config.bitrate_kbps
        );
        self.can.enable(self.config.bitrate_kbps);

        self.idle_ticks = 0;
        self.alert_ticks = 0;
        self.contacted = false;
        self.send_alert();
    }

    fn exit(&mut self) {
        self.can.disable();
    }

    fn on_idle(&mut self) -> Action {
        Action::Continue
    }

    fn on_periodic(&mut self) -> Action {
        self.idle_ticks = self.idle_ticks.saturating_add(1);
        if self.idle_ticks >= self.config.timeout_ticks {
            info!("no uploader within {=u16} ticks", self.config.timeout_ticks);
            return Action::RunApplication;
        }

        if !self.contacted {
            self.alert_ticks += 1;
            if self.alert_ticks >= self.config.alert_interval_ticks {
                self.alert_ticks = 0;
                self.send_alert();
            }
        }

        Action::Continue
    }

    fn receive(&mut self) -> Option<UpdateMessage> {
        for _ in 0..MAX_FRAMES_PER_POLL {
            let frame = match self.can.receive() {
                Ok(frame) => frame,
                Err(nb::Error::WouldBlock) => return None,
                Err(nb::Error::Other(_)) => {
                    warn!("CAN receive error");
                    return None;
                }
            };

            match self.decode(&frame) {
                // Other nodes calling for an uploader do not keep this one waiting.
                Some(message @ UpdateMessage::UploaderAlert { .. }) => return Some(message),
                Some(message) => {
                    self.idle_ticks = 0;
                    self.contacted = true;
                    return Some(message);
                }
                None => continue,
            }
        }

        None
    }

    fn reply(&mut self, reply: Reply<'_>) {
        match reply {
            Reply::Info(bootloader) => {
                let payload = protocol::encode_info(bootloader, &self.info());
                self.send(self.ids.response(MessageId::GetInfo), &payload);
            }
            Reply::WriteStatus(result) => {
                let payload = [protocol::status_code(result)];
                self.send(self.ids.response(MessageId::WriteData), &payload);
            }
            Reply::ReadData(data) => {
                self.send(self.ids.response(MessageId::ReadData), data);
            }
        }
    }
}
