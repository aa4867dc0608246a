use std::{collections::VecDeque, vec::Vec};

use embedded_can::{ErrorKind, ExtendedId, Frame, Id, StandardId};

use crate::hal::CanPeripheral;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MockFrame {
    id: Id,
    data: Vec<u8>,
    remote: bool,
}

impl MockFrame {
    pub fn standard(raw: u16, data: &[u8]) -> Self {
        Self::new(StandardId::new(raw).unwrap(), data).unwrap()
    }

    pub fn extended(raw: u32, data: &[u8]) -> Self {
        Self::new(ExtendedId::new(raw).unwrap(), data).unwrap()
    }

    pub fn raw_id(&self) -> u16 {
        match self.id {
            Id::Standard(id) => id.as_raw(),
            Id::Extended(_) => unimplemented!(),
        }
    }
}

impl Frame for MockFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        (data.len() <= 8).then(|| Self {
            id: id.into(),
            data: data.to_vec(),
            remote: false,
        })
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        (dlc <= 8).then(|| Self {
            id: id.into(),
            data: std::vec![0; dlc],
            remote: true,
        })
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.data.len()
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

/// CAN controller with a scripted receive queue, recording what is sent.
pub struct MockCan {
    pub sent: Vec<MockFrame>,
    pub enabled_at: Option<u16>,
    pub disable_calls: usize,
    /// Upcoming transmit attempts that find the mailboxes full.
    pub busy: usize,
    inbox: VecDeque<MockFrame>,
}

impl MockCan {
    pub fn new() -> Self {
        Self {
            sent: Vec::new(),
            enabled_at: None,
            disable_calls: 0,
            busy: 0,
            inbox: VecDeque::new(),
        }
    }

    pub fn push(&mut self, frame: MockFrame) {
        self.inbox.push_back(frame);
    }
}

impl embedded_can::nb::Can for MockCan {
    type Frame = MockFrame;
    type Error = ErrorKind;

    fn transmit(&mut self, frame: &Self::Frame) -> nb::Result<Option<Self::Frame>, Self::Error> {
        if self.busy > 0 {
            self.busy -= 1;
            return Err(nb::Error::WouldBlock);
        }
        self.sent.push(frame.clone());
        Ok(None)
    }

    fn receive(&mut self) -> nb::Result<Self::Frame, Self::Error> {
        self.inbox.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl CanPeripheral for MockCan {
    fn enable(&mut self, bitrate_kbps: u16) {
        self.enabled_at = Some(bitrate_kbps);
    }

    fn disable(&mut self) {
        self.enabled_at = None;
        self.disable_calls += 1;
    }
}
