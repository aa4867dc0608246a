//! Marker kept in a NOR flash partition, for parts without EEPROM.
//!
//! Leverages `sequential-storage` and `postcard` to store and serialize/deserialize the marker,
//! which spreads the wear over the whole partition.
//! The storage is asynchronous; the marker store contract is blocking, so every access is driven to completion
//! with `embassy_futures::block_on`.

use core::marker::PhantomData;

use embedded_storage_async::nor_flash::NorFlash;
use sequential_storage::{
    cache::NoCache,
    map::{SerializationError, Value},
};

use crate::{
    hal::{CriticalSection, Interrupts},
    marker::{Marker, MarkerStore},
};

/// Key of the marker item in the map.
const MARKER_KEY: u8 = 0;

/// Scratch for the item key and payload; postcard encodes the marker as a single varint tag.
const DATA_BUFFER_SIZE: usize = 32;

impl<'a> Value<'a> for Marker {
    fn serialize_into(&self, buffer: &mut [u8]) -> Result<usize, SerializationError> {
        let buffer = postcard::to_slice(self, buffer).map_err(|e| match e {
            postcard::Error::SerializeBufferFull => SerializationError::BufferTooSmall,
            _ => SerializationError::Custom(0),
        })?;

        Ok(buffer.len())
    }

    fn deserialize_from(buffer: &'a [u8]) -> Result<Self, SerializationError>
    where
        Self: Sized,
    {
        postcard::from_bytes(buffer).map_err(|e| match e {
            postcard::Error::DeserializeUnexpectedEnd => SerializationError::BufferTooSmall,
            postcard::Error::DeserializeBadVarint
            | postcard::Error::DeserializeBadEnum
            | postcard::Error::DeserializeBadEncoding => SerializationError::InvalidFormat,
            _ => SerializationError::Custom(0),
        })
    }
}

pub struct FlashMarker<NVM: NorFlash, I: Interrupts> {
    nvm: NVM,
    _interrupts: PhantomData<I>,
}

impl<NVM: NorFlash, I: Interrupts> FlashMarker<NVM, I> {
    /// The partition must span at least two erase pages.
    pub fn new(nvm: NVM) -> Self {
        Self {
            nvm,
            _interrupts: PhantomData,
        }
    }

    pub fn release(self) -> NVM {
        self.nvm
    }

    fn range(&self) -> core::ops::Range<u32> {
        0..self.nvm.capacity() as u32
    }

    fn fetch(&mut self) -> Marker {
        let range = self.range();
        let mut data_buffer = [0u8; DATA_BUFFER_SIZE];

        let fetched = embassy_futures::block_on(sequential_storage::map::fetch_item::<
            u8,
            Marker,
            _,
        >(
            &mut self.nvm,
            range,
            &mut NoCache::new(),
            &mut data_buffer,
            &MARKER_KEY,
        ));

        match fetched {
            Ok(Some(marker)) => marker,
            Ok(None) => {
                debug!("marker partition holds no marker");
                Marker::Dirty
            }
            Err(_) => {
                warn!("marker partition unreadable");
                Marker::Dirty
            }
        }
    }
}

impl<NVM: NorFlash, I: Interrupts> MarkerStore for FlashMarker<NVM, I> {
    fn read_marker(&mut self) -> Marker {
        let _cs = CriticalSection::<I>::enter();
        self.fetch()
    }

    fn write_marker(&mut self, marker: Marker) {
        let _cs = CriticalSection::<I>::enter();

        if self.fetch() == marker {
            return;
        }

        let range = self.range();
        let mut data_buffer = [0u8; DATA_BUFFER_SIZE];

        debug!("marker <- {}", marker);
        let stored = embassy_futures::block_on(sequential_storage::map::store_item::<
            u8,
            Marker,
            _,
        >(
            &mut self.nvm,
            range,
            &mut NoCache::new(),
            &mut data_buffer,
            &MARKER_KEY,
            &marker,
        ));

        if stored.is_err() {
            // Nothing to report to: an unreadable marker reads as dirty, which is the safe side.
            warn!("storing marker failed");
        }
    }
}
