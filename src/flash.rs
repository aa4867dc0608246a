//! Page-granular programming of program memory.

use core::marker::PhantomData;

use crate::{
    Error,
    hal::{CriticalSection, Interrupts, ProgramMemory},
};

/// Erases and programs whole pages of `PAGE_SIZE` bytes.
///
/// The programmer is the only user of program memory while a page is being written.
/// It does not verify what it wrote, see [`FlashProgrammer::verify`].
pub struct FlashProgrammer<P: ProgramMemory, I: Interrupts, const PAGE_SIZE: usize> {
    memory: P,
    _interrupts: PhantomData<I>,
}

impl<P: ProgramMemory, I: Interrupts, const PAGE_SIZE: usize> FlashProgrammer<P, I, PAGE_SIZE> {
    /// Pages are filled one word at a time, with word offsets fitting the hardware's `u16`.
    const VALID_PAGE_SIZE: () = assert!(
        PAGE_SIZE > 0 && PAGE_SIZE % 2 == 0 && PAGE_SIZE <= u16::MAX as usize,
        "page size must be a non-zero even number of bytes"
    );

    pub fn new(memory: P) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_PAGE_SIZE;

        Self {
            memory,
            _interrupts: PhantomData,
        }
    }

    pub const fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    /// Erase the page at `page_address` and program it with `data`.
    ///
    /// Bytes beyond `data.len()` are programmed as zero.
    /// Runs with interrupts disabled and restores them to the state found on entry.
    /// Blocks until the hardware has finished; the caller pets the watchdog before and after.
    pub fn flash_page(&mut self, page_address: u32, data: &[u8]) -> Result<(), Error> {
        if page_address % PAGE_SIZE as u32 != 0 || data.len() > PAGE_SIZE {
            return Err(Error::Misaligned);
        }

        let _cs = CriticalSection::<I>::enter();

        let result = self.program(page_address, data);

        // Also after a failure: code keeps executing from this memory.
        self.memory.enable_read_while_write();

        match result {
            Ok(()) => trace!("programmed page {=u32:#x}", page_address),
            Err(e) => warn!("programming page {=u32:#x} failed: {}", page_address, e),
        }

        result
    }

    fn program(&mut self, page_address: u32, data: &[u8]) -> Result<(), Error> {
        self.memory.wait_ready();

        self.memory.erase(page_address)?;
        self.memory.wait_ready();

        for offset in (0..PAGE_SIZE).step_by(2) {
            let low = data.get(offset).copied().unwrap_or(0);
            let high = data.get(offset + 1).copied().unwrap_or(0);
            self.memory
                .fill_word(offset as u16, u16::from_le_bytes([low, high]));
        }

        self.memory.commit(page_address)?;
        self.memory.wait_ready();

        Ok(())
    }

    /// Compare the page at `page_address` with `data`, zero-padded to a full page.
    pub fn verify(&mut self, page_address: u32, data: &[u8]) -> Result<(), Error> {
        let mut chunk = [0u8; 16];

        for start in (0..PAGE_SIZE).step_by(chunk.len()) {
            let len = chunk.len().min(PAGE_SIZE - start);
            let chunk = &mut chunk[..len];
            self.memory.read(page_address + start as u32, chunk);

            let matches = chunk.iter().enumerate().all(|(i, byte)| {
                *byte == data.get(start + i).copied().unwrap_or(0)
            });
            if !matches {
                warn!("page {=u32:#x} differs at {=usize}", page_address, start);
                return Err(Error::Verify);
            }
        }

        Ok(())
    }

    /// Read program memory, for answering read-memory requests.
    pub fn read(&mut self, address: u32, buf: &mut [u8]) {
        self.memory.read(address, buf)
    }

    pub fn release(self) -> P {
        self.memory
    }

    #[cfg(test)]
    pub(crate) fn memory(&mut self) -> &mut P {
        &mut self.memory
    }
}
