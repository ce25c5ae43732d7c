//! [`embedded_storage`] NOR flash traits over the save area.
//!
//! Offsets are relative to the save area's base page. Writes must cover whole program pages
//! and erases whole blocks; the caller erases before writing.

use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

use crate::{Cart, Error, Spi, BLOCK_SIZE, PAGE_SIZE};

impl NorFlashError for Error {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Error::AddressOutOfBounds(_) | Error::BufferSizeInvalid(_) => {
                NorFlashErrorKind::OutOfBounds
            }
            Error::NotAligned(_) => NorFlashErrorKind::NotAligned,
            Error::Bus | Error::ChipSelect => NorFlashErrorKind::Other,
        }
    }
}

/// Save area of `blocks` erase blocks, borrowed from a [`Cart`].
pub struct SaveStorage<'a, S: Spi> {
    cart: &'a mut Cart<S>,
    blocks: u16,
}

impl<S: Spi> Cart<S> {
    /// View the first `blocks` erase blocks of the save area as NOR flash.
    pub fn save_storage(&mut self, blocks: u16) -> SaveStorage<'_, S> {
        SaveStorage { cart: self, blocks }
    }
}

impl<S: Spi> SaveStorage<'_, S> {
    fn check_range(&self, offset: u32, len: usize) -> Result<(), Error> {
        let end = u64::from(offset) + len as u64;
        if end > self.capacity() as u64 {
            return Err(Error::AddressOutOfBounds(offset));
        }
        Ok(())
    }
}

impl<S: Spi> ErrorType for SaveStorage<'_, S> {
    type Error = Error;
}

impl<S: Spi> ReadNorFlash for SaveStorage<'_, S> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.check_range(offset, bytes.len())?;
        self.cart.read_save_bytes(offset, bytes)
    }

    fn capacity(&self) -> usize {
        usize::from(self.blocks) * BLOCK_SIZE as usize
    }
}

impl<S: Spi> NorFlash for SaveStorage<'_, S> {
    const WRITE_SIZE: usize = PAGE_SIZE;
    const ERASE_SIZE: usize = BLOCK_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from > to {
            return Err(Error::AddressOutOfBounds(from));
        }
        self.check_range(from, (to - from) as usize)?;
        if from % BLOCK_SIZE != 0 {
            return Err(Error::NotAligned(from));
        }
        if to % BLOCK_SIZE != 0 {
            return Err(Error::NotAligned(to));
        }
        for block_start in (from..to).step_by(BLOCK_SIZE as usize) {
            self.cart.erase_save_block((block_start / PAGE_SIZE as u32) as u16)?;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.check_range(offset, bytes.len())?;
        if offset % PAGE_SIZE as u32 != 0 {
            return Err(Error::NotAligned(offset));
        }
        if bytes.len() % PAGE_SIZE != 0 {
            return Err(Error::BufferSizeInvalid(bytes.len()));
        }
        let first_page = offset / PAGE_SIZE as u32;
        for (i, chunk) in bytes.chunks_exact(PAGE_SIZE).enumerate() {
            let page: &[u8; PAGE_SIZE] = chunk
                .try_into()
                .map_err(|_| Error::BufferSizeInvalid(chunk.len()))?;
            self.cart
                .write_save_page((first_page + i as u32) as u16, page)?;
        }
        Ok(())
    }
}
