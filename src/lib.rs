//! no_std driver for a serial NOR flash used as a game cartridge, with a bitmap blitter that
//! composites 1bpp images straight from flash into a page-packed display buffer.
//!
//! The flash is split into a read-only *data* area and a read-write *save* area. Their base
//! pages are fixed once at start-up (see [`PageAssignment`]) and every logical offset is
//! translated to a 24-bit physical address by adding the area's page shifted left by 8.
//!
//! Reads are pipelined: opening a read ([`Cart::begin_read`]) clocks the first data byte before
//! the caller asks for it, and every [`PendingRead::read_u8`] harvests the byte in flight while
//! clocking the next one. The returned [`PendingRead`] borrows the driver mutably, so no other
//! command can be issued until the read is ended.
//!
//! ## Implemented instructions
//!
//! | Opcode | Mnemonic | Method |
//! |--------|----------|--------|
//! | 03h | READ | `begin_read`, `seek_data`, `seek_save`, `read_bytes`, `draw_bitmap` |
//! | 04h | WRITE | `write_page`, `write_save_page` |
//! | 05h | RDSR1 | `read_status` |
//! | 06h | WREN | `write_enable` |
//! | 20h | ERASE (4K) | `erase_block`, `erase_save_block` |
//! | 35h | RDSR2 | `read_status2` |
//! | 9Fh | RDID | `read_jedec_id` |
//! | ABh | Release DP | `wake_up`, `begin` |
//! | B9h | Enter DP | `sleep` |
//!
//! ## Contract
//!
//! Nothing here polls the busy flag. Starting a read, erase or program while the part is still
//! finishing a previous erase or program is a caller error with undefined results; so is
//! reading or writing while the part is powered down.
//!
//! The compiler rejects issuing a command while a read is open:
//!
//! ```compile_fail
//! use flashcart::{sim::SimFlash, Cart, PageAssignment};
//!
//! let mut cart = Cart::new(SimFlash::default(), PageAssignment::new(0, 0));
//! let read = cart.seek_data(0).unwrap();
//! cart.sleep().unwrap();
//! read.end().unwrap();
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod bitmap;
pub mod pages;
pub mod prelude;
pub mod read;

#[cfg(feature = "embedded-hal")]
pub mod hal;

#[cfg(any(test, feature = "std"))]
pub mod sim;

#[cfg(feature = "embedded-storage")]
pub mod storage;

pub use bitmap::{DrawMode, Framebuffer};
pub use pages::{PageAssignment, ProgramMemory};
pub use read::PendingRead;

use log::{debug, trace};
use modular_bitfield::prelude::*;

/// Program page size in bytes. `write_page` always programs exactly one page.
pub const PAGE_SIZE: usize = 256;

/// Granularity of the 20h erase command.
pub const BLOCK_SIZE: u32 = 4 * 1024;

/// Physical addresses are 24 bits on the wire.
pub const ADDRESS_MASK: u32 = 0x00FF_FFFF;

/// JEDEC manufacturer and device identification (RDID 9Fh response).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct JedecId {
    /// Manufacturer ID (e.g. 0xEF for Winbond).
    pub mfr_code: u8,
    /// Memory type.
    pub memory_type: u8,
    /// Capacity code (e.g. 0x18 = 128 Mbit).
    pub capacity: u8,
}

impl JedecId {
    /// Build from the 3 bytes clocked in after the RDID opcode.
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Self {
            mfr_code: bytes[0],
            memory_type: bytes[1],
            capacity: bytes[2],
        }
    }

    /// Chip size in bytes, if the capacity code follows the usual `2^n` convention.
    pub fn size_bytes(&self) -> Option<u32> {
        match self.capacity {
            0x10..=0x1F => Some(1 << self.capacity),
            _ => None,
        }
    }
}

/// Status register 1 (RDSR1 05h).
#[bitfield]
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub struct Status {
    /// Erase or program in progress.
    pub busy: bool,
    /// Write enable latch.
    pub wel: bool,
    pub block_protect: B3,
    pub top_bottom: bool,
    pub sector_protect: bool,
    pub srp0: bool,
}

/// Status register 2 (RDSR2 35h).
#[bitfield]
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub struct Status2 {
    pub srp1: bool,
    pub quad_enable: bool,
    #[skip]
    __: B1,
    pub lock_bits: B3,
    pub complement_protect: bool,
    pub suspended: bool,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Error {
    /// The SPI peripheral reported a transfer failure.
    Bus,
    /// The chip-select pin could not be driven.
    ChipSelect,
    AddressOutOfBounds(u32),
    BufferSizeInvalid(usize),
    /// Offset or length not a multiple of the program/erase unit.
    NotAligned(u32),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub(crate) enum Opcode {
    Read = 0x03,
    Write = 0x04,
    ReadStatus1 = 0x05,
    WriteEnable = 0x06,
    Erase = 0x20,
    ReadStatus2 = 0x35,
    JedecId = 0x9F,
    ReleasePowerDown = 0xAB,
    PowerDown = 0xB9,
}

/// Byte-level access to the flash's SPI lines.
///
/// A transfer is split in two so the driver can overlap the clocking of one byte with work on
/// the previous one: [`start_transfer`](Spi::start_transfer) shifts a byte out and
/// [`finish_transfer`](Spi::finish_transfer) blocks until it is done and returns the byte
/// shifted in. Exactly one transfer may be in flight. There is no timeout; a stuck bus blocks
/// forever.
pub trait Spi {
    /// Assert chip select (drive it low).
    fn select(&mut self) -> Result<(), Error>;
    /// Deassert chip select, ending the current command.
    fn deselect(&mut self) -> Result<(), Error>;
    fn start_transfer(&mut self, byte: u8) -> Result<(), Error>;
    fn finish_transfer(&mut self) -> Result<u8, Error>;

    fn transfer(&mut self, byte: u8) -> Result<u8, Error> {
        self.start_transfer(byte)?;
        self.finish_transfer()
    }
}

/// Flash cartridge driver.
pub struct Cart<S: Spi> {
    spi: S,
    pages: PageAssignment,
}

impl<S: Spi> Cart<S> {
    /// Wrap the bus without talking to the chip. Use [`begin`](Self::begin) to also wake it.
    pub fn new(spi: S, pages: PageAssignment) -> Cart<S> {
        Cart { spi, pages }
    }

    /// Wrap the bus and release the chip from power-down.
    pub fn begin(spi: S, pages: PageAssignment) -> Result<Cart<S>, Error> {
        let mut cart = Cart::new(spi, pages);
        cart.wake_up()?;
        debug!(
            "flash cart ready: data page {:#06x}, save page {:#06x}",
            pages.data_page(),
            pages.save_page()
        );
        Ok(cart)
    }

    pub fn pages(&self) -> PageAssignment {
        self.pages
    }

    pub fn spi(&self) -> &S {
        &self.spi
    }

    /// Give the bus back.
    pub fn release(self) -> S {
        self.spi
    }

    /// Send a single-byte command in its own chip-select frame.
    pub fn write_command(&mut self, command: u8) -> Result<(), Error> {
        self.spi.select()?;
        self.spi.transfer(command)?;
        self.spi.deselect()
    }

    /// Release from power-down. Required before any read or write.
    pub fn wake_up(&mut self) -> Result<(), Error> {
        trace!("flash: release power-down");
        self.write_command(Opcode::ReleasePowerDown as u8)
    }

    /// Enter power-down.
    pub fn sleep(&mut self) -> Result<(), Error> {
        trace!("flash: power-down");
        self.write_command(Opcode::PowerDown as u8)
    }

    /// Set the write enable latch. The chip clears it after every erase or program.
    pub fn write_enable(&mut self) -> Result<(), Error> {
        self.write_command(Opcode::WriteEnable as u8)
    }

    /// Select the chip and send `command` followed by a 24-bit big-endian address. The chip
    /// stays selected.
    fn seek_command(&mut self, command: Opcode, address: u32) -> Result<(), Error> {
        self.spi.select()?;
        self.spi.transfer(command as u8)?;
        for byte in &address.to_be_bytes()[1..4] {
            self.spi.transfer(*byte)?;
        }
        Ok(())
    }

    /// Start a pipelined read at a physical address.
    pub fn begin_read(&mut self, address: u32) -> Result<PendingRead<'_, S>, Error> {
        self.seek_command(Opcode::Read, address & ADDRESS_MASK)?;
        PendingRead::start(&mut self.spi)
    }

    /// Start a pipelined read at an offset into the data area.
    pub fn seek_data(&mut self, offset: u32) -> Result<PendingRead<'_, S>, Error> {
        let address = self.pages.data_address(offset);
        self.begin_read(address)
    }

    /// Start a pipelined read at an offset into the save area.
    pub fn seek_save(&mut self, offset: u32) -> Result<PendingRead<'_, S>, Error> {
        let address = self.pages.save_address(offset);
        self.begin_read(address)
    }

    /// Start a pipelined read at element `index` of a data-area array. An `element_size` of 0
    /// addresses 256-byte elements.
    pub fn seek_data_array(
        &mut self,
        offset: u32,
        index: u8,
        extra: u8,
        element_size: u8,
    ) -> Result<PendingRead<'_, S>, Error> {
        let address = self
            .pages
            .data_array_address(offset, index, extra, element_size);
        self.begin_read(address)
    }

    /// Read `buf.len()` bytes starting at a physical address.
    pub fn read_bytes(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Error> {
        self.begin_read(address)?.read_into_end(buf)
    }

    pub fn read_data_bytes(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Error> {
        self.seek_data(offset)?.read_into_end(buf)
    }

    pub fn read_save_bytes(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Error> {
        self.seek_save(offset)?.read_into_end(buf)
    }

    /// Erase the [`BLOCK_SIZE`] block containing a physical address.
    pub fn erase_block(&mut self, address: u32) -> Result<(), Error> {
        trace!("flash: erase block at {:#08x}", address & ADDRESS_MASK);
        self.write_enable()?;
        self.seek_command(Opcode::Erase, address & ADDRESS_MASK)?;
        self.spi.deselect()
    }

    /// Program one page at a physical address. The page must already be erased; programming
    /// can only clear bits.
    pub fn write_page(&mut self, address: u32, data: &[u8; PAGE_SIZE]) -> Result<(), Error> {
        trace!("flash: program page at {:#08x}", address & ADDRESS_MASK);
        self.write_enable()?;
        self.seek_command(Opcode::Write, address & ADDRESS_MASK)?;
        for byte in data {
            self.spi.transfer(*byte)?;
        }
        self.spi.deselect()
    }

    /// Erase the save-area block holding logical save page `page`.
    pub fn erase_save_block(&mut self, page: u16) -> Result<(), Error> {
        let address = self.pages.save_page_address(page);
        self.erase_block(address)
    }

    /// Program logical save page `page`.
    pub fn write_save_page(&mut self, page: u16, data: &[u8; PAGE_SIZE]) -> Result<(), Error> {
        let address = self.pages.save_page_address(page);
        self.write_page(address, data)
    }

    /// Read JEDEC manufacturer and device identification (RDID 9Fh).
    pub fn read_jedec_id(&mut self) -> Result<JedecId, Error> {
        let mut buf = [0u8; 3];
        self.read_register(Opcode::JedecId, &mut buf)?;
        Ok(JedecId::from_bytes(buf))
    }

    /// Read status register 1. Diagnostic only; no other method polls it.
    pub fn read_status(&mut self) -> Result<Status, Error> {
        let mut buf = [0u8; 1];
        self.read_register(Opcode::ReadStatus1, &mut buf)?;
        Ok(Status::from_bytes(buf))
    }

    pub fn read_status2(&mut self) -> Result<Status2, Error> {
        let mut buf = [0u8; 1];
        self.read_register(Opcode::ReadStatus2, &mut buf)?;
        Ok(Status2::from_bytes(buf))
    }

    fn read_register(&mut self, command: Opcode, buf: &mut [u8]) -> Result<(), Error> {
        self.spi.select()?;
        self.spi.transfer(command as u8)?;
        for byte in buf.iter_mut() {
            *byte = self.spi.transfer(0)?;
        }
        self.spi.deselect()
    }
}
