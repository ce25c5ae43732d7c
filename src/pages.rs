//! Data and save area placement.
//!
//! The flashing tool writes each area's base page into a reserved interrupt vector slot of the
//! program image: the slot holds [`VECTOR_KEY`] followed by the page, big-endian. Images that
//! were not placed by the tool (e.g. during development) fall back to pages supplied by the
//! caller.

use log::debug;

use crate::ADDRESS_MASK;

/// Marker word in a page slot (a RETI instruction, so the vector stays harmless).
pub const VECTOR_KEY: u16 = 0x9518;
pub const DATA_VECTOR: u16 = 0x0014;
pub const DATA_PAGE: u16 = 0x0016;
pub const SAVE_VECTOR: u16 = 0x0018;
pub const SAVE_PAGE: u16 = 0x001A;

/// Read access to the program image.
pub trait ProgramMemory {
    fn read_byte(&self, address: u16) -> u8;

    /// Little-endian word, the way the CPU fetches instructions.
    fn read_word(&self, address: u16) -> u16 {
        u16::from_le_bytes([
            self.read_byte(address),
            self.read_byte(address.wrapping_add(1)),
        ])
    }
}

/// Bytes past the end of the slice read as erased flash.
impl ProgramMemory for [u8] {
    fn read_byte(&self, address: u16) -> u8 {
        self.get(usize::from(address)).copied().unwrap_or(0xFF)
    }
}

impl<const N: usize> ProgramMemory for [u8; N] {
    fn read_byte(&self, address: u16) -> u8 {
        self[..].read_byte(address)
    }
}

/// Base pages of the data and save areas, fixed for the lifetime of a driver.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct PageAssignment {
    data_page: u16,
    save_page: u16,
}

impl PageAssignment {
    pub const fn new(data_page: u16, save_page: u16) -> Self {
        Self {
            data_page,
            save_page,
        }
    }

    /// Use the pages recorded in `program`, or the development pages for slots that hold no
    /// key.
    pub fn resolve<P: ProgramMemory + ?Sized>(
        program: &P,
        development_data_page: u16,
        development_save_page: u16,
    ) -> Self {
        let data_page = slot_page(program, DATA_VECTOR, DATA_PAGE, development_data_page);
        let save_page = slot_page(program, SAVE_VECTOR, SAVE_PAGE, development_save_page);
        debug!(
            "page assignment resolved: data {:#06x}, save {:#06x}",
            data_page, save_page
        );
        Self::new(data_page, save_page)
    }

    pub const fn data_page(&self) -> u16 {
        self.data_page
    }

    pub const fn save_page(&self) -> u16 {
        self.save_page
    }

    /// Physical address of a data-area offset.
    pub const fn data_address(&self, offset: u32) -> u32 {
        page_base(self.data_page).wrapping_add(offset) & ADDRESS_MASK
    }

    /// Physical address of a save-area offset.
    pub const fn save_address(&self, offset: u32) -> u32 {
        page_base(self.save_page).wrapping_add(offset) & ADDRESS_MASK
    }

    /// Physical address of element `index` of an array at data offset `offset`.
    pub const fn data_array_address(
        &self,
        offset: u32,
        index: u8,
        extra: u8,
        element_size: u8,
    ) -> u32 {
        self.data_address(offset.wrapping_add(array_offset(index, extra, element_size)))
    }

    /// Physical address of logical save page `page`.
    pub const fn save_page_address(&self, page: u16) -> u32 {
        ((self.save_page as u32 + page as u32) << 8) & ADDRESS_MASK
    }
}

/// Byte offset of element `index` plus `extra`. An `element_size` of 0 stands for 256, the
/// value an 8-bit size field wraps to.
pub const fn array_offset(index: u8, extra: u8, element_size: u8) -> u32 {
    let size = if element_size == 0 {
        256
    } else {
        element_size as u32
    };
    index as u32 * size + extra as u32
}

const fn page_base(page: u16) -> u32 {
    (page as u32) << 8
}

fn slot_page<P: ProgramMemory + ?Sized>(
    program: &P,
    vector: u16,
    page: u16,
    default: u16,
) -> u16 {
    if program.read_word(vector) == VECTOR_KEY {
        u16::from_be_bytes([program.read_byte(page), program.read_byte(page + 1)])
    } else {
        default
    }
}
