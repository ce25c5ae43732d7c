//! Prelude for convenient imports.
//!
//! ```ignore
//! use flashcart::prelude::*;
//! ```

pub use crate::{
    Cart, DrawMode, Error, Framebuffer, JedecId, PageAssignment, PendingRead, ProgramMemory,
    Spi, Status, Status2, BLOCK_SIZE, PAGE_SIZE,
};

#[cfg(feature = "embedded-hal")]
pub use crate::hal::HalSpi;

#[cfg(feature = "embedded-storage")]
pub use crate::storage::SaveStorage;
