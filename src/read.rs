//! Pipelined read cursor.
//!
//! After the READ command and address, the flash shifts out consecutive bytes for as long as
//! the chip stays selected. [`PendingRead`] keeps exactly one byte clock in flight: each read
//! waits for that clock, keeps its byte, and immediately starts the next clock so the bus works
//! while the caller processes the byte. The last byte of a sequence is taken with one of the
//! `end` methods, which deselect the chip instead of clocking again.

use crate::{Error, Spi};

/// An open READ command. Borrows the driver until ended.
///
/// Dropping a `PendingRead` without calling an `end` method still waits for the in-flight
/// byte and deselects the chip, but discards any bus error.
pub struct PendingRead<'a, S: Spi> {
    spi: &'a mut S,
    open: bool,
}

impl<'a, S: Spi> PendingRead<'a, S> {
    /// Issue the first data clock. The READ opcode and address must already be sent.
    pub(crate) fn start(spi: &'a mut S) -> Result<Self, Error> {
        spi.start_transfer(0)?;
        Ok(PendingRead { spi, open: true })
    }

    /// Return the byte in flight and start clocking the next one.
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8, Error> {
        let byte = self.spi.finish_transfer()?;
        self.spi.start_transfer(0)?;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> Result<u16, Error> {
        let hi = self.read_u8()?;
        Ok(u16::from_be_bytes([hi, self.read_u8()?]))
    }

    /// Read a 24-bit big-endian value into the low bits of a `u32`.
    pub fn read_u24(&mut self) -> Result<u32, Error> {
        let hi = self.read_u16()?;
        Ok(u32::from(hi) << 8 | u32::from(self.read_u8()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        let hi = self.read_u16()?;
        Ok(u32::from(hi) << 16 | u32::from(self.read_u16()?))
    }

    /// Fill `buf` from the stream, leaving the read open.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        for byte in buf.iter_mut() {
            *byte = self.read_u8()?;
        }
        Ok(())
    }

    /// Return the byte in flight and deselect the chip.
    pub fn end(mut self) -> Result<u8, Error> {
        self.open = false;
        let byte = self.spi.finish_transfer();
        self.spi.deselect()?;
        byte
    }

    pub fn end_u16(mut self) -> Result<u16, Error> {
        let hi = self.read_u8()?;
        Ok(u16::from_be_bytes([hi, self.end()?]))
    }

    pub fn end_u24(mut self) -> Result<u32, Error> {
        let hi = self.read_u16()?;
        Ok(u32::from(hi) << 8 | u32::from(self.end()?))
    }

    pub fn end_u32(mut self) -> Result<u32, Error> {
        let hi = self.read_u16()?;
        Ok(u32::from(hi) << 16 | u32::from(self.end_u16()?))
    }

    /// Fill `buf` and end the read, taking the last byte with [`end`](Self::end). An empty
    /// buffer just ends the read.
    pub fn read_into_end(mut self, buf: &mut [u8]) -> Result<(), Error> {
        match buf.split_last_mut() {
            Some((last, head)) => {
                self.read_into(head)?;
                *last = self.end()?;
            }
            None => {
                self.end()?;
            }
        }
        Ok(())
    }
}

impl<S: Spi> Drop for PendingRead<'_, S> {
    fn drop(&mut self) {
        if self.open {
            let _ = self.spi.finish_transfer();
            let _ = self.spi.deselect();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::sim::SimFlash;
    use crate::{Cart, PageAssignment};
    use pretty_assertions::assert_eq;

    fn loaded_cart(bytes: &[u8]) -> Cart<SimFlash> {
        let mut sim = SimFlash::default();
        sim.load(0, bytes);
        Cart::new(sim, PageAssignment::new(0, 0))
    }

    #[test]
    fn test_every_byte_is_clocked_before_it_is_returned() {
        let mut cart = loaded_cart(&[1, 2, 3]);
        let mut read = cart.begin_read(0).unwrap();
        read.read_u8().unwrap();
        read.read_u8().unwrap();
        read.end().unwrap();

        // opcode + 3 address bytes + one clock per data byte
        assert_eq!(cart.spi().transactions()[0].len(), 4 + 3);
        assert_eq!(cart.spi().violations(), 0);
    }

    #[test]
    fn test_dropped_read_deselects() {
        let mut cart = loaded_cart(&[9, 8, 7]);
        {
            let mut read = cart.begin_read(0).unwrap();
            assert_eq!(read.read_u8().unwrap(), 9);
        }
        assert!(!cart.spi().is_selected());
        assert_eq!(cart.spi().violations(), 0);

        // the next command starts cleanly
        assert_eq!(cart.begin_read(2).unwrap().end().unwrap(), 7);
    }

    #[test]
    fn test_early_return_from_end_variant_closes_read() {
        let mut cart = loaded_cart(&[0xAB, 0xCD, 0xEF]);
        assert_eq!(cart.begin_read(0).unwrap().end_u24().unwrap(), 0xAB_CDEF);
        assert!(!cart.spi().is_selected());
    }

    #[test]
    fn test_read_into_end_fills_buffer() {
        let data: Vec<u8> = (0..=255).collect();
        let mut cart = loaded_cart(&data);
        let mut buf = [0u8; 10];
        cart.begin_read(100).unwrap().read_into_end(&mut buf).unwrap();
        assert_eq!(buf.to_vec(), data[100..110].to_vec());
        assert_eq!(cart.spi().violations(), 0);
    }

    #[test]
    fn test_read_into_keeps_stream_open() {
        let mut cart = loaded_cart(&[1, 2, 3, 4, 5]);
        let mut read = cart.begin_read(0).unwrap();
        let mut head = [0u8; 2];
        read.read_into(&mut head).unwrap();
        assert_eq!(head, [1, 2]);
        assert_eq!(read.end_u16().unwrap(), 0x0304);
    }
}
