//! Adapter from an [`embedded_hal::spi::SpiBus`] plus an [`embedded_hal::digital::OutputPin`]
//! chip select to this crate's [`Spi`] trait.
//!
//! The cartridge needs chip select under manual control (a pipelined read keeps it low across
//! many calls), so this takes the raw bus rather than an `SpiDevice`.
//!
//! `SpiBus` transfers are blocking, so the byte is exchanged in
//! [`start_transfer`](Spi::start_transfer) and handed out by
//! [`finish_transfer`](Spi::finish_transfer). A target with a shift-register style SPI can
//! implement [`Spi`] directly and get real overlap.
//!
//! # Example
//!
//! ```ignore
//! use flashcart::{hal::HalSpi, Cart, PageAssignment};
//!
//! let cs = Output::new(p.PD2, Level::High);
//! let spi = HalSpi::new(spi_bus, cs);
//! let pages = PageAssignment::resolve(program_image, DEV_DATA_PAGE, DEV_SAVE_PAGE);
//! let mut cart = Cart::begin(spi, pages)?;
//! ```

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

use crate::{Error, Spi};

/// Wraps an SPI bus and chip-select pin and implements this crate's [`Spi`] trait.
#[derive(Debug)]
pub struct HalSpi<SPI, CS> {
    spi: SPI,
    cs: CS,
    received: u8,
}

impl<SPI, CS> HalSpi<SPI, CS> {
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self {
            spi,
            cs,
            received: 0xFF,
        }
    }

    /// Return the bus and pin.
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }
}

impl<SPI, CS> Spi for HalSpi<SPI, CS>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
{
    fn select(&mut self) -> Result<(), Error> {
        self.cs.set_low().map_err(|_| Error::ChipSelect)
    }

    fn deselect(&mut self) -> Result<(), Error> {
        self.spi.flush().map_err(|_| Error::Bus)?;
        self.cs.set_high().map_err(|_| Error::ChipSelect)
    }

    fn start_transfer(&mut self, byte: u8) -> Result<(), Error> {
        let mut buf = [byte];
        self.spi
            .transfer_in_place(&mut buf)
            .map_err(|_| Error::Bus)?;
        self.received = buf[0];
        Ok(())
    }

    fn finish_transfer(&mut self) -> Result<u8, Error> {
        Ok(self.received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cart, PageAssignment};
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType as PinErrorType;
    use embedded_hal::spi::{ErrorKind, ErrorType as SpiErrorType};
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Event {
        Low,
        High,
        Byte(u8),
        Flush,
    }

    /// Bus that answers every byte with its complement and logs everything.
    #[derive(Default)]
    struct LoggingBus {
        events: Vec<Event>,
        fail: bool,
    }

    impl SpiErrorType for LoggingBus {
        type Error = ErrorKind;
    }

    impl SpiBus<u8> for LoggingBus {
        fn read(&mut self, words: &mut [u8]) -> Result<(), ErrorKind> {
            words.fill(0xFF);
            Ok(())
        }

        fn write(&mut self, words: &[u8]) -> Result<(), ErrorKind> {
            self.events.extend(words.iter().map(|b| Event::Byte(*b)));
            Ok(())
        }

        fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), ErrorKind> {
            for (r, w) in read.iter_mut().zip(write) {
                self.events.push(Event::Byte(*w));
                *r = !*w;
            }
            Ok(())
        }

        fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), ErrorKind> {
            if self.fail {
                return Err(ErrorKind::Overrun);
            }
            for w in words.iter_mut() {
                self.events.push(Event::Byte(*w));
                *w = !*w;
            }
            Ok(())
        }

        fn flush(&mut self) -> Result<(), ErrorKind> {
            self.events.push(Event::Flush);
            Ok(())
        }
    }

    /// Chip select that records its edges into a shared log.
    struct Pin<'a>(&'a core::cell::RefCell<Vec<Event>>);

    impl PinErrorType for Pin<'_> {
        type Error = Infallible;
    }

    impl OutputPin for Pin<'_> {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().push(Event::Low);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.borrow_mut().push(Event::High);
            Ok(())
        }
    }

    #[test]
    fn test_write_command_frames_byte_with_chip_select() {
        let pins = core::cell::RefCell::new(Vec::new());
        let mut cart = Cart::new(
            HalSpi::new(LoggingBus::default(), Pin(&pins)),
            PageAssignment::new(0, 0),
        );
        cart.sleep().unwrap();

        let (bus, _) = cart.release().release();
        assert_eq!(bus.events, vec![Event::Byte(0xB9), Event::Flush]);
        assert_eq!(*pins.borrow(), vec![Event::Low, Event::High]);
    }

    #[test]
    fn test_pipelined_read_returns_received_bytes() {
        let pins = core::cell::RefCell::new(Vec::new());
        let mut cart = Cart::new(
            HalSpi::new(LoggingBus::default(), Pin(&pins)),
            PageAssignment::new(0x0001, 0),
        );
        let mut read = cart.seek_data(0x23).unwrap();
        // the bus echoes the complement of the dummy clock byte
        assert_eq!(read.read_u8().unwrap(), 0xFF);
        assert_eq!(read.end().unwrap(), 0xFF);

        let (bus, _) = cart.release().release();
        assert_eq!(
            bus.events,
            vec![
                Event::Byte(0x03),
                Event::Byte(0x00),
                Event::Byte(0x01),
                Event::Byte(0x23),
                Event::Byte(0x00),
                Event::Byte(0x00),
                Event::Flush,
            ]
        );
        assert_eq!(*pins.borrow(), vec![Event::Low, Event::High]);
    }

    #[test]
    fn test_bus_errors_are_reported() {
        let pins = core::cell::RefCell::new(Vec::new());
        let bus = LoggingBus {
            fail: true,
            ..LoggingBus::default()
        };
        let mut cart = Cart::new(HalSpi::new(bus, Pin(&pins)), PageAssignment::new(0, 0));
        assert_eq!(cart.wake_up(), Err(Error::Bus));
    }
}
