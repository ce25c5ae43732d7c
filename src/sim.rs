//! Simulated serial flash part for host tests.
//!
//! Models a W25Q128-style chip speaking the command set in the crate docs: continuous READ,
//! page program that can only clear bits and wraps inside its 256-byte page, 4 KiB erase
//! applied when chip select rises, a write enable latch cleared by every program/erase, and
//! power-down during which everything except release is ignored.
//!
//! Besides the memory it records the MOSI bytes of every chip-select frame and counts protocol
//! violations (clocking while deselected, starting a transfer with one already in flight,
//! selecting twice, deselecting mid-transfer) so tests can assert the driver never misuses the
//! bus.

use crate::{Error, Opcode, Spi, ADDRESS_MASK, BLOCK_SIZE, PAGE_SIZE};

pub const DEFAULT_CAPACITY: usize = 16 * 1024 * 1024;

const JEDEC_ID: [u8; 3] = [0xEF, 0x40, 0x18];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Address { opcode: u8, count: u8, address: u32 },
    Reading { address: u32 },
    Programming { address: u32 },
    EraseArmed { address: u32 },
    Jedec { index: usize },
    Status(u8),
    Ignored,
}

pub struct SimFlash {
    memory: Vec<u8>,
    state: State,
    selected: bool,
    in_flight: Option<u8>,
    write_enabled: bool,
    powered_down: bool,
    transactions: Vec<Vec<u8>>,
    violations: usize,
}

impl Default for SimFlash {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SimFlash {
    /// Erased part of `capacity` bytes (a power of two). Addresses wrap at the capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two() && capacity <= ADDRESS_MASK as usize + 1);
        SimFlash {
            memory: vec![0xFF; capacity],
            state: State::Idle,
            selected: false,
            in_flight: None,
            write_enabled: false,
            powered_down: false,
            transactions: Vec::new(),
            violations: 0,
        }
    }

    /// Copy `bytes` into memory at `address`, bypassing the command interface.
    pub fn load(&mut self, address: u32, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            let index = self.index(address.wrapping_add(i as u32));
            self.memory[index] = *byte;
        }
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn is_powered_down(&self) -> bool {
        self.powered_down
    }

    pub fn set_powered_down(&mut self, powered_down: bool) {
        self.powered_down = powered_down;
    }

    pub fn write_enabled(&self) -> bool {
        self.write_enabled
    }

    /// MOSI bytes of each chip-select frame, oldest first.
    pub fn transactions(&self) -> &[Vec<u8>] {
        &self.transactions
    }

    pub fn clear_transactions(&mut self) {
        self.transactions.clear();
    }

    pub fn violations(&self) -> usize {
        self.violations
    }

    fn index(&self, address: u32) -> usize {
        (address & ADDRESS_MASK) as usize % self.memory.len()
    }

    fn exchange(&mut self, mosi: u8) -> u8 {
        match self.state {
            State::Idle => {
                self.state = self.command(mosi);
                0xFF
            }
            State::Address {
                opcode,
                count,
                address,
            } => {
                let address = (address << 8) | u32::from(mosi);
                self.state = if count < 2 {
                    State::Address {
                        opcode,
                        count: count + 1,
                        address,
                    }
                } else if opcode == Opcode::Read as u8 {
                    State::Reading { address }
                } else if opcode == Opcode::Write as u8 {
                    State::Programming { address }
                } else {
                    State::EraseArmed { address }
                };
                0xFF
            }
            State::Reading { address } => {
                let byte = self.memory[self.index(address)];
                self.state = State::Reading {
                    address: address.wrapping_add(1) & ADDRESS_MASK,
                };
                byte
            }
            State::Programming { address } => {
                if self.write_enabled {
                    let index = self.index(address);
                    self.memory[index] &= mosi;
                }
                let page = address & !(PAGE_SIZE as u32 - 1);
                self.state = State::Programming {
                    address: page | (address.wrapping_add(1) & (PAGE_SIZE as u32 - 1)),
                };
                0xFF
            }
            State::Jedec { index } => {
                self.state = State::Jedec { index: index + 1 };
                JEDEC_ID.get(index).copied().unwrap_or(0x00)
            }
            State::Status(value) => value,
            State::EraseArmed { .. } | State::Ignored => 0xFF,
        }
    }

    fn command(&mut self, opcode: u8) -> State {
        if self.powered_down && opcode != Opcode::ReleasePowerDown as u8 {
            return State::Ignored;
        }
        match opcode {
            op if op == Opcode::ReleasePowerDown as u8 => {
                self.powered_down = false;
                State::Ignored
            }
            op if op == Opcode::PowerDown as u8 => {
                self.powered_down = true;
                State::Ignored
            }
            op if op == Opcode::WriteEnable as u8 => {
                self.write_enabled = true;
                State::Ignored
            }
            op if op == Opcode::Read as u8
                || op == Opcode::Write as u8
                || op == Opcode::Erase as u8 =>
            {
                State::Address {
                    opcode,
                    count: 0,
                    address: 0,
                }
            }
            op if op == Opcode::JedecId as u8 => State::Jedec { index: 0 },
            op if op == Opcode::ReadStatus1 as u8 => State::Status(u8::from(self.write_enabled) << 1),
            op if op == Opcode::ReadStatus2 as u8 => State::Status(0),
            _ => State::Ignored,
        }
    }

    fn end_command(&mut self) {
        match self.state {
            State::EraseArmed { address } => {
                if self.write_enabled {
                    let start = self.index(address & !(BLOCK_SIZE - 1));
                    let end = (start + BLOCK_SIZE as usize).min(self.memory.len());
                    self.memory[start..end].fill(0xFF);
                }
                self.write_enabled = false;
            }
            State::Programming { .. } => self.write_enabled = false,
            _ => {}
        }
        self.state = State::Idle;
    }
}

impl Spi for SimFlash {
    fn select(&mut self) -> Result<(), Error> {
        if self.selected {
            self.violations += 1;
        }
        self.selected = true;
        self.state = State::Idle;
        self.transactions.push(Vec::new());
        Ok(())
    }

    fn deselect(&mut self) -> Result<(), Error> {
        if self.in_flight.take().is_some() {
            self.violations += 1;
        }
        if self.selected {
            self.end_command();
        }
        self.selected = false;
        Ok(())
    }

    fn start_transfer(&mut self, byte: u8) -> Result<(), Error> {
        if !self.selected || self.in_flight.is_some() {
            self.violations += 1;
        }
        let miso = if self.selected {
            if let Some(frame) = self.transactions.last_mut() {
                frame.push(byte);
            }
            self.exchange(byte)
        } else {
            0xFF
        };
        self.in_flight = Some(miso);
        Ok(())
    }

    fn finish_transfer(&mut self) -> Result<u8, Error> {
        match self.in_flight.take() {
            Some(byte) => Ok(byte),
            None => {
                self.violations += 1;
                Ok(0xFF)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unpaired_finish_is_a_violation() {
        let mut sim = SimFlash::new(4096);
        sim.finish_transfer().unwrap();
        assert_eq!(sim.violations(), 1);
    }

    #[test]
    fn test_clock_while_deselected_is_a_violation() {
        let mut sim = SimFlash::new(4096);
        assert_eq!(sim.transfer(0x03).unwrap(), 0xFF);
        assert_eq!(sim.violations(), 1);
        assert!(sim.transactions().is_empty());
    }

    #[test]
    fn test_double_select_is_a_violation() {
        let mut sim = SimFlash::new(4096);
        sim.select().unwrap();
        sim.select().unwrap();
        assert_eq!(sim.violations(), 1);
    }

    #[test]
    fn test_read_wraps_at_capacity() {
        let mut sim = SimFlash::new(4096);
        sim.load(4095, &[0x11, 0x22]);
        sim.select().unwrap();
        for byte in [0x03, 0x00, 0x0F, 0xFF] {
            sim.transfer(byte).unwrap();
        }
        assert_eq!(sim.transfer(0).unwrap(), 0x11);
        assert_eq!(sim.transfer(0).unwrap(), 0x22);
        sim.deselect().unwrap();
        assert_eq!(sim.violations(), 0);
    }

    #[test]
    fn test_program_wraps_inside_page() {
        let mut sim = SimFlash::new(4096);
        sim.select().unwrap();
        sim.transfer(0x06).unwrap();
        sim.deselect().unwrap();
        sim.select().unwrap();
        for byte in [0x04, 0x00, 0x01, 0xFF, 0x12, 0x34] {
            sim.transfer(byte).unwrap();
        }
        sim.deselect().unwrap();
        assert_eq!(sim.memory()[0x1FF], 0x12);
        assert_eq!(sim.memory()[0x100], 0x34);
        assert_eq!(sim.memory()[0x200], 0xFF);
        assert!(!sim.write_enabled());
    }
}
