//! CM (SpectraVideo CompuMate): four 4K banks, 2K of RAM at $1800-$1FFF,
//! and a membrane keyboard — all controlled through the RIOT's SWCHA port:
//!
//! - D1-D0 select the bank,
//! - D4 enables the RAM (0 = enabled),
//! - D5 is the RAM direction (1 = write, 0 = read) and resets the keyboard
//!   column counter,
//! - a rising edge on D6 clocks the column counter (0-9).
//!
//! The port writes arrive via bus snooping: this is the one scheme whose
//! state is driven entirely from outside the cartridge address range.  The
//! keyboard rows themselves are read back through controller inputs, which
//! belong to the input layer; the cartridge only owns the column counter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rom::check_name;
use super::{init_ram, CartDevice, CartFlags, CartridgeError, RamArea};
use crate::riot::Riot;
use crate::system::{Access, BusState, Device, Direct, PageAccess, PageTable, Random};

const RAM_SIZE: usize = 2048;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cm {
    image: Vec<u8>,
    ram: Vec<u8>,
    current_bank: u16,
    swcha: u8,
    column: u8,
}

impl Cm {
    pub fn new(image: &[u8]) -> Result<Self, CartridgeError> {
        if image.len() != 16384 {
            return Err(CartridgeError::InvalidSize(image.len()));
        }
        Ok(Self {
            image: image.to_vec(),
            ram: vec![0; RAM_SIZE],
            current_bank: 0,
            swcha: 0xFF,
            column: 0,
        })
    }

    /// The keyboard column currently driven by the 4017 counter.
    pub fn column(&self) -> u8 {
        self.column
    }

    pub fn swcha(&self) -> u8 {
        self.swcha
    }

    fn ram_enabled(&self) -> bool {
        self.swcha & 0x10 == 0
    }

    fn ram_write_mode(&self) -> bool {
        self.swcha & 0x20 != 0
    }
}

impl CartDevice for Cm {
    fn name(&self) -> &'static str {
        "CM"
    }

    fn bank_count(&self) -> u16 {
        4
    }

    fn current_bank(&self) -> u16 {
        self.current_bank
    }

    fn image(&self) -> &[u8] {
        &self.image
    }

    fn ram(&self) -> Option<&[u8]> {
        Some(&self.ram)
    }

    fn ram_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.ram)
    }

    fn ram_areas(&self) -> Vec<RamArea> {
        // One port: the direction line selects read or write.
        vec![RamArea {
            start: 0x1800,
            size: RAM_SIZE as u16,
            read_offset: 0,
            write_offset: 0,
        }]
    }

    fn reset(
        &mut self,
        ram_random: bool,
        rng: &mut Random,
        pages: &mut PageTable,
        flags: &mut CartFlags,
    ) {
        init_ram(&mut self.ram, ram_random, rng);
        self.swcha = 0xFF;
        self.column = 0;
        self.current_bank = self.start_bank();
        self.install(pages, flags);
    }

    fn install(&mut self, pages: &mut PageTable, _flags: &mut CartFlags) {
        let offset = self.current_bank as u32 * 4096;
        pages.install_range(0x1000, 0x1800, |base| {
            PageAccess::direct_read(Direct::Rom(offset + (base & 0x0FFF) as u32), Device::Cart)
        });
        // The upper half switches between ROM and RAM at runtime, so it
        // always dispatches.
        pages.install_range(0x1800, 0x2000, |_| {
            PageAccess::device(Device::Cart, Access::ReadWrite)
        });
    }

    fn peek(
        &mut self,
        addr: u16,
        _pages: &mut PageTable,
        bus: &mut BusState,
        flags: &mut CartFlags,
    ) -> u8 {
        let a = addr & 0x0FFF;
        if a >= 0x0800 && self.ram_enabled() {
            if self.ram_write_mode() {
                // Reading while the port is in write mode behaves like any
                // other write-port read.
                let value = bus.data_bus();
                if !flags.bank_locked {
                    flags.note_illegal_read(addr);
                    self.ram[(a & 0x07FF) as usize] = value;
                }
                return value;
            }
            return self.ram[(a & 0x07FF) as usize];
        }
        self.image[self.current_bank as usize * 4096 + a as usize]
    }

    fn poke(
        &mut self,
        addr: u16,
        value: u8,
        _pages: &mut PageTable,
        _bus: &mut BusState,
        _flags: &mut CartFlags,
    ) -> bool {
        let a = addr & 0x0FFF;
        if a >= 0x0800 && self.ram_enabled() && self.ram_write_mode() {
            self.ram[(a & 0x07FF) as usize] = value;
            return true;
        }
        false
    }

    fn snoop(
        &mut self,
        addr: u16,
        value: u8,
        is_read: bool,
        pages: &mut PageTable,
        flags: &mut CartFlags,
    ) {
        if is_read || !Riot::write_selects_swcha(addr) {
            return;
        }
        // 4017 keyboard counter: D5 resets, a rising D6 edge advances.
        if value & 0x20 != 0 {
            self.column = 0;
        } else if value & 0x40 != 0 && self.swcha & 0x40 == 0 {
            self.column = (self.column + 1) % 10;
        }
        let previous = self.swcha;
        self.swcha = value;
        if !self.bank(value as u16 & 0x03, pages, flags) {
            self.swcha = previous;
        }
    }

    fn bank(&mut self, bank: u16, pages: &mut PageTable, flags: &mut CartFlags) -> bool {
        if flags.bank_locked {
            return false;
        }
        self.current_bank = bank & 0x03;
        let offset = self.current_bank as u32 * 4096;
        pages.install_range(0x1000, 0x1800, |base| {
            PageAccess::direct_read(Direct::Rom(offset + (base & 0x0FFF) as u32), Device::Cart)
        });
        flags.bank_changed = true;
        true
    }

    fn patch(&mut self, addr: u16, value: u8, flags: &mut CartFlags) -> bool {
        let a = addr & 0x0FFF;
        if a >= 0x0800 && self.ram_enabled() {
            self.ram[(a & 0x07FF) as usize] = value;
        } else {
            self.image[self.current_bank as usize * 4096 + a as usize] = value;
        }
        flags.bank_changed = true;
        true
    }

    fn save_state(&self) -> Value {
        serde_json::json!({
            "name": self.name(),
            "bank": self.current_bank,
            "ram": self.ram,
            "swcha": self.swcha,
            "column": self.column,
        })
    }

    fn load_state(
        &mut self,
        v: &Value,
        pages: &mut PageTable,
        flags: &mut CartFlags,
    ) -> Result<(), serde_json::Error> {
        check_name(v, self.name())?;
        let bank: u16 = serde_json::from_value(v["bank"].clone())?;
        let ram: Vec<u8> = serde_json::from_value(v["ram"].clone())?;
        if ram.len() != RAM_SIZE {
            return Err(serde::de::Error::custom("cartridge RAM size mismatch"));
        }
        self.ram = ram;
        self.swcha = serde_json::from_value(v["swcha"].clone())?;
        self.column = serde_json::from_value(v["column"].clone())?;
        self.bank(bank, pages, flags);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::Random;

    fn setup() -> (Cm, PageTable, BusState, CartFlags) {
        let mut rom = vec![0u8; 16384];
        for bank in 0..4 {
            rom[bank * 4096] = 0x40 + bank as u8;
            rom[bank * 4096 + 0x800] = 0x50 + bank as u8;
        }
        let mut cart = Cm::new(&rom).unwrap();
        let mut pages = PageTable::new(6);
        let mut flags = CartFlags::default();
        let mut rng = Random::new(0);
        cart.reset(false, &mut rng, &mut pages, &mut flags);
        (cart, pages, BusState::for_tests(Random::new(0)), flags)
    }

    #[test]
    fn swcha_low_bits_select_the_bank() {
        let (mut cart, mut pages, mut bus, mut flags) = setup();
        cart.snoop(0x0280, 0xF2, false, &mut pages, &mut flags);
        assert_eq!(cart.current_bank(), 2);
        assert_eq!(cart.peek(0x1000, &mut pages, &mut bus, &mut flags), 0x42);
        // Writes elsewhere in the RIOT are ignored.
        cart.snoop(0x0281, 0xF1, false, &mut pages, &mut flags);
        assert_eq!(cart.current_bank(), 2);
    }

    #[test]
    fn ram_window_obeys_enable_and_direction() {
        let (mut cart, mut pages, mut bus, mut flags) = setup();
        // RAM disabled (D4 = 1): upper half reads ROM.
        cart.snoop(0x0280, 0xF0, false, &mut pages, &mut flags);
        assert_eq!(cart.peek(0x1800, &mut pages, &mut bus, &mut flags), 0x50);

        // Enable RAM in write mode (D4 = 0, D5 = 1) and store a byte.
        cart.snoop(0x0280, 0xE0, false, &mut pages, &mut flags);
        cart.poke(0x1801, 0x77, &mut pages, &mut bus, &mut flags);
        // Read mode (D5 = 0) reads it back.
        cart.snoop(0x0280, 0xC0, false, &mut pages, &mut flags);
        assert_eq!(cart.peek(0x1801, &mut pages, &mut bus, &mut flags), 0x77);
        // Writes are ignored while the direction line says read.
        cart.poke(0x1801, 0x11, &mut pages, &mut bus, &mut flags);
        assert_eq!(cart.ram().unwrap()[1], 0x77);
    }

    #[test]
    fn keyboard_column_counter_clocks_and_resets() {
        let (mut cart, mut pages, _, mut flags) = setup();
        // Rising edges on D6 advance the column.
        for expected in 1..=4u8 {
            cart.snoop(0x0280, 0x90, false, &mut pages, &mut flags);
            cart.snoop(0x0280, 0xD0, false, &mut pages, &mut flags);
            assert_eq!(cart.column(), expected % 10);
        }
        // A held-high D6 does not re-trigger.
        cart.snoop(0x0280, 0xD0, false, &mut pages, &mut flags);
        assert_eq!(cart.column(), 4);
        // D5 resets the counter.
        cart.snoop(0x0280, 0xA0, false, &mut pages, &mut flags);
        assert_eq!(cart.column(), 0);
        // The counter wraps after column 9.
        for _ in 0..12 {
            cart.snoop(0x0280, 0x80, false, &mut pages, &mut flags);
            cart.snoop(0x0280, 0xC0, false, &mut pages, &mut flags);
        }
        assert_eq!(cart.column(), 2);
    }
}
