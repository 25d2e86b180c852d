//! X07 (AtariAge 64K): sixteen 4K banks.  The primary hot-spot pattern is
//! any access matching $080D (with the bank number on A4-A7); in addition,
//! while bank 14 or 15 is selected, TIA-range accesses toggle between those
//! two banks on A6.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rom::check_name;
use super::{CartDevice, CartFlags, CartridgeError};
use crate::system::{BusState, Device, Direct, PageAccess, PageTable, Random};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct X07 {
    image: Vec<u8>,
    current_bank: u16,
}

impl X07 {
    pub fn new(image: &[u8]) -> Result<Self, CartridgeError> {
        if image.len() != 65536 {
            return Err(CartridgeError::InvalidSize(image.len()));
        }
        Ok(Self {
            image: image.to_vec(),
            current_bank: 0,
        })
    }
}

impl CartDevice for X07 {
    fn name(&self) -> &'static str {
        "X07"
    }

    fn bank_count(&self) -> u16 {
        16
    }

    fn current_bank(&self) -> u16 {
        self.current_bank
    }

    fn image(&self) -> &[u8] {
        &self.image
    }

    fn reset(
        &mut self,
        _ram_random: bool,
        _rng: &mut Random,
        pages: &mut PageTable,
        flags: &mut CartFlags,
    ) {
        self.current_bank = self.start_bank();
        self.install(pages, flags);
    }

    fn install(&mut self, pages: &mut PageTable, flags: &mut CartFlags) {
        let bank = self.current_bank;
        self.bank(bank, pages, flags);
    }

    fn peek(
        &mut self,
        addr: u16,
        _pages: &mut PageTable,
        _bus: &mut BusState,
        _flags: &mut CartFlags,
    ) -> u8 {
        self.image[self.current_bank as usize * 4096 + (addr & 0x0FFF) as usize]
    }

    fn poke(
        &mut self,
        _addr: u16,
        _value: u8,
        _pages: &mut PageTable,
        _bus: &mut BusState,
        _flags: &mut CartFlags,
    ) -> bool {
        false
    }

    fn snoop(
        &mut self,
        addr: u16,
        _value: u8,
        _is_read: bool,
        pages: &mut PageTable,
        flags: &mut CartFlags,
    ) {
        let addr = addr & 0x1FFF;
        if addr & 0x180F == 0x080D {
            self.bank((addr >> 4) & 0x0F, pages, flags);
        } else if addr & 0x1880 == 0x0000 && self.current_bank & 0x0E == 0x0E {
            self.bank(0x0E | ((addr & 0x40) >> 6), pages, flags);
        }
    }

    fn bank(&mut self, bank: u16, pages: &mut PageTable, flags: &mut CartFlags) -> bool {
        if flags.bank_locked {
            return false;
        }
        self.current_bank = bank & 0x0F;
        let offset = self.current_bank as u32 * 4096;
        pages.install_range(0x1000, 0x2000, |base| {
            PageAccess::direct_read(Direct::Rom(offset + (base & 0x0FFF) as u32), Device::Cart)
        });
        flags.bank_changed = true;
        true
    }

    fn patch(&mut self, addr: u16, value: u8, flags: &mut CartFlags) -> bool {
        self.image[self.current_bank as usize * 4096 + (addr & 0x0FFF) as usize] = value;
        flags.bank_changed = true;
        true
    }

    fn save_state(&self) -> Value {
        serde_json::json!({ "name": self.name(), "bank": self.current_bank })
    }

    fn load_state(
        &mut self,
        v: &Value,
        pages: &mut PageTable,
        flags: &mut CartFlags,
    ) -> Result<(), serde_json::Error> {
        check_name(v, self.name())?;
        let bank: u16 = serde_json::from_value(v["bank"].clone())?;
        self.bank(bank, pages, flags);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::Random;

    #[test]
    fn primary_hotspot_carries_bank_in_address() {
        let rom = vec![0u8; 65536];
        let mut cart = X07::new(&rom).unwrap();
        let mut pages = PageTable::new(6);
        let mut flags = CartFlags::default();
        let mut rng = Random::new(0);
        cart.reset(false, &mut rng, &mut pages, &mut flags);

        cart.snoop(0x080D, 0, true, &mut pages, &mut flags);
        assert_eq!(cart.current_bank(), 0);
        cart.snoop(0x083D, 0, true, &mut pages, &mut flags);
        assert_eq!(cart.current_bank(), 3);
        cart.snoop(0x08FD, 0, false, &mut pages, &mut flags);
        assert_eq!(cart.current_bank(), 15);
    }

    #[test]
    fn tia_access_toggles_banks_14_and_15() {
        let rom = vec![0u8; 65536];
        let mut cart = X07::new(&rom).unwrap();
        let mut pages = PageTable::new(6);
        let mut flags = CartFlags::default();
        let mut rng = Random::new(0);
        cart.reset(false, &mut rng, &mut pages, &mut flags);

        // Outside banks 14/15 the TIA quirk is inert.
        cart.snoop(0x0000, 0, false, &mut pages, &mut flags);
        assert_eq!(cart.current_bank(), 0);

        cart.snoop(0x08ED, 0, true, &mut pages, &mut flags);
        assert_eq!(cart.current_bank(), 14);
        cart.snoop(0x0040, 0, false, &mut pages, &mut flags);
        assert_eq!(cart.current_bank(), 15);
        cart.snoop(0x0000, 0, false, &mut pages, &mut flags);
        assert_eq!(cart.current_bank(), 14);
    }
}
