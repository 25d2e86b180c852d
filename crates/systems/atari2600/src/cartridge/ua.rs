//! UA Limited (8K): touching $0220 selects bank 0, $0240 bank 1.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rom::check_name;
use super::{CartDevice, CartFlags, CartridgeError};
use crate::system::{BusState, Device, Direct, PageAccess, PageTable, Random};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ua {
    image: Vec<u8>,
    current_bank: u16,
}

impl Ua {
    pub fn new(image: &[u8]) -> Result<Self, CartridgeError> {
        if image.len() != 8192 {
            return Err(CartridgeError::InvalidSize(image.len()));
        }
        Ok(Self {
            image: image.to_vec(),
            current_bank: 0,
        })
    }
}

impl CartDevice for Ua {
    fn name(&self) -> &'static str {
        "UA"
    }

    fn bank_count(&self) -> u16 {
        2
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
        match addr & 0x1FFF {
            0x0220 => {
                self.bank(0, pages, flags);
            }
            0x0240 => {
                self.bank(1, pages, flags);
            }
            _ => {}
        }
    }

    fn bank(&mut self, bank: u16, pages: &mut PageTable, flags: &mut CartFlags) -> bool {
        if flags.bank_locked {
            return false;
        }
        self.current_bank = bank & 1;
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
    fn hotspots_at_0220_and_0240() {
        let mut rom = vec![0u8; 8192];
        rom[0] = 0xAA;
        rom[4096] = 0xBB;
        let mut cart = Ua::new(&rom).unwrap();
        let mut pages = PageTable::new(6);
        let mut flags = CartFlags::default();
        let mut bus = BusState::for_tests(Random::new(0));
        let mut rng = Random::new(0);
        cart.reset(false, &mut rng, &mut pages, &mut flags);

        cart.snoop(0x0240, 0, true, &mut pages, &mut flags);
        assert_eq!(cart.current_bank(), 1);
        assert_eq!(cart.peek(0x1000, &mut pages, &mut bus, &mut flags), 0xBB);
        cart.snoop(0x0220, 0, false, &mut pages, &mut flags);
        assert_eq!(cart.current_bank(), 0);
        assert_eq!(cart.peek(0x1000, &mut pages, &mut bus, &mut flags), 0xAA);
    }
}
