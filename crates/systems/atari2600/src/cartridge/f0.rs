//! F0 / MB (Dynacom Megaboy 64K): sixteen 4K banks; every touch of $1FF0
//! advances to the next bank.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rom::check_name;
use super::{install_rom_bank, CartDevice, CartFlags, CartridgeError};
use crate::system::{BusState, PageTable, Random};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct F0 {
    image: Vec<u8>,
    current_bank: u16,
}

impl F0 {
    pub fn new(image: &[u8]) -> Result<Self, CartridgeError> {
        if image.len() != 65536 {
            return Err(CartridgeError::InvalidSize(image.len()));
        }
        Ok(Self {
            image: image.to_vec(),
            current_bank: 0,
        })
    }

    fn hotspot(&mut self, addr: u16, pages: &mut PageTable, flags: &mut CartFlags) {
        if addr & 0x0FFF == 0x0FF0 {
            let next = (self.current_bank + 1) & 0x0F;
            self.bank(next, pages, flags);
        }
    }
}

impl CartDevice for F0 {
    fn name(&self) -> &'static str {
        "F0"
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
        pages: &mut PageTable,
        _bus: &mut BusState,
        flags: &mut CartFlags,
    ) -> u8 {
        self.hotspot(addr, pages, flags);
        self.image[(self.current_bank as usize) * 4096 + (addr & 0x0FFF) as usize]
    }

    fn poke(
        &mut self,
        addr: u16,
        _value: u8,
        pages: &mut PageTable,
        _bus: &mut BusState,
        flags: &mut CartFlags,
    ) -> bool {
        self.hotspot(addr, pages, flags);
        false
    }

    fn bank(&mut self, bank: u16, pages: &mut PageTable, flags: &mut CartFlags) -> bool {
        if flags.bank_locked {
            return false;
        }
        self.current_bank = bank & 0x0F;
        install_rom_bank(pages, self.current_bank as u32 * 4096, 0x1000, 0x1FC0);
        flags.bank_changed = true;
        true
    }

    fn patch(&mut self, addr: u16, value: u8, flags: &mut CartFlags) -> bool {
        self.image[(self.current_bank as usize) * 4096 + (addr & 0x0FFF) as usize] = value;
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
    fn hotspot_increments_and_wraps() {
        let mut rom = vec![0u8; 65536];
        for bank in 0..16 {
            rom[bank * 4096] = bank as u8;
        }
        let mut cart = F0::new(&rom).unwrap();
        let mut pages = PageTable::new(6);
        let mut flags = CartFlags::default();
        let mut bus = BusState::for_tests(Random::new(0));
        let mut rng = Random::new(0);
        cart.reset(false, &mut rng, &mut pages, &mut flags);

        for expected in 1..=16u16 {
            cart.peek(0x1FF0, &mut pages, &mut bus, &mut flags);
            assert_eq!(cart.current_bank(), expected & 0x0F);
        }
        assert_eq!(cart.peek(0x1000, &mut pages, &mut bus, &mut flags), 0);
    }
}
