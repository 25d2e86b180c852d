//! F4 (Atari 32K): eight 4K banks on $1FF4-$1FFB, optional superchip RAM.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rom::{check_name, load_ram};
use super::{install_rom_bank, CartDevice, CartFlags, CartridgeError, PortRam, RamArea};
use crate::system::{BusState, PageTable, Random};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct F4 {
    image: Vec<u8>,
    ram: Option<PortRam>,
    current_bank: u16,
}

impl F4 {
    pub fn new(image: &[u8], superchip: bool) -> Result<Self, CartridgeError> {
        if image.len() != 32768 {
            return Err(CartridgeError::InvalidSize(image.len()));
        }
        Ok(Self {
            image: image.to_vec(),
            ram: superchip.then(|| PortRam::new(128)),
            current_bank: 0,
        })
    }

    fn hotspot(&mut self, addr: u16, pages: &mut PageTable, flags: &mut CartFlags) {
        let a = addr & 0x0FFF;
        if (0x0FF4..=0x0FFB).contains(&a) {
            self.bank(a - 0x0FF4, pages, flags);
        }
    }
}

impl CartDevice for F4 {
    fn name(&self) -> &'static str {
        if self.ram.is_some() {
            "F4SC"
        } else {
            "F4"
        }
    }

    fn bank_count(&self) -> u16 {
        8
    }

    fn current_bank(&self) -> u16 {
        self.current_bank
    }

    fn image(&self) -> &[u8] {
        &self.image
    }

    fn ram(&self) -> Option<&[u8]> {
        self.ram.as_ref().map(|r| r.bytes())
    }

    fn ram_mut(&mut self) -> Option<&mut [u8]> {
        self.ram.as_mut().map(|r| r.bytes_mut())
    }

    fn ram_areas(&self) -> Vec<RamArea> {
        self.ram.iter().map(|r| r.area()).collect()
    }

    fn reset(
        &mut self,
        ram_random: bool,
        rng: &mut Random,
        pages: &mut PageTable,
        flags: &mut CartFlags,
    ) {
        if let Some(ram) = self.ram.as_mut() {
            ram.reset(ram_random, rng);
        }
        self.install(pages, flags);
        self.bank(self.start_bank(), pages, flags);
    }

    fn install(&mut self, pages: &mut PageTable, flags: &mut CartFlags) {
        let bank = self.current_bank;
        self.bank(bank, pages, flags);
        if let Some(ram) = self.ram.as_ref() {
            ram.install(pages);
        }
    }

    fn peek(
        &mut self,
        addr: u16,
        pages: &mut PageTable,
        bus: &mut BusState,
        flags: &mut CartFlags,
    ) -> u8 {
        self.hotspot(addr, pages, flags);
        let a = addr & 0x0FFF;
        if let Some(ram) = self.ram.as_mut() {
            if a < 0x0080 {
                return ram.read_from_write_port(addr, bus, flags);
            }
            if a < 0x0100 {
                return ram.bytes()[(a & 0x7F) as usize];
            }
        }
        self.image[(self.current_bank as usize) * 4096 + a as usize]
    }

    fn poke(
        &mut self,
        addr: u16,
        value: u8,
        pages: &mut PageTable,
        _bus: &mut BusState,
        flags: &mut CartFlags,
    ) -> bool {
        self.hotspot(addr, pages, flags);
        let a = addr & 0x0FFF;
        if let Some(ram) = self.ram.as_mut() {
            if a < 0x0080 {
                ram.bytes_mut()[(a & 0x7F) as usize] = value;
                return true;
            }
        }
        false
    }

    fn bank(&mut self, bank: u16, pages: &mut PageTable, flags: &mut CartFlags) -> bool {
        if flags.bank_locked {
            return false;
        }
        self.current_bank = bank % self.bank_count();
        let rom_start = self.ram.as_ref().map_or(0x1000, |r| r.rom_start());
        install_rom_bank(pages, self.current_bank as u32 * 4096, rom_start, 0x1FC0);
        flags.bank_changed = true;
        true
    }

    fn patch(&mut self, addr: u16, value: u8, flags: &mut CartFlags) -> bool {
        let a = addr & 0x0FFF;
        if let Some(ram) = self.ram.as_mut() {
            if a < 0x0100 {
                ram.bytes_mut()[(a & 0x7F) as usize] = value;
                flags.bank_changed = true;
                return true;
            }
        }
        self.image[(self.current_bank as usize) * 4096 + a as usize] = value;
        flags.bank_changed = true;
        true
    }

    fn save_state(&self) -> Value {
        serde_json::json!({
            "name": self.name(),
            "bank": self.current_bank,
            "ram": self.ram.as_ref().map(|r| r.bytes()),
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
        if let Some(ram) = self.ram.as_mut() {
            load_ram(v, ram.bytes_mut())?;
        }
        self.bank(bank, pages, flags);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::Random;

    #[test]
    fn eight_hotspots_reach_eight_banks() {
        let mut rom = vec![0u8; 32768];
        for bank in 0..8 {
            rom[bank * 4096] = 0x20 + bank as u8;
        }
        let mut cart = F4::new(&rom, false).unwrap();
        let mut pages = PageTable::new(6);
        let mut flags = CartFlags::default();
        let mut bus = BusState::for_tests(Random::new(0));
        let mut rng = Random::new(0);
        cart.reset(false, &mut rng, &mut pages, &mut flags);

        for bank in 0..8u16 {
            cart.peek(0x1FF4 + bank, &mut pages, &mut bus, &mut flags);
            assert_eq!(cart.current_bank(), bank);
            assert_eq!(
                cart.peek(0x1000, &mut pages, &mut bus, &mut flags),
                0x20 + bank as u8
            );
        }
    }

    #[test]
    fn sc_write_port_read_corrupts_ram() {
        let rom = vec![0u8; 32768];
        let mut cart = F4::new(&rom, true).unwrap();
        let mut pages = PageTable::new(6);
        let mut flags = CartFlags::default();
        let mut bus = BusState::for_tests(Random::new(0));
        let mut rng = Random::new(0);
        cart.reset(false, &mut rng, &mut pages, &mut flags);

        bus.set_data_bus(0xC3);
        assert_eq!(cart.peek(0x1020, &mut pages, &mut bus, &mut flags), 0xC3);
        assert_eq!(cart.ram().unwrap()[0x20], 0xC3);
        assert_eq!(flags.last_illegal_read, Some(0x1020));
    }
}
