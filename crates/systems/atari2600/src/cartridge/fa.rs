//! FA (CBS RAM Plus, 12K): three 4K banks on $1FF8-$1FFA plus 256 bytes of
//! RAM with split ports ($1000-$10FF write, $1100-$11FF read).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rom::{check_name, load_ram};
use super::{install_rom_bank, CartDevice, CartFlags, CartridgeError, PortRam, RamArea};
use crate::system::{BusState, PageTable, Random};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fa {
    image: Vec<u8>,
    ram: PortRam,
    current_bank: u16,
}

impl Fa {
    pub fn new(image: &[u8]) -> Result<Self, CartridgeError> {
        if image.len() != 12288 {
            return Err(CartridgeError::InvalidSize(image.len()));
        }
        Ok(Self {
            image: image.to_vec(),
            ram: PortRam::new(256),
            current_bank: 0,
        })
    }

    fn hotspot(&mut self, addr: u16, pages: &mut PageTable, flags: &mut CartFlags) {
        let a = addr & 0x0FFF;
        if (0x0FF8..=0x0FFA).contains(&a) {
            self.bank(a - 0x0FF8, pages, flags);
        }
    }
}

impl CartDevice for Fa {
    fn name(&self) -> &'static str {
        "FA"
    }

    fn bank_count(&self) -> u16 {
        3
    }

    fn current_bank(&self) -> u16 {
        self.current_bank
    }

    fn image(&self) -> &[u8] {
        &self.image
    }

    fn ram(&self) -> Option<&[u8]> {
        Some(self.ram.bytes())
    }

    fn ram_mut(&mut self) -> Option<&mut [u8]> {
        Some(self.ram.bytes_mut())
    }

    fn ram_areas(&self) -> Vec<RamArea> {
        vec![self.ram.area()]
    }

    fn reset(
        &mut self,
        ram_random: bool,
        rng: &mut Random,
        pages: &mut PageTable,
        flags: &mut CartFlags,
    ) {
        self.ram.reset(ram_random, rng);
        self.install(pages, flags);
        self.bank(self.start_bank(), pages, flags);
    }

    fn install(&mut self, pages: &mut PageTable, flags: &mut CartFlags) {
        let bank = self.current_bank;
        self.bank(bank, pages, flags);
        self.ram.install(pages);
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
        if a < 0x0100 {
            return self.ram.read_from_write_port(addr, bus, flags);
        }
        if a < 0x0200 {
            return self.ram.bytes()[(a & 0xFF) as usize];
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
        if a < 0x0100 {
            self.ram.bytes_mut()[(a & 0xFF) as usize] = value;
            return true;
        }
        false
    }

    fn bank(&mut self, bank: u16, pages: &mut PageTable, flags: &mut CartFlags) -> bool {
        if flags.bank_locked {
            return false;
        }
        self.current_bank = bank % self.bank_count();
        install_rom_bank(
            pages,
            self.current_bank as u32 * 4096,
            self.ram.rom_start(),
            0x1FC0,
        );
        flags.bank_changed = true;
        true
    }

    fn patch(&mut self, addr: u16, value: u8, flags: &mut CartFlags) -> bool {
        let a = addr & 0x0FFF;
        if a < 0x0200 {
            self.ram.bytes_mut()[(a & 0xFF) as usize] = value;
        } else {
            self.image[(self.current_bank as usize) * 4096 + a as usize] = value;
        }
        flags.bank_changed = true;
        true
    }

    fn save_state(&self) -> Value {
        serde_json::json!({
            "name": self.name(),
            "bank": self.current_bank,
            "ram": self.ram.bytes(),
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
        load_ram(v, self.ram.bytes_mut())?;
        self.bank(bank, pages, flags);
        Ok(())
    }
}
