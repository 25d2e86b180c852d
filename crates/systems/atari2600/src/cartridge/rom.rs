//! Flat ROM cartridges: 2K, 4K, and 4K-with-superchip.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CartDevice, CartFlags, CartridgeError, PortRam, RamArea};
use crate::system::{BusState, Device, Direct, PageAccess, PageTable, Random};

/// 2K ROM (also covers sub-2K images and mirrored 4K dumps): the image
/// repeats across the whole window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rom2K {
    image: Vec<u8>,
}

impl Rom2K {
    pub fn new(image: &[u8]) -> Result<Self, CartridgeError> {
        let image = if image.len() == 4096 {
            // A mirrored 4K dump of a 2K game.
            &image[..2048]
        } else {
            image
        };
        if image.len() > 2048 || image.len() < 64 || !image.len().is_power_of_two() {
            return Err(CartridgeError::InvalidSize(image.len()));
        }
        Ok(Self {
            image: image.to_vec(),
        })
    }

    fn mask(&self) -> u16 {
        self.image.len() as u16 - 1
    }
}

impl CartDevice for Rom2K {
    fn name(&self) -> &'static str {
        "2K"
    }

    fn bank_count(&self) -> u16 {
        1
    }

    fn current_bank(&self) -> u16 {
        0
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
        self.install(pages, flags);
    }

    fn install(&mut self, pages: &mut PageTable, _flags: &mut CartFlags) {
        let mask = self.mask();
        pages.install_range(0x1000, 0x2000, |base| {
            PageAccess::direct_read(Direct::Rom((base & mask) as u32), Device::Cart)
        });
    }

    fn peek(
        &mut self,
        addr: u16,
        _pages: &mut PageTable,
        _bus: &mut BusState,
        _flags: &mut CartFlags,
    ) -> u8 {
        self.image[(addr & self.mask()) as usize]
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

    fn bank(&mut self, _bank: u16, _pages: &mut PageTable, _flags: &mut CartFlags) -> bool {
        false
    }

    fn patch(&mut self, addr: u16, value: u8, flags: &mut CartFlags) -> bool {
        let mask = self.mask();
        self.image[(addr & mask) as usize] = value;
        flags.bank_changed = true;
        true
    }

    fn save_state(&self) -> Value {
        serde_json::json!({ "name": self.name(), "bank": 0 })
    }

    fn load_state(
        &mut self,
        v: &Value,
        _pages: &mut PageTable,
        _flags: &mut CartFlags,
    ) -> Result<(), serde_json::Error> {
        check_name(v, self.name())
    }
}

/// 4K ROM, the most common cartridge of all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rom4K {
    image: Vec<u8>,
}

impl Rom4K {
    pub fn new(image: &[u8]) -> Result<Self, CartridgeError> {
        if image.len() != 4096 {
            return Err(CartridgeError::InvalidSize(image.len()));
        }
        Ok(Self {
            image: image.to_vec(),
        })
    }
}

impl CartDevice for Rom4K {
    fn name(&self) -> &'static str {
        "4K"
    }

    fn bank_count(&self) -> u16 {
        1
    }

    fn current_bank(&self) -> u16 {
        0
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
        self.install(pages, flags);
    }

    fn install(&mut self, pages: &mut PageTable, _flags: &mut CartFlags) {
        pages.install_range(0x1000, 0x2000, |base| {
            PageAccess::direct_read(Direct::Rom((base & 0x0FFF) as u32), Device::Cart)
        });
    }

    fn peek(
        &mut self,
        addr: u16,
        _pages: &mut PageTable,
        _bus: &mut BusState,
        _flags: &mut CartFlags,
    ) -> u8 {
        self.image[(addr & 0x0FFF) as usize]
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

    fn bank(&mut self, _bank: u16, _pages: &mut PageTable, _flags: &mut CartFlags) -> bool {
        false
    }

    fn patch(&mut self, addr: u16, value: u8, flags: &mut CartFlags) -> bool {
        self.image[(addr & 0x0FFF) as usize] = value;
        flags.bank_changed = true;
        true
    }

    fn save_state(&self) -> Value {
        serde_json::json!({ "name": self.name(), "bank": 0 })
    }

    fn load_state(
        &mut self,
        v: &Value,
        _pages: &mut PageTable,
        _flags: &mut CartFlags,
    ) -> Result<(), serde_json::Error> {
        check_name(v, self.name())
    }
}

/// 4K ROM with 128 bytes of superchip RAM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rom4KSC {
    image: Vec<u8>,
    ram: PortRam,
}

impl Rom4KSC {
    pub fn new(image: &[u8]) -> Result<Self, CartridgeError> {
        if image.len() != 4096 {
            return Err(CartridgeError::InvalidSize(image.len()));
        }
        Ok(Self {
            image: image.to_vec(),
            ram: PortRam::new(128),
        })
    }
}

impl CartDevice for Rom4KSC {
    fn name(&self) -> &'static str {
        "4KSC"
    }

    fn bank_count(&self) -> u16 {
        1
    }

    fn current_bank(&self) -> u16 {
        0
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
    }

    fn install(&mut self, pages: &mut PageTable, _flags: &mut CartFlags) {
        let rom_start = self.ram.rom_start();
        pages.install_range(rom_start, 0x2000, |base| {
            PageAccess::direct_read(Direct::Rom((base & 0x0FFF) as u32), Device::Cart)
        });
        self.ram.install(pages);
    }

    fn peek(
        &mut self,
        addr: u16,
        _pages: &mut PageTable,
        bus: &mut BusState,
        flags: &mut CartFlags,
    ) -> u8 {
        let a = addr & 0x0FFF;
        if a < 0x0080 {
            self.ram.read_from_write_port(addr, bus, flags)
        } else if a < 0x0100 {
            self.ram.bytes()[(a & 0x7F) as usize]
        } else {
            self.image[a as usize]
        }
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
        if a < 0x0080 {
            self.ram.bytes_mut()[(a & 0x7F) as usize] = value;
            return true;
        }
        false
    }

    fn bank(&mut self, _bank: u16, _pages: &mut PageTable, _flags: &mut CartFlags) -> bool {
        false
    }

    fn patch(&mut self, addr: u16, value: u8, flags: &mut CartFlags) -> bool {
        let a = addr & 0x0FFF;
        if a < 0x0100 {
            self.ram.bytes_mut()[(a & 0x7F) as usize] = value;
        } else {
            self.image[a as usize] = value;
        }
        flags.bank_changed = true;
        true
    }

    fn save_state(&self) -> Value {
        serde_json::json!({
            "name": self.name(),
            "bank": 0,
            "ram": self.ram.bytes(),
        })
    }

    fn load_state(
        &mut self,
        v: &Value,
        _pages: &mut PageTable,
        _flags: &mut CartFlags,
    ) -> Result<(), serde_json::Error> {
        check_name(v, self.name())?;
        load_ram(v, self.ram.bytes_mut())
    }
}

/// Verify the device-name string leading a state snapshot.
pub(crate) fn check_name(v: &Value, name: &str) -> Result<(), serde_json::Error> {
    if v["name"].as_str() == Some(name) {
        Ok(())
    } else {
        Err(serde::de::Error::custom(format!(
            "state is not for cartridge '{name}'"
        )))
    }
}

pub(crate) fn load_ram(v: &Value, ram: &mut [u8]) -> Result<(), serde_json::Error> {
    let bytes: Vec<u8> = serde_json::from_value(v["ram"].clone())?;
    if bytes.len() != ram.len() {
        return Err(serde::de::Error::custom("cartridge RAM size mismatch"));
    }
    ram.copy_from_slice(&bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::Random;

    fn flags() -> CartFlags {
        CartFlags::default()
    }

    #[test]
    fn rom2k_mirrors_across_the_window() {
        let mut image = vec![0u8; 2048];
        image[0] = 0x11;
        image[2047] = 0x22;
        let mut cart = Rom2K::new(&image).unwrap();
        let mut pages = PageTable::new(6);
        let mut f = flags();
        cart.install(&mut pages, &mut f);
        // Both halves of the window map the same bytes.
        let first = pages.get(0x1000).direct_peek;
        let mirror = pages.get(0x1800).direct_peek;
        assert_eq!(first, mirror);
    }

    #[test]
    fn rom2k_accepts_mirrored_4k_dump() {
        let mut image = vec![0u8; 4096];
        image[5] = 0x77;
        image[2048 + 5] = 0x77;
        let cart = Rom2K::new(&image).unwrap();
        assert_eq!(cart.image().len(), 2048);
        assert_eq!(cart.image()[5], 0x77);
    }

    #[test]
    fn rom4k_rejects_other_sizes() {
        assert!(Rom4K::new(&vec![0u8; 2048]).is_err());
        assert!(Rom4K::new(&vec![0u8; 4096]).is_ok());
    }

    #[test]
    fn sc_ram_ports_are_split() {
        let image = vec![0u8; 4096];
        let mut cart = Rom4KSC::new(&image).unwrap();
        let mut pages = PageTable::new(6);
        let mut f = flags();
        cart.install(&mut pages, &mut f);

        // Write port pages carry a direct write target, read port pages a
        // direct read target.
        assert!(pages.get(0x1000).direct_poke.is_some());
        assert!(pages.get(0x1000).direct_peek.is_none());
        assert!(pages.get(0x1080).direct_peek.is_some());
        assert!(pages.get(0x1080).direct_poke.is_none());

        assert_eq!(
            cart.ram_areas(),
            vec![RamArea {
                start: 0x1000,
                size: 128,
                read_offset: 0x80,
                write_offset: 0
            }]
        );
    }

    #[test]
    fn reading_the_write_port_corrupts_ram() {
        let image = vec![0u8; 4096];
        let mut cart = Rom4KSC::new(&image).unwrap();
        let mut pages = PageTable::new(6);
        let mut bus = BusState::for_tests(Random::new(0));
        let mut f = flags();
        bus.set_data_bus(0x5A);
        let v = cart.peek(0x1040, &mut pages, &mut bus, &mut f);
        assert_eq!(v, 0x5A);
        assert_eq!(cart.ram().unwrap()[0x40], 0x5A);
        assert_eq!(f.last_illegal_read, Some(0x1040));
        // With the bank locked the RAM is left untouched.
        let mut f = CartFlags {
            bank_locked: true,
            ..flags()
        };
        bus.set_data_bus(0x77);
        let v = cart.peek(0x1041, &mut pages, &mut bus, &mut f);
        assert_eq!(v, 0x77);
        assert_eq!(cart.ram().unwrap()[0x41], 0x00);
    }

    #[test]
    fn ram_random_fills_ram_deterministically() {
        let image = vec![0u8; 4096];
        let mut cart = Rom4KSC::new(&image).unwrap();
        let mut pages = PageTable::new(6);
        let mut f = flags();
        let mut rng = Random::new(42);
        cart.reset(true, &mut rng, &mut pages, &mut f);
        let first = cart.ram().unwrap().to_vec();
        let mut rng = Random::new(42);
        cart.reset(true, &mut rng, &mut pages, &mut f);
        assert_eq!(cart.ram().unwrap(), &first[..]);
        assert!(first.iter().any(|&b| b != 0));
    }

    #[test]
    fn patch_bypasses_port_restrictions() {
        let image = vec![0u8; 4096];
        let mut cart = Rom4KSC::new(&image).unwrap();
        let mut f = flags();
        assert!(cart.patch(0x10C0, 0x99, &mut f));
        assert_eq!(cart.ram().unwrap()[0x40], 0x99);
        assert!(cart.patch(0x1200, 0x55, &mut f));
        assert_eq!(cart.image()[0x200], 0x55);
    }
}
