//! Tigervision bankswitching: 3F, and the 3E extension with RAM.
//!
//! The hot-spots are zero-page stores ($3F selects the ROM bank of the lower
//! 2K window, 3E additionally uses $3E to map a 1K RAM bank there).  Those
//! addresses belong to the TIA, so the cartridge learns about the stores by
//! snooping the bus; the TIA still receives them.  The upper 2K of the
//! window is fixed to the last bank.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rom::check_name;
use super::{init_ram, CartDevice, CartFlags, CartridgeError, RamArea};
use crate::system::{BusState, Device, Direct, PageAccess, PageTable, Random};

const ROM_BANK_SIZE: usize = 2048;
const RAM_BANK_SIZE: usize = 1024;
/// 3E carts carry 32K of RAM in 1K banks.
const RAM_BANKS: usize = 32;

fn validate(image: &[u8]) -> Result<(), CartridgeError> {
    if image.len() < 2 * ROM_BANK_SIZE || image.len() % ROM_BANK_SIZE != 0 {
        return Err(CartridgeError::InvalidSize(image.len()));
    }
    Ok(())
}

/// Install the fixed upper half: always the last 2K bank.
fn install_fixed_half(image_len: usize, pages: &mut PageTable) {
    let offset = (image_len - ROM_BANK_SIZE) as u32;
    pages.install_range(0x1800, 0x2000, |base| {
        PageAccess::direct_read(Direct::Rom(offset + (base & 0x07FF) as u32), Device::Cart)
    });
}

fn install_rom_half(bank: u16, pages: &mut PageTable) {
    let offset = bank as u32 * ROM_BANK_SIZE as u32;
    pages.install_range(0x1000, 0x1800, |base| {
        PageAccess::direct_read(Direct::Rom(offset + (base & 0x07FF) as u32), Device::Cart)
    });
}

/// 3F: ROM-only Tigervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart3F {
    image: Vec<u8>,
    current_bank: u16,
}

impl Cart3F {
    pub fn new(image: &[u8]) -> Result<Self, CartridgeError> {
        validate(image)?;
        Ok(Self {
            image: image.to_vec(),
            current_bank: 0,
        })
    }
}

impl CartDevice for Cart3F {
    fn name(&self) -> &'static str {
        "3F"
    }

    fn bank_count(&self) -> u16 {
        (self.image.len() / ROM_BANK_SIZE) as u16
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

    fn install(&mut self, pages: &mut PageTable, _flags: &mut CartFlags) {
        install_rom_half(self.current_bank, pages);
        install_fixed_half(self.image.len(), pages);
    }

    fn peek(
        &mut self,
        addr: u16,
        _pages: &mut PageTable,
        _bus: &mut BusState,
        _flags: &mut CartFlags,
    ) -> u8 {
        let a = addr & 0x0FFF;
        let offset = if a < 0x0800 {
            self.current_bank as usize * ROM_BANK_SIZE
        } else {
            self.image.len() - ROM_BANK_SIZE
        };
        self.image[offset + (a & 0x07FF) as usize]
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
        value: u8,
        is_read: bool,
        pages: &mut PageTable,
        flags: &mut CartFlags,
    ) {
        // STA $3F (or any mirror below $40) latches the bank number.
        if !is_read && addr & 0x1FFF < 0x0040 {
            self.bank(value as u16, pages, flags);
        }
    }

    fn bank(&mut self, bank: u16, pages: &mut PageTable, flags: &mut CartFlags) -> bool {
        if flags.bank_locked {
            return false;
        }
        self.current_bank = bank % self.bank_count();
        install_rom_half(self.current_bank, pages);
        flags.bank_changed = true;
        true
    }

    fn patch(&mut self, addr: u16, value: u8, flags: &mut CartFlags) -> bool {
        let a = addr & 0x0FFF;
        let offset = if a < 0x0800 {
            self.current_bank as usize * ROM_BANK_SIZE
        } else {
            self.image.len() - ROM_BANK_SIZE
        };
        self.image[offset + (a & 0x07FF) as usize] = value;
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

/// 3E: Tigervision plus 32K of banked RAM in the lower window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart3E {
    image: Vec<u8>,
    ram: Vec<u8>,
    current_bank: u16,
    ram_bank: Option<u16>,
}

impl Cart3E {
    pub fn new(image: &[u8]) -> Result<Self, CartridgeError> {
        validate(image)?;
        Ok(Self {
            image: image.to_vec(),
            ram: vec![0; RAM_BANKS * RAM_BANK_SIZE],
            current_bank: 0,
            ram_bank: None,
        })
    }

    fn install_ram_half(&self, bank: u16, pages: &mut PageTable) {
        let offset = bank * RAM_BANK_SIZE as u16;
        // Read port in the first 1K, write port in the second.
        pages.install_range(0x1000, 0x1400, |base| {
            PageAccess::direct_read(Direct::Ram(offset + (base & 0x03FF)), Device::Cart)
        });
        pages.install_range(0x1400, 0x1800, |base| {
            PageAccess::direct_write(Direct::Ram(offset + (base & 0x03FF)), Device::Cart)
        });
    }
}

impl CartDevice for Cart3E {
    fn name(&self) -> &'static str {
        "3E"
    }

    fn bank_count(&self) -> u16 {
        (self.image.len() / ROM_BANK_SIZE) as u16
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
        vec![RamArea {
            start: 0x1000,
            size: RAM_BANK_SIZE as u16,
            read_offset: 0,
            write_offset: 0x0400,
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
        self.current_bank = self.start_bank();
        self.ram_bank = None;
        self.install(pages, flags);
    }

    fn install(&mut self, pages: &mut PageTable, _flags: &mut CartFlags) {
        match self.ram_bank {
            Some(bank) => self.install_ram_half(bank, pages),
            None => install_rom_half(self.current_bank, pages),
        }
        install_fixed_half(self.image.len(), pages);
    }

    fn peek(
        &mut self,
        addr: u16,
        _pages: &mut PageTable,
        bus: &mut BusState,
        flags: &mut CartFlags,
    ) -> u8 {
        let a = addr & 0x0FFF;
        if a < 0x0800 {
            if let Some(bank) = self.ram_bank {
                let base = bank as usize * RAM_BANK_SIZE;
                if a < 0x0400 {
                    return self.ram[base + (a & 0x03FF) as usize];
                }
                // Reading the RAM write port.
                let value = bus.data_bus();
                if !flags.bank_locked {
                    flags.note_illegal_read(addr);
                    self.ram[base + (a & 0x03FF) as usize] = value;
                }
                return value;
            }
            return self.image
                [self.current_bank as usize * ROM_BANK_SIZE + (a & 0x07FF) as usize];
        }
        self.image[self.image.len() - ROM_BANK_SIZE + (a & 0x07FF) as usize]
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
        if let Some(bank) = self.ram_bank {
            if (0x0400..0x0800).contains(&a) {
                self.ram[bank as usize * RAM_BANK_SIZE + (a & 0x03FF) as usize] = value;
                return true;
            }
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
        if is_read {
            return;
        }
        match addr & 0x1FFF {
            // STA $3F: map a ROM bank into the lower window.
            0x003F => {
                self.bank(value as u16, pages, flags);
            }
            // STA $3E: map a RAM bank instead.
            0x003E => {
                if flags.bank_locked {
                    return;
                }
                let bank = (value as u16) % RAM_BANKS as u16;
                self.ram_bank = Some(bank);
                self.install_ram_half(bank, pages);
                flags.bank_changed = true;
            }
            _ => {}
        }
    }

    fn bank(&mut self, bank: u16, pages: &mut PageTable, flags: &mut CartFlags) -> bool {
        if flags.bank_locked {
            return false;
        }
        self.current_bank = bank % self.bank_count();
        self.ram_bank = None;
        install_rom_half(self.current_bank, pages);
        flags.bank_changed = true;
        true
    }

    fn patch(&mut self, addr: u16, value: u8, flags: &mut CartFlags) -> bool {
        let a = addr & 0x0FFF;
        if a < 0x0800 {
            if let Some(bank) = self.ram_bank {
                self.ram[bank as usize * RAM_BANK_SIZE + (a & 0x03FF) as usize] = value;
                flags.bank_changed = true;
                return true;
            }
            self.image[self.current_bank as usize * ROM_BANK_SIZE + (a & 0x07FF) as usize] =
                value;
        } else {
            let fixed = self.image.len() - ROM_BANK_SIZE;
            self.image[fixed + (a & 0x07FF) as usize] = value;
        }
        flags.bank_changed = true;
        true
    }

    fn save_state(&self) -> Value {
        serde_json::json!({
            "name": self.name(),
            "bank": self.current_bank,
            "ram_bank": self.ram_bank,
            "ram": self.ram,
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
        let ram_bank: Option<u16> = serde_json::from_value(v["ram_bank"].clone())?;
        let ram: Vec<u8> = serde_json::from_value(v["ram"].clone())?;
        if ram.len() != self.ram.len() {
            return Err(serde::de::Error::custom("cartridge RAM size mismatch"));
        }
        self.ram = ram;
        self.bank(bank, pages, flags);
        if let Some(rb) = ram_bank {
            self.ram_bank = Some(rb % RAM_BANKS as u16);
            self.install_ram_half(rb % RAM_BANKS as u16, pages);
        }
        Ok(())
    }
}
