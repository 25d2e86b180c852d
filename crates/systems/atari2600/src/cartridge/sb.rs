//! SB (Brazilian "SuperBanking" 128K/256K): any access in $0800-$0FFF
//! selects the bank carried in the low address bits.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rom::check_name;
use super::{CartDevice, CartFlags, CartridgeError};
use crate::system::{BusState, Device, Direct, PageAccess, PageTable, Random};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sb {
    image: Vec<u8>,
    current_bank: u16,
}

impl Sb {
    pub fn new(image: &[u8]) -> Result<Self, CartridgeError> {
        if image.len() != 131072 && image.len() != 262144 {
            return Err(CartridgeError::InvalidSize(image.len()));
        }
        Ok(Self {
            image: image.to_vec(),
            current_bank: 0,
        })
    }
}

impl CartDevice for Sb {
    fn name(&self) -> &'static str {
        "SB"
    }

    fn bank_count(&self) -> u16 {
        (self.image.len() / 4096) as u16
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
        if addr & 0x1800 == 0x0800 {
            self.bank(addr & (self.bank_count() - 1), pages, flags);
        }
    }

    fn bank(&mut self, bank: u16, pages: &mut PageTable, flags: &mut CartFlags) -> bool {
        if flags.bank_locked {
            return false;
        }
        self.current_bank = bank % self.bank_count();
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
