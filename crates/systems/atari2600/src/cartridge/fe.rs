//! FE (Activision 8K): no hot-spot table at all.  The cartridge watches the
//! bus for an access to $01FE (the stack slot JSR/RTS traffic lands on) and
//! then decodes bit 5 of the very next data-bus value: a $Fxxx target keeps
//! bank 0, a $Dxxx target selects bank 1.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rom::check_name;
use super::{CartDevice, CartFlags, CartridgeError};
use crate::system::{BusState, Device, Direct, PageAccess, PageTable, Random};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fe {
    image: Vec<u8>,
    current_bank: u16,
    armed: bool,
}

impl Fe {
    pub fn new(image: &[u8]) -> Result<Self, CartridgeError> {
        if image.len() != 8192 {
            return Err(CartridgeError::InvalidSize(image.len()));
        }
        Ok(Self {
            image: image.to_vec(),
            current_bank: 0,
            armed: false,
        })
    }
}

impl CartDevice for Fe {
    fn name(&self) -> &'static str {
        "FE"
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
        self.armed = false;
        self.install(pages, flags);
    }

    fn install(&mut self, pages: &mut PageTable, _flags: &mut CartFlags) {
        let offset = self.current_bank as u32 * 4096;
        pages.install_range(0x1000, 0x2000, |base| {
            PageAccess::direct_read(Direct::Rom(offset + (base & 0x0FFF) as u32), Device::Cart)
        });
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
        value: u8,
        _is_read: bool,
        pages: &mut PageTable,
        flags: &mut CartFlags,
    ) {
        if self.armed {
            self.armed = false;
            let bank = if value & 0x20 != 0 { 0 } else { 1 };
            if bank != self.current_bank {
                self.bank(bank, pages, flags);
            }
        }
        if addr & 0x1FFF == 0x01FE {
            self.armed = true;
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
        serde_json::json!({
            "name": self.name(),
            "bank": self.current_bank,
            "armed": self.armed,
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
        self.armed = serde_json::from_value(v["armed"].clone())?;
        self.bank(bank, pages, flags);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::Random;

    #[test]
    fn stack_access_then_data_bit5_selects_bank() {
        let mut rom = vec![0u8; 8192];
        rom[0] = 0xF0;
        rom[4096] = 0xD0;
        let mut cart = Fe::new(&rom).unwrap();
        let mut pages = PageTable::new(6);
        let mut flags = CartFlags::default();
        let mut rng = Random::new(0);
        cart.reset(false, &mut rng, &mut pages, &mut flags);
        assert_eq!(cart.current_bank(), 0);

        // JSR pushes the return address high byte through $01FE; a $Dxxx
        // value (bit 5 clear) lands in bank 1.
        cart.snoop(0x01FE, 0x00, false, &mut pages, &mut flags);
        cart.snoop(0x01FD, 0xD3, false, &mut pages, &mut flags);
        assert_eq!(cart.current_bank(), 1);

        // An RTS pulling a $Fxxx high byte returns to bank 0.
        cart.snoop(0x01FE, 0x00, true, &mut pages, &mut flags);
        cart.snoop(0x1D35, 0xF7, true, &mut pages, &mut flags);
        assert_eq!(cart.current_bank(), 0);

        // Without the arming access, data values change nothing.
        cart.snoop(0x0080, 0xD0, false, &mut pages, &mut flags);
        assert_eq!(cart.current_bank(), 0);
    }
}
