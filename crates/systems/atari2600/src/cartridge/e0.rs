//! E0 (Parker Brothers 8K): the window is four 1K segments.  The first
//! three are independently switchable among the image's eight slices via
//! hot-spots inside the fixed top segment ($1FE0-$1FF7); the top segment is
//! wired to the last slice.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rom::check_name;
use super::{CartDevice, CartFlags, CartridgeError};
use crate::system::{Access, BusState, Device, Direct, PageAccess, PageTable, Random};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct E0 {
    image: Vec<u8>,
    slices: [u16; 3],
}

impl E0 {
    pub fn new(image: &[u8]) -> Result<Self, CartridgeError> {
        if image.len() != 8192 {
            return Err(CartridgeError::InvalidSize(image.len()));
        }
        Ok(Self {
            image: image.to_vec(),
            slices: [4, 5, 6],
        })
    }

    fn hotspot(&mut self, addr: u16, pages: &mut PageTable, flags: &mut CartFlags) {
        let a = addr & 0x0FFF;
        if (0x0FE0..=0x0FF7).contains(&a) {
            let segment = ((a - 0x0FE0) / 8) as usize;
            let slice = (a - 0x0FE0) % 8;
            self.select(segment, slice, pages, flags);
        }
    }

    fn select(&mut self, segment: usize, slice: u16, pages: &mut PageTable, flags: &mut CartFlags) {
        if flags.bank_locked {
            return;
        }
        self.slices[segment] = slice;
        self.install_segment(segment, pages);
        flags.bank_changed = true;
    }

    fn install_segment(&self, segment: usize, pages: &mut PageTable) {
        let start = 0x1000 + segment as u16 * 0x0400;
        let offset = self.slices[segment] as u32 * 0x0400;
        pages.install_range(start, start + 0x0400, |base| {
            PageAccess::direct_read(Direct::Rom(offset + (base & 0x03FF) as u32), Device::Cart)
        });
    }

    fn slice_for(&self, addr: u16) -> u16 {
        let a = addr & 0x0FFF;
        match a / 0x0400 {
            0 => self.slices[0],
            1 => self.slices[1],
            2 => self.slices[2],
            _ => 7,
        }
    }
}

impl CartDevice for E0 {
    fn name(&self) -> &'static str {
        "E0"
    }

    /// The addressing is segment-based; there is no single bank to report.
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
        self.slices = [4, 5, 6];
        self.install(pages, flags);
    }

    fn install(&mut self, pages: &mut PageTable, _flags: &mut CartFlags) {
        for segment in 0..3 {
            self.install_segment(segment, pages);
        }
        // Fixed top slice, with its tail page dispatching for the
        // hot-spots.
        pages.install_range(0x1C00, 0x2000, |base| {
            PageAccess::direct_read(
                Direct::Rom(7 * 0x0400 + (base & 0x03FF) as u32),
                Device::Cart,
            )
        });
        pages.install_range(0x1FC0, 0x2000, |_| {
            PageAccess::device(Device::Cart, Access::Read)
        });
    }

    fn peek(
        &mut self,
        addr: u16,
        pages: &mut PageTable,
        _bus: &mut BusState,
        flags: &mut CartFlags,
    ) -> u8 {
        self.hotspot(addr, pages, flags);
        let slice = self.slice_for(addr);
        self.image[slice as usize * 0x0400 + (addr & 0x03FF) as usize]
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

    fn bank(&mut self, _bank: u16, _pages: &mut PageTable, _flags: &mut CartFlags) -> bool {
        false
    }

    fn patch(&mut self, addr: u16, value: u8, flags: &mut CartFlags) -> bool {
        let slice = self.slice_for(addr);
        self.image[slice as usize * 0x0400 + (addr & 0x03FF) as usize] = value;
        flags.bank_changed = true;
        true
    }

    fn save_state(&self) -> Value {
        serde_json::json!({
            "name": self.name(),
            "bank": 0,
            "slices": self.slices,
        })
    }

    fn load_state(
        &mut self,
        v: &Value,
        pages: &mut PageTable,
        flags: &mut CartFlags,
    ) -> Result<(), serde_json::Error> {
        check_name(v, self.name())?;
        let slices: [u16; 3] = serde_json::from_value(v["slices"].clone())?;
        for (segment, slice) in slices.into_iter().enumerate() {
            self.select(segment, slice & 7, pages, flags);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::Random;

    fn image() -> Vec<u8> {
        let mut rom = vec![0u8; 8192];
        for slice in 0..8 {
            rom[slice * 0x0400] = slice as u8;
        }
        rom
    }

    fn setup() -> (E0, PageTable, BusState, CartFlags) {
        let mut cart = E0::new(&image()).unwrap();
        let mut pages = PageTable::new(6);
        let mut flags = CartFlags::default();
        let mut rng = Random::new(0);
        cart.reset(false, &mut rng, &mut pages, &mut flags);
        (cart, pages, BusState::for_tests(Random::new(0)), flags)
    }

    #[test]
    fn power_on_layout_is_4_5_6_7() {
        let (mut cart, mut pages, mut bus, mut flags) = setup();
        assert_eq!(cart.peek(0x1000, &mut pages, &mut bus, &mut flags), 4);
        assert_eq!(cart.peek(0x1400, &mut pages, &mut bus, &mut flags), 5);
        assert_eq!(cart.peek(0x1800, &mut pages, &mut bus, &mut flags), 6);
        assert_eq!(cart.peek(0x1C00, &mut pages, &mut bus, &mut flags), 7);
    }

    #[test]
    fn hotspots_retarget_their_segment() {
        let (mut cart, mut pages, mut bus, mut flags) = setup();
        // $1FE3: segment 0 -> slice 3.
        cart.peek(0x1FE3, &mut pages, &mut bus, &mut flags);
        assert_eq!(cart.peek(0x1000, &mut pages, &mut bus, &mut flags), 3);
        // $1FE9: segment 1 -> slice 1.
        cart.peek(0x1FE9, &mut pages, &mut bus, &mut flags);
        assert_eq!(cart.peek(0x1400, &mut pages, &mut bus, &mut flags), 1);
        // $1FF2: segment 2 -> slice 2.
        cart.poke(0x1FF2, 0, &mut pages, &mut bus, &mut flags);
        assert_eq!(cart.peek(0x1800, &mut pages, &mut bus, &mut flags), 2);
        // The top segment never moves.
        assert_eq!(cart.peek(0x1C00, &mut pages, &mut bus, &mut flags), 7);
    }

    #[test]
    fn state_round_trip_restores_slices() {
        let (mut cart, mut pages, mut bus, mut flags) = setup();
        cart.peek(0x1FE2, &mut pages, &mut bus, &mut flags);
        cart.peek(0x1FEF, &mut pages, &mut bus, &mut flags);
        let state = cart.save_state();

        let (mut other, mut pages2, mut bus2, mut flags2) = setup();
        other.load_state(&state, &mut pages2, &mut flags2).unwrap();
        assert_eq!(other.peek(0x1000, &mut pages2, &mut bus2, &mut flags2), 2);
        assert_eq!(other.peek(0x1400, &mut pages2, &mut bus2, &mut flags2), 7);
    }
}
