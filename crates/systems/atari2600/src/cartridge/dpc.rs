//! DPC (Pitfall II): two F8-style program banks plus the Display Processor
//! Chip — eight data fetchers over a 2K display bank, an 8-bit LFSR random
//! register, and three square-wave music fetchers clocked at 20 kHz off the
//! CPU clock.  Registers read at $1000-$103F, write at $1040-$107F.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rom::check_name;
use super::{install_rom_bank, CartDevice, CartFlags, CartridgeError};
use crate::system::{Access, BusState, Device, PageAccess, PageTable, Random};

const PROGRAM_SIZE: usize = 8192;
const DISPLAY_SIZE: usize = 2048;
const MUSIC_CLOCK: f64 = 20_000.0 / 1_193_191.66;

static MUSIC_AMPLITUDES: [u8; 8] = [0x00, 0x04, 0x05, 0x09, 0x06, 0x0A, 0x0B, 0x0F];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dpc {
    image: Vec<u8>,
    current_bank: u16,
    counters: [u16; 8],
    tops: [u8; 8],
    bottoms: [u8; 8],
    flags_reg: [u8; 8],
    music_mode: [bool; 3],
    random: u8,
    music_cycles: i64,
    fractional_clocks: f64,
}

impl Dpc {
    pub fn new(image: &[u8]) -> Result<Self, CartridgeError> {
        if image.len() < PROGRAM_SIZE + DISPLAY_SIZE {
            return Err(CartridgeError::InvalidSize(image.len()));
        }
        Ok(Self {
            image: image[..PROGRAM_SIZE + DISPLAY_SIZE].to_vec(),
            current_bank: 0,
            counters: [0; 8],
            tops: [0; 8],
            bottoms: [0; 8],
            flags_reg: [0; 8],
            music_mode: [false; 3],
            random: 1,
            music_cycles: 0,
            fractional_clocks: 0.0,
        })
    }

    fn display(&self) -> &[u8] {
        &self.image[PROGRAM_SIZE..]
    }

    fn clock_random(&mut self) {
        let r = self.random;
        let feedback = !((r >> 7) ^ (r >> 5) ^ (r >> 4) ^ (r >> 3)) & 0x01;
        self.random = (r << 1) | feedback;
    }

    /// Advance the music-mode fetchers to the current CPU cycle.
    fn update_music_fetchers(&mut self, cycles: u32) {
        let elapsed = cycles as i64 - self.music_cycles;
        self.music_cycles = cycles as i64;
        self.fractional_clocks += elapsed as f64 * MUSIC_CLOCK;
        let whole = self.fractional_clocks as i64;
        self.fractional_clocks -= whole as f64;
        if whole <= 0 {
            return;
        }

        for voice in 0..3 {
            if !self.music_mode[voice] {
                continue;
            }
            let fetcher = voice + 5;
            let top = self.tops[fetcher] as i64 + 1;
            let mut low = (self.counters[fetcher] & 0x00FF) as i64;
            if self.tops[fetcher] != 0 {
                low -= whole % top;
                if low < 0 {
                    low += top;
                }
            } else {
                low = 0;
            }
            self.counters[fetcher] = (self.counters[fetcher] & 0x0700) | low as u16;
            self.flags_reg[fetcher] = if low <= self.bottoms[fetcher] as i64 {
                0x00
            } else if low <= self.tops[fetcher] as i64 {
                0xFF
            } else {
                self.flags_reg[fetcher]
            };
        }
    }

    fn update_flag(&mut self, fetcher: usize) {
        let low = (self.counters[fetcher] & 0x00FF) as u8;
        if low == self.tops[fetcher] {
            self.flags_reg[fetcher] = 0xFF;
        } else if low == self.bottoms[fetcher] {
            self.flags_reg[fetcher] = 0x00;
        }
    }

    fn clock_fetcher(&mut self, fetcher: usize) {
        if fetcher >= 5 && self.music_mode[fetcher - 5] {
            return;
        }
        self.counters[fetcher] = self.counters[fetcher].wrapping_sub(1) & 0x07FF;
    }

    fn hotspot(&mut self, addr: u16, pages: &mut PageTable, flags: &mut CartFlags) {
        match addr & 0x0FFF {
            0x0FF8 => {
                self.bank(0, pages, flags);
            }
            0x0FF9 => {
                self.bank(1, pages, flags);
            }
            _ => {}
        }
    }
}

impl CartDevice for Dpc {
    fn name(&self) -> &'static str {
        "DPC"
    }

    fn bank_count(&self) -> u16 {
        2
    }

    fn current_bank(&self) -> u16 {
        self.current_bank
    }

    fn start_bank(&self) -> u16 {
        1
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
        self.counters = [0; 8];
        self.tops = [0; 8];
        self.bottoms = [0; 8];
        self.flags_reg = [0; 8];
        self.music_mode = [false; 3];
        self.random = 1;
        self.music_cycles = 0;
        self.fractional_clocks = 0.0;
        let start = self.start_bank();
        self.install(pages, flags);
        self.bank(start, pages, flags);
    }

    fn install(&mut self, pages: &mut PageTable, flags: &mut CartFlags) {
        let bank = self.current_bank;
        self.bank(bank, pages, flags);
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
        if a < 0x0040 {
            self.update_music_fetchers(bus.cycles);
            let index = (a & 0x07) as usize;
            let function = (a >> 3) & 0x07;
            let result = match function {
                0x00 => {
                    if index < 4 {
                        self.clock_random();
                        self.random
                    } else {
                        let mut amplitude = 0usize;
                        for voice in 0..3 {
                            if self.music_mode[voice] && self.flags_reg[5 + voice] != 0 {
                                amplitude |= 1 << voice;
                            }
                        }
                        MUSIC_AMPLITUDES[amplitude]
                    }
                }
                0x01 => {
                    self.update_flag(index);
                    let value = self.display()[0x07FF - (self.counters[index] & 0x07FF) as usize];
                    self.clock_fetcher(index);
                    value
                }
                0x02 => {
                    self.update_flag(index);
                    let value = self.display()[0x07FF - (self.counters[index] & 0x07FF) as usize]
                        & self.flags_reg[index];
                    self.clock_fetcher(index);
                    value
                }
                0x07 => {
                    self.update_flag(index);
                    self.flags_reg[index]
                }
                _ => 0,
            };
            return result;
        }
        self.image[self.current_bank as usize * 4096 + a as usize]
    }

    fn poke(
        &mut self,
        addr: u16,
        value: u8,
        pages: &mut PageTable,
        bus: &mut BusState,
        flags: &mut CartFlags,
    ) -> bool {
        self.hotspot(addr, pages, flags);
        let a = addr & 0x0FFF;
        if (0x0040..0x0080).contains(&a) {
            self.update_music_fetchers(bus.cycles);
            let index = ((a - 0x0040) & 0x07) as usize;
            let function = ((a - 0x0040) >> 3) & 0x07;
            match function {
                0x00 => {
                    self.tops[index] = value;
                    self.flags_reg[index] = 0x00;
                    self.update_flag(index);
                }
                0x01 => {
                    self.bottoms[index] = value;
                }
                0x02 => {
                    self.counters[index] = (self.counters[index] & 0x0700) | value as u16;
                }
                0x03 => {
                    self.counters[index] =
                        ((value as u16 & 0x07) << 8) | (self.counters[index] & 0x00FF);
                    if index >= 5 {
                        self.music_mode[index - 5] = value & 0x10 != 0;
                    }
                }
                0x06 => {
                    self.random = 1;
                }
                _ => {}
            }
            return true;
        }
        false
    }

    fn bank(&mut self, bank: u16, pages: &mut PageTable, flags: &mut CartFlags) -> bool {
        if flags.bank_locked {
            return false;
        }
        self.current_bank = bank & 1;
        install_rom_bank(pages, self.current_bank as u32 * 4096, 0x1080, 0x1FC0);
        // The DPC register file answers reads and writes below $1080.
        pages.install_range(0x1000, 0x1080, |_| {
            PageAccess::device(Device::Cart, Access::ReadWrite)
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
            "counters": self.counters,
            "tops": self.tops,
            "bottoms": self.bottoms,
            "flags": self.flags_reg,
            "music_mode": self.music_mode,
            "random": self.random,
            "music_cycles": self.music_cycles,
            "fractional_clocks": self.fractional_clocks,
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
        self.counters = serde_json::from_value(v["counters"].clone())?;
        self.tops = serde_json::from_value(v["tops"].clone())?;
        self.bottoms = serde_json::from_value(v["bottoms"].clone())?;
        self.flags_reg = serde_json::from_value(v["flags"].clone())?;
        self.music_mode = serde_json::from_value(v["music_mode"].clone())?;
        self.random = serde_json::from_value(v["random"].clone())?;
        self.music_cycles = serde_json::from_value(v["music_cycles"].clone())?;
        self.fractional_clocks = serde_json::from_value(v["fractional_clocks"].clone())?;
        self.bank(bank, pages, flags);
        Ok(())
    }

    fn system_cycles_reset(&mut self, cycles: u32) {
        self.music_cycles -= cycles as i64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::Random;

    fn image() -> Vec<u8> {
        let mut rom = vec![0u8; PROGRAM_SIZE + DISPLAY_SIZE];
        rom[0x80] = 0x11;
        rom[4096 + 0x80] = 0x22;
        for i in 0..DISPLAY_SIZE {
            rom[PROGRAM_SIZE + i] = (i & 0xFF) as u8;
        }
        rom
    }

    fn setup() -> (Dpc, PageTable, BusState, CartFlags) {
        let mut cart = Dpc::new(&image()).unwrap();
        let mut pages = PageTable::new(6);
        let mut flags = CartFlags::default();
        let mut rng = Random::new(0);
        cart.reset(false, &mut rng, &mut pages, &mut flags);
        (cart, pages, BusState::for_tests(Random::new(0)), flags)
    }

    #[test]
    fn program_banks_switch_like_f8() {
        let (mut cart, mut pages, mut bus, mut flags) = setup();
        assert_eq!(cart.current_bank(), 1);
        assert_eq!(cart.peek(0x1080, &mut pages, &mut bus, &mut flags), 0x22);
        cart.peek(0x1FF8, &mut pages, &mut bus, &mut flags);
        assert_eq!(cart.current_bank(), 0);
        assert_eq!(cart.peek(0x1080, &mut pages, &mut bus, &mut flags), 0x11);
    }

    #[test]
    fn data_fetcher_walks_the_display_bank() {
        let (mut cart, mut pages, mut bus, mut flags) = setup();
        // Point fetcher 0 at display offset 0x07FF - 0x100.
        cart.poke(0x1050, 0x00, &mut pages, &mut bus, &mut flags); // counter low
        cart.poke(0x1058, 0x01, &mut pages, &mut bus, &mut flags); // counter high
        let display_index = 0x07FF - 0x0100;
        let expected = (display_index & 0xFF) as u8;
        assert_eq!(
            cart.peek(0x1008, &mut pages, &mut bus, &mut flags),
            expected
        );
        // The counter decrements after each fetch.
        assert_eq!(
            cart.peek(0x1008, &mut pages, &mut bus, &mut flags),
            ((display_index + 1) & 0xFF) as u8
        );
    }

    #[test]
    fn fetcher_flag_sets_at_top_and_clears_at_bottom() {
        let (mut cart, mut pages, mut bus, mut flags) = setup();
        cart.poke(0x1040, 0x10, &mut pages, &mut bus, &mut flags); // top
        cart.poke(0x1048, 0x08, &mut pages, &mut bus, &mut flags); // bottom
        cart.poke(0x1050, 0x10, &mut pages, &mut bus, &mut flags); // counter low = top
        cart.poke(0x1058, 0x00, &mut pages, &mut bus, &mut flags);
        // Reading the flag register reflects the window comparison.
        assert_eq!(cart.peek(0x1038, &mut pages, &mut bus, &mut flags), 0xFF);
        // Walk the counter down to the bottom; the flag drops.
        for _ in 0..8 {
            cart.peek(0x1008, &mut pages, &mut bus, &mut flags);
        }
        assert_eq!(cart.peek(0x1038, &mut pages, &mut bus, &mut flags), 0x00);
    }

    #[test]
    fn random_register_clocks_and_resets() {
        let (mut cart, mut pages, mut bus, mut flags) = setup();
        let first = cart.peek(0x1000, &mut pages, &mut bus, &mut flags);
        let second = cart.peek(0x1000, &mut pages, &mut bus, &mut flags);
        assert_ne!(first, second);
        // Function 6 resets the LFSR seed.
        cart.poke(0x1070, 0, &mut pages, &mut bus, &mut flags);
        cart.poke(0x1070, 0, &mut pages, &mut bus, &mut flags);
        let after_reset = cart.peek(0x1000, &mut pages, &mut bus, &mut flags);
        assert_eq!(after_reset, first);
    }

    #[test]
    fn oversized_pitfall_images_are_accepted() {
        let mut rom = image();
        rom.extend(std::iter::repeat(0xFF).take(255));
        assert!(Dpc::new(&rom).is_ok());
        assert!(Dpc::new(&rom[..4096]).is_err());
    }
}
