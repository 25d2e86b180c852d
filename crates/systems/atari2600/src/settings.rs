//! Configuration keys consumed by the core engine.
//!
//! The surrounding application owns persistence and the UI for these; the
//! core only reads them (and bumps `rom_load_count` when slicing multicart
//! images).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Initialize on-cartridge RAM with a pseudo-random pattern instead of
    /// zeros.  Some games rely on garbage startup RAM.
    pub ram_random: bool,
    /// Emulate PAL color-subcarrier drift: when the previous frame had an odd
    /// scanline count, all color registers are OR'd with 0x01 at frame start.
    pub color_loss: bool,
    /// Whether undriven TIA data-bus bits read back as random noise rather
    /// than the last latched bus value.
    pub tia_driven: bool,
    /// Frames per second; 0 selects auto-detection from the scanline count.
    pub framerate: u32,
    /// Round-robin selector for multicart ROM images, advanced on each load.
    pub rom_load_count: u32,
    /// Seed for the system RNG; fixed seeds make RAM fuzzing reproducible.
    pub random_seed: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ram_random: false,
            color_loss: false,
            tia_driven: false,
            framerate: 0,
            rom_load_count: 0,
            random_seed: 0x2A116C,
        }
    }
}
