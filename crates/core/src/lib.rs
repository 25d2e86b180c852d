//! Core emulator primitives and traits.
//!
//! Machine crates implement [`System`] on their console type and drive an
//! external CPU through the [`Cpu`] contract.  The frame type deliberately
//! carries palette indices, not RGB: color conversion (NTSC/PAL palettes,
//! phosphor blending) belongs to the host display driver.

pub mod types {
    use serde::{Deserialize, Serialize};

    /// A rendered frame of palette indices, one byte per pixel.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Frame {
        pub width: u32,
        pub height: u32,
        pub pixels: Vec<u8>,
    }

    impl Frame {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                pixels: vec![0; (width * height) as usize],
            }
        }
    }

    pub type AudioSample = i16;
}

use serde_json::Value;

/// Anything a CPU can issue bus transactions against.
pub trait Bus {
    fn peek(&mut self, addr: u16) -> u8;
    fn poke(&mut self, addr: u16, value: u8);
}

/// Contract for an externally supplied CPU core.
///
/// The emulation loop hands the CPU a cycle budget; the CPU must stop early
/// when the bus raises its stop request (the TIA does this at VSYNC end) and
/// report the cycles it actually consumed.
pub trait Cpu<B: Bus> {
    fn reset(&mut self, bus: &mut B);
    fn execute(&mut self, bus: &mut B, budget: u32) -> u32;
}

/// A high-level System trait tying components together.
pub trait System {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reset to initial power-on state.
    fn reset(&mut self);

    /// Emulate until a frame is produced and return it.
    fn step_frame(&mut self) -> Result<types::Frame, Self::Error>;

    /// Return a JSON-serializable save state.
    fn save_state(&self) -> Value;

    /// Load a JSON save state.  Prior state must be preserved on failure.
    fn load_state(&mut self, v: &Value) -> Result<(), serde_json::Error>;
}
