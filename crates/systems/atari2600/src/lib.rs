//! Atari 2600 VCS core emulation engine.
//!
//! This crate is the engineering nucleus of the emulator: the TIA signal
//! generator, the cartridge bankswitching layer, and the page-indexed bus
//! that binds them, together with the RIOT they share the address space
//! with.  The 6507 itself is an external collaborator supplied through the
//! [`vcs_core::Cpu`] contract: it issues bus transactions against
//! [`System`] and yields when the TIA raises the stop request at VSYNC end.
//!
//! # Architecture
//!
//! Every CPU cycle corresponds to three TIA color clocks.  The TIA is
//! lazily clocked: when the CPU touches a TIA address, the TIA first renders
//! up to the current color clock, then services the access.  Cartridge
//! accesses may switch banks as a side effect of the address alone; schemes
//! whose hot-spots live outside the cartridge window observe the bus
//! through a snoop hook.
//!
//! ```no_run
//! use vcs_atari2600::{Console, Settings};
//! # struct MyCpu;
//! # impl vcs_core::Cpu<vcs_atari2600::System> for MyCpu {
//! #     fn reset(&mut self, _: &mut vcs_atari2600::System) {}
//! #     fn execute(&mut self, _: &mut vcs_atari2600::System, _: u32) -> u32 { 0 }
//! # }
//! let rom = std::fs::read("pitfall.a26").unwrap();
//! let mut console = Console::create(&rom, None, Settings::default(), MyCpu).unwrap();
//! let frame = console.update();
//! // frame is 160 x height palette indices; the host maps them to RGB.
//! ```

pub mod cartridge;
pub mod riot;
pub mod settings;
pub mod system;
pub mod tia;

pub use cartridge::{autodetect, Cartridge, CartridgeError};
pub use settings::Settings;
pub use system::System;
pub use tia::{sound::TiaSound, Tia};

use serde_json::Value;
use thiserror::Error;
use vcs_core::types::Frame;
use vcs_core::Cpu;

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("cartridge error: {0}")]
    Cartridge(#[from] CartridgeError),
    #[error("state error: {0}")]
    State(#[from] serde_json::Error),
}

/// Cycle budget per [`Console::update`] call; a frame always fits, and the
/// budget bounds runaway code that never strobes VSYNC.
const CYCLES_PER_UPDATE: u32 = 25_000;

/// The console: the bus with its devices plus the externally supplied CPU.
#[derive(Debug)]
pub struct Console<C> {
    system: System,
    cpu: C,
    /// Human-readable cartridge summary from creation time.
    about: String,
}

impl<C: Cpu<System>> Console<C> {
    /// Build a console around a ROM image, auto-detecting the bankswitch
    /// scheme unless `cart_type` names one explicitly.
    pub fn create(
        rom: &[u8],
        cart_type: Option<&str>,
        mut settings: Settings,
        cpu: C,
    ) -> Result<Self, ConsoleError> {
        let (cart, about) = Cartridge::create(rom, cart_type, &mut settings)?;
        let mut console = Self {
            system: System::new(cart, settings),
            cpu,
            about,
        };
        console.reset();
        Ok(console)
    }

    pub fn about(&self) -> &str {
        &self.about
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut System {
        &mut self.system
    }

    /// Power-on reset of the whole machine.
    pub fn reset(&mut self) {
        self.system.reset();
        self.cpu.reset(&mut self.system);
    }

    /// Run one frame: start a new frame if the previous one completed, let
    /// the CPU burn its budget (it stops early on the VSYNC-end request),
    /// then do end-of-frame accounting.  Returns a view of the completed
    /// buffer.
    pub fn update(&mut self) -> Frame {
        if !self.system.tia.partial_frame() {
            self.system.start_frame();
        }
        // The 6502 strobing VSYNC clears this; if it stays set the frame
        // was interrupted (debugger break) rather than finished.
        self.system.tia.set_partial_frame(true);

        self.cpu.execute(&mut self.system, CYCLES_PER_UPDATE);
        self.system.bus.take_stop_request();

        self.system.end_frame();
        self.frame()
    }

    /// The most recently completed frame as palette indices.
    pub fn frame(&self) -> Frame {
        let tia = &self.system.tia;
        let width = tia.width();
        let height = tia.height();
        let start = tia.frame_y_start() as usize * width as usize;
        let end = start + (width * height) as usize;
        Frame {
            width,
            height,
            pixels: tia.current_frame_buffer()[start..end].to_vec(),
        }
    }

    /// Save the complete machine state.  Each component contributes a named
    /// object, mirroring the device-name strings of the underlying stream
    /// format.
    pub fn save_state(&self) -> Value {
        serde_json::json!({
            "version": 1,
            "system": "atari2600",
            "bus": self.system.bus,
            "riot": self.system.riot,
            "tia": self.system.tia.save_state(),
            "display": self.system.tia.save_display(),
            "cart": self.system.cart.save_state(),
        })
    }

    /// Restore a machine state.  Every component is parsed and validated
    /// before the first commit, so a corrupt snapshot leaves the console
    /// untouched.
    pub fn load_state(&mut self, v: &Value) -> Result<(), ConsoleError> {
        if v["system"].as_str() != Some("atari2600") || v["version"].as_u64() != Some(1) {
            return Err(ConsoleError::State(serde::de::Error::custom(
                "not an atari2600 state",
            )));
        }

        let bus: system::BusState = serde_json::from_value(v["bus"].clone())?;
        let riot: riot::Riot = serde_json::from_value(v["riot"].clone())?;
        let staged_tia = Tia::stage_state(&v["tia"], &v["display"])?;

        // The cartridge validates its device-name string against the
        // mounted ROM and re-installs its pages; it commits first since a
        // snapshot for the wrong cartridge is the common failure.
        self.system.cart_load_state(&v["cart"])?;

        self.system.tia.apply_state(staged_tia);
        self.system.tia.load_sound(&v["tia"]["sound"])?;
        self.system.bus = bus;
        self.system.riot = riot;
        Ok(())
    }
}

impl<C: Cpu<System>> vcs_core::System for Console<C> {
    type Error = ConsoleError;

    fn reset(&mut self) {
        Console::reset(self);
    }

    fn step_frame(&mut self) -> Result<Frame, Self::Error> {
        Ok(self.update())
    }

    fn save_state(&self) -> Value {
        Console::save_state(self)
    }

    fn load_state(&mut self, v: &Value) -> Result<(), serde_json::Error> {
        Console::load_state(self, v).map_err(|e| match e {
            ConsoleError::State(e) => e,
            other => serde::de::Error::custom(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcs_core::Bus;

    /// A scripted stand-in for the 6507: runs a fixed list of bus
    /// transactions, spending cycles between them.
    struct ScriptedCpu {
        script: Vec<(u32, Op)>,
        position: usize,
    }

    #[derive(Clone, Copy)]
    enum Op {
        Peek(u16),
        Poke(u16, u8),
    }

    impl ScriptedCpu {
        fn new(script: Vec<(u32, Op)>) -> Self {
            Self {
                script,
                position: 0,
            }
        }
    }

    impl Cpu<System> for ScriptedCpu {
        fn reset(&mut self, _system: &mut System) {
            self.position = 0;
        }

        fn execute(&mut self, system: &mut System, budget: u32) -> u32 {
            let start = system.bus.cycles;
            while let Some(&(at_cycle, op)) = self.script.get(self.position) {
                if system.bus.cycles.saturating_sub(start) >= budget {
                    break;
                }
                if system.bus.cycles < at_cycle {
                    system.bus.cycles = at_cycle;
                }
                self.position += 1;
                match op {
                    Op::Peek(addr) => {
                        // Instruction fetches are reads.
                        system.bus.set_last_access_read(true);
                        system.peek(addr);
                    }
                    Op::Poke(addr, value) => {
                        system.bus.set_last_access_read(true);
                        system.poke(addr, value);
                    }
                }
                if system.bus.stop_requested() {
                    break;
                }
            }
            system.bus.cycles - start
        }
    }

    fn vsync_script() -> Vec<(u32, Op)> {
        // A minimal frame: blank for three lines, draw, then strobe VSYNC.
        let mut script = vec![
            (0, Op::Poke(0x0001, 0x02)),  // VBLANK on
            (10, Op::Poke(0x0009, 0x1A)), // COLUBK
            (40 * 76, Op::Poke(0x0001, 0x00)),
            (260 * 76, Op::Poke(0x0000, 0x02)), // VSYNC on
            (262 * 76, Op::Poke(0x0000, 0x00)), // VSYNC off -> frame ends
        ];
        script.push((262 * 76 + 1, Op::Peek(0x1000)));
        script
    }

    fn rom_4k() -> Vec<u8> {
        let mut rom = vec![0u8; 4096];
        rom[0] = 0xA9;
        rom[2048] = 0x60;
        rom[0x0FFC] = 0x00;
        rom[0x0FFD] = 0xF0;
        rom
    }

    #[test]
    fn console_runs_a_scripted_frame() {
        let cpu = ScriptedCpu::new(vsync_script());
        let mut console =
            Console::create(&rom_4k(), None, Settings::default(), cpu).unwrap();
        let frame = console.update();
        assert_eq!(frame.width, 160);
        assert_eq!(frame.pixels.len(), (frame.width * frame.height) as usize);
        // The VSYNC-end path cleared the partial-frame flag.
        assert!(!console.system().tia.partial_frame());
    }

    #[test]
    fn frame_counter_advances_per_update() {
        let mut console = Console::create(
            &rom_4k(),
            None,
            Settings::default(),
            ScriptedCpu::new(vsync_script()),
        )
        .unwrap();
        let before = console.system().tia.frame_counter();
        console.update();
        assert_eq!(console.system().tia.frame_counter(), before + 1);
    }

    #[test]
    fn about_names_the_scheme() {
        let console = Console::create(
            &rom_4k(),
            None,
            Settings::default(),
            ScriptedCpu::new(vec![]),
        )
        .unwrap();
        assert!(console.about().starts_with("4K*"));
    }

    #[test]
    fn save_state_round_trip_is_stable() {
        let mut console = Console::create(
            &rom_4k(),
            None,
            Settings::default(),
            ScriptedCpu::new(vsync_script()),
        )
        .unwrap();
        console.update();
        let state = console.save_state();

        let mut other = Console::create(
            &rom_4k(),
            None,
            Settings::default(),
            ScriptedCpu::new(vsync_script()),
        )
        .unwrap();
        other.load_state(&state).unwrap();
        assert_eq!(other.save_state(), state);
    }

    #[test]
    fn load_state_rejects_foreign_snapshots() {
        let mut console = Console::create(
            &rom_4k(),
            None,
            Settings::default(),
            ScriptedCpu::new(vec![]),
        )
        .unwrap();
        let err = console
            .load_state(&serde_json::json!({"system": "nes", "version": 1}))
            .unwrap_err();
        assert!(matches!(err, ConsoleError::State(_)));
    }
}
