//! Contract between the TIA and the external audio back-end.
//!
//! The TIA owns the audio register shadows (they belong in its save state)
//! but performs no DSP: every AUDC/AUDF/AUDV write is forwarded, tagged with
//! the CPU cycle it happened on, and the back-end is free to resample on its
//! own thread.

use serde_json::Value;

pub trait TiaSound: std::fmt::Debug + Send {
    /// Return to power-on silence.
    fn reset(&mut self);

    /// An audio register write at the given CPU cycle.
    fn set(&mut self, addr: u16, value: u8, cycle: u32);

    /// The bus cycle counter was rebased; shift any remembered cycles.
    fn adjust_cycle_counter(&mut self, delta: i64);

    fn save_state(&self) -> Value;

    fn load_state(&mut self, state: &Value) -> Result<(), serde_json::Error>;
}

/// Back-end used when the host has no audio path (tests, headless runs).
#[derive(Debug, Default)]
pub struct NullSound;

impl TiaSound for NullSound {
    fn reset(&mut self) {}

    fn set(&mut self, _addr: u16, _value: u8, _cycle: u32) {}

    fn adjust_cycle_counter(&mut self, _delta: i64) {}

    fn save_state(&self) -> Value {
        Value::Null
    }

    fn load_state(&mut self, _state: &Value) -> Result<(), serde_json::Error> {
        Ok(())
    }
}

#[cfg(test)]
pub mod recording {
    use super::*;

    /// Test double capturing the forwarded register stream.
    #[derive(Debug, Default)]
    pub struct RecordingSound {
        pub writes: Vec<(u16, u8, u32)>,
        pub cycle_adjustments: Vec<i64>,
    }

    impl TiaSound for RecordingSound {
        fn reset(&mut self) {
            self.writes.clear();
        }

        fn set(&mut self, addr: u16, value: u8, cycle: u32) {
            self.writes.push((addr, value, cycle));
        }

        fn adjust_cycle_counter(&mut self, delta: i64) {
            self.cycle_adjustments.push(delta);
        }

        fn save_state(&self) -> Value {
            serde_json::json!({ "writes": self.writes.len() })
        }

        fn load_state(&mut self, _state: &Value) -> Result<(), serde_json::Error> {
            Ok(())
        }
    }
}
