//! RIOT (6532): 128 bytes of RAM, two I/O ports, and the interval timer.
//!
//! The bus installs the RIOT's RAM mirrors (A12=0, A9=0, A7=1) and I/O
//! mirrors (A12=0, A9=1, A7=1), so this device only ever sees addresses it
//! decodes.  The timer is not ticked cycle by cycle; it is an anchor cycle
//! plus an interval shift, evaluated lazily against the bus cycle counter,
//! which makes it a natural subscriber of the periodic cycle rebase.
//!
//! Joystick and console-switch *sources* live outside the core; the host
//! pushes their state in through [`Riot::set_port_a`] / [`Riot::set_port_b`].

use serde::{Deserialize, Serialize};

use crate::system::BusState;

fn serialize_ram<S: serde::Serializer>(ram: &[u8; 128], s: S) -> Result<S::Ok, S::Error> {
    serde::Serialize::serialize(ram.as_slice(), s)
}

fn deserialize_ram<'de, D: serde::Deserializer<'de>>(d: D) -> Result<[u8; 128], D::Error> {
    let vec = Vec::<u8>::deserialize(d)?;
    let mut ram = [0u8; 128];
    if vec.len() != 128 {
        return Err(serde::de::Error::custom("RIOT RAM must be 128 bytes"));
    }
    ram.copy_from_slice(&vec);
    Ok(ram)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Riot {
    #[serde(serialize_with = "serialize_ram", deserialize_with = "deserialize_ram")]
    ram: [u8; 128],

    // Timer anchor: value and interval shift captured at the write, evaluated
    // lazily.  `timer_set_cycle` is signed so the cycle rebase can push it
    // below zero.
    timer_value: u8,
    interval_shift: u8,
    timer_set_cycle: i64,
    underflow_acked: bool,

    // Port A: external input byte plus the CPU-side output latch and
    // direction register.
    port_a: u8,
    swcha_out: u8,
    swacnt: u8,

    // Port B (console switches) likewise.
    port_b: u8,
    swchb_out: u8,
    swbcnt: u8,
}

impl Default for Riot {
    fn default() -> Self {
        Self::new()
    }
}

impl Riot {
    pub fn new() -> Self {
        Self {
            ram: [0; 128],
            timer_value: 0,
            interval_shift: 10,
            timer_set_cycle: 0,
            underflow_acked: true,
            port_a: 0xFF,
            swcha_out: 0,
            swacnt: 0,
            port_b: 0xFF,
            swchb_out: 0,
            swbcnt: 0,
        }
    }

    pub fn reset(&mut self) {
        let port_a = self.port_a;
        let port_b = self.port_b;
        *self = Self::new();
        self.port_a = port_a;
        self.port_b = port_b;
    }

    /// Rebase the timer anchor when the bus cycle counter is reset.
    pub fn system_cycles_reset(&mut self, cycles: u32) {
        self.timer_set_cycle -= cycles as i64;
    }

    /// True when a write to `addr` lands on SWCHA.  The bus uses this to
    /// forward port writes to cartridges that watch the port (CompuMate).
    pub fn write_selects_swcha(addr: u16) -> bool {
        (addr & 0x1280) == 0x0280 && (addr & 0x14) != 0x14 && (addr & 0x07) == 0x00
    }

    /// Host-side controller state, active low.
    pub fn set_port_a(&mut self, value: u8) {
        self.port_a = value;
    }

    /// Host-side console switches, active low.
    pub fn set_port_b(&mut self, value: u8) {
        self.port_b = value;
    }

    pub fn swcha(&self) -> u8 {
        (self.port_a & !self.swacnt) | (self.swcha_out & self.swacnt)
    }

    fn swchb(&self) -> u8 {
        (self.port_b & !self.swbcnt) | (self.swchb_out & self.swbcnt)
    }

    // Timer arithmetic.  After a write of V with interval I, INTIM reads
    // V - 1 - floor(elapsed / I); once that underflows the counter free-runs
    // at one decrement per cycle.
    fn timer_ticks(&self, cycles: u32) -> i64 {
        let elapsed = cycles as i64 - self.timer_set_cycle;
        ((self.timer_value as i64) << self.interval_shift) - elapsed - 1
    }

    fn intim(&self, cycles: u32) -> u8 {
        let t = self.timer_ticks(cycles);
        if t >= 0 {
            ((t >> self.interval_shift) & 0xFF) as u8
        } else {
            (t & 0xFF) as u8
        }
    }

    fn timint(&mut self, cycles: u32) -> u8 {
        if self.timer_ticks(cycles) < 0 && !self.underflow_acked {
            // Reading the status register acknowledges the underflow.
            self.underflow_acked = true;
            0x80
        } else {
            0x00
        }
    }

    pub fn peek(&mut self, addr: u16, bus: &mut BusState) -> u8 {
        if addr & 0x0200 == 0 {
            return self.ram[(addr & 0x7F) as usize];
        }
        match addr & 0x07 {
            0x00 => self.swcha(),
            0x01 => self.swacnt,
            0x02 => self.swchb(),
            0x03 => self.swbcnt,
            0x04 | 0x06 => self.intim(bus.cycles),
            _ => self.timint(bus.cycles),
        }
    }

    pub fn poke(&mut self, addr: u16, value: u8, bus: &mut BusState) {
        if addr & 0x0200 == 0 {
            self.ram[(addr & 0x7F) as usize] = value;
            return;
        }
        if (addr & 0x14) == 0x14 {
            // TIM1T / TIM8T / TIM64T / T1024T
            self.interval_shift = [0, 3, 6, 10][(addr & 0x03) as usize];
            self.timer_value = value;
            self.timer_set_cycle = bus.cycles as i64;
            self.underflow_acked = false;
            return;
        }
        match addr & 0x07 {
            0x00 => self.swcha_out = value,
            0x01 => self.swacnt = value,
            0x02 => self.swchb_out = value,
            0x03 => self.swbcnt = value,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{BusState, Random};

    fn bus_at(cycles: u32) -> BusState {
        let mut bus = BusState::for_tests(Random::new(0));
        bus.cycles = cycles;
        bus
    }

    #[test]
    fn ram_read_write_through_mirrors() {
        let mut riot = Riot::new();
        let mut bus = bus_at(0);
        riot.poke(0x0080, 0x12, &mut bus);
        assert_eq!(riot.peek(0x0080, &mut bus), 0x12);
        // A7=1 mirrors: the stack page maps to the same 128 bytes.
        riot.poke(0x0180, 0x34, &mut bus);
        assert_eq!(riot.peek(0x0080, &mut bus), 0x34);
    }

    #[test]
    fn timer_counts_down_at_selected_interval() {
        let mut riot = Riot::new();
        let mut bus = bus_at(100);
        riot.poke(0x0296, 10, &mut bus); // TIM64T
        assert_eq!(riot.peek(0x0284, &mut bus), 9);
        bus.cycles = 100 + 64;
        assert_eq!(riot.peek(0x0284, &mut bus), 8);
        bus.cycles = 100 + 9 * 64;
        assert_eq!(riot.peek(0x0284, &mut bus), 0);
    }

    #[test]
    fn timer_free_runs_after_underflow() {
        let mut riot = Riot::new();
        let mut bus = bus_at(0);
        riot.poke(0x0294, 2, &mut bus); // TIM1T
        bus.cycles = 2;
        // Underflowed: counts every cycle from 0xFF downwards.
        assert_eq!(riot.peek(0x0284, &mut bus), 0xFF);
        bus.cycles = 3;
        assert_eq!(riot.peek(0x0284, &mut bus), 0xFE);
    }

    #[test]
    fn timint_reports_once_then_clears() {
        let mut riot = Riot::new();
        let mut bus = bus_at(0);
        riot.poke(0x0294, 2, &mut bus);
        assert_eq!(riot.peek(0x0285, &mut bus), 0x00);
        bus.cycles = 2;
        assert_eq!(riot.peek(0x0285, &mut bus), 0x80);
        assert_eq!(riot.peek(0x0285, &mut bus), 0x00);
        // Re-arming the timer re-enables the flag.
        riot.poke(0x0294, 3, &mut bus);
        assert_eq!(riot.peek(0x0285, &mut bus), 0x00);
        bus.cycles = 5;
        assert_eq!(riot.peek(0x0285, &mut bus), 0x80);
        assert_eq!(riot.peek(0x0285, &mut bus), 0x00);
    }

    #[test]
    fn cycle_rebase_preserves_timer_reading() {
        let mut riot = Riot::new();
        let mut bus = bus_at(5000);
        riot.poke(0x0296, 20, &mut bus);
        bus.cycles = 5000 + 5 * 64;
        let before = riot.peek(0x0284, &mut bus);
        riot.system_cycles_reset(bus.cycles);
        bus.cycles = 0;
        assert_eq!(riot.peek(0x0284, &mut bus), before);
    }

    #[test]
    fn port_a_mixes_input_and_output_by_direction() {
        let mut riot = Riot::new();
        let mut bus = bus_at(0);
        riot.set_port_a(0b1111_0111); // right pressed on player 0
        assert_eq!(riot.peek(0x0280, &mut bus), 0b1111_0111);
        // Direction bits switch the low nibble to the output latch.
        riot.poke(0x0281, 0x0F, &mut bus); // SWACNT
        riot.poke(0x0280, 0x05, &mut bus); // SWCHA output latch
        assert_eq!(riot.peek(0x0280, &mut bus) & 0x0F, 0x05);
    }

    #[test]
    fn swcha_write_decode() {
        assert!(Riot::write_selects_swcha(0x0280));
        assert!(!Riot::write_selects_swcha(0x0281));
        assert!(!Riot::write_selects_swcha(0x0294));
        assert!(!Riot::write_selects_swcha(0x0080));
    }
}
