//! Property tests for the universal invariants.

use proptest::prelude::*;

use vcs_atari2600::cartridge::Cartridge;
use vcs_atari2600::{autodetect, Settings, System};
use vcs_core::Bus;

fn base_rom(size: usize) -> Vec<u8> {
    let mut rom = vec![0u8; size];
    // Avoid the mirrored-2K and superchip detection heuristics.
    rom[0] = 0xA9;
    if size > 4096 {
        rom[4096] = 0x60;
    } else if size > 2048 {
        rom[2048] = 0x60;
    }
    rom
}

fn system_with(rom: &[u8], cart_type: Option<&str>) -> System {
    let (cart, _) = Cartridge::create(rom, cart_type, &mut Settings::default()).unwrap();
    let mut system = System::new(cart, Settings::default());
    system.reset();
    system
}

proptest! {
    /// Auto-detection is a pure function of the image bytes.
    #[test]
    fn autodetect_is_pure(bytes in proptest::collection::vec(any::<u8>(), 2048..4097)) {
        let first = autodetect(&bytes);
        let second = autodetect(&bytes);
        prop_assert_eq!(first, second);
    }

    /// Every object position stays inside [0, 160) no matter what sequence
    /// of motion registers, resets and HMOVE strobes runs.
    #[test]
    fn positions_stay_clamped(
        ops in proptest::collection::vec((0u8..8, any::<u8>(), 0u32..228), 1..120)
    ) {
        let rom = base_rom(4096);
        let mut system = system_with(&rom, None);

        for (line, (op, value, clock)) in ops.into_iter().enumerate() {
            let cycles = (line as u32 % 250) * 76 + clock / 3;
            if cycles > system.bus.cycles {
                system.bus.cycles = cycles;
            }
            let addr = match op {
                0 => 0x0010, // RESP0
                1 => 0x0011, // RESP1
                2 => 0x0012, // RESM0
                3 => 0x0013, // RESM1
                4 => 0x0014, // RESBL
                5 => 0x0020 | (value as u16 & 0x04), // HMP0/HMBL
                6 => 0x002A, // HMOVE
                _ => 0x002B, // HMCLR
            };
            system.poke(addr, value);
            system.update_tia();

            for pos in system.tia.object_positions() {
                prop_assert!((0..160).contains(&pos), "position {} escaped", pos);
            }
        }
    }

    /// Rendering is idempotent: updating to a clock already covered leaves
    /// the frame untouched.
    #[test]
    fn update_frame_idempotent(
        registers in proptest::collection::vec((0u16..0x2D, any::<u8>()), 0..24),
        lines in 1u32..200,
    ) {
        let rom = base_rom(4096);
        let mut system = system_with(&rom, None);
        for (addr, value) in registers {
            system.poke(addr, value);
        }
        system.bus.cycles = lines * 76;
        system.update_tia();
        let snapshot = system.tia.current_frame_buffer().to_vec();
        // Updating again, and to earlier clocks, changes nothing.
        system.update_tia();
        system.tia.update_frame(lines as i32 * 228 - 100);
        prop_assert_eq!(system.tia.current_frame_buffer(), &snapshot[..]);
    }

    /// After bank(n), reads outside hot-spots come from that bank's slice
    /// of the image.
    #[test]
    fn bank_selects_image_slice(bank in 0u16..4, addr in 0u16..0x0F80) {
        let mut rom = base_rom(16384);
        for b in 0..4usize {
            rom[b * 4096 + 0x200] = 0xB0 + b as u8;
        }
        let mut system = system_with(&rom, Some("F6"));
        system.cart_bank(bank);
        let value = system.peek(0x1000 | addr);
        prop_assert_eq!(value, rom[bank as usize * 4096 + addr as usize]);
    }
}

// A plain test alongside the properties: the bank-changed latch reads once.
#[test]
fn bank_changed_reads_once_per_switch() {
    let rom = base_rom(8192);
    let mut system = system_with(&rom, Some("F8"));
    let _ = system.cart.bank_changed();
    system.peek(0x1FF8);
    assert!(system.cart.bank_changed());
    assert!(!system.cart.bank_changed());
}
