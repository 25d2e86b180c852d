//! End-to-end scenarios driving the engine through the public bus, the way
//! a 6507 would.

use vcs_atari2600::cartridge::Cartridge;
use vcs_atari2600::{autodetect, Settings, System};
use vcs_core::Bus;

fn system_for(rom: &[u8], cart_type: Option<&str>) -> System {
    let (cart, _) = Cartridge::create(rom, cart_type, &mut Settings::default()).unwrap();
    let mut system = System::new(cart, Settings::default());
    system.reset();
    system
}

/// Advance the bus to a color clock within a scanline, then flush TIA
/// rendering up to it.
fn run_to(system: &mut System, scanline: u32, clock_in_line: u32) {
    system.bus.cycles = (scanline * 228 + clock_in_line) / 3;
    system.update_tia();
}

#[test]
fn smoke_test_4k_cart() {
    let mut rom = vec![0u8; 4096];
    rom[0] = 0xA9;
    rom[2048] = 0x60;
    // Reset vector $F000.
    rom[0x0FFC] = 0x00;
    rom[0x0FFD] = 0xF0;

    assert_eq!(autodetect(&rom), "4K");

    let mut system = system_for(&rom, None);
    // The CPU collaborator fetches its reset vector through the window.
    assert_eq!(system.peek(0x1FFC), 0x00);
    assert_eq!(system.peek(0x1FFD), 0xF0);
}

#[test]
fn f8_bank_switch_via_hotspot_reads() {
    let mut rom = vec![0u8; 8192];
    rom[0] = 0x11;
    rom[4096] = 0x22;
    let mut system = system_for(&rom, Some("F8"));

    system.peek(0x1FF9);
    assert_eq!(system.cart.current_bank(), 1);
    assert_eq!(system.peek(0x1000), rom[4096]);

    system.peek(0x1FF8);
    assert_eq!(system.cart.current_bank(), 0);
    assert_eq!(system.peek(0x1000), rom[0]);
}

#[test]
fn f8sc_ram_ports_and_illegal_read() {
    let rom = vec![0u8; 8192];
    let mut system = system_for(&rom, Some("F8SC"));

    // Write port at $1000-$107F, read port at $1080-$10FF.
    system.poke(0x1040, 0x5A);
    assert_eq!(system.peek(0x10C0), 0x5A);

    // A read landing on the write port returns the current data-bus value
    // and corrupts the RAM byte underneath it.
    let value = system.peek(0x1040);
    assert_eq!(value, 0x5A, "data-bus value of the preceding read");
    assert_eq!(system.cart.ram().unwrap()[0x40], 0x5A);
    assert_eq!(system.cart.take_illegal_read(), Some(0x1040));
    assert_eq!(system.cart.take_illegal_read(), None);
}

#[test]
fn playfield_pixel_appears_where_pf0_says() {
    let mut rom = vec![0u8; 4096];
    rom[0] = 0xA9;
    rom[2048] = 0x60;
    let mut system = system_for(&rom, None);

    // Program the playfield at the start of the frame.
    system.poke(0x000D, 0x10); // PF0: bit 4 -> playfield column 0
    system.poke(0x000E, 0x00); // PF1
    system.poke(0x000F, 0x00); // PF2
    system.poke(0x0008, 0x42); // COLUPF
    system.poke(0x0009, 0x00); // COLUBK
    system.poke(0x000A, 0x00); // CTRLPF

    // Let a full frame render.
    run_to(&mut system, 262, 0);

    // PF0's low playfield column covers the first four pixels of the line.
    let line = system.tia.current_frame_buffer();
    let y = 1 * 160;
    assert_eq!(line[y], 0x42);
    assert_eq!(line[y + 3], 0x42);
    assert_eq!(line[y + 4], 0x00);
    // Repeated (unreflected) playfield shows the same column at x = 80.
    assert_eq!(line[y + 80], 0x42);
    assert_eq!(line[y + 84], 0x00);
}

#[test]
fn hmove_shifts_player_on_next_scanline() {
    let mut rom = vec![0u8; 4096];
    rom[0] = 0xA9;
    rom[2048] = 0x60;
    let mut system = system_for(&rom, None);

    system.poke(0x0006, 0x66); // COLUP0
    system.poke(0x001B, 0xFF); // GRP0: solid 8 pixels

    // Position P0 around mid-screen during scanline 1.
    run_to(&mut system, 1, 68 + 80);
    system.poke(0x0010, 0); // RESP0
    let start = system.tia.object_positions()[0];

    // +1 in the motion register moves one pixel left on the next line.
    system.poke(0x0020, 0x10); // HMP0
    run_to(&mut system, 2, 0);
    system.poke(0x002A, 0); // HMOVE during HBLANK
    assert_eq!(system.tia.object_positions()[0], start - 1);

    // The player raster lands at the shifted position.
    run_to(&mut system, 4, 0);
    let buf = system.tia.current_frame_buffer();
    let row = 3 * 160;
    let x = (start - 1) as usize;
    assert_eq!(buf[row + x], 0x66);
    assert_eq!(buf[row + x + 7], 0x66);
    assert_eq!(buf[row + x - 1], 0x00);
    assert_eq!(buf[row + x + 8], 0x00);
}

#[test]
fn collision_latch_reports_and_clears() {
    let mut rom = vec![0u8; 4096];
    rom[0] = 0xA9;
    rom[2048] = 0x60;
    let mut system = system_for(&rom, None);

    system.poke(0x001B, 0xFF); // GRP0
    system.poke(0x001E, 0x02); // ENAM1
    system.poke(0x0005, 0x30); // NUSIZ1: 8-pixel missile

    // Park both objects at the same spot early in a scanline.
    run_to(&mut system, 1, 68 + 40);
    system.poke(0x0010, 0); // RESP0
    system.poke(0x0013, 0); // RESM1

    // After the overlap scanline the M1-P0 latch is set (CXM1P bit 7).
    run_to(&mut system, 3, 0);
    assert_eq!(system.peek(0x0001) & 0x80, 0x80);

    system.poke(0x002C, 0); // CXCLR
    assert_eq!(system.peek(0x0001) & 0x80, 0x00);
}

#[test]
fn tia_reads_only_drive_the_top_bits() {
    let mut rom = vec![0u8; 4096];
    rom[0] = 0xA9;
    rom[2048] = 0x60;
    let mut system = system_for(&rom, None);

    // Latch a known value on the data bus, then read a collision register
    // with no collisions: D5-D0 keep the latched value.
    system.poke(0x0080, 0x35);
    assert_eq!(system.peek(0x0001) & 0x3F, 0x35 & 0x3F);
}

#[test]
fn wsync_write_halts_until_the_scanline_boundary() {
    let mut rom = vec![0u8; 4096];
    rom[0] = 0xA9;
    rom[2048] = 0x60;
    let mut system = system_for(&rom, None);

    // An instruction fetch (read) precedes the store.
    system.bus.cycles = 10;
    system.peek(0x1000);
    system.poke(0x0002, 0); // WSYNC
    assert_eq!(system.bus.cycles % 76, 0);
    assert!(system.bus.cycles >= 76);
}
