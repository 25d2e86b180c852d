//! The 6507 memory bus: a page-indexed 13-bit address space.
//!
//! Mirrors of the TIA, RIOT and cartridge regions are handled by page-table
//! installation, never by address masking inside the devices themselves.
//! Each page binds to one responsible device; pages may additionally carry a
//! direct-access target (an offset into cartridge ROM or RAM) which is a pure
//! performance shortcut that bypasses device dispatch, and with it all side
//! effects.

use serde::{Deserialize, Serialize};

use crate::cartridge::Cartridge;
use crate::riot::Riot;
use crate::settings::Settings;
use crate::tia::Tia;

/// The 6507 sees 13 address lines.
pub const ADDRESS_MASK: u16 = 0x1FFF;
const ADDRESS_SPACE: u32 = 0x2000;

/// Default page size: 64 bytes.  Every hot-spot range in the cartridge
/// family is 64-byte aligned, so this divides them all.
pub const DEFAULT_PAGE_SHIFT: u16 = 6;

/// The closed set of devices a page can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Device {
    #[default]
    None,
    Tia,
    Riot,
    Cart,
}

/// Declared access direction for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Access {
    Read,
    Write,
    #[default]
    ReadWrite,
}

/// A direct-access target: a base offset into one of the cartridge's
/// buffers.  The page's low address bits are added to the base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direct {
    Rom(u32),
    Ram(u16),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PageAccess {
    pub direct_peek: Option<Direct>,
    pub direct_poke: Option<Direct>,
    pub device: Device,
    pub access: Access,
}

impl PageAccess {
    pub fn device(device: Device, access: Access) -> Self {
        Self {
            direct_peek: None,
            direct_poke: None,
            device,
            access,
        }
    }

    pub fn direct_read(target: Direct, device: Device) -> Self {
        Self {
            direct_peek: Some(target),
            direct_poke: None,
            device,
            access: Access::Read,
        }
    }

    pub fn direct_write(target: Direct, device: Device) -> Self {
        Self {
            direct_peek: None,
            direct_poke: Some(target),
            device,
            access: Access::Write,
        }
    }
}

/// Page table covering the 8 KiB address space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageTable {
    shift: u16,
    pages: Vec<PageAccess>,
}

impl PageTable {
    pub fn new(shift: u16) -> Self {
        assert!(shift >= 4 && shift <= 12, "unusable page size");
        Self {
            shift,
            pages: vec![PageAccess::default(); (ADDRESS_SPACE >> shift) as usize],
        }
    }

    pub fn page_shift(&self) -> u16 {
        self.shift
    }

    pub fn page_size(&self) -> u16 {
        1 << self.shift
    }

    /// Mask selecting the in-page offset bits of an address.
    pub fn offset_mask(&self) -> u16 {
        (1 << self.shift) - 1
    }

    pub fn get(&self, addr: u16) -> PageAccess {
        self.pages[((addr & ADDRESS_MASK) >> self.shift) as usize]
    }

    pub fn set(&mut self, addr: u16, access: PageAccess) {
        self.pages[((addr & ADDRESS_MASK) >> self.shift) as usize] = access;
    }

    /// Install `access` on every page whose base address matches `pattern`
    /// under `mask`.  This is how mirrored regions are claimed.
    pub fn install_matching(&mut self, mask: u16, pattern: u16, access: PageAccess) {
        let size = self.page_size() as u32;
        let mut base = 0u32;
        while base < ADDRESS_SPACE {
            if (base as u16 & mask) == pattern {
                self.set(base as u16, access);
            }
            base += size;
        }
    }

    /// Install pages over `[start, end)`, asking `make` for each page's
    /// access record (so direct targets can advance with the page base).
    pub fn install_range(&mut self, start: u16, end: u16, mut make: impl FnMut(u16) -> PageAccess) {
        let size = self.page_size();
        let mut base = start & !self.offset_mask();
        while base < end {
            let access = make(base);
            self.set(base, access);
            base += size;
        }
    }
}

/// Pseudo-random source for undriven bus bits and RAM fuzzing.
///
/// The generator is the classic `(x * 2416 + 374441) mod 1771875` LCG; it
/// only has to be cheap and deterministic under a fixed seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Random {
    value: u32,
}

impl Random {
    pub fn new(seed: u32) -> Self {
        Self { value: seed }
    }

    pub fn next(&mut self) -> u8 {
        self.value = (self.value.wrapping_mul(2416).wrapping_add(374441)) % 1771875;
        (self.value % 256) as u8
    }
}

/// Scalar bus state shared with devices during dispatch.
///
/// Devices receive `&mut BusState` so the TIA can consume cycles on WSYNC
/// and raise the stop request at VSYNC end without holding a reference back
/// to the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusState {
    /// CPU cycles elapsed since the last cycle reset.
    pub cycles: u32,
    data_bus: u8,
    last_access_read: bool,
    stop_requested: bool,
    rng: Random,
}

impl BusState {
    fn new(seed: u32) -> Self {
        Self {
            cycles: 0,
            data_bus: 0,
            last_access_read: false,
            stop_requested: false,
            rng: Random::new(seed),
        }
    }

    /// The last byte latched on the data bus.
    pub fn data_bus(&self) -> u8 {
        self.data_bus
    }

    /// The data bus with the bits under `mask` randomly pulled high,
    /// emulating undriven pins.
    pub fn data_bus_fuzzed(&mut self, mask: u8) -> u8 {
        self.data_bus | (self.rng.next() & mask)
    }

    pub fn set_data_bus(&mut self, value: u8) {
        self.data_bus = value;
    }

    /// Whether the access *preceding* the one being serviced was a read.
    /// Updated after dispatch, so a device servicing a write still sees the
    /// direction of the previous cycle (the 6507 WSYNC quirk depends on it).
    pub fn last_access_was_read(&self) -> bool {
        self.last_access_read
    }

    pub fn rng(&mut self) -> &mut Random {
        &mut self.rng
    }

    pub(crate) fn set_last_access_read(&mut self, read: bool) {
        self.last_access_read = read;
    }

    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn take_stop_request(&mut self) -> bool {
        let stop = self.stop_requested;
        self.stop_requested = false;
        stop
    }

    #[cfg(test)]
    pub(crate) fn for_tests(rng: Random) -> Self {
        Self {
            cycles: 0,
            data_bus: 0,
            last_access_read: false,
            stop_requested: false,
            rng,
        }
    }
}

/// The bus with its installed devices.
#[derive(Debug)]
pub struct System {
    pub tia: Tia,
    pub riot: Riot,
    pub cart: Cartridge,
    pub bus: BusState,
    pages: PageTable,
    settings: Settings,
}

impl System {
    pub fn new(cart: Cartridge, settings: Settings) -> Self {
        Self::with_page_shift(cart, settings, DEFAULT_PAGE_SHIFT)
    }

    pub fn with_page_shift(cart: Cartridge, settings: Settings, shift: u16) -> Self {
        let mut system = Self {
            tia: Tia::new(&settings),
            riot: Riot::new(),
            cart,
            bus: BusState::new(settings.random_seed),
            pages: PageTable::new(shift),
            settings,
        };
        system.install_all();
        system
    }

    /// (Re)populate the page table: TIA and RIOT claim their mirror
    /// patterns, then the cartridge overlays its window and any extra
    /// hot-spot pages.
    fn install_all(&mut self) {
        self.pages = PageTable::new(self.pages.page_shift());
        // TIA decode: A12 = 0, A7 = 0
        self.pages.install_matching(
            0x1080,
            0x0000,
            PageAccess::device(Device::Tia, Access::ReadWrite),
        );
        // RIOT RAM: A12 = 0, A9 = 0, A7 = 1
        self.pages.install_matching(
            0x1280,
            0x0080,
            PageAccess::device(Device::Riot, Access::ReadWrite),
        );
        // RIOT I/O and timer: A12 = 0, A9 = 1, A7 = 1
        self.pages.install_matching(
            0x1280,
            0x0280,
            PageAccess::device(Device::Riot, Access::ReadWrite),
        );
        self.cart.install(&mut self.pages);
    }

    /// Power-on reset of every installed device.
    pub fn reset(&mut self) {
        self.bus = BusState::new(self.settings.random_seed);
        self.tia.reset();
        self.riot.reset();
        let ram_random = self.settings.ram_random;
        self.cart
            .reset(ram_random, &mut self.bus, &mut self.pages);
        self.install_all();
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn pages(&self) -> &PageTable {
        &self.pages
    }

    /// Periodic cycle-counter rebase: every subscriber shifts its absolute
    /// bookkeeping down by the current count so 32-bit math never overflows.
    pub fn reset_cycles(&mut self) {
        let cycles = self.bus.cycles;
        self.tia.system_cycles_reset(cycles);
        self.riot.system_cycles_reset(cycles);
        self.cart.system_cycles_reset(cycles);
        self.bus.cycles = 0;
    }

    /// Bring the TIA's rendered state up to the current bus cycle.
    pub fn update_tia(&mut self) {
        self.tia.update_frame(self.bus.cycles as i32 * 3);
    }

    /// Begin a new frame: swap buffers, rebase cycle counters, re-anchor the
    /// TIA clock to the residual position within the current scanline.
    pub fn start_frame(&mut self) {
        let residual = ((self.bus.cycles as i64 * 3) - self.tia.clock_when_frame_started() as i64)
            .rem_euclid(228) as i32;
        self.reset_cycles();
        self.tia.start_frame(residual);
    }

    /// End-of-frame accounting (scanline count, over/underrun blanking,
    /// framerate auto-correction).  Frames that complete before their first
    /// visible scanline are restarted without counting: they ran code but
    /// were never shown.
    pub fn end_frame(&mut self) {
        if self.tia.end_frame(self.bus.cycles) {
            self.start_frame();
            self.tia.uncount_frame();
        }
    }

    /// Switch the cartridge bank directly (the debugger's path; honors the
    /// bank lock).
    pub fn cart_bank(&mut self, bank: u16) -> bool {
        self.cart.bank(bank, &mut self.pages)
    }

    /// Restore cartridge state; the page table is re-installed as a side
    /// effect of the restored bank selection.
    pub fn cart_load_state(
        &mut self,
        v: &serde_json::Value,
    ) -> Result<(), serde_json::Error> {
        self.cart.load_state(v, &mut self.pages)
    }
}

impl vcs_core::Bus for System {
    fn peek(&mut self, addr: u16) -> u8 {
        let addr = addr & ADDRESS_MASK;
        let page = self.pages.get(addr);
        let value = if let Some(target) = page.direct_peek {
            self.cart.direct_peek(target, addr & self.pages.offset_mask())
        } else {
            match page.device {
                Device::Tia => self.tia.peek(addr, &mut self.bus),
                Device::Riot => self.riot.peek(addr, &mut self.bus),
                Device::Cart => self.cart.peek(addr, &mut self.pages, &mut self.bus),
                Device::None => {
                    // Open bus: the last latched value drives the lines.
                    log::trace!("open-bus read at {addr:#06x}");
                    self.bus.data_bus()
                }
            }
        };
        self.bus.set_data_bus(value);
        self.bus.last_access_read = true;
        // Some cartridges watch the whole bus: FE monitors stack accesses,
        // CM the SWCHA port, the Tigervision family zero-page stores.
        self.cart.snoop(addr, value, true, &mut self.pages);
        value
    }

    fn poke(&mut self, addr: u16, value: u8) {
        let addr = addr & ADDRESS_MASK;
        let page = self.pages.get(addr);
        if let Some(target) = page.direct_poke {
            self.cart
                .direct_poke(target, addr & self.pages.offset_mask(), value);
        } else {
            match page.device {
                Device::Tia => self.tia.poke(addr, value, &mut self.bus),
                Device::Riot => self.riot.poke(addr, value, &mut self.bus),
                Device::Cart => {
                    self.cart.poke(addr, value, &mut self.pages, &mut self.bus);
                }
                Device::None => {
                    log::trace!("unmapped write at {addr:#06x} = {value:#04x}");
                }
            }
        }
        self.bus.set_data_bus(value);
        self.bus.last_access_read = false;
        self.cart.snoop(addr, value, false, &mut self.pages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcs_core::Bus;

    fn system_with_4k() -> System {
        let mut rom = vec![0u8; 4096];
        rom[0x0FFC] = 0x00;
        rom[0x0FFD] = 0xF0;
        let (cart, _) = Cartridge::create(&rom, None, &mut Settings::default()).unwrap();
        let mut sys = System::new(cart, Settings::default());
        sys.reset();
        sys
    }

    #[test]
    fn page_table_rejects_nothing_in_default_layout() {
        let sys = system_with_4k();
        // TIA page at 0x0000, RIOT RAM at 0x0080, RIOT I/O at 0x0280,
        // cartridge at 0x1000.
        assert_eq!(sys.pages().get(0x0000).device, Device::Tia);
        assert_eq!(sys.pages().get(0x0080).device, Device::Riot);
        assert_eq!(sys.pages().get(0x0280).device, Device::Riot);
        assert_eq!(sys.pages().get(0x1000).device, Device::Cart);
    }

    #[test]
    fn tia_mirrors_follow_decode_pattern() {
        let sys = system_with_4k();
        // A12 = 0, A7 = 0 selects the TIA wherever it appears.
        for addr in [0x0000u16, 0x0040, 0x0100, 0x0400, 0x0D00] {
            assert_eq!(sys.pages().get(addr).device, Device::Tia, "addr {addr:#06x}");
        }
        // RIOT RAM mirror with A9 = 0, A7 = 1: the stack page.
        assert_eq!(sys.pages().get(0x01C0).device, Device::Riot);
    }

    #[test]
    fn reset_vector_reads_through_cartridge_window() {
        let mut sys = system_with_4k();
        assert_eq!(sys.peek(0x1FFC), 0x00);
        assert_eq!(sys.peek(0x1FFD), 0xF0);
        // Mirrors of the window behave identically.
        assert_eq!(sys.peek(0x1FFC & ADDRESS_MASK), 0x00);
    }

    #[test]
    fn every_page_binds_exactly_one_device() {
        // The TIA, RIOT and cartridge decode patterns tile the whole 13-bit
        // space; nothing is left unmapped and nothing is claimed twice.
        let sys = system_with_4k();
        let size = sys.pages().page_size() as u32;
        let mut base = 0u32;
        while base < 0x2000 {
            let addr = base as u16;
            let expected = if addr & 0x1000 != 0 {
                Device::Cart
            } else if addr & 0x0080 == 0 {
                Device::Tia
            } else {
                Device::Riot
            };
            assert_eq!(sys.pages().get(addr).device, expected, "page {addr:#06x}");
            base += size;
        }
    }

    #[test]
    fn data_bus_latches_writes_too() {
        let mut sys = system_with_4k();
        sys.poke(0x0080, 0x5A);
        assert_eq!(sys.bus.data_bus(), 0x5A);
        assert!(!sys.bus.last_access_was_read());
        sys.peek(0x0080);
        assert!(sys.bus.last_access_was_read());
    }

    #[test]
    fn reset_cycles_rebases_subscribers() {
        let mut sys = system_with_4k();
        sys.bus.cycles = 1000;
        sys.update_tia();
        sys.reset_cycles();
        assert_eq!(sys.bus.cycles, 0);
        // A subsequent update at the rebased clock is a no-op rather than a
        // rewind (idempotence for t <= last update).
        sys.update_tia();
    }

    #[test]
    fn random_sequence_is_deterministic_for_a_seed() {
        let mut a = Random::new(1234);
        let mut b = Random::new(1234);
        for _ in 0..64 {
            assert_eq!(a.next(), b.next());
        }
    }
}
