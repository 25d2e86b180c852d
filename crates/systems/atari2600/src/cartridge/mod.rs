//! Cartridge layer: the 0x1000-0x1FFF window and everything bankswitching.
//!
//! Each scheme is a small state machine with its own hot-spot addresses.
//! Variants live behind the [`CartDevice`] trait (one vtable indirection;
//! every variant covers every operation), wrapped by [`Cartridge`] which
//! owns the cross-variant state: the bank-locked flag the debugger uses to
//! inspect without perturbing, the bank-changed latch, and the
//! illegal-read-from-write-port notification.
//!
//! Schemes whose hot-spots live *outside* the cartridge window (Tigervision
//! zero-page stores, FE stack monitoring, UA/0840/X07/SB low-address taps,
//! the CompuMate's SWCHA coupling) receive every bus access through
//! [`Cartridge::snoop`], which models the cartridge port's view of the
//! address and data lines.

mod cm;
mod detect;
mod dpc;
mod e0;
mod f0;
mod f4;
mod f6;
mod f8;
mod fa;
mod fe;
mod rom;
mod sb;
mod tiger;
mod ua;
mod x07;
mod zero840;

pub use detect::autodetect;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::settings::Settings;
use crate::system::{Access, BusState, Device, Direct, PageAccess, PageTable, Random};

#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("invalid cartridge size: {0} bytes")]
    InvalidSize(usize),
    #[error("invalid cartridge type '{0}'")]
    InvalidType(String),
}

/// A cartridge RAM region whose read and write ports sit at different
/// addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamArea {
    pub start: u16,
    pub size: u16,
    pub read_offset: u16,
    pub write_offset: u16,
}

/// Cross-variant cartridge state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CartFlags {
    /// When locked, bankswitches are ignored entirely; the debugger sets
    /// this while reading cartridge space.
    pub bank_locked: bool,
    /// Set by every bank change, cleared when queried.
    pub bank_changed: bool,
    /// Latched address of the most recent read that landed on a write port.
    pub last_illegal_read: Option<u16>,
}

impl CartFlags {
    /// Record (and log) a read that landed on a RAM write port.  The read
    /// still completes with data-bus semantics; this is a notification for
    /// the debugger, not an error.
    pub fn note_illegal_read(&mut self, addr: u16) {
        log::debug!("illegal read from write port at {addr:#06x}");
        self.last_illegal_read = Some(addr);
    }
}

/// The per-variant contract.  `pages` is threaded through every operation
/// that may switch banks, because switching means re-installing the page
/// table's direct-access entries.
pub(crate) trait CartDevice: std::fmt::Debug + Send {
    fn name(&self) -> &'static str;
    fn bank_count(&self) -> u16;
    fn current_bank(&self) -> u16;
    fn start_bank(&self) -> u16 {
        0
    }
    fn image(&self) -> &[u8];
    fn ram(&self) -> Option<&[u8]> {
        None
    }
    fn ram_mut(&mut self) -> Option<&mut [u8]> {
        None
    }
    fn ram_areas(&self) -> Vec<RamArea> {
        Vec::new()
    }

    fn reset(
        &mut self,
        ram_random: bool,
        rng: &mut Random,
        pages: &mut PageTable,
        flags: &mut CartFlags,
    );
    fn install(&mut self, pages: &mut PageTable, flags: &mut CartFlags);
    fn peek(
        &mut self,
        addr: u16,
        pages: &mut PageTable,
        bus: &mut BusState,
        flags: &mut CartFlags,
    ) -> u8;
    fn poke(
        &mut self,
        addr: u16,
        value: u8,
        pages: &mut PageTable,
        bus: &mut BusState,
        flags: &mut CartFlags,
    ) -> bool;
    fn snoop(
        &mut self,
        _addr: u16,
        _value: u8,
        _is_read: bool,
        _pages: &mut PageTable,
        _flags: &mut CartFlags,
    ) {
    }
    fn bank(&mut self, bank: u16, pages: &mut PageTable, flags: &mut CartFlags) -> bool;
    fn patch(&mut self, addr: u16, value: u8, flags: &mut CartFlags) -> bool;
    fn save_state(&self) -> Value;
    fn load_state(
        &mut self,
        v: &Value,
        pages: &mut PageTable,
        flags: &mut CartFlags,
    ) -> Result<(), serde_json::Error>;
    fn system_cycles_reset(&mut self, _cycles: u32) {}
}

/// Fill cartridge RAM with either zeros or a pseudo-random pattern,
/// depending on the `ram_random` setting.
pub(crate) fn init_ram(ram: &mut [u8], ram_random: bool, rng: &mut Random) {
    if ram_random {
        for byte in ram.iter_mut() {
            *byte = rng.next();
        }
    } else {
        ram.fill(0);
    }
}

/// On-cartridge RAM with split ports: writes at `[0x1000, 0x1000+n)`,
/// reads at `[0x1000+n, 0x1000+2n)`.  Covers the 128-byte superchip and the
/// 256-byte CBS RAM Plus layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PortRam {
    bytes: Vec<u8>,
}

impl PortRam {
    pub fn new(size: u16) -> Self {
        Self {
            bytes: vec![0; size as usize],
        }
    }

    pub fn size(&self) -> u16 {
        self.bytes.len() as u16
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// First address past the read port; ROM mapping starts here.
    pub fn rom_start(&self) -> u16 {
        0x1000 + 2 * self.size()
    }

    pub fn area(&self) -> RamArea {
        RamArea {
            start: 0x1000,
            size: self.size(),
            read_offset: self.size(),
            write_offset: 0,
        }
    }

    /// Install the two ports as direct pages.
    pub fn install(&self, pages: &mut PageTable) {
        let size = self.size();
        pages.install_range(0x1000, 0x1000 + size, |base| {
            PageAccess::direct_write(Direct::Ram(base & (size - 1)), Device::Cart)
        });
        pages.install_range(0x1000 + size, 0x1000 + 2 * size, |base| {
            PageAccess::direct_read(Direct::Ram(base & (size - 1)), Device::Cart)
        });
    }

    pub fn reset(&mut self, ram_random: bool, rng: &mut Random) {
        init_ram(&mut self.bytes, ram_random, rng);
    }

    /// Service a read that landed on the write port: the current data-bus
    /// value is returned and, unless the bank is locked, also written into
    /// the RAM cell underneath — exactly what the hardware does.
    pub fn read_from_write_port(
        &mut self,
        addr: u16,
        bus: &mut BusState,
        flags: &mut CartFlags,
    ) -> u8 {
        let value = bus.data_bus();
        if !flags.bank_locked {
            flags.note_illegal_read(addr);
            let mask = self.size() - 1;
            self.bytes[(addr & mask) as usize] = value;
        }
        value
    }
}

/// Install a 4 KiB bank over the window: the hot-spot page dispatches to the
/// device so switches are observed, everything below it reads directly from
/// the image.
pub(crate) fn install_rom_bank(
    pages: &mut PageTable,
    bank_offset: u32,
    rom_start: u16,
    hotspot_page_start: u16,
) {
    pages.install_range(rom_start, 0x2000, |base| {
        PageAccess::direct_read(
            Direct::Rom(bank_offset + (base & 0x0FFF) as u32),
            Device::Cart,
        )
    });
    // The hot-spot pages dispatch to the device so switches are observed;
    // they go in last because page alignment may widen them.
    pages.install_range(hotspot_page_start, 0x2000, |_| {
        PageAccess::device(Device::Cart, Access::Read)
    });
}

/// A cartridge: one variant plus the cross-variant flags.
#[derive(Debug)]
pub struct Cartridge {
    inner: Box<dyn CartDevice>,
    flags: CartFlags,
}

impl Cartridge {
    /// Build a cartridge from a ROM image.  With no explicit type the
    /// scheme is auto-detected from the bytes; multicart images are sliced
    /// by the persisted round-robin counter in `settings`.  Returns the
    /// cartridge together with a human-readable summary.
    pub fn create(
        image: &[u8],
        type_hint: Option<&str>,
        settings: &mut Settings,
    ) -> Result<(Self, String), CartridgeError> {
        let (tag, autodetected) = match type_hint {
            Some(t) if !t.eq_ignore_ascii_case("auto") => (t.to_string(), false),
            _ => (autodetect(image).to_string(), true),
        };

        let mut image = image;
        let mut tag = tag;
        let mut slice_id = String::new();

        if let Some(count) = multicart_count(&tag) {
            if !multicart_size_ok(&tag, image.len()) {
                return Err(CartridgeError::InvalidSize(image.len()));
            }
            let each = image.len() / count;
            let index = (settings.rom_load_count as usize) % count;
            image = &image[index * each..(index + 1) * each];
            // The next load moves on to the next game.
            settings.rom_load_count = ((index + 1) % count) as u32;
            slice_id = format!(" [G{}]", index + 1);
            tag = match image.len() {
                n if n <= 2048 => "2K",
                4096 => "4K",
                8192 => "F8",
                _ => "4K",
            }
            .to_string();
        }

        let inner: Box<dyn CartDevice> = match tag.as_str() {
            "2K" => Box::new(rom::Rom2K::new(image)?),
            "4K" => Box::new(rom::Rom4K::new(image)?),
            "4KSC" => Box::new(rom::Rom4KSC::new(image)?),
            "F8" => Box::new(f8::F8::new(image, false)?),
            "F8SC" => Box::new(f8::F8::new(image, true)?),
            "F6" => Box::new(f6::F6::new(image, false)?),
            "F6SC" => Box::new(f6::F6::new(image, true)?),
            "F4" => Box::new(f4::F4::new(image, false)?),
            "F4SC" => Box::new(f4::F4::new(image, true)?),
            "F0" | "MB" => Box::new(f0::F0::new(image)?),
            "FA" | "FASC" => Box::new(fa::Fa::new(image)?),
            "3E" => Box::new(tiger::Cart3E::new(image)?),
            "3F" => Box::new(tiger::Cart3F::new(image)?),
            "E0" => Box::new(e0::E0::new(image)?),
            "FE" => Box::new(fe::Fe::new(image)?),
            "UA" => Box::new(ua::Ua::new(image)?),
            "0840" => Box::new(zero840::Cart0840::new(image)?),
            "X07" => Box::new(x07::X07::new(image)?),
            "SB" => Box::new(sb::Sb::new(image)?),
            "CM" => Box::new(cm::Cm::new(image)?),
            "DPC" => Box::new(dpc::Dpc::new(image)?),
            other => {
                log::warn!("unsupported bankswitch scheme '{other}'");
                return Err(CartridgeError::InvalidType(other.to_string()));
            }
        };

        let about = format!(
            "{}{}{} ({})",
            tag,
            if autodetected { "*" } else { "" },
            slice_id,
            if image.len() < 1024 {
                format!("{}B", image.len())
            } else {
                format!("{}K", image.len() / 1024)
            }
        );
        log::info!("cartridge created: {about}");

        Ok((
            Self {
                inner,
                flags: CartFlags::default(),
            },
            about,
        ))
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub fn image(&self) -> &[u8] {
        self.inner.image()
    }

    pub fn ram(&self) -> Option<&[u8]> {
        self.inner.ram()
    }

    pub fn ram_areas(&self) -> Vec<RamArea> {
        self.inner.ram_areas()
    }

    pub fn current_bank(&self) -> u16 {
        self.inner.current_bank()
    }

    pub fn bank_count(&self) -> u16 {
        self.inner.bank_count()
    }

    pub fn start_bank(&self) -> u16 {
        self.inner.start_bank()
    }

    pub fn reset(&mut self, ram_random: bool, bus: &mut BusState, pages: &mut PageTable) {
        let mut flags = self.flags;
        self.inner.reset(ram_random, bus.rng(), pages, &mut flags);
        self.flags = flags;
    }

    pub fn install(&mut self, pages: &mut PageTable) {
        let mut flags = self.flags;
        self.inner.install(pages, &mut flags);
        self.flags = flags;
    }

    pub fn peek(&mut self, addr: u16, pages: &mut PageTable, bus: &mut BusState) -> u8 {
        let mut flags = self.flags;
        let value = self.inner.peek(addr, pages, bus, &mut flags);
        self.flags = flags;
        value
    }

    pub fn poke(&mut self, addr: u16, value: u8, pages: &mut PageTable, bus: &mut BusState) -> bool {
        let mut flags = self.flags;
        let changed = self.inner.poke(addr, value, pages, bus, &mut flags);
        self.flags = flags;
        changed
    }

    /// Deliver a bus access outside the cartridge's service path.
    pub fn snoop(&mut self, addr: u16, value: u8, is_read: bool, pages: &mut PageTable) {
        let mut flags = self.flags;
        self.inner.snoop(addr, value, is_read, pages, &mut flags);
        self.flags = flags;
    }

    /// Resolve a direct-read page.
    pub fn direct_peek(&self, target: Direct, offset: u16) -> u8 {
        match target {
            Direct::Rom(base) => self.inner.image()[base as usize + offset as usize],
            Direct::Ram(base) => self
                .inner
                .ram()
                .map(|ram| ram[base as usize + offset as usize])
                .unwrap_or(0),
        }
    }

    /// Resolve a direct-write page.
    pub fn direct_poke(&mut self, target: Direct, offset: u16, value: u8) {
        if let Direct::Ram(base) = target {
            if let Some(ram) = self.inner.ram_mut() {
                ram[base as usize + offset as usize] = value;
            }
        }
    }

    pub fn bank(&mut self, bank: u16, pages: &mut PageTable) -> bool {
        let mut flags = self.flags;
        let switched = self.inner.bank(bank, pages, &mut flags);
        self.flags = flags;
        switched
    }

    /// Whether the bank changed since the last call; reading clears the
    /// latch.
    pub fn bank_changed(&mut self) -> bool {
        let changed = self.flags.bank_changed;
        self.flags.bank_changed = false;
        changed
    }

    pub fn lock_bank(&mut self) {
        self.flags.bank_locked = true;
    }

    pub fn unlock_bank(&mut self) {
        self.flags.bank_locked = false;
    }

    pub fn bank_locked(&self) -> bool {
        self.flags.bank_locked
    }

    /// Address of the most recent read from a write port, if any; reading
    /// clears the notification.
    pub fn take_illegal_read(&mut self) -> Option<u16> {
        self.flags.last_illegal_read.take()
    }

    /// Patch a byte, bypassing read/write-port restrictions.
    pub fn patch(&mut self, addr: u16, value: u8) -> bool {
        let mut flags = self.flags;
        let patched = self.inner.patch(addr, value, &mut flags);
        self.flags = flags;
        patched
    }

    pub fn save_state(&self) -> Value {
        self.inner.save_state()
    }

    pub fn load_state(&mut self, v: &Value, pages: &mut PageTable) -> Result<(), serde_json::Error> {
        let mut flags = self.flags;
        let result = self.inner.load_state(v, pages, &mut flags);
        self.flags = flags;
        result
    }

    pub fn system_cycles_reset(&mut self, cycles: u32) {
        self.inner.system_cycles_reset(cycles);
    }
}

fn multicart_count(tag: &str) -> Option<usize> {
    match tag {
        "2IN1" => Some(2),
        "4IN1" => Some(4),
        "8IN1" => Some(8),
        "16IN1" => Some(16),
        "32IN1" => Some(32),
        "64IN1" => Some(64),
        "128IN1" => Some(128),
        _ => None,
    }
}

fn multicart_size_ok(tag: &str, size: usize) -> bool {
    let per_rom: &[usize] = match tag {
        "2IN1" => &[2048, 4096, 8192, 16384],
        "4IN1" | "8IN1" | "16IN1" => &[2048, 4096, 8192],
        _ => &[2048, 4096],
    };
    let count = match multicart_count(tag) {
        Some(c) => c,
        None => return false,
    };
    per_rom.iter().any(|&each| size == count * each)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 4K image whose halves differ, so it doesn't detect as a mirrored
    /// 2K ROM.
    fn plain_4k() -> Vec<u8> {
        let mut rom = vec![0u8; 4096];
        rom[0] = 0xA9;
        rom[2048] = 0x60;
        rom
    }

    #[test]
    fn create_rejects_unknown_type() {
        let rom = plain_4k();
        let err = Cartridge::create(&rom, Some("BOGUS"), &mut Settings::default()).unwrap_err();
        assert!(matches!(err, CartridgeError::InvalidType(t) if t == "BOGUS"));
    }

    #[test]
    fn create_rejects_detected_but_unsupported_scheme() {
        // 8448-byte images are Supercharger tapes.
        let rom = vec![0u8; 8448];
        let err = Cartridge::create(&rom, None, &mut Settings::default()).unwrap_err();
        assert!(matches!(err, CartridgeError::InvalidType(t) if t == "AR"));
    }

    #[test]
    fn create_reports_about_string() {
        let rom = plain_4k();
        let (cart, about) = Cartridge::create(&rom, None, &mut Settings::default()).unwrap();
        assert_eq!(cart.name(), "4K");
        assert_eq!(about, "4K* (4K)");
        let (_, about) = Cartridge::create(&rom, Some("4K"), &mut Settings::default()).unwrap();
        assert_eq!(about, "4K (4K)");
    }

    #[test]
    fn multicart_slices_round_robin() {
        // Two 4K games: first slice all 0x11, second all 0x22.
        let mut rom = vec![0x11u8; 4096];
        rom.extend(std::iter::repeat(0x22).take(4096));
        rom[2048] = 0x60; // keep each slice from looking like a mirrored 2K
        rom[4096 + 2048] = 0x60;
        let mut settings = Settings::default();

        let (cart, about) = Cartridge::create(&rom, Some("2IN1"), &mut settings).unwrap();
        assert_eq!(cart.image()[0], 0x11);
        assert!(about.contains("[G1]"));
        assert_eq!(settings.rom_load_count, 1);

        let (cart, about) = Cartridge::create(&rom, Some("2IN1"), &mut settings).unwrap();
        assert_eq!(cart.image()[0], 0x22);
        assert!(about.contains("[G2]"));
        // Wraps back to the first slice.
        assert_eq!(settings.rom_load_count, 0);
    }

    #[test]
    fn multicart_slice_reclassifies_by_size() {
        let rom = vec![0u8; 2 * 8192];
        let mut settings = Settings::default();
        let (cart, _) = Cartridge::create(&rom, Some("2IN1"), &mut settings).unwrap();
        assert_eq!(cart.name(), "F8");
    }

    #[test]
    fn multicart_wrong_size_is_rejected() {
        let rom = vec![0u8; 3000];
        let err = Cartridge::create(&rom, Some("4IN1"), &mut Settings::default()).unwrap_err();
        assert!(matches!(err, CartridgeError::InvalidSize(3000)));
    }

    #[test]
    fn bank_changed_latch_clears_on_read() {
        let rom = vec![0u8; 8192];
        let (mut cart, _) = Cartridge::create(&rom, None, &mut Settings::default()).unwrap();
        let mut pages = PageTable::new(6);
        cart.install(&mut pages);
        assert!(cart.bank_changed(), "install selects the startup bank");
        assert!(!cart.bank_changed());
        cart.bank(0, &mut pages);
        assert!(cart.bank_changed());
        assert!(!cart.bank_changed());
    }

    #[test]
    fn locked_cartridge_ignores_bank_requests() {
        let rom = vec![0u8; 8192];
        let (mut cart, _) = Cartridge::create(&rom, None, &mut Settings::default()).unwrap();
        let mut pages = PageTable::new(6);
        cart.install(&mut pages);
        let before = cart.current_bank();
        cart.lock_bank();
        assert!(!cart.bank(1 - before, &mut pages));
        assert_eq!(cart.current_bank(), before);
        cart.unlock_bank();
        assert!(cart.bank(1 - before, &mut pages));
        assert_eq!(cart.current_bank(), 1 - before);
    }
}
