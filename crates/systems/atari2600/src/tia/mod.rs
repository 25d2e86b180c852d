//! TIA (Television Interface Adapter): the video half of the console.
//!
//! The TIA is a lazily clocked signal generator.  Nothing advances per
//! cycle; instead every register access first brings the rendered frame up
//! to the current color clock (`update_frame`), then applies its side
//! effects.  All clock bookkeeping is kept in color clocks relative to the
//! start of the current frame, with the frame-start anchor offset negative
//! so drawing stays anchored to scanline zero even when a game strobes
//! VSYNC mid-scanline.
//!
//! Audio registers are shadowed here and forwarded to the [`TiaSound`]
//! back-end together with the CPU cycle of the write; all DSP is external.

pub mod sound;
pub mod tables;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::settings::Settings;
use crate::system::BusState;
use sound::{NullSound, TiaSound};
use tables::{
    tables, HBLANK, BL_BIT, DISABLED_MASK, M0_BIT, M1_BIT, P0_BIT, P1_BIT, PF_BIT, PRIORITY_BIT,
    SCORE_BIT,
};

// Write registers.
const VSYNC: u16 = 0x00;
const VBLANK: u16 = 0x01;
const WSYNC: u16 = 0x02;
const RSYNC: u16 = 0x03;
const NUSIZ0: u16 = 0x04;
const NUSIZ1: u16 = 0x05;
const COLUP0: u16 = 0x06;
const COLUP1: u16 = 0x07;
const COLUPF: u16 = 0x08;
const COLUBK: u16 = 0x09;
const CTRLPF: u16 = 0x0A;
const REFP0: u16 = 0x0B;
const REFP1: u16 = 0x0C;
const PF0: u16 = 0x0D;
const PF1: u16 = 0x0E;
const PF2: u16 = 0x0F;
const RESP0: u16 = 0x10;
const RESP1: u16 = 0x11;
const RESM0: u16 = 0x12;
const RESM1: u16 = 0x13;
const RESBL: u16 = 0x14;
const AUDC0: u16 = 0x15;
const AUDC1: u16 = 0x16;
const AUDF0: u16 = 0x17;
const AUDF1: u16 = 0x18;
const AUDV0: u16 = 0x19;
const AUDV1: u16 = 0x1A;
const GRP0: u16 = 0x1B;
const GRP1: u16 = 0x1C;
const ENAM0: u16 = 0x1D;
const ENAM1: u16 = 0x1E;
const ENABL: u16 = 0x1F;
const HMP0: u16 = 0x20;
const HMP1: u16 = 0x21;
const HMM0: u16 = 0x22;
const HMM1: u16 = 0x23;
const HMBL: u16 = 0x24;
const VDELP0: u16 = 0x25;
const VDELP1: u16 = 0x26;
const VDELBL: u16 = 0x27;
const RESMP0: u16 = 0x28;
const RESMP1: u16 = 0x29;
const HMOVE: u16 = 0x2A;
const HMCLR: u16 = 0x2B;
const CXCLR: u16 = 0x2C;

// Read registers (four address lines on reads).
const CXM0P: u16 = 0x0;
const CXM1P: u16 = 0x1;
const CXP0FB: u16 = 0x2;
const CXP1FB: u16 = 0x3;
const CXM0FB: u16 = 0x4;
const CXM1FB: u16 = 0x5;
const CXBLPF: u16 = 0x6;
const CXPPMM: u16 = 0x7;
const INPT0: u16 = 0x8;
const INPT1: u16 = 0x9;
const INPT2: u16 = 0xA;
const INPT3: u16 = 0xB;
const INPT4: u16 = 0xC;
const INPT5: u16 = 0xD;

// Indices into the color register file.
const P0_COLOR: usize = 0;
const P1_COLOR: usize = 1;
const PF_COLOR: usize = 2;
const BK_COLOR: usize = 3;
const M0_COLOR: usize = 4;
const M1_COLOR: usize = 5;
const BL_COLOR: usize = 6;
const HBLANK_COLOR: usize = 7;

/// Buffer geometry: one byte per visible color clock, hard frame ceiling of
/// 320 scanlines.
pub const FRAME_WIDTH: usize = 160;
pub const FRAME_CEILING: usize = 320;
const BUFFER_SIZE: usize = FRAME_WIDTH * FRAME_CEILING;

/// A paddle wired straight to ground charges instantly.
pub const MIN_RESISTANCE: u32 = 0;
/// An open circuit never charges.
pub const MAX_RESISTANCE: u32 = u32::MAX;

/// Controller state pushed in by the host input layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputState {
    /// INPT0-INPT3 paddle resistances in ohms.
    pub paddle_resistance: [u32; 4],
    /// INPT4/INPT5 fire buttons, true = pressed.
    pub fire: [bool; 2],
}

impl Default for InputState {
    fn default() -> Self {
        Self {
            paddle_resistance: [MAX_RESISTANCE; 4],
            fire: [false; 2],
        }
    }
}

pub struct Tia {
    // Configuration snapshot.
    tia_driven: bool,
    color_loss_allowed: bool,
    auto_frame: bool,
    framerate: f64,

    // Frame geometry.
    frame_y_start: u32,
    frame_height: u32,
    maximum_scanlines: u32,
    start_scanline: u32,
    color_loss_enabled: bool,
    partial_frame: bool,
    frame_counter: u32,
    pal_frame_counter: u32,
    scanline_count_last_frame: u32,

    // Clock anchors, color clocks relative to frame start.
    clock_when_frame_started: i32,
    clock_start_display: i32,
    clock_stop_display: i32,
    clock_at_last_update: i32,
    clocks_to_end_of_scanline: i32,
    stop_display_offset: i32,
    vsync_finish_clock: Option<i32>,

    // Frame buffers (palette indices) and the write cursor.
    current_buffer: Vec<u8>,
    previous_buffer: Vec<u8>,
    frame_pointer: usize,
    frame_pointer_clocks: u32,
    frame_pointer_offset: usize,

    // Object enable tracking plus the debugger's enable masks.
    enabled_objects: u8,
    object_enable_mask: u8,
    bits_enabled: bool,
    collisions_enabled: bool,
    allow_hmove_blanks: bool,

    // Register shadows.
    vsync: u8,
    vblank: u8,
    nusiz0: u8,
    nusiz1: u8,
    colors: [u8; 8],
    fixed_colors: [u8; 8],
    use_fixed_colors: bool,
    priority_encoder: [[u8; 256]; 2],
    ctrlpf: u8,
    playfield_priority_and_score: u8,
    pf_mask_reflect: bool,
    refp0: bool,
    refp1: bool,
    pf: u32,
    grp0: u8,
    grp1: u8,
    dgrp0: u8,
    dgrp1: u8,
    enabl: bool,
    denabl: bool,
    enam0: bool,
    enam1: bool,
    hmp0: u8,
    hmp1: u8,
    hmm0: u8,
    hmm1: u8,
    hmbl: u8,
    vdelp0: bool,
    vdelp1: bool,
    vdelbl: bool,
    resmp0: bool,
    resmp1: bool,
    collision: u16,
    collision_enabled_mask: u32,
    current_grp0: u8,
    current_grp1: u8,

    // Input ports.
    dump_enabled: bool,
    dump_disabled_cycle: i32,
    inpt4: u8,
    inpt5: u8,
    input: InputState,

    // Object positions and HMOVE machinery.
    pos_p0: i16,
    pos_p1: i16,
    pos_m0: i16,
    pos_m1: i16,
    pos_bl: i16,
    motion_clock_p0: i32,
    motion_clock_p1: i32,
    motion_clock_m0: i32,
    motion_clock_m1: i32,
    motion_clock_bl: i32,
    start_p0: i32,
    start_p1: i32,
    start_m0: i32,
    start_m1: i32,
    suppress_p0: u8,
    suppress_p1: u8,
    hmp0_mmr: bool,
    hmp1_mmr: bool,
    hmm0_mmr: bool,
    hmm1_mmr: bool,
    hmbl_mmr: bool,
    current_hmove_pos: Option<i32>,
    previous_hmove_pos: Option<i32>,
    hmove_blank_enabled: bool,

    // Audio register shadows plus the external back-end.
    audc: [u8; 2],
    audf: [u8; 2],
    audv: [u8; 2],
    sound: Box<dyn TiaSound>,
}

impl std::fmt::Debug for Tia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tia")
            .field("frame_counter", &self.frame_counter)
            .field("scanline_count_last_frame", &self.scanline_count_last_frame)
            .field("partial_frame", &self.partial_frame)
            .field("clock_at_last_update", &self.clock_at_last_update)
            .finish_non_exhaustive()
    }
}

fn clamp_pos(pos: i16) -> i16 {
    pos.rem_euclid(160)
}

/// Shared path for the five HMxx registers (HMCLR is five zero writes
/// through here).  Mid-HMOVE rewrites either re-proportion the shift or run
/// the full 15 pixels and set the more-motion latch; 0x70 and 0x80 coincide
/// with every internal counter state and can never trigger the latch.
#[allow(clippy::too_many_arguments)]
fn write_motion_register(
    reg: &mut u8,
    pos: &mut i16,
    motion_clock: &mut i32,
    mmr: &mut bool,
    current_hmove_pos: Option<i32>,
    value: u8,
    hpos: i32,
) {
    let value = value & 0xF0;
    if *reg == value {
        return;
    }
    if let Some(hmove_pos) = current_hmove_pos {
        if hpos < (hmove_pos + 6 + *motion_clock * 4).min(7) {
            let new_motion = ((value ^ 0x80) >> 4) as i32;
            if new_motion > *motion_clock || hpos <= (hmove_pos + 6 + new_motion * 4).min(7) {
                *pos -= (new_motion - *motion_clock) as i16;
                *motion_clock = new_motion;
            } else {
                *pos -= (15 - *motion_clock) as i16;
                *motion_clock = 15;
                if value != 0x70 && value != 0x80 {
                    *mmr = true;
                }
            }
            *pos = clamp_pos(*pos);
        }
    }
    *reg = value;
}

/// Extra clocks for a RESPx/RESMx/RESBL landing while this scanline's HMOVE
/// is still shifting the object.
fn apply_active_hmove(hmove_pos: i32, hpos: i32, pos: &mut i16, motion_clock: i32) {
    if hpos < (hmove_pos + 6 + 16 * 4).min(7) {
        let decrements_passed = (hpos - (hmove_pos + 4)) >> 2;
        *pos += 8;
        if motion_clock - decrements_passed > 0 {
            *pos -= (motion_clock - decrements_passed) as i16;
        }
    }
    *pos = clamp_pos(*pos);
}

/// Fixup for a reset while the *previous* scanline's HMOVE is still
/// propagating into this one.
fn apply_previous_hmove(previous_pos: Option<i32>, hpos: i32, pos: &mut i16, motion_reg: u8) {
    if let Some(prev) = previous_pos {
        let motclk = ((motion_reg ^ 0x80) >> 4) as i32;
        if hpos <= prev - 228 + 5 + motclk * 4 {
            let motclk_passed = (hpos - (prev - 228 + 6)) >> 2;
            *pos -= (motclk - motclk_passed) as i16;
        }
    }
    *pos = clamp_pos(*pos);
}

impl Tia {
    pub fn new(settings: &Settings) -> Self {
        Self::with_sound(settings, Box::new(NullSound))
    }

    pub fn with_sound(settings: &Settings, sound: Box<dyn TiaSound>) -> Self {
        let mut tia = Self {
            tia_driven: settings.tia_driven,
            color_loss_allowed: settings.color_loss,
            auto_frame: settings.framerate == 0,
            framerate: if settings.framerate > 0 {
                settings.framerate as f64
            } else {
                60.0
            },
            frame_y_start: 34,
            frame_height: 210,
            maximum_scanlines: 262,
            start_scanline: 0,
            color_loss_enabled: false,
            partial_frame: false,
            frame_counter: 0,
            pal_frame_counter: 0,
            scanline_count_last_frame: 0,
            clock_when_frame_started: 0,
            clock_start_display: 0,
            clock_stop_display: 0,
            clock_at_last_update: 0,
            clocks_to_end_of_scanline: 228,
            stop_display_offset: 228 * 262,
            vsync_finish_clock: None,
            current_buffer: vec![0; BUFFER_SIZE],
            previous_buffer: vec![0; BUFFER_SIZE],
            frame_pointer: 0,
            frame_pointer_clocks: 0,
            frame_pointer_offset: 0,
            enabled_objects: 0,
            object_enable_mask: 0xFF,
            bits_enabled: true,
            collisions_enabled: true,
            allow_hmove_blanks: true,
            vsync: 0,
            vblank: 0,
            nusiz0: 0,
            nusiz1: 0,
            colors: [0; 8],
            fixed_colors: [0; 8],
            use_fixed_colors: false,
            priority_encoder: [[0; 256]; 2],
            ctrlpf: 0,
            playfield_priority_and_score: 0,
            pf_mask_reflect: false,
            refp0: false,
            refp1: false,
            pf: 0,
            grp0: 0,
            grp1: 0,
            dgrp0: 0,
            dgrp1: 0,
            enabl: false,
            denabl: false,
            enam0: false,
            enam1: false,
            hmp0: 0,
            hmp1: 0,
            hmm0: 0,
            hmm1: 0,
            hmbl: 0,
            vdelp0: false,
            vdelp1: false,
            vdelbl: false,
            resmp0: false,
            resmp1: false,
            collision: 0,
            collision_enabled_mask: 0xFFFF_FFFF,
            current_grp0: 0,
            current_grp1: 0,
            dump_enabled: false,
            dump_disabled_cycle: 0,
            inpt4: 0x80,
            inpt5: 0x80,
            input: InputState::default(),
            pos_p0: 0,
            pos_p1: 0,
            pos_m0: 0,
            pos_m1: 0,
            pos_bl: 0,
            motion_clock_p0: 0,
            motion_clock_p1: 0,
            motion_clock_m0: 0,
            motion_clock_m1: 0,
            motion_clock_bl: 0,
            start_p0: 0,
            start_p1: 0,
            start_m0: 0,
            start_m1: 0,
            suppress_p0: 0,
            suppress_p1: 0,
            hmp0_mmr: false,
            hmp1_mmr: false,
            hmm0_mmr: false,
            hmm1_mmr: false,
            hmbl_mmr: false,
            current_hmove_pos: None,
            previous_hmove_pos: None,
            hmove_blank_enabled: false,
            audc: [0; 2],
            audf: [0; 2],
            audv: [0; 2],
            sound,
        };
        tia.reset();
        tia
    }

    /// Power-on defaults for every register and latch.
    pub fn reset(&mut self) {
        self.sound.reset();

        self.enabled_objects = 0;
        self.object_enable_mask = 0xFF;
        self.allow_hmove_blanks = true;

        self.vsync = 0;
        self.vblank = 0;
        self.nusiz0 = 0;
        self.nusiz1 = 0;
        self.colors = [0; 8];
        self.playfield_priority_and_score = 0;
        self.ctrlpf = 0;
        self.pf_mask_reflect = false;
        self.refp0 = false;
        self.refp1 = false;
        self.pf = 0;
        self.grp0 = 0;
        self.grp1 = 0;
        self.dgrp0 = 0;
        self.dgrp1 = 0;
        self.enam0 = false;
        self.enam1 = false;
        self.enabl = false;
        self.denabl = false;
        self.hmp0 = 0;
        self.hmp1 = 0;
        self.hmm0 = 0;
        self.hmm1 = 0;
        self.hmbl = 0;
        self.vdelp0 = false;
        self.vdelp1 = false;
        self.vdelbl = false;
        self.resmp0 = false;
        self.resmp1 = false;
        self.collision = 0;
        self.collision_enabled_mask = 0xFFFF_FFFF;
        self.pos_p0 = 0;
        self.pos_p1 = 0;
        self.pos_m0 = 0;
        self.pos_m1 = 0;
        self.pos_bl = 0;

        self.current_grp0 = 0;
        self.current_grp1 = 0;

        self.motion_clock_p0 = 0;
        self.motion_clock_p1 = 0;
        self.motion_clock_m0 = 0;
        self.motion_clock_m1 = 0;
        self.motion_clock_bl = 0;

        self.start_p0 = 0;
        self.start_p1 = 0;
        self.start_m0 = 0;
        self.start_m1 = 0;

        self.suppress_p0 = 0;
        self.suppress_p1 = 0;

        self.hmp0_mmr = false;
        self.hmp1_mmr = false;
        self.hmm0_mmr = false;
        self.hmm1_mmr = false;
        self.hmbl_mmr = false;

        self.current_hmove_pos = None;
        self.previous_hmove_pos = None;
        self.hmove_blank_enabled = false;

        self.enable_bits(true);

        self.dump_enabled = false;
        self.dump_disabled_cycle = 0;
        self.inpt4 = 0x80;
        self.inpt5 = 0x80;

        self.audc = [0; 2];
        self.audf = [0; 2];
        self.audv = [0; 2];

        self.frame_counter = 0;
        self.pal_frame_counter = 0;
        self.scanline_count_last_frame = 0;
        self.partial_frame = false;

        self.toggle_fixed_colors(0);
        self.frame_reset(0);
    }

    /// Establish frame timing; run at power-on and whenever the display
    /// region (and hence framerate) changes.
    pub fn frame_reset(&mut self, cycles: u32) {
        self.current_buffer.fill(0);
        self.previous_buffer.fill(0);
        self.frame_pointer = 0;
        self.frame_pointer_clocks = 0;
        self.frame_pointer_offset = FRAME_WIDTH * self.frame_y_start as usize;

        if self.framerate > 55.0 {
            // NTSC
            self.fixed_colors = [0x30, 0x16, 0x76, 0x0A, 0x38, 0x12, 0x7E, 0x0E];
            self.color_loss_enabled = false;
            self.maximum_scanlines = 290;
        } else {
            // PAL
            self.fixed_colors = [0x62, 0x26, 0xD8, 0x1C, 0x68, 0x2E, 0xDE, 0x0E];
            self.color_loss_enabled = self.color_loss_allowed;
            self.maximum_scanlines = 342;
        }

        let mut scanlines = self.frame_y_start + self.frame_height;
        scanlines = scanlines.max(if self.maximum_scanlines == 290 { 262 } else { 312 });
        self.stop_display_offset = 228 * scanlines.min(320) as i32;

        let clock = cycles as i32 * 3;
        self.clock_when_frame_started = clock;
        self.clock_start_display = clock;
        self.clock_stop_display = clock + self.stop_display_offset;
        self.clock_at_last_update = clock;
        self.clocks_to_end_of_scanline = 228;
        self.vsync_finish_clock = None;
    }

    /// Cycle-counter rebase: shift every absolute anchor down.
    pub fn system_cycles_reset(&mut self, cycles: u32) {
        self.sound.adjust_cycle_counter(-(cycles as i64));
        self.dump_disabled_cycle -= cycles as i32;

        let clocks = cycles as i32 * 3;
        self.clock_when_frame_started -= clocks;
        self.clock_start_display -= clocks;
        self.clock_stop_display -= clocks;
        self.clock_at_last_update -= clocks;
        if let Some(finish) = self.vsync_finish_clock.as_mut() {
            *finish -= clocks;
        }
    }

    /// Swap buffers and re-anchor the clock for a new frame.  `residual` is
    /// the color-clock position within the scanline carried over from the
    /// previous frame: object positioning during VSYNC must survive, because
    /// the TIA's horizontal counters are not reset by it.
    pub fn start_frame(&mut self, residual: i32) {
        std::mem::swap(&mut self.current_buffer, &mut self.previous_buffer);

        self.clock_when_frame_started = -residual;
        self.clock_start_display = self.clock_when_frame_started;
        self.clock_stop_display = self.clock_when_frame_started + self.stop_display_offset;
        self.clock_at_last_update = self.clock_start_display;
        self.clocks_to_end_of_scanline = 228;

        self.frame_pointer = 0;
        self.frame_pointer_clocks = 0;

        if self.color_loss_enabled {
            for idx in [
                P0_COLOR, P1_COLOR, PF_COLOR, BK_COLOR, M0_COLOR, M1_COLOR, BL_COLOR,
            ] {
                if self.scanline_count_last_frame & 1 != 0 {
                    self.colors[idx] |= 0x01;
                } else {
                    self.colors[idx] &= 0xFE;
                }
            }
        }
        self.start_scanline = 0;

        self.frame_counter += 1;
        if self.scanline_count_last_frame >= 287 {
            self.pal_frame_counter += 1;
        }
    }

    /// End-of-frame accounting.  Returns true when the frame finished before
    /// its first visible scanline; the caller restarts the frame and calls
    /// [`Tia::uncount_frame`] so such invisible frames don't disturb the
    /// frame counter.
    #[must_use]
    pub fn end_frame(&mut self, cycles: u32) -> bool {
        let current_lines = self.scanlines(cycles);
        if current_lines <= self.start_scanline {
            return true;
        }

        let previous_count = self.scanline_count_last_frame;
        self.scanline_count_last_frame = current_lines;

        if self.scanline_count_last_frame > self.maximum_scanlines + 1 {
            // Frame overrun: blank the whole viewable area.  The two buffers
            // get distinct constants so dirty-rectangle tracking notices.
            log::warn!(
                "frame overran {} scanlines (maximum {})",
                self.scanline_count_last_frame,
                self.maximum_scanlines
            );
            self.scanline_count_last_frame = self.maximum_scanlines;
            if previous_count < self.maximum_scanlines {
                self.current_buffer.fill(0);
                self.previous_buffer.fill(1);
            }
        } else if self.scanline_count_last_frame < previous_count
            && self.scanline_count_last_frame < 320
            && previous_count < 320
        {
            // Underrun: blank the scanlines that weren't rendered this time.
            let offset = self.scanline_count_last_frame as usize * FRAME_WIDTH;
            let stride = (previous_count - self.scanline_count_last_frame) as usize * FRAME_WIDTH;
            self.current_buffer[offset..offset + stride].fill(0);
            self.previous_buffer[offset..offset + stride].fill(1);
        }

        if self.auto_frame {
            self.framerate = if self.scanline_count_last_frame > 285 {
                15600.0
            } else {
                15720.0
            } / self.scanline_count_last_frame as f64;

            // Track the largest frame seen, up to the buffer ceiling.
            let offset = 228 * self.scanline_count_last_frame as i32;
            if offset > self.stop_display_offset && offset < 228 * FRAME_CEILING as i32 {
                self.stop_display_offset = offset;
            }
        }
        false
    }

    /// Forget the frame that [`Tia::end_frame`] reported as invisible.
    pub fn uncount_frame(&mut self) {
        self.frame_counter -= 1;
    }

    pub fn scanlines(&self, cycles: u32) -> u32 {
        ((cycles as i64 * 3 - self.clock_when_frame_started as i64) / 228) as u32
    }

    pub fn partial_frame(&self) -> bool {
        self.partial_frame
    }

    pub fn set_partial_frame(&mut self, partial: bool) {
        self.partial_frame = partial;
    }

    pub fn clock_when_frame_started(&self) -> i32 {
        self.clock_when_frame_started
    }

    pub fn framerate(&self) -> f64 {
        self.framerate
    }

    pub fn frame_counter(&self) -> u32 {
        self.frame_counter
    }

    pub fn pal_frame_counter(&self) -> u32 {
        self.pal_frame_counter
    }

    pub fn scanline_count_last_frame(&self) -> u32 {
        self.scanline_count_last_frame
    }

    pub fn maximum_scanlines(&self) -> u32 {
        self.maximum_scanlines
    }

    pub fn width(&self) -> u32 {
        FRAME_WIDTH as u32
    }

    pub fn height(&self) -> u32 {
        self.frame_height
    }

    pub fn frame_y_start(&self) -> u32 {
        self.frame_y_start
    }

    /// The buffer being drawn this frame.
    pub fn current_frame_buffer(&self) -> &[u8] {
        &self.current_buffer
    }

    /// The completed buffer from the previous frame; the display thread
    /// snapshots this after the frame boundary.
    pub fn previous_frame_buffer(&self) -> &[u8] {
        &self.previous_buffer
    }

    /// Beam position within the viewable area of a partial frame.
    pub fn scanline_pos(&self) -> Option<(u16, u16)> {
        if self.partial_frame && self.frame_pointer_clocks as usize >= self.frame_pointer_offset {
            let clocks = self.frame_pointer_clocks as usize - self.frame_pointer_offset;
            Some(((clocks % FRAME_WIDTH) as u16, (clocks / FRAME_WIDTH) as u16))
        } else {
            None
        }
    }

    pub fn input_mut(&mut self) -> &mut InputState {
        &mut self.input
    }

    pub fn collision_latch(&self) -> u16 {
        self.collision
    }

    /// Horizontal positions of P0, P1, M0, M1 and BL, for inspection.
    pub fn object_positions(&self) -> [i16; 5] {
        [
            self.pos_p0,
            self.pos_p1,
            self.pos_m0,
            self.pos_m1,
            self.pos_bl,
        ]
    }

    // Debugger surface: selectively disable objects/collisions and swap in
    // fixed per-object colors.

    pub fn enable_bits(&mut self, on: bool) {
        for bit in [P0_BIT, P1_BIT, M0_BIT, M1_BIT, BL_BIT, PF_BIT] {
            self.toggle_bit(bit, on as u8);
        }
    }

    pub fn toggle_bit(&mut self, bit: u8, mode: u8) -> bool {
        let on = match mode {
            0 => false,
            1 => true,
            _ => self.object_enable_mask & bit == 0,
        };
        if on {
            self.object_enable_mask |= bit;
        } else {
            self.object_enable_mask &= !bit;
        }
        on
    }

    pub fn toggle_bits(&mut self) -> bool {
        self.bits_enabled = !self.bits_enabled;
        let enabled = self.bits_enabled;
        self.enable_bits(enabled);
        enabled
    }

    pub fn enable_collisions(&mut self, on: bool) {
        for bit in [P0_BIT, P1_BIT, M0_BIT, M1_BIT, BL_BIT, PF_BIT] {
            self.toggle_collision(bit, on as u8);
        }
    }

    pub fn toggle_collision(&mut self, bit: u8, mode: u8) -> bool {
        let mut enabled = (self.collision_enabled_mask >> 16) as u16;
        let on = match mode {
            0 => false,
            1 => true,
            _ => enabled & bit as u16 == 0,
        };
        if on {
            enabled |= bit as u16;
        } else {
            enabled &= !(bit as u16);
        }

        use tables::*;
        let mut mask = 0xFFFFu16;
        if enabled & P0_BIT as u16 == 0 {
            mask &= !(CX_M0P0 | CX_M1P0 | CX_P0PF | CX_P0BL | CX_P0P1);
        }
        if enabled & P1_BIT as u16 == 0 {
            mask &= !(CX_M0P1 | CX_M1P1 | CX_P1PF | CX_P1BL | CX_P0P1);
        }
        if enabled & M0_BIT as u16 == 0 {
            mask &= !(CX_M0P0 | CX_M0P1 | CX_M0PF | CX_M0BL | CX_M0M1);
        }
        if enabled & M1_BIT as u16 == 0 {
            mask &= !(CX_M1P0 | CX_M1P1 | CX_M1PF | CX_M1BL | CX_M0M1);
        }
        if enabled & BL_BIT as u16 == 0 {
            mask &= !(CX_P0BL | CX_P1BL | CX_M0BL | CX_M1BL | CX_BLPF);
        }
        if enabled & PF_BIT as u16 == 0 {
            mask &= !(CX_P0PF | CX_P1PF | CX_M0PF | CX_M1PF | CX_BLPF);
        }

        self.collision_enabled_mask = ((enabled as u32) << 16) | mask as u32;
        on
    }

    pub fn toggle_collisions(&mut self) -> bool {
        self.collisions_enabled = !self.collisions_enabled;
        let enabled = self.collisions_enabled;
        self.enable_collisions(enabled);
        enabled
    }

    pub fn toggle_hmove_blanks(&mut self) -> bool {
        self.allow_hmove_blanks = !self.allow_hmove_blanks;
        self.allow_hmove_blanks
    }

    /// Swap the per-object colors for fixed debug colors and rebuild the
    /// priority encoder.  Score mode reads differently under fixed colors,
    /// which is why the encoder is rebuilt here.
    pub fn toggle_fixed_colors(&mut self, mode: u8) -> bool {
        let on = match mode {
            0 => false,
            1 => true,
            _ => !self.use_fixed_colors,
        };
        self.use_fixed_colors = on;

        for half in 0..2usize {
            for enabled in 0..256usize {
                let e = enabled as u8;
                let color = if e & PRIORITY_BIT != 0 {
                    // PF/BL over players over background.
                    let mut color = BK_COLOR;
                    if e & M1_BIT != 0 {
                        color = M1_COLOR;
                    }
                    if e & P1_BIT != 0 {
                        color = P1_COLOR;
                    }
                    if e & M0_BIT != 0 {
                        color = M0_COLOR;
                    }
                    if e & P0_BIT != 0 {
                        color = P0_COLOR;
                    }
                    if e & BL_BIT != 0 {
                        color = BL_COLOR;
                    }
                    if e & PF_BIT != 0 {
                        color = PF_COLOR;
                    }
                    color
                } else {
                    let mut color = BK_COLOR;
                    if e & BL_BIT != 0 {
                        color = BL_COLOR;
                    }
                    if e & PF_BIT != 0 {
                        color = if !on && e & SCORE_BIT != 0 {
                            if half == 0 {
                                P0_COLOR
                            } else {
                                P1_COLOR
                            }
                        } else {
                            PF_COLOR
                        };
                    }
                    if e & M1_BIT != 0 {
                        color = M1_COLOR;
                    }
                    if e & P1_BIT != 0 {
                        color = P1_COLOR;
                    }
                    if e & M0_BIT != 0 {
                        color = M0_COLOR;
                    }
                    if e & P0_BIT != 0 {
                        color = P0_COLOR;
                    }
                    color
                };
                self.priority_encoder[half][enabled] = color as u8;
            }
        }
        on
    }

    /// Bring the rendered frame up to `clock`.  Idempotent for clocks at or
    /// before the last update; clamped to the stop-display point.
    pub fn update_frame(&mut self, clock: i32) {
        let mut clock = clock;
        if clock < self.clock_start_display
            || self.clock_at_last_update >= self.clock_stop_display
            || self.clock_at_last_update >= clock
        {
            return;
        }
        if clock > self.clock_stop_display {
            clock = self.clock_stop_display;
        }

        let t = tables();
        let start_line = (self.clock_at_last_update - self.clock_when_frame_started) / 228;
        let end_line = (clock - self.clock_when_frame_started) / 228;

        for line in start_line..=end_line {
            if line != start_line {
                // Scanline boundary: a previous HMOVE stops mattering, a
                // pending one lands, more-motion latches tick, and the PF
                // mask re-latches the CTRLPF reflection bit.
                self.previous_hmove_pos = None;

                if let Some(hmove_pos) = self.current_hmove_pos.take() {
                    if (97..157).contains(&hmove_pos) {
                        self.pos_p0 = clamp_pos(self.pos_p0 - self.motion_clock_p0 as i16);
                        self.pos_p1 = clamp_pos(self.pos_p1 - self.motion_clock_p1 as i16);
                        self.pos_m0 = clamp_pos(self.pos_m0 - self.motion_clock_m0 as i16);
                        self.pos_m1 = clamp_pos(self.pos_m1 - self.motion_clock_m1 as i16);
                        self.pos_bl = clamp_pos(self.pos_bl - self.motion_clock_bl as i16);
                        self.previous_hmove_pos = Some(hmove_pos);
                    }
                }

                if self.hmp0_mmr {
                    self.pos_p0 = clamp_pos(self.pos_p0 - 17);
                }
                if self.hmp1_mmr {
                    self.pos_p1 = clamp_pos(self.pos_p1 - 17);
                }
                if self.hmm0_mmr {
                    self.pos_m0 = clamp_pos(self.pos_m0 - 17);
                }
                if self.hmm1_mmr {
                    self.pos_m1 = clamp_pos(self.pos_m1 - 17);
                }
                if self.hmbl_mmr {
                    self.pos_bl = clamp_pos(self.pos_bl - 17);
                }

                self.pf_mask_reflect = self.ctrlpf & 0x01 != 0;
            }

            let clocks_from_start = 228 - self.clocks_to_end_of_scanline;
            let mut clocks_to_update;
            if clock > self.clock_at_last_update + self.clocks_to_end_of_scanline {
                clocks_to_update = self.clocks_to_end_of_scanline;
                self.clocks_to_end_of_scanline = 228;
                self.clock_at_last_update += clocks_to_update;
            } else {
                clocks_to_update = clock - self.clock_at_last_update;
                self.clocks_to_end_of_scanline -= clocks_to_update;
                self.clock_at_last_update = clock;
            }

            // Skip over horizontal blank.
            let mut clocks_from_start = clocks_from_start;
            if clocks_from_start < HBLANK {
                let skipped = (HBLANK - clocks_from_start).min(clocks_to_update);
                clocks_from_start += skipped;
                clocks_to_update -= skipped;
            }

            let old_frame_pointer = self.frame_pointer;

            if clocks_to_update != 0 {
                let ending = self.frame_pointer + clocks_to_update as usize;
                self.frame_pointer_clocks += clocks_to_update as u32;

                if self.vblank & 0x02 != 0 {
                    self.current_buffer[self.frame_pointer..ending].fill(0);
                } else {
                    let p0_row =
                        &t.px_mask[self.suppress_p0 as usize][(self.nusiz0 & 0x07) as usize];
                    let p1_row =
                        &t.px_mask[self.suppress_p1 as usize][(self.nusiz1 & 0x07) as usize];
                    let bl_row = &t.bl_mask[((self.ctrlpf & 0x30) >> 4) as usize];
                    let p0_off = 160 - self.pos_p0.rem_euclid(160) as usize;
                    let p1_off = 160 - self.pos_p1.rem_euclid(160) as usize;
                    let bl_off = 160 - self.pos_bl.rem_euclid(160) as usize;

                    // The more-motion latch visibly stretches or blanks a
                    // missile depending on its phase (Cosmic Ark starfield).
                    let (m0_row, m0_off): (&[bool; 320], usize) = if self.hmm0_mmr {
                        match self.pos_m0 % 4 {
                            3 => (
                                &t.mx_mask[(self.nusiz0 & 0x07) as usize]
                                    [(((self.nusiz0 & 0x30) >> 4) | 1) as usize],
                                160 - (self.pos_m0 - 1).rem_euclid(160) as usize,
                            ),
                            2 => (&DISABLED_MASK, 160),
                            _ => (
                                &t.mx_mask[(self.nusiz0 & 0x07) as usize]
                                    [((self.nusiz0 & 0x30) >> 4) as usize],
                                160 - self.pos_m0.rem_euclid(160) as usize,
                            ),
                        }
                    } else {
                        (
                            &t.mx_mask[(self.nusiz0 & 0x07) as usize]
                                [((self.nusiz0 & 0x30) >> 4) as usize],
                            160 - self.pos_m0.rem_euclid(160) as usize,
                        )
                    };
                    let (m1_row, m1_off): (&[bool; 320], usize) = if self.hmm1_mmr {
                        match self.pos_m1 % 4 {
                            3 => (
                                &t.mx_mask[(self.nusiz1 & 0x07) as usize]
                                    [(((self.nusiz1 & 0x30) >> 4) | 1) as usize],
                                160 - (self.pos_m1 - 1).rem_euclid(160) as usize,
                            ),
                            2 => (&DISABLED_MASK, 160),
                            _ => (
                                &t.mx_mask[(self.nusiz1 & 0x07) as usize]
                                    [((self.nusiz1 & 0x30) >> 4) as usize],
                                160 - self.pos_m1.rem_euclid(160) as usize,
                            ),
                        }
                    } else {
                        (
                            &t.mx_mask[(self.nusiz1 & 0x07) as usize]
                                [((self.nusiz1 & 0x30) >> 4) as usize],
                            160 - self.pos_m1.rem_euclid(160) as usize,
                        )
                    };

                    let pf_row = &t.pf_mask[self.pf_mask_reflect as usize];
                    let enabled_objects = self.enabled_objects & self.object_enable_mask;
                    let palette = if self.use_fixed_colors {
                        self.fixed_colors
                    } else {
                        self.colors
                    };
                    let pps = self.playfield_priority_and_score;
                    let mut collision = self.collision;
                    let mut hpos = (clocks_from_start - HBLANK) as usize;

                    for fp in self.frame_pointer..ending {
                        let mut enabled = 0u8;
                        if enabled_objects & PF_BIT != 0 && self.pf & pf_row[hpos] != 0 {
                            enabled |= PF_BIT;
                        }
                        if enabled_objects & BL_BIT != 0 && bl_row[bl_off + hpos] {
                            enabled |= BL_BIT;
                        }
                        if enabled_objects & P1_BIT != 0
                            && self.current_grp1 & p1_row[p1_off + hpos] != 0
                        {
                            enabled |= P1_BIT;
                        }
                        if enabled_objects & M1_BIT != 0 && m1_row[m1_off + hpos] {
                            enabled |= M1_BIT;
                        }
                        if enabled_objects & P0_BIT != 0
                            && self.current_grp0 & p0_row[p0_off + hpos] != 0
                        {
                            enabled |= P0_BIT;
                        }
                        if enabled_objects & M0_BIT != 0 && m0_row[m0_off + hpos] {
                            enabled |= M0_BIT;
                        }

                        collision |= t.collision[enabled as usize];
                        let half = usize::from(hpos >= 80);
                        let color =
                            self.priority_encoder[half][(enabled | pps) as usize] as usize;
                        self.current_buffer[fp] = palette[color];
                        hpos += 1;
                    }
                    self.collision = collision;
                }
                self.frame_pointer = ending;
            }

            // The first eight post-HBLANK pixels of an HMOVE line show
            // HBLANK color.
            if self.hmove_blank_enabled && clocks_from_start < HBLANK + 8 {
                let blanks = ((HBLANK + 8) - clocks_from_start) as usize;
                let palette = if self.use_fixed_colors {
                    self.fixed_colors
                } else {
                    self.colors
                };
                let end = (old_frame_pointer + blanks).min(self.current_buffer.len());
                self.current_buffer[old_frame_pointer..end].fill(palette[HBLANK_COLOR]);
                if clocks_to_update + clocks_from_start >= HBLANK + 8 {
                    self.hmove_blank_enabled = false;
                }
            }

            if self.clocks_to_end_of_scanline == 228 {
                // The suppress flags only live until the first copy would
                // have re-fetched; resetting at end of line approximates it.
                self.suppress_p0 = 0;
                self.suppress_p1 = 0;
            }
        }
    }

    fn dumped_input_port(&self, resistance: u32, cycles: u32) -> u8 {
        if resistance == MIN_RESISTANCE {
            0x80
        } else if resistance == MAX_RESISTANCE || self.dump_enabled {
            0x00
        } else {
            // 1.6 * 0.01e-6 * 228 / 3 per scanline per ohm.
            let needed =
                1.216e-6 * resistance as f64 * self.scanline_count_last_frame as f64 * self.framerate;
            if (cycles as i64 - self.dump_disabled_cycle as i64) as f64 > needed {
                0x80
            } else {
                0x00
            }
        }
    }

    /// Service a CPU read.  The undriven bits come from the data bus, with
    /// optional noise when the `tia_driven` setting is off.
    pub fn peek(&mut self, addr: u16, bus: &mut BusState) -> u8 {
        self.update_frame(bus.cycles as i32 * 3);

        let mut value = 0x3F
            & if self.tia_driven {
                bus.data_bus_fuzzed(0xFF)
            } else {
                bus.data_bus()
            };
        let collision = self.collision & self.collision_enabled_mask as u16;

        use tables::*;
        let bit7 = |set: bool| if set { 0x80u8 } else { 0x00 };
        let bit6 = |set: bool| if set { 0x40u8 } else { 0x00 };

        match addr & 0x000F {
            CXM0P => value |= bit7(collision & CX_M0P1 != 0) | bit6(collision & CX_M0P0 != 0),
            CXM1P => value |= bit7(collision & CX_M1P0 != 0) | bit6(collision & CX_M1P1 != 0),
            CXP0FB => value |= bit7(collision & CX_P0PF != 0) | bit6(collision & CX_P0BL != 0),
            CXP1FB => value |= bit7(collision & CX_P1PF != 0) | bit6(collision & CX_P1BL != 0),
            CXM0FB => value |= bit7(collision & CX_M0PF != 0) | bit6(collision & CX_M0BL != 0),
            CXM1FB => value |= bit7(collision & CX_M1PF != 0) | bit6(collision & CX_M1BL != 0),
            CXBLPF => value = (value & 0x7F) | bit7(collision & CX_BLPF != 0),
            CXPPMM => value |= bit7(collision & CX_P0P1 != 0) | bit6(collision & CX_M0M1 != 0),
            INPT0 => {
                value = (value & 0x7F)
                    | self.dumped_input_port(self.input.paddle_resistance[0], bus.cycles)
            }
            INPT1 => {
                value = (value & 0x7F)
                    | self.dumped_input_port(self.input.paddle_resistance[1], bus.cycles)
            }
            INPT2 => {
                value = (value & 0x7F)
                    | self.dumped_input_port(self.input.paddle_resistance[2], bus.cycles)
            }
            INPT3 => {
                value = (value & 0x7F)
                    | self.dumped_input_port(self.input.paddle_resistance[3], bus.cycles)
            }
            INPT4 => {
                let button = if self.input.fire[0] { 0x00 } else { 0x80 };
                self.inpt4 = if self.vblank & 0x40 != 0 {
                    self.inpt4 & button
                } else {
                    button
                };
                value = (value & 0x7F) | self.inpt4;
            }
            INPT5 => {
                let button = if self.input.fire[1] { 0x00 } else { 0x80 };
                self.inpt5 = if self.vblank & 0x40 != 0 {
                    self.inpt5 & button
                } else {
                    button
                };
                value = (value & 0x7F) | self.inpt5;
            }
            _ => {}
        }
        value
    }

    /// Service a CPU write.
    pub fn poke(&mut self, addr: u16, value: u8, bus: &mut BusState) {
        let addr = addr & 0x003F;
        let clock = bus.cycles as i32 * 3;
        let t = tables();

        let mut delay = t.poke_delay[addr as usize] as i32;
        if delay == -1 {
            // Playfield registers latch on a phase of the color clock.
            const PHASE_DELAY: [i32; 4] = [4, 5, 2, 3];
            let x = (clock - self.clock_when_frame_started) % 228;
            delay = PHASE_DELAY[((x / 3) & 3) as usize];
        }

        self.update_frame(clock + delay);

        // A frame that never strobes VSYNC still has to end somewhere.
        if (clock - self.clock_when_frame_started) / 228 >= self.maximum_scanlines as i32 {
            bus.request_stop();
            self.partial_frame = false;
        }

        match addr {
            VSYNC => {
                self.vsync = value;
                if self.vsync & 0x02 != 0 {
                    // Nominally three full scanlines, but plenty of games
                    // cut the pulse short; one line is the observed minimum.
                    self.vsync_finish_clock = Some(clock + 228);
                } else if let Some(finish) = self.vsync_finish_clock {
                    if clock >= finish {
                        self.vsync_finish_clock = None;
                        bus.request_stop();
                        self.partial_frame = false;
                    }
                }
            }

            VBLANK => {
                if self.vblank & 0x80 == 0 && value & 0x80 != 0 {
                    self.dump_enabled = true;
                } else if self.vblank & 0x80 != 0 && value & 0x80 == 0 {
                    self.dump_enabled = false;
                    self.dump_disabled_cycle = bus.cycles as i32;
                }

                if self.vblank & 0x40 == 0 {
                    self.inpt4 = 0x80;
                    self.inpt5 = 0x80;
                }

                // Remember where the visible region starts.
                if self.start_scanline == 0 && value & 0x02 == 0 {
                    self.start_scanline = self.scanlines(bus.cycles);
                }

                self.vblank = value;
            }

            WSYNC => {
                // The 6507 only halts on a read cycle; follow-on writes to
                // WSYNC are ignored as far as halting is concerned.
                if bus.last_access_was_read() {
                    let into_line = (bus.cycles as i64
                        - (self.clock_when_frame_started / 3) as i64)
                        .rem_euclid(76);
                    let to_end = (76 - into_line) as u32;
                    if to_end < 76 {
                        bus.cycles += to_end;
                    }
                }
            }

            RSYNC => {
                // One CPU cycle earlier than WSYNC: the horizontal counter
                // is reset immediately but wraps after one more count.
                let into_line = (bus.cycles as i64 - (self.clock_when_frame_started / 3) as i64)
                    .rem_euclid(76);
                let to_end = (76 - into_line) as u32;
                bus.cycles += to_end - 1;
            }

            NUSIZ0 => {
                // The effect is delayed; 8 clocks replicates observed
                // behavior.
                self.update_frame(clock + 8);
                self.nusiz0 = value;
                self.suppress_p0 = 0;
            }

            NUSIZ1 => {
                self.update_frame(clock + 8);
                self.nusiz1 = value;
                self.suppress_p1 = 0;
            }

            COLUP0 => {
                let color = self.adjust_color_loss(value);
                self.colors[P0_COLOR] = color;
                self.colors[M0_COLOR] = color;
            }

            COLUP1 => {
                let color = self.adjust_color_loss(value);
                self.colors[P1_COLOR] = color;
                self.colors[M1_COLOR] = color;
            }

            COLUPF => {
                let color = self.adjust_color_loss(value);
                self.colors[PF_COLOR] = color;
                self.colors[BL_COLOR] = color;
            }

            COLUBK => {
                self.colors[BK_COLOR] = self.adjust_color_loss(value);
            }

            CTRLPF => {
                self.ctrlpf = value;
                self.playfield_priority_and_score = (self.ctrlpf & 0x06) << 5;
                // Reflection changes take effect mid-line only while the
                // beam is still left of the playfield's second half.
                if (clock - self.clock_when_frame_started) % 228 < HBLANK + 79 {
                    self.pf_mask_reflect = self.ctrlpf & 0x01 != 0;
                }
            }

            REFP0 => {
                if (value & 0x08 != 0) != self.refp0 {
                    self.refp0 = value & 0x08 != 0;
                    self.current_grp0 = t.grp_reflect[self.current_grp0 as usize];
                }
            }

            REFP1 => {
                if (value & 0x08 != 0) != self.refp1 {
                    self.refp1 = value & 0x08 != 0;
                    self.current_grp1 = t.grp_reflect[self.current_grp1 as usize];
                }
            }

            PF0 => {
                self.pf = (self.pf & 0x000F_FFF0) | ((value as u32 >> 4) & 0x0F);
                self.update_pf_enabled();
            }

            PF1 => {
                self.pf = (self.pf & 0x000F_F00F) | ((value as u32) << 4);
                self.update_pf_enabled();
            }

            PF2 => {
                self.pf = (self.pf & 0x0000_0FFF) | ((value as u32) << 12);
                self.update_pf_enabled();
            }

            RESP0 => {
                let hpos = (clock - self.clock_when_frame_started) % 228 - HBLANK;
                let mut newx;
                if let Some(hmove_pos) = self.current_hmove_pos {
                    newx = if hpos < 7 { 3 } else { ((hpos + 5) % 160) as i16 };
                    apply_active_hmove(hmove_pos, hpos, &mut newx, self.motion_clock_p0);
                } else {
                    newx = if hpos < -2 { 3 } else { ((hpos + 5) % 160) as i16 };
                    apply_previous_hmove(self.previous_hmove_pos, hpos, &mut newx, self.hmp0);
                }
                if self.pos_p0 != newx {
                    match tables::pos_reset_when(self.nusiz0, self.pos_p0, newx) {
                        1 => {
                            // Reset lands inside a copy being displayed.
                            self.update_frame(clock + 11);
                            self.suppress_p0 = 1;
                        }
                        0 => self.suppress_p0 = 1,
                        _ => self.suppress_p0 = 0,
                    }
                    self.pos_p0 = newx;
                }
            }

            RESP1 => {
                let hpos = (clock - self.clock_when_frame_started) % 228 - HBLANK;
                let mut newx;
                if let Some(hmove_pos) = self.current_hmove_pos {
                    newx = if hpos < 7 { 3 } else { ((hpos + 5) % 160) as i16 };
                    apply_active_hmove(hmove_pos, hpos, &mut newx, self.motion_clock_p1);
                } else {
                    newx = if hpos < -2 { 3 } else { ((hpos + 5) % 160) as i16 };
                    apply_previous_hmove(self.previous_hmove_pos, hpos, &mut newx, self.hmp1);
                }
                if self.pos_p1 != newx {
                    match tables::pos_reset_when(self.nusiz1, self.pos_p1, newx) {
                        1 => {
                            self.update_frame(clock + 11);
                            self.suppress_p1 = 1;
                        }
                        0 => self.suppress_p1 = 1,
                        _ => self.suppress_p1 = 0,
                    }
                    self.pos_p1 = newx;
                }
            }

            RESM0 => {
                let hpos = (clock - self.clock_when_frame_started) % 228 - HBLANK;
                let mut newx;
                if let Some(hmove_pos) = self.current_hmove_pos {
                    newx = if hpos < 7 { 2 } else { ((hpos + 4) % 160) as i16 };
                    apply_active_hmove(hmove_pos, hpos, &mut newx, self.motion_clock_m0);
                } else {
                    newx = if hpos < -1 { 2 } else { ((hpos + 4) % 160) as i16 };
                    apply_previous_hmove(self.previous_hmove_pos, hpos, &mut newx, self.hmm0);
                }
                self.pos_m0 = newx;
            }

            RESM1 => {
                let hpos = (clock - self.clock_when_frame_started) % 228 - HBLANK;
                let mut newx;
                if let Some(hmove_pos) = self.current_hmove_pos {
                    newx = if hpos < 7 { 2 } else { ((hpos + 4) % 160) as i16 };
                    apply_active_hmove(hmove_pos, hpos, &mut newx, self.motion_clock_m1);
                } else {
                    newx = if hpos < -1 { 2 } else { ((hpos + 4) % 160) as i16 };
                    apply_previous_hmove(self.previous_hmove_pos, hpos, &mut newx, self.hmm1);
                }
                self.pos_m1 = newx;
            }

            RESBL => {
                let hpos = (clock - self.clock_when_frame_started) % 228 - HBLANK;
                let mut newx;
                if let Some(hmove_pos) = self.current_hmove_pos {
                    newx = if hpos < 7 { 2 } else { ((hpos + 4) % 160) as i16 };
                    apply_active_hmove(hmove_pos, hpos, &mut newx, self.motion_clock_bl);
                } else {
                    newx = if hpos < 0 { 2 } else { ((hpos + 4) % 160) as i16 };
                    apply_previous_hmove(self.previous_hmove_pos, hpos, &mut newx, self.hmbl);
                }
                self.pos_bl = newx;
            }

            AUDC0 => {
                self.audc[0] = value & 0x0F;
                self.sound.set(addr, value, bus.cycles);
            }
            AUDC1 => {
                self.audc[1] = value & 0x0F;
                self.sound.set(addr, value, bus.cycles);
            }
            AUDF0 => {
                self.audf[0] = value & 0x1F;
                self.sound.set(addr, value, bus.cycles);
            }
            AUDF1 => {
                self.audf[1] = value & 0x1F;
                self.sound.set(addr, value, bus.cycles);
            }
            AUDV0 => {
                self.audv[0] = value & 0x0F;
                self.sound.set(addr, value, bus.cycles);
            }
            AUDV1 => {
                self.audv[1] = value & 0x0F;
                self.sound.set(addr, value, bus.cycles);
            }

            GRP0 => {
                self.grp0 = value;
                // Writing GRP0 commits player 1's delayed register.
                self.dgrp1 = self.grp1;
                self.refresh_current_grp();
            }

            GRP1 => {
                self.grp1 = value;
                // Writing GRP1 commits player 0's and the ball's shadows.
                self.dgrp0 = self.grp0;
                self.denabl = self.enabl;
                self.refresh_current_grp();
                self.update_bl_enabled();
            }

            ENAM0 => {
                self.enam0 = value & 0x02 != 0;
                self.update_m0_enabled();
            }

            ENAM1 => {
                self.enam1 = value & 0x02 != 0;
                self.update_m1_enabled();
            }

            ENABL => {
                self.enabl = value & 0x02 != 0;
                self.update_bl_enabled();
            }

            HMP0 | HMP1 | HMM0 | HMM1 | HMBL => {
                let hpos = (clock - self.clock_when_frame_started) % 228 - HBLANK;
                let hmove = self.current_hmove_pos;
                match addr {
                    HMP0 => write_motion_register(
                        &mut self.hmp0,
                        &mut self.pos_p0,
                        &mut self.motion_clock_p0,
                        &mut self.hmp0_mmr,
                        hmove,
                        value,
                        hpos,
                    ),
                    HMP1 => write_motion_register(
                        &mut self.hmp1,
                        &mut self.pos_p1,
                        &mut self.motion_clock_p1,
                        &mut self.hmp1_mmr,
                        hmove,
                        value,
                        hpos,
                    ),
                    HMM0 => write_motion_register(
                        &mut self.hmm0,
                        &mut self.pos_m0,
                        &mut self.motion_clock_m0,
                        &mut self.hmm0_mmr,
                        hmove,
                        value,
                        hpos,
                    ),
                    HMM1 => write_motion_register(
                        &mut self.hmm1,
                        &mut self.pos_m1,
                        &mut self.motion_clock_m1,
                        &mut self.hmm1_mmr,
                        hmove,
                        value,
                        hpos,
                    ),
                    _ => write_motion_register(
                        &mut self.hmbl,
                        &mut self.pos_bl,
                        &mut self.motion_clock_bl,
                        &mut self.hmbl_mmr,
                        hmove,
                        value,
                        hpos,
                    ),
                }
            }

            VDELP0 => {
                self.vdelp0 = value & 0x01 != 0;
                self.refresh_current_grp();
            }

            VDELP1 => {
                self.vdelp1 = value & 0x01 != 0;
                self.refresh_current_grp();
            }

            VDELBL => {
                self.vdelbl = value & 0x01 != 0;
                self.update_bl_enabled();
            }

            RESMP0 => {
                if self.resmp0 && value & 0x02 == 0 {
                    let middle = match self.nusiz0 & 0x07 {
                        0x05 => 8,
                        0x07 => 16,
                        _ => 4,
                    };
                    self.pos_m0 = self.pos_p0 + middle;
                    if self.current_hmove_pos.is_some() {
                        self.pos_m0 -= (8 - self.motion_clock_p0) as i16;
                        self.pos_m0 += (8 - self.motion_clock_m0) as i16;
                    }
                    self.pos_m0 = clamp_pos(self.pos_m0);
                }
                self.resmp0 = value & 0x02 != 0;
                self.update_m0_enabled();
            }

            RESMP1 => {
                if self.resmp1 && value & 0x02 == 0 {
                    let middle = match self.nusiz1 & 0x07 {
                        0x05 => 8,
                        0x07 => 16,
                        _ => 4,
                    };
                    self.pos_m1 = self.pos_p1 + middle;
                    if self.current_hmove_pos.is_some() {
                        self.pos_m1 -= (8 - self.motion_clock_p1) as i16;
                        self.pos_m1 += (8 - self.motion_clock_m1) as i16;
                    }
                    self.pos_m1 = clamp_pos(self.pos_m1);
                }
                self.resmp1 = value & 0x02 != 0;
                self.update_m1_enabled();
            }

            HMOVE => {
                let line_clock = (clock - self.clock_when_frame_started) % 228;
                let hpos = line_clock - HBLANK;
                self.current_hmove_pos = Some(hpos);

                self.hmove_blank_enabled = self.allow_hmove_blanks
                    && t.hmove_blank_cycles[(line_clock / 3) as usize];

                // Clocks already applied by a live more-motion latch have to
                // be undone before the new HMOVE recomputes everything.
                if hpos + HBLANK < 17 * 4 {
                    let cycle_fix = (17 - (hpos + HBLANK + 7) / 4) as i16;
                    if self.hmp0_mmr {
                        self.pos_p0 = (self.pos_p0 + cycle_fix) % 160;
                    }
                    if self.hmp1_mmr {
                        self.pos_p1 = (self.pos_p1 + cycle_fix) % 160;
                    }
                    if self.hmm0_mmr {
                        self.pos_m0 = (self.pos_m0 + cycle_fix) % 160;
                    }
                    if self.hmm1_mmr {
                        self.pos_m1 = (self.pos_m1 + cycle_fix) % 160;
                    }
                    if self.hmbl_mmr {
                        self.pos_bl = (self.pos_bl + cycle_fix) % 160;
                    }
                }
                self.hmp0_mmr = false;
                self.hmp1_mmr = false;
                self.hmm0_mmr = false;
                self.hmm1_mmr = false;
                self.hmbl_mmr = false;

                // Inside this window the strobe has no effect at all.
                if (-5..97).contains(&hpos) {
                    self.motion_clock_p0 = 0;
                    self.motion_clock_p1 = 0;
                    self.motion_clock_m0 = 0;
                    self.motion_clock_m1 = 0;
                    self.motion_clock_bl = 0;
                    self.hmove_blank_enabled = false;
                    self.current_hmove_pos = None;
                } else {
                    self.motion_clock_p0 = ((self.hmp0 ^ 0x80) >> 4) as i32;
                    self.motion_clock_p1 = ((self.hmp1 ^ 0x80) >> 4) as i32;
                    self.motion_clock_m0 = ((self.hmm0 ^ 0x80) >> 4) as i32;
                    self.motion_clock_m1 = ((self.hmm1 ^ 0x80) >> 4) as i32;
                    self.motion_clock_bl = ((self.hmbl ^ 0x80) >> 4) as i32;

                    if (97..151).contains(&hpos) {
                        let skip = (160 - hpos - 6) >> 2;
                        self.motion_clock_p0 = (self.motion_clock_p0 - skip).max(0);
                        self.motion_clock_p1 = (self.motion_clock_p1 - skip).max(0);
                        self.motion_clock_m0 = (self.motion_clock_m0 - skip).max(0);
                        self.motion_clock_m1 = (self.motion_clock_m1 - skip).max(0);
                        self.motion_clock_bl = (self.motion_clock_bl - skip).max(0);
                    }

                    if (-56..-5).contains(&hpos) {
                        let max_motclks = (7 - (hpos + 5)) >> 2;
                        self.motion_clock_p0 = self.motion_clock_p0.min(max_motclks);
                        self.motion_clock_p1 = self.motion_clock_p1.min(max_motclks);
                        self.motion_clock_m0 = self.motion_clock_m0.min(max_motclks);
                        self.motion_clock_m1 = self.motion_clock_m1.min(max_motclks);
                        self.motion_clock_bl = self.motion_clock_bl.min(max_motclks);
                    }

                    if hpos < -5 || hpos >= 157 {
                        self.pos_p0 += (8 - self.motion_clock_p0) as i16;
                        self.pos_p1 += (8 - self.motion_clock_p1) as i16;
                        self.pos_m0 += (8 - self.motion_clock_m0) as i16;
                        self.pos_m1 += (8 - self.motion_clock_m1) as i16;
                        self.pos_bl += (8 - self.motion_clock_bl) as i16;
                    }

                    self.pos_p0 = clamp_pos(self.pos_p0);
                    self.pos_p1 = clamp_pos(self.pos_p1);
                    self.pos_m0 = clamp_pos(self.pos_m0);
                    self.pos_m1 = clamp_pos(self.pos_m1);
                    self.pos_bl = clamp_pos(self.pos_bl);

                    self.suppress_p0 = 0;
                    self.suppress_p1 = 0;
                }
            }

            HMCLR => {
                // Five zero pokes through the motion-register path; note
                // this leaves any more-motion latch set.
                let hpos = (clock - self.clock_when_frame_started) % 228 - HBLANK;
                let hmove = self.current_hmove_pos;
                write_motion_register(
                    &mut self.hmp0,
                    &mut self.pos_p0,
                    &mut self.motion_clock_p0,
                    &mut self.hmp0_mmr,
                    hmove,
                    0,
                    hpos,
                );
                write_motion_register(
                    &mut self.hmp1,
                    &mut self.pos_p1,
                    &mut self.motion_clock_p1,
                    &mut self.hmp1_mmr,
                    hmove,
                    0,
                    hpos,
                );
                write_motion_register(
                    &mut self.hmm0,
                    &mut self.pos_m0,
                    &mut self.motion_clock_m0,
                    &mut self.hmm0_mmr,
                    hmove,
                    0,
                    hpos,
                );
                write_motion_register(
                    &mut self.hmm1,
                    &mut self.pos_m1,
                    &mut self.motion_clock_m1,
                    &mut self.hmm1_mmr,
                    hmove,
                    0,
                    hpos,
                );
                write_motion_register(
                    &mut self.hmbl,
                    &mut self.pos_bl,
                    &mut self.motion_clock_bl,
                    &mut self.hmbl_mmr,
                    hmove,
                    0,
                    hpos,
                );
            }

            CXCLR => {
                self.collision = 0;
            }

            _ => {}
        }
    }

    fn adjust_color_loss(&self, value: u8) -> u8 {
        let mut color = value & 0xFE;
        if self.color_loss_enabled && self.scanline_count_last_frame & 1 != 0 {
            color |= 0x01;
        }
        color
    }

    fn update_pf_enabled(&mut self) {
        if self.pf == 0 {
            self.enabled_objects &= !PF_BIT;
        } else {
            self.enabled_objects |= PF_BIT;
        }
    }

    fn update_bl_enabled(&mut self) {
        let enabled = if self.vdelbl { self.denabl } else { self.enabl };
        if enabled {
            self.enabled_objects |= BL_BIT;
        } else {
            self.enabled_objects &= !BL_BIT;
        }
    }

    fn update_m0_enabled(&mut self) {
        if self.enam0 && !self.resmp0 {
            self.enabled_objects |= M0_BIT;
        } else {
            self.enabled_objects &= !M0_BIT;
        }
    }

    fn update_m1_enabled(&mut self) {
        if self.enam1 && !self.resmp1 {
            self.enabled_objects |= M1_BIT;
        } else {
            self.enabled_objects &= !M1_BIT;
        }
    }

    /// Recompute the effective player graphics from the VDEL shadows and
    /// reflection flags, and refresh the enabled bits they drive.
    fn refresh_current_grp(&mut self) {
        let t = tables();
        let grp0 = if self.vdelp0 { self.dgrp0 } else { self.grp0 };
        self.current_grp0 = if self.refp0 {
            t.grp_reflect[grp0 as usize]
        } else {
            grp0
        };
        let grp1 = if self.vdelp1 { self.dgrp1 } else { self.grp1 };
        self.current_grp1 = if self.refp1 {
            t.grp_reflect[grp1 as usize]
        } else {
            grp1
        };

        if self.current_grp0 != 0 {
            self.enabled_objects |= P0_BIT;
        } else {
            self.enabled_objects &= !P0_BIT;
        }
        if self.current_grp1 != 0 {
            self.enabled_objects |= P1_BIT;
        } else {
            self.enabled_objects &= !P1_BIT;
        }
    }

    // State snapshots.

    pub fn save_state(&self) -> Value {
        let state = TiaState {
            clock_when_frame_started: self.clock_when_frame_started,
            clock_start_display: self.clock_start_display,
            clock_stop_display: self.clock_stop_display,
            clock_at_last_update: self.clock_at_last_update,
            clocks_to_end_of_scanline: self.clocks_to_end_of_scanline,
            scanline_count_last_frame: self.scanline_count_last_frame,
            vsync_finish_clock: self.vsync_finish_clock,
            enabled_objects: self.enabled_objects,
            object_enable_mask: self.object_enable_mask,
            vsync: self.vsync,
            vblank: self.vblank,
            nusiz0: self.nusiz0,
            nusiz1: self.nusiz1,
            colors: self.colors,
            ctrlpf: self.ctrlpf,
            playfield_priority_and_score: self.playfield_priority_and_score,
            refp0: self.refp0,
            refp1: self.refp1,
            pf: self.pf,
            grp0: self.grp0,
            grp1: self.grp1,
            dgrp0: self.dgrp0,
            dgrp1: self.dgrp1,
            enam0: self.enam0,
            enam1: self.enam1,
            enabl: self.enabl,
            denabl: self.denabl,
            hmp0: self.hmp0,
            hmp1: self.hmp1,
            hmm0: self.hmm0,
            hmm1: self.hmm1,
            hmbl: self.hmbl,
            vdelp0: self.vdelp0,
            vdelp1: self.vdelp1,
            vdelbl: self.vdelbl,
            resmp0: self.resmp0,
            resmp1: self.resmp1,
            collision: self.collision,
            collision_enabled_mask: self.collision_enabled_mask,
            current_grp0: self.current_grp0,
            current_grp1: self.current_grp1,
            dump_enabled: self.dump_enabled,
            dump_disabled_cycle: self.dump_disabled_cycle,
            inpt4: self.inpt4,
            inpt5: self.inpt5,
            positions: [
                self.pos_p0,
                self.pos_p1,
                self.pos_m0,
                self.pos_m1,
                self.pos_bl,
            ],
            motion_clocks: [
                self.motion_clock_p0,
                self.motion_clock_p1,
                self.motion_clock_m0,
                self.motion_clock_m1,
                self.motion_clock_bl,
            ],
            start_offsets: [self.start_p0, self.start_p1, self.start_m0, self.start_m1],
            suppress: [self.suppress_p0, self.suppress_p1],
            mmr: [
                self.hmp0_mmr,
                self.hmp1_mmr,
                self.hmm0_mmr,
                self.hmm1_mmr,
                self.hmbl_mmr,
            ],
            current_hmove_pos: self.current_hmove_pos,
            previous_hmove_pos: self.previous_hmove_pos,
            hmove_blank_enabled: self.hmove_blank_enabled,
            frame_counter: self.frame_counter,
            pal_frame_counter: self.pal_frame_counter,
            audc: self.audc,
            audf: self.audf,
            audv: self.audv,
        };
        serde_json::json!({
            "name": "TIA",
            "state": state,
            "sound": self.sound.save_state(),
        })
    }

    /// Parse a register snapshot and a display snapshot without touching
    /// any TIA state, so a caller can reject a corrupt stream before
    /// committing anything.
    pub fn stage_state(state: &Value, display: &Value) -> Result<StagedTia, serde_json::Error> {
        let state: TiaState = serde_json::from_value(state["state"].clone())?;
        let display: DisplayState = serde_json::from_value(display.clone())?;
        if display.buffer.len() != BUFFER_SIZE {
            return Err(serde::de::Error::custom("display buffer size mismatch"));
        }
        Ok(StagedTia { state, display })
    }

    /// Commit a staged snapshot.  The sound back-end's part of the stream
    /// is handed over separately via [`Tia::load_sound`].
    pub fn apply_state(&mut self, staged: StagedTia) {
        self.apply_registers(staged.state);
        self.apply_display(staged.display);
    }

    pub fn load_sound(&mut self, v: &Value) -> Result<(), serde_json::Error> {
        self.sound.load_state(v)
    }

    pub fn load_state(&mut self, v: &Value) -> Result<(), serde_json::Error> {
        let state: TiaState = serde_json::from_value(v["state"].clone())?;
        self.apply_registers(state);
        self.sound.load_state(&v["sound"])
    }

    fn apply_registers(&mut self, state: TiaState) {
        self.clock_when_frame_started = state.clock_when_frame_started;
        self.clock_start_display = state.clock_start_display;
        self.clock_stop_display = state.clock_stop_display;
        self.clock_at_last_update = state.clock_at_last_update;
        self.clocks_to_end_of_scanline = state.clocks_to_end_of_scanline;
        self.scanline_count_last_frame = state.scanline_count_last_frame;
        self.vsync_finish_clock = state.vsync_finish_clock;
        self.enabled_objects = state.enabled_objects;
        self.object_enable_mask = state.object_enable_mask;
        self.vsync = state.vsync;
        self.vblank = state.vblank;
        self.nusiz0 = state.nusiz0;
        self.nusiz1 = state.nusiz1;
        self.colors = state.colors;
        self.ctrlpf = state.ctrlpf;
        self.playfield_priority_and_score = state.playfield_priority_and_score;
        self.refp0 = state.refp0;
        self.refp1 = state.refp1;
        self.pf = state.pf;
        self.grp0 = state.grp0;
        self.grp1 = state.grp1;
        self.dgrp0 = state.dgrp0;
        self.dgrp1 = state.dgrp1;
        self.enam0 = state.enam0;
        self.enam1 = state.enam1;
        self.enabl = state.enabl;
        self.denabl = state.denabl;
        self.hmp0 = state.hmp0;
        self.hmp1 = state.hmp1;
        self.hmm0 = state.hmm0;
        self.hmm1 = state.hmm1;
        self.hmbl = state.hmbl;
        self.vdelp0 = state.vdelp0;
        self.vdelp1 = state.vdelp1;
        self.vdelbl = state.vdelbl;
        self.resmp0 = state.resmp0;
        self.resmp1 = state.resmp1;
        self.collision = state.collision;
        self.collision_enabled_mask = state.collision_enabled_mask;
        self.current_grp0 = state.current_grp0;
        self.current_grp1 = state.current_grp1;
        self.dump_enabled = state.dump_enabled;
        self.dump_disabled_cycle = state.dump_disabled_cycle;
        self.inpt4 = state.inpt4;
        self.inpt5 = state.inpt5;
        [
            self.pos_p0,
            self.pos_p1,
            self.pos_m0,
            self.pos_m1,
            self.pos_bl,
        ] = state.positions;
        [
            self.motion_clock_p0,
            self.motion_clock_p1,
            self.motion_clock_m0,
            self.motion_clock_m1,
            self.motion_clock_bl,
        ] = state.motion_clocks;
        [self.start_p0, self.start_p1, self.start_m0, self.start_m1] = state.start_offsets;
        [self.suppress_p0, self.suppress_p1] = state.suppress;
        [
            self.hmp0_mmr,
            self.hmp1_mmr,
            self.hmm0_mmr,
            self.hmm1_mmr,
            self.hmbl_mmr,
        ] = state.mmr;
        self.current_hmove_pos = state.current_hmove_pos;
        self.previous_hmove_pos = state.previous_hmove_pos;
        self.hmove_blank_enabled = state.hmove_blank_enabled;
        self.frame_counter = state.frame_counter;
        self.pal_frame_counter = state.pal_frame_counter;
        self.audc = state.audc;
        self.audf = state.audf;
        self.audv = state.audv;

        // Debug masks are session state, not machine state.
        self.enable_bits(true);
        self.toggle_fixed_colors(0);
        self.allow_hmove_blanks = true;
    }

    /// Save the rendered display separately from the register state, so a
    /// restored partial frame resumes exactly where it left off.
    pub fn save_display(&self) -> Value {
        serde_json::json!({
            "partial_frame": self.partial_frame,
            "frame_pointer_clocks": self.frame_pointer_clocks,
            "buffer": self.current_buffer,
        })
    }

    pub fn load_display(&mut self, v: &Value) -> Result<(), serde_json::Error> {
        let state: DisplayState = serde_json::from_value(v.clone())?;
        if state.buffer.len() != BUFFER_SIZE {
            return Err(serde::de::Error::custom("display buffer size mismatch"));
        }
        self.apply_display(state);
        Ok(())
    }

    fn apply_display(&mut self, state: DisplayState) {
        self.partial_frame = state.partial_frame;
        self.frame_pointer_clocks = state.frame_pointer_clocks;
        self.current_buffer = state.buffer;
        self.previous_buffer.copy_from_slice(&self.current_buffer);
        self.frame_pointer = if self.partial_frame {
            self.frame_pointer_clocks as usize
        } else {
            0
        };
    }
}

/// A parsed-but-uncommitted TIA snapshot.
#[derive(Debug)]
pub struct StagedTia {
    state: TiaState,
    display: DisplayState,
}

#[derive(Debug, Deserialize)]
struct DisplayState {
    partial_frame: bool,
    frame_pointer_clocks: u32,
    buffer: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TiaState {
    clock_when_frame_started: i32,
    clock_start_display: i32,
    clock_stop_display: i32,
    clock_at_last_update: i32,
    clocks_to_end_of_scanline: i32,
    scanline_count_last_frame: u32,
    vsync_finish_clock: Option<i32>,
    enabled_objects: u8,
    object_enable_mask: u8,
    vsync: u8,
    vblank: u8,
    nusiz0: u8,
    nusiz1: u8,
    colors: [u8; 8],
    ctrlpf: u8,
    playfield_priority_and_score: u8,
    refp0: bool,
    refp1: bool,
    pf: u32,
    grp0: u8,
    grp1: u8,
    dgrp0: u8,
    dgrp1: u8,
    enam0: bool,
    enam1: bool,
    enabl: bool,
    denabl: bool,
    hmp0: u8,
    hmp1: u8,
    hmm0: u8,
    hmm1: u8,
    hmbl: u8,
    vdelp0: bool,
    vdelp1: bool,
    vdelbl: bool,
    resmp0: bool,
    resmp1: bool,
    collision: u16,
    collision_enabled_mask: u32,
    current_grp0: u8,
    current_grp1: u8,
    dump_enabled: bool,
    dump_disabled_cycle: i32,
    inpt4: u8,
    inpt5: u8,
    positions: [i16; 5],
    motion_clocks: [i32; 5],
    start_offsets: [i32; 4],
    suppress: [u8; 2],
    mmr: [bool; 5],
    current_hmove_pos: Option<i32>,
    previous_hmove_pos: Option<i32>,
    hmove_blank_enabled: bool,
    frame_counter: u32,
    pal_frame_counter: u32,
    audc: [u8; 2],
    audf: [u8; 2],
    audv: [u8; 2],
}
