//! System bus: address decode, memory storage, ROM shadow, video timing
//! with M1 contention, keyboard matrix, port 0xFF, and the interrupt
//! latches. Owns the cassette deck and the floppy controller.
//!
//! Memory map:
//!   0x0000-0x2FFF  12 KiB ROM (shadowed per byte once written)
//!   0x3000-0x37DF  unmapped, reads 0xFF
//!   0x37E0-0x37E3  interrupt-status latch (read) / drive select (write)
//!   0x37E4-0x37EB  printer status, fixed "ready" sentinel
//!   0x37EC-0x37EF  FD1771 registers
//!   0x3800-0x3BFF  keyboard matrix (low address byte selects rows)
//!   0x3C00-0x3FFF  1 KiB video RAM
//!   0x4000-0xFFFF  48 KiB user RAM

#![allow(clippy::cast_possible_truncation)]

use crate::cassette::Cassette;
use crate::fdc::Fdc;

pub const ROM_SIZE: usize = 0x3000;
pub const VRAM_SIZE: usize = 0x0400;
pub const RAM_SIZE: usize = 0xC000;

const ROM_END: u16 = 0x2FFF;
const LATCH_START: u16 = 0x37E0;
const LATCH_END: u16 = 0x37E3;
const PRINTER_START: u16 = 0x37E4;
const PRINTER_END: u16 = 0x37EB;
const FDC_START: u16 = 0x37EC;
const FDC_END: u16 = 0x37EF;
const KEYBOARD_START: u16 = 0x3800;
const KEYBOARD_END: u16 = 0x3BFF;
const VRAM_START: u16 = 0x3C00;
const VRAM_END: u16 = 0x3FFF;
const RAM_START: u16 = 0x4000;

/// Printer status byte: selected, not busy, paper present, no fault.
const PRINTER_READY: u8 = 0x30;

// Video timing: 262 NTSC scanlines of 114 T-states; rows [48, 240) carry
// the picture, and a 60 Hz frame budget is 29,498 T-states.
pub const TICKS_PER_SCANLINE: u16 = 114;
pub const TOTAL_SCANLINES: u16 = 262;
pub const VISIBLE_START: u16 = 48;
pub const VISIBLE_END: u16 = VISIBLE_START + 192;
pub const TICKS_PER_FRAME: u64 = 29_498;

// M1 accesses to VRAM stall for 2 T-states while the video counters are
// inside this window of the scanline.
const CONTENTION_START: u16 = 30;
const CONTENTION_END: u16 = 90;

pub struct Bus {
    rom: Box<[u8; ROM_SIZE]>,
    vram: Box<[u8; VRAM_SIZE]>,
    ram: Box<[u8; RAM_SIZE]>,

    // Expansion-interface RAM-over-ROM overlay: a write into the ROM range
    // activates the shadow byte, and reads prefer it from then on. The disk
    // OS uses this to plant its interrupt vector at 0x4000-aliased 0x0038.
    rom_shadow: Box<[u8; ROM_SIZE]>,
    shadow_active: Box<[bool; ROM_SIZE]>,

    /// Keyboard matrix, one byte per row, bits active-high.
    keyboard: [u8; 8],

    // Video timing
    global_t: u64,
    scanline: u16,
    t_in_line: u16,

    // Interrupt latches: `int_pending` is consumed by the delivery check,
    // `int_latch` is sticky until software reads 0x37E0.
    int_pending: bool,
    int_latch: bool,
    int_enabled: bool,

    /// Last value written to port 0xFF.
    port_ff: u8,

    pub cassette: Cassette,
    pub fdc: Fdc,
}

impl Bus {
    #[must_use]
    pub fn new() -> Self {
        let mut bus = Self {
            rom: Box::new([0; ROM_SIZE]),
            vram: Box::new([0; VRAM_SIZE]),
            ram: Box::new([0; RAM_SIZE]),
            rom_shadow: Box::new([0; ROM_SIZE]),
            shadow_active: Box::new([false; ROM_SIZE]),
            keyboard: [0; 8],
            global_t: 0,
            scanline: 0,
            t_in_line: 0,
            int_pending: false,
            int_latch: false,
            int_enabled: true,
            port_ff: 0,
            cassette: Cassette::new(),
            fdc: Fdc::new(),
        };
        bus.reset();
        bus
    }

    /// Cold reset: clears RAM and the shadow, fills VRAM with spaces,
    /// rewinds the video counters. The ROM image itself survives.
    pub fn reset(&mut self) {
        self.vram.fill(0x20);
        self.ram.fill(0x00);
        self.rom_shadow.fill(0x00);
        self.shadow_active.fill(false);
        self.global_t = 0;
        self.scanline = 0;
        self.t_in_line = 0;
        self.int_pending = false;
        self.int_latch = false;
        self.port_ff = 0;
    }

    /// Install the 12 KiB system ROM.
    pub fn load_rom(&mut self, image: &[u8]) -> Result<(), String> {
        if image.len() != ROM_SIZE {
            return Err(format!(
                "ROM image is {} bytes, expected {ROM_SIZE}",
                image.len()
            ));
        }
        self.rom.copy_from_slice(image);
        Ok(())
    }

    /// Timer or FDC interrupt waiting for delivery.
    #[must_use]
    pub fn interrupt_pending(&self) -> bool {
        self.int_pending || self.fdc.intrq_pending()
    }

    /// Clear the frame-timer latch after delivery. The FDC's INTRQ is
    /// cleared only by reading its status register.
    pub fn clear_interrupt(&mut self) {
        self.int_pending = false;
    }

    #[must_use]
    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    /// Bit 1 of port 0xFF: the cassette data line games toggle for sound.
    #[must_use]
    pub fn sound_bit(&self) -> bool {
        self.port_ff & 0x02 != 0
    }

    #[must_use]
    pub fn vram(&self) -> &[u8; VRAM_SIZE] {
        &self.vram
    }

    /// The raw ROM image, ignoring any shadow overlay (debug access).
    #[must_use]
    pub fn rom(&self) -> &[u8; ROM_SIZE] {
        &self.rom
    }

    /// Set or clear one key in the matrix.
    pub fn set_key(&mut self, row: usize, bit: u8, pressed: bool) {
        if row < 8 {
            if pressed {
                self.keyboard[row] |= 1 << bit;
            } else {
                self.keyboard[row] &= !(1 << bit);
            }
        }
    }

    pub fn clear_keys(&mut self) {
        self.keyboard = [0; 8];
    }

    /// Advance the clock and the video-timing state machine. When the
    /// scanline counter wraps past the last line, latch the frame interrupt.
    fn advance(&mut self, t_states: u32) {
        self.global_t += u64::from(t_states);
        self.t_in_line += t_states as u16;
        while self.t_in_line >= TICKS_PER_SCANLINE {
            self.t_in_line -= TICKS_PER_SCANLINE;
            self.scanline += 1;
            if self.scanline >= TOTAL_SCANLINES {
                self.scanline = 0;
                if self.int_enabled {
                    self.int_pending = true;
                    self.int_latch = true;
                }
            }
        }
    }

    fn is_visible_scanline(&self) -> bool {
        (VISIBLE_START..VISIBLE_END).contains(&self.scanline)
    }

    /// The video shifter owns VRAM inside the contention window; an M1
    /// fetch from VRAM there waits two T-states.
    fn contention_wait(&self, addr: u16, m1: bool) -> bool {
        m1 && (VRAM_START..=VRAM_END).contains(&addr)
            && self.is_visible_scanline()
            && (CONTENTION_START..=CONTENTION_END).contains(&self.t_in_line)
    }

    fn decode_read(&mut self, addr: u16) -> u8 {
        match addr {
            0x0000..=ROM_END => {
                let i = addr as usize;
                if self.shadow_active[i] {
                    self.rom_shadow[i]
                } else {
                    self.rom[i]
                }
            }
            LATCH_START..=LATCH_END => {
                // Bit 7 = frame timer, bit 6 = FDC INTRQ. Reading clears
                // the sticky timer latch.
                let mut value = 0u8;
                if self.int_latch {
                    value |= 0x80;
                }
                if self.fdc.intrq_pending() {
                    value |= 0x40;
                }
                self.int_latch = false;
                value
            }
            PRINTER_START..=PRINTER_END => PRINTER_READY,
            FDC_START..=FDC_END => self.fdc.read(addr),
            KEYBOARD_START..=KEYBOARD_END => self.keyboard_read(addr),
            VRAM_START..=VRAM_END => self.vram[(addr - VRAM_START) as usize],
            RAM_START..=0xFFFF => self.ram[(addr - RAM_START) as usize],
            _ => 0xFF,
        }
    }

    /// Keyboard rows are wire-ORed: each set bit in the low address byte
    /// merges that row, so ghosting behaves as on hardware.
    fn keyboard_read(&self, addr: u16) -> u8 {
        let select = addr as u8;
        let mut value = 0;
        for row in 0..8 {
            if select & (1 << row) != 0 {
                value |= self.keyboard[row];
            }
        }
        value
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl emu_core::Bus for Bus {
    fn read(&mut self, addr: u16, m1: bool) -> u8 {
        if self.contention_wait(addr, m1) {
            self.advance(2);
        }
        self.advance(if m1 { 4 } else { 3 });
        self.decode_read(addr)
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.advance(3);
        match addr {
            0x0000..=ROM_END => {
                let i = addr as usize;
                self.rom_shadow[i] = value;
                self.shadow_active[i] = true;
            }
            LATCH_START..=LATCH_END => self.fdc.select_drive(value),
            FDC_START..=FDC_END => self.fdc.write(addr, value),
            VRAM_START..=VRAM_END => self.vram[(addr - VRAM_START) as usize] = value,
            RAM_START..=0xFFFF => self.ram[(addr - RAM_START) as usize] = value,
            _ => {}
        }
    }

    fn tick(&mut self, t_states: u32) {
        self.advance(t_states);
    }

    fn elapsed(&self) -> u64 {
        self.global_t
    }

    fn peek(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=ROM_END => {
                let i = addr as usize;
                if self.shadow_active[i] {
                    self.rom_shadow[i]
                } else {
                    self.rom[i]
                }
            }
            LATCH_START..=LATCH_END => {
                // Same view as a real read, without clearing the latch.
                let mut value = 0u8;
                if self.int_latch {
                    value |= 0x80;
                }
                if self.fdc.intrq_pending() {
                    value |= 0x40;
                }
                value
            }
            PRINTER_START..=PRINTER_END => PRINTER_READY,
            FDC_START..=FDC_END => self.fdc.peek(addr),
            KEYBOARD_START..=KEYBOARD_END => self.keyboard_read(addr),
            VRAM_START..=VRAM_END => self.vram[(addr - VRAM_START) as usize],
            RAM_START..=0xFFFF => self.ram[(addr - RAM_START) as usize],
            _ => 0xFF,
        }
    }
}

impl emu_core::IoBus for Bus {
    fn read_port(&mut self, port: u8) -> u8 {
        self.advance(4);
        if port == 0xFF {
            // Echo of the last write with the cassette input on bit 7.
            let input = self.cassette.input_level(self.global_t);
            (self.port_ff & 0x7F) | if input { 0x80 } else { 0 }
        } else {
            0xFF
        }
    }

    fn write_port(&mut self, port: u8, value: u8) {
        self.advance(4);
        if port == 0xFF {
            // Bit 0 clocks the cassette recorder; bits 1-2 are the data
            // line (also the speaker) and motor control.
            self.cassette.on_port_write(value, self.global_t);
            self.port_ff = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::{Bus as _, IoBus as _};

    #[test]
    fn ram_round_trip_over_the_whole_range() {
        let mut bus = Bus::new();
        for addr in RAM_START..=0xFFFF {
            bus.write(addr, addr as u8 ^ 0x5A);
        }
        for addr in RAM_START..=0xFFFF {
            assert_eq!(bus.read(addr, false), addr as u8 ^ 0x5A);
        }
    }

    #[test]
    fn unmapped_region_reads_ff() {
        let mut bus = Bus::new();
        assert_eq!(bus.read(0x3000, false), 0xFF);
        assert_eq!(bus.read(0x37DF, false), 0xFF);
    }

    #[test]
    fn printer_status_is_ready_sentinel() {
        let mut bus = Bus::new();
        assert_eq!(bus.read(0x37E8, false), PRINTER_READY);
    }

    #[test]
    fn vram_initialised_to_spaces() {
        let mut bus = Bus::new();
        assert_eq!(bus.read(0x3C00, false), 0x20);
        assert_eq!(bus.read(0x3FFF, false), 0x20);
    }

    #[test]
    fn rom_shadow_overlays_reads_until_reset() {
        let mut bus = Bus::new();
        let mut rom = vec![0u8; ROM_SIZE];
        rom[0x38] = 0xAA;
        bus.load_rom(&rom).unwrap();

        assert_eq!(bus.peek(0x0038), 0xAA);

        // Write through the expansion overlay
        bus.write(0x0038, 0xC3);
        assert_eq!(bus.read(0x0038, false), 0xC3, "shadow wins after a write");
        assert_eq!(bus.peek(0x0038), 0xC3, "peek sees the shadow too");
        assert_eq!(bus.rom()[0x38], 0xAA, "the ROM byte underneath is intact");

        // A read does not clear it
        let _ = bus.read(0x0038, false);
        assert_eq!(bus.read(0x0038, false), 0xC3);

        // reset() clears the shadow but keeps the ROM
        bus.reset();
        assert_eq!(bus.read(0x0038, false), 0xAA);
    }

    #[test]
    fn rom_image_must_be_exactly_12k() {
        let mut bus = Bus::new();
        assert!(bus.load_rom(&[0u8; 0x2000]).is_err());
        assert!(bus.load_rom(&vec![0u8; ROM_SIZE]).is_ok());
    }

    #[test]
    fn keyboard_rows_combine_with_or() {
        let mut bus = Bus::new();
        bus.set_key(0, 1, true); // A
        bus.set_key(1, 0, true); // H

        assert_eq!(bus.read(0x3801, false), 0x02, "row 0 only");
        assert_eq!(bus.read(0x3802, false), 0x01, "row 1 only");
        assert_eq!(bus.read(0x3803, false), 0x03, "both rows ORed");
        assert_eq!(bus.read(0x3800, false), 0x00, "no rows selected");
    }

    #[test]
    fn frame_interrupt_latches_on_scanline_wrap() {
        let mut bus = Bus::new();
        assert!(!bus.interrupt_pending());

        bus.tick(u32::from(TOTAL_SCANLINES * TICKS_PER_SCANLINE));
        assert!(bus.interrupt_pending());
        assert_eq!(bus.scanline(), 0);

        bus.clear_interrupt();
        assert!(!bus.interrupt_pending());

        // The sticky latch is still visible at 0x37E0 and clears on read.
        assert_eq!(bus.read(0x37E0, false) & 0x80, 0x80);
        assert_eq!(bus.read(0x37E0, false) & 0x80, 0x00);
    }

    #[test]
    fn m1_vram_fetch_pays_contention_in_window() {
        let mut bus = Bus::new();

        // Park the counters on a visible scanline inside the window.
        bus.tick(u32::from(VISIBLE_START * TICKS_PER_SCANLINE) + 40);
        let before = bus.elapsed();
        bus.read(0x3C00, true);
        assert_eq!(bus.elapsed() - before, 6, "2 wait + 4 fetch");

        // A data read at the same position does not stall.
        let mut bus = Bus::new();
        bus.tick(u32::from(VISIBLE_START * TICKS_PER_SCANLINE) + 40);
        let before = bus.elapsed();
        bus.read(0x3C00, false);
        assert_eq!(bus.elapsed() - before, 3);

        // An M1 fetch from RAM does not stall either.
        let mut bus = Bus::new();
        bus.tick(u32::from(VISIBLE_START * TICKS_PER_SCANLINE) + 40);
        let before = bus.elapsed();
        bus.read(0x4000, true);
        assert_eq!(bus.elapsed() - before, 4);
    }

    #[test]
    fn no_contention_outside_visible_rows() {
        let mut bus = Bus::new();
        bus.tick(40); // scanline 0
        let before = bus.elapsed();
        bus.read(0x3C00, true);
        assert_eq!(bus.elapsed() - before, 4);
    }

    #[test]
    fn port_ff_echoes_low_bits_with_cassette_input() {
        let mut bus = Bus::new();
        bus.write_port(0xFF, 0x55);
        let value = bus.read_port(0xFF);
        assert_eq!(value & 0x7F, 0x55);
        // Bit 7 is the cassette input; with no tape it is the idle toggle,
        // which is a function of the current tick.
    }

    #[test]
    fn drive_select_reaches_fdc() {
        let mut bus = Bus::new();
        bus.fdc.insert_disk(1, vec![0u8; 35 * 10 * 256]);
        bus.write(0x37E1, 0x02); // select drive 1
        bus.write(0x37EC, 0x00); // Restore
        assert_eq!(bus.read(0x37ED, false), 0, "track register reset");
    }
}
