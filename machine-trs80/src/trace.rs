//! Instruction trace ring and freeze detector.
//!
//! Every step records a register snapshot into a fixed ring. The freeze
//! detector watches for a program that has stopped making progress: either
//! the same PC repeating, or all recent PCs packed into a 64-byte window.
//! Both tests apply only to RAM (>= 0x4000) so the ROM's intentional $KEY
//! wait loop never fires them. A trip dumps the ring once and latches.

use std::fs::File;
use std::io::{self, BufWriter, Write};

use cpu_z80::Z80;

pub const TRACE_CAPACITY: usize = 500;
const FREEZE_WINDOW: usize = 64;
/// Ticks accumulated (4 per step) inside a tight window before tripping.
const FREEZE_TICKS: u64 = 3_000_000;
/// Consecutive steps at one PC before tripping. Tuned, not contractual.
const SAME_PC_LIMIT: u64 = 100_000;
/// RAM floor: freezes below this are ROM wait loops, not hangs.
const RAM_START: u16 = 0x4000;

#[derive(Debug, Clone, Copy, Default)]
pub struct TraceEntry {
    pub pc: u16,
    pub sp: u16,
    pub a: u8,
    pub f: u8,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub ix: u16,
    pub iy: u16,
    pub i: u8,
    pub im: u8,
    pub iff1: bool,
    pub iff2: bool,
    pub halted: bool,
    pub ticks: u64,
}

pub struct Debugger {
    buf: Box<[TraceEntry; TRACE_CAPACITY]>,
    head: usize,
    count: usize,

    // Freeze detector
    pc_window: [u16; FREEZE_WINDOW],
    win_pos: usize,
    win_full: bool,
    ticks_acc: u64,
    last_pc: u16,
    streak: u64,
    tripped: bool,
}

impl Debugger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Box::new([TraceEntry::default(); TRACE_CAPACITY]),
            head: 0,
            count: 0,
            pc_window: [0; FREEZE_WINDOW],
            win_pos: 0,
            win_full: false,
            ticks_acc: 0,
            last_pc: 0xFFFF,
            streak: 0,
            tripped: false,
        }
    }

    /// Snapshot the CPU ahead of the next step.
    pub fn record(&mut self, cpu: &Z80, ticks: u64) {
        let regs = cpu.regs();
        self.buf[self.head] = TraceEntry {
            pc: regs.pc,
            sp: regs.sp,
            a: regs.a,
            f: regs.f,
            bc: regs.bc(),
            de: regs.de(),
            hl: regs.hl(),
            ix: regs.ix(),
            iy: regs.iy(),
            i: regs.i,
            im: regs.im,
            iff1: regs.iff1,
            iff2: regs.iff2,
            halted: regs.halted,
            ticks,
        };
        self.head = (self.head + 1) % TRACE_CAPACITY;
        if self.count < TRACE_CAPACITY {
            self.count += 1;
        }
    }

    #[must_use]
    pub fn has_entries(&self) -> bool {
        self.count > 0
    }

    /// Feed the freeze detector. Returns true exactly once, on the step
    /// that trips it.
    pub fn check_freeze(&mut self, pc: u16) -> bool {
        if self.tripped {
            return false;
        }

        // Fast path: one address repeating.
        if pc == self.last_pc {
            self.streak += 1;
        } else {
            self.last_pc = pc;
            self.streak = 0;
        }

        self.pc_window[self.win_pos] = pc;
        self.win_pos = (self.win_pos + 1) % FREEZE_WINDOW;
        if !self.win_full && self.win_pos == 0 {
            self.win_full = true;
        }

        let mut tight = self.streak > SAME_PC_LIMIT && pc >= RAM_START;

        // Slow path: every recent PC inside one 64-byte span of RAM.
        if !tight && self.win_full {
            let lo = *self.pc_window.iter().min().unwrap();
            let hi = *self.pc_window.iter().max().unwrap();
            if lo >= RAM_START && hi - lo < FREEZE_WINDOW as u16 {
                self.ticks_acc += 4;
            } else {
                self.ticks_acc = 0;
            }
            tight = self.ticks_acc >= FREEZE_TICKS;
        }

        if tight {
            eprintln!(
                "[FREEZE] detected at PC={pc:04X} streak={} acc={}",
                self.streak, self.ticks_acc
            );
            self.tripped = true;
            return true;
        }
        false
    }

    /// Write the ring to `trace.log`, oldest entry first.
    pub fn dump(&self, peek: impl Fn(u16) -> u8) {
        match File::create("trace.log") {
            Ok(file) => {
                let mut out = BufWriter::new(file);
                if let Err(e) = self.dump_to(&mut out, peek) {
                    eprintln!("[TRACE] write failed: {e}");
                } else {
                    eprintln!("[TRACE] dumped {} instructions to trace.log", self.count);
                }
            }
            Err(e) => eprintln!("[TRACE] cannot create trace.log: {e}"),
        }
    }

    /// Write the ring to any sink; `peek` supplies opcode bytes.
    pub fn dump_to<W: Write>(&self, out: &mut W, peek: impl Fn(u16) -> u8) -> io::Result<()> {
        writeln!(out, "# freeze trace - last {} instructions", self.count)?;
        writeln!(
            out,
            "# TICKS       PC   SP   AF   BC   DE   HL   IX   IY  I IM IFF OP"
        )?;

        let start = if self.count < TRACE_CAPACITY { 0 } else { self.head };
        for n in 0..self.count {
            let e = &self.buf[(start + n) % TRACE_CAPACITY];
            writeln!(
                out,
                "{:12}  {:04X} {:04X}  {:02X}{:02X} {:04X} {:04X} {:04X}  {:04X} {:04X}  {:02X} {} {}{}  {:02X} {:02X}{}{}",
                e.ticks,
                e.pc,
                e.sp,
                e.a,
                e.f,
                e.bc,
                e.de,
                e.hl,
                e.ix,
                e.iy,
                e.i,
                e.im,
                u8::from(e.iff1),
                u8::from(e.iff2),
                peek(e.pc),
                peek(e.pc.wrapping_add(1)),
                if e.halted { " HALT" } else { "" },
                if e.iff1 { "" } else { " DI" },
            )?;
        }
        Ok(())
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}
