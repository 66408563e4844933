//! DD/FD-prefixed bank: IX/IY addressing.
//!
//! Prefixes chain, most recent wins. Opcodes that reference (HL) use
//! (index+d) with the real H/L untouched; opcodes that name H or L as plain
//! registers use the undocumented index halves instead. Anything else
//! executes exactly as its unprefixed form, the prefix having cost its four
//! fetch ticks.

#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]

use emu_core::IoBus;

use crate::alu;
use crate::flags::{CF, PF, SF, ZF};
use crate::registers::Registers;
use crate::Z80;

/// Which index register a DD/FD chain selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Index {
    Ix,
    Iy,
}

impl Index {
    pub(crate) fn get(self, regs: &Registers) -> u16 {
        match self {
            Index::Ix => regs.ix(),
            Index::Iy => regs.iy(),
        }
    }

    pub(crate) fn set(self, regs: &mut Registers, value: u16) {
        match self {
            Index::Ix => regs.set_ix(value),
            Index::Iy => regs.set_iy(value),
        }
    }

    fn high(self, regs: &Registers) -> u8 {
        match self {
            Index::Ix => regs.ixh,
            Index::Iy => regs.iyh,
        }
    }

    fn low(self, regs: &Registers) -> u8 {
        match self {
            Index::Ix => regs.ixl,
            Index::Iy => regs.iyl,
        }
    }

    fn set_high(self, regs: &mut Registers, value: u8) {
        match self {
            Index::Ix => regs.ixh = value,
            Index::Iy => regs.iyh = value,
        }
    }

    fn set_low(self, regs: &mut Registers, value: u8) {
        match self {
            Index::Ix => regs.ixl = value,
            Index::Iy => regs.iyl = value,
        }
    }
}

impl Z80 {
    /// Resolve a DD/FD prefix chain and execute the selected opcode.
    pub(crate) fn execute_prefixed<B: IoBus>(&mut self, bus: &mut B, mut index: Index) {
        loop {
            let op = self.fetch_opcode(bus);
            match op {
                0xDD => index = Index::Ix,
                0xFD => index = Index::Iy,
                0xCB => return self.execute_prefixed_cb(bus, index),
                // ED discards the index prefix entirely.
                0xED => return self.execute_ed(bus),
                _ => return self.execute_indexed(bus, index, op),
            }
        }
    }

    /// Read an 8-bit operand by code with H/L remapped to the index halves.
    fn get_reg8_idx(&self, index: Index, code: u8) -> u8 {
        match code {
            4 => index.high(&self.regs),
            5 => index.low(&self.regs),
            _ => self.get_reg8(code),
        }
    }

    fn set_reg8_idx(&mut self, index: Index, code: u8, value: u8) {
        match code {
            4 => index.set_high(&mut self.regs, value),
            5 => index.set_low(&mut self.regs, value),
            _ => self.set_reg8(code, value),
        }
    }

    /// Fetch the displacement and form the effective address, charging the
    /// 5 internal ticks of the address calculation.
    fn fetch_indexed_addr<B: IoBus>(&mut self, bus: &mut B, index: Index) -> u16 {
        let d = self.fetch(bus) as i8;
        bus.tick(5);
        index.get(&self.regs).wrapping_add(d as u16)
    }

    fn execute_indexed<B: IoBus>(&mut self, bus: &mut B, index: Index, op: u8) {
        match op {
            // ADD ix, rr (0x29 is ADD ix,ix)
            0x09 | 0x19 | 0x29 | 0x39 => {
                bus.tick(7);
                let rhs = match op >> 4 {
                    0 => self.regs.bc(),
                    1 => self.regs.de(),
                    2 => index.get(&self.regs),
                    _ => self.regs.sp,
                };
                let (value, flags) = alu::add16(index.get(&self.regs), rhs);
                index.set(&mut self.regs, value);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
            }

            // LD ix, nn / LD (nn), ix / LD ix, (nn)
            0x21 => {
                let value = self.fetch16(bus);
                index.set(&mut self.regs, value);
            }
            0x22 => {
                let addr = self.fetch16(bus);
                bus.write(addr, index.low(&self.regs));
                bus.write(addr.wrapping_add(1), index.high(&self.regs));
            }
            0x2A => {
                let addr = self.fetch16(bus);
                let lo = bus.read(addr, false);
                let hi = bus.read(addr.wrapping_add(1), false);
                index.set(&mut self.regs, u16::from(hi) << 8 | u16::from(lo));
            }

            // INC ix / DEC ix
            0x23 => {
                bus.tick(2);
                let value = index.get(&self.regs).wrapping_add(1);
                index.set(&mut self.regs, value);
            }
            0x2B => {
                bus.tick(2);
                let value = index.get(&self.regs).wrapping_sub(1);
                index.set(&mut self.regs, value);
            }

            // INC/DEC/LD n on the undocumented halves
            0x24 | 0x2C => {
                let code = (op >> 3) & 7;
                let result = alu::inc8(self.get_reg8_idx(index, code));
                self.set_reg8_idx(index, code, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }
            0x25 | 0x2D => {
                let code = (op >> 3) & 7;
                let result = alu::dec8(self.get_reg8_idx(index, code));
                self.set_reg8_idx(index, code, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }
            0x26 | 0x2E => {
                let value = self.fetch(bus);
                self.set_reg8_idx(index, (op >> 3) & 7, value);
            }

            // INC (ix+d) / DEC (ix+d)
            0x34 => {
                let addr = self.fetch_indexed_addr(bus, index);
                let value = bus.read(addr, false);
                bus.tick(1);
                let result = alu::inc8(value);
                bus.write(addr, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }
            0x35 => {
                let addr = self.fetch_indexed_addr(bus, index);
                let value = bus.read(addr, false);
                bus.tick(1);
                let result = alu::dec8(value);
                bus.write(addr, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }

            // LD (ix+d), n: displacement and immediate overlap the address
            // calculation, so only 2 internal ticks remain.
            0x36 => {
                let d = self.fetch(bus) as i8;
                let value = self.fetch(bus);
                bus.tick(2);
                bus.write(index.get(&self.regs).wrapping_add(d as u16), value);
            }

            // DD 76 is still HALT
            0x76 => {
                self.regs.pc = self.regs.pc.wrapping_sub(1);
                self.regs.halted = true;
            }

            // LD matrix: memory forms use real H/L, register forms use the
            // index halves.
            0x40..=0x7F => {
                let dst = (op >> 3) & 7;
                let src = op & 7;
                if src == 6 {
                    let addr = self.fetch_indexed_addr(bus, index);
                    let value = bus.read(addr, false);
                    self.set_reg8(dst, value);
                } else if dst == 6 {
                    let addr = self.fetch_indexed_addr(bus, index);
                    bus.write(addr, self.get_reg8(src));
                } else {
                    let value = self.get_reg8_idx(index, src);
                    self.set_reg8_idx(index, dst, value);
                }
            }

            // ALU matrix against (ix+d) or the index halves
            0x80..=0xBF => {
                let src = op & 7;
                let value = if src == 6 {
                    let addr = self.fetch_indexed_addr(bus, index);
                    bus.read(addr, false)
                } else {
                    self.get_reg8_idx(index, src)
                };
                self.alu_a((op >> 3) & 7, value);
            }

            // POP ix / PUSH ix
            0xE1 => {
                let value = self.pop16(bus);
                index.set(&mut self.regs, value);
            }
            0xE5 => {
                bus.tick(1);
                let value = index.get(&self.regs);
                self.push16(bus, value);
            }

            // EX (SP), ix
            0xE3 => {
                let lo = bus.read(self.regs.sp, false);
                let hi = bus.read(self.regs.sp.wrapping_add(1), false);
                bus.tick(1);
                bus.write(self.regs.sp.wrapping_add(1), index.high(&self.regs));
                bus.write(self.regs.sp, index.low(&self.regs));
                bus.tick(2);
                index.set(&mut self.regs, u16::from(hi) << 8 | u16::from(lo));
            }

            // JP (ix)
            0xE9 => self.regs.pc = index.get(&self.regs),

            // LD SP, ix
            0xF9 => {
                bus.tick(2);
                self.regs.sp = index.get(&self.regs);
            }

            // The prefix has no effect on anything else.
            _ => self.execute_main(bus, op),
        }
    }
}
