//! CB-prefixed bank: rotates, shifts, BIT/RES/SET, plus the DDCB/FDCB
//! displacement form, which always operates on memory and additionally
//! copies the written result into a register for every family except BIT.

#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]

use emu_core::Bus;

use crate::alu::{self, AluResult};
use crate::flags::{CF, HF, PF, SF, XF, YF, ZF};
use crate::indexed::Index;
use crate::Z80;

impl Z80 {
    pub(crate) fn execute_cb<B: Bus>(&mut self, bus: &mut B) {
        let op = self.fetch_opcode(bus);
        let reg = op & 7;
        let bit = (op >> 3) & 7;

        match op >> 6 {
            // Rotate/shift family
            0 => {
                if reg == 6 {
                    let value = bus.read(self.regs.hl(), false);
                    bus.tick(1);
                    let result = self.apply_shift(bit, value);
                    bus.write(self.regs.hl(), result.value);
                    self.regs.f = result.flags;
                } else {
                    let result = self.apply_shift(bit, self.get_reg8(reg));
                    self.set_reg8(reg, result.value);
                    self.regs.f = result.flags;
                }
            }

            // BIT b, r / BIT b, (HL)
            1 => {
                if reg == 6 {
                    let value = bus.read(self.regs.hl(), false);
                    bus.tick(1);
                    // Memory form: bit-3/bit-5 copies come from the high
                    // byte of the effective address.
                    self.bit_flags(bit, value, (self.regs.hl() >> 8) as u8);
                } else {
                    let value = self.get_reg8(reg);
                    self.bit_flags(bit, value, value);
                }
            }

            // RES b / SET b
            2 => {
                if reg == 6 {
                    let value = bus.read(self.regs.hl(), false) & !(1 << bit);
                    bus.tick(1);
                    bus.write(self.regs.hl(), value);
                } else {
                    let value = self.get_reg8(reg) & !(1 << bit);
                    self.set_reg8(reg, value);
                }
            }
            _ => {
                if reg == 6 {
                    let value = bus.read(self.regs.hl(), false) | (1 << bit);
                    bus.tick(1);
                    bus.write(self.regs.hl(), value);
                } else {
                    let value = self.get_reg8(reg) | (1 << bit);
                    self.set_reg8(reg, value);
                }
            }
        }
    }

    /// DDCB/FDCB: displacement byte, then the final opcode. The operation
    /// always targets (index+d); for non-BIT families the result is also
    /// stored in the register named by the low three bits (unless it names
    /// the memory-only encoding 6).
    pub(crate) fn execute_prefixed_cb<B: Bus>(&mut self, bus: &mut B, index: Index) {
        let d = self.fetch(bus) as i8;
        // The final byte is fetched without an M1 cycle: R does not change.
        let op = self.fetch(bus);
        bus.tick(2);

        let addr = index.get(&self.regs).wrapping_add(d as u16);
        let reg = op & 7;
        let bit = (op >> 3) & 7;

        match op >> 6 {
            0 => {
                let value = bus.read(addr, false);
                bus.tick(1);
                let result = self.apply_shift(bit, value);
                bus.write(addr, result.value);
                self.regs.f = result.flags;
                if reg != 6 {
                    self.set_reg8(reg, result.value);
                }
            }
            1 => {
                let value = bus.read(addr, false);
                bus.tick(1);
                self.bit_flags(bit, value, (addr >> 8) as u8);
            }
            2 => {
                let value = bus.read(addr, false) & !(1 << bit);
                bus.tick(1);
                bus.write(addr, value);
                if reg != 6 {
                    self.set_reg8(reg, value);
                }
            }
            _ => {
                let value = bus.read(addr, false) | (1 << bit);
                bus.tick(1);
                bus.write(addr, value);
                if reg != 6 {
                    self.set_reg8(reg, value);
                }
            }
        }
    }

    fn apply_shift(&self, kind: u8, value: u8) -> AluResult {
        let carry = self.regs.f & CF != 0;
        match kind {
            0 => alu::rlc8(value),
            1 => alu::rrc8(value),
            2 => alu::rl8(value, carry),
            3 => alu::rr8(value, carry),
            4 => alu::sla8(value),
            5 => alu::sra8(value),
            6 => alu::sll8(value),
            _ => alu::srl8(value),
        }
    }

    /// BIT flag rule: Z (and P/V, which mirrors it) from the tested bit,
    /// H set, N clear, S only for a set bit 7, bit-3/bit-5 copies from the
    /// designated source byte, carry preserved.
    fn bit_flags(&mut self, bit: u8, value: u8, xy_source: u8) {
        let zero = value & (1 << bit) == 0;
        let mut f = (self.regs.f & CF) | HF | (xy_source & (YF | XF));
        if zero {
            f |= ZF | PF;
        } else if bit == 7 {
            f |= SF;
        }
        self.regs.f = f;
    }
}
