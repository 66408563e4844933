//! Unprefixed instruction bank.
//!
//! The opcode fetch (4 T-states) has already been charged by `step()`;
//! each arm performs its remaining bus accesses and internal `tick`s so
//! the measured total matches the published instruction timing.

#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]

use emu_core::IoBus;

use crate::alu;
use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF};
use crate::Z80;

impl Z80 {
    pub(crate) fn execute_main<B: IoBus>(&mut self, bus: &mut B, op: u8) {
        match op {
            // NOP
            0x00 => {}

            // LD rr, nn (01=BC, 11=DE, 21=HL, 31=SP)
            0x01 | 0x11 | 0x21 | 0x31 => {
                let value = self.fetch16(bus);
                self.set_pair(op >> 4, value);
            }

            // LD (BC), A / LD (DE), A
            0x02 => bus.write(self.regs.bc(), self.regs.a),
            0x12 => bus.write(self.regs.de(), self.regs.a),

            // INC rr / DEC rr
            0x03 | 0x13 | 0x23 | 0x33 => {
                bus.tick(2);
                let rp = op >> 4;
                self.set_pair(rp, self.get_pair(rp).wrapping_add(1));
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                bus.tick(2);
                let rp = op >> 4;
                self.set_pair(rp, self.get_pair(rp).wrapping_sub(1));
            }

            // INC r / DEC r
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x3C => {
                let r = (op >> 3) & 7;
                let result = alu::inc8(self.get_reg8(r));
                self.set_reg8(r, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x3D => {
                let r = (op >> 3) & 7;
                let result = alu::dec8(self.get_reg8(r));
                self.set_reg8(r, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }

            // LD r, n
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => {
                let value = self.fetch(bus);
                self.set_reg8((op >> 3) & 7, value);
            }

            // RLCA / RRCA / RLA / RRA: only H, N, C and the bit copies change
            0x07 => {
                let carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | carry;
                self.regs.f =
                    (self.regs.f & (SF | ZF | PF)) | (self.regs.a & (YF | XF)) | carry;
            }
            0x0F => {
                let carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | (carry << 7);
                self.regs.f =
                    (self.regs.f & (SF | ZF | PF)) | (self.regs.a & (YF | XF)) | carry;
            }
            0x17 => {
                let old_carry = self.regs.f & CF;
                let carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | old_carry;
                self.regs.f =
                    (self.regs.f & (SF | ZF | PF)) | (self.regs.a & (YF | XF)) | carry;
            }
            0x1F => {
                let old_carry = self.regs.f & CF;
                let carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | (old_carry << 7);
                self.regs.f =
                    (self.regs.f & (SF | ZF | PF)) | (self.regs.a & (YF | XF)) | carry;
            }

            // EX AF, AF'
            0x08 => self.regs.swap_af(),

            // ADD HL, rr
            0x09 | 0x19 | 0x29 | 0x39 => {
                bus.tick(7);
                let (value, flags) = alu::add16(self.regs.hl(), self.get_pair(op >> 4));
                self.regs.set_hl(value);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
            }

            // LD A, (BC) / LD A, (DE)
            0x0A => self.regs.a = bus.read(self.regs.bc(), false),
            0x1A => self.regs.a = bus.read(self.regs.de(), false),

            // DJNZ e
            0x10 => {
                bus.tick(1);
                let d = self.fetch(bus) as i8;
                self.regs.b = self.regs.b.wrapping_sub(1);
                if self.regs.b != 0 {
                    bus.tick(5);
                    self.regs.pc = self.regs.pc.wrapping_add(d as u16);
                }
            }

            // JR e
            0x18 => {
                let d = self.fetch(bus) as i8;
                bus.tick(5);
                self.regs.pc = self.regs.pc.wrapping_add(d as u16);
            }

            // JR cc, e (20=NZ, 28=Z, 30=NC, 38=C)
            0x20 | 0x28 | 0x30 | 0x38 => {
                let d = self.fetch(bus) as i8;
                if self.condition((op >> 3) & 3) {
                    bus.tick(5);
                    self.regs.pc = self.regs.pc.wrapping_add(d as u16);
                }
            }

            // LD (nn), HL / LD HL, (nn)
            0x22 => {
                let addr = self.fetch16(bus);
                bus.write(addr, self.regs.l);
                bus.write(addr.wrapping_add(1), self.regs.h);
            }
            0x2A => {
                let addr = self.fetch16(bus);
                self.regs.l = bus.read(addr, false);
                self.regs.h = bus.read(addr.wrapping_add(1), false);
            }

            // DAA
            0x27 => {
                let result = alu::daa(self.regs.a, self.regs.f);
                self.regs.a = result.value;
                self.regs.f = result.flags;
            }

            // CPL
            0x2F => {
                self.regs.a = !self.regs.a;
                self.regs.f = (self.regs.f & (SF | ZF | PF | CF))
                    | HF
                    | NF
                    | (self.regs.a & (YF | XF));
            }

            // LD (nn), A / LD A, (nn)
            0x32 => {
                let addr = self.fetch16(bus);
                bus.write(addr, self.regs.a);
            }
            0x3A => {
                let addr = self.fetch16(bus);
                self.regs.a = bus.read(addr, false);
            }

            // INC (HL) / DEC (HL)
            0x34 => {
                let value = bus.read(self.regs.hl(), false);
                bus.tick(1);
                let result = alu::inc8(value);
                bus.write(self.regs.hl(), result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }
            0x35 => {
                let value = bus.read(self.regs.hl(), false);
                bus.tick(1);
                let result = alu::dec8(value);
                bus.write(self.regs.hl(), result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
            }

            // LD (HL), n
            0x36 => {
                let value = self.fetch(bus);
                bus.write(self.regs.hl(), value);
            }

            // SCF / CCF
            0x37 => {
                self.regs.f =
                    (self.regs.f & (SF | ZF | PF)) | CF | (self.regs.a & (YF | XF));
            }
            0x3F => {
                let old_carry = self.regs.f & CF;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if old_carry != 0 { HF } else { CF };
            }

            // HALT: leave PC pointing at the HALT opcode so each halted
            // step re-fetches it; the driver advances PC by 1 on wake.
            0x76 => {
                self.regs.pc = self.regs.pc.wrapping_sub(1);
                self.regs.halted = true;
            }

            // LD r, r' matrix (0x40-0x7F, minus HALT)
            0x40..=0x7F => {
                let dst = (op >> 3) & 7;
                let src = op & 7;
                if src == 6 {
                    let value = bus.read(self.regs.hl(), false);
                    self.set_reg8(dst, value);
                } else if dst == 6 {
                    bus.write(self.regs.hl(), self.get_reg8(src));
                } else {
                    let value = self.get_reg8(src);
                    self.set_reg8(dst, value);
                }
            }

            // ALU A, r matrix (0x80-0xBF)
            0x80..=0xBF => {
                let src = op & 7;
                let value = if src == 6 {
                    bus.read(self.regs.hl(), false)
                } else {
                    self.get_reg8(src)
                };
                self.alu_a((op >> 3) & 7, value);
            }

            // RET cc
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
                bus.tick(1);
                if self.condition((op >> 3) & 7) {
                    self.regs.pc = self.pop16(bus);
                }
            }

            // POP rr / POP AF
            0xC1 => {
                let value = self.pop16(bus);
                self.regs.set_bc(value);
            }
            0xD1 => {
                let value = self.pop16(bus);
                self.regs.set_de(value);
            }
            0xE1 => {
                let value = self.pop16(bus);
                self.regs.set_hl(value);
            }
            0xF1 => {
                let value = self.pop16(bus);
                self.regs.set_af(value);
            }

            // JP cc, nn / JP nn
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
                let addr = self.fetch16(bus);
                if self.condition((op >> 3) & 7) {
                    self.regs.pc = addr;
                }
            }
            0xC3 => self.regs.pc = self.fetch16(bus),

            // CALL cc, nn / CALL nn
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                let addr = self.fetch16(bus);
                if self.condition((op >> 3) & 7) {
                    bus.tick(1);
                    let pc = self.regs.pc;
                    self.push16(bus, pc);
                    self.regs.pc = addr;
                }
            }
            0xCD => {
                let addr = self.fetch16(bus);
                bus.tick(1);
                let pc = self.regs.pc;
                self.push16(bus, pc);
                self.regs.pc = addr;
            }

            // PUSH rr / PUSH AF
            0xC5 => {
                bus.tick(1);
                let value = self.regs.bc();
                self.push16(bus, value);
            }
            0xD5 => {
                bus.tick(1);
                let value = self.regs.de();
                self.push16(bus, value);
            }
            0xE5 => {
                bus.tick(1);
                let value = self.regs.hl();
                self.push16(bus, value);
            }
            0xF5 => {
                bus.tick(1);
                let value = self.regs.af();
                self.push16(bus, value);
            }

            // ALU A, n
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let value = self.fetch(bus);
                self.alu_a((op >> 3) & 7, value);
            }

            // RST p
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                bus.tick(1);
                let pc = self.regs.pc;
                self.push16(bus, pc);
                self.regs.pc = u16::from(op & 0x38);
            }

            // RET
            0xC9 => self.regs.pc = self.pop16(bus),

            // EXX
            0xD9 => self.regs.swap_main(),

            // OUT (n), A / IN A, (n)
            0xD3 => {
                let port = self.fetch(bus);
                bus.write_port(port, self.regs.a);
            }
            0xDB => {
                let port = self.fetch(bus);
                self.regs.a = bus.read_port(port);
            }

            // EX (SP), HL
            0xE3 => {
                let lo = bus.read(self.regs.sp, false);
                let hi = bus.read(self.regs.sp.wrapping_add(1), false);
                bus.tick(1);
                bus.write(self.regs.sp.wrapping_add(1), self.regs.h);
                bus.write(self.regs.sp, self.regs.l);
                bus.tick(2);
                self.regs.h = hi;
                self.regs.l = lo;
            }

            // JP (HL)
            0xE9 => self.regs.pc = self.regs.hl(),

            // EX DE, HL
            0xEB => {
                core::mem::swap(&mut self.regs.d, &mut self.regs.h);
                core::mem::swap(&mut self.regs.e, &mut self.regs.l);
            }

            // DI / EI
            0xF3 => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
            }
            0xFB => {
                self.regs.iff1 = true;
                self.regs.iff2 = true;
            }

            // LD SP, HL
            0xF9 => {
                bus.tick(2);
                self.regs.sp = self.regs.hl();
            }

            // Prefix bytes are consumed by step() before dispatch.
            0xCB | 0xDD | 0xED | 0xFD => unreachable!("prefix handled in step()"),
        }
    }
}
