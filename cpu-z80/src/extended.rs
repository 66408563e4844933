//! ED-prefixed instruction bank.
//!
//! Block-repeat instructions (LDIR, CPIR, INIR, OTIR and the decrementing
//! forms) rewind PC by two bytes while their loop condition holds, so each
//! iteration is one `step()` and an interrupt delivered between steps lands
//! between iterations, as on hardware.

#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]

use emu_core::IoBus;

use crate::alu;
use crate::flags::{parity, sz53, CF, HF, NF, PF, SF, XF, ZF};
use crate::Z80;

impl Z80 {
    pub(crate) fn execute_ed<B: IoBus>(&mut self, bus: &mut B) {
        let op = self.fetch_opcode(bus);

        match op {
            // IN r, (C); ED 70 is the flags-only form
            0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x70 | 0x78 => {
                let value = bus.read_port(self.regs.c);
                self.regs.f = (self.regs.f & CF) | alu::in_flags(value);
                if op != 0x70 {
                    self.set_reg8((op >> 3) & 7, value);
                }
            }

            // OUT (C), r; ED 71 outputs zero
            0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x71 | 0x79 => {
                let value = if op == 0x71 { 0 } else { self.get_reg8((op >> 3) & 7) };
                bus.write_port(self.regs.c, value);
            }

            // SBC HL, rr / ADC HL, rr
            0x42 | 0x52 | 0x62 | 0x72 => {
                bus.tick(7);
                let carry = self.regs.f & CF != 0;
                let (value, flags) =
                    alu::sbc16(self.regs.hl(), self.get_pair(op >> 4), carry);
                self.regs.set_hl(value);
                self.regs.f = flags;
            }
            0x4A | 0x5A | 0x6A | 0x7A => {
                bus.tick(7);
                let carry = self.regs.f & CF != 0;
                let (value, flags) =
                    alu::adc16(self.regs.hl(), self.get_pair(op >> 4), carry);
                self.regs.set_hl(value);
                self.regs.f = flags;
            }

            // LD (nn), rr / LD rr, (nn)
            0x43 | 0x53 | 0x63 | 0x73 => {
                let addr = self.fetch16(bus);
                let value = self.get_pair(op >> 4);
                bus.write(addr, value as u8);
                bus.write(addr.wrapping_add(1), (value >> 8) as u8);
            }
            0x4B | 0x5B | 0x6B | 0x7B => {
                let addr = self.fetch16(bus);
                let lo = bus.read(addr, false);
                let hi = bus.read(addr.wrapping_add(1), false);
                self.set_pair(op >> 4, u16::from(hi) << 8 | u16::from(lo));
            }

            // NEG (all eight mirrors)
            0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => {
                let result = alu::neg8(self.regs.a);
                self.regs.a = result.value;
                self.regs.f = result.flags;
            }

            // RETN / RETI: both restore IFF1 from IFF2 (RETN semantics;
            // the disk OS depends on RETI behaving the same way here).
            0x45 | 0x4D | 0x55 | 0x5D | 0x65 | 0x6D | 0x75 | 0x7D => {
                self.regs.pc = self.pop16(bus);
                self.regs.iff1 = self.regs.iff2;
            }

            // IM 0 / IM 1 / IM 2 (with undocumented mirrors)
            0x46 | 0x4E | 0x66 | 0x6E => self.regs.im = 0,
            0x56 | 0x76 => self.regs.im = 1,
            0x5E | 0x7E => self.regs.im = 2,

            // LD I,A / LD R,A / LD A,I / LD A,R
            0x47 => {
                bus.tick(1);
                self.regs.i = self.regs.a;
            }
            0x4F => {
                bus.tick(1);
                self.regs.r = self.regs.a;
            }
            0x57 => {
                bus.tick(1);
                self.regs.a = self.regs.i;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
            }
            0x5F => {
                bus.tick(1);
                self.regs.a = self.regs.r;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
            }

            // RRD / RLD: rotate BCD nibbles between A and (HL)
            0x67 => {
                let mem = bus.read(self.regs.hl(), false);
                bus.tick(4);
                let low_a = self.regs.a & 0x0F;
                self.regs.a = (self.regs.a & 0xF0) | (mem & 0x0F);
                bus.write(self.regs.hl(), (low_a << 4) | (mem >> 4));
                self.regs.f = (self.regs.f & CF) | crate::flags::sz53p(self.regs.a);
            }
            0x6F => {
                let mem = bus.read(self.regs.hl(), false);
                bus.tick(4);
                let low_a = self.regs.a & 0x0F;
                self.regs.a = (self.regs.a & 0xF0) | (mem >> 4);
                bus.write(self.regs.hl(), (mem << 4) | low_a);
                self.regs.f = (self.regs.f & CF) | crate::flags::sz53p(self.regs.a);
            }

            // Block transfer
            0xA0 => self.block_ld(bus, 1, false),
            0xA8 => self.block_ld(bus, -1, false),
            0xB0 => self.block_ld(bus, 1, true),
            0xB8 => self.block_ld(bus, -1, true),

            // Block compare
            0xA1 => self.block_cp(bus, 1, false),
            0xA9 => self.block_cp(bus, -1, false),
            0xB1 => self.block_cp(bus, 1, true),
            0xB9 => self.block_cp(bus, -1, true),

            // Block input
            0xA2 => self.block_in(bus, 1, false),
            0xAA => self.block_in(bus, -1, false),
            0xB2 => self.block_in(bus, 1, true),
            0xBA => self.block_in(bus, -1, true),

            // Block output
            0xA3 => self.block_out(bus, 1, false),
            0xAB => self.block_out(bus, -1, false),
            0xB3 => self.block_out(bus, 1, true),
            0xBB => self.block_out(bus, -1, true),

            // Every other ED opcode is a hole: the two fetches are the
            // whole cost, and we log the first occurrence.
            _ => self.log_unknown_ed(op),
        }
    }

    /// LDI/LDD/LDIR/LDDR.
    fn block_ld<B: IoBus>(&mut self, bus: &mut B, dir: i16, repeat: bool) {
        let value = bus.read(self.regs.hl(), false);
        bus.write(self.regs.de(), value);
        bus.tick(2);

        self.regs.set_hl(self.regs.hl().wrapping_add(dir as u16));
        self.regs.set_de(self.regs.de().wrapping_add(dir as u16));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        // Undocumented: bits 3 and 5 of F come from (A + transferred byte),
        // with bit 1 of that sum landing in bit 5.
        let n = self.regs.a.wrapping_add(value);
        self.regs.f = (self.regs.f & (SF | ZF | CF))
            | (n & XF)
            | ((n & 0x02) << 4)
            | if bc != 0 { PF } else { 0 };

        if repeat && bc != 0 {
            bus.tick(5);
            self.regs.pc = self.regs.pc.wrapping_sub(2);
        }
    }

    /// CPI/CPD/CPIR/CPDR.
    fn block_cp<B: IoBus>(&mut self, bus: &mut B, dir: i16, repeat: bool) {
        let value = bus.read(self.regs.hl(), false);
        bus.tick(5);

        let result = self.regs.a.wrapping_sub(value);
        let half = (self.regs.a & 0x0F) < (value & 0x0F);

        self.regs.set_hl(self.regs.hl().wrapping_add(dir as u16));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        // Bits 3/5 from (result - H), H folded in first.
        let n = result.wrapping_sub(u8::from(half));
        let mut f = (self.regs.f & CF) | NF | (n & XF) | ((n & 0x02) << 4);
        if result == 0 {
            f |= ZF;
        }
        if result & 0x80 != 0 {
            f |= SF;
        }
        if half {
            f |= HF;
        }
        if bc != 0 {
            f |= PF;
        }
        self.regs.f = f;

        if repeat && bc != 0 && result != 0 {
            bus.tick(5);
            self.regs.pc = self.regs.pc.wrapping_sub(2);
        }
    }

    /// INI/IND/INIR/INDR.
    fn block_in<B: IoBus>(&mut self, bus: &mut B, dir: i16, repeat: bool) {
        bus.tick(1);
        let value = bus.read_port(self.regs.c);
        bus.write(self.regs.hl(), value);

        self.regs.set_hl(self.regs.hl().wrapping_add(dir as u16));
        let c_next = self.regs.c.wrapping_add(dir as u8);
        self.regs.b = self.regs.b.wrapping_sub(1);

        self.regs.f = block_io_flags(self.regs.b, value, c_next);

        if repeat && self.regs.b != 0 {
            bus.tick(5);
            self.regs.pc = self.regs.pc.wrapping_sub(2);
        }
    }

    /// OUTI/OUTD/OTIR/OTDR. B is decremented before the output cycle.
    fn block_out<B: IoBus>(&mut self, bus: &mut B, dir: i16, repeat: bool) {
        bus.tick(1);
        let value = bus.read(self.regs.hl(), false);
        self.regs.b = self.regs.b.wrapping_sub(1);
        bus.write_port(self.regs.c, value);

        self.regs.set_hl(self.regs.hl().wrapping_add(dir as u16));

        self.regs.f = block_io_flags(self.regs.b, value, self.regs.l);

        if repeat && self.regs.b != 0 {
            bus.tick(5);
            self.regs.pc = self.regs.pc.wrapping_sub(2);
        }
    }
}

/// Shared undocumented flag computation for the I/O block ops: S/Z and the
/// bit copies from the new B, N from bit 7 of the transferred byte, H and C
/// from the 9-bit sum of the byte and the companion operand, P from the
/// parity of that sum's low bits XORed with B.
fn block_io_flags(b: u8, value: u8, companion: u8) -> u8 {
    let k = u16::from(value) + u16::from(companion);
    let mut f = sz53(b);
    if value & 0x80 != 0 {
        f |= NF;
    }
    if k > 0xFF {
        f |= HF | CF;
    }
    if parity((k as u8 & 0x07) ^ b) {
        f |= PF;
    }
    f
}
