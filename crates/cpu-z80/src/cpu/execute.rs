//! Instruction decode and execution.
//!
//! One `match` per prefix table. Instruction helpers return a [`Step`]
//! (length in bytes, base cycle cost); PC moves once per instruction, at
//! the end, which keeps `is_m1_cycle()` and the repeating block
//! instructions (negative length: PC rewinds to the instruction start)
//! honest.

use emu_core::Bus;

use crate::flags::{CF, HF, NF, PF, SF, VF, XF, YF, ZF, ZS, ZSP, ZSPH, ZSPXY, ZSXY};
use crate::policy::CpuPolicy;

use super::{CpuCore, Step};

/// Which index register a DD/FD prefix selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexReg {
    Ix,
    Iy,
}

impl<P: CpuPolicy> CpuCore<P> {
    // =========================================================================
    // Register/condition decoding helpers
    // =========================================================================

    /// 8-bit register by opcode field: 0=B 1=C 2=D 3=E 4=H 5=L 7=A.
    fn get_r(&self, idx: u8) -> u8 {
        match idx {
            0 => self.regs.b(),
            1 => self.regs.c(),
            2 => self.regs.d(),
            3 => self.regs.e(),
            4 => self.regs.h(),
            5 => self.regs.l(),
            7 => self.regs.a(),
            _ => unreachable!("(hl) handled by caller"),
        }
    }

    fn set_r(&mut self, idx: u8, value: u8) {
        match idx {
            0 => self.regs.set_b(value),
            1 => self.regs.set_c(value),
            2 => self.regs.set_d(value),
            3 => self.regs.set_e(value),
            4 => self.regs.set_h(value),
            5 => self.regs.set_l(value),
            7 => self.regs.set_a(value),
            _ => unreachable!("(hl) handled by caller"),
        }
    }

    /// Like [`Self::get_r`] but H/L name the halves of IX/IY.
    fn get_r_ixy(&self, idx: u8, index: IndexReg) -> u8 {
        match (idx, index) {
            (4, IndexReg::Ix) => self.regs.ixh(),
            (5, IndexReg::Ix) => self.regs.ixl(),
            (4, IndexReg::Iy) => self.regs.iyh(),
            (5, IndexReg::Iy) => self.regs.iyl(),
            _ => self.get_r(idx),
        }
    }

    fn set_r_ixy(&mut self, idx: u8, index: IndexReg, value: u8) {
        match (idx, index) {
            (4, IndexReg::Ix) => self.regs.set_ixh(value),
            (5, IndexReg::Ix) => self.regs.set_ixl(value),
            (4, IndexReg::Iy) => self.regs.set_iyh(value),
            (5, IndexReg::Iy) => self.regs.set_iyl(value),
            _ => self.set_r(idx, value),
        }
    }

    /// Register pair by opcode field: 0=BC 1=DE 2=HL 3=SP.
    fn get_rp(&self, idx: u8) -> u16 {
        match idx {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            _ => self.regs.sp(),
        }
    }

    fn set_rp(&mut self, idx: u8, value: u16) {
        match idx {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.regs.set_hl(value),
            _ => self.regs.set_sp(value),
        }
    }

    fn get_ixy(&self, index: IndexReg) -> u16 {
        match index {
            IndexReg::Ix => self.regs.ix(),
            IndexReg::Iy => self.regs.iy(),
        }
    }

    fn set_ixy(&mut self, index: IndexReg, value: u16) {
        match index {
            IndexReg::Ix => self.regs.set_ix(value),
            IndexReg::Iy => self.regs.set_iy(value),
        }
    }

    /// Condition by opcode field: 0=NZ 1=Z 2=NC 3=C 4=PO 5=PE 6=P 7=M.
    fn cond(&self, idx: u8) -> bool {
        let f = self.regs.f();
        match idx {
            0 => f & ZF == 0,
            1 => f & ZF != 0,
            2 => f & CF == 0,
            3 => f & CF != 0,
            4 => f & VF == 0,
            5 => f & VF != 0,
            6 => f & SF == 0,
            _ => f & SF != 0,
        }
    }

    // =========================================================================
    // ALU helpers
    // =========================================================================

    fn alu_add(&mut self, reg: u8) {
        let a = self.regs.a();
        let res = u16::from(a) + u16::from(reg);
        let r = res as u8;
        let mut f = if res & 0x100 != 0 { CF } else { 0 };
        f |= (a ^ r ^ reg) & HF;
        f |= ((a ^ r) & (reg ^ r) & 0x80) >> 5; // V
        if P::IS_R800 {
            f |= ZS[r as usize] | (self.regs.f() & (XF | YF));
        } else {
            f |= ZSXY[r as usize];
        }
        self.regs.set_f(f);
        self.regs.set_a(r);
    }

    fn alu_adc(&mut self, reg: u8) {
        let a = self.regs.a();
        let c = u16::from(self.regs.f() & CF);
        let res = u16::from(a) + u16::from(reg) + c;
        let r = res as u8;
        let mut f = if res & 0x100 != 0 { CF } else { 0 };
        f |= (a ^ r ^ reg) & HF;
        f |= ((a ^ r) & (reg ^ r) & 0x80) >> 5;
        if P::IS_R800 {
            f |= ZS[r as usize] | (self.regs.f() & (XF | YF));
        } else {
            f |= ZSXY[r as usize];
        }
        self.regs.set_f(f);
        self.regs.set_a(r);
    }

    fn alu_sub(&mut self, reg: u8) {
        let a = self.regs.a();
        let res = u16::from(a).wrapping_sub(u16::from(reg));
        let r = res as u8;
        let mut f = NF | if res & 0x100 != 0 { CF } else { 0 };
        f |= (a ^ r ^ reg) & HF;
        f |= ((reg ^ a) & (a ^ r) & 0x80) >> 5;
        if P::IS_R800 {
            f |= ZS[r as usize] | (self.regs.f() & (XF | YF));
        } else {
            f |= ZSXY[r as usize];
        }
        self.regs.set_f(f);
        self.regs.set_a(r);
    }

    fn alu_sbc(&mut self, reg: u8) {
        let a = self.regs.a();
        let c = u32::from(self.regs.f() & CF);
        // Wide arithmetic: A - n - 1 can borrow through bit 8 entirely.
        let res = u32::from(a)
            .wrapping_sub(u32::from(reg))
            .wrapping_sub(c);
        let r = res as u8;
        let mut f = NF | if res & 0x100 != 0 { CF } else { 0 };
        f |= (a ^ r ^ reg) & HF;
        f |= ((reg ^ a) & (a ^ r) & 0x80) >> 5;
        if P::IS_R800 {
            f |= ZS[r as usize] | (self.regs.f() & (XF | YF));
        } else {
            f |= ZSXY[r as usize];
        }
        self.regs.set_f(f);
        self.regs.set_a(r);
    }

    fn alu_and(&mut self, reg: u8) {
        let r = self.regs.a() & reg;
        self.regs.set_a(r);
        let f = if P::IS_R800 {
            ZSPH[r as usize] | (self.regs.f() & (XF | YF))
        } else {
            ZSPXY[r as usize] | HF
        };
        self.regs.set_f(f);
    }

    fn alu_xor(&mut self, reg: u8) {
        let r = self.regs.a() ^ reg;
        self.regs.set_a(r);
        let f = if P::IS_R800 {
            ZSP[r as usize] | (self.regs.f() & (XF | YF))
        } else {
            ZSPXY[r as usize]
        };
        self.regs.set_f(f);
    }

    fn alu_or(&mut self, reg: u8) {
        let r = self.regs.a() | reg;
        self.regs.set_a(r);
        let f = if P::IS_R800 {
            ZSP[r as usize] | (self.regs.f() & (XF | YF))
        } else {
            ZSPXY[r as usize]
        };
        self.regs.set_f(f);
    }

    fn alu_cp(&mut self, reg: u8) {
        let a = self.regs.a();
        let res = u16::from(a).wrapping_sub(u16::from(reg));
        let r = res as u8;
        let mut f = ZS[r as usize] | NF | if res & 0x100 != 0 { CF } else { 0 };
        f |= (a ^ r ^ reg) & HF;
        f |= ((reg ^ a) & (a ^ r) & 0x80) >> 5;
        if P::IS_R800 {
            f |= self.regs.f() & (XF | YF);
        } else {
            // X/Y come from the operand, not the result.
            f |= reg & (XF | YF);
        }
        self.regs.set_f(f);
    }

    /// ALU family by opcode bits 5-3: 0=ADD 1=ADC 2=SUB 3=SBC 4=AND 5=XOR
    /// 6=OR 7=CP.
    fn alu_dispatch(&mut self, family: u8, value: u8) {
        match family {
            0 => self.alu_add(value),
            1 => self.alu_adc(value),
            2 => self.alu_sub(value),
            3 => self.alu_sbc(value),
            4 => self.alu_and(value),
            5 => self.alu_xor(value),
            6 => self.alu_or(value),
            _ => self.alu_cp(value),
        }
    }

    fn do_inc(&mut self, reg: u8) -> u8 {
        let r = reg.wrapping_add(1);
        let mut f = ((r & r.wrapping_neg() & 0x80) >> 5) | (r & 0x0F).wrapping_sub(1) & HF;
        if P::IS_R800 {
            f |= self.regs.f() & (CF | XF | YF);
            f |= ZS[r as usize];
        } else {
            f |= self.regs.f() & CF;
            f |= ZSXY[r as usize];
        }
        self.regs.set_f(f);
        r
    }

    fn do_dec(&mut self, reg: u8) -> u8 {
        let r = reg.wrapping_sub(1);
        let mut f = ((reg & !r & 0x80) >> 5) | (r & 0x0F).wrapping_add(1) & HF | NF;
        if P::IS_R800 {
            f |= self.regs.f() & (CF | XF | YF);
            f |= ZS[r as usize];
        } else {
            f |= self.regs.f() & CF;
            f |= ZSXY[r as usize];
        }
        self.regs.set_f(f);
        r
    }

    /// ADD rr,rr flags (S/Z/V preserved).
    fn add16(&mut self, reg1: u16, reg2: u16) -> u16 {
        self.regs.set_memptr(reg1.wrapping_add(1));
        let res = u32::from(reg1) + u32::from(reg2);
        let mut f = (((reg1 ^ res as u16 ^ reg2) >> 8) as u8 & HF) | ((res >> 16) as u8 & CF);
        if P::IS_R800 {
            f |= self.regs.f() & (SF | ZF | VF | XF | YF);
        } else {
            f |= self.regs.f() & (SF | ZF | VF);
            f |= (res >> 8) as u8 & (XF | YF);
        }
        self.regs.set_f(f);
        res as u16
    }

    fn adc16(&mut self, reg: u16) {
        let hl = self.regs.hl();
        self.regs.set_memptr(hl.wrapping_add(1));
        let c = u32::from(self.regs.f() & CF);
        let res = u32::from(hl) + u32::from(reg) + c;
        let r = res as u16;
        let mut f = (res >> 16) as u8 & CF;
        if P::IS_R800 {
            f |= self.regs.f() & (XF | YF);
        }
        if r != 0 {
            f |= ((hl ^ r ^ reg) >> 8) as u8 & HF;
            f |= (((hl ^ r) & (reg ^ r) & 0x8000) >> 13) as u8; // V
            if P::IS_R800 {
                f |= (r >> 8) as u8 & SF;
            } else {
                f |= (r >> 8) as u8 & (SF | XF | YF);
            }
        } else {
            f |= ((hl ^ reg) >> 8) as u8 & HF;
            f |= ZF;
            f |= ((hl & reg & 0x8000) >> 13) as u8;
        }
        self.regs.set_f(f);
        self.regs.set_hl(r);
    }

    fn sbc16(&mut self, reg: u16) {
        let hl = self.regs.hl();
        self.regs.set_memptr(hl.wrapping_add(1));
        let c = u32::from(self.regs.f() & CF);
        let res = u32::from(hl).wrapping_sub(u32::from(reg)).wrapping_sub(c);
        let r = res as u16;
        let mut f = NF | if res & 0x1_0000 != 0 { CF } else { 0 };
        if P::IS_R800 {
            f |= self.regs.f() & (XF | YF);
        }
        if r != 0 {
            f |= ((hl ^ r ^ reg) >> 8) as u8 & HF;
            f |= (((reg ^ hl) & (hl ^ r) & 0x8000) >> 13) as u8;
            if P::IS_R800 {
                f |= (r >> 8) as u8 & SF;
            } else {
                f |= (r >> 8) as u8 & (SF | XF | YF);
            }
        } else {
            f |= ((hl ^ reg) >> 8) as u8 & HF;
            f |= ZF;
            f |= (((reg ^ hl) & hl & 0x8000) >> 13) as u8;
        }
        self.regs.set_f(f);
        self.regs.set_hl(r);
    }

    /// Rotate/shift family by CB opcode bits 5-3: 0=RLC 1=RRC 2=RL 3=RR
    /// 4=SLA 5=SRA 6=SLL 7=SRL.
    fn rot_shift(&mut self, kind: u8, reg: u8) -> u8 {
        let old_f = self.regs.f();
        let (r, c) = match kind {
            0 => ((reg << 1) | (reg >> 7), reg >> 7),
            1 => ((reg >> 1) | (reg << 7), reg & 1),
            2 => ((reg << 1) | (old_f & CF), reg >> 7),
            3 => ((reg >> 1) | ((old_f & CF) << 7), reg & 1),
            4 => (reg << 1, reg >> 7),
            5 => ((reg >> 1) | (reg & 0x80), reg & 1),
            6 => {
                debug_assert!(!P::IS_R800, "SLL exists on Z80 only");
                ((reg << 1) | 1, reg >> 7)
            }
            _ => (reg >> 1, reg & 1),
        };
        let mut f = if c != 0 { CF } else { 0 };
        if P::IS_R800 {
            f |= ZSP[r as usize] | (old_f & (XF | YF));
        } else {
            f |= ZSPXY[r as usize];
        }
        self.regs.set_f(f);
        r
    }

    /// The R800 replacement for the CB 30-37 opcodes: C takes bit 7 of A,
    /// S/Z/P/H/V/N clear, X/Y preserved. The operand bits are ignored.
    fn r800_sll2_flags(&mut self) {
        let f = (self.regs.f() & (XF | YF)) | (self.regs.a() >> 7);
        self.regs.set_f(f);
    }

    // =========================================================================
    // Main (unprefixed) instructions
    // =========================================================================

    pub(crate) fn exec_main<B: Bus>(&mut self, bus: &mut B, op: u8) -> Step {
        match op {
            // NOP, and LD r,r with identical operands
            0x00 | 0x40 | 0x49 | 0x52 | 0x5B | 0x64 | 0x6D | 0x7F => Step::new(1, P::CC_NOP),

            // LD rr,nn
            0x01 | 0x11 | 0x21 | 0x31 => {
                let value = self.rd_word_pc(bus, 1, P::CC_LD_SS_NN_1);
                self.set_rp((op >> 4) & 3, value);
                Step::new(3, P::CC_LD_SS_NN)
            }

            // LD (BC),A / LD (DE),A
            0x02 | 0x12 => {
                let addr = self.get_rp((op >> 4) & 3);
                let a = self.regs.a();
                self.regs
                    .set_memptr((u16::from(a) << 8) | (addr.wrapping_add(1) & 0xFF));
                self.wrmem(bus, addr, a, P::CC_LD_SS_A_1);
                Step::new(1, P::CC_LD_SS_A)
            }

            // LD A,(BC) / LD A,(DE)
            0x0A | 0x1A => {
                let addr = self.get_rp((op >> 4) & 3);
                self.regs.set_memptr(addr.wrapping_add(1));
                let value = self.rdmem(bus, addr, P::CC_LD_A_SS_1);
                self.regs.set_a(value);
                Step::new(1, P::CC_LD_A_SS)
            }

            // INC rr / DEC rr
            0x03 | 0x13 | 0x23 | 0x33 => {
                let idx = (op >> 4) & 3;
                self.set_rp(idx, self.get_rp(idx).wrapping_add(1));
                Step::new(1, P::CC_INC_SS)
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                let idx = (op >> 4) & 3;
                self.set_rp(idx, self.get_rp(idx).wrapping_sub(1));
                Step::new(1, P::CC_INC_SS)
            }

            // INC r / DEC r
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x3C => {
                let idx = (op >> 3) & 7;
                let value = self.get_r(idx);
                let value = self.do_inc(value);
                self.set_r(idx, value);
                Step::new(1, P::CC_INC_R)
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x3D => {
                let idx = (op >> 3) & 7;
                let value = self.get_r(idx);
                let value = self.do_dec(value);
                self.set_r(idx, value);
                Step::new(1, P::CC_INC_R)
            }

            // INC (HL) / DEC (HL)
            0x34 => {
                let addr = self.regs.hl();
                let value = self.rdmem(bus, addr, P::CC_INC_XHL_1);
                let value = self.do_inc(value);
                self.wrmem(bus, addr, value, P::CC_INC_XHL_2);
                Step::new(1, P::CC_INC_XHL)
            }
            0x35 => {
                let addr = self.regs.hl();
                let value = self.rdmem(bus, addr, P::CC_INC_XHL_1);
                let value = self.do_dec(value);
                self.wrmem(bus, addr, value, P::CC_INC_XHL_2);
                Step::new(1, P::CC_INC_XHL)
            }

            // LD r,n
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => {
                let value = self.rdmem_opcode(bus, 1, P::CC_LD_R_N_1);
                self.set_r((op >> 3) & 7, value);
                Step::new(2, P::CC_LD_R_N)
            }

            // LD (HL),n
            0x36 => {
                let value = self.rdmem_opcode(bus, 1, P::CC_LD_HL_N_1);
                let addr = self.regs.hl();
                self.wrmem(bus, addr, value, P::CC_LD_HL_N_2);
                Step::new(2, P::CC_LD_HL_N)
            }

            // RLCA / RRCA / RLA / RRA
            0x07 => {
                let a = self.regs.a();
                let r = (a << 1) | (a >> 7);
                self.regs.set_a(r);
                let f = if P::IS_R800 {
                    (self.regs.f() & (SF | ZF | PF | XF | YF)) | (r & CF)
                } else {
                    (self.regs.f() & (SF | ZF | PF)) | (r & (YF | XF | CF))
                };
                self.regs.set_f(f);
                Step::new(1, P::CC_RLA)
            }
            0x0F => {
                let a = self.regs.a();
                let c = a & CF;
                let r = (a >> 1) | (a << 7);
                self.regs.set_a(r);
                let f = if P::IS_R800 {
                    (self.regs.f() & (SF | ZF | PF | XF | YF)) | c
                } else {
                    (self.regs.f() & (SF | ZF | PF)) | (r & (XF | YF)) | c
                };
                self.regs.set_f(f);
                Step::new(1, P::CC_RLA)
            }
            0x17 => {
                let a = self.regs.a();
                let old_c = self.regs.f() & CF;
                let new_c = a >> 7;
                let r = (a << 1) | old_c;
                self.regs.set_a(r);
                let f = if P::IS_R800 {
                    (self.regs.f() & (SF | ZF | PF | XF | YF)) | new_c
                } else {
                    (self.regs.f() & (SF | ZF | PF)) | (r & (XF | YF)) | new_c
                };
                self.regs.set_f(f);
                Step::new(1, P::CC_RLA)
            }
            0x1F => {
                let a = self.regs.a();
                let old_c = (self.regs.f() & CF) << 7;
                let new_c = a & CF;
                let r = (a >> 1) | old_c;
                self.regs.set_a(r);
                let f = if P::IS_R800 {
                    (self.regs.f() & (SF | ZF | PF | XF | YF)) | new_c
                } else {
                    (self.regs.f() & (SF | ZF | PF)) | (r & (XF | YF)) | new_c
                };
                self.regs.set_f(f);
                Step::new(1, P::CC_RLA)
            }

            // EX AF,AF'
            0x08 => {
                let t = self.regs.af2();
                self.regs.set_af2(self.regs.af());
                self.regs.set_af(t);
                Step::new(1, P::CC_EX)
            }

            // ADD HL,rr
            0x09 | 0x19 | 0x29 | 0x39 => {
                let reg2 = self.get_rp((op >> 4) & 3);
                let res = self.add16(self.regs.hl(), reg2);
                self.regs.set_hl(res);
                Step::new(1, P::CC_ADD_HL_SS)
            }

            // DJNZ e
            0x10 => {
                let b = self.regs.b().wrapping_sub(1);
                self.regs.set_b(b);
                let ofst = self.rdmem_opcode(bus, 1, P::CC_JR_1 + P::EE_DJNZ) as i8;
                if b != 0 {
                    self.jump_relative(ofst);
                    Step::new(0, P::CC_JR_A + P::EE_DJNZ)
                } else {
                    Step::new(2, P::CC_JR_B + P::EE_DJNZ)
                }
            }

            // JR e / JR cc,e
            0x18 => {
                let ofst = self.rdmem_opcode(bus, 1, P::CC_JR_1) as i8;
                self.jump_relative(ofst);
                Step::new(0, P::CC_JR_A)
            }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let ofst = self.rdmem_opcode(bus, 1, P::CC_JR_1) as i8;
                if self.cond((op >> 3) & 3) {
                    self.jump_relative(ofst);
                    Step::new(0, P::CC_JR_A)
                } else {
                    Step::new(2, P::CC_JR_B)
                }
            }

            // LD (nn),HL / LD HL,(nn)
            0x22 => self.ld_xword_rp(bus, self.regs.hl(), 0),
            0x2A => {
                let value = self.ld_rp_xword(bus, 0);
                self.regs.set_hl(value);
                Step::new(3, P::CC_LD_HL_XX)
            }

            // LD (nn),A / LD A,(nn)
            0x32 => {
                let addr = self.rd_word_pc(bus, 1, P::CC_LD_NN_A_1);
                let a = self.regs.a();
                self.regs
                    .set_memptr((u16::from(a) << 8) | (addr.wrapping_add(1) & 0xFF));
                self.wrmem(bus, addr, a, P::CC_LD_NN_A_2);
                Step::new(3, P::CC_LD_NN_A)
            }
            0x3A => {
                let addr = self.rd_word_pc(bus, 1, P::CC_LD_A_NN_1);
                self.regs.set_memptr(addr.wrapping_add(1));
                let value = self.rdmem(bus, addr, P::CC_LD_A_NN_2);
                self.regs.set_a(value);
                Step::new(3, P::CC_LD_A_NN)
            }

            // DAA
            0x27 => {
                let a = self.regs.a();
                let f = self.regs.f();
                let mut adjust = 0u8;
                if f & HF != 0 || (a & 0x0F) > 9 {
                    adjust += 0x06;
                }
                if f & CF != 0 || a > 0x99 {
                    adjust += 0x60;
                }
                let r = if f & NF != 0 {
                    a.wrapping_sub(adjust)
                } else {
                    a.wrapping_add(adjust)
                };
                let mut new_f = if P::IS_R800 {
                    (f & (CF | NF | XF | YF)) | ZSP[r as usize]
                } else {
                    (f & (CF | NF)) | ZSPXY[r as usize]
                };
                if a > 0x99 {
                    new_f |= CF;
                }
                new_f |= (a ^ r) & HF;
                self.regs.set_a(r);
                self.regs.set_f(new_f);
                Step::new(1, P::CC_DAA)
            }

            // CPL
            0x2F => {
                let r = self.regs.a() ^ 0xFF;
                self.regs.set_a(r);
                let f = if P::IS_R800 {
                    self.regs.f() | HF | NF
                } else {
                    (self.regs.f() & (SF | ZF | PF | CF)) | HF | NF | (r & (XF | YF))
                };
                self.regs.set_f(f);
                Step::new(1, P::CC_CPL)
            }

            // SCF
            0x37 => {
                let old_f = self.regs.f();
                let f = if P::IS_R800 {
                    (old_f & (SF | ZF | PF | XF | YF)) | CF
                } else {
                    // X/Y are only ever set, never cleared, by SCF.
                    (old_f & (SF | ZF | PF)) | ((old_f | self.regs.a()) & (XF | YF)) | CF
                };
                self.regs.set_f(f);
                Step::new(1, P::CC_SCF)
            }

            // CCF
            0x3F => {
                let old_f = self.regs.f();
                let mut f = if P::IS_R800 {
                    // H is preserved (on Z80 it takes the old C).
                    old_f & (SF | ZF | PF | CF | XF | YF | HF)
                } else {
                    ((old_f & CF) << 4)
                        | (old_f & (SF | ZF | PF | CF))
                        | ((old_f | self.regs.a()) & (XF | YF))
                };
                f ^= CF;
                self.regs.set_f(f);
                Step::new(1, P::CC_CCF)
            }

            // HALT
            0x76 => {
                self.regs.set_halt(true);
                self.set_slow_instructions();
                Step::new(1, P::CC_HALT)
            }

            // LD r,(HL)
            0x46 | 0x4E | 0x56 | 0x5E | 0x66 | 0x6E | 0x7E => {
                let value = self.rdmem(bus, self.regs.hl(), P::CC_LD_R_HL_1);
                self.set_r((op >> 3) & 7, value);
                Step::new(1, P::CC_LD_R_HL)
            }

            // LD (HL),r
            0x70..=0x75 | 0x77 => {
                let value = self.get_r(op & 7);
                self.wrmem(bus, self.regs.hl(), value, P::CC_LD_HL_R_1);
                Step::new(1, P::CC_LD_HL_R)
            }

            // LD r,r'
            0x41..=0x7D => {
                let value = self.get_r(op & 7);
                self.set_r((op >> 3) & 7, value);
                Step::new(1, P::CC_LD_R_R)
            }

            // ALU A,(HL)
            0x86 | 0x8E | 0x96 | 0x9E | 0xA6 | 0xAE | 0xB6 | 0xBE => {
                let value = self.rdmem(bus, self.regs.hl(), P::CC_CP_XHL_1);
                self.alu_dispatch((op >> 3) & 7, value);
                Step::new(1, P::CC_CP_XHL)
            }

            // ALU A,r
            0x80..=0xBF => {
                let value = self.get_r(op & 7);
                self.alu_dispatch((op >> 3) & 7, value);
                Step::new(1, P::CC_CP_R)
            }

            // ALU A,n
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let value = self.rdmem_opcode(bus, 1, P::CC_CP_N_1);
                self.alu_dispatch((op >> 3) & 7, value);
                Step::new(2, P::CC_CP_N)
            }

            // RET cc / RET
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
                self.do_ret(bus, self.cond((op >> 3) & 7), P::EE_RET_C)
            }
            0xC9 => self.do_ret(bus, true, 0),

            // JP cc,nn / JP nn
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
                self.do_jp(bus, self.cond((op >> 3) & 7))
            }
            0xC3 => self.do_jp(bus, true),

            // CALL cc,nn / CALL nn
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                self.do_call(bus, self.cond((op >> 3) & 7))
            }
            0xCD => self.do_call(bus, true),

            // POP rr / PUSH rr (3 = AF)
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let value = self.pop16(bus, 0);
                match (op >> 4) & 3 {
                    0 => self.regs.set_bc(value),
                    1 => self.regs.set_de(value),
                    2 => self.regs.set_hl(value),
                    _ => self.regs.set_af(value),
                }
                Step::new(1, P::CC_POP)
            }
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                let value = match (op >> 4) & 3 {
                    0 => self.regs.bc(),
                    1 => self.regs.de(),
                    2 => self.regs.hl(),
                    _ => self.regs.af(),
                };
                self.push16(bus, value, 0);
                Step::new(1, P::CC_PUSH)
            }

            // RST n
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                let target = u16::from(op & 0x38);
                let pc = self.regs.pc().wrapping_add(1);
                self.push16(bus, pc, 0);
                self.regs.set_memptr(target);
                self.regs.set_pc(target);
                if P::IS_R800 {
                    self.regs.set_current_call();
                    self.set_slow_instructions();
                }
                Step::new(0, P::CC_RST)
            }

            // OUT (n),A / IN A,(n)
            0xD3 => {
                let port = self.rdmem_opcode(bus, 1, P::CC_OUT_N_A_1);
                let a = self.regs.a();
                let full = (u16::from(a) << 8) | u16::from(port);
                self.regs
                    .set_memptr((u16::from(a) << 8) | u16::from(port.wrapping_add(1)));
                self.policy_even_cycle(P::CC_OUT_N_A_2);
                self.write_port(bus, full, a, P::CC_OUT_N_A_2);
                Step::new(2, P::CC_OUT_N_A)
            }
            0xDB => {
                let port = self.rdmem_opcode(bus, 1, P::CC_IN_A_N_1);
                let full = (u16::from(self.regs.a()) << 8) | u16::from(port);
                self.regs.set_memptr(full.wrapping_add(1));
                self.policy_even_cycle(P::CC_IN_A_N_2);
                let value = self.read_port(bus, full, P::CC_IN_A_N_2);
                self.regs.set_a(value);
                Step::new(2, P::CC_IN_A_N)
            }

            // EXX / EX DE,HL / EX (SP),HL
            0xD9 => {
                let t1 = self.regs.bc2();
                self.regs.set_bc2(self.regs.bc());
                self.regs.set_bc(t1);
                let t2 = self.regs.de2();
                self.regs.set_de2(self.regs.de());
                self.regs.set_de(t2);
                let t3 = self.regs.hl2();
                self.regs.set_hl2(self.regs.hl());
                self.regs.set_hl(t3);
                Step::new(1, P::CC_EX)
            }
            0xEB => {
                let t = self.regs.de();
                self.regs.set_de(self.regs.hl());
                self.regs.set_hl(t);
                Step::new(1, P::CC_EX)
            }
            0xE3 => {
                let value = self.regs.hl();
                let res = self.ex_sp(bus, value, 0);
                self.regs.set_hl(res);
                Step::new(1, P::CC_EX_SP_HL)
            }

            // JP (HL) / LD SP,HL
            0xE9 => {
                self.regs.set_pc(self.regs.hl());
                Step::new(0, P::CC_JP_HL)
            }
            0xF9 => {
                self.regs.set_sp(self.regs.hl());
                Step::new(1, P::CC_LD_SP_HL)
            }

            // DI / EI
            0xF3 => {
                self.regs.set_iff1(false);
                self.regs.set_iff2(false);
                Step::new(1, P::CC_DI)
            }
            0xFB => {
                self.regs.set_iff1(true);
                self.regs.set_iff2(true);
                self.regs.set_current_ei(); // no IRQ accepted after this one
                self.set_slow_instructions();
                Step::new(1, P::CC_EI)
            }

            // Prefixes
            0xCB => self.exec_cb(bus),
            0xED => self.exec_ed(bus),
            0xDD => self.exec_prefixed(bus, IndexReg::Ix),
            0xFD => self.exec_prefixed(bus, IndexReg::Iy),
        }
    }

    fn policy_even_cycle(&mut self, cc: u64) {
        self.policy.wait_for_even_cycle(&mut self.clock, cc);
    }

    /// Relative jump target with the R800 end-of-page quirk: even a
    /// backwards jump pays the page-break cycle when the instruction ends
    /// exactly on a page boundary, because the break decision is made
    /// before the destination is known.
    fn jump_relative(&mut self, ofst: i8) {
        let pc = self.regs.pc();
        if pc.wrapping_add(2) & 0xFF == 0 {
            self.policy.force_page_break();
        }
        let target = pc.wrapping_add(2).wrapping_add(ofst as i16 as u16);
        self.regs.set_pc(target);
        self.regs.set_memptr(target);
    }

    fn do_jp<B: Bus>(&mut self, bus: &mut B, taken: bool) -> Step {
        let addr = self.rd_word_pc(bus, 1, P::CC_JP_1);
        self.regs.set_memptr(addr);
        if taken {
            self.regs.set_pc(addr);
            Step::new(0, P::CC_JP_A)
        } else {
            Step::new(3, P::CC_JP_B)
        }
    }

    fn do_call<B: Bus>(&mut self, bus: &mut B, taken: bool) -> Step {
        let addr = self.rd_word_pc(bus, 1, P::CC_CALL_1);
        self.regs.set_memptr(addr);
        if taken {
            let ret = self.regs.pc().wrapping_add(3);
            self.push16(bus, ret, P::EE_CALL);
            self.regs.set_pc(addr);
            if P::IS_R800 {
                self.regs.set_current_call();
                self.set_slow_instructions();
            }
            Step::new(0, P::CC_CALL_A)
        } else {
            Step::new(3, P::CC_CALL_B)
        }
    }

    fn do_ret<B: Bus>(&mut self, bus: &mut B, taken: bool, ee: u64) -> Step {
        if taken {
            let addr = self.pop16(bus, ee);
            self.regs.set_memptr(addr);
            self.regs.set_pc(addr);
            Step::new(0, P::CC_RET_A + ee)
        } else {
            Step::new(1, P::CC_RET_B + ee)
        }
    }

    fn ex_sp<B: Bus>(&mut self, bus: &mut B, value: u16, ee: u64) -> u16 {
        let sp = self.regs.sp();
        let res = self.rd_word(bus, sp, P::CC_EX_SP_HL_1 + ee);
        self.regs.set_memptr(res);
        self.wr_word_rev(bus, sp, value, P::CC_EX_SP_HL_2 + ee);
        res
    }

    fn ld_xword_rp<B: Bus>(&mut self, bus: &mut B, value: u16, ee: u64) -> Step {
        let addr = self.rd_word_pc(bus, 1, P::CC_LD_XX_HL_1 + ee);
        self.regs.set_memptr(addr.wrapping_add(1));
        self.wr_word(bus, addr, value, P::CC_LD_XX_HL_2 + ee);
        Step::new(3, P::CC_LD_XX_HL + ee)
    }

    fn ld_rp_xword<B: Bus>(&mut self, bus: &mut B, ee: u64) -> u16 {
        let addr = self.rd_word_pc(bus, 1, P::CC_LD_HL_XX_1 + ee);
        self.regs.set_memptr(addr.wrapping_add(1));
        self.rd_word(bus, addr, P::CC_LD_HL_XX_2 + ee)
    }
}

impl<P: CpuPolicy> CpuCore<P> {
    // =========================================================================
    // CB prefix: rotates, shifts, bit operations
    // =========================================================================

    fn exec_cb<B: Bus>(&mut self, bus: &mut B) -> Step {
        self.regs.add_pc(1); // M1 cycle at this point
        let op = self.rdmem_opcode(bus, 0, P::CC_PREFIX);
        self.regs.incr_r(1);
        self.add_m1_wait();
        let idx = op & 7;
        let n = (op >> 3) & 7;
        match op >> 6 {
            0 => {
                if P::IS_R800 && n == 6 {
                    // All eight 30-37 encodings collapse into the same
                    // operation on R800, whatever the operand bits say.
                    self.r800_sll2_flags();
                    return Step::new(1, P::CC_SET_R);
                }
                if idx == 6 {
                    let addr = self.regs.hl();
                    let value = self.rdmem(bus, addr, P::CC_SET_XHL_1);
                    let value = self.rot_shift(n, value);
                    self.wrmem(bus, addr, value, P::CC_SET_XHL_2);
                    Step::new(1, P::CC_SET_XHL)
                } else {
                    let value = self.get_r(idx);
                    let value = self.rot_shift(n, value);
                    self.set_r(idx, value);
                    Step::new(1, P::CC_SET_R)
                }
            }
            1 => {
                // BIT n,r / BIT n,(HL)
                if idx == 6 {
                    let m = self.rdmem(bus, self.regs.hl(), P::CC_BIT_XHL_1) & (1 << n);
                    let f = if P::IS_R800 {
                        (self.regs.f() & (SF | VF | CF | XF | YF))
                            | HF
                            | if m != 0 { 0 } else { ZF }
                    } else {
                        // X/Y reflect the high byte of memptr, not the
                        // fetched operand.
                        ZSPH[m as usize]
                            | (self.regs.f() & CF)
                            | ((self.regs.memptr() >> 8) as u8 & (XF | YF))
                    };
                    self.regs.set_f(f);
                    Step::new(1, P::CC_BIT_XHL)
                } else {
                    let reg = self.get_r(idx);
                    let f = if P::IS_R800 {
                        (self.regs.f() & (SF | VF | CF | XF | YF))
                            | HF
                            | if reg & (1 << n) != 0 { 0 } else { ZF }
                    } else {
                        ZSPH[(reg & (1 << n)) as usize]
                            | (self.regs.f() & CF)
                            | (reg & (XF | YF))
                    };
                    self.regs.set_f(f);
                    Step::new(1, P::CC_BIT_R)
                }
            }
            2 => {
                // RES n,r / RES n,(HL)
                if idx == 6 {
                    let addr = self.regs.hl();
                    let value = self.rdmem(bus, addr, P::CC_SET_XHL_1) & !(1 << n);
                    self.wrmem(bus, addr, value, P::CC_SET_XHL_2);
                    Step::new(1, P::CC_SET_XHL)
                } else {
                    let value = self.get_r(idx) & !(1 << n);
                    self.set_r(idx, value);
                    Step::new(1, P::CC_SET_R)
                }
            }
            _ => {
                // SET n,r / SET n,(HL)
                if idx == 6 {
                    let addr = self.regs.hl();
                    let value = self.rdmem(bus, addr, P::CC_SET_XHL_1) | (1 << n);
                    self.wrmem(bus, addr, value, P::CC_SET_XHL_2);
                    Step::new(1, P::CC_SET_XHL)
                } else {
                    let value = self.get_r(idx) | (1 << n);
                    self.set_r(idx, value);
                    Step::new(1, P::CC_SET_R)
                }
            }
        }
    }

    // =========================================================================
    // ED prefix
    // =========================================================================

    fn exec_ed<B: Bus>(&mut self, bus: &mut B) -> Step {
        self.regs.add_pc(1); // M1 cycle at this point
        let op = self.rdmem_opcode(bus, 0, P::CC_PREFIX);
        self.regs.incr_r(1);
        self.add_m1_wait();
        match op {
            // IN r,(C); ED 70 reads the port and discards the result
            0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x70 | 0x78 => {
                self.policy_even_cycle(P::CC_IN_R_C_1);
                let bc = self.regs.bc();
                self.regs.set_memptr(bc.wrapping_add(1));
                let value = self.read_port(bus, bc, P::CC_IN_R_C_1);
                let f = if P::IS_R800 {
                    (self.regs.f() & (CF | XF | YF)) | ZSP[value as usize]
                } else {
                    (self.regs.f() & CF) | ZSPXY[value as usize]
                };
                self.regs.set_f(f);
                let idx = (op >> 3) & 7;
                if idx != 6 {
                    self.set_r(idx, value);
                }
                Step::new(1, P::CC_IN_R_C)
            }

            // OUT (C),r; ED 71 drives zero
            0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x71 | 0x79 => {
                self.policy_even_cycle(P::CC_OUT_C_R_1);
                let bc = self.regs.bc();
                self.regs.set_memptr(bc.wrapping_add(1));
                let idx = (op >> 3) & 7;
                let value = if idx == 6 { 0 } else { self.get_r(idx) };
                self.write_port(bus, bc, value, P::CC_OUT_C_R_1);
                Step::new(1, P::CC_OUT_C_R)
            }

            // SBC HL,rr / ADC HL,rr
            0x42 | 0x52 | 0x62 | 0x72 => {
                let reg = self.get_rp((op >> 4) & 3);
                self.sbc16(reg);
                Step::new(1, P::CC_ADC_HL_SS)
            }
            0x4A | 0x5A | 0x6A | 0x7A => {
                let reg = self.get_rp((op >> 4) & 3);
                self.adc16(reg);
                Step::new(1, P::CC_ADC_HL_SS)
            }

            // LD (nn),rr / LD rr,(nn)
            0x43 | 0x53 | 0x63 | 0x73 => {
                let value = self.get_rp((op >> 4) & 3);
                self.ld_xword_rp(bus, value, P::EE_ED)
            }
            0x4B | 0x5B | 0x6B | 0x7B => {
                let value = self.ld_rp_xword(bus, P::EE_ED);
                self.set_rp((op >> 4) & 3, value);
                Step::new(3, P::CC_LD_HL_XX + P::EE_ED)
            }

            // NEG (all undocumented aliases included)
            0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => {
                let a = self.regs.a();
                let res = 0u16.wrapping_sub(u16::from(a));
                let r = res as u8;
                let mut f = NF | if res & 0x100 != 0 { CF } else { 0 };
                f |= (r ^ a) & HF;
                f |= (a & r & 0x80) >> 5; // V (only set for A=0x80)
                if P::IS_R800 {
                    f |= ZS[r as usize] | (self.regs.f() & (XF | YF));
                } else {
                    f |= ZSXY[r as usize];
                }
                self.regs.set_f(f);
                self.regs.set_a(r);
                Step::new(1, P::CC_NEG)
            }

            // RETN / RETI and their aliases
            0x45 | 0x4D | 0x55 | 0x5D | 0x65 | 0x6D | 0x75 | 0x7D => {
                self.regs.set_iff1(self.regs.iff2());
                self.set_slow_instructions();
                self.do_ret(bus, true, P::EE_RETN)
            }

            // IM 0/1/2
            0x46 | 0x4E | 0x66 | 0x6E => {
                self.regs.set_im(0);
                Step::new(1, P::CC_IM)
            }
            0x56 | 0x76 => {
                self.regs.set_im(1);
                Step::new(1, P::CC_IM)
            }
            0x5E | 0x7E => {
                self.regs.set_im(2);
                Step::new(1, P::CC_IM)
            }

            // LD I,A / LD R,A / LD A,I / LD A,R
            0x47 => {
                self.regs.set_i(self.regs.a());
                Step::new(1, P::CC_LD_A_I)
            }
            0x4F => {
                // The R800 increments R at a different point relative to
                // the write; storing A-1 reproduces the observable value.
                let value = if P::IS_R800 {
                    self.regs.a().wrapping_sub(1)
                } else {
                    self.regs.a()
                };
                self.regs.set_r(value);
                Step::new(1, P::CC_LD_A_I)
            }
            0x57 | 0x5F => {
                let value = if op == 0x57 {
                    self.regs.i()
                } else {
                    self.regs.r()
                };
                self.regs.set_a(value);
                let mut f = if self.regs.iff2() { VF } else { 0 };
                if P::IS_R800 {
                    f |= self.regs.f() & (CF | XF | YF);
                    f |= ZS[value as usize];
                } else {
                    f |= self.regs.f() & CF;
                    f |= ZSXY[value as usize];
                    // Accepting an IRQ at the next boundary clears the V
                    // flag again; the slow loop handles that.
                    self.regs.set_current_ld_ai();
                    self.set_slow_instructions();
                }
                self.regs.set_f(f);
                Step::new(1, P::CC_LD_A_I)
            }

            // RRD / RLD
            0x67 => {
                let hl = self.regs.hl();
                let val = self.rdmem(bus, hl, P::CC_RLD_1);
                self.regs.set_memptr(hl.wrapping_add(1));
                let a = self.regs.a();
                self.wrmem(bus, hl, (val >> 4) | (a << 4), P::CC_RLD_2);
                let r = (a & 0xF0) | (val & 0x0F);
                self.regs.set_a(r);
                let f = if P::IS_R800 {
                    (self.regs.f() & (CF | XF | YF)) | ZSP[r as usize]
                } else {
                    (self.regs.f() & CF) | ZSPXY[r as usize]
                };
                self.regs.set_f(f);
                Step::new(1, P::CC_RLD)
            }
            0x6F => {
                let hl = self.regs.hl();
                let val = self.rdmem(bus, hl, P::CC_RLD_1);
                self.regs.set_memptr(hl.wrapping_add(1));
                let a = self.regs.a();
                self.wrmem(bus, hl, (val << 4) | (a & 0x0F), P::CC_RLD_2);
                let r = (a & 0xF0) | (val >> 4);
                self.regs.set_a(r);
                let f = if P::IS_R800 {
                    (self.regs.f() & (CF | XF | YF)) | ZSP[r as usize]
                } else {
                    (self.regs.f() & CF) | ZSPXY[r as usize]
                };
                self.regs.set_f(f);
                Step::new(1, P::CC_RLD)
            }

            // Block transfers / compares / I/O
            0xA0 => self.block_ld(bus, 1, false),
            0xA8 => self.block_ld(bus, -1, false),
            0xB0 => self.block_ld(bus, 1, true),
            0xB8 => self.block_ld(bus, -1, true),
            0xA1 => self.block_cp(bus, 1, false),
            0xA9 => self.block_cp(bus, -1, false),
            0xB1 => self.block_cp(bus, 1, true),
            0xB9 => self.block_cp(bus, -1, true),
            0xA2 => self.block_in(bus, 1, false),
            0xAA => self.block_in(bus, -1, false),
            0xB2 => self.block_in(bus, 1, true),
            0xBA => self.block_in(bus, -1, true),
            0xA3 => self.block_out(bus, 1, false),
            0xAB => self.block_out(bus, -1, false),
            0xB3 => self.block_out(bus, 1, true),
            0xBB => self.block_out(bus, -1, true),

            // MULUB A,r (R800 only; a two-byte NOP on Z80)
            0xC1 | 0xC9 | 0xD1 | 0xD9 if P::IS_R800 => {
                let reg = self.get_r((op >> 3) & 7);
                let res = u16::from(self.regs.a()) * u16::from(reg);
                self.regs.set_hl(res);
                let f = (self.regs.f() & (NF | HF | XF | YF))
                    | if res == 0 { ZF } else { 0 }
                    | if res & 0xFF00 != 0 { CF } else { 0 };
                self.regs.set_f(f);
                Step::new(1, P::CC_MULUB)
            }

            // MULUW HL,rr (R800 only)
            0xC3 | 0xF3 if P::IS_R800 => {
                let reg = self.get_rp((op >> 4) & 3);
                let res = u32::from(self.regs.hl()) * u32::from(reg);
                self.regs.set_de((res >> 16) as u16);
                self.regs.set_hl(res as u16);
                let f = (self.regs.f() & (NF | HF | XF | YF))
                    | if res == 0 { ZF } else { 0 }
                    | if res & 0xFFFF_0000 != 0 { CF } else { 0 };
                self.regs.set_f(f);
                Step::new(1, P::CC_MULUW)
            }

            // Every remaining ED sequence behaves as a two-byte NOP.
            _ => Step::new(1, P::CC_NOP + P::CC_PREFIX),
        }
    }

    // =========================================================================
    // Block instruction bodies
    // =========================================================================

    fn block_cp<B: Bus>(&mut self, bus: &mut B, increase: i16, repeat: bool) -> Step {
        self.regs
            .set_memptr(self.regs.memptr().wrapping_add_signed(increase));
        let addr = self.regs.hl();
        let val = self.rdmem(bus, addr, P::CC_CPI_1);
        let a = self.regs.a();
        let res = a.wrapping_sub(val);
        self.regs.set_hl(addr.wrapping_add_signed(increase));
        self.regs.set_bc(self.regs.bc().wrapping_sub(1));
        let mut f = ((a ^ val ^ res) & HF)
            | ZS[res as usize]
            | NF
            | if self.regs.bc() != 0 { VF } else { 0 };
        if P::IS_R800 {
            f |= self.regs.f() & (CF | XF | YF);
        } else {
            f |= self.regs.f() & CF;
            let k = res.wrapping_sub((f & HF) >> 4);
            f |= (k << 4) & YF; // bit 1 -> flag 5
            f |= k & XF; // bit 3 -> flag 3
        }
        self.regs.set_f(f);
        if repeat && self.regs.bc() != 0 && res != 0 {
            self.regs.set_memptr(self.regs.pc().wrapping_add(1));
            Step::new(-1, P::CC_CPIR)
        } else {
            Step::new(1, P::CC_CPI)
        }
    }

    fn block_ld<B: Bus>(&mut self, bus: &mut B, increase: i16, repeat: bool) -> Step {
        let val = self.rdmem(bus, self.regs.hl(), P::CC_LDI_1);
        let de = self.regs.de();
        self.wrmem(bus, de, val, P::CC_LDI_2);
        self.regs.set_hl(self.regs.hl().wrapping_add_signed(increase));
        self.regs.set_de(de.wrapping_add_signed(increase));
        self.regs.set_bc(self.regs.bc().wrapping_sub(1));
        let mut f = if self.regs.bc() != 0 { VF } else { 0 };
        if P::IS_R800 {
            f |= self.regs.f() & (SF | ZF | CF | XF | YF);
        } else {
            f |= self.regs.f() & (SF | ZF | CF);
            let n = self.regs.a().wrapping_add(val);
            f |= (n << 4) & YF; // bit 1 -> flag 5
            f |= n & XF; // bit 3 -> flag 3
        }
        self.regs.set_f(f);
        if repeat && self.regs.bc() != 0 {
            self.regs.set_memptr(self.regs.pc().wrapping_add(1));
            Step::new(-1, P::CC_LDIR)
        } else {
            Step::new(1, P::CC_LDI)
        }
    }

    fn block_in<B: Bus>(&mut self, bus: &mut B, increase: i16, repeat: bool) -> Step {
        self.policy_even_cycle(P::CC_INI_1);
        self.regs
            .set_memptr(self.regs.bc().wrapping_add_signed(increase));
        self.regs.set_bc(self.regs.bc().wrapping_sub(0x100)); // decr before use
        let bc = self.regs.bc();
        let val = self.read_port(bus, bc, P::CC_INI_1);
        self.wrmem(bus, self.regs.hl(), val, P::CC_INI_2);
        self.regs.set_hl(self.regs.hl().wrapping_add_signed(increase));
        let k = u16::from(val) + u16::from(self.regs.c().wrapping_add_signed(increase as i8));
        let b = self.regs.b();
        self.regs.set_f(
            ((val & SF) >> 6) // N
                | if k & 0x100 != 0 { HF | CF } else { 0 }
                | ZSXY[b as usize]
                | (ZSPXY[((k as u8 & 0x07) ^ b) as usize] & PF),
        );
        if repeat && b != 0 {
            Step::new(-1, P::CC_INIR)
        } else {
            Step::new(1, P::CC_INI)
        }
    }

    fn block_out<B: Bus>(&mut self, bus: &mut B, increase: i16, repeat: bool) -> Step {
        let val = self.rdmem(bus, self.regs.hl(), P::CC_OUTI_1);
        self.regs.set_hl(self.regs.hl().wrapping_add_signed(increase));
        self.policy_even_cycle(P::CC_OUTI_2);
        self.write_port(bus, self.regs.bc(), val, P::CC_OUTI_2);
        self.regs.set_bc(self.regs.bc().wrapping_sub(0x100)); // decr after use
        self.regs
            .set_memptr(self.regs.bc().wrapping_add_signed(increase));
        let k = u16::from(val) + u16::from(self.regs.l());
        let b = self.regs.b();
        self.regs.set_f(
            ((val & SF) >> 6) // N
                | if k & 0x100 != 0 { HF | CF } else { 0 }
                | ZSXY[b as usize]
                | (ZSPXY[((k as u8 & 0x07) ^ b) as usize] & PF),
        );
        if repeat && b != 0 {
            Step::new(-1, P::CC_OTIR)
        } else {
            Step::new(1, P::CC_OUTI)
        }
    }

    // =========================================================================
    // DD/FD prefixes
    // =========================================================================

    fn exec_prefixed<B: Bus>(&mut self, bus: &mut B, mut index: IndexReg) -> Step {
        loop {
            self.regs.add_pc(1); // M1 cycle at this point
            let op = self.rdmem_opcode(bus, 0, P::CC_DD + P::CC_MAIN);
            self.regs.incr_r(1);
            self.add_m1_wait();
            match op {
                // Chained prefixes: the last one wins.
                0xDD => {
                    self.clock.add(P::CC_DD);
                    index = IndexReg::Ix;
                }
                0xFD => {
                    self.clock.add(P::CC_DD);
                    index = IndexReg::Iy;
                }

                0xCB => return self.exec_xx_cb(bus, index),

                // ADD IX,rr (rr=2 names IX itself)
                0x09 | 0x19 | 0x29 | 0x39 => {
                    let reg2 = match (op >> 4) & 3 {
                        0 => self.regs.bc(),
                        1 => self.regs.de(),
                        2 => self.get_ixy(index),
                        _ => self.regs.sp(),
                    };
                    let res = self.add16(self.get_ixy(index), reg2);
                    self.set_ixy(index, res);
                    return Step::new(1, P::CC_ADD_HL_SS + P::CC_DD);
                }

                // 16-bit loads on IX
                0x21 => {
                    let value = self.rd_word_pc(bus, 1, P::CC_DD + P::CC_LD_SS_NN_1);
                    self.set_ixy(index, value);
                    return Step::new(3, P::CC_LD_SS_NN + P::CC_DD);
                }
                0x22 => return self.ld_xword_rp(bus, self.get_ixy(index), P::CC_DD),
                0x2A => {
                    let value = self.ld_rp_xword(bus, P::CC_DD);
                    self.set_ixy(index, value);
                    return Step::new(3, P::CC_LD_HL_XX + P::CC_DD);
                }
                0x23 => {
                    let value = self.get_ixy(index).wrapping_add(1);
                    self.set_ixy(index, value);
                    return Step::new(1, P::CC_INC_SS + P::CC_DD);
                }
                0x2B => {
                    let value = self.get_ixy(index).wrapping_sub(1);
                    self.set_ixy(index, value);
                    return Step::new(1, P::CC_INC_SS + P::CC_DD);
                }

                // INC/DEC IXh/IXl, LD IXh/IXl,n
                0x24 | 0x2C => {
                    let idx = (op >> 3) & 7;
                    let value = self.get_r_ixy(idx, index);
                    let value = self.do_inc(value);
                    self.set_r_ixy(idx, index, value);
                    return Step::new(1, P::CC_INC_R + P::CC_DD);
                }
                0x25 | 0x2D => {
                    let idx = (op >> 3) & 7;
                    let value = self.get_r_ixy(idx, index);
                    let value = self.do_dec(value);
                    self.set_r_ixy(idx, index, value);
                    return Step::new(1, P::CC_INC_R + P::CC_DD);
                }
                0x26 | 0x2E => {
                    let value = self.rdmem_opcode(bus, 1, P::CC_DD + P::CC_LD_R_N_1);
                    self.set_r_ixy((op >> 3) & 7, index, value);
                    return Step::new(2, P::CC_LD_R_N + P::CC_DD);
                }

                // INC/DEC (IX+d), LD (IX+d),n
                0x34 => {
                    let addr = self.indexed_addr(bus, index, P::CC_DD + P::CC_INC_XIX_1);
                    let ee = P::CC_DD + P::EE_INC_XIX;
                    let value = self.rdmem(bus, addr, P::CC_INC_XHL_1 + ee);
                    let value = self.do_inc(value);
                    self.wrmem(bus, addr, value, P::CC_INC_XHL_2 + ee);
                    return Step::new(2, P::CC_INC_XHL + ee);
                }
                0x35 => {
                    let addr = self.indexed_addr(bus, index, P::CC_DD + P::CC_INC_XIX_1);
                    let ee = P::CC_DD + P::EE_INC_XIX;
                    let value = self.rdmem(bus, addr, P::CC_INC_XHL_1 + ee);
                    let value = self.do_dec(value);
                    self.wrmem(bus, addr, value, P::CC_INC_XHL_2 + ee);
                    return Step::new(2, P::CC_INC_XHL + ee);
                }
                0x36 => {
                    let tmp = self.rd_word_pc(bus, 1, P::CC_DD + P::CC_LD_XIX_N_1);
                    let ofst = (tmp & 0xFF) as u8 as i8;
                    let value = (tmp >> 8) as u8;
                    let addr = self.get_ixy(index).wrapping_add(ofst as i16 as u16);
                    self.regs.set_memptr(addr);
                    self.wrmem(bus, addr, value, P::CC_DD + P::CC_LD_XIX_N_2);
                    return Step::new(3, P::CC_LD_XIX_N + P::CC_DD);
                }

                // LD r,(IX+d) — destination is the real register set
                0x46 | 0x4E | 0x56 | 0x5E | 0x66 | 0x6E | 0x7E => {
                    let addr = self.indexed_addr(bus, index, P::CC_DD + P::CC_LD_R_XIX_1);
                    let value = self.rdmem(bus, addr, P::CC_DD + P::CC_LD_R_XIX_2);
                    self.set_r((op >> 3) & 7, value);
                    return Step::new(2, P::CC_LD_R_XIX + P::CC_DD);
                }

                // LD (IX+d),r — source is the real register set
                0x70..=0x75 | 0x77 => {
                    let addr = self.indexed_addr(bus, index, P::CC_DD + P::CC_LD_XIX_R_1);
                    let value = self.get_r(op & 7);
                    self.wrmem(bus, addr, value, P::CC_DD + P::CC_LD_XIX_R_2);
                    return Step::new(2, P::CC_LD_XIX_R + P::CC_DD);
                }

                // LD r,r' where one side names IXh/IXl
                0x40..=0x6F | 0x78..=0x7D
                    if (op & 7 == 4 || op & 7 == 5 || (op >> 3) & 7 == 4 || (op >> 3) & 7 == 5)
                        && op & 7 != 6
                        && (op >> 3) & 7 != 6 =>
                {
                    let value = self.get_r_ixy(op & 7, index);
                    self.set_r_ixy((op >> 3) & 7, index, value);
                    return Step::new(1, P::CC_LD_R_R + P::CC_DD);
                }

                // ALU A,(IX+d)
                0x86 | 0x8E | 0x96 | 0x9E | 0xA6 | 0xAE | 0xB6 | 0xBE => {
                    let addr = self.indexed_addr(bus, index, P::CC_DD + P::CC_CP_XIX_1);
                    let value = self.rdmem(bus, addr, P::CC_DD + P::CC_CP_XIX_2);
                    self.alu_dispatch((op >> 3) & 7, value);
                    return Step::new(2, P::CC_CP_XIX + P::CC_DD);
                }

                // ALU A,IXh / ALU A,IXl
                0x80..=0xBF if op & 7 == 4 || op & 7 == 5 => {
                    let value = self.get_r_ixy(op & 7, index);
                    self.alu_dispatch((op >> 3) & 7, value);
                    return Step::new(1, P::CC_CP_R + P::CC_DD);
                }

                // POP/PUSH/EX (SP)/JP/LD SP with IX
                0xE1 => {
                    let value = self.pop16(bus, P::CC_DD);
                    self.set_ixy(index, value);
                    return Step::new(1, P::CC_POP + P::CC_DD);
                }
                0xE5 => {
                    let value = self.get_ixy(index);
                    self.push16(bus, value, P::CC_DD);
                    return Step::new(1, P::CC_PUSH + P::CC_DD);
                }
                0xE3 => {
                    let value = self.get_ixy(index);
                    let res = self.ex_sp(bus, value, P::CC_DD);
                    self.set_ixy(index, res);
                    return Step::new(1, P::CC_EX_SP_HL + P::CC_DD);
                }
                0xE9 => {
                    self.regs.set_pc(self.get_ixy(index));
                    return Step::new(0, P::CC_JP_HL + P::CC_DD);
                }
                0xF9 => {
                    self.regs.set_sp(self.get_ixy(index));
                    return Step::new(1, P::CC_LD_SP_HL + P::CC_DD);
                }

                // The prefix does not affect this opcode. The Z80 pays the
                // prefix cost and executes it as-is; the R800 swallows
                // prefix and opcode as a two-byte NOP.
                _ => {
                    if P::IS_R800 {
                        return Step::new(1, P::CC_NOP + P::CC_DD);
                    }
                    self.clock.add(P::CC_DD);
                    return self.exec_main(bus, op);
                }
            }
        }
    }

    /// Fetch the displacement byte and form IX/IY + d.
    fn indexed_addr<B: Bus>(&mut self, bus: &mut B, index: IndexReg, cc: u64) -> u16 {
        let ofst = self.rdmem_opcode(bus, 1, cc) as i8;
        let addr = self.get_ixy(index).wrapping_add(ofst as i16 as u16);
        self.regs.set_memptr(addr);
        addr
    }

    // =========================================================================
    // DD CB / FD CB: four-byte indexed bit operations
    // =========================================================================

    fn exec_xx_cb<B: Bus>(&mut self, bus: &mut B, index: IndexReg) -> Step {
        // The displacement is fetched before the operation byte; both in
        // one word read.
        let tmp = self.rd_word_pc(bus, 1, P::CC_DD + P::CC_DD_CB);
        let ofst = (tmp & 0xFF) as u8 as i8;
        let addr = self.get_ixy(index).wrapping_add(ofst as i16 as u16);
        let op = (tmp >> 8) as u8;
        let reg = op & 7;
        let n = (op >> 3) & 7;
        match op >> 6 {
            0 => {
                if P::IS_R800 && n == 6 {
                    self.r800_sll2_flags();
                    return Step::new(3, P::CC_DD + P::CC_SET_XIX);
                }
                self.regs.set_memptr(addr);
                let ee = P::CC_DD + P::EE_SET_XIX;
                let value = self.rdmem(bus, addr, P::CC_SET_XHL_1 + ee);
                let value = self.rot_shift(n, value);
                self.wrmem(bus, addr, value, P::CC_SET_XHL_2 + ee);
                if reg != 6 {
                    // Undocumented: the result is also copied into a
                    // register.
                    self.set_r(reg, value);
                }
                Step::new(3, P::CC_DD + P::CC_SET_XIX)
            }
            1 => {
                // BIT n,(IX+d): X/Y from the high byte of the effective
                // address, whatever the register field says.
                self.regs.set_memptr(addr);
                let m = self.rdmem(bus, addr, P::CC_DD + P::CC_BIT_XIX_1) & (1 << n);
                let f = if P::IS_R800 {
                    (self.regs.f() & (SF | VF | CF | XF | YF))
                        | HF
                        | if m != 0 { 0 } else { ZF }
                } else {
                    ZSPH[m as usize]
                        | (self.regs.f() & CF)
                        | ((addr >> 8) as u8 & (XF | YF))
                };
                self.regs.set_f(f);
                Step::new(3, P::CC_DD + P::CC_BIT_XIX)
            }
            2 => {
                self.regs.set_memptr(addr);
                let ee = P::CC_DD + P::EE_SET_XIX;
                let value = self.rdmem(bus, addr, P::CC_SET_XHL_1 + ee) & !(1 << n);
                self.wrmem(bus, addr, value, P::CC_SET_XHL_2 + ee);
                if reg != 6 {
                    self.set_r(reg, value);
                }
                Step::new(3, P::CC_DD + P::CC_SET_XIX)
            }
            _ => {
                self.regs.set_memptr(addr);
                let ee = P::CC_DD + P::EE_SET_XIX;
                let value = self.rdmem(bus, addr, P::CC_SET_XHL_1 + ee) | (1 << n);
                self.wrmem(bus, addr, value, P::CC_SET_XHL_2 + ee);
                if reg != 6 {
                    self.set_r(reg, value);
                }
                Step::new(3, P::CC_DD + P::CC_SET_XIX)
            }
        }
    }
}
