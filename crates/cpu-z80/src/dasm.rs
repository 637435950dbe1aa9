//! One-instruction disassembler.
//!
//! Produces the canonical lowercase mnemonic ("ld a,(hl)", "bit 3,(ix+#05)")
//! and the instruction length in bytes. Prefix handling mirrors the
//! interpreter, with one disassembly convention: a DD/FD prefix followed by
//! another DD/FD is shown as a standalone ignored prefix byte, so no
//! instruction is ever longer than four bytes.

use std::fmt::Write as _;

use emu_core::Bus;

const R_NAME: [&str; 8] = ["b", "c", "d", "e", "h", "l", "(hl)", "a"];
const RP_NAME: [&str; 4] = ["bc", "de", "hl", "sp"];
const RP2_NAME: [&str; 4] = ["bc", "de", "hl", "af"];
const COND_NAME: [&str; 8] = ["nz", "z", "nc", "c", "po", "pe", "p", "m"];
const ALU_NAME: [&str; 8] = [
    "add a,", "adc a,", "sub ", "sbc a,", "and ", "xor ", "or ", "cp ",
];
const ROT_NAME: [&str; 8] = ["rlc", "rrc", "rl", "rr", "sla", "sra", "sll", "srl"];
const BLOCK_NAME: [[&str; 4]; 4] = [
    ["ldi", "cpi", "ini", "outi"],
    ["ldd", "cpd", "ind", "outd"],
    ["ldir", "cpir", "inir", "otir"],
    ["lddr", "cpdr", "indr", "otdr"],
];

/// Length in bytes of the instruction starting at `bytes[0]`, or `None`
/// when the slice is too short to decide.
#[must_use]
pub fn instruction_length(bytes: &[u8]) -> Option<u8> {
    let op = *bytes.first()?;
    match op {
        0xCB => Some(2),
        0xED => {
            let sub = *bytes.get(1)?;
            // The four 16-bit load-from/to-address forms carry a word.
            Some(if sub & 0xC7 == 0x43 { 4 } else { 2 })
        }
        0xDD | 0xFD => {
            let sub = *bytes.get(1)?;
            match sub {
                0xDD | 0xFD | 0xED => Some(1), // shown as a lone ignored prefix
                0xCB => Some(4),
                _ => {
                    let inner = instruction_length(&bytes[1..])?;
                    // Indexed forms replace (hl) by (ix+d): one extra byte.
                    let indexed = uses_displacement(sub);
                    Some(1 + inner + u8::from(indexed))
                }
            }
        }
        _ => Some(main_length(op)),
    }
}

/// Does this (DD/FD-prefixed) opcode take a displacement byte?
fn uses_displacement(op: u8) -> bool {
    match op {
        0x34 | 0x35 | 0x36 => true,
        0x46 | 0x4E | 0x56 | 0x5E | 0x66 | 0x6E | 0x7E => true,
        0x70..=0x75 | 0x77 => true,
        0x86 | 0x8E | 0x96 | 0x9E | 0xA6 | 0xAE | 0xB6 | 0xBE => true,
        _ => false,
    }
}

fn main_length(op: u8) -> u8 {
    match op {
        // rr,nn / (nn) forms
        0x01 | 0x11 | 0x21 | 0x31 | 0x22 | 0x2A | 0x32 | 0x3A => 3,
        0xC3 | 0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => 3,
        0xCD | 0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => 3,
        // single immediate / relative
        0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => 2,
        0x10 | 0x18 | 0x20 | 0x28 | 0x30 | 0x38 => 2,
        0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => 2,
        0xD3 | 0xDB => 2,
        _ => 1,
    }
}

fn word(bytes: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes([*bytes.get(at)?, *bytes.get(at + 1)?]))
}

fn fmt_byte(value: u8) -> String {
    format!("#{value:02x}")
}

fn fmt_word(value: u16) -> String {
    format!("#{value:04x}")
}

fn fmt_index(ixy: &str, ofst: i8) -> String {
    if ofst < 0 {
        format!("({ixy}-#{:02x})", i16::from(ofst).unsigned_abs())
    } else {
        format!("({ixy}+#{ofst:02x})")
    }
}

/// Disassemble the instruction at `pc` through the bus, using
/// side-effect-free reads.
#[must_use]
pub fn dasm_at<B: Bus>(bus: &B, pc: u16) -> (String, u8) {
    let bytes: [u8; 4] = std::array::from_fn(|i| bus.peek_mem(pc.wrapping_add(i as u16)));
    // Four bytes always cover a complete instruction.
    dasm(&bytes, pc).map_or_else(|| ("??".to_owned(), 1), |decoded| decoded)
}

/// Disassemble one instruction located at `pc`. Returns the mnemonic and
/// the number of bytes consumed, or `None` when `bytes` is too short.
#[must_use]
pub fn dasm(bytes: &[u8], pc: u16) -> Option<(String, u8)> {
    let op = *bytes.first()?;
    match op {
        0xCB => {
            let sub = *bytes.get(1)?;
            Some((dasm_cb(sub, None), 2))
        }
        0xED => dasm_ed(bytes),
        0xDD => dasm_indexed(bytes, pc, "ix"),
        0xFD => dasm_indexed(bytes, pc, "iy"),
        _ => dasm_main(bytes, pc, "hl", None),
    }
}

fn dasm_cb(op: u8, index: Option<(&str, i8)>) -> String {
    let y = (op >> 3) & 7;
    let z = op & 7;
    let operand = match index {
        Some((ixy, ofst)) => fmt_index(ixy, ofst),
        None => R_NAME[z as usize].to_owned(),
    };
    match op >> 6 {
        0 => {
            let mut s = format!("{} {operand}", ROT_NAME[y as usize]);
            if index.is_some() && z != 6 {
                // Undocumented register-copy form.
                let _ = write!(s, ",{}", R_NAME[z as usize]);
            }
            s
        }
        1 => format!("bit {y},{operand}"),
        2 => {
            let mut s = format!("res {y},{operand}");
            if index.is_some() && z != 6 {
                let _ = write!(s, ",{}", R_NAME[z as usize]);
            }
            s
        }
        _ => {
            let mut s = format!("set {y},{operand}");
            if index.is_some() && z != 6 {
                let _ = write!(s, ",{}", R_NAME[z as usize]);
            }
            s
        }
    }
}

fn dasm_ed(bytes: &[u8]) -> Option<(String, u8)> {
    let op = *bytes.get(1)?;
    let y = (op >> 3) & 7;
    let z = op & 7;
    let p = y >> 1;
    let text = match op {
        0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x78 => {
            format!("in {},(c)", R_NAME[y as usize])
        }
        0x70 => "in (c)".to_owned(),
        0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x79 => {
            format!("out (c),{}", R_NAME[y as usize])
        }
        0x71 => "out (c),0".to_owned(),
        0x42 | 0x52 | 0x62 | 0x72 => format!("sbc hl,{}", RP_NAME[p as usize]),
        0x4A | 0x5A | 0x6A | 0x7A => format!("adc hl,{}", RP_NAME[p as usize]),
        0x43 | 0x53 | 0x63 | 0x73 => {
            let nn = word(bytes, 2)?;
            return Some((format!("ld ({}),{}", fmt_word(nn), RP_NAME[p as usize]), 4));
        }
        0x4B | 0x5B | 0x6B | 0x7B => {
            let nn = word(bytes, 2)?;
            return Some((format!("ld {},({})", RP_NAME[p as usize], fmt_word(nn)), 4));
        }
        0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => "neg".to_owned(),
        0x4D => "reti".to_owned(),
        0x45 | 0x55 | 0x5D | 0x65 | 0x6D | 0x75 | 0x7D => "retn".to_owned(),
        0x46 | 0x4E | 0x66 | 0x6E => "im 0".to_owned(),
        0x56 | 0x76 => "im 1".to_owned(),
        0x5E | 0x7E => "im 2".to_owned(),
        0x47 => "ld i,a".to_owned(),
        0x4F => "ld r,a".to_owned(),
        0x57 => "ld a,i".to_owned(),
        0x5F => "ld a,r".to_owned(),
        0x67 => "rrd".to_owned(),
        0x6F => "rld".to_owned(),
        0xA0..=0xA3 | 0xA8..=0xAB | 0xB0..=0xB3 | 0xB8..=0xBB => {
            BLOCK_NAME[((op >> 3) & 3) as usize][z as usize].to_owned()
        }
        0xC1 => "mulub a,b".to_owned(),
        0xC9 => "mulub a,c".to_owned(),
        0xD1 => "mulub a,d".to_owned(),
        0xD9 => "mulub a,e".to_owned(),
        0xC3 => "muluw hl,bc".to_owned(),
        0xF3 => "muluw hl,sp".to_owned(),
        _ => format!("db #ed,{}", fmt_byte(op)),
    };
    Some((text, 2))
}

fn dasm_indexed(bytes: &[u8], pc: u16, ixy: &str) -> Option<(String, u8)> {
    let sub = *bytes.get(1)?;
    match sub {
        0xDD | 0xFD | 0xED => Some((format!("db {}", fmt_byte(bytes[0])), 1)),
        0xCB => {
            let ofst = *bytes.get(2)? as i8;
            let op = *bytes.get(3)?;
            Some((dasm_cb(op, Some((ixy, ofst))), 4))
        }
        _ => {
            let (text, len) = dasm_main(&bytes[1..], pc.wrapping_add(1), ixy, Some(ixy))?;
            Some((text, len + 1))
        }
    }
}

/// Disassemble an unprefixed instruction. `hl_name` substitutes for HL and
/// `index` (when present) turns `(hl)` into `(ix+d)` and h/l into ixh/ixl.
fn dasm_main(bytes: &[u8], pc: u16, hl_name: &str, index: Option<&str>) -> Option<(String, u8)> {
    let op = *bytes.first()?;
    let x = op >> 6;
    let y = (op >> 3) & 7;
    let z = op & 7;
    let p = y >> 1;

    // Displacement handling: indexed forms with (hl) consume one extra
    // byte before any immediate.
    let indexed_mem = index.is_some() && uses_displacement(op);
    let imm_at = if indexed_mem { 2 } else { 1 };
    let mem_operand = |bytes: &[u8]| -> Option<String> {
        match index {
            Some(ixy) if indexed_mem => Some(fmt_index(ixy, *bytes.get(1)? as i8)),
            _ => Some("(hl)".to_owned()),
        }
    };
    let reg = |idx: u8| -> String {
        match (idx, index) {
            (4, Some(ixy)) => format!("{ixy}h"),
            (5, Some(ixy)) => format!("{ixy}l"),
            _ => R_NAME[idx as usize].to_owned(),
        }
    };
    let rp = |idx: u8| -> String {
        if idx == 2 {
            hl_name.to_owned()
        } else {
            RP_NAME[idx as usize].to_owned()
        }
    };
    let rp2 = |idx: u8| -> String {
        if idx == 2 {
            hl_name.to_owned()
        } else {
            RP2_NAME[idx as usize].to_owned()
        }
    };

    let extra = u8::from(indexed_mem);
    let (text, len) = match (x, z, y) {
        (0, 0, 0) => ("nop".to_owned(), 1),
        (0, 0, 1) => ("ex af,af'".to_owned(), 1),
        (0, 0, 2) => {
            let d = *bytes.get(1)? as i8;
            let target = pc.wrapping_add(2).wrapping_add(d as i16 as u16);
            (format!("djnz {}", fmt_word(target)), 2)
        }
        (0, 0, 3) => {
            let d = *bytes.get(1)? as i8;
            let target = pc.wrapping_add(2).wrapping_add(d as i16 as u16);
            (format!("jr {}", fmt_word(target)), 2)
        }
        (0, 0, _) => {
            let d = *bytes.get(1)? as i8;
            let target = pc.wrapping_add(2).wrapping_add(d as i16 as u16);
            (
                format!("jr {},{}", COND_NAME[(y - 4) as usize], fmt_word(target)),
                2,
            )
        }
        (0, 1, _) if y & 1 == 0 => {
            let nn = word(bytes, 1)?;
            (format!("ld {},{}", rp(p), fmt_word(nn)), 3)
        }
        (0, 1, _) => (format!("add {hl_name},{}", rp(p)), 1),
        (0, 2, 0) => ("ld (bc),a".to_owned(), 1),
        (0, 2, 2) => ("ld (de),a".to_owned(), 1),
        (0, 2, 4) => {
            let nn = word(bytes, 1)?;
            (format!("ld ({}),{hl_name}", fmt_word(nn)), 3)
        }
        (0, 2, 6) => {
            let nn = word(bytes, 1)?;
            (format!("ld ({}),a", fmt_word(nn)), 3)
        }
        (0, 2, 1) => ("ld a,(bc)".to_owned(), 1),
        (0, 2, 3) => ("ld a,(de)".to_owned(), 1),
        (0, 2, 5) => {
            let nn = word(bytes, 1)?;
            (format!("ld {hl_name},({})", fmt_word(nn)), 3)
        }
        (0, 2, _) => {
            let nn = word(bytes, 1)?;
            (format!("ld a,({})", fmt_word(nn)), 3)
        }
        (0, 3, _) if y & 1 == 0 => (format!("inc {}", rp(p)), 1),
        (0, 3, _) => (format!("dec {}", rp(p)), 1),
        (0, 4, 6) => (format!("inc {}", mem_operand(bytes)?), 1 + extra),
        (0, 4, _) => (format!("inc {}", reg(y)), 1),
        (0, 5, 6) => (format!("dec {}", mem_operand(bytes)?), 1 + extra),
        (0, 5, _) => (format!("dec {}", reg(y)), 1),
        (0, 6, 6) => {
            let n = *bytes.get(imm_at as usize)?;
            (
                format!("ld {},{}", mem_operand(bytes)?, fmt_byte(n)),
                2 + extra,
            )
        }
        (0, 6, _) => {
            let n = *bytes.get(1)?;
            (format!("ld {},{}", reg(y), fmt_byte(n)), 2)
        }
        (0, 7, 0) => ("rlca".to_owned(), 1),
        (0, 7, 1) => ("rrca".to_owned(), 1),
        (0, 7, 2) => ("rla".to_owned(), 1),
        (0, 7, 3) => ("rra".to_owned(), 1),
        (0, 7, 4) => ("daa".to_owned(), 1),
        (0, 7, 5) => ("cpl".to_owned(), 1),
        (0, 7, 6) => ("scf".to_owned(), 1),
        (0, 7, _) => ("ccf".to_owned(), 1),

        (1, 6, 6) => ("halt".to_owned(), 1),
        (1, 6, _) => (format!("ld {},{}", reg(y), mem_operand(bytes)?), 1 + extra),
        (1, _, 6) => (format!("ld {},{}", mem_operand(bytes)?, reg(z)), 1 + extra),
        (1, _, _) => (format!("ld {},{}", reg(y), reg(z)), 1),

        (2, 6, _) => (
            format!("{}{}", ALU_NAME[y as usize], mem_operand(bytes)?),
            1 + extra,
        ),
        (2, _, _) => (format!("{}{}", ALU_NAME[y as usize], reg(z)), 1),

        (3, 0, _) => (format!("ret {}", COND_NAME[y as usize]), 1),
        (3, 1, _) if y & 1 == 0 => (format!("pop {}", rp2(p)), 1),
        (3, 1, 1) => ("ret".to_owned(), 1),
        (3, 1, 3) => ("exx".to_owned(), 1),
        (3, 1, 5) => (format!("jp ({hl_name})"), 1),
        (3, 1, _) => (format!("ld sp,{hl_name}"), 1),
        (3, 2, _) => {
            let nn = word(bytes, 1)?;
            (
                format!("jp {},{}", COND_NAME[y as usize], fmt_word(nn)),
                3,
            )
        }
        (3, 3, 0) => {
            let nn = word(bytes, 1)?;
            (format!("jp {}", fmt_word(nn)), 3)
        }
        (3, 3, 2) => {
            let n = *bytes.get(1)?;
            (format!("out ({}),a", fmt_byte(n)), 2)
        }
        (3, 3, 3) => {
            let n = *bytes.get(1)?;
            (format!("in a,({})", fmt_byte(n)), 2)
        }
        (3, 3, 4) => (format!("ex (sp),{hl_name}"), 1),
        (3, 3, 5) => ("ex de,hl".to_owned(), 1),
        (3, 3, 6) => ("di".to_owned(), 1),
        (3, 3, _) => ("ei".to_owned(), 1),
        (3, 4, _) => {
            let nn = word(bytes, 1)?;
            (
                format!("call {},{}", COND_NAME[y as usize], fmt_word(nn)),
                3,
            )
        }
        (3, 5, _) if y & 1 == 0 => (format!("push {}", rp2(p)), 1),
        (3, 5, 1) => {
            let nn = word(bytes, 1)?;
            (format!("call {}", fmt_word(nn)), 3)
        }
        (3, 6, _) => {
            let n = *bytes.get(1)?;
            (format!("{}{}", ALU_NAME[y as usize], fmt_byte(n)), 2)
        }
        (3, 7, _) => (format!("rst {}", fmt_byte(y * 8)), 1),
        // CB/ED/DD/FD handled by the caller.
        _ => unreachable!("prefix bytes handled by dasm()"),
    };
    Some((text, len))
}
