//! End-to-end programs running on a flat RAM bus.

use cpu_z80::{CpuConfig, CpuCore, Z80, CF, HF, NF, PF, SF, VF, ZF};
use emu_core::{EmuTime, SimpleBus};

fn make_cpu() -> (CpuCore<Z80>, SimpleBus) {
    let cpu = CpuCore::<Z80>::new(CpuConfig::msx_z80(), EmuTime::ZERO);
    (cpu, SimpleBus::new())
}

/// Load `program` at 0x0100 and run instruction by instruction until HALT.
fn run_program(program: &[u8]) -> (CpuCore<Z80>, SimpleBus) {
    let (mut cpu, mut bus) = make_cpu();
    bus.load(0x0100, program);
    cpu.registers_mut().set_pc(0x0100);
    cpu.registers_mut().set_sp(0xFFF0);
    run_to_halt(&mut cpu, &mut bus);
    (cpu, bus)
}

fn run_to_halt(cpu: &mut CpuCore<Z80>, bus: &mut SimpleBus) {
    for _ in 0..10_000 {
        if cpu.registers().halt() {
            return;
        }
        cpu.step(bus);
    }
    panic!("program did not reach HALT");
}

#[test]
fn store_and_reload_accumulator() {
    // LD A,42h / LD (8000h),A / LD A,(8000h) / HALT
    let (cpu, bus) = run_program(&[0x3E, 0x42, 0x32, 0x00, 0x80, 0x3A, 0x00, 0x80, 0x76]);
    assert_eq!(cpu.registers().a(), 0x42);
    assert_eq!(bus.peek(0x8000), 0x42);
    assert!(cpu.registers().halt());
}

#[test]
fn add_hl_de() {
    // LD HL,5 / LD DE,10 / ADD HL,DE / HALT
    let (cpu, _) = run_program(&[0x21, 0x05, 0x00, 0x11, 0x0A, 0x00, 0x19, 0x76]);
    assert_eq!(cpu.registers().hl(), 0x000F);
    let f = cpu.registers().f();
    assert_eq!(f & HF, 0);
    assert_eq!(f & CF, 0);
    assert_eq!(f & NF, 0);
}

#[test]
fn signed_overflow_on_add() {
    // LD A,7Fh / ADD A,1 / HALT
    let (cpu, _) = run_program(&[0x3E, 0x7F, 0xC6, 0x01, 0x76]);
    let regs = cpu.registers();
    assert_eq!(regs.a(), 0x80);
    let f = regs.f();
    assert_ne!(f & SF, 0);
    assert_eq!(f & ZF, 0);
    assert_ne!(f & HF, 0);
    assert_ne!(f & VF, 0);
    assert_eq!(f & NF, 0);
    assert_eq!(f & CF, 0);
}

#[test]
fn ldir_copies_block() {
    // LD BC,5 / LDIR with HL=0200h, DE=0300h
    let (mut cpu, mut bus) = make_cpu();
    bus.load(0x0100, &[0x01, 0x05, 0x00, 0xED, 0xB0, 0x76]);
    bus.load(0x0200, &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
    cpu.registers_mut().set_pc(0x0100);
    cpu.registers_mut().set_sp(0xFFF0);
    cpu.registers_mut().set_hl(0x0200);
    cpu.registers_mut().set_de(0x0300);
    run_to_halt(&mut cpu, &mut bus);
    for (i, expected) in [0xAA, 0xBB, 0xCC, 0xDD, 0xEE].into_iter().enumerate() {
        assert_eq!(bus.peek(0x0300 + i as u16), expected);
    }
    assert_eq!(cpu.registers().bc(), 0);
    assert_eq!(cpu.registers().hl(), 0x0205);
    assert_eq!(cpu.registers().de(), 0x0305);
}

#[test]
fn bit_on_register() {
    // BIT 0,B with B=1
    let (mut cpu, mut bus) = make_cpu();
    bus.load(0x0100, &[0xCB, 0x40, 0x76]);
    cpu.registers_mut().set_pc(0x0100);
    cpu.registers_mut().set_b(0x01);
    run_to_halt(&mut cpu, &mut bus);
    let f = cpu.registers().f();
    assert_eq!(f & ZF, 0);
    assert_ne!(f & HF, 0);
    assert_eq!(f & NF, 0);
}

#[test]
fn bit_on_accumulator_both_ways() {
    for (a, z_expected) in [(0x01u8, false), (0x00u8, true)] {
        let (mut cpu, mut bus) = make_cpu();
        bus.load(0x0100, &[0xCB, 0x47, 0x76]);
        cpu.registers_mut().set_pc(0x0100);
        cpu.registers_mut().set_a(a);
        run_to_halt(&mut cpu, &mut bus);
        let f = cpu.registers().f();
        assert_eq!(f & ZF != 0, z_expected, "A={a:#04x}");
        assert_ne!(f & HF, 0);
        assert_eq!(f & NF, 0);
    }
}

#[test]
fn xor_or_sequence_settles_flags_for_every_byte() {
    for b in 0..=255u8 {
        // LD A,b / XOR A / OR A / LD B,A / HALT
        let (cpu, _) = run_program(&[0x3E, b, 0xAF, 0xB7, 0x47, 0x76]);
        let regs = cpu.registers();
        assert_eq!(regs.a(), 0);
        assert_eq!(regs.b(), 0);
        let f = regs.f();
        assert_ne!(f & ZF, 0);
        assert_ne!(f & PF, 0);
        assert_eq!(f & (SF | HF | NF | CF), 0);
    }
}

#[test]
fn word_store_load_round_trip() {
    for w in [0x0000u16, 0x0001, 0x1234, 0x8000, 0xABCD, 0xFFFF] {
        let [lo, hi] = w.to_le_bytes();
        // LD HL,w / LD (8000h),HL / LD DE,(8000h) / HALT
        let (cpu, _) = run_program(&[
            0x21, lo, hi, 0x22, 0x00, 0x80, 0xED, 0x5B, 0x00, 0x80, 0x76,
        ]);
        assert_eq!(cpu.registers().de(), w, "w={w:#06x}");
    }
}

#[test]
fn r_register_top_bit_follows_ld_r_a() {
    for value in [0x00u8, 0x7F, 0x80, 0xFF] {
        let (mut cpu, mut bus) = make_cpu();
        // LD A,v / LD R,A / then a run of NOPs / HALT
        let mut program = vec![0x3E, value, 0xED, 0x4F];
        program.extend(std::iter::repeat_n(0x00, 200));
        program.push(0x76);
        bus.load(0x0100, &program);
        cpu.registers_mut().set_pc(0x0100);
        run_to_halt(&mut cpu, &mut bus);
        assert_eq!(
            cpu.registers().r() & 0x80,
            value & 0x80,
            "R top bit must survive refresh increments"
        );
    }
}

#[test]
fn undefined_ed_sequences_are_two_byte_nops() {
    // ED 00 / ED FF / HALT — must not disturb registers.
    let (mut cpu, mut bus) = make_cpu();
    bus.load(0x0100, &[0xED, 0x00, 0xED, 0xFF, 0x76]);
    cpu.registers_mut().set_pc(0x0100);
    cpu.registers_mut().set_a(0x5A);
    run_to_halt(&mut cpu, &mut bus);
    assert_eq!(cpu.registers().a(), 0x5A);
    assert_eq!(cpu.registers().pc(), 0x0105);
}

#[test]
fn memptr_feeds_bit_hl_flags() {
    // LD A,(nn) sets memptr to nn+1; BIT 6,(HL) then exposes bits 5/3 of
    // the memptr high byte in Y/X.
    let (mut cpu, mut bus) = make_cpu();
    // LD A,(2022h) / BIT 6,(HL) / HALT  -> memptr = 2023h, high byte 20h
    // (bit 5 set, bit 3 clear).
    bus.load(0x0100, &[0x3A, 0x22, 0x20, 0xCB, 0x76, 0x76]);
    bus.poke(0x4000, 0x00); // (HL) operand, bit 6 clear
    cpu.registers_mut().set_pc(0x0100);
    cpu.registers_mut().set_hl(0x4000);
    run_to_halt(&mut cpu, &mut bus);
    let f = cpu.registers().f();
    assert_ne!(f & cpu_z80::YF, 0, "Y from memptr high byte bit 5");
    assert_eq!(f & cpu_z80::XF, 0, "X from memptr high byte bit 3");
}

#[test]
fn cpir_rewinds_pc_and_updates_memptr() {
    let (mut cpu, mut bus) = make_cpu();
    // CPIR looking for 3 in a 4-byte window starting at 0x0200.
    bus.load(0x0100, &[0xED, 0xB1, 0x76]);
    bus.load(0x0200, &[1, 2, 3, 4]);
    cpu.registers_mut().set_pc(0x0100);
    cpu.registers_mut().set_a(3);
    cpu.registers_mut().set_hl(0x0200);
    cpu.registers_mut().set_bc(4);
    run_to_halt(&mut cpu, &mut bus);
    let regs = cpu.registers();
    assert_eq!(regs.hl(), 0x0203, "stops after the match");
    assert_eq!(regs.bc(), 1);
    assert_ne!(regs.f() & ZF, 0, "match found");
}

#[test]
fn dd_cb_stores_result_in_memory_and_register() {
    let (mut cpu, mut bus) = make_cpu();
    // RLC (IX+1),B: both memory and B receive the rotated byte.
    bus.load(0x0100, &[0xDD, 0xCB, 0x01, 0x00, 0x76]);
    bus.poke(0x2001, 0x81);
    cpu.registers_mut().set_pc(0x0100);
    cpu.registers_mut().set_ix(0x2000);
    run_to_halt(&mut cpu, &mut bus);
    assert_eq!(bus.peek(0x2001), 0x03);
    assert_eq!(cpu.registers().b(), 0x03);
    assert_ne!(cpu.registers().f() & CF, 0);
}

#[test]
fn undocumented_ix_halves() {
    let (mut cpu, mut bus) = make_cpu();
    // LD IXH,12h / LD IXL,34h / LD A,IXH / ADD A,IXL / HALT
    bus.load(
        0x0100,
        &[0xDD, 0x26, 0x12, 0xDD, 0x2E, 0x34, 0xDD, 0x7C, 0xDD, 0x85, 0x76],
    );
    cpu.registers_mut().set_pc(0x0100);
    run_to_halt(&mut cpu, &mut bus);
    assert_eq!(cpu.registers().ix(), 0x1234);
    assert_eq!(cpu.registers().a(), 0x46);
}

#[test]
fn daa_corrects_bcd_addition() {
    // 19 + 28 = 47 in BCD: LD A,19h / ADD A,28h / DAA / HALT
    let (cpu, _) = run_program(&[0x3E, 0x19, 0xC6, 0x28, 0x27, 0x76]);
    assert_eq!(cpu.registers().a(), 0x47);
    assert_eq!(cpu.registers().f() & CF, 0);
}

#[test]
fn sll_shifts_in_a_one_on_z80() {
    let (mut cpu, mut bus) = make_cpu();
    bus.load(0x0100, &[0xCB, 0x30, 0x76]); // SLL B
    cpu.registers_mut().set_pc(0x0100);
    cpu.registers_mut().set_b(0x80);
    run_to_halt(&mut cpu, &mut bus);
    assert_eq!(cpu.registers().b(), 0x01);
    assert_ne!(cpu.registers().f() & CF, 0);
}
