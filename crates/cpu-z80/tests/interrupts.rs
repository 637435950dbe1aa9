//! Interrupt acceptance, EI delay, NMI edge and HALT behaviour.

use cpu_z80::{CpuConfig, CpuCore, Z80, VF};
use emu_core::{EmuTime, SimpleBus};

fn make_cpu() -> (CpuCore<Z80>, SimpleBus) {
    let cpu = CpuCore::<Z80>::new(CpuConfig::msx_z80(), EmuTime::ZERO);
    (cpu, SimpleBus::new())
}

#[test]
fn irq_ignored_for_one_instruction_after_ei() {
    let (mut cpu, mut bus) = make_cpu();
    // IM 1 / EI / NOP / NOP
    bus.load(0x0100, &[0xED, 0x56, 0xFB, 0x00, 0x00]);
    cpu.registers_mut().set_pc(0x0100);
    cpu.registers_mut().set_sp(0xFFF0);
    cpu.raise_irq();

    cpu.step(&mut bus); // IM 1 (IFF1 still clear, no acceptance)
    cpu.step(&mut bus); // EI
    assert_eq!(cpu.registers().pc(), 0x0103);
    assert!(cpu.registers().iff1());

    // The instruction right after EI runs with the IRQ still pending.
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().pc(), 0x0104, "NOP executed, not the ISR");

    // The next boundary accepts it.
    cpu.step(&mut bus);
    let regs = cpu.registers();
    assert_eq!(regs.pc(), 0x0038);
    assert!(!regs.iff1() && !regs.iff2());
    assert_eq!(regs.sp(), 0xFFEE);
    assert_eq!(bus.peek(0xFFEE), 0x04); // pushed return address 0x0104
    assert_eq!(bus.peek(0xFFEF), 0x01);
    cpu.lower_irq();
}

#[test]
fn im0_executes_the_bus_byte_as_rst() {
    let (mut cpu, mut bus) = make_cpu();
    bus.load(0x0100, &[0x00]);
    cpu.registers_mut().set_pc(0x0100);
    cpu.registers_mut().set_sp(0xFFF0);
    cpu.registers_mut().set_iff1(true);
    cpu.registers_mut().set_iff2(true);
    cpu.raise_irq();
    cpu.step(&mut bus);
    // SimpleBus drives 0xFF: RST 38h.
    assert_eq!(cpu.registers().pc(), 0x0038);
    cpu.lower_irq();
}

#[test]
fn im2_reads_vector_from_table() {
    let (mut cpu, mut bus) = make_cpu();
    bus.load(0x0100, &[0x00]);
    // Vector table entry at (I << 8) | 0xFF = 0x20FF.
    bus.load(0x20FF, &[0x34, 0x12]);
    cpu.registers_mut().set_pc(0x0100);
    cpu.registers_mut().set_sp(0xFFF0);
    cpu.registers_mut().set_i(0x20);
    cpu.registers_mut().set_im(2);
    cpu.registers_mut().set_iff1(true);
    cpu.registers_mut().set_iff2(true);
    cpu.raise_irq();
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().pc(), 0x1234);
    assert_eq!(cpu.registers().memptr(), 0x1234);
    cpu.lower_irq();
}

#[test]
fn nmi_preserves_iff2_and_needs_a_new_edge() {
    let (mut cpu, mut bus) = make_cpu();
    bus.load(0x0100, &[0x00, 0x00, 0x00]);
    cpu.registers_mut().set_pc(0x0100);
    cpu.registers_mut().set_sp(0xFFF0);
    cpu.registers_mut().set_iff1(true);
    cpu.registers_mut().set_iff2(true);

    cpu.raise_nmi();
    cpu.step(&mut bus);
    let regs = cpu.registers();
    assert_eq!(regs.pc(), 0x0066);
    assert!(!regs.iff1(), "IFF1 cleared");
    assert!(regs.iff2(), "IFF2 preserved");

    // Still asserted but no new edge: the CPU keeps executing.
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().pc(), 0x0067);

    // Lower and raise again: new edge, accepted again.
    cpu.lower_nmi();
    cpu.raise_nmi();
    cpu.step(&mut bus);
    assert_eq!(cpu.registers().pc(), 0x0066);
    cpu.lower_nmi();
}

#[test]
fn ld_a_i_loses_v_flag_when_irq_hits_the_boundary() {
    let (mut cpu, mut bus) = make_cpu();
    // LD A,I / NOP
    bus.load(0x0100, &[0xED, 0x57, 0x00]);
    cpu.registers_mut().set_pc(0x0100);
    cpu.registers_mut().set_sp(0xFFF0);
    cpu.registers_mut().set_iff1(true);
    cpu.registers_mut().set_iff2(true);

    cpu.step(&mut bus); // LD A,I copies IFF2 into V
    assert_ne!(cpu.registers().f() & VF, 0);

    cpu.raise_irq();
    cpu.step(&mut bus); // IRQ accepted right after LD A,I: V is lost
    assert_eq!(cpu.registers().pc(), 0x0038);
    assert_eq!(cpu.registers().f() & VF, 0);
    cpu.lower_irq();
}

#[test]
fn ld_a_i_keeps_v_flag_without_irq() {
    let (mut cpu, mut bus) = make_cpu();
    bus.load(0x0100, &[0xED, 0x57, 0x00]);
    cpu.registers_mut().set_pc(0x0100);
    cpu.registers_mut().set_iff1(true);
    cpu.registers_mut().set_iff2(true);
    cpu.step(&mut bus);
    cpu.step(&mut bus); // plain NOP follows
    assert_ne!(cpu.registers().f() & VF, 0);
}

#[test]
fn halt_advances_time_without_fetching() {
    let (mut cpu, mut bus) = make_cpu();
    bus.load(0x0100, &[0x76]); // HALT
    cpu.registers_mut().set_pc(0x0100);
    cpu.execute(&mut bus, EmuTime::from_units(100_000));
    let regs = cpu.registers();
    assert!(regs.halt());
    assert_eq!(regs.pc(), 0x0101, "PC rests just past the HALT opcode");
    assert!(cpu.current_time() >= EmuTime::from_units(100_000));
}

#[test]
fn halt_increments_r_while_asleep() {
    let (mut cpu, mut bus) = make_cpu();
    bus.load(0x0100, &[0x76]);
    cpu.registers_mut().set_pc(0x0100);
    let r_before = cpu.registers().r();
    cpu.execute(&mut bus, EmuTime::from_units(50_000));
    assert_ne!(cpu.registers().r(), r_before, "R counts skipped M1 cycles");
}

#[test]
fn irq_wakes_halted_cpu() {
    let (mut cpu, mut bus) = make_cpu();
    // EI / HALT, then ISR at 0x38 is a HALT too so the test can observe it.
    bus.load(0x0100, &[0xFB, 0x76]);
    bus.load(0x0038, &[0x76]);
    cpu.registers_mut().set_pc(0x0100);
    cpu.registers_mut().set_sp(0xFFF0);
    cpu.execute(&mut bus, EmuTime::from_units(10_000));
    assert!(cpu.registers().halt());

    cpu.raise_irq();
    cpu.execute(&mut bus, EmuTime::from_units(20_000));
    let regs = cpu.registers();
    assert_eq!(bus.peek(0xFFEE), 0x02, "return address after the HALT");
    assert!(regs.pc() == 0x0038 || regs.pc() == 0x0039);
    cpu.lower_irq();
}

#[test]
fn async_exit_returns_promptly() {
    let (mut cpu, mut bus) = make_cpu();
    bus.load(0x0100, &[0x00; 0x100]); // plenty of NOPs
    cpu.registers_mut().set_pc(0x0100);
    let handle = cpu.exit_handle();
    handle.request_exit();
    cpu.execute(&mut bus, EmuTime::INFINITY);
    // The loop noticed the flag at an instruction boundary.
    assert!(cpu.current_time() < EmuTime::from_units(10_000));
}

#[test]
fn breakpoint_enters_breaked_state() {
    let (mut cpu, mut bus) = make_cpu();
    bus.load(0x0100, &[0x00, 0x00, 0x00, 0x76]);
    cpu.registers_mut().set_pc(0x0100);
    cpu.add_breakpoint(0x0102);
    cpu.execute(&mut bus, EmuTime::from_units(1_000_000));
    assert!(cpu.is_breaked());
    assert_eq!(cpu.registers().pc(), 0x0102);

    // Continue runs through to the HALT.
    cpu.do_continue();
    cpu.remove_breakpoint(0x0102);
    cpu.execute(&mut bus, EmuTime::from_units(2_000_000));
    assert!(cpu.registers().halt());
}
