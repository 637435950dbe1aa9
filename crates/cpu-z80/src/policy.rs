//! Per-flavour timing and behaviour policy.
//!
//! The interpreter is generic over this trait; `CpuCore<Z80>` and
//! `CpuCore<R800>` monomorphise the opcode dispatch so that cycle constants
//! fold away and the flavour checks compile out.
//!
//! Cycle constants come in families: `CC_FOO` is the total cost of the
//! instruction, `CC_FOO_1`/`CC_FOO_2` are the cycle offsets (from the start
//! of the instruction) at which its bus accesses happen — devices are
//! timestamped with these, so they observe accesses in program order even
//! though the interpreter adds the total only at the end of the
//! instruction. `EE_*` constants are extra costs folded into a shared
//! helper by a particular caller (e.g. the ED-prefixed 16-bit loads).

use emu_core::DynamicClock;

/// Cycle counts and behavioural switches for one CPU flavour.
pub trait CpuPolicy: Default {
    const NAME: &'static str;
    const IS_R800: bool;
    /// Power-on clock frequency in Hz.
    const CLOCK_FREQ: u64;

    // Prefix / fetch offsets.
    const CC_MAIN: u64;
    const CC_PREFIX: u64;
    const CC_DD: u64;
    const CC_DD_CB: u64;
    const CC_RDMEM: u64;
    const CC_WRMEM: u64;

    // 8-bit loads.
    const CC_LD_R_R: u64;
    const CC_LD_R_N: u64;
    const CC_LD_R_N_1: u64;
    const CC_LD_R_HL: u64;
    const CC_LD_R_HL_1: u64;
    const CC_LD_R_XIX: u64;
    const CC_LD_R_XIX_1: u64;
    const CC_LD_R_XIX_2: u64;
    const CC_LD_HL_R: u64;
    const CC_LD_HL_R_1: u64;
    const CC_LD_HL_N: u64;
    const CC_LD_HL_N_1: u64;
    const CC_LD_HL_N_2: u64;
    const CC_LD_XIX_R: u64;
    const CC_LD_XIX_R_1: u64;
    const CC_LD_XIX_R_2: u64;
    const CC_LD_XIX_N: u64;
    const CC_LD_XIX_N_1: u64;
    const CC_LD_XIX_N_2: u64;
    const CC_LD_SS_A: u64;
    const CC_LD_SS_A_1: u64;
    const CC_LD_A_SS: u64;
    const CC_LD_A_SS_1: u64;
    const CC_LD_NN_A: u64;
    const CC_LD_NN_A_1: u64;
    const CC_LD_NN_A_2: u64;
    const CC_LD_A_NN: u64;
    const CC_LD_A_NN_1: u64;
    const CC_LD_A_NN_2: u64;

    // 16-bit loads.
    const CC_LD_SS_NN: u64;
    const CC_LD_SS_NN_1: u64;
    const CC_LD_SP_HL: u64;
    const CC_LD_XX_HL: u64;
    const CC_LD_XX_HL_1: u64;
    const CC_LD_XX_HL_2: u64;
    const CC_LD_HL_XX: u64;
    const CC_LD_HL_XX_1: u64;
    const CC_LD_HL_XX_2: u64;
    /// Extra cost of the ED-prefixed forms of the 16-bit memory loads.
    const EE_ED: u64;

    // 8-bit arithmetic.
    const CC_CP_R: u64;
    const CC_CP_N: u64;
    const CC_CP_N_1: u64;
    const CC_CP_XHL: u64;
    const CC_CP_XHL_1: u64;
    const CC_CP_XIX: u64;
    const CC_CP_XIX_1: u64;
    const CC_CP_XIX_2: u64;
    const CC_INC_R: u64;
    const CC_INC_XHL: u64;
    const CC_INC_XHL_1: u64;
    const CC_INC_XHL_2: u64;
    const CC_INC_XIX_1: u64;
    const EE_INC_XIX: u64;

    // 16-bit arithmetic.
    const CC_INC_SS: u64;
    const CC_ADD_HL_SS: u64;
    const CC_ADC_HL_SS: u64;

    // Stack.
    const CC_PUSH: u64;
    const CC_PUSH_1: u64;
    const CC_POP: u64;
    const CC_POP_1: u64;

    // Control flow.
    const CC_CALL_A: u64;
    const CC_CALL_B: u64;
    const CC_CALL_1: u64;
    const EE_CALL: u64;
    const CC_RST: u64;
    const CC_RET_A: u64;
    const CC_RET_B: u64;
    const EE_RET_C: u64;
    const EE_RETN: u64;
    const CC_JP_A: u64;
    const CC_JP_B: u64;
    const CC_JP_1: u64;
    const CC_JP_HL: u64;
    const CC_JR_A: u64;
    const CC_JR_B: u64;
    const CC_JR_1: u64;
    const EE_DJNZ: u64;

    // Exchanges.
    const CC_EX: u64;
    const CC_EX_SP_HL: u64;
    const CC_EX_SP_HL_1: u64;
    const CC_EX_SP_HL_2: u64;

    // Bit operations (CB prefix).
    const CC_BIT_R: u64;
    const CC_BIT_XHL: u64;
    const CC_BIT_XHL_1: u64;
    const CC_BIT_XIX: u64;
    const CC_BIT_XIX_1: u64;
    const CC_SET_R: u64;
    const CC_SET_XHL: u64;
    const CC_SET_XHL_1: u64;
    const CC_SET_XHL_2: u64;
    const CC_SET_XIX: u64;
    const EE_SET_XIX: u64;

    // Rotates / misc.
    const CC_RLA: u64;
    const CC_RLD: u64;
    const CC_RLD_1: u64;
    const CC_RLD_2: u64;

    // I/O.
    const CC_IN_A_N: u64;
    const CC_IN_A_N_1: u64;
    const CC_IN_A_N_2: u64;
    const CC_IN_R_C: u64;
    const CC_IN_R_C_1: u64;
    const CC_OUT_N_A: u64;
    const CC_OUT_N_A_1: u64;
    const CC_OUT_N_A_2: u64;
    const CC_OUT_C_R: u64;
    const CC_OUT_C_R_1: u64;

    // Block instructions.
    const CC_CPI: u64;
    const CC_CPI_1: u64;
    const CC_CPIR: u64;
    const CC_LDI: u64;
    const CC_LDI_1: u64;
    const CC_LDI_2: u64;
    const CC_LDIR: u64;
    const CC_INI: u64;
    const CC_INI_1: u64;
    const CC_INI_2: u64;
    const CC_INIR: u64;
    const CC_OUTI: u64;
    const CC_OUTI_1: u64;
    const CC_OUTI_2: u64;
    const CC_OTIR: u64;

    // Various single-byte instructions.
    const CC_NOP: u64;
    const CC_DI: u64;
    const CC_EI: u64;
    const CC_HALT: u64;
    const CC_IM: u64;
    const CC_LD_A_I: u64;
    const CC_DAA: u64;
    const CC_CCF: u64;
    const CC_CPL: u64;
    const CC_SCF: u64;
    const CC_NEG: u64;

    // R800-only multiplies (unused constants on Z80).
    const CC_MULUB: u64;
    const CC_MULUW: u64;

    // Interrupt acceptance.
    const CC_NMI: u64;
    const EE_NMI_1: u64;
    const CC_IRQ0: u64;
    const EE_IRQ0_1: u64;
    const CC_IRQ1: u64;
    const EE_IRQ1_1: u64;
    const CC_IRQ2: u64;
    const EE_IRQ2_1: u64;
    const CC_IRQ2_2: u64;

    /// Clock advance per skipped instruction while halted.
    const HALT_STATES: u64;

    /// Called before a data memory access. The R800 charges one cycle when
    /// the access leaves the 256-byte page of the previous one.
    fn pre_mem(&mut self, clock: &mut DynamicClock, address: u16);

    /// Called after a data memory access; latches the page for the next
    /// [`CpuPolicy::pre_mem`].
    fn post_mem(&mut self, address: u16);

    /// Called once per instruction before the opcode fetch; same page-break
    /// rule as [`CpuPolicy::pre_mem`]. This is where jumps to another page
    /// (and data accesses followed by a fetch elsewhere) get charged.
    fn pre_fetch(&mut self, clock: &mut DynamicClock, address: u16);

    /// Unconditionally break the page for the next access, even when it
    /// stays in the same page. Used by the relative-jump end-of-page quirk
    /// and by reset/CPU-switch.
    fn force_page_break(&mut self);

    /// R800 I/O alignment: external bus accesses must start on an even
    /// internal cycle; add one cycle when `cc` cycles from now would land
    /// on an odd one.
    fn wait_for_even_cycle(&mut self, clock: &mut DynamicClock, cc: u64);
}
