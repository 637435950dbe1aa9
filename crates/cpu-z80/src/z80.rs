//! Z80 timing policy.
//!
//! Cycle counts are the standard documented T-states; the extra MSX wait
//! states (one per M1 cycle on a real MSX) are configured at core
//! construction and applied by the interpreter, not folded into these
//! constants.

use emu_core::DynamicClock;

use crate::policy::CpuPolicy;

/// The Zilog Z80 at 3.58 MHz. No page-break or alignment penalties.
#[derive(Debug, Clone, Copy, Default)]
pub struct Z80;

impl CpuPolicy for Z80 {
    const NAME: &'static str = "Z80";
    const IS_R800: bool = false;
    const CLOCK_FREQ: u64 = 3_579_545;

    const CC_MAIN: u64 = 0;
    const CC_PREFIX: u64 = 4;
    const CC_DD: u64 = 4;
    const CC_DD_CB: u64 = 4;
    const CC_RDMEM: u64 = 3;
    const CC_WRMEM: u64 = 3;

    const CC_LD_R_R: u64 = 4;
    const CC_LD_R_N: u64 = 7;
    const CC_LD_R_N_1: u64 = 4;
    const CC_LD_R_HL: u64 = 7;
    const CC_LD_R_HL_1: u64 = 4;
    const CC_LD_R_XIX: u64 = 15;
    const CC_LD_R_XIX_1: u64 = 4;
    const CC_LD_R_XIX_2: u64 = 12;
    const CC_LD_HL_R: u64 = 7;
    const CC_LD_HL_R_1: u64 = 4;
    const CC_LD_HL_N: u64 = 10;
    const CC_LD_HL_N_1: u64 = 4;
    const CC_LD_HL_N_2: u64 = 7;
    const CC_LD_XIX_R: u64 = 15;
    const CC_LD_XIX_R_1: u64 = 4;
    const CC_LD_XIX_R_2: u64 = 12;
    const CC_LD_XIX_N: u64 = 15;
    const CC_LD_XIX_N_1: u64 = 4;
    const CC_LD_XIX_N_2: u64 = 12;
    const CC_LD_SS_A: u64 = 7;
    const CC_LD_SS_A_1: u64 = 4;
    const CC_LD_A_SS: u64 = 7;
    const CC_LD_A_SS_1: u64 = 4;
    const CC_LD_NN_A: u64 = 13;
    const CC_LD_NN_A_1: u64 = 4;
    const CC_LD_NN_A_2: u64 = 10;
    const CC_LD_A_NN: u64 = 13;
    const CC_LD_A_NN_1: u64 = 4;
    const CC_LD_A_NN_2: u64 = 10;

    const CC_LD_SS_NN: u64 = 10;
    const CC_LD_SS_NN_1: u64 = 4;
    const CC_LD_SP_HL: u64 = 6;
    const CC_LD_XX_HL: u64 = 16;
    const CC_LD_XX_HL_1: u64 = 4;
    const CC_LD_XX_HL_2: u64 = 10;
    const CC_LD_HL_XX: u64 = 16;
    const CC_LD_HL_XX_1: u64 = 4;
    const CC_LD_HL_XX_2: u64 = 10;
    const EE_ED: u64 = 4;

    const CC_CP_R: u64 = 4;
    const CC_CP_N: u64 = 7;
    const CC_CP_N_1: u64 = 4;
    const CC_CP_XHL: u64 = 7;
    const CC_CP_XHL_1: u64 = 4;
    const CC_CP_XIX: u64 = 15;
    const CC_CP_XIX_1: u64 = 4;
    const CC_CP_XIX_2: u64 = 12;
    const CC_INC_R: u64 = 4;
    const CC_INC_XHL: u64 = 11;
    const CC_INC_XHL_1: u64 = 4;
    const CC_INC_XHL_2: u64 = 8;
    const CC_INC_XIX_1: u64 = 4;
    const EE_INC_XIX: u64 = 8;

    const CC_INC_SS: u64 = 6;
    const CC_ADD_HL_SS: u64 = 11;
    const CC_ADC_HL_SS: u64 = 15;

    const CC_PUSH: u64 = 11;
    const CC_PUSH_1: u64 = 5;
    const CC_POP: u64 = 10;
    const CC_POP_1: u64 = 4;

    const CC_CALL_A: u64 = 17;
    const CC_CALL_B: u64 = 10;
    const CC_CALL_1: u64 = 4;
    const EE_CALL: u64 = 6;
    const CC_RST: u64 = 11;
    const CC_RET_A: u64 = 10;
    const CC_RET_B: u64 = 4;
    const EE_RET_C: u64 = 1;
    const EE_RETN: u64 = 4;
    const CC_JP_A: u64 = 10;
    const CC_JP_B: u64 = 10;
    const CC_JP_1: u64 = 4;
    const CC_JP_HL: u64 = 4;
    const CC_JR_A: u64 = 12;
    const CC_JR_B: u64 = 7;
    const CC_JR_1: u64 = 4;
    const EE_DJNZ: u64 = 1;

    const CC_EX: u64 = 4;
    const CC_EX_SP_HL: u64 = 19;
    const CC_EX_SP_HL_1: u64 = 4;
    const CC_EX_SP_HL_2: u64 = 11;

    const CC_BIT_R: u64 = 8;
    const CC_BIT_XHL: u64 = 12;
    const CC_BIT_XHL_1: u64 = 8;
    const CC_BIT_XIX: u64 = 16;
    const CC_BIT_XIX_1: u64 = 12;
    const CC_SET_R: u64 = 8;
    const CC_SET_XHL: u64 = 15;
    const CC_SET_XHL_1: u64 = 8;
    const CC_SET_XHL_2: u64 = 12;
    const CC_SET_XIX: u64 = 19;
    const EE_SET_XIX: u64 = 4;

    const CC_RLA: u64 = 4;
    const CC_RLD: u64 = 18;
    const CC_RLD_1: u64 = 8;
    const CC_RLD_2: u64 = 15;

    const CC_IN_A_N: u64 = 11;
    const CC_IN_A_N_1: u64 = 4;
    const CC_IN_A_N_2: u64 = 7;
    const CC_IN_R_C: u64 = 12;
    const CC_IN_R_C_1: u64 = 8;
    const CC_OUT_N_A: u64 = 11;
    const CC_OUT_N_A_1: u64 = 4;
    const CC_OUT_N_A_2: u64 = 7;
    const CC_OUT_C_R: u64 = 12;
    const CC_OUT_C_R_1: u64 = 8;

    const CC_CPI: u64 = 16;
    const CC_CPI_1: u64 = 8;
    const CC_CPIR: u64 = 21;
    const CC_LDI: u64 = 16;
    const CC_LDI_1: u64 = 8;
    const CC_LDI_2: u64 = 11;
    const CC_LDIR: u64 = 21;
    const CC_INI: u64 = 16;
    const CC_INI_1: u64 = 8;
    const CC_INI_2: u64 = 12;
    const CC_INIR: u64 = 21;
    const CC_OUTI: u64 = 16;
    const CC_OUTI_1: u64 = 8;
    const CC_OUTI_2: u64 = 12;
    const CC_OTIR: u64 = 21;

    const CC_NOP: u64 = 4;
    const CC_DI: u64 = 4;
    const CC_EI: u64 = 4;
    const CC_HALT: u64 = 4;
    const CC_IM: u64 = 8;
    const CC_LD_A_I: u64 = 9;
    const CC_DAA: u64 = 4;
    const CC_CCF: u64 = 4;
    const CC_CPL: u64 = 4;
    const CC_SCF: u64 = 4;
    const CC_NEG: u64 = 8;

    // ED C1/C3/… execute as two-byte NOPs on Z80; the constants are never
    // reached but must exist.
    const CC_MULUB: u64 = 8;
    const CC_MULUW: u64 = 8;

    const CC_NMI: u64 = 11;
    const EE_NMI_1: u64 = 0;
    const CC_IRQ0: u64 = 13;
    const EE_IRQ0_1: u64 = 2;
    const CC_IRQ1: u64 = 13;
    const EE_IRQ1_1: u64 = 2;
    const CC_IRQ2: u64 = 19;
    const EE_IRQ2_1: u64 = 2;
    const CC_IRQ2_2: u64 = 13;

    const HALT_STATES: u64 = 4;

    fn pre_mem(&mut self, _clock: &mut DynamicClock, _address: u16) {}

    fn post_mem(&mut self, _address: u16) {}

    fn pre_fetch(&mut self, _clock: &mut DynamicClock, _address: u16) {}

    fn force_page_break(&mut self) {}

    fn wait_for_even_cycle(&mut self, _clock: &mut DynamicClock, _cc: u64) {}
}
