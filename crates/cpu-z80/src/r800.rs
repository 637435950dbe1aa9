//! R800 timing policy.
//!
//! The R800 runs at twice the Z80 frequency and fetches roughly one byte
//! per cycle. Two penalties come on top of the base counts:
//!
//! - a one-cycle page break whenever a data access leaves the 256-byte
//!   page of the previous access (or after any non-sequential PC change);
//! - a one-cycle alignment stall when an external I/O access would start
//!   on an odd internal cycle.

use emu_core::DynamicClock;

use crate::policy::CpuPolicy;

/// Sentinel page value meaning "the next access always breaks".
const FORCED: u32 = u32::MAX;

/// The R800 at 7.16 MHz.
#[derive(Debug, Clone, Copy)]
pub struct R800 {
    /// 256-byte page of the last data access, or [`FORCED`].
    last_page: u32,
}

impl Default for R800 {
    fn default() -> Self {
        Self { last_page: FORCED }
    }
}

impl CpuPolicy for R800 {
    const NAME: &'static str = "R800";
    const IS_R800: bool = true;
    const CLOCK_FREQ: u64 = 7_159_090;

    const CC_MAIN: u64 = 0;
    const CC_PREFIX: u64 = 1;
    const CC_DD: u64 = 1;
    const CC_DD_CB: u64 = 1;
    const CC_RDMEM: u64 = 1;
    const CC_WRMEM: u64 = 1;

    const CC_LD_R_R: u64 = 1;
    const CC_LD_R_N: u64 = 2;
    const CC_LD_R_N_1: u64 = 1;
    const CC_LD_R_HL: u64 = 2;
    const CC_LD_R_HL_1: u64 = 1;
    const CC_LD_R_XIX: u64 = 3;
    const CC_LD_R_XIX_1: u64 = 1;
    const CC_LD_R_XIX_2: u64 = 2;
    const CC_LD_HL_R: u64 = 2;
    const CC_LD_HL_R_1: u64 = 1;
    const CC_LD_HL_N: u64 = 3;
    const CC_LD_HL_N_1: u64 = 1;
    const CC_LD_HL_N_2: u64 = 2;
    const CC_LD_XIX_R: u64 = 3;
    const CC_LD_XIX_R_1: u64 = 1;
    const CC_LD_XIX_R_2: u64 = 2;
    const CC_LD_XIX_N: u64 = 4;
    const CC_LD_XIX_N_1: u64 = 1;
    const CC_LD_XIX_N_2: u64 = 3;
    const CC_LD_SS_A: u64 = 2;
    const CC_LD_SS_A_1: u64 = 1;
    const CC_LD_A_SS: u64 = 2;
    const CC_LD_A_SS_1: u64 = 1;
    const CC_LD_NN_A: u64 = 4;
    const CC_LD_NN_A_1: u64 = 1;
    const CC_LD_NN_A_2: u64 = 3;
    const CC_LD_A_NN: u64 = 4;
    const CC_LD_A_NN_1: u64 = 1;
    const CC_LD_A_NN_2: u64 = 3;

    const CC_LD_SS_NN: u64 = 3;
    const CC_LD_SS_NN_1: u64 = 1;
    const CC_LD_SP_HL: u64 = 1;
    const CC_LD_XX_HL: u64 = 5;
    const CC_LD_XX_HL_1: u64 = 1;
    const CC_LD_XX_HL_2: u64 = 3;
    const CC_LD_HL_XX: u64 = 5;
    const CC_LD_HL_XX_1: u64 = 1;
    const CC_LD_HL_XX_2: u64 = 3;
    const EE_ED: u64 = 1;

    const CC_CP_R: u64 = 1;
    const CC_CP_N: u64 = 2;
    const CC_CP_N_1: u64 = 1;
    const CC_CP_XHL: u64 = 2;
    const CC_CP_XHL_1: u64 = 1;
    const CC_CP_XIX: u64 = 3;
    const CC_CP_XIX_1: u64 = 1;
    const CC_CP_XIX_2: u64 = 2;
    const CC_INC_R: u64 = 1;
    const CC_INC_XHL: u64 = 4;
    const CC_INC_XHL_1: u64 = 1;
    const CC_INC_XHL_2: u64 = 3;
    const CC_INC_XIX_1: u64 = 1;
    const EE_INC_XIX: u64 = 1;

    const CC_INC_SS: u64 = 1;
    const CC_ADD_HL_SS: u64 = 1;
    const CC_ADC_HL_SS: u64 = 2;

    const CC_PUSH: u64 = 4;
    const CC_PUSH_1: u64 = 1;
    const CC_POP: u64 = 3;
    const CC_POP_1: u64 = 1;

    const CC_CALL_A: u64 = 5;
    const CC_CALL_B: u64 = 3;
    const CC_CALL_1: u64 = 1;
    const EE_CALL: u64 = 2;
    const CC_RST: u64 = 4;
    const CC_RET_A: u64 = 3;
    const CC_RET_B: u64 = 1;
    const EE_RET_C: u64 = 0;
    const EE_RETN: u64 = 2;
    const CC_JP_A: u64 = 3;
    const CC_JP_B: u64 = 3;
    const CC_JP_1: u64 = 1;
    const CC_JP_HL: u64 = 1;
    const CC_JR_A: u64 = 3;
    const CC_JR_B: u64 = 2;
    const CC_JR_1: u64 = 1;
    const EE_DJNZ: u64 = 0;

    const CC_EX: u64 = 1;
    const CC_EX_SP_HL: u64 = 5;
    const CC_EX_SP_HL_1: u64 = 1;
    const CC_EX_SP_HL_2: u64 = 3;

    const CC_BIT_R: u64 = 2;
    const CC_BIT_XHL: u64 = 3;
    const CC_BIT_XHL_1: u64 = 2;
    const CC_BIT_XIX: u64 = 3;
    const CC_BIT_XIX_1: u64 = 2;
    const CC_SET_R: u64 = 2;
    const CC_SET_XHL: u64 = 4;
    const CC_SET_XHL_1: u64 = 2;
    const CC_SET_XHL_2: u64 = 3;
    const CC_SET_XIX: u64 = 5;
    const EE_SET_XIX: u64 = 1;

    const CC_RLA: u64 = 1;
    const CC_RLD: u64 = 5;
    const CC_RLD_1: u64 = 2;
    const CC_RLD_2: u64 = 4;

    const CC_IN_A_N: u64 = 3;
    const CC_IN_A_N_1: u64 = 1;
    const CC_IN_A_N_2: u64 = 2;
    const CC_IN_R_C: u64 = 3;
    const CC_IN_R_C_1: u64 = 2;
    const CC_OUT_N_A: u64 = 3;
    const CC_OUT_N_A_1: u64 = 1;
    const CC_OUT_N_A_2: u64 = 2;
    const CC_OUT_C_R: u64 = 3;
    const CC_OUT_C_R_1: u64 = 2;

    const CC_CPI: u64 = 4;
    const CC_CPI_1: u64 = 2;
    const CC_CPIR: u64 = 5;
    const CC_LDI: u64 = 4;
    const CC_LDI_1: u64 = 2;
    const CC_LDI_2: u64 = 3;
    const CC_LDIR: u64 = 5;
    const CC_INI: u64 = 4;
    const CC_INI_1: u64 = 2;
    const CC_INI_2: u64 = 3;
    const CC_INIR: u64 = 5;
    const CC_OUTI: u64 = 4;
    const CC_OUTI_1: u64 = 2;
    const CC_OUTI_2: u64 = 3;
    const CC_OTIR: u64 = 5;

    const CC_NOP: u64 = 1;
    const CC_DI: u64 = 2;
    const CC_EI: u64 = 1;
    const CC_HALT: u64 = 2;
    const CC_IM: u64 = 3;
    const CC_LD_A_I: u64 = 2;
    const CC_DAA: u64 = 1;
    const CC_CCF: u64 = 1;
    const CC_CPL: u64 = 1;
    const CC_SCF: u64 = 1;
    const CC_NEG: u64 = 2;

    const CC_MULUB: u64 = 14;
    const CC_MULUW: u64 = 36;

    const CC_NMI: u64 = 4;
    const EE_NMI_1: u64 = 0;
    const CC_IRQ0: u64 = 6;
    const EE_IRQ0_1: u64 = 1;
    const CC_IRQ1: u64 = 6;
    const EE_IRQ1_1: u64 = 1;
    const CC_IRQ2: u64 = 8;
    const EE_IRQ2_1: u64 = 1;
    const CC_IRQ2_2: u64 = 4;

    const HALT_STATES: u64 = 1;

    fn pre_mem(&mut self, clock: &mut DynamicClock, address: u16) {
        let page = u32::from(address >> 8);
        if page != self.last_page {
            clock.add(1);
        }
        self.last_page = page;
    }

    fn post_mem(&mut self, address: u16) {
        self.last_page = u32::from(address >> 8);
    }

    fn pre_fetch(&mut self, clock: &mut DynamicClock, address: u16) {
        let page = u32::from(address >> 8);
        if page != self.last_page {
            clock.add(1);
        }
        self.last_page = page;
    }

    fn force_page_break(&mut self) {
        self.last_page = FORCED;
    }

    fn wait_for_even_cycle(&mut self, clock: &mut DynamicClock, cc: u64) {
        if (clock.total_ticks() + cc) & 1 != 0 {
            clock.add(1);
        }
    }
}
