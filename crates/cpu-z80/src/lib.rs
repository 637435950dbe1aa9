//! Cycle-accurate Z80 and R800 CPU cores.
//!
//! One interpreter, [`CpuCore`], monomorphised over a [`CpuPolicy`] that
//! supplies per-flavour cycle counts and the small behavioural differences
//! (undocumented flags, page-break and even-cycle penalties, the R800-only
//! multiply instructions). `CpuCore<Z80>` and `CpuCore<R800>` are the two
//! instantiations used by an MSX machine.

mod cpu;
mod dasm;
mod flags;
mod irq;
mod policy;
mod r800;
mod registers;
mod z80;

pub use cpu::{CpuConfig, CpuCore, CpuState, ExitHandle};
pub use dasm::{dasm, dasm_at, instruction_length};
pub use flags::{CF, HF, NF, PF, SF, VF, XF, YF, ZF};
pub use irq::{IrqHelper, IrqLines};
pub use policy::CpuPolicy;
pub use r800::R800;
pub use registers::{RegisterId, Registers};
pub use z80::Z80;
