//! MSX slot router, bus and machine context.
//!
//! Every CPU memory access is routed through the 4×4 primary/secondary
//! slot map; I/O goes through a 256-entry port table with multi-device
//! fan-out. The machine context wires the two CPU cores (Z80 and R800),
//! the bus, the scheduler and the shared interrupt lines together without
//! any global state.

mod bus;
mod device;
mod machine;
mod vdp_delay;

pub use bus::{DeviceId, MsxBus, SlotConfigError};
pub use device::{DummyDevice, MemoryMapper, MsxDevice, Ram, Rom};
pub use machine::{CpuModel, Msx, MsxCpu};
pub use vdp_delay::VdpIoDelay;
