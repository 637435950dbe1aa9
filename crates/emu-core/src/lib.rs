//! Core timing, scheduling and bus types for cycle-accurate emulation.
//!
//! All timing derives from one master frequency. Components run at divided
//! rates through [`DynamicClock`]; absolute instants are [`EmuTime`].
//! The whole emulation is single-threaded and cooperative: none of the
//! shared handles in this crate are `Sync`, and the only cross-thread
//! datum lives in the CPU core (its atomic exit flag).

mod bus;
mod cache;
mod clock;
mod scheduler;
mod shared;
mod time;

pub use bus::{Bus, SimpleBus};
pub use cache::{CacheEntry, CacheSlice, CacheTable, CACHE_LINE_BITS, CACHE_LINE_NUM, CACHE_LINE_SIZE};
pub use clock::DynamicClock;
pub use scheduler::{Schedulable, Scheduler, SyncPoint};
pub use shared::SharedBytes;
pub use time::{EmuDuration, EmuTime, MAIN_FREQ};
