//! Cache-line table for the CPU memory fast path.
//!
//! The 64 KiB address space is split into 256-byte lines. For every line
//! the table remembers whether a direct byte pointer into device storage is
//! available. Any device reconfiguration (bank switch, slot change, …) must
//! invalidate the affected lines; the table is rebuilt lazily and is never
//! part of a savestate.

use std::cell::RefCell;
use std::rc::Rc;

use crate::shared::SharedBytes;

pub const CACHE_LINE_BITS: usize = 8;
pub const CACHE_LINE_SIZE: usize = 1 << CACHE_LINE_BITS;
pub const CACHE_LINE_NUM: usize = 0x1_0000 / CACHE_LINE_SIZE;

/// Direct access to the 256 bytes backing one cache line.
#[derive(Debug, Clone)]
pub struct CacheSlice {
    bytes: SharedBytes,
    /// Offset of the line start inside `bytes`.
    start: usize,
}

impl CacheSlice {
    /// # Panics
    ///
    /// Panics when the line does not fit inside `bytes`.
    #[must_use]
    pub fn new(bytes: SharedBytes, start: usize) -> Self {
        assert!(start + CACHE_LINE_SIZE <= bytes.len());
        Self { bytes, start }
    }

    #[must_use]
    pub fn read(&self, low: u8) -> u8 {
        self.bytes.read(self.start + low as usize)
    }

    pub fn write(&self, low: u8, value: u8) {
        self.bytes.write(self.start + low as usize, value);
    }
}

/// State of one cache line.
#[derive(Debug, Clone, Default)]
pub enum CacheEntry {
    /// Never probed; the next access asks the bus whether the line is
    /// cacheable.
    #[default]
    Unprobed,
    /// Probed and refused: every access to this line takes the slow path
    /// until the line is invalidated.
    Uncacheable,
    /// Direct byte access, bypassing device dispatch.
    Cached(CacheSlice),
}

struct Lines {
    read: [CacheEntry; CACHE_LINE_NUM],
    write: [CacheEntry; CACHE_LINE_NUM],
}

/// Shared handle to the read/write cache-line tables.
///
/// The interpreter looks lines up and fills them after probing; the bus
/// router invalidates them on reconfiguration. Both run on the same thread.
#[derive(Clone)]
pub struct CacheTable {
    lines: Rc<RefCell<Lines>>,
}

impl Default for CacheTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lines: Rc::new(RefCell::new(Lines {
                read: std::array::from_fn(|_| CacheEntry::Unprobed),
                write: std::array::from_fn(|_| CacheEntry::Unprobed),
            })),
        }
    }

    #[must_use]
    pub fn read_entry(&self, line: usize) -> CacheEntry {
        self.lines.borrow().read[line].clone()
    }

    #[must_use]
    pub fn write_entry(&self, line: usize) -> CacheEntry {
        self.lines.borrow().write[line].clone()
    }

    pub fn set_read_entry(&self, line: usize, entry: CacheEntry) {
        self.lines.borrow_mut().read[line] = entry;
    }

    pub fn set_write_entry(&self, line: usize, entry: CacheEntry) {
        self.lines.borrow_mut().write[line] = entry;
    }

    /// Forget everything known about the lines covering
    /// `[start, start + num * CACHE_LINE_SIZE)`.
    pub fn invalidate(&self, start: u16, num: usize) {
        let first = start as usize >> CACHE_LINE_BITS;
        let mut lines = self.lines.borrow_mut();
        for line in first..(first + num).min(CACHE_LINE_NUM) {
            lines.read[line] = CacheEntry::Unprobed;
            lines.write[line] = CacheEntry::Unprobed;
        }
    }

    pub fn invalidate_all(&self) {
        self.invalidate(0, CACHE_LINE_NUM);
    }
}

impl std::fmt::Debug for CacheTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CacheTable")
    }
}
