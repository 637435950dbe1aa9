//! Memory and I/O bus interface.

use crate::cache::{CacheSlice, CACHE_LINE_SIZE};
use crate::shared::SharedBytes;
use crate::time::EmuTime;

/// What the CPU interpreter talks to.
///
/// The bus handles address decoding and routing to the appropriate device.
/// Every access carries the CPU time of the exact cycle it happens on, so
/// devices observe accesses in strict program order.
pub trait Bus {
    /// Read a byte from the given address. Also used for opcode fetch.
    fn read_mem(&mut self, address: u16, time: EmuTime) -> u8;

    /// Write a byte to the given address.
    fn write_mem(&mut self, address: u16, value: u8, time: EmuTime);

    /// Read a byte from the given I/O port. Only the low 8 bits select the
    /// port; the full 16-bit value is what the CPU drives on the address
    /// bus.
    fn read_io(&mut self, port: u16, time: EmuTime) -> u8;

    /// Write a byte to the given I/O port.
    fn write_io(&mut self, port: u16, value: u8, time: EmuTime);

    /// Side-effect-free read, for tooling (disassembler, debugger).
    fn peek_mem(&self, address: u16) -> u8;

    /// Probe whether `[start, start + 256)` can be read without device
    /// dispatch. `None` means every read must go through [`Bus::read_mem`].
    fn read_cache_line(&mut self, start: u16) -> Option<CacheSlice>;

    /// Probe whether `[start, start + 256)` can be written without device
    /// dispatch.
    fn write_cache_line(&mut self, start: u16) -> Option<CacheSlice>;

    /// The byte the data bus carries while an interrupt is accepted.
    /// 0xFF on MSX.
    fn irq_vector(&mut self) -> u8 {
        0xFF
    }
}

/// Flat 64 KiB of fully cacheable RAM. For CPU-only tests.
pub struct SimpleBus {
    ram: SharedBytes,
}

impl Default for SimpleBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ram: SharedBytes::new(0x1_0000, 0),
        }
    }

    /// Copy `bytes` into RAM starting at `address`.
    pub fn load(&mut self, address: u16, bytes: &[u8]) {
        self.ram.load(address as usize, bytes);
    }

    #[must_use]
    pub fn peek(&self, address: u16) -> u8 {
        self.ram.read(address as usize)
    }

    pub fn poke(&mut self, address: u16, value: u8) {
        self.ram.write(address as usize, value);
    }
}

impl Bus for SimpleBus {
    fn read_mem(&mut self, address: u16, _time: EmuTime) -> u8 {
        self.ram.read(address as usize)
    }

    fn write_mem(&mut self, address: u16, value: u8, _time: EmuTime) {
        self.ram.write(address as usize, value);
    }

    fn read_io(&mut self, _port: u16, _time: EmuTime) -> u8 {
        0xFF
    }

    fn write_io(&mut self, _port: u16, _value: u8, _time: EmuTime) {}

    fn peek_mem(&self, address: u16) -> u8 {
        self.ram.read(address as usize)
    }

    fn read_cache_line(&mut self, start: u16) -> Option<CacheSlice> {
        debug_assert_eq!(start as usize % CACHE_LINE_SIZE, 0);
        Some(CacheSlice::new(self.ram.clone(), start as usize))
    }

    fn write_cache_line(&mut self, start: u16) -> Option<CacheSlice> {
        debug_assert_eq!(start as usize % CACHE_LINE_SIZE, 0);
        Some(CacheSlice::new(self.ram.clone(), start as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_bus_round_trip() {
        let mut bus = SimpleBus::new();
        bus.write_mem(0x8000, 0x42, EmuTime::ZERO);
        assert_eq!(bus.read_mem(0x8000, EmuTime::ZERO), 0x42);
        assert_eq!(bus.peek_mem(0x8000), 0x42);
    }

    #[test]
    fn cache_line_sees_bus_writes() {
        let mut bus = SimpleBus::new();
        let line = bus.read_cache_line(0x8000).expect("cacheable");
        bus.write_mem(0x8005, 0x99, EmuTime::ZERO);
        assert_eq!(line.read(0x05), 0x99);
    }
}
