//! The device contract and the reference memory devices.

use emu_core::{CacheSlice, CacheTable, EmuTime, Schedulable, SharedBytes, CACHE_LINE_SIZE};

/// A memory-mapped and/or I/O-mapped device.
///
/// Memory methods receive full 16-bit addresses; a device is only called
/// for pages it was registered on, but must tolerate any address. The
/// cache-line probes are the fast-path contract: returning a slice means
/// the 256-byte line can be serviced without calling back into the device
/// (and therefore without observing time); `None` forces the slow path.
pub trait MsxDevice {
    fn name(&self) -> &str;

    fn reset(&mut self, _time: EmuTime) {}

    fn read_mem(&mut self, _address: u16, _time: EmuTime) -> u8 {
        0xFF
    }

    fn write_mem(&mut self, _address: u16, _value: u8, _time: EmuTime) {}

    /// Side-effect-free read for tooling.
    fn peek_mem(&self, _address: u16) -> u8 {
        0xFF
    }

    fn read_cache_line(&self, _start: u16) -> Option<CacheSlice> {
        None
    }

    fn write_cache_line(&mut self, _start: u16) -> Option<CacheSlice> {
        None
    }

    fn read_io(&mut self, _port: u8, _time: EmuTime) -> u8 {
        0xFF
    }

    fn write_io(&mut self, _port: u8, _value: u8, _time: EmuTime) {}

    fn peek_io(&self, _port: u8) -> u8 {
        0xFF
    }

    /// Sync-point callback; `token` is the cookie the device scheduled
    /// with.
    fn execute_until(&mut self, _time: EmuTime, _token: u32) {}
}

impl Schedulable for Box<dyn MsxDevice> {
    fn execute_until(&mut self, time: EmuTime, token: u32) {
        MsxDevice::execute_until(&mut **self, time, token);
    }
}

/// Fills unoccupied slots. Reads float to 0xFF, writes disappear.
#[derive(Debug, Default)]
pub struct DummyDevice;

impl MsxDevice for DummyDevice {
    fn name(&self) -> &str {
        "empty"
    }
}

/// Plain RAM covering `[base, base + len)`. Fully cacheable.
pub struct Ram {
    name: String,
    bytes: SharedBytes,
    base: u16,
}

impl Ram {
    #[must_use]
    pub fn new(name: &str, base: u16, len: usize) -> Self {
        Self {
            name: name.to_owned(),
            bytes: SharedBytes::new(len, 0x00),
            base,
        }
    }

    #[must_use]
    pub fn bytes(&self) -> SharedBytes {
        self.bytes.clone()
    }

    fn offset(&self, address: u16) -> usize {
        usize::from(address.wrapping_sub(self.base))
    }
}

impl MsxDevice for Ram {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self, _time: EmuTime) {}

    fn read_mem(&mut self, address: u16, _time: EmuTime) -> u8 {
        self.bytes.read(self.offset(address))
    }

    fn write_mem(&mut self, address: u16, value: u8, _time: EmuTime) {
        self.bytes.write(self.offset(address), value);
    }

    fn peek_mem(&self, address: u16) -> u8 {
        self.bytes.read(self.offset(address))
    }

    fn read_cache_line(&self, start: u16) -> Option<CacheSlice> {
        Some(CacheSlice::new(self.bytes.clone(), self.offset(start)))
    }

    fn write_cache_line(&mut self, start: u16) -> Option<CacheSlice> {
        Some(CacheSlice::new(self.bytes.clone(), self.offset(start)))
    }
}

/// ROM mapped at `[base, base + len)`. Reads are cacheable, writes are
/// silently ignored.
pub struct Rom {
    name: String,
    bytes: SharedBytes,
    base: u16,
}

impl Rom {
    #[must_use]
    pub fn new(name: &str, base: u16, data: &[u8]) -> Self {
        Self {
            name: name.to_owned(),
            bytes: SharedBytes::from_slice(data),
            base,
        }
    }

    fn offset(&self, address: u16) -> usize {
        usize::from(address.wrapping_sub(self.base))
    }
}

impl MsxDevice for Rom {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_mem(&mut self, address: u16, _time: EmuTime) -> u8 {
        self.bytes.read(self.offset(address))
    }

    fn peek_mem(&self, address: u16) -> u8 {
        self.bytes.read(self.offset(address))
    }

    fn read_cache_line(&self, start: u16) -> Option<CacheSlice> {
        Some(CacheSlice::new(self.bytes.clone(), self.offset(start)))
    }

    // write_mem: ROM ignores writes; write_cache_line stays None so every
    // write keeps taking the slow path into the ignore.
}

/// Banked RAM behind I/O ports 0xFC-0xFF, one bank register per 16 KiB
/// page. A bank switch remaps a whole page, so the affected cache lines
/// are invalidated on every register write.
pub struct MemoryMapper {
    name: String,
    bytes: SharedBytes,
    banks: [u8; 4],
    num_banks: u8,
    cache: CacheTable,
}

impl MemoryMapper {
    /// `size` is the total RAM size; must be a multiple of 16 KiB.
    ///
    /// # Panics
    ///
    /// Panics when `size` is not a positive multiple of 16 KiB.
    #[must_use]
    pub fn new(name: &str, size: usize, cache: CacheTable) -> Self {
        assert!(size > 0 && size % 0x4000 == 0, "mapper size must be n*16KiB");
        let num_banks = (size / 0x4000) as u8;
        Self {
            name: name.to_owned(),
            bytes: SharedBytes::new(size, 0x00),
            banks: [3, 2, 1, 0],
            num_banks,
            cache,
        }
    }

    #[must_use]
    pub fn bank(&self, page: u8) -> u8 {
        self.banks[usize::from(page & 3)]
    }

    #[must_use]
    pub fn bytes(&self) -> SharedBytes {
        self.bytes.clone()
    }

    fn backing_offset(&self, address: u16) -> usize {
        let page = usize::from(address >> 14);
        let bank = usize::from(self.banks[page] % self.num_banks);
        bank * 0x4000 + usize::from(address & 0x3FFF)
    }
}

impl MsxDevice for MemoryMapper {
    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self, _time: EmuTime) {
        // Hardware keeps the bank registers across reset; the classic BIOS
        // reprograms them anyway.
    }

    fn read_mem(&mut self, address: u16, _time: EmuTime) -> u8 {
        self.bytes.read(self.backing_offset(address))
    }

    fn write_mem(&mut self, address: u16, value: u8, _time: EmuTime) {
        self.bytes.write(self.backing_offset(address), value);
    }

    fn peek_mem(&self, address: u16) -> u8 {
        self.bytes.read(self.backing_offset(address))
    }

    fn read_cache_line(&self, start: u16) -> Option<CacheSlice> {
        debug_assert_eq!(usize::from(start) % CACHE_LINE_SIZE, 0);
        Some(CacheSlice::new(self.bytes.clone(), self.backing_offset(start)))
    }

    fn write_cache_line(&mut self, start: u16) -> Option<CacheSlice> {
        Some(CacheSlice::new(self.bytes.clone(), self.backing_offset(start)))
    }

    fn read_io(&mut self, port: u8, _time: EmuTime) -> u8 {
        self.peek_io(port)
    }

    fn write_io(&mut self, port: u8, value: u8, _time: EmuTime) {
        let page = usize::from(port & 3);
        let bank = value % self.num_banks;
        if self.banks[page] != bank {
            self.banks[page] = bank;
            // The page now shows different backing bytes; cached lines
            // covering it are stale.
            self.cache.invalidate((page as u16) << 14, 0x4000 / CACHE_LINE_SIZE);
        }
    }

    fn peek_io(&self, port: u8) -> u8 {
        self.banks[usize::from(port & 3)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_read_write() {
        let mut ram = Ram::new("test ram", 0x8000, 0x4000);
        ram.write_mem(0x8123, 0xAB, EmuTime::ZERO);
        assert_eq!(ram.read_mem(0x8123, EmuTime::ZERO), 0xAB);
        assert_eq!(ram.peek_mem(0x8123), 0xAB);
    }

    #[test]
    fn ram_cache_line_aliases_storage() {
        let mut ram = Ram::new("test ram", 0x8000, 0x4000);
        let line = ram.read_cache_line(0x8100).expect("cacheable");
        ram.write_mem(0x8105, 0x42, EmuTime::ZERO);
        assert_eq!(line.read(0x05), 0x42);
    }

    #[test]
    fn rom_ignores_writes() {
        let mut rom = Rom::new("test rom", 0x0000, &[0x11; 0x4000]);
        rom.write_mem(0x0000, 0x99, EmuTime::ZERO);
        assert_eq!(rom.read_mem(0x0000, EmuTime::ZERO), 0x11);
        assert!(rom.write_cache_line(0x0000).is_none());
        assert!(rom.read_cache_line(0x0000).is_some());
    }

    #[test]
    fn mapper_bank_switch_moves_backing_bytes() {
        let cache = CacheTable::new();
        let mut mapper = MemoryMapper::new("mapper", 0x10000, cache);
        // Power-on layout: page 0 -> bank 3.
        assert_eq!(mapper.bank(0), 3);
        mapper.write_mem(0x0000, 0x33, EmuTime::ZERO);
        mapper.write_io(0xFC, 0, EmuTime::ZERO); // page 0 -> bank 0
        assert_eq!(mapper.read_mem(0x0000, EmuTime::ZERO), 0x00);
        mapper.write_io(0xFC, 3, EmuTime::ZERO);
        assert_eq!(mapper.read_mem(0x0000, EmuTime::ZERO), 0x33);
    }

    #[test]
    fn mapper_bank_switch_invalidates_page_lines() {
        let cache = CacheTable::new();
        let mut mapper = MemoryMapper::new("mapper", 0x10000, cache.clone());
        let line = mapper.read_cache_line(0x0000).expect("cacheable");
        cache.set_read_entry(0, emu_core::CacheEntry::Cached(line));
        mapper.write_io(0xFC, 0, EmuTime::ZERO);
        assert!(matches!(cache.read_entry(0), emu_core::CacheEntry::Unprobed));
    }
}
