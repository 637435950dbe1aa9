//! The slot router: memory and I/O dispatch for an MSX machine.

use emu_core::{Bus, CacheSlice, CacheTable, EmuTime, Schedulable, SyncPoint, CACHE_LINE_SIZE};
use thiserror::Error;
use tracing::{debug, warn};

use crate::device::{DummyDevice, MsxDevice};

/// Index of a device registered on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId(usize);

impl DeviceId {
    #[must_use]
    pub fn token(self) -> u32 {
        self.0 as u32
    }

    #[must_use]
    pub fn from_token(token: u32) -> Self {
        Self(token as usize)
    }
}

/// Machine-construction errors: a misconfigured slot layout aborts machine
/// creation before any instruction runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotConfigError {
    #[error("slot {0} out of range (0-3)")]
    InvalidSlot(u8),
    #[error("primary slot {0} is already expanded")]
    AlreadyExpanded(u8),
    #[error("secondary slot on non-expanded primary {0}")]
    NotExpanded(u8),
}

/// The 4-page × 4-primary × 4-secondary MSX address-space switcher plus
/// the 256-entry I/O tables.
///
/// Invariant: for every page exactly one device is visible at any time.
/// Port 0xA8 carries the primary-slot register; a write to 0xFFFF latches
/// the sub-slot register of the primary selected on page 3 when that
/// primary is expanded.
pub struct MsxBus {
    devices: Vec<Box<dyn MsxDevice>>,
    /// `[primary][secondary][page]`, pre-filled with the dummy device.
    slot_layout: [[[DeviceId; 4]; 4]; 4],
    expanded: [bool; 4],
    /// Last value written to port 0xA8.
    primary_slots: u8,
    /// Selected primary slot per page (derived from `primary_slots`).
    primary_state: [u8; 4],
    /// Selected secondary slot per page.
    secondary_state: [u8; 4],
    /// Sub-slot register per expanded primary.
    sub_slots: [u8; 4],
    /// The device visible on each page.
    visible: [DeviceId; 4],
    io_in: Vec<Vec<DeviceId>>,
    io_out: Vec<Vec<DeviceId>>,
    cache: CacheTable,
}

impl MsxBus {
    #[must_use]
    pub fn new(cache: CacheTable) -> Self {
        let dummy = DeviceId(0);
        Self {
            devices: vec![Box::new(DummyDevice)],
            slot_layout: [[[dummy; 4]; 4]; 4],
            expanded: [false; 4],
            primary_slots: 0,
            primary_state: [0; 4],
            secondary_state: [0; 4],
            sub_slots: [0; 4],
            visible: [dummy; 4],
            io_in: (0..256).map(|_| Vec::new()).collect(),
            io_out: (0..256).map(|_| Vec::new()).collect(),
            cache,
        }
    }

    /// The cache table this router invalidates; share it with the CPU
    /// cores.
    #[must_use]
    pub fn cache(&self) -> CacheTable {
        self.cache.clone()
    }

    /// Take ownership of a device. Registration in the slot map and the
    /// I/O tables happens separately.
    pub fn add_device(&mut self, device: Box<dyn MsxDevice>) -> DeviceId {
        let id = DeviceId(self.devices.len());
        debug!(device = device.name(), id = id.0, "device added");
        self.devices.push(device);
        id
    }

    #[must_use]
    pub fn device(&self, id: DeviceId) -> &dyn MsxDevice {
        &*self.devices[id.0]
    }

    pub fn device_mut(&mut self, id: DeviceId) -> &mut Box<dyn MsxDevice> {
        &mut self.devices[id.0]
    }

    /// Mark a primary slot as expanded. Only valid during machine
    /// construction.
    pub fn set_expanded(&mut self, primary: u8) -> Result<(), SlotConfigError> {
        if primary > 3 {
            return Err(SlotConfigError::InvalidSlot(primary));
        }
        if self.expanded[usize::from(primary)] {
            return Err(SlotConfigError::AlreadyExpanded(primary));
        }
        self.expanded[usize::from(primary)] = true;
        Ok(())
    }

    #[must_use]
    pub fn is_expanded(&self, primary: u8) -> bool {
        self.expanded[usize::from(primary & 3)]
    }

    /// Register `id` in the slot map for every page set in `page_mask`
    /// (bit 0 = page 0 = 0x0000-0x3FFF).
    ///
    /// # Panics
    ///
    /// Panics when the slot is already occupied: registering two devices
    /// in the same place is a bug in the machine description, not a
    /// recoverable condition.
    pub fn register_mem_device(
        &mut self,
        id: DeviceId,
        primary: u8,
        secondary: u8,
        page_mask: u8,
    ) -> Result<(), SlotConfigError> {
        if primary > 3 || secondary > 3 {
            return Err(SlotConfigError::InvalidSlot(primary.max(secondary)));
        }
        if secondary != 0 && !self.expanded[usize::from(primary)] {
            return Err(SlotConfigError::NotExpanded(primary));
        }
        for page in 0..4u8 {
            if page_mask & (1 << page) == 0 {
                continue;
            }
            let slot =
                &mut self.slot_layout[usize::from(primary)][usize::from(secondary)][usize::from(page)];
            assert_eq!(
                slot.0, 0,
                "slot {primary}-{secondary} page {page} registered twice"
            );
            *slot = id;
        }
        for page in 0..4 {
            self.update_visible(page);
        }
        Ok(())
    }

    /// Claim an input port. Sharing a port is allowed but reported: reads
    /// return the first device's value.
    pub fn register_io_in(&mut self, id: DeviceId, port: u8) {
        let entry = &mut self.io_in[usize::from(port)];
        if !entry.is_empty() {
            warn!(port, "input port claimed by multiple devices");
        }
        entry.push(id);
    }

    /// Claim an output port. Sharing a port fans the writes out to every
    /// device.
    pub fn register_io_out(&mut self, id: DeviceId, port: u8) {
        let entry = &mut self.io_out[usize::from(port)];
        if !entry.is_empty() {
            warn!(port, "output port claimed by multiple devices");
        }
        entry.push(id);
    }

    /// Reset the slot selection and every device.
    pub fn reset(&mut self, time: EmuTime) {
        self.set_primary_slots(0);
        self.sub_slots = [0; 4];
        for page in 0..4 {
            self.secondary_state[page] = 0;
            self.update_visible(page);
        }
        for device in &mut self.devices {
            device.reset(time);
        }
    }

    /// Write the primary-slot register (port 0xA8): two bits per page.
    pub fn set_primary_slots(&mut self, value: u8) {
        self.primary_slots = value;
        for page in 0..4usize {
            let primary = (value >> (2 * page)) & 3;
            self.primary_state[page] = primary;
            self.secondary_state[page] = (self.sub_slots[usize::from(primary)] >> (2 * page)) & 3;
            self.update_visible(page);
        }
    }

    #[must_use]
    pub fn primary_slots(&self) -> u8 {
        self.primary_slots
    }

    /// Latch the sub-slot register of `primary` (a write to 0xFFFF while
    /// that primary is selected on page 3 and expanded).
    fn set_sub_slot(&mut self, primary: u8, value: u8) {
        debug_assert!(self.expanded[usize::from(primary)]);
        self.sub_slots[usize::from(primary)] = value;
        for page in 0..4usize {
            if self.primary_state[page] == primary {
                self.secondary_state[page] = (value >> (2 * page)) & 3;
                self.update_visible(page);
            }
        }
    }

    /// Recompute the device visible on `page`; invalidates the page's
    /// cache lines when it changed.
    fn update_visible(&mut self, page: usize) {
        let primary = usize::from(self.primary_state[page]);
        let secondary = if self.expanded[primary] {
            usize::from(self.secondary_state[page])
        } else {
            0
        };
        let new = self.slot_layout[primary][secondary][page];
        if new != self.visible[page] {
            self.visible[page] = new;
            self.cache
                .invalidate((page as u16) << 14, 0x4000 / CACHE_LINE_SIZE);
        }
    }

    /// The device currently visible on `page`.
    #[must_use]
    pub fn visible_device(&self, page: u8) -> DeviceId {
        self.visible[usize::from(page & 3)]
    }

    /// True when 0xFFFF currently addresses the sub-slot register.
    fn top_is_sub_slot(&self) -> bool {
        self.expanded[usize::from(self.primary_state[3])]
    }

    /// Side-effect-free read through an explicit slot: the address encodes
    /// `(primary << 18) | (secondary << 16) | address`.
    #[must_use]
    pub fn peek_slotted_mem(&self, slotted: u32) -> u8 {
        let primary = (slotted >> 18) & 3;
        let secondary = (slotted >> 16) & 3;
        let address = slotted as u16;
        let id = self.slot_layout[primary as usize][secondary as usize][usize::from(address >> 14)];
        self.devices[id.0].peek_mem(address)
    }

    /// Write through an explicit slot, bypassing the current selection.
    pub fn write_slotted_mem(&mut self, slotted: u32, value: u8, time: EmuTime) {
        let primary = (slotted >> 18) & 3;
        let secondary = (slotted >> 16) & 3;
        let address = slotted as u16;
        let id = self.slot_layout[primary as usize][secondary as usize][usize::from(address >> 14)];
        self.devices[id.0].write_mem(address, value, time);
    }

    /// Dispatch a due sync point to the device that scheduled it. Devices
    /// schedule with their own id as the token.
    pub fn execute_sync_point(&mut self, sync_point: SyncPoint) {
        let id = DeviceId::from_token(sync_point.token);
        Schedulable::execute_until(&mut self.devices[id.0], sync_point.time, sync_point.token);
    }
}

impl Bus for MsxBus {
    fn read_mem(&mut self, address: u16, time: EmuTime) -> u8 {
        if address == 0xFFFF && self.top_is_sub_slot() {
            // Reading the sub-slot register returns its complement.
            return !self.sub_slots[usize::from(self.primary_state[3])];
        }
        let id = self.visible[usize::from(address >> 14)];
        self.devices[id.0].read_mem(address, time)
    }

    fn write_mem(&mut self, address: u16, value: u8, time: EmuTime) {
        if address == 0xFFFF && self.top_is_sub_slot() {
            let primary = self.primary_state[3];
            self.set_sub_slot(primary, value);
            // The visible devices may have changed wholesale.
            self.cache.invalidate_all();
            return;
        }
        let id = self.visible[usize::from(address >> 14)];
        self.devices[id.0].write_mem(address, value, time);
    }

    fn read_io(&mut self, port: u16, time: EmuTime) -> u8 {
        let port = port as u8;
        if port == 0xA8 {
            return self.primary_slots;
        }
        match self.io_in[usize::from(port)].first() {
            Some(&id) => self.devices[id.0].read_io(port, time),
            None => 0xFF,
        }
    }

    fn write_io(&mut self, port: u16, value: u8, time: EmuTime) {
        let port = port as u8;
        if port == 0xA8 {
            self.set_primary_slots(value);
            return;
        }
        for i in 0..self.io_out[usize::from(port)].len() {
            let id = self.io_out[usize::from(port)][i];
            self.devices[id.0].write_io(port, value, time);
        }
    }

    fn peek_mem(&self, address: u16) -> u8 {
        if address == 0xFFFF && self.top_is_sub_slot() {
            return !self.sub_slots[usize::from(self.primary_state[3])];
        }
        let id = self.visible[usize::from(address >> 14)];
        self.devices[id.0].peek_mem(address)
    }

    fn read_cache_line(&mut self, start: u16) -> Option<CacheSlice> {
        if usize::from(start) == 0x1_0000 - CACHE_LINE_SIZE && self.top_is_sub_slot() {
            // The line containing 0xFFFF must keep hitting the router.
            return None;
        }
        let id = self.visible[usize::from(start >> 14)];
        self.devices[id.0].read_cache_line(start)
    }

    fn write_cache_line(&mut self, start: u16) -> Option<CacheSlice> {
        if usize::from(start) == 0x1_0000 - CACHE_LINE_SIZE && self.top_is_sub_slot() {
            return None;
        }
        let id = self.visible[usize::from(start >> 14)];
        self.devices[id.0].write_cache_line(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Ram;

    fn bus_with_two_rams() -> MsxBus {
        let mut bus = MsxBus::new(CacheTable::new());
        let a = bus.add_device(Box::new(Ram::new("ram a", 0x0000, 0x1_0000)));
        let b = bus.add_device(Box::new(Ram::new("ram b", 0x0000, 0x1_0000)));
        bus.register_mem_device(a, 0, 0, 0b1111).expect("slot 0");
        bus.register_mem_device(b, 1, 0, 0b1111).expect("slot 1");
        bus.write_mem(0x4000, 0xAA, EmuTime::ZERO); // into slot 0
        bus.write_io(0xA8, 0b0101_0101, EmuTime::ZERO);
        bus.write_mem(0x4000, 0xBB, EmuTime::ZERO); // into slot 1
        bus.write_io(0xA8, 0, EmuTime::ZERO);
        bus
    }

    #[test]
    fn primary_slot_switching_selects_device() {
        let mut bus = bus_with_two_rams();
        assert_eq!(bus.read_mem(0x4000, EmuTime::ZERO), 0xAA);
        bus.write_io(0xA8, 0b0101_0101, EmuTime::ZERO);
        assert_eq!(bus.read_mem(0x4000, EmuTime::ZERO), 0xBB);
        assert_eq!(bus.read_io(0xA8, EmuTime::ZERO), 0b0101_0101);
    }

    #[test]
    fn per_page_primary_selection() {
        let mut bus = bus_with_two_rams();
        // Page 1 from slot 1, everything else slot 0.
        bus.write_io(0xA8, 0b0000_0100, EmuTime::ZERO);
        assert_eq!(bus.read_mem(0x4000, EmuTime::ZERO), 0xBB);
        assert_eq!(bus.visible_device(0), bus.visible_device(2));
    }

    #[test]
    fn secondary_slot_register_complement_read() {
        let mut bus = MsxBus::new(CacheTable::new());
        bus.set_expanded(0).expect("expand");
        let a = bus.add_device(Box::new(Ram::new("ram a", 0x0000, 0x1_0000)));
        let b = bus.add_device(Box::new(Ram::new("ram b", 0x0000, 0x1_0000)));
        bus.register_mem_device(a, 0, 0, 0b1111).expect("0-0");
        bus.register_mem_device(b, 0, 1, 0b1111).expect("0-1");

        bus.write_mem(0x8000, 0x11, EmuTime::ZERO); // slot 0-0
        bus.write_mem(0xFFFF, 0b0101_0101, EmuTime::ZERO); // select 0-1 everywhere
        assert_eq!(bus.read_mem(0xFFFF, EmuTime::ZERO), !0b0101_0101);
        bus.write_mem(0x8000, 0x22, EmuTime::ZERO); // slot 0-1
        bus.write_mem(0xFFFF, 0, EmuTime::ZERO);
        assert_eq!(bus.read_mem(0x8000, EmuTime::ZERO), 0x11);
    }

    #[test]
    fn expanding_twice_is_a_config_error() {
        let mut bus = MsxBus::new(CacheTable::new());
        bus.set_expanded(2).expect("first");
        assert_eq!(bus.set_expanded(2), Err(SlotConfigError::AlreadyExpanded(2)));
        assert_eq!(bus.set_expanded(7), Err(SlotConfigError::InvalidSlot(7)));
    }

    #[test]
    fn secondary_into_flat_primary_is_a_config_error() {
        let mut bus = MsxBus::new(CacheTable::new());
        let a = bus.add_device(Box::new(Ram::new("ram", 0x0000, 0x1_0000)));
        assert_eq!(
            bus.register_mem_device(a, 1, 2, 0b1111),
            Err(SlotConfigError::NotExpanded(1))
        );
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn double_registration_panics() {
        let mut bus = MsxBus::new(CacheTable::new());
        let a = bus.add_device(Box::new(Ram::new("a", 0, 0x1_0000)));
        let b = bus.add_device(Box::new(Ram::new("b", 0, 0x1_0000)));
        bus.register_mem_device(a, 0, 0, 0b0001).expect("first");
        let _ = bus.register_mem_device(b, 0, 0, 0b0001);
    }

    #[test]
    fn unclaimed_io_port_floats() {
        let mut bus = MsxBus::new(CacheTable::new());
        assert_eq!(bus.read_io(0x12, EmuTime::ZERO), 0xFF);
    }

    #[test]
    fn io_fan_out_first_read_wins_writes_multicast() {
        let mut bus = MsxBus::new(CacheTable::new());
        let a = bus.add_device(Box::new(Ram::new("a", 0, 0x100)));
        let b = bus.add_device(Box::new(Ram::new("b", 0, 0x100)));
        bus.register_io_in(a, 0x10);
        bus.register_io_in(b, 0x10);
        bus.register_io_out(a, 0x10);
        bus.register_io_out(b, 0x10);
        // Ram's default I/O handlers float; the point here is routing, not
        // values: both devices must be reachable without a panic.
        assert_eq!(bus.read_io(0x10, EmuTime::ZERO), 0xFF);
        bus.write_io(0x10, 0x55, EmuTime::ZERO);
    }

    #[test]
    fn sub_slot_write_invalidates_cache() {
        let mut bus = MsxBus::new(CacheTable::new());
        bus.set_expanded(0).expect("expand");
        let a = bus.add_device(Box::new(Ram::new("a", 0x0000, 0x1_0000)));
        bus.register_mem_device(a, 0, 0, 0b1111).expect("0-0");
        let cache = bus.cache();
        let line = bus.read_cache_line(0x4000).expect("cacheable");
        cache.set_read_entry(0x40, emu_core::CacheEntry::Cached(line));
        bus.write_mem(0xFFFF, 0b0000_0001, EmuTime::ZERO);
        assert!(matches!(
            cache.read_entry(0x40),
            emu_core::CacheEntry::Unprobed
        ));
    }

    #[test]
    fn top_line_not_cacheable_when_expanded() {
        let mut bus = MsxBus::new(CacheTable::new());
        bus.set_expanded(0).expect("expand");
        let a = bus.add_device(Box::new(Ram::new("a", 0x0000, 0x1_0000)));
        bus.register_mem_device(a, 0, 0, 0b1111).expect("0-0");
        assert!(bus.read_cache_line(0xFF00).is_none());
        assert!(bus.write_cache_line(0xFF00).is_none());
        // Other lines stay cacheable.
        assert!(bus.read_cache_line(0xFE00).is_some());
    }

    #[test]
    fn slotted_peek_reaches_invisible_slots() {
        let mut bus = bus_with_two_rams();
        // Slot 1 is not selected, yet the debugger can see its bytes.
        assert_eq!(bus.peek_slotted_mem((1 << 18) | 0x4000), 0xBB);
        assert_eq!(bus.peek_slotted_mem(0x4000), 0xAA);
    }
}
