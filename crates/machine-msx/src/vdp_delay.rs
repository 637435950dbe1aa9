//! Minimum spacing between VDP I/O accesses on turboR machines.
//!
//! The R800 can hammer the VDP ports faster than the video chip accepts;
//! real hardware inserts roughly 8 µs between consecutive accesses. This
//! wrapper sits on ports 0x98-0x9B and, while the R800 is the active CPU,
//! spaces the timestamps the wrapped device observes. With the Z80 active
//! it is transparent.

use std::cell::Cell;
use std::rc::Rc;

use emu_core::{CacheSlice, EmuDuration, EmuTime};

use crate::device::MsxDevice;

/// 57 R800 cycles ≈ 8 µs.
const GAP_TICKS: u64 = 57;

pub struct VdpIoDelay {
    inner: Box<dyn MsxDevice>,
    r800_active: Rc<Cell<bool>>,
    last: Cell<EmuTime>,
}

impl VdpIoDelay {
    #[must_use]
    pub fn new(inner: Box<dyn MsxDevice>, r800_active: Rc<Cell<bool>>) -> Self {
        Self {
            inner,
            r800_active,
            last: Cell::new(EmuTime::ZERO),
        }
    }

    #[must_use]
    pub fn inner(&self) -> &dyn MsxDevice {
        &*self.inner
    }

    fn delayed(&self, time: EmuTime) -> EmuTime {
        if !self.r800_active.get() {
            self.last.set(time);
            return time;
        }
        let gap = EmuDuration::from_ticks(GAP_TICKS, 7_159_090);
        let earliest = self.last.get() + gap;
        let effective = time.max(earliest);
        self.last.set(effective);
        effective
    }
}

impl MsxDevice for VdpIoDelay {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn reset(&mut self, time: EmuTime) {
        self.last.set(time);
        self.inner.reset(time);
    }

    fn read_mem(&mut self, address: u16, time: EmuTime) -> u8 {
        self.inner.read_mem(address, time)
    }

    fn write_mem(&mut self, address: u16, value: u8, time: EmuTime) {
        self.inner.write_mem(address, value, time);
    }

    fn peek_mem(&self, address: u16) -> u8 {
        self.inner.peek_mem(address)
    }

    fn read_cache_line(&self, start: u16) -> Option<CacheSlice> {
        self.inner.read_cache_line(start)
    }

    fn write_cache_line(&mut self, start: u16) -> Option<CacheSlice> {
        self.inner.write_cache_line(start)
    }

    fn read_io(&mut self, port: u8, time: EmuTime) -> u8 {
        let effective = self.delayed(time);
        self.inner.read_io(port, effective)
    }

    fn write_io(&mut self, port: u8, value: u8, time: EmuTime) {
        let effective = self.delayed(time);
        self.inner.write_io(port, value, effective);
    }

    fn peek_io(&self, port: u8) -> u8 {
        self.inner.peek_io(port)
    }

    fn execute_until(&mut self, time: EmuTime, token: u32) {
        self.inner.execute_until(time, token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Records the timestamps of incoming I/O writes.
    struct Probe {
        seen: Rc<RefCell<Vec<EmuTime>>>,
    }

    impl MsxDevice for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        fn write_io(&mut self, _port: u8, _value: u8, time: EmuTime) {
            self.seen.borrow_mut().push(time);
        }
    }

    fn setup(active: bool) -> (VdpIoDelay, Rc<RefCell<Vec<EmuTime>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let probe = Probe {
            seen: Rc::clone(&seen),
        };
        let flag = Rc::new(Cell::new(active));
        (VdpIoDelay::new(Box::new(probe), flag), seen)
    }

    #[test]
    fn transparent_with_z80_active() {
        let (mut delay, seen) = setup(false);
        delay.write_io(0x98, 0, EmuTime::from_units(10));
        delay.write_io(0x98, 0, EmuTime::from_units(11));
        assert_eq!(
            *seen.borrow(),
            vec![EmuTime::from_units(10), EmuTime::from_units(11)]
        );
    }

    #[test]
    fn spaces_back_to_back_accesses_with_r800_active() {
        let (mut delay, seen) = setup(true);
        let gap = EmuDuration::from_ticks(GAP_TICKS, 7_159_090);
        delay.write_io(0x98, 0, EmuTime::from_units(1000));
        delay.write_io(0x98, 0, EmuTime::from_units(1001));
        let seen = seen.borrow();
        assert_eq!(seen[0], EmuTime::from_units(1000));
        assert_eq!(seen[1], EmuTime::from_units(1000) + gap);
    }
}
