//! Discrete-event scheduler.
//!
//! Devices register sync points; the machine loop pops the points that are
//! due and hands them to the owning device between CPU bursts. The CPU
//! interpreter only ever queries the earliest pending time, so a cheaply
//! cloneable shared handle is all everybody needs.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::rc::Rc;

use crate::time::EmuTime;

/// A scheduled callback: at `time`, the device identified by `token` wants
/// to run. Tokens are opaque to the scheduler; the machine maps them back
/// to devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SyncPoint {
    pub time: EmuTime,
    pub token: u32,
}

/// A component that can be told to emulate up to a point in time.
pub trait Schedulable {
    /// Bring the component up to date with `time`. `token` is whatever the
    /// component passed when scheduling.
    fn execute_until(&mut self, time: EmuTime, token: u32);
}

/// Shared sync-point queue. Cloning shares the queue.
#[derive(Clone)]
pub struct Scheduler {
    queue: Rc<RefCell<BinaryHeap<Reverse<SyncPoint>>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Rc::new(RefCell::new(BinaryHeap::new())),
        }
    }

    /// Register a sync point. Multiple points may share a token; each fires
    /// once.
    pub fn set_sync_point(&self, time: EmuTime, token: u32) {
        self.queue.borrow_mut().push(Reverse(SyncPoint { time, token }));
    }

    /// Drop all pending sync points carrying `token`.
    pub fn remove_sync_points(&self, token: u32) {
        let mut queue = self.queue.borrow_mut();
        let kept: BinaryHeap<_> = queue
            .drain()
            .filter(|Reverse(sp)| sp.token != token)
            .collect();
        *queue = kept;
    }

    /// Earliest pending time, or [`EmuTime::INFINITY`] when idle.
    #[must_use]
    pub fn next_sync_time(&self) -> EmuTime {
        self.queue
            .borrow()
            .peek()
            .map_or(EmuTime::INFINITY, |Reverse(sp)| sp.time)
    }

    /// Pop the earliest sync point if it is due at or before `now`.
    pub fn pop_due(&self, now: EmuTime) -> Option<SyncPoint> {
        let mut queue = self.queue.borrow_mut();
        if queue.peek().is_some_and(|Reverse(sp)| sp.time <= now) {
            queue.pop().map(|Reverse(sp)| sp)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Scheduler({} pending)", self.queue.borrow().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(units: u64) -> EmuTime {
        EmuTime::from_units(units)
    }

    #[test]
    fn pops_in_time_order() {
        let sched = Scheduler::new();
        sched.set_sync_point(at(30), 3);
        sched.set_sync_point(at(10), 1);
        sched.set_sync_point(at(20), 2);
        assert_eq!(sched.next_sync_time(), at(10));
        assert_eq!(sched.pop_due(at(25)).map(|sp| sp.token), Some(1));
        assert_eq!(sched.pop_due(at(25)).map(|sp| sp.token), Some(2));
        assert_eq!(sched.pop_due(at(25)), None); // 30 not yet due
        assert_eq!(sched.next_sync_time(), at(30));
    }

    #[test]
    fn clones_share_the_queue() {
        let sched = Scheduler::new();
        let device_handle = sched.clone();
        device_handle.set_sync_point(at(5), 7);
        assert_eq!(sched.next_sync_time(), at(5));
    }

    #[test]
    fn remove_drops_only_matching_token() {
        let sched = Scheduler::new();
        sched.set_sync_point(at(1), 1);
        sched.set_sync_point(at(2), 2);
        sched.set_sync_point(at(3), 1);
        sched.remove_sync_points(1);
        assert_eq!(sched.pop_due(at(10)).map(|sp| sp.token), Some(2));
        assert!(sched.is_empty());
    }

    #[test]
    fn idle_queue_reports_infinity() {
        let sched = Scheduler::new();
        assert_eq!(sched.next_sync_time(), EmuTime::INFINITY);
    }
}
