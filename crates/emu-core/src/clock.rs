//! A tick counter at a configurable frequency.

use crate::time::{EmuDuration, EmuTime, MAIN_FREQ};

/// A clock that counts ticks of a component frequency and converts between
/// tick counts and absolute [`EmuTime`] instants.
///
/// The frequency may be retuned at runtime; retuning preserves the current
/// absolute instant (only the length of future ticks changes).
#[derive(Debug, Clone)]
pub struct DynamicClock {
    /// Current absolute time.
    time: EmuTime,
    /// Master units per tick at the current frequency.
    step: u64,
    /// Total ticks added since construction. Used for cycle-parity
    /// decisions (R800 even-cycle alignment), not for time keeping.
    total_ticks: u64,
}

impl DynamicClock {
    /// # Panics
    ///
    /// Panics when `freq` is zero or larger than [`MAIN_FREQ`].
    #[must_use]
    pub fn new(freq: u64, time: EmuTime) -> Self {
        assert!(freq > 0 && freq <= MAIN_FREQ, "unsupported frequency {freq}");
        Self {
            time,
            step: MAIN_FREQ / freq,
            total_ticks: 0,
        }
    }

    /// Current absolute time.
    #[must_use]
    pub const fn time(&self) -> EmuTime {
        self.time
    }

    /// Total ticks counted since construction.
    #[must_use]
    pub const fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Advance by `ticks` ticks. O(1).
    pub fn add(&mut self, ticks: u64) {
        self.time += EmuDuration::from_units(ticks * self.step);
        self.total_ticks += ticks;
    }

    /// The instant `ticks` ticks ahead of now, without advancing.
    ///
    /// Used to timestamp bus accesses that happen partway through an
    /// instruction whose total cost is added only at the end.
    #[must_use]
    pub fn calc_time(&self, ticks: u64) -> EmuTime {
        self.time + EmuDuration::from_units(ticks * self.step)
    }

    /// Advance to `time`, counting the whole ticks in between.
    ///
    /// # Panics
    ///
    /// Panics (debug) when `time` lies in the past.
    pub fn advance_to(&mut self, time: EmuTime) {
        debug_assert!(time >= self.time);
        let ticks = (time.units() - self.time.units()) / self.step;
        self.add(ticks);
        // Land exactly on the requested instant even when it is not
        // tick-aligned; a following add() keeps counting from here.
        self.time = time;
    }

    /// Whole ticks from now until `time`.
    #[must_use]
    pub fn ticks_until(&self, time: EmuTime) -> u64 {
        debug_assert!(time >= self.time);
        (time.units() - self.time.units()) / self.step
    }

    /// Retune to `freq` Hz. The current instant is preserved.
    ///
    /// # Panics
    ///
    /// Panics when `freq` is zero or larger than [`MAIN_FREQ`].
    pub fn set_freq(&mut self, freq: u64) {
        assert!(freq > 0 && freq <= MAIN_FREQ, "unsupported frequency {freq}");
        self.step = MAIN_FREQ / freq;
    }

    /// Master units per tick at the current frequency.
    #[must_use]
    pub const fn step(&self) -> u64 {
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_advances_by_tick_length() {
        let mut clock = DynamicClock::new(3_579_545, EmuTime::ZERO);
        clock.add(10);
        assert_eq!(clock.time().units(), 10 * 8);
        assert_eq!(clock.total_ticks(), 10);
    }

    #[test]
    fn calc_time_does_not_advance() {
        let clock = DynamicClock::new(3_579_545, EmuTime::ZERO);
        let ahead = clock.calc_time(5);
        assert_eq!(ahead.units(), 5 * 8);
        assert_eq!(clock.time(), EmuTime::ZERO);
    }

    #[test]
    fn set_freq_preserves_instant() {
        let mut clock = DynamicClock::new(3_579_545, EmuTime::ZERO);
        clock.add(100);
        let before = clock.time();
        clock.set_freq(7_159_090);
        assert_eq!(clock.time(), before);
        clock.add(2);
        // R800 ticks are half as long as Z80 ticks.
        assert_eq!((clock.time() - before).units(), 2 * 4);
    }

    #[test]
    fn monotone_over_mixed_operations() {
        let mut clock = DynamicClock::new(3_579_545, EmuTime::ZERO);
        let mut last = clock.time();
        for i in 0..1000u64 {
            match i % 3 {
                0 => clock.add(i % 7),
                1 => clock.advance_to(clock.calc_time(3)),
                _ => clock.set_freq(if i % 2 == 0 { 7_159_090 } else { 3_579_545 }),
            }
            assert!(clock.time() >= last);
            last = clock.time();
        }
    }

    #[test]
    fn advance_to_lands_exactly() {
        let mut clock = DynamicClock::new(3_579_545, EmuTime::ZERO);
        let target = EmuTime::from_units(37); // not a multiple of the step
        clock.advance_to(target);
        assert_eq!(clock.time(), target);
    }
}
