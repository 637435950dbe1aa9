//! Absolute emulation time.

/// Master frequency in Hz.
///
/// Chosen so that the Z80 frequency (3 579 545 Hz), the R800 frequency
/// (7 159 090 Hz) and the R800 half-tick frequency (14 318 180 Hz) all
/// divide it exactly.
pub const MAIN_FREQ: u64 = 3_579_545 * 8;

/// An absolute instant on the emulated time line.
///
/// Stored as a count of master-frequency units since power-on. Instants
/// are totally ordered and never decrease during emulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EmuTime(u64);

impl EmuTime {
    pub const ZERO: Self = Self(0);

    /// Later than every reachable instant. Used as the "no sync point
    /// pending" sentinel.
    pub const INFINITY: Self = Self(u64::MAX);

    #[must_use]
    pub const fn from_units(units: u64) -> Self {
        Self(units)
    }

    #[must_use]
    pub const fn units(self) -> u64 {
        self.0
    }

    /// Number of whole ticks of a `freq` Hz clock until `later`.
    ///
    /// # Panics
    ///
    /// Panics (debug) when `later` lies before `self`.
    #[must_use]
    pub fn ticks_until(self, later: Self, freq: u64) -> u64 {
        debug_assert!(later >= self);
        (later.0 - self.0) / (MAIN_FREQ / freq)
    }
}

/// The distance between two instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct EmuDuration(u64);

impl EmuDuration {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_units(units: u64) -> Self {
        Self(units)
    }

    #[must_use]
    pub const fn units(self) -> u64 {
        self.0
    }

    /// Duration of `ticks` ticks at `freq` Hz.
    #[must_use]
    pub const fn from_ticks(ticks: u64, freq: u64) -> Self {
        Self(ticks * (MAIN_FREQ / freq))
    }
}

impl core::ops::Add<EmuDuration> for EmuTime {
    type Output = EmuTime;

    fn add(self, rhs: EmuDuration) -> EmuTime {
        EmuTime(self.0 + rhs.0)
    }
}

impl core::ops::Sub for EmuTime {
    type Output = EmuDuration;

    fn sub(self, rhs: EmuTime) -> EmuDuration {
        debug_assert!(self >= rhs);
        EmuDuration(self.0 - rhs.0)
    }
}

impl core::ops::AddAssign<EmuDuration> for EmuTime {
    fn add_assign(&mut self, rhs: EmuDuration) {
        self.0 += rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divides_cpu_frequencies() {
        assert_eq!(MAIN_FREQ % 3_579_545, 0);
        assert_eq!(MAIN_FREQ % 7_159_090, 0);
        assert_eq!(MAIN_FREQ % 14_318_180, 0);
    }

    #[test]
    fn duration_arithmetic() {
        let t0 = EmuTime::from_units(100);
        let d = EmuDuration::from_units(42);
        let t1 = t0 + d;
        assert_eq!(t1 - t0, d);
        assert!(t1 > t0);
    }

    #[test]
    fn ticks_until_uses_clock_scale() {
        let t0 = EmuTime::ZERO;
        let one_sec = t0 + EmuDuration::from_units(MAIN_FREQ);
        assert_eq!(t0.ticks_until(one_sec, 3_579_545), 3_579_545);
        assert_eq!(t0.ticks_until(one_sec, 7_159_090), 7_159_090);
    }
}
