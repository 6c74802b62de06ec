//! Fractional clock divider selection.
//!
//! The state machine runs at `sys_freq / divider`, where the divider is the
//! SM_CLKDIV register's 16.8 fixed-point value: a 16-bit integer part and a
//! fractional part in 1/256 steps. One output period of the pulse program is
//! `CYCLES_PER_TICK * cycle_length` state-machine cycles, so for a target
//! output frequency the divider is a closed-form division rounded into the
//! 1/256 lattice, with explicit range checks instead of silent wrap-around.

use crate::program::CYCLES_PER_TICK;
use fugit::HertzU32;

/// No representable divider reaches the requested frequency.
///
/// Either the target is faster than `sys_freq / (CYCLES_PER_TICK *
/// cycle_length)` (the divider would have to drop below 1.0), or so slow that
/// the divider overflows its 16.8 range. A smaller cycle length makes faster
/// targets reachable at the price of duty resolution; a larger one helps on
/// the slow end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrequencyOutOfRange;

/// A clock divider in the SM_CLKDIV register layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockDivider {
    int: u16,
    frac: u8,
}

impl ClockDivider {
    /// Smallest representable divider: the state machine cannot outrun the
    /// system clock.
    pub const MIN: ClockDivider = ClockDivider { int: 1, frac: 0 };

    /// Largest representable divider.
    pub const MAX: ClockDivider = ClockDivider {
        int: u16::MAX,
        frac: u8::MAX,
    };

    /// Find the divider bringing the pulse program closest to `target`.
    ///
    /// Returns [`FrequencyOutOfRange`] when the best candidate rounds below
    /// [`ClockDivider::MIN`] or above [`ClockDivider::MAX`].
    pub fn find(
        target: HertzU32,
        sys_freq: HertzU32,
        cycle_length: u32,
    ) -> Result<Self, FrequencyOutOfRange> {
        let cycles = u64::from(target.to_Hz())
            * u64::from(cycle_length)
            * u64::from(CYCLES_PER_TICK);
        if cycles == 0 {
            return Err(FrequencyOutOfRange);
        }

        // Round to the nearest 1/256 step.
        let scaled = u64::from(sys_freq.to_Hz()) << 8;
        let bits = (scaled + cycles / 2) / cycles;
        if bits < u64::from(Self::MIN.bits()) || bits > u64::from(Self::MAX.bits()) {
            return Err(FrequencyOutOfRange);
        }

        Ok(ClockDivider {
            int: (bits >> 8) as u16,
            frac: (bits & 0xff) as u8,
        })
    }

    /// Integer part, as written to SM_CLKDIV.
    pub fn int(&self) -> u16 {
        self.int
    }

    /// Fractional part in 1/256 steps, as written to SM_CLKDIV.
    pub fn frac(&self) -> u8 {
        self.frac
    }

    /// The divider scaled by 256.
    fn bits(&self) -> u32 {
        u32::from(self.int) << 8 | u32::from(self.frac)
    }

    /// Output frequency the pulse program actually produces at this divider.
    pub fn output_frequency(&self, sys_freq: HertzU32, cycle_length: u32) -> HertzU32 {
        let period = u64::from(self.bits())
            * u64::from(cycle_length)
            * u64::from(CYCLES_PER_TICK);
        let scaled = u64::from(sys_freq.to_Hz()) << 8;
        HertzU32::from_raw(((scaled + period / 2) / period) as u32)
    }

    /// Length of one output period in nanoseconds at this divider.
    pub fn period_nanos(&self, sys_freq: HertzU32, cycle_length: u32) -> u64 {
        let cycles = u128::from(self.bits())
            * u128::from(cycle_length)
            * u128::from(CYCLES_PER_TICK);
        let scaled = u128::from(sys_freq.to_Hz()) << 8;
        ((cycles * 1_000_000_000 + scaled / 2) / scaled) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fugit::RateExtU32;

    const SYS_FREQ: HertzU32 = HertzU32::from_raw(125_000_000);

    #[test]
    fn full_resolution_cannot_reach_38_khz() {
        // 125 MHz / (38 kHz * 2 * 65536) would need a divider of about 0.025.
        assert_eq!(
            ClockDivider::find(38_000.Hz(), SYS_FREQ, 65536),
            Err(FrequencyOutOfRange)
        );
    }

    #[test]
    fn reduced_resolution_reaches_38_khz() {
        let divider = ClockDivider::find(38_000.Hz(), SYS_FREQ, 1000).unwrap();
        assert_eq!(divider.int(), 1);
        assert_eq!(divider.frac(), 165);

        let out = divider.output_frequency(SYS_FREQ, 1000);
        assert_eq!(out.to_Hz(), 38_005);
    }

    #[test]
    fn divider_floor_is_one() {
        // 125 MHz / (2 * 62500) = exactly 1 kHz at divider 1.0.
        assert_eq!(
            ClockDivider::find(1_000.Hz(), SYS_FREQ, 62_500),
            Ok(ClockDivider::MIN)
        );
        assert_eq!(
            ClockDivider::find(1_010.Hz(), SYS_FREQ, 62_500),
            Err(FrequencyOutOfRange)
        );
    }

    #[test]
    fn divider_overflows_for_very_slow_targets() {
        assert_eq!(
            ClockDivider::find(1.Hz(), SYS_FREQ, 4),
            Err(FrequencyOutOfRange)
        );
        // The full counter period absorbs the same target.
        assert!(ClockDivider::find(1.Hz(), SYS_FREQ, 65536).is_ok());
    }

    #[test]
    fn zero_target_is_rejected() {
        assert_eq!(
            ClockDivider::find(HertzU32::from_raw(0), SYS_FREQ, 65536),
            Err(FrequencyOutOfRange)
        );
    }

    #[test]
    fn divider_is_monotonic_in_the_target() {
        let mut previous = ClockDivider::MAX;
        for freq in (100..10_000).step_by(37) {
            let divider = ClockDivider::find(freq.Hz(), SYS_FREQ, 1000).unwrap();
            assert!(divider <= previous);
            previous = divider;
        }
    }

    #[test]
    fn period_matches_the_divided_clock() {
        let divider = ClockDivider::find(1_000.Hz(), SYS_FREQ, 62_500).unwrap();
        assert_eq!(divider.period_nanos(SYS_FREQ, 62_500), 1_000_000);

        let divider = ClockDivider::find(38_000.Hz(), SYS_FREQ, 1000).unwrap();
        // 421/256 * 2000 cycles at 8 ns each.
        assert_eq!(divider.period_nanos(SYS_FREQ, 1000), 26_313);
    }
}
