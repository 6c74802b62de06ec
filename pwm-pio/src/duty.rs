//! Duty-cycle conversions.
//!
//! The counter period (`cycle_length`) defines the duty resolution: a duty of
//! `t` ticks keeps the output active for `t / cycle_length` of each period,
//! with `0` fully inactive and `cycle_length` fully active. The functions
//! here map the three user-facing duty forms onto that tick range, rounding
//! to nearest.

/// The duty request does not fit the configured period.
///
/// Raised for fractions outside `[0.0, 1.0]` (including NaN) and for pulse
/// widths longer than the actual output period. Out-of-range requests are
/// rejected rather than clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidDuty;

/// Convert a duty fraction to ticks: `round(fraction * cycle_length)`.
pub fn ticks_from_fraction(fraction: f32, cycle_length: u32) -> Result<u32, InvalidDuty> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(InvalidDuty);
    }
    let ticks = (fraction * cycle_length as f32 + 0.5) as u32;
    Ok(ticks.min(cycle_length))
}

/// Convert a 16-bit duty value to ticks: `round(value * cycle_length / 65535)`.
///
/// The endpoints map exactly: `0` is fully inactive, `65535` fully active,
/// for every cycle length.
pub fn ticks_from_u16(value: u16, cycle_length: u32) -> u32 {
    const SCALE: u64 = u16::MAX as u64;
    ((u64::from(value) * u64::from(cycle_length) + SCALE / 2) / SCALE) as u32
}

/// Convert an active-time in nanoseconds to ticks, given the actual period.
pub fn ticks_from_nanos(
    nanos: u64,
    period_nanos: u64,
    cycle_length: u32,
) -> Result<u32, InvalidDuty> {
    if period_nanos == 0 || nanos > period_nanos {
        return Err(InvalidDuty);
    }
    let ticks = (u128::from(nanos) * u128::from(cycle_length) + u128::from(period_nanos) / 2)
        / u128::from(period_nanos);
    Ok((ticks as u32).min(cycle_length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_endpoints_are_exact() {
        for cycle_length in [1, 1000, 65535, 65536] {
            assert_eq!(ticks_from_fraction(0.0, cycle_length), Ok(0));
            assert_eq!(ticks_from_fraction(1.0, cycle_length), Ok(cycle_length));
        }
    }

    #[test]
    fn fraction_round_trips_within_one_tick() {
        for cycle_length in [1000u32, 4096, 65536] {
            for ticks in [0u32, 1, 7, 333, cycle_length / 2, cycle_length - 1, cycle_length] {
                let fraction = ticks as f32 / cycle_length as f32;
                let back = ticks_from_fraction(fraction, cycle_length).unwrap();
                assert!(
                    (i64::from(back) - i64::from(ticks)).abs() <= 1,
                    "{ticks}/{cycle_length} came back as {back}"
                );
            }
        }
    }

    #[test]
    fn out_of_range_fractions_are_rejected() {
        assert_eq!(ticks_from_fraction(-0.01, 65536), Err(InvalidDuty));
        assert_eq!(ticks_from_fraction(1.01, 65536), Err(InvalidDuty));
        assert_eq!(ticks_from_fraction(f32::NAN, 65536), Err(InvalidDuty));
        assert_eq!(ticks_from_fraction(f32::INFINITY, 65536), Err(InvalidDuty));
    }

    #[test]
    fn u16_endpoints_are_exact() {
        for cycle_length in [1, 3, 1000, 65535, 65536] {
            assert_eq!(ticks_from_u16(0, cycle_length), 0);
            assert_eq!(ticks_from_u16(u16::MAX, cycle_length), cycle_length);
        }
    }

    #[test]
    fn u16_scaling_matches_the_counter_range() {
        // At the default cycle length the value passes through near-verbatim.
        assert_eq!(ticks_from_u16(6500, 65536), 6500);
        assert_eq!(ticks_from_u16(32768, 65536), 32768);
        // Half scale at a reduced resolution.
        assert_eq!(ticks_from_u16(32768, 1000), 500);
    }

    #[test]
    fn nanos_convert_against_the_actual_period() {
        assert_eq!(ticks_from_nanos(0, 1_000_000, 1000), Ok(0));
        assert_eq!(ticks_from_nanos(500_000, 1_000_000, 1000), Ok(500));
        assert_eq!(ticks_from_nanos(1_000_000, 1_000_000, 1000), Ok(1000));
        // Rounds to nearest tick.
        assert_eq!(ticks_from_nanos(1_500, 1_000_000, 1000), Ok(2));
        assert_eq!(ticks_from_nanos(1_400, 1_000_000, 1000), Ok(1));
    }

    #[test]
    fn overlong_pulses_are_rejected() {
        assert_eq!(ticks_from_nanos(1_000_001, 1_000_000, 1000), Err(InvalidDuty));
        assert_eq!(ticks_from_nanos(1, 0, 1000), Err(InvalidDuty));
    }
}
