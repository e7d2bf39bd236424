//! Simulated sensor readings pushed by the peripheral on every tick.
//!
//! Both counters wrap by explicit boundary reset, not modulo:
//! heart rate climbs until it would hit [`HEART_RATE_UPPER`] and restarts
//! at its profile's lower bound; battery drains until it would hit zero
//! and restarts at [`BATTERY_FULL`].

use crate::config::{BATTERY_FULL, HEART_RATE_UPPER};

/// Next heart-rate value after `prev`.
pub const fn next_heart_rate(prev: u8, lower: u8) -> u8 {
    let next = prev.wrapping_add(1);
    if next == HEART_RATE_UPPER {
        lower
    } else {
        next
    }
}

/// Next battery level after `prev`. Never returns 0.
pub const fn next_battery_level(prev: u8) -> u8 {
    let next = prev.saturating_sub(1);
    if next == 0 {
        BATTERY_FULL
    } else {
        next
    }
}

/// Heart-rate counter owned by one peripheral controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HeartRateSim {
    lower: u8,
    value: u8,
}

impl HeartRateSim {
    /// Starts at `lower`.
    pub const fn new(lower: u8) -> Self {
        Self {
            lower,
            value: lower,
        }
    }

    pub const fn value(&self) -> u8 {
        self.value
    }

    /// Advance one tick and return the value to notify.
    pub fn advance(&mut self) -> u8 {
        self.value = next_heart_rate(self.value, self.lower);
        self.value
    }

    pub fn reset(&mut self) {
        self.value = self.lower;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HEART_RATE_LOWER_CODED, HEART_RATE_LOWER_STANDARD};

    #[test]
    fn heart_rate_wraps_exactly_at_upper() {
        assert_eq!(next_heart_rate(90, 90), 91);
        assert_eq!(next_heart_rate(158, 90), 159);
        assert_eq!(next_heart_rate(159, 90), 90);
        assert_eq!(next_heart_rate(159, 100), 100);
    }

    #[test]
    fn heart_rate_sim_cycle_length() {
        let mut sim = HeartRateSim::new(HEART_RATE_LOWER_STANDARD);
        assert_eq!(sim.value(), 90);
        // 90 -> 159 is 69 steps, the 70th wraps.
        for _ in 0..69 {
            sim.advance();
        }
        assert_eq!(sim.value(), 159);
        assert_eq!(sim.advance(), 90);
    }

    #[test]
    fn coded_profile_starts_at_100() {
        let mut sim = HeartRateSim::new(HEART_RATE_LOWER_CODED);
        assert_eq!(sim.advance(), 101);
        sim.reset();
        assert_eq!(sim.value(), 100);
    }

    #[test]
    fn battery_drains_then_refills() {
        assert_eq!(next_battery_level(100), 99);
        assert_eq!(next_battery_level(2), 1);
        assert_eq!(next_battery_level(1), 100);
    }

    #[test]
    fn battery_never_underflows() {
        assert_eq!(next_battery_level(0), 100);
    }
}
