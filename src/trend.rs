//! Trend Module
//!
//! Five-way short-term trend from the rolling window.

use std::fmt;

use crate::storage::Reading;

/// Minimum spacing between the two points the rate is taken over
pub const MIN_GAP_MINUTES: f64 = 15.0;

// mmol/L per minute; roughly 1 and 1.5 mmol/L per 10 minutes.
const RATE_FAST: f64 = 0.167;
const RATE_SLOW: f64 = 0.111;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trend {
    RisingFast,
    Rising,
    #[default]
    Flat,
    Falling,
    FallingFast,
}

impl Trend {
    /// Classify a rate of change in mmol/L per minute
    pub fn from_rate(rate: f64) -> Self {
        if rate >= RATE_FAST {
            Trend::RisingFast
        } else if rate >= RATE_SLOW {
            Trend::Rising
        } else if rate <= -RATE_FAST {
            Trend::FallingFast
        } else if rate <= -RATE_SLOW {
            Trend::Falling
        } else {
            Trend::Flat
        }
    }

    /// Arrow rendered next to the value
    pub fn symbol(&self) -> &'static str {
        match self {
            Trend::RisingFast => "↑↑",
            Trend::Rising => "↑",
            Trend::Flat => "→",
            Trend::Falling => "↓",
            Trend::FallingFast => "↓↓",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Rate of change between the last reading and the nearest earlier reading
/// at least 15 minutes before it. `None` when no such pair exists.
///
/// `window` must be ascending by timestamp.
pub fn rate_of_change(window: &[Reading]) -> Option<f64> {
    let (last, earlier) = window.split_last()?;

    let (previous, gap_minutes) = earlier.iter().rev().find_map(|candidate| {
        let gap_minutes = (last.timestamp - candidate.timestamp).num_seconds() as f64 / 60.0;
        (gap_minutes >= MIN_GAP_MINUTES).then_some((candidate, gap_minutes))
    })?;

    Some((last.value - previous.value) / gap_minutes)
}

/// Trend of an ascending window; flat when it cannot be determined
pub fn calculate_trend(window: &[Reading]) -> Trend {
    rate_of_change(window).map(Trend::from_rate).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).unwrap()
    }

    fn series(points: &[(i64, f64)]) -> Vec<Reading> {
        points
            .iter()
            .map(|&(minutes, value)| Reading::new(t0() + Duration::minutes(minutes), value))
            .collect()
    }

    #[test]
    fn slow_rise_over_twenty_minutes_is_flat() {
        // 1.8 / 20 = 0.09
        assert_eq!(calculate_trend(&series(&[(0, 5.0), (20, 6.8)])), Trend::Flat);
    }

    #[test]
    fn steep_rise_over_twenty_minutes_is_rising_fast() {
        // 3.5 / 20 = 0.175
        assert_eq!(calculate_trend(&series(&[(0, 5.0), (20, 8.5)])), Trend::RisingFast);
    }

    #[test]
    fn fewer_than_two_points_is_flat() {
        assert_eq!(calculate_trend(&[]), Trend::Flat);
        assert_eq!(calculate_trend(&series(&[(0, 12.0)])), Trend::Flat);
    }

    #[test]
    fn all_points_too_close_is_flat() {
        let window = series(&[(0, 5.0), (5, 9.0), (10, 14.0), (14, 20.0)]);
        assert_eq!(rate_of_change(&window), None);
        assert_eq!(calculate_trend(&window), Trend::Flat);
    }

    #[test]
    fn nearest_qualifying_point_is_used() {
        // Scanning back from 30: 25 and 20 are too close, 15 is exactly 15 minutes.
        // Using the first point instead would read 6.5 / 30, rising fast.
        let window = series(&[(0, 2.0), (15, 7.0), (20, 7.2), (25, 7.4), (30, 8.5)]);
        let rate = rate_of_change(&window).unwrap();
        assert!((rate - 0.1).abs() < 1e-9);
        assert_eq!(calculate_trend(&window), Trend::Flat);
    }

    #[test]
    fn gaps_in_the_series_stretch_the_interval() {
        // 40-minute hole: the only candidate is 40 minutes back.
        let window = series(&[(0, 10.0), (40, 4.0)]);
        assert_eq!(rate_of_change(&window), Some(-6.0 / 40.0));
        assert_eq!(calculate_trend(&window), Trend::Falling);
    }

    #[test]
    fn thresholds_are_inclusive_on_the_outer_side() {
        assert_eq!(Trend::from_rate(0.167), Trend::RisingFast);
        assert_eq!(Trend::from_rate(0.1669), Trend::Rising);
        assert_eq!(Trend::from_rate(0.111), Trend::Rising);
        assert_eq!(Trend::from_rate(0.1109), Trend::Flat);
        assert_eq!(Trend::from_rate(0.0), Trend::Flat);
        assert_eq!(Trend::from_rate(-0.1109), Trend::Flat);
        assert_eq!(Trend::from_rate(-0.111), Trend::Falling);
        assert_eq!(Trend::from_rate(-0.1669), Trend::Falling);
        assert_eq!(Trend::from_rate(-0.167), Trend::FallingFast);
    }

    #[test]
    fn symbols() {
        assert_eq!(Trend::RisingFast.symbol(), "↑↑");
        assert_eq!(Trend::Flat.to_string(), "→");
        assert_eq!(Trend::FallingFast.symbol(), "↓↓");
    }
}
