//! Display Module
//!
//! Boundary to whatever renders the latest reading. Pixel layout lives with
//! the renderer; this side decides what to show and in which color.

use chrono::{DateTime, Local, Utc};
use tracing::info;

use crate::storage::Reading;
use crate::trend::{calculate_trend, Trend};

const LOW_THRESHOLD: f64 = 4.0;
const HIGH_THRESHOLD: f64 = 15.0;
const NORMAL_MIN: f64 = 5.0;
const NORMAL_MAX: f64 = 10.0;

/// Color band of a glucose value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlucoseColor {
    Alert,
    Caution,
    Normal,
}

impl GlucoseColor {
    pub fn classify(value: f64) -> Self {
        if value < LOW_THRESHOLD || value > HIGH_THRESHOLD {
            GlucoseColor::Alert
        } else if value < NORMAL_MIN || value > NORMAL_MAX {
            GlucoseColor::Caution
        } else {
            GlucoseColor::Normal
        }
    }

    pub fn rgb(&self) -> (u8, u8, u8) {
        match self {
            GlucoseColor::Alert => (255, 0, 0),
            GlucoseColor::Caution => (255, 215, 0),
            GlucoseColor::Normal => (0, 200, 0),
        }
    }
}

/// Everything a renderer needs for one screen
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayFrame {
    pub value: f64,
    pub trend: Trend,
    pub color: GlucoseColor,
    /// Host-local `HH:MM` of the latest reading
    pub updated_at: String,
}

impl DisplayFrame {
    /// Frame for the newest reading of an ascending window, `None` if empty
    pub fn from_window(window: &[Reading]) -> Option<Self> {
        let latest = window.last()?;
        Some(Self {
            value: latest.value,
            trend: calculate_trend(window),
            color: GlucoseColor::classify(latest.value),
            updated_at: local_clock(&latest.timestamp),
        })
    }
}

fn local_clock(timestamp: &DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format("%H:%M").to_string()
}

/// Something that can show a frame
pub trait GlucoseDisplay: Send {
    fn show(&mut self, frame: &DisplayFrame);
}

/// Display that writes frames to the log
#[derive(Debug, Default)]
pub struct LogDisplay;

impl GlucoseDisplay for LogDisplay {
    fn show(&mut self, frame: &DisplayFrame) {
        info!(
            value = frame.value,
            trend = frame.trend.symbol(),
            color = ?frame.color,
            "Glucose {:.1} {} at {}",
            frame.value,
            frame.trend,
            frame.updated_at
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn color_bands() {
        assert_eq!(GlucoseColor::classify(3.9), GlucoseColor::Alert);
        assert_eq!(GlucoseColor::classify(4.5), GlucoseColor::Caution);
        assert_eq!(GlucoseColor::classify(7.0), GlucoseColor::Normal);
        assert_eq!(GlucoseColor::classify(11.0), GlucoseColor::Caution);
        assert_eq!(GlucoseColor::classify(16.0), GlucoseColor::Alert);
    }

    #[test]
    fn color_band_edges() {
        assert_eq!(GlucoseColor::classify(4.0), GlucoseColor::Caution);
        assert_eq!(GlucoseColor::classify(5.0), GlucoseColor::Normal);
        assert_eq!(GlucoseColor::classify(10.0), GlucoseColor::Normal);
        assert_eq!(GlucoseColor::classify(15.0), GlucoseColor::Caution);
        assert_eq!(GlucoseColor::Alert.rgb(), (255, 0, 0));
    }

    #[test]
    fn frame_uses_latest_reading() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).unwrap();
        let window = vec![
            Reading::new(t0, 5.0),
            Reading::new(t0 + Duration::minutes(20), 8.5),
        ];

        let frame = DisplayFrame::from_window(&window).unwrap();
        assert_eq!(frame.value, 8.5);
        assert_eq!(frame.trend, Trend::RisingFast);
        assert_eq!(frame.color, GlucoseColor::Normal);
        assert_eq!(frame.updated_at, local_clock(&window[1].timestamp));
        assert_eq!(frame.updated_at.len(), 5);
    }

    #[test]
    fn empty_window_has_no_frame() {
        assert_eq!(DisplayFrame::from_window(&[]), None);
    }
}
