// src/gps/fix.rs
//! Position fix assembled from a receiver's sentences

use crate::{geo::Coordinate, walk::PositionSample};
use chrono::{DateTime, Utc};

/// Latest known state of a receiver, updated sentence by sentence.
#[derive(Debug, Clone, Default)]
pub struct GpsFix {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub time: Option<DateTime<Utc>>, // receiver time, when the sentence carries a date
    pub fix_quality: Option<u8>,     // NMEA GGA quality
    pub mode: Option<u8>,            // gpsd mode (1 = no fix, 2 = 2D, 3 = 3D)
    pub status_valid: Option<bool>,  // NMEA RMC A/V flag
    pub satellites: Option<u8>,
    pub hdop: Option<f64>,
}

impl GpsFix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the receiver reports a usable position
    pub fn has_fix(&self) -> bool {
        if self.latitude.is_none() || self.longitude.is_none() {
            return false;
        }
        if self.status_valid == Some(false) {
            return false;
        }
        if matches!(self.fix_quality, Some(0)) {
            return false;
        }
        !matches!(self.mode, Some(0) | Some(1))
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        if !self.has_fix() {
            return None;
        }
        Some(Coordinate::new(self.latitude?, self.longitude?))
    }

    /// Build a sample, stamping it with the receiver time when known.
    pub fn to_sample(&self, fallback_time: DateTime<Utc>) -> Option<PositionSample> {
        let coordinate = self.coordinate()?;
        Some(PositionSample::new(
            coordinate,
            self.time.unwrap_or(fallback_time),
        ))
    }

    /// Get fix type description
    pub fn get_fix_description(&self) -> String {
        if let Some(quality) = self.fix_quality {
            match quality {
                0 => "No fix".to_string(),
                1 => "GPS".to_string(),
                2 => "DGPS".to_string(),
                4 => "RTK".to_string(),
                5 => "Float RTK".to_string(),
                6 => "Estimated".to_string(),
                _ => format!("Quality {}", quality),
            }
        } else if let Some(m) = self.mode {
            match m {
                0 | 1 => "No fix".to_string(),
                2 => "2D fix".to_string(),
                3 => "3D fix".to_string(),
                _ => format!("Mode {}", m),
            }
        } else {
            "Unknown".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_position_no_fix() {
        let fix = GpsFix::new();
        assert!(!fix.has_fix());
        assert!(fix.to_sample(Utc::now()).is_none());
    }

    #[test]
    fn test_void_status_is_not_a_fix() {
        let mut fix = GpsFix::new();
        fix.latitude = Some(48.1);
        fix.longitude = Some(11.5);
        assert!(fix.has_fix());

        fix.status_valid = Some(false);
        assert!(!fix.has_fix());

        fix.status_valid = Some(true);
        fix.mode = Some(1);
        assert!(!fix.has_fix());
        assert_eq!(fix.get_fix_description(), "No fix");
    }

    #[test]
    fn test_sample_prefers_receiver_time() {
        let fallback = DateTime::<Utc>::UNIX_EPOCH;
        let mut fix = GpsFix::new();
        fix.latitude = Some(1.0);
        fix.longitude = Some(2.0);

        let sample = fix.to_sample(fallback).unwrap();
        assert_eq!(sample.timestamp, fallback);
        assert_eq!(sample.coordinate, Coordinate::new(1.0, 2.0));

        let receiver_time = Utc::now();
        fix.time = Some(receiver_time);
        assert_eq!(fix.to_sample(fallback).unwrap().timestamp, receiver_time);
    }
}
