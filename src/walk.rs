// src/walk.rs
//! Walk records, position samples and summary statistics

use crate::geo::{self, Coordinate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A position fix as delivered by a position source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    #[serde(flatten)]
    pub coordinate: Coordinate,
    pub timestamp: DateTime<Utc>,
}

impl PositionSample {
    pub fn new(coordinate: Coordinate, timestamp: DateTime<Utc>) -> Self {
        Self {
            coordinate,
            timestamp,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.coordinate.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.coordinate.longitude
    }
}

/// A walk, either in progress (`end_time` unset) or archived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Walk {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub route: Vec<PositionSample>,
    pub distance_meters: f64,
    /// Set from `end_time - start_time` when the walk is finalized.
    pub duration_seconds: u64,
}

impl Walk {
    pub fn new(id: String, start_time: DateTime<Utc>) -> Self {
        Self {
            id,
            start_time,
            end_time: None,
            route: Vec::new(),
            distance_meters: 0.0,
            duration_seconds: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    /// Append a sample and add the leg from the previous sample to the
    /// running distance. Returns the length of that leg.
    pub fn push_sample(&mut self, sample: PositionSample) -> f64 {
        let leg = self
            .route
            .last()
            .map_or(0.0, |prev| geo::distance(prev.coordinate, sample.coordinate));
        self.route.push(sample);
        self.distance_meters += leg;
        leg
    }

    /// Close the walk at `end_time`. Finalizing twice keeps the first end time.
    pub fn finalize(&mut self, end_time: DateTime<Utc>) {
        if self.end_time.is_some() {
            return;
        }
        let end_time = end_time.max(self.start_time);
        self.end_time = Some(end_time);
        self.duration_seconds = end_time
            .signed_duration_since(self.start_time)
            .num_seconds()
            .max(0) as u64;
    }

    /// Seconds since the start, frozen at the duration once finalized.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        if self.end_time.is_some() {
            return self.duration_seconds;
        }
        now.signed_duration_since(self.start_time).num_seconds().max(0) as u64
    }

    pub fn last_position(&self) -> Option<&PositionSample> {
        self.route.last()
    }

    /// Where a walk interrupted by a crash is considered to have ended.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.route
            .last()
            .map_or(self.start_time, |s| s.timestamp.max(self.start_time))
    }

    /// Distance summed over the whole route from scratch.
    pub fn route_distance(&self) -> f64 {
        self.route
            .windows(2)
            .map(|pair| geo::distance(pair[0].coordinate, pair[1].coordinate))
            .sum()
    }

    pub fn distance_km(&self) -> f64 {
        self.distance_meters / 1000.0
    }

    pub fn formatted_duration(&self) -> String {
        format_duration(self.duration_seconds)
    }
}

/// Format seconds as `HH:MM:SS`. Hours keep counting past 99.
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Totals and averages over a set of finished walks.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct WalkStats {
    pub total_walks: usize,
    pub total_distance_m: f64,
    pub total_seconds: u64,
    pub average_distance_m: f64,
    pub average_seconds: f64,
}

impl WalkStats {
    pub fn from_walks(walks: &[Walk]) -> Self {
        if walks.is_empty() {
            return Self::default();
        }

        let total_walks = walks.len();
        let total_distance_m: f64 = walks.iter().map(|w| w.distance_meters).sum();
        let total_seconds: u64 = walks.iter().map(|w| w.duration_seconds).sum();

        Self {
            total_walks,
            total_distance_m,
            total_seconds,
            average_distance_m: total_distance_m / total_walks as f64,
            average_seconds: total_seconds as f64 / total_walks as f64,
        }
    }
}
