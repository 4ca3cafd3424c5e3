// src/geo.rs
//! Coordinates and great-circle distance

use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Latitude/longitude span of the viewport produced by a recenter.
pub const RECENTER_DELTA_DEG: f64 = 0.0421;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,  // decimal degrees
    pub longitude: f64, // decimal degrees
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Great-circle distance to `other` in meters.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        distance(*self, *other)
    }
}

/// Haversine distance between two coordinates in meters.
///
/// Symmetric and non-negative for every input; coincident points yield 0.
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push h a hair outside [0, 1] for antipodal points
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Map viewport centered on a position, as handed to a map widget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapRegion {
    pub latitude: f64,
    pub longitude: f64,
    pub latitude_delta: f64,
    pub longitude_delta: f64,
}

impl MapRegion {
    pub fn centered_on(center: Coordinate) -> Self {
        Self {
            latitude: center.latitude,
            longitude: center.longitude,
            latitude_delta: RECENTER_DELTA_DEG,
            longitude_delta: RECENTER_DELTA_DEG,
        }
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}
