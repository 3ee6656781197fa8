//! Geographic primitives: points, polylines and great-circle distance
//!
//! Coordinates are degrees, stored longitude first so that a `Point`
//! serializes as a GeoJSON-style `[lon, lat]` pair.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius used for haversine distances
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Malformed geometry handed to the core
#[derive(Debug, Clone, PartialEq)]
pub enum GeoError {
    NonFiniteCoordinate { lon: f64, lat: f64 },
    OutOfRange { lon: f64, lat: f64 },
    TooFewPoints(usize),
    ZeroLength,
}

impl fmt::Display for GeoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeoError::NonFiniteCoordinate { lon, lat } => {
                write!(f, "non-finite coordinate ({lon}, {lat})")
            }
            GeoError::OutOfRange { lon, lat } => write!(f, "coordinate out of range ({lon}, {lat})"),
            GeoError::TooFewPoints(n) => write!(f, "polyline needs at least 2 points, got {n}"),
            GeoError::ZeroLength => f.write_str("polyline has zero length"),
        }
    }
}

impl std::error::Error for GeoError {}

/// A (longitude, latitude) pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub lon: f64,
    pub lat: f64,
}

impl From<[f64; 2]> for Point {
    fn from(pair: [f64; 2]) -> Self {
        Self { lon: pair[0], lat: pair[1] }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.lon, p.lat]
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lon, self.lat)
    }
}

impl std::str::FromStr for Point {
    type Err = String;

    /// Parse `"lon,lat"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lon, lat) = s.split_once(',').ok_or_else(|| format!("expected lon,lat: {s}"))?;
        let lon: f64 = lon.trim().parse().map_err(|e| format!("bad longitude {lon}: {e}"))?;
        let lat: f64 = lat.trim().parse().map_err(|e| format!("bad latitude {lat}: {e}"))?;
        let point = Point::new(lon, lat);
        point.validate().map_err(|e| e.to_string())?;
        Ok(point)
    }
}

impl Point {
    #[inline]
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Reject NaN/infinite or out-of-range coordinates
    pub fn validate(&self) -> Result<(), GeoError> {
        if !self.lon.is_finite() || !self.lat.is_finite() {
            return Err(GeoError::NonFiniteCoordinate { lon: self.lon, lat: self.lat });
        }
        if !(-180.0..=180.0).contains(&self.lon) || !(-90.0..=90.0).contains(&self.lat) {
            return Err(GeoError::OutOfRange { lon: self.lon, lat: self.lat });
        }
        Ok(())
    }
}

/// Great-circle distance between two points in kilometres
#[inline]
pub fn haversine_km(a: Point, b: Point) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat * 0.5).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon * 0.5).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Closest point to `p` on segment `a`→`b`, plus its fraction along the segment.
///
/// Works in a local equirectangular plane scaled by the segment's mean latitude,
/// which is accurate for segments of a few hundred kilometres.
pub fn project_onto_segment(p: Point, a: Point, b: Point) -> (Point, f64) {
    let cos_lat = ((a.lat + b.lat) * 0.5).to_radians().cos();
    let dx = (b.lon - a.lon) * cos_lat;
    let dy = b.lat - a.lat;
    let len_sq = dx * dx + dy * dy;
    if len_sq <= f64::EPSILON {
        return (a, 0.0);
    }
    let px = (p.lon - a.lon) * cos_lat;
    let py = p.lat - a.lat;
    let t = ((px * dx + py * dy) / len_sq).clamp(0.0, 1.0);
    (Point::new(a.lon + t * (b.lon - a.lon), a.lat + t * (b.lat - a.lat)), t)
}

/// Ordered, directional route shape with at least two vertices
#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    points: Vec<Point>,
    /// Distance from the first vertex to each vertex
    cumulative_km: Vec<f64>,
}

impl Polyline {
    pub fn new(points: Vec<Point>) -> Result<Self, GeoError> {
        if points.len() < 2 {
            return Err(GeoError::TooFewPoints(points.len()));
        }
        for p in &points {
            p.validate()?;
        }

        let mut cumulative_km = Vec::with_capacity(points.len());
        let mut total = 0.0;
        cumulative_km.push(0.0);
        for pair in points.windows(2) {
            total += haversine_km(pair[0], pair[1]);
            cumulative_km.push(total);
        }
        if total <= 0.0 {
            return Err(GeoError::ZeroLength);
        }

        Ok(Self { points, cumulative_km })
    }

    pub fn from_slice(points: &[Point]) -> Result<Self, GeoError> {
        Self::new(points.to_vec())
    }

    #[inline]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn start(&self) -> Point {
        self.points[0]
    }

    #[inline]
    pub fn end(&self) -> Point {
        self.points[self.points.len() - 1]
    }

    #[inline]
    pub fn last_index(&self) -> usize {
        self.points.len() - 1
    }

    /// Total length along the polyline
    #[inline]
    pub fn length_km(&self) -> f64 {
        self.cumulative_km[self.cumulative_km.len() - 1]
    }

    /// Distance from the start to a position `index + fraction` on the polyline
    pub fn position_km(&self, index: usize, fraction: f64) -> f64 {
        let index = index.min(self.last_index());
        if index == self.last_index() {
            return self.cumulative_km[index];
        }
        let segment = self.cumulative_km[index + 1] - self.cumulative_km[index];
        self.cumulative_km[index] + segment * fraction.clamp(0.0, 1.0)
    }

    /// Along-route distance between two positions (negative if `to` precedes `from`)
    pub fn distance_between(&self, from: (usize, f64), to: (usize, f64)) -> f64 {
        self.position_km(to.0, to.1) - self.position_km(from.0, from.1)
    }
}
