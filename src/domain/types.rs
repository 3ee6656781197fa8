//! Shared types: identifiers, trip requests and candidate routes

use crate::domain::geo::{GeoError, Point};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for driver-posted route IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(pub String);

impl std::fmt::Display for RouteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RouteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype wrapper for booking IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(pub String);

impl BookingId {
    pub fn generate() -> Self {
        Self(new_uuid_v7())
    }
}

impl std::fmt::Display for BookingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BookingId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype wrapper for user IDs (drivers and passengers)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Newtype wrapper for an in-progress ride under live tracking
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RideId(pub String);

impl std::fmt::Display for RideId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RideId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct TripRequestRaw {
    pickup: Point,
    dropoff: Point,
}

/// A passenger's requested leg. Both points are validated on construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TripRequestRaw")]
pub struct TripRequest {
    pickup: Point,
    dropoff: Point,
}

impl TryFrom<TripRequestRaw> for TripRequest {
    type Error = GeoError;

    fn try_from(raw: TripRequestRaw) -> Result<Self, Self::Error> {
        Self::new(raw.pickup, raw.dropoff)
    }
}

impl TripRequest {
    pub fn new(pickup: Point, dropoff: Point) -> Result<Self, GeoError> {
        pickup.validate()?;
        dropoff.validate()?;
        Ok(Self { pickup, dropoff })
    }

    #[inline]
    pub fn pickup(&self) -> Point {
        self.pickup
    }

    #[inline]
    pub fn dropoff(&self) -> Point {
        self.dropoff
    }

    /// Same leg travelled the other way
    pub fn reversed(&self) -> Self {
        Self { pickup: self.dropoff, dropoff: self.pickup }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    #[default]
    Active,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Female,
    Male,
    #[default]
    Unspecified,
}

/// Who a driver accepts on their route
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenderPolicy {
    #[default]
    Any,
    FemaleOnly,
    MaleOnly,
}

impl GenderPolicy {
    pub fn admits(&self, gender: Gender) -> bool {
        match self {
            GenderPolicy::Any => true,
            GenderPolicy::FemaleOnly => gender == Gender::Female,
            GenderPolicy::MaleOnly => gender == Gender::Male,
        }
    }
}

/// Driver-set restrictions on a route
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteConstraints {
    #[serde(default)]
    pub gender_policy: GenderPolicy,
    #[serde(default)]
    pub verified_only: bool,
    #[serde(default)]
    pub smoking_allowed: bool,
    #[serde(default)]
    pub pets_allowed: bool,
}

/// A driver-posted route as supplied by the ride directory.
///
/// `available_capacity` is a snapshot taken when the record was read; seat
/// changes go through the directory's atomic counter, never through this field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRoute {
    pub id: RouteId,
    pub owner_id: UserId,
    #[serde(default)]
    pub polyline: Vec<Point>,
    #[serde(default)]
    pub total_distance_km: f64,
    #[serde(default)]
    pub total_duration_min: f64,
    pub available_capacity: u32,
    pub scheduled_departure: DateTime<Utc>,
    #[serde(default)]
    pub status: RouteStatus,
    #[serde(default)]
    pub constraints: RouteConstraints,
}

/// Departure-time window used when searching for replacement routes
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchWindow {
    pub from: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl SearchWindow {
    /// From `now` (or `before` ahead of departure, whichever is earlier) to `after` past departure
    pub fn around_departure(
        departure: DateTime<Utc>,
        now: DateTime<Utc>,
        before: Duration,
        after: Duration,
    ) -> Self {
        Self { from: now.min(departure - before), until: departure + after }
    }

    #[inline]
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.from && t <= self.until
    }
}
