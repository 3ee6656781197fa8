//! Live-tracking types: location samples, deviation severity and records

use crate::domain::geo::Point;
use crate::domain::types::{new_uuid_v7, RideId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One GPS fix reported by the driver's device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviationSample {
    pub point: Point,
    pub timestamp: DateTime<Utc>,
    /// Reported ground speed (km/h)
    #[serde(default)]
    pub speed_kmh: Option<f64>,
    /// Horizontal accuracy radius (metres)
    #[serde(default)]
    pub accuracy_m: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviationSeverity {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl DeviationSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviationSeverity::None => "NONE",
            DeviationSeverity::Low => "LOW",
            DeviationSeverity::Medium => "MEDIUM",
            DeviationSeverity::High => "HIGH",
            DeviationSeverity::Critical => "CRITICAL",
        }
    }

    /// Severities that open a deviation record and reach passengers and operations
    #[inline]
    pub fn is_major(&self) -> bool {
        *self >= DeviationSeverity::High
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeviationStatus {
    pub severity: DeviationSeverity,
    pub distance_km: f64,
    pub duration_secs: u64,
}

/// Alert categories gated independently per ride
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    RouteDeviation,
    Speed,
    UnusualStop,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::RouteDeviation => "route_deviation",
            AlertType::Speed => "speed",
            AlertType::UnusualStop => "unusual_stop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviationState {
    Active,
    ReturnedToRoute,
    /// Tracking stopped while the deviation was still active
    Closed,
}

/// An off-corridor excursion of one ride
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviationRecord {
    pub id: String,
    pub ride_id: RideId,
    pub state: DeviationState,
    pub severity: DeviationSeverity,
    pub distance_km: f64,
    pub max_distance_km: f64,
    pub duration_secs: u64,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl DeviationRecord {
    pub fn open(ride_id: RideId, status: &DeviationStatus, at: DateTime<Utc>) -> Self {
        Self {
            id: new_uuid_v7(),
            ride_id,
            state: DeviationState::Active,
            severity: status.severity,
            distance_km: status.distance_km,
            max_distance_km: status.distance_km,
            duration_secs: status.duration_secs,
            opened_at: at,
            updated_at: at,
            resolved_at: None,
        }
    }

    /// Refresh an active record; severity never drops while the excursion lasts
    pub fn refresh(&mut self, status: &DeviationStatus, at: DateTime<Utc>) {
        self.severity = self.severity.max(status.severity);
        self.distance_km = status.distance_km;
        self.max_distance_km = self.max_distance_km.max(status.distance_km);
        self.duration_secs = status.duration_secs;
        self.updated_at = at;
    }

    pub fn resolve(&mut self, state: DeviationState, at: DateTime<Utc>) {
        self.state = state;
        self.updated_at = at;
        self.resolved_at = Some(at);
    }
}
