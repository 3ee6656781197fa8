//! Match results produced by the route matcher

use crate::domain::geo::Point;
use crate::domain::types::RouteId;
use serde::Serialize;

/// How a projection was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionSource {
    /// Snapped to a vertex within the exact-match epsilon
    Vertex,
    /// Perpendicular foot on the nearest segment
    Segment,
    /// Off the route shape, accepted against the route's start or end
    EndpointFallback,
    /// Two-point short route matched on endpoint proximity
    ShortRoute,
}

/// Nearest position on a polyline for an arbitrary point
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Projection {
    pub point: Point,
    /// Vertex index, or start vertex of the segment the point projects onto
    pub polyline_index: usize,
    /// Fraction along the segment starting at `polyline_index` (0 for vertex matches)
    pub segment_fraction: f64,
    pub distance_off_route_km: f64,
    pub is_exact_vertex_match: bool,
    pub source: ProjectionSource,
}

impl Projection {
    /// Monotone position along the polyline used for direction checks
    #[inline]
    pub fn position(&self) -> f64 {
        self.polyline_index as f64 + self.segment_fraction
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchQuality {
    Poor,
    Fair,
    Good,
    Excellent,
    Perfect,
}

impl MatchQuality {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            MatchQuality::Perfect
        } else if score >= 75.0 {
            MatchQuality::Excellent
        } else if score >= 60.0 {
            MatchQuality::Good
        } else if score >= 40.0 {
            MatchQuality::Fair
        } else {
            MatchQuality::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchQuality::Perfect => "PERFECT",
            MatchQuality::Excellent => "EXCELLENT",
            MatchQuality::Good => "GOOD",
            MatchQuality::Fair => "FAIR",
            MatchQuality::Poor => "POOR",
        }
    }
}

/// Machine-readable reason for a rejected match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    EndpointsTooFar,
    DirectionViolated,
    DistanceDissimilar,
    InvalidGeometry,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::EndpointsTooFar => "endpoints_too_far",
            FailureReason::DirectionViolated => "direction_violated",
            FailureReason::DistanceDissimilar => "distance_dissimilar",
            FailureReason::InvalidGeometry => "invalid_geometry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchFailure {
    pub reason: FailureReason,
    /// Smallest relevant distance observed, when the rejection is distance based
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closest_km: Option<f64>,
}

/// Outcome of matching one trip request against one route
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub route_id: RouteId,
    pub is_match: bool,
    pub match_score: f64,
    pub match_quality: MatchQuality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup_projection: Option<Projection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropoff_projection: Option<Projection>,
    pub segment_distance_km: f64,
    pub direct_distance_km: f64,
    pub detour_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<MatchFailure>,
}

impl MatchResult {
    /// A rejected result carrying whatever was resolved before the rejection
    pub fn rejected(route_id: RouteId, reason: FailureReason, closest_km: Option<f64>) -> Self {
        Self {
            route_id,
            is_match: false,
            match_score: 0.0,
            match_quality: MatchQuality::Poor,
            pickup_projection: None,
            dropoff_projection: None,
            segment_distance_km: 0.0,
            direct_distance_km: 0.0,
            detour_percent: 0.0,
            failure: Some(MatchFailure { reason, closest_km }),
        }
    }

    pub fn with_projections(mut self, pickup: Projection, dropoff: Projection) -> Self {
        self.pickup_projection = Some(pickup);
        self.dropoff_projection = Some(dropoff);
        self
    }

    #[inline]
    pub fn failure_reason(&self) -> Option<FailureReason> {
        self.failure.as_ref().map(|f| f.reason)
    }
}
