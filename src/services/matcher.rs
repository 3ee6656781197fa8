//! Route matching: how well a pickup/dropoff pair fits a driver's route
//!
//! Matching is proximity based. Each point is projected onto the route
//! polyline; points too far from the shape get a second chance against the
//! route's start and end. Two-point short routes are matched on endpoint
//! proximity alone. Every rejection is a `MatchResult` with a reason.

use crate::domain::geo::{haversine_km, project_onto_segment, Point, Polyline};
use crate::domain::matching::{
    FailureReason, MatchQuality, MatchResult, Projection, ProjectionSource,
};
use crate::domain::types::{CandidateRoute, TripRequest};
use crate::infra::config::MatchingConfig;
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Score penalty weights
const PICKUP_OFFSET_WEIGHT: f64 = 20.0;
const DROPOFF_OFFSET_WEIGHT: f64 = 20.0;
const DETOUR_WEIGHT: f64 = 40.0;

/// Short-route score split
const PROXIMITY_SHARE: f64 = 0.6;
const SIMILARITY_SHARE: f64 = 0.4;

/// Below this the pickup and dropoff are treated as the same place
const MIN_DIRECT_DISTANCE_KM: f64 = 1e-6;

/// Nearest position on `polyline` to `point`.
///
/// Vertices are scanned first; the first one within `vertex_epsilon_km` is
/// returned as an exact match. Otherwise every segment is scanned and the
/// global minimum perpendicular (clamped) projection wins.
pub fn project_point_to_polyline(
    point: Point,
    polyline: &Polyline,
    vertex_epsilon_km: f64,
) -> Projection {
    for (index, &vertex) in polyline.points().iter().enumerate() {
        let d = haversine_km(point, vertex);
        if d <= vertex_epsilon_km {
            return Projection {
                point: vertex,
                polyline_index: index,
                segment_fraction: 0.0,
                distance_off_route_km: d,
                is_exact_vertex_match: true,
                source: ProjectionSource::Vertex,
            };
        }
    }

    let mut best = Projection {
        point: polyline.start(),
        polyline_index: 0,
        segment_fraction: 0.0,
        distance_off_route_km: f64::INFINITY,
        is_exact_vertex_match: false,
        source: ProjectionSource::Segment,
    };
    for (index, pair) in polyline.points().windows(2).enumerate() {
        let (closest, fraction) = project_onto_segment(point, pair[0], pair[1]);
        let d = haversine_km(point, closest);
        if d < best.distance_off_route_km {
            best.point = closest;
            best.polyline_index = index;
            best.segment_fraction = fraction;
            best.distance_off_route_km = d;
        }
    }
    best
}

/// Scores trip requests against candidate routes
#[derive(Clone)]
pub struct RouteMatcher {
    config: MatchingConfig,
    metrics: Option<Arc<Metrics>>,
}

impl RouteMatcher {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config, metrics: None }
    }

    /// Create a matcher with metrics recording
    pub fn with_metrics(config: MatchingConfig, metrics: Arc<Metrics>) -> Self {
        Self { config, metrics: Some(metrics) }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Match one trip against one route
    pub fn match_trip(&self, trip: &TripRequest, route: &CandidateRoute) -> MatchResult {
        let start = Instant::now();
        let result = self.evaluate(trip, route);

        if let Some(ref metrics) = self.metrics {
            metrics.record_match_evaluated(start.elapsed().as_micros() as u64, result.is_match);
        }
        if let Some(ref failure) = result.failure {
            debug!(
                route_id = %route.id,
                reason = %failure.reason.as_str(),
                closest_km = ?failure.closest_km,
                "match_rejected"
            );
        }
        result
    }

    fn evaluate(&self, trip: &TripRequest, route: &CandidateRoute) -> MatchResult {
        let polyline = match Polyline::from_slice(&route.polyline) {
            Ok(polyline) => polyline,
            Err(e) => {
                debug!(route_id = %route.id, error = %e, "route_geometry_invalid");
                return MatchResult::rejected(route.id.clone(), FailureReason::InvalidGeometry, None);
            }
        };

        if polyline.len() == 2 && polyline.length_km() < self.config.short_route_cutoff_km {
            return self.match_short_route(trip, route, &polyline);
        }

        let pickup = match self.resolve_point(trip.pickup(), &polyline) {
            Ok(p) => p,
            Err(closest) => {
                return MatchResult::rejected(
                    route.id.clone(),
                    FailureReason::EndpointsTooFar,
                    Some(closest),
                )
            }
        };
        let dropoff = match self.resolve_point(trip.dropoff(), &polyline) {
            Ok(p) => p,
            Err(closest) => {
                return MatchResult::rejected(
                    route.id.clone(),
                    FailureReason::EndpointsTooFar,
                    Some(closest),
                )
            }
        };

        if dropoff.position() <= pickup.position() {
            return MatchResult::rejected(route.id.clone(), FailureReason::DirectionViolated, None)
                .with_projections(pickup, dropoff);
        }

        let segment_distance_km = polyline.distance_between(
            (pickup.polyline_index, pickup.segment_fraction),
            (dropoff.polyline_index, dropoff.segment_fraction),
        );
        let direct_distance_km = haversine_km(trip.pickup(), trip.dropoff());
        let detour_percent = detour_percent(segment_distance_km, direct_distance_km);
        let score = self.score(
            pickup.distance_off_route_km,
            dropoff.distance_off_route_km,
            detour_percent,
        );

        MatchResult {
            route_id: route.id.clone(),
            is_match: true,
            match_score: score,
            match_quality: MatchQuality::from_score(score),
            pickup_projection: Some(pickup),
            dropoff_projection: Some(dropoff),
            segment_distance_km,
            direct_distance_km,
            detour_percent,
            failure: None,
        }
    }

    /// Project a point, retrying against the route's ends when it is off the shape.
    /// Returns the smallest distance observed on failure.
    fn resolve_point(&self, point: Point, polyline: &Polyline) -> Result<Projection, f64> {
        let projection =
            project_point_to_polyline(point, polyline, self.config.exact_vertex_epsilon_km);
        if projection.distance_off_route_km <= self.config.deviation_threshold_km {
            return Ok(projection);
        }

        let to_start = haversine_km(point, polyline.start());
        let to_end = haversine_km(point, polyline.end());
        let (distance, index, vertex) = if to_start <= to_end {
            (to_start, 0, polyline.start())
        } else {
            (to_end, polyline.last_index(), polyline.end())
        };

        if distance <= self.config.endpoint_threshold_km {
            return Ok(Projection {
                point: vertex,
                polyline_index: index,
                segment_fraction: 0.0,
                distance_off_route_km: distance,
                is_exact_vertex_match: false,
                source: ProjectionSource::EndpointFallback,
            });
        }

        Err(projection.distance_off_route_km.min(distance))
    }

    /// Endpoint-proximity matching for two-point routes below the short-route cutoff
    fn match_short_route(
        &self,
        trip: &TripRequest,
        route: &CandidateRoute,
        polyline: &Polyline,
    ) -> MatchResult {
        let (start, end) = (polyline.start(), polyline.end());
        let (pickup_foot, pickup_t) = project_onto_segment(trip.pickup(), start, end);
        let (dropoff_foot, dropoff_t) = project_onto_segment(trip.dropoff(), start, end);

        let pickup = Projection {
            point: pickup_foot,
            polyline_index: 0,
            segment_fraction: pickup_t,
            distance_off_route_km: haversine_km(trip.pickup(), pickup_foot),
            is_exact_vertex_match: false,
            source: ProjectionSource::ShortRoute,
        };
        let dropoff = Projection {
            point: dropoff_foot,
            polyline_index: 0,
            segment_fraction: dropoff_t,
            distance_off_route_km: haversine_km(trip.dropoff(), dropoff_foot),
            is_exact_vertex_match: false,
            source: ProjectionSource::ShortRoute,
        };

        if dropoff.position() <= pickup.position() {
            return MatchResult::rejected(route.id.clone(), FailureReason::DirectionViolated, None)
                .with_projections(pickup, dropoff);
        }

        let tolerance = self.config.short_route_tolerance_km;
        let pickup_gap = haversine_km(trip.pickup(), start);
        let dropoff_gap = haversine_km(trip.dropoff(), end);
        if pickup_gap > tolerance || dropoff_gap > tolerance {
            return MatchResult::rejected(
                route.id.clone(),
                FailureReason::EndpointsTooFar,
                Some(pickup_gap.max(dropoff_gap)),
            );
        }

        let route_km = polyline.length_km();
        let trip_km = haversine_km(trip.pickup(), trip.dropoff());
        let similarity = distance_similarity(trip_km, route_km);
        if similarity < self.config.min_distance_similarity {
            return MatchResult::rejected(route.id.clone(), FailureReason::DistanceDissimilar, None)
                .with_projections(pickup, dropoff);
        }

        let proximity = (1.0 - (pickup_gap + dropoff_gap) / (2.0 * tolerance)).clamp(0.0, 1.0);
        let score = (PROXIMITY_SHARE * proximity * 100.0 + SIMILARITY_SHARE * similarity * 100.0)
            .clamp(0.0, 100.0);

        MatchResult {
            route_id: route.id.clone(),
            is_match: true,
            match_score: score,
            match_quality: MatchQuality::from_score(score),
            pickup_projection: Some(pickup),
            dropoff_projection: Some(dropoff),
            segment_distance_km: route_km,
            direct_distance_km: trip_km,
            detour_percent: detour_percent(route_km, trip_km),
            failure: None,
        }
    }

    /// Penalize off-route distance at both ends and detour beyond the direct line.
    /// Negative detours earn no bonus.
    pub fn score(&self, pickup_off_km: f64, dropoff_off_km: f64, detour_percent: f64) -> f64 {
        let threshold = self.config.deviation_threshold_km;
        let raw = 100.0
            - PICKUP_OFFSET_WEIGHT * (pickup_off_km / threshold)
            - DROPOFF_OFFSET_WEIGHT * (dropoff_off_km / threshold)
            - DETOUR_WEIGHT * (detour_percent.max(0.0) / self.config.max_detour_percent);
        if raw.is_nan() {
            return 0.0;
        }
        raw.clamp(0.0, 100.0)
    }

    /// Rank every candidate with valid geometry, best first
    pub fn find_matching_rides(
        &self,
        trip: &TripRequest,
        candidates: &[CandidateRoute],
        max_results: usize,
    ) -> Vec<MatchResult> {
        let mut matches: Vec<MatchResult> = Vec::new();
        for route in candidates {
            let result = self.match_trip(trip, route);
            if result.failure_reason() == Some(FailureReason::InvalidGeometry) {
                if let Some(ref metrics) = self.metrics {
                    metrics.record_invalid_geometry();
                }
                continue;
            }
            if result.is_match {
                matches.push(result);
            }
        }

        matches.sort_by(|a, b| b.match_score.total_cmp(&a.match_score));
        matches.truncate(max_results);

        debug!(
            candidates = %candidates.len(),
            matched = %matches.len(),
            "matching_rides_ranked"
        );
        matches
    }
}

/// Excess of along-route distance over the direct distance, in percent
fn detour_percent(segment_km: f64, direct_km: f64) -> f64 {
    if direct_km < MIN_DIRECT_DISTANCE_KM {
        return 0.0;
    }
    (segment_km - direct_km) / direct_km * 100.0
}

/// Ratio of the shorter to the longer distance (0 when both are zero)
fn distance_similarity(a_km: f64, b_km: f64) -> f64 {
    let longer = a_km.max(b_km);
    if longer <= 0.0 {
        return 0.0;
    }
    a_km.min(b_km) / longer
}
