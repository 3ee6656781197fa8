//! Ranked replacement candidates for one displaced booking

use crate::domain::matching::MatchResult;
use crate::domain::types::{CandidateRoute, RouteStatus, TripRequest};
use crate::services::matcher::RouteMatcher;
use serde::Serialize;
use std::fmt;

/// A route that fits the passenger's leg, with its match
#[derive(Debug, Clone)]
pub struct RankedCandidate<'a> {
    pub route: &'a CandidateRoute,
    pub result: MatchResult,
}

impl RankedCandidate<'_> {
    #[inline]
    pub fn score(&self) -> f64 {
        self.result.match_score
    }
}

/// Why a ranked candidate could not take the booking
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CandidateRejection {
    GenderPolicy,
    VerifiedOnly,
    /// Lost the race for the last seats
    SeatsUnavailable,
    Directory(String),
}

impl fmt::Display for CandidateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateRejection::GenderPolicy => f.write_str("gender policy"),
            CandidateRejection::VerifiedOnly => f.write_str("verified passengers only"),
            CandidateRejection::SeatsUnavailable => f.write_str("seats unavailable"),
            CandidateRejection::Directory(e) => write!(f, "directory error: {e}"),
        }
    }
}

/// Active routes with room for `seats`, matching the leg at `min_score` or better,
/// best first. Ties keep pool order.
pub struct RankedCandidates<'a> {
    inner: std::vec::IntoIter<RankedCandidate<'a>>,
}

impl<'a> RankedCandidates<'a> {
    pub fn rank(
        matcher: &RouteMatcher,
        trip: &TripRequest,
        pool: &'a [CandidateRoute],
        seats: u32,
        min_score: f64,
    ) -> Self {
        let mut ranked: Vec<RankedCandidate<'a>> = pool
            .iter()
            .filter(|route| route.status == RouteStatus::Active)
            .filter(|route| route.available_capacity >= seats)
            .filter_map(|route| {
                let result = matcher.match_trip(trip, route);
                (result.is_match && result.match_score >= min_score)
                    .then_some(RankedCandidate { route, result })
            })
            .collect();
        ranked.sort_by(|a, b| b.score().total_cmp(&a.score()));
        Self { inner: ranked.into_iter() }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}

impl<'a> Iterator for RankedCandidates<'a> {
    type Item = RankedCandidate<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for RankedCandidates<'_> {}
