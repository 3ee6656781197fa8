//! Domain models - core business types
//!
//! This module contains the canonical data types used throughout the system:
//! - `geo` - points, polylines and great-circle distance
//! - `types` - identifiers, trip requests and candidate routes
//! - `matching` - projections and match results
//! - `booking` - bookings and their reassignment history
//! - `tracking` - live location samples and deviation records

pub mod booking;
pub mod geo;
pub mod matching;
pub mod tracking;
pub mod types;

// Re-export commonly used types at module level
pub use geo::{haversine_km, GeoError, Point, Polyline};
pub use matching::{FailureReason, MatchQuality, MatchResult, Projection, ProjectionSource};
pub use types::{BookingId, CandidateRoute, RideId, RouteId, TripRequest, UserId};
