//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `matcher` - Trip-to-route matching, scoring and ranking
//! - `corridor` - Corridor checks plus speed and stop pattern analysis
//! - `monitor` - Per-ride live safety sessions and alert fan-out
//! - `reassignment` - Forced migration of passengers off cancelled routes

pub mod corridor;
pub mod matcher;
pub mod monitor;
pub mod reassignment;

// Re-export commonly used types
pub use corridor::{check_corridor, CorridorCheck};
pub use matcher::{project_point_to_polyline, RouteMatcher};
pub use monitor::{CorridorMonitor, SafetyAlert, TrackedRide, TrackingError, TrackingSummary};
pub use reassignment::{
    BookingOutcome, NoAlternativeReason, ReassignmentCoordinator, ReassignmentReport, Resolution,
};
