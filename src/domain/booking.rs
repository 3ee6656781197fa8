//! Booking data model and reassignment history

use crate::domain::geo::Point;
use crate::domain::types::{BookingId, Gender, RouteId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Booking lifecycle.
///
/// `CancelledPendingReassignment` is the transient state between a driver's
/// cancellation and the reassignment outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CancelledPendingReassignment,
    Cancelled,
    Completed,
}

impl BookingStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::CancelledPendingReassignment => "cancelled_pending_reassignment",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    /// Only live bookings are migrated when their route is cancelled
    #[inline]
    pub fn is_reassignable(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

/// Why a booking ended up cancelled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CancellationReason {
    /// Moved onto another route
    Reassigned { new_booking_id: BookingId, new_route_id: RouteId },
    /// Driver cancelled and no substitute was found
    NoAlternative,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PaymentState {
    #[default]
    Unpaid,
    Authorized,
    Captured { amount_cents: u64 },
}

impl PaymentState {
    /// Amount that must be returned if the booking cannot be honoured
    #[inline]
    pub fn refundable_cents(&self) -> Option<u64> {
        match self {
            PaymentState::Captured { amount_cents } => Some(*amount_cents),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassengerProfile {
    pub id: UserId,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub verified: bool,
}

/// One migration of a booking from a cancelled route to a replacement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReassignmentHop {
    pub from_route: RouteId,
    pub to_route: RouteId,
    pub timestamp: DateTime<Utc>,
    pub match_score: f64,
}

/// Append-only migration history of a passenger's booking.
///
/// Carried forward onto each replacement booking so the chain survives
/// successive cancellations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReassignmentRecord {
    pub booking_id: BookingId,
    pub original_route_id: RouteId,
    #[serde(default)]
    pub chain: Vec<ReassignmentHop>,
    #[serde(default)]
    pub attempts: u32,
}

impl ReassignmentRecord {
    pub fn new(booking_id: BookingId, original_route_id: RouteId) -> Self {
        Self { booking_id, original_route_id, chain: Vec::new(), attempts: 0 }
    }

    #[inline]
    pub fn hops(&self) -> usize {
        self.chain.len()
    }

    pub fn push_hop(&mut self, hop: ReassignmentHop) {
        self.chain.push(hop);
    }
}

/// A passenger's seat reservation on a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub route_id: RouteId,
    pub passenger: PassengerProfile,
    pub pickup: Point,
    pub dropoff: Point,
    pub seats: u32,
    pub status: BookingStatus,
    #[serde(default)]
    pub payment: PaymentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<CancellationReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reassignment: Option<ReassignmentRecord>,
}

impl Booking {
    /// Replacement booking on `route_id`, awaiting the new driver's approval
    pub fn replacement(&self, route_id: RouteId, record: ReassignmentRecord) -> Self {
        Self {
            id: BookingId::generate(),
            route_id,
            passenger: self.passenger.clone(),
            pickup: self.pickup,
            dropoff: self.dropoff,
            seats: self.seats,
            status: BookingStatus::Pending,
            payment: self.payment,
            cancellation: None,
            reassignment: Some(record),
        }
    }

    /// Existing history, or a fresh record rooted at this booking
    pub fn reassignment_record(&self) -> ReassignmentRecord {
        self.reassignment
            .clone()
            .unwrap_or_else(|| ReassignmentRecord::new(self.id.clone(), self.route_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking() -> Booking {
        Booking {
            id: BookingId::from("b1"),
            route_id: RouteId::from("r1"),
            passenger: PassengerProfile {
                id: UserId::from("p1"),
                gender: Gender::Female,
                verified: true,
            },
            pickup: Point::new(0.0, 0.1),
            dropoff: Point::new(0.0, 0.9),
            seats: 2,
            status: BookingStatus::Confirmed,
            payment: PaymentState::Captured { amount_cents: 1500 },
            cancellation: None,
            reassignment: None,
        }
    }

    #[test]
    fn test_replacement_is_pending_and_keeps_leg() {
        let original = booking();
        let record = original.reassignment_record();
        let replacement = original.replacement(RouteId::from("r2"), record);

        assert_ne!(replacement.id, original.id);
        assert_eq!(replacement.status, BookingStatus::Pending);
        assert_eq!(replacement.route_id, RouteId::from("r2"));
        assert_eq!(replacement.pickup, original.pickup);
        assert_eq!(replacement.seats, 2);
        assert_eq!(replacement.payment, original.payment);
    }

    #[test]
    fn test_refundable_only_when_captured() {
        assert_eq!(PaymentState::Captured { amount_cents: 900 }.refundable_cents(), Some(900));
        assert_eq!(PaymentState::Authorized.refundable_cents(), None);
        assert_eq!(PaymentState::Unpaid.refundable_cents(), None);
    }

    #[test]
    fn test_status_reassignable() {
        assert!(BookingStatus::Pending.is_reassignable());
        assert!(BookingStatus::Confirmed.is_reassignable());
        assert!(!BookingStatus::Cancelled.is_reassignable());
        assert!(!BookingStatus::CancelledPendingReassignment.is_reassignable());
    }
}
