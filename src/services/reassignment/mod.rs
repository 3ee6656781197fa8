//! Forced migration of passengers off a cancelled route
//!
//! When a driver cancels, every affected booking is walked through a small
//! saga: suspend the booking, find the best replacement route that will take
//! the passenger, reserve seats atomically, create the replacement (pending the
//! new driver's approval), cancel the original, notify. Bookings with no
//! replacement are cancelled and refunded. One booking failing never stops
//! the batch.

mod candidates;
mod saga;
#[cfg(test)]
mod tests;

pub use candidates::{CandidateRejection, RankedCandidate, RankedCandidates};
pub use saga::{SagaLog, SagaStep};

use crate::domain::booking::{Booking, CancellationReason, ReassignmentHop};
use crate::domain::types::{
    epoch_ms, BookingId, CandidateRoute, RouteId, RouteStatus, SearchWindow, TripRequest, UserId,
};
use crate::infra::config::{MatchingConfig, ReassignmentConfig};
use crate::infra::metrics::Metrics;
use crate::io::directory::RideDirectory;
use crate::io::events::{
    Audience, EventSender, NoAlternativePayload, NotificationEvent, ReassignmentSuccessPayload,
};
use crate::io::ledger::BookingLedger;
use crate::io::payments::PaymentGateway;
use crate::services::matcher::RouteMatcher;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoAlternativeReason {
    /// Nothing in the search window matched the leg
    NoCandidates,
    /// Matches existed but none could take the passenger
    AllCandidatesRejected,
    MaxHopsReached,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Reassigned { new_booking_id: BookingId, new_route_id: RouteId, match_score: f64 },
    NoAlternative { refund_initiated: bool, reason: NoAlternativeReason },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingOutcome {
    pub booking_id: BookingId,
    pub passenger_id: UserId,
    pub seats: u32,
    pub resolution: Resolution,
    pub saga: SagaLog,
}

/// Per-booking results of one cancellation, in input order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReassignmentReport {
    pub cancelled_route_id: RouteId,
    pub outcomes: Vec<BookingOutcome>,
}

impl ReassignmentReport {
    pub fn reassigned(&self) -> impl Iterator<Item = &BookingOutcome> {
        self.outcomes.iter().filter(|o| matches!(o.resolution, Resolution::Reassigned { .. }))
    }

    pub fn no_alternative(&self) -> impl Iterator<Item = &BookingOutcome> {
        self.outcomes.iter().filter(|o| matches!(o.resolution, Resolution::NoAlternative { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &BookingOutcome> {
        self.outcomes.iter().filter(|o| matches!(o.resolution, Resolution::Failed { .. }))
    }

    pub fn refunded(&self) -> impl Iterator<Item = &BookingOutcome> {
        self.outcomes.iter().filter(|o| {
            matches!(o.resolution, Resolution::NoAlternative { refund_initiated: true, .. })
        })
    }

    /// Seats moved onto replacement routes
    pub fn seats_migrated(&self) -> u32 {
        self.reassigned().map(|o| o.seats).sum()
    }
}

/// Intermediate result of the saga before it is paired with its log
enum SagaResult {
    Reassigned { new_booking_id: BookingId, new_route_id: RouteId, match_score: f64 },
    NoAlternative { refund_initiated: bool, reason: NoAlternativeReason },
}

pub struct ReassignmentCoordinator {
    config: ReassignmentConfig,
    matcher: RouteMatcher,
    directory: Arc<dyn RideDirectory>,
    ledger: Arc<dyn BookingLedger>,
    payments: Arc<dyn PaymentGateway>,
    events: Option<EventSender>,
    metrics: Option<Arc<Metrics>>,
}

impl ReassignmentCoordinator {
    pub fn new(
        config: ReassignmentConfig,
        matching: MatchingConfig,
        directory: Arc<dyn RideDirectory>,
        ledger: Arc<dyn BookingLedger>,
        payments: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            config,
            matcher: RouteMatcher::new(matching),
            directory,
            ledger,
            payments,
            events: None,
            metrics: None,
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.matcher = RouteMatcher::with_metrics(self.matcher.config().clone(), metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    /// Migrate every booking of a cancelled route. Exactly one outcome per booking.
    pub async fn find_alternative_rides(
        &self,
        cancelled: &CandidateRoute,
        bookings: &[Booking],
    ) -> ReassignmentReport {
        self.find_alternative_rides_at(cancelled, bookings, Utc::now()).await
    }

    pub async fn find_alternative_rides_at(
        &self,
        cancelled: &CandidateRoute,
        bookings: &[Booking],
        now: DateTime<Utc>,
    ) -> ReassignmentReport {
        let window = SearchWindow::around_departure(
            cancelled.scheduled_departure,
            now,
            self.config.window_before(),
            self.config.window_after(),
        );

        let pool = match self.directory.active_routes(&window).await {
            Ok(routes) => self.eligible_pool(cancelled, routes, &window),
            Err(e) => {
                let error = format!("{e:#}");
                error!(route_id = %cancelled.id, error = %error, "reassignment_pool_unavailable");
                let outcomes = bookings
                    .iter()
                    .map(|b| {
                        self.record_failure(b, &error);
                        BookingOutcome {
                            booking_id: b.id.clone(),
                            passenger_id: b.passenger.id.clone(),
                            seats: b.seats,
                            resolution: Resolution::Failed { error: error.clone() },
                            saga: SagaLog::new(),
                        }
                    })
                    .collect();
                return ReassignmentReport { cancelled_route_id: cancelled.id.clone(), outcomes };
            }
        };

        info!(
            route_id = %cancelled.id,
            bookings = %bookings.len(),
            pool = %pool.len(),
            window_from = %window.from,
            window_until = %window.until,
            "reassignment_started"
        );

        let mut outcomes = Vec::with_capacity(bookings.len());
        for booking in bookings {
            outcomes.push(self.reassign_booking(cancelled, booking, &pool, now).await);
        }

        let report = ReassignmentReport { cancelled_route_id: cancelled.id.clone(), outcomes };
        info!(
            route_id = %cancelled.id,
            reassigned = %report.reassigned().count(),
            no_alternative = %report.no_alternative().count(),
            failed = %report.failed().count(),
            seats_migrated = %report.seats_migrated(),
            "reassignment_completed"
        );
        report
    }

    /// Drop the cancelled route, the same driver's other routes (if configured)
    /// and anything not open for booking
    fn eligible_pool(
        &self,
        cancelled: &CandidateRoute,
        routes: Vec<CandidateRoute>,
        window: &SearchWindow,
    ) -> Vec<CandidateRoute> {
        routes
            .into_iter()
            .filter(|r| r.id != cancelled.id)
            .filter(|r| !(self.config.exclude_same_driver && r.owner_id == cancelled.owner_id))
            .filter(|r| r.status == RouteStatus::Active)
            .filter(|r| window.contains(r.scheduled_departure))
            .collect()
    }

    async fn reassign_booking(
        &self,
        cancelled: &CandidateRoute,
        booking: &Booking,
        pool: &[CandidateRoute],
        now: DateTime<Utc>,
    ) -> BookingOutcome {
        let mut saga = SagaLog::new();
        let resolution = match self.run_saga(cancelled, booking, pool, now, &mut saga).await {
            Ok(SagaResult::Reassigned { new_booking_id, new_route_id, match_score }) => {
                info!(
                    booking_id = %booking.id,
                    new_booking_id = %new_booking_id,
                    new_route_id = %new_route_id,
                    match_score = %match_score,
                    seats = %booking.seats,
                    "booking_reassigned"
                );
                if let Some(ref metrics) = self.metrics {
                    metrics.record_reassigned(booking.seats);
                }
                Resolution::Reassigned { new_booking_id, new_route_id, match_score }
            }
            Ok(SagaResult::NoAlternative { refund_initiated, reason }) => {
                info!(
                    booking_id = %booking.id,
                    reason = ?reason,
                    refund_initiated = %refund_initiated,
                    "booking_no_alternative"
                );
                if let Some(ref metrics) = self.metrics {
                    metrics.record_no_alternative(refund_initiated);
                }
                Resolution::NoAlternative { refund_initiated, reason }
            }
            Err(e) => {
                let error = format!("{e:#}");
                self.record_failure(booking, &error);
                if !saga.is_consistent() {
                    error!(booking_id = %booking.id, steps = ?saga.steps(), "reassignment_saga_inconsistent");
                }
                Resolution::Failed { error }
            }
        };

        BookingOutcome {
            booking_id: booking.id.clone(),
            passenger_id: booking.passenger.id.clone(),
            seats: booking.seats,
            resolution,
            saga,
        }
    }

    fn record_failure(&self, booking: &Booking, error: &str) {
        error!(booking_id = %booking.id, error = %error, "booking_reassignment_failed");
        if let Some(ref metrics) = self.metrics {
            metrics.record_reassignment_error();
        }
    }

    async fn run_saga(
        &self,
        cancelled: &CandidateRoute,
        booking: &Booking,
        pool: &[CandidateRoute],
        now: DateTime<Utc>,
        saga: &mut SagaLog,
    ) -> anyhow::Result<SagaResult> {
        // Malformed bookings fail before anything is written
        let trip = TripRequest::new(booking.pickup, booking.dropoff)
            .context("booking has an invalid pickup or dropoff")?;
        anyhow::ensure!(booking.seats > 0, "booking {} holds no seats", booking.id);

        let mut record = booking.reassignment_record();
        record.attempts += 1;
        self.ledger
            .mark_pending_reassignment(&booking.id, record.clone())
            .await
            .context("failed to suspend booking")?;
        saga.complete(SagaStep::Suspended);

        if record.hops() >= self.config.max_hops {
            warn!(booking_id = %booking.id, hops = %record.hops(), "reassignment_max_hops");
            return self.exhaust(cancelled, booking, NoAlternativeReason::MaxHopsReached, saga).await;
        }

        let candidates =
            RankedCandidates::rank(&self.matcher, &trip, pool, booking.seats, self.config.min_score);
        if candidates.is_empty() {
            return self.exhaust(cancelled, booking, NoAlternativeReason::NoCandidates, saga).await;
        }

        let mut chosen = None;
        for candidate in candidates {
            match self.try_candidate(&candidate, booking).await {
                Ok(()) => {
                    chosen = Some(candidate);
                    break;
                }
                Err(rejection) => {
                    debug!(
                        booking_id = %booking.id,
                        route_id = %candidate.route.id,
                        score = %candidate.score(),
                        rejection = %rejection,
                        "candidate_rejected"
                    );
                }
            }
        }
        let Some(candidate) = chosen else {
            return self
                .exhaust(cancelled, booking, NoAlternativeReason::AllCandidatesRejected, saga)
                .await;
        };
        saga.complete(SagaStep::SeatsReserved);

        let route = candidate.route;
        let match_score = candidate.score();
        record.push_hop(ReassignmentHop {
            from_route: cancelled.id.clone(),
            to_route: route.id.clone(),
            timestamp: now,
            match_score,
        });
        let replacement = booking.replacement(route.id.clone(), record);
        let new_booking_id = replacement.id.clone();

        if let Err(e) = self.ledger.create_booking(replacement).await {
            match self.directory.release_seats(&route.id, booking.seats).await {
                Ok(()) => saga.complete(SagaStep::SeatsReleased),
                Err(release_err) => error!(
                    route_id = %route.id,
                    seats = %booking.seats,
                    error = %release_err,
                    "seat_release_failed"
                ),
            }
            return Err(e.context("failed to create replacement booking"));
        }
        saga.complete(SagaStep::ReplacementCreated);

        self.ledger
            .cancel(
                &booking.id,
                CancellationReason::Reassigned {
                    new_booking_id: new_booking_id.clone(),
                    new_route_id: route.id.clone(),
                },
            )
            .await
            .context("failed to cancel original booking")?;
        saga.complete(SagaStep::OriginalCancelled);

        self.notify_reassigned(cancelled, booking, route, &new_booking_id, match_score);
        saga.complete(SagaStep::Notified);

        Ok(SagaResult::Reassigned { new_booking_id, new_route_id: route.id.clone(), match_score })
    }

    /// Passenger constraints first, then the atomic seat reservation
    async fn try_candidate(
        &self,
        candidate: &RankedCandidate<'_>,
        booking: &Booking,
    ) -> Result<(), CandidateRejection> {
        let constraints = &candidate.route.constraints;
        if !constraints.gender_policy.admits(booking.passenger.gender) {
            return Err(CandidateRejection::GenderPolicy);
        }
        if constraints.verified_only && !booking.passenger.verified {
            return Err(CandidateRejection::VerifiedOnly);
        }
        match self.directory.reserve_seats(&candidate.route.id, booking.seats).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(CandidateRejection::SeatsUnavailable),
            Err(e) => Err(CandidateRejection::Directory(format!("{e:#}"))),
        }
    }

    /// No replacement: cancel, refund captured payments, tell the passenger
    async fn exhaust(
        &self,
        cancelled: &CandidateRoute,
        booking: &Booking,
        reason: NoAlternativeReason,
        saga: &mut SagaLog,
    ) -> anyhow::Result<SagaResult> {
        self.ledger
            .cancel(&booking.id, CancellationReason::NoAlternative)
            .await
            .context("failed to cancel booking")?;
        saga.complete(SagaStep::OriginalCancelled);

        let mut refund_initiated = false;
        if let Some(amount_cents) = booking.payment.refundable_cents() {
            self.payments
                .initiate_refund(&booking.id, amount_cents)
                .await
                .context("failed to initiate refund")?;
            saga.complete(SagaStep::RefundInitiated);
            refund_initiated = true;
        }

        if let Some(ref events) = self.events {
            events.send(NotificationEvent::ReassignmentNoAlternative(NoAlternativePayload {
                service: None,
                ts: epoch_ms(),
                passenger_id: booking.passenger.id.clone(),
                booking_id: booking.id.clone(),
                cancelled_route_id: cancelled.id.clone(),
                refund_initiated,
                reason: CancellationReason::NoAlternative,
            }));
        }
        saga.complete(SagaStep::Notified);

        Ok(SagaResult::NoAlternative { refund_initiated, reason })
    }

    fn notify_reassigned(
        &self,
        cancelled: &CandidateRoute,
        booking: &Booking,
        route: &CandidateRoute,
        new_booking_id: &BookingId,
        match_score: f64,
    ) {
        let Some(ref events) = self.events else {
            return;
        };
        let recipients = [
            (Audience::Passenger, booking.passenger.id.clone()),
            (Audience::Driver, route.owner_id.clone()),
        ];
        for (audience, recipient) in recipients {
            events.send(NotificationEvent::ReassignmentSuccess(ReassignmentSuccessPayload {
                service: None,
                ts: epoch_ms(),
                audience,
                recipient,
                passenger_id: booking.passenger.id.clone(),
                old_booking_id: booking.id.clone(),
                new_booking_id: new_booking_id.clone(),
                cancelled_route_id: cancelled.id.clone(),
                new_route_id: route.id.clone(),
                seats: booking.seats,
                match_score,
            }));
        }
    }
}
