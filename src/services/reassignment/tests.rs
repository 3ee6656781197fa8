//! Tests for the ReassignmentCoordinator

use super::*;
use crate::domain::booking::{BookingStatus, PassengerProfile, PaymentState, ReassignmentRecord};
use crate::domain::geo::Point;
use crate::domain::types::{Gender, GenderPolicy, RouteConstraints};
use crate::io::directory::InMemoryRideDirectory;
use crate::io::events::create_event_channel;
use crate::io::ledger::InMemoryBookingLedger;
use crate::io::payments::RecordingPayments;
use anyhow::bail;
use async_trait::async_trait;
use chrono::{Duration, TimeZone};
use tokio::sync::mpsc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap()
}

fn now() -> DateTime<Utc> {
    t0() - Duration::hours(6)
}

/// North-bound route along `lon`, two degrees long
fn route(id: &str, owner: &str, lon: f64, seats: u32, departs_in_hours: i64) -> CandidateRoute {
    CandidateRoute {
        id: RouteId::from(id),
        owner_id: UserId::from(owner),
        polyline: vec![Point::new(lon, 0.0), Point::new(lon, 1.0), Point::new(lon, 2.0)],
        total_distance_km: 222.4,
        total_duration_min: 170.0,
        available_capacity: seats,
        scheduled_departure: t0() + Duration::hours(departs_in_hours),
        status: RouteStatus::Active,
        constraints: RouteConstraints::default(),
    }
}

fn cancelled_route() -> CandidateRoute {
    let mut r = route("cancelled", "driver-a", 0.0, 0, 0);
    r.status = RouteStatus::Cancelled;
    r
}

fn booking(id: &str, seats: u32, payment: PaymentState) -> Booking {
    Booking {
        id: BookingId::from(id),
        route_id: RouteId::from("cancelled"),
        passenger: PassengerProfile {
            id: UserId::from(format!("p-{id}").as_str()),
            gender: Gender::Male,
            verified: false,
        },
        pickup: Point::new(0.0, 0.2),
        dropoff: Point::new(0.0, 1.8),
        seats,
        status: BookingStatus::Confirmed,
        payment,
        cancellation: None,
        reassignment: None,
    }
}

fn captured() -> PaymentState {
    PaymentState::Captured { amount_cents: 2500 }
}

struct TestCoordinator {
    coordinator: ReassignmentCoordinator,
    directory: Arc<InMemoryRideDirectory>,
    ledger: Arc<InMemoryBookingLedger>,
    payments: Arc<RecordingPayments>,
    events_rx: mpsc::Receiver<NotificationEvent>,
    metrics: Arc<Metrics>,
}

impl TestCoordinator {
    async fn run(&self, bookings: &[Booking]) -> ReassignmentReport {
        self.coordinator.find_alternative_rides_at(&cancelled_route(), bookings, now()).await
    }

    fn drain(&mut self) -> Vec<NotificationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn stored(&self, id: &str) -> Booking {
        self.ledger.all().into_iter().find(|b| b.id.0 == id).unwrap()
    }

    fn bookings_on(&self, route_id: &str) -> Vec<Booking> {
        self.ledger.all().into_iter().filter(|b| b.route_id.0 == route_id).collect()
    }
}

fn create_test_coordinator_with(
    config: ReassignmentConfig,
    routes: Vec<CandidateRoute>,
    bookings: &[Booking],
) -> TestCoordinator {
    let metrics = Arc::new(Metrics::new());
    let directory = Arc::new(InMemoryRideDirectory::from_routes(routes));
    let ledger = Arc::new(InMemoryBookingLedger::from_bookings(bookings.to_vec()));
    let payments = Arc::new(RecordingPayments::new());
    let (events, events_rx) = create_event_channel(64, "test".to_string());

    let coordinator = ReassignmentCoordinator::new(
        config,
        MatchingConfig::default(),
        directory.clone(),
        ledger.clone(),
        payments.clone(),
    )
    .with_events(events)
    .with_metrics(metrics.clone());

    TestCoordinator { coordinator, directory, ledger, payments, events_rx, metrics }
}

fn create_test_coordinator(routes: Vec<CandidateRoute>, bookings: &[Booking]) -> TestCoordinator {
    create_test_coordinator_with(ReassignmentConfig::default(), routes, bookings)
}

#[tokio::test]
async fn test_one_candidate_with_room_for_one_booking() {
    let bookings = vec![booking("b1", 2, captured()), booking("b2", 2, captured())];
    let mut t = create_test_coordinator(vec![route("alt", "driver-b", 0.0, 2, 2)], &bookings);

    let report = t.run(&bookings).await;

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.reassigned().count(), 1);
    assert_eq!(report.no_alternative().count(), 1);
    assert_eq!(report.seats_migrated(), 2);

    let first = &report.outcomes[0];
    assert!(matches!(
        &first.resolution,
        Resolution::Reassigned { new_route_id, .. } if new_route_id.0 == "alt"
    ));
    assert_eq!(
        report.outcomes[1].resolution,
        Resolution::NoAlternative {
            refund_initiated: true,
            reason: NoAlternativeReason::AllCandidatesRejected
        }
    );

    assert_eq!(t.directory.available_seats(&RouteId::from("alt")), Some(0));
    let refunds = t.payments.refunds();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].booking_id, BookingId::from("b2"));
    assert_eq!(refunds[0].amount_cents, 2500);

    assert_eq!(t.stored("b2").status, BookingStatus::Cancelled);
    assert_eq!(t.stored("b2").cancellation, Some(CancellationReason::NoAlternative));
    assert_eq!(t.metrics.seats_migrated(), 2);

    let events = t.drain();
    let names: Vec<&str> = events.iter().map(|e| e.name()).collect();
    assert_eq!(
        names,
        vec!["reassignment_success", "reassignment_success", "reassignment_no_alternative"]
    );
}

#[tokio::test]
async fn test_replacement_is_pending_with_chain() {
    let bookings = vec![booking("b1", 1, captured())];
    let t = create_test_coordinator(vec![route("alt", "driver-b", 0.0, 3, 2)], &bookings);

    let report = t.run(&bookings).await;
    let Resolution::Reassigned { new_booking_id, match_score, .. } = &report.outcomes[0].resolution
    else {
        panic!("expected reassignment, got {:?}", report.outcomes[0].resolution);
    };

    let original = t.stored("b1");
    assert_eq!(original.status, BookingStatus::Cancelled);
    assert_eq!(
        original.cancellation,
        Some(CancellationReason::Reassigned {
            new_booking_id: new_booking_id.clone(),
            new_route_id: RouteId::from("alt"),
        })
    );

    let replacements = t.bookings_on("alt");
    assert_eq!(replacements.len(), 1);
    let replacement = &replacements[0];
    assert_eq!(&replacement.id, new_booking_id);
    assert_eq!(replacement.status, BookingStatus::Pending);
    assert_eq!(replacement.payment, captured());

    let record = replacement.reassignment.as_ref().unwrap();
    assert_eq!(record.booking_id, BookingId::from("b1"));
    assert_eq!(record.original_route_id, RouteId::from("cancelled"));
    assert_eq!(record.attempts, 1);
    assert_eq!(record.hops(), 1);
    assert_eq!(record.chain[0].from_route, RouteId::from("cancelled"));
    assert_eq!(record.chain[0].to_route, RouteId::from("alt"));
    assert_eq!(record.chain[0].timestamp, now());
    assert_eq!(record.chain[0].match_score, *match_score);

    assert_eq!(t.directory.available_seats(&RouteId::from("alt")), Some(2));
    assert!(t.payments.refunds().is_empty());
}

#[tokio::test]
async fn test_success_notifies_passenger_and_new_driver() {
    let bookings = vec![booking("b1", 1, PaymentState::Unpaid)];
    let mut t = create_test_coordinator(vec![route("alt", "driver-b", 0.0, 3, 2)], &bookings);
    t.run(&bookings).await;

    let recipients: Vec<(Audience, String)> = t
        .drain()
        .into_iter()
        .map(|e| match e {
            NotificationEvent::ReassignmentSuccess(p) => {
                assert_eq!(p.old_booking_id, BookingId::from("b1"));
                assert_eq!(p.service.as_deref(), Some("test"));
                (p.audience, p.recipient.0)
            }
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(
        recipients,
        vec![
            (Audience::Passenger, "p-b1".to_string()),
            (Audience::Driver, "driver-b".to_string())
        ]
    );
}

#[tokio::test]
async fn test_refund_only_when_captured() {
    let bookings = vec![
        booking("authorized", 1, PaymentState::Authorized),
        booking("unpaid", 1, PaymentState::Unpaid),
        booking("paid", 1, captured()),
    ];
    let t = create_test_coordinator(vec![], &bookings);

    let report = t.run(&bookings).await;
    assert_eq!(report.no_alternative().count(), 3);
    assert_eq!(report.refunded().count(), 1);
    assert_eq!(report.refunded().next().unwrap().booking_id, BookingId::from("paid"));
    assert!(report.outcomes.iter().all(|o| matches!(
        o.resolution,
        Resolution::NoAlternative { reason: NoAlternativeReason::NoCandidates, .. }
    )));
    assert_eq!(t.payments.refunds().len(), 1);
}

#[tokio::test]
async fn test_gender_policy_falls_through_to_next_candidate() {
    let mut female_only = route("female-only", "driver-b", 0.0, 4, 1);
    female_only.constraints.gender_policy = GenderPolicy::FemaleOnly;
    let fallback = route("fallback", "driver-c", 0.03, 4, 1);

    let bookings = vec![booking("b1", 1, captured())];
    let t = create_test_coordinator(vec![female_only, fallback], &bookings);

    let report = t.run(&bookings).await;
    assert!(matches!(
        &report.outcomes[0].resolution,
        Resolution::Reassigned { new_route_id, .. } if new_route_id.0 == "fallback"
    ));
    assert_eq!(t.directory.available_seats(&RouteId::from("female-only")), Some(4));
    assert_eq!(t.directory.available_seats(&RouteId::from("fallback")), Some(3));
}

#[tokio::test]
async fn test_verified_only_rejects_unverified_passenger() {
    let mut strict = route("strict", "driver-b", 0.0, 4, 1);
    strict.constraints.verified_only = true;

    let mut verified = booking("verified", 1, captured());
    verified.passenger.verified = true;
    let bookings = vec![booking("unverified", 1, captured()), verified];
    let t = create_test_coordinator(vec![strict], &bookings);

    let report = t.run(&bookings).await;
    assert_eq!(
        report.outcomes[0].resolution,
        Resolution::NoAlternative {
            refund_initiated: true,
            reason: NoAlternativeReason::AllCandidatesRejected
        }
    );
    assert!(matches!(report.outcomes[1].resolution, Resolution::Reassigned { .. }));
}

#[tokio::test]
async fn test_same_driver_routes_excluded_by_default() {
    let bookings = vec![booking("b1", 1, captured())];
    let routes = vec![route("own-other", "driver-a", 0.0, 4, 3)];

    let t = create_test_coordinator(routes.clone(), &bookings);
    let report = t.run(&bookings).await;
    assert!(matches!(
        report.outcomes[0].resolution,
        Resolution::NoAlternative { reason: NoAlternativeReason::NoCandidates, .. }
    ));

    let config = ReassignmentConfig { exclude_same_driver: false, ..Default::default() };
    let t = create_test_coordinator_with(config, routes, &bookings);
    let report = t.run(&bookings).await;
    assert!(matches!(report.outcomes[0].resolution, Resolution::Reassigned { .. }));
}

#[tokio::test]
async fn test_candidates_outside_window_or_inactive_ignored() {
    let mut started = route("started", "driver-c", 0.0, 4, 1);
    started.status = RouteStatus::InProgress;
    let routes = vec![route("too-late", "driver-b", 0.0, 4, 72), started];

    let bookings = vec![booking("b1", 1, PaymentState::Unpaid)];
    let t = create_test_coordinator(routes, &bookings);

    let report = t.run(&bookings).await;
    assert_eq!(
        report.outcomes[0].resolution,
        Resolution::NoAlternative { refund_initiated: false, reason: NoAlternativeReason::NoCandidates }
    );
}

#[tokio::test]
async fn test_max_hops_stops_chain() {
    let mut b = booking("b1", 1, captured());
    let mut record = ReassignmentRecord::new(BookingId::from("b0"), RouteId::from("r0"));
    for i in 0..3 {
        record.push_hop(ReassignmentHop {
            from_route: RouteId(format!("r{i}")),
            to_route: RouteId(format!("r{}", i + 1)),
            timestamp: now() - Duration::days(3 - i),
            match_score: 80.0,
        });
    }
    b.reassignment = Some(record);
    let bookings = vec![b];
    let t = create_test_coordinator(vec![route("alt", "driver-b", 0.0, 4, 1)], &bookings);

    let report = t.run(&bookings).await;
    assert_eq!(
        report.outcomes[0].resolution,
        Resolution::NoAlternative {
            refund_initiated: true,
            reason: NoAlternativeReason::MaxHopsReached
        }
    );
    assert_eq!(t.directory.available_seats(&RouteId::from("alt")), Some(4));
    // The attempt is kept on the cancelled booking
    let stored = t.stored("b1").reassignment.unwrap();
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.hops(), 3);
}

#[tokio::test]
async fn test_failed_attempt_is_counted() {
    let bookings = vec![booking("b1", 1, captured())];
    let t = create_test_coordinator(vec![], &bookings);

    let report = t.run(&bookings).await;
    assert!(matches!(
        report.outcomes[0].resolution,
        Resolution::NoAlternative { reason: NoAlternativeReason::NoCandidates, .. }
    ));
    let record = t.stored("b1").reassignment.unwrap();
    assert_eq!(record.booking_id, BookingId::from("b1"));
    assert_eq!(record.attempts, 1);
    assert_eq!(record.hops(), 0);
}

#[tokio::test]
async fn test_malformed_booking_fails_untouched() {
    let mut bad_leg = booking("bad-leg", 1, captured());
    bad_leg.pickup = Point::new(0.0, 95.0);
    let no_seats = booking("no-seats", 0, captured());
    let bookings = vec![bad_leg, no_seats, booking("ok", 1, captured())];
    let t = create_test_coordinator(vec![route("alt", "driver-b", 0.0, 4, 1)], &bookings);

    let report = t.run(&bookings).await;

    for outcome in &report.outcomes[..2] {
        assert!(matches!(outcome.resolution, Resolution::Failed { .. }));
        assert!(outcome.saga.steps().is_empty());
        assert!(outcome.saga.is_consistent());
    }
    let Resolution::Failed { error } = &report.outcomes[0].resolution else { unreachable!() };
    assert!(error.contains("invalid pickup or dropoff"));

    for id in ["bad-leg", "no-seats"] {
        let stored = t.stored(id);
        assert_eq!(stored.status, BookingStatus::Confirmed);
        assert_eq!(stored.reassignment, None);
    }
    assert!(matches!(report.outcomes[2].resolution, Resolution::Reassigned { .. }));
    assert!(t.payments.refunds().is_empty());
    assert_eq!(t.metrics.report(0).reassignment_errors_total, 2);
}

#[tokio::test]
async fn test_existing_chain_is_extended() {
    let mut b = booking("b1", 1, captured());
    let mut record = ReassignmentRecord::new(BookingId::from("b0"), RouteId::from("first"));
    record.attempts = 1;
    record.push_hop(ReassignmentHop {
        from_route: RouteId::from("first"),
        to_route: RouteId::from("cancelled"),
        timestamp: now() - Duration::days(1),
        match_score: 90.0,
    });
    b.reassignment = Some(record);
    let bookings = vec![b];
    let t = create_test_coordinator(vec![route("alt", "driver-b", 0.0, 4, 1)], &bookings);

    t.run(&bookings).await;
    let replacement = t.bookings_on("alt").pop().unwrap();
    let record = replacement.reassignment.unwrap();
    assert_eq!(record.booking_id, BookingId::from("b0"));
    assert_eq!(record.attempts, 2);
    assert_eq!(record.hops(), 2);
    assert_eq!(record.chain[1].from_route, RouteId::from("cancelled"));
    assert_eq!(record.chain[1].to_route, RouteId::from("alt"));
}

#[tokio::test]
async fn test_unreassignable_booking_fails_without_stopping_batch() {
    let mut done = booking("done", 1, captured());
    done.status = BookingStatus::Completed;
    let bookings = vec![done, booking("live", 1, captured())];
    let t = create_test_coordinator(vec![route("alt", "driver-b", 0.0, 4, 1)], &bookings);

    let report = t.run(&bookings).await;
    assert_eq!(report.outcomes.len(), 2);
    let Resolution::Failed { error } = &report.outcomes[0].resolution else {
        panic!("expected failure, got {:?}", report.outcomes[0].resolution);
    };
    assert!(error.contains("cannot be reassigned"));
    assert!(report.outcomes[0].saga.steps().is_empty());
    assert!(matches!(report.outcomes[1].resolution, Resolution::Reassigned { .. }));
    assert_eq!(t.stored("done").status, BookingStatus::Completed);
}

#[tokio::test]
async fn test_outcome_per_booking_and_seats_balance() {
    let bookings = vec![
        booking("b1", 2, captured()),
        booking("b2", 1, PaymentState::Unpaid),
        booking("b3", 3, captured()),
        booking("b4", 1, PaymentState::Authorized),
        booking("b5", 2, captured()),
    ];
    let routes = vec![
        route("x", "driver-b", 0.0, 3, 1),
        route("y", "driver-c", 0.02, 2, 2),
        route("z", "driver-d", 0.04, 1, 5),
    ];
    let capacity_before: u32 = routes.iter().map(|r| r.available_capacity).sum();
    let ids: Vec<RouteId> = routes.iter().map(|r| r.id.clone()).collect();
    let t = create_test_coordinator(routes, &bookings);

    let report = t.run(&bookings).await;

    assert_eq!(report.outcomes.len(), bookings.len());
    assert_eq!(
        report.reassigned().count() + report.no_alternative().count() + report.failed().count(),
        bookings.len()
    );
    let capacity_after: u32 =
        ids.iter().map(|id| t.directory.available_seats(id).unwrap()).sum();
    assert_eq!(capacity_before - capacity_after, report.seats_migrated());
    assert_eq!(report.seats_migrated(), 4);
    assert!(report.outcomes.iter().all(|o| o.saga.is_consistent()));
}

#[tokio::test]
async fn test_saga_steps_recorded() {
    let bookings = vec![booking("b1", 1, captured()), booking("b2", 5, captured())];
    let t = create_test_coordinator(vec![route("alt", "driver-b", 0.0, 1, 1)], &bookings);

    let report = t.run(&bookings).await;
    use SagaStep::*;
    assert_eq!(
        report.outcomes[0].saga.steps(),
        &[Suspended, SeatsReserved, ReplacementCreated, OriginalCancelled, Notified]
    );
    assert_eq!(
        report.outcomes[1].saga.steps(),
        &[Suspended, OriginalCancelled, RefundInitiated, Notified]
    );
}

struct UnavailableDirectory;

#[async_trait]
impl RideDirectory for UnavailableDirectory {
    async fn active_routes(&self, _: &SearchWindow) -> anyhow::Result<Vec<CandidateRoute>> {
        bail!("directory offline")
    }

    async fn reserve_seats(&self, _: &RouteId, _: u32) -> anyhow::Result<bool> {
        bail!("directory offline")
    }

    async fn release_seats(&self, _: &RouteId, _: u32) -> anyhow::Result<()> {
        bail!("directory offline")
    }
}

#[tokio::test]
async fn test_directory_outage_fails_every_booking() {
    let bookings = vec![booking("b1", 1, captured()), booking("b2", 1, captured())];
    let ledger = Arc::new(InMemoryBookingLedger::from_bookings(bookings.clone()));
    let coordinator = ReassignmentCoordinator::new(
        ReassignmentConfig::default(),
        MatchingConfig::default(),
        Arc::new(UnavailableDirectory),
        ledger.clone(),
        Arc::new(RecordingPayments::new()),
    );

    let report = coordinator.find_alternative_rides_at(&cancelled_route(), &bookings, now()).await;
    assert_eq!(report.failed().count(), 2);
    // Nothing was touched
    assert!(ledger.all().iter().all(|b| b.status == BookingStatus::Confirmed));
}

/// Ledger whose writes fail at one chosen step
struct FailingLedger {
    inner: InMemoryBookingLedger,
    fail_create: bool,
    fail_reassigned_cancel: bool,
}

impl FailingLedger {
    fn new(bookings: &[Booking]) -> Self {
        Self {
            inner: InMemoryBookingLedger::from_bookings(bookings.to_vec()),
            fail_create: false,
            fail_reassigned_cancel: false,
        }
    }
}

#[async_trait]
impl BookingLedger for FailingLedger {
    async fn mark_pending_reassignment(
        &self,
        id: &BookingId,
        record: ReassignmentRecord,
    ) -> anyhow::Result<()> {
        self.inner.mark_pending_reassignment(id, record).await
    }

    async fn cancel(&self, id: &BookingId, reason: CancellationReason) -> anyhow::Result<()> {
        if self.fail_reassigned_cancel && matches!(reason, CancellationReason::Reassigned { .. }) {
            bail!("ledger write failed");
        }
        self.inner.cancel(id, reason).await
    }

    async fn create_booking(&self, booking: Booking) -> anyhow::Result<()> {
        if self.fail_create {
            bail!("ledger write failed");
        }
        self.inner.create_booking(booking).await
    }

    async fn get(&self, id: &BookingId) -> anyhow::Result<Option<Booking>> {
        self.inner.get(id).await
    }
}

fn coordinator_with_ledger(
    directory: Arc<InMemoryRideDirectory>,
    ledger: Arc<FailingLedger>,
    payments: Arc<RecordingPayments>,
) -> ReassignmentCoordinator {
    ReassignmentCoordinator::new(
        ReassignmentConfig::default(),
        MatchingConfig::default(),
        directory,
        ledger,
        payments,
    )
}

#[tokio::test]
async fn test_replacement_write_failure_releases_seats() {
    let bookings = vec![booking("b1", 1, captured())];
    let directory =
        Arc::new(InMemoryRideDirectory::from_routes(vec![route("alt", "driver-b", 0.0, 3, 1)]));
    let mut ledger = FailingLedger::new(&bookings);
    ledger.fail_create = true;
    let ledger = Arc::new(ledger);
    let payments = Arc::new(RecordingPayments::new());
    let coordinator = coordinator_with_ledger(directory.clone(), ledger.clone(), payments.clone());

    let report = coordinator.find_alternative_rides_at(&cancelled_route(), &bookings, now()).await;

    let outcome = &report.outcomes[0];
    let Resolution::Failed { error } = &outcome.resolution else {
        panic!("expected failure, got {:?}", outcome.resolution);
    };
    assert!(error.contains("failed to create replacement booking"));
    use SagaStep::*;
    assert_eq!(outcome.saga.steps(), &[Suspended, SeatsReserved, SeatsReleased]);
    assert!(outcome.saga.is_consistent());
    assert_eq!(directory.available_seats(&RouteId::from("alt")), Some(3));
    assert_eq!(ledger.inner.len(), 1);
    assert!(payments.refunds().is_empty());
}

#[tokio::test]
async fn test_original_cancel_failure_flags_inconsistent_saga() {
    let bookings = vec![booking("b1", 1, captured())];
    let directory =
        Arc::new(InMemoryRideDirectory::from_routes(vec![route("alt", "driver-b", 0.0, 3, 1)]));
    let mut ledger = FailingLedger::new(&bookings);
    ledger.fail_reassigned_cancel = true;
    let ledger = Arc::new(ledger);
    let coordinator =
        coordinator_with_ledger(directory.clone(), ledger.clone(), Arc::new(RecordingPayments::new()));

    let report = coordinator.find_alternative_rides_at(&cancelled_route(), &bookings, now()).await;

    let outcome = &report.outcomes[0];
    let Resolution::Failed { error } = &outcome.resolution else {
        panic!("expected failure, got {:?}", outcome.resolution);
    };
    assert!(error.contains("failed to cancel original booking"));
    use SagaStep::*;
    assert_eq!(outcome.saga.steps(), &[Suspended, SeatsReserved, ReplacementCreated]);
    assert!(!outcome.saga.is_consistent());
    // The replacement exists next to the suspended original
    assert_eq!(ledger.inner.len(), 2);
    assert_eq!(directory.available_seats(&RouteId::from("alt")), Some(2));
}
