//! Live safety monitoring of in-progress rides
//!
//! The CorridorMonitor owns one session per tracked ride:
//! - Corridor checks against the ride's polyline, with deviation records
//! - Speed and unusual-stop analysis over a bounded sample history
//! - Per-type alert cooldowns, dropped with the session on `stop_tracking`
//! - Notification fan-out to passengers, driver and operations

mod session;

use crate::domain::geo::Polyline;
use crate::domain::tracking::{
    AlertType, DeviationRecord, DeviationSample, DeviationSeverity, DeviationStatus,
};
use crate::domain::types::{epoch_ms, RideId, UserId};
use crate::infra::config::CorridorConfig;
use crate::infra::metrics::Metrics;
use crate::io::events::{
    Audience, DeviationAlertPayload, EventSender, NotificationEvent, SafetyAlertPayload,
};
use crate::services::corridor::{SpeedAlert, StopAlert};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;
use session::RideSession;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// A ride to supervise
#[derive(Debug, Clone)]
pub struct TrackedRide {
    pub ride_id: RideId,
    pub driver_id: UserId,
    pub passenger_ids: Vec<UserId>,
    pub polyline: Polyline,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackingError {
    UnknownRide(RideId),
    /// Timestamp not after the previous accepted sample
    StaleSample {
        ride_id: RideId,
        last: chrono::DateTime<Utc>,
        received: chrono::DateTime<Utc>,
    },
}

impl fmt::Display for TrackingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingError::UnknownRide(id) => write!(f, "ride {id} is not being tracked"),
            TrackingError::StaleSample { ride_id, last, received } => write!(
                f,
                "stale sample for ride {ride_id}: {received} is not after {last}"
            ),
        }
    }
}

impl std::error::Error for TrackingError {}

/// An alert that passed its cooldown
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SafetyAlert {
    Deviation {
        status: DeviationStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        deviation_id: Option<String>,
    },
    Speed(SpeedAlert),
    Stop(StopAlert),
}

impl SafetyAlert {
    pub fn alert_type(&self) -> AlertType {
        match self {
            SafetyAlert::Deviation { .. } => AlertType::RouteDeviation,
            SafetyAlert::Speed(_) => AlertType::Speed,
            SafetyAlert::Stop(_) => AlertType::UnusualStop,
        }
    }

    pub fn severity(&self) -> DeviationSeverity {
        match self {
            SafetyAlert::Deviation { status, .. } => status.severity,
            SafetyAlert::Speed(a) => a.severity,
            SafetyAlert::Stop(a) => a.severity,
        }
    }
}

/// What happened over a ride's tracked lifetime
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingSummary {
    pub ride_id: RideId,
    pub samples: u64,
    pub alerts_emitted: u64,
    pub alerts_suppressed: u64,
    /// Every deviation record, resolved
    pub deviations: Vec<DeviationRecord>,
}

pub struct CorridorMonitor {
    config: CorridorConfig,
    sessions: RwLock<FxHashMap<RideId, Arc<Mutex<RideSession>>>>,
    events: Option<EventSender>,
    metrics: Option<Arc<Metrics>>,
}

impl CorridorMonitor {
    pub fn new(config: CorridorConfig) -> Self {
        Self { config, sessions: RwLock::new(FxHashMap::default()), events: None, metrics: None }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &CorridorConfig {
        &self.config
    }

    /// Begin supervising a ride. Replaces (and discards) an existing session for the same id.
    pub fn start_tracking(&self, ride: TrackedRide) {
        let ride_id = ride.ride_id.clone();
        info!(
            ride_id = %ride_id,
            driver_id = %ride.driver_id,
            passengers = %ride.passenger_ids.len(),
            route_km = %ride.polyline.length_km(),
            "tracking_started"
        );
        let session = Arc::new(Mutex::new(RideSession::new(ride)));
        if self.sessions.write().insert(ride_id.clone(), session).is_some() {
            warn!(ride_id = %ride_id, "tracking_session_replaced");
        }
    }

    /// Stop supervising a ride, closing any active deviation
    pub fn stop_tracking(&self, ride_id: &RideId) -> Option<TrackingSummary> {
        let session = self.sessions.write().remove(ride_id)?;
        let summary = session.lock().finish(Utc::now());
        info!(
            ride_id = %summary.ride_id,
            samples = %summary.samples,
            alerts = %summary.alerts_emitted,
            suppressed = %summary.alerts_suppressed,
            deviations = %summary.deviations.len(),
            "tracking_stopped"
        );
        Some(summary)
    }

    pub fn is_tracking(&self, ride_id: &RideId) -> bool {
        self.sessions.read().contains_key(ride_id)
    }

    pub fn active_rides(&self) -> usize {
        self.sessions.read().len()
    }

    /// Active deviation record for a ride, if it is currently off route
    pub fn active_deviation(&self, ride_id: &RideId) -> Option<DeviationRecord> {
        let session = self.sessions.read().get(ride_id)?.clone();
        let guard = session.lock();
        guard.active_deviation().cloned()
    }

    /// Feed one location sample; returns the alerts that were emitted
    pub fn record_sample(
        &self,
        ride_id: &RideId,
        sample: DeviationSample,
    ) -> Result<Vec<SafetyAlert>, TrackingError> {
        let Some(session) = self.sessions.read().get(ride_id).cloned() else {
            return Err(TrackingError::UnknownRide(ride_id.clone()));
        };
        let mut session = session.lock();

        let outcome = match session.ingest(sample, &self.config) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(ride_id = %ride_id, error = %e, "sample_rejected");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_stale_sample();
                }
                return Err(e);
            }
        };

        if let Some(ref metrics) = self.metrics {
            metrics.record_sample();
            for _ in 0..outcome.suppressed {
                metrics.record_alert_suppressed();
            }
            for alert in &outcome.alerts {
                metrics.record_alert(alert.severity());
            }
        }

        for alert in &outcome.alerts {
            self.notify(&session, alert);
        }
        Ok(outcome.alerts)
    }

    /// Fan an alert out to the audiences its type and severity call for
    fn notify(&self, session: &RideSession, alert: &SafetyAlert) {
        let Some(ref events) = self.events else {
            return;
        };
        let severity = alert.severity();
        let mut audiences: Vec<(Audience, Option<UserId>)> = Vec::new();

        match alert {
            SafetyAlert::Deviation { .. } | SafetyAlert::Speed(_) => {
                audiences.push((Audience::Driver, Some(session.driver_id.clone())));
                if severity.is_major() {
                    if matches!(alert, SafetyAlert::Deviation { .. }) {
                        audiences.extend(
                            session.passenger_ids.iter().map(|p| (Audience::Passenger, Some(p.clone()))),
                        );
                    }
                    audiences.push((Audience::Operations, None));
                }
            }
            SafetyAlert::Stop(_) => {
                audiences.push((Audience::Operations, None));
                audiences.push((Audience::Driver, Some(session.driver_id.clone())));
                if severity == DeviationSeverity::Critical {
                    audiences.extend(
                        session.passenger_ids.iter().map(|p| (Audience::Passenger, Some(p.clone()))),
                    );
                }
            }
        }

        for (audience, recipient) in audiences {
            let event = match alert {
                SafetyAlert::Deviation { status, deviation_id } => {
                    NotificationEvent::RouteDeviationAlert(DeviationAlertPayload {
                        service: None,
                        ts: epoch_ms(),
                        audience,
                        recipient,
                        ride_id: session.ride_id.clone(),
                        severity,
                        distance_km: status.distance_km,
                        duration_secs: status.duration_secs,
                        deviation_id: deviation_id.clone(),
                    })
                }
                SafetyAlert::Speed(a) => NotificationEvent::SpeedAlert(SafetyAlertPayload::new(
                    audience,
                    recipient,
                    session.ride_id.clone(),
                    AlertType::Speed,
                    severity,
                    a.message.clone(),
                )),
                SafetyAlert::Stop(a) => NotificationEvent::StopAlert(SafetyAlertPayload::new(
                    audience,
                    recipient,
                    session.ride_id.clone(),
                    AlertType::UnusualStop,
                    severity,
                    a.message.clone(),
                )),
            };
            events.send(event);
        }
    }
}
