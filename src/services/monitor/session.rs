//! Per-ride live-tracking state

use super::{SafetyAlert, TrackedRide, TrackingError, TrackingSummary};
use crate::domain::geo::Polyline;
use crate::domain::tracking::{
    AlertType, DeviationRecord, DeviationSample, DeviationSeverity, DeviationState,
};
use crate::domain::types::{RideId, UserId};
use crate::infra::config::CorridorConfig;
use crate::services::corridor::{
    analyze_speed_patterns, check_corridor, detect_unusual_stops, deviation_status,
};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Alerts that passed the cooldown gate, plus how many did not
#[derive(Debug, Default)]
pub(crate) struct SampleOutcome {
    pub alerts: Vec<SafetyAlert>,
    pub suppressed: u32,
}

/// Owned by the monitor from `start_tracking` until `stop_tracking`
pub(crate) struct RideSession {
    pub(crate) ride_id: RideId,
    pub(crate) driver_id: UserId,
    pub(crate) passenger_ids: Vec<UserId>,
    polyline: Polyline,
    history: VecDeque<DeviationSample>,
    last_timestamp: Option<DateTime<Utc>>,
    off_route_since: Option<DateTime<Utc>>,
    active_deviation: Option<DeviationRecord>,
    closed_deviations: Vec<DeviationRecord>,
    /// Last emitted alert per type
    last_alert: FxHashMap<AlertType, DateTime<Utc>>,
    samples: u64,
    alerts_emitted: u64,
    alerts_suppressed: u64,
}

impl RideSession {
    pub(crate) fn new(ride: TrackedRide) -> Self {
        Self {
            ride_id: ride.ride_id,
            driver_id: ride.driver_id,
            passenger_ids: ride.passenger_ids,
            polyline: ride.polyline,
            history: VecDeque::new(),
            last_timestamp: None,
            off_route_since: None,
            active_deviation: None,
            closed_deviations: Vec::new(),
            last_alert: FxHashMap::default(),
            samples: 0,
            alerts_emitted: 0,
            alerts_suppressed: 0,
        }
    }

    pub(crate) fn active_deviation(&self) -> Option<&DeviationRecord> {
        self.active_deviation.as_ref()
    }

    pub(crate) fn ingest(
        &mut self,
        sample: DeviationSample,
        config: &CorridorConfig,
    ) -> Result<SampleOutcome, TrackingError> {
        if let Some(last) = self.last_timestamp {
            if sample.timestamp <= last {
                return Err(TrackingError::StaleSample {
                    ride_id: self.ride_id.clone(),
                    last,
                    received: sample.timestamp,
                });
            }
        }
        self.last_timestamp = Some(sample.timestamp);
        self.samples += 1;

        let mut outcome = SampleOutcome::default();
        let now = sample.timestamp;

        // Inaccurate fixes stay out of the history and every check
        let accurate = sample.accuracy_m.map_or(true, |a| a <= config.max_sample_accuracy_m);
        if !accurate {
            debug!(
                ride_id = %self.ride_id,
                accuracy_m = ?sample.accuracy_m,
                "sample_skipped_inaccurate"
            );
            return Ok(outcome);
        }

        self.history.push_back(sample);
        while self.history.len() > config.history_len.max(1) {
            self.history.pop_front();
        }

        if let Some(alert) = self.check_deviation(&sample, config) {
            self.gate(alert, now, config, &mut outcome);
        }

        let history = self.history.make_contiguous();
        let speed = analyze_speed_patterns(history, config);
        let stop = detect_unusual_stops(history, config);
        if let Some(speed) = speed {
            self.gate(SafetyAlert::Speed(speed), now, config, &mut outcome);
        }
        if let Some(stop) = stop {
            self.gate(SafetyAlert::Stop(stop), now, config, &mut outcome);
        }

        Ok(outcome)
    }

    /// Update the corridor state and return a deviation alert candidate
    fn check_deviation(
        &mut self,
        sample: &DeviationSample,
        config: &CorridorConfig,
    ) -> Option<SafetyAlert> {
        let check = check_corridor(sample.point, &self.polyline, config.width_km());
        let now = sample.timestamp;

        if check.within_corridor {
            self.off_route_since = None;
            if let Some(mut record) = self.active_deviation.take() {
                record.resolve(DeviationState::ReturnedToRoute, now);
                info!(
                    ride_id = %self.ride_id,
                    deviation_id = %record.id,
                    max_distance_km = %record.max_distance_km,
                    duration_secs = %record.duration_secs,
                    "deviation_resolved"
                );
                self.closed_deviations.push(record);
            }
            return None;
        }

        let since = *self.off_route_since.get_or_insert(now);
        let off_route_secs = (now - since).num_seconds().max(0) as u64;
        let status = deviation_status(&check, off_route_secs);

        match self.active_deviation {
            Some(ref mut record) => record.refresh(&status, now),
            None if status.severity.is_major() => {
                let record = DeviationRecord::open(self.ride_id.clone(), &status, now);
                warn!(
                    ride_id = %self.ride_id,
                    deviation_id = %record.id,
                    severity = %status.severity.as_str(),
                    distance_km = %status.distance_km,
                    "route_deviation_detected"
                );
                self.active_deviation = Some(record);
            }
            None => {}
        }

        if status.severity < DeviationSeverity::Medium {
            return None;
        }
        Some(SafetyAlert::Deviation {
            status,
            deviation_id: self.active_deviation.as_ref().map(|r| r.id.clone()),
        })
    }

    /// One alert per type per cooldown window
    fn gate(
        &mut self,
        alert: SafetyAlert,
        now: DateTime<Utc>,
        config: &CorridorConfig,
        outcome: &mut SampleOutcome,
    ) {
        let alert_type = alert.alert_type();
        if let Some(&last) = self.last_alert.get(&alert_type) {
            if now - last < config.alert_cooldown() {
                debug!(
                    ride_id = %self.ride_id,
                    alert_type = %alert_type.as_str(),
                    severity = %alert.severity().as_str(),
                    "alert_suppressed"
                );
                self.alerts_suppressed += 1;
                outcome.suppressed += 1;
                return;
            }
        }
        self.last_alert.insert(alert_type, now);
        self.alerts_emitted += 1;
        outcome.alerts.push(alert);
    }

    /// Close any active deviation and summarize the ride
    pub(crate) fn finish(&mut self, at: DateTime<Utc>) -> TrackingSummary {
        if let Some(mut record) = self.active_deviation.take() {
            record.resolve(DeviationState::Closed, at);
            self.closed_deviations.push(record);
        }
        self.off_route_since = None;
        self.last_alert.clear();
        TrackingSummary {
            ride_id: self.ride_id.clone(),
            samples: self.samples,
            alerts_emitted: self.alerts_emitted,
            alerts_suppressed: self.alerts_suppressed,
            deviations: std::mem::take(&mut self.closed_deviations),
        }
    }
}
