//! Typed channel for outbound notification events
//!
//! Services hand events to the notification collaborator without blocking.
//! The channel is bounded; when it is full the event is dropped and counted.

use crate::domain::booking::CancellationReason;
use crate::domain::tracking::{AlertType, DeviationSeverity};
use crate::domain::types::{epoch_ms, BookingId, RideId, RouteId, UserId};
use crate::infra::metrics::Metrics;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

/// Who an event is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Passenger,
    Driver,
    Operations,
}

/// Events consumed by the notification collaborator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    ReassignmentSuccess(ReassignmentSuccessPayload),
    ReassignmentNoAlternative(NoAlternativePayload),
    RouteDeviationAlert(DeviationAlertPayload),
    SpeedAlert(SafetyAlertPayload),
    StopAlert(SafetyAlertPayload),
}

impl NotificationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NotificationEvent::ReassignmentSuccess(_) => "reassignment_success",
            NotificationEvent::ReassignmentNoAlternative(_) => "reassignment_no_alternative",
            NotificationEvent::RouteDeviationAlert(_) => "route_deviation_alert",
            NotificationEvent::SpeedAlert(_) => "speed_alert",
            NotificationEvent::StopAlert(_) => "stop_alert",
        }
    }

    pub fn audience(&self) -> Audience {
        match self {
            NotificationEvent::ReassignmentSuccess(p) => p.audience,
            NotificationEvent::ReassignmentNoAlternative(_) => Audience::Passenger,
            NotificationEvent::RouteDeviationAlert(p) => p.audience,
            NotificationEvent::SpeedAlert(p) | NotificationEvent::StopAlert(p) => p.audience,
        }
    }

    fn stamp(&mut self, service: &str) {
        let slot = match self {
            NotificationEvent::ReassignmentSuccess(p) => &mut p.service,
            NotificationEvent::ReassignmentNoAlternative(p) => &mut p.service,
            NotificationEvent::RouteDeviationAlert(p) => &mut p.service,
            NotificationEvent::SpeedAlert(p) | NotificationEvent::StopAlert(p) => &mut p.service,
        };
        *slot = Some(service.to_string());
    }
}

/// Passenger moved onto a replacement route (sent to the passenger and the new driver)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReassignmentSuccessPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Timestamp (epoch ms)
    pub ts: u64,
    pub audience: Audience,
    pub recipient: UserId,
    pub passenger_id: UserId,
    pub old_booking_id: BookingId,
    pub new_booking_id: BookingId,
    pub cancelled_route_id: RouteId,
    pub new_route_id: RouteId,
    pub seats: u32,
    pub match_score: f64,
}

/// Driver cancelled and no substitute was found
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoAlternativePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub ts: u64,
    pub passenger_id: UserId,
    pub booking_id: BookingId,
    pub cancelled_route_id: RouteId,
    pub refund_initiated: bool,
    pub reason: CancellationReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviationAlertPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub ts: u64,
    pub audience: Audience,
    /// Recipient user, absent for the operations desk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<UserId>,
    pub ride_id: RideId,
    pub severity: DeviationSeverity,
    pub distance_km: f64,
    pub duration_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation_id: Option<String>,
}

/// Speed or stop alert
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyAlertPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub ts: u64,
    pub audience: Audience,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<UserId>,
    pub ride_id: RideId,
    pub alert_type: AlertType,
    pub severity: DeviationSeverity,
    pub message: String,
}

impl SafetyAlertPayload {
    pub fn new(
        audience: Audience,
        recipient: Option<UserId>,
        ride_id: RideId,
        alert_type: AlertType,
        severity: DeviationSeverity,
        message: String,
    ) -> Self {
        Self {
            service: None,
            ts: epoch_ms(),
            audience,
            recipient,
            ride_id,
            alert_type,
            severity,
            message,
        }
    }
}

/// Sender handle for notification events
///
/// Clone this to share across producers. Never blocks.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<NotificationEvent>,
    service_id: String,
    metrics: Option<Arc<Metrics>>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<NotificationEvent>, service_id: String) -> Self {
        Self { tx, service_id, metrics: None }
    }

    /// Count dropped events in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Queue an event, injecting the service id.
    /// Returns false if the event was dropped.
    pub fn send(&self, mut event: NotificationEvent) -> bool {
        event.stamp(&self.service_id);
        let name = event.name();
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                let reason = match e {
                    TrySendError::Full(_) => "channel_full",
                    TrySendError::Closed(_) => "channel_closed",
                };
                warn!(event = %name, reason = %reason, "notification_dropped");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_event_dropped();
                }
                false
            }
        }
    }
}

/// Create a new event channel pair
///
/// The sender can be cloned and shared; `capacity` bounds the queue.
pub fn create_event_channel(
    capacity: usize,
    service_id: String,
) -> (EventSender, mpsc::Receiver<NotificationEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender::new(tx, service_id), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop_alert() -> NotificationEvent {
        NotificationEvent::StopAlert(SafetyAlertPayload::new(
            Audience::Operations,
            None,
            RideId::from("ride-1"),
            AlertType::UnusualStop,
            DeviationSeverity::Medium,
            "stopped for 12 minutes".to_string(),
        ))
    }

    #[test]
    fn test_send_injects_service_id() {
        let (tx, mut rx) = create_event_channel(4, "ridematch-test".to_string());
        assert!(tx.send(stop_alert()));

        let event = rx.try_recv().unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stop_alert");
        assert_eq!(json["service"], "ridematch-test");
        assert_eq!(json["audience"], "operations");
        assert_eq!(json["severity"], "MEDIUM");
        assert!(json.get("recipient").is_none());
    }

    #[test]
    fn test_full_channel_drops_and_counts() {
        let metrics = Arc::new(Metrics::new());
        let (tx, _rx) = create_event_channel(1, "svc".to_string());
        let tx = tx.with_metrics(metrics.clone());

        assert!(tx.send(stop_alert()));
        assert!(!tx.send(stop_alert()));
        assert_eq!(metrics.events_dropped(), 1);
    }

    #[test]
    fn test_closed_channel_drops() {
        let (tx, rx) = create_event_channel(4, "svc".to_string());
        drop(rx);
        assert!(!tx.send(stop_alert()));
    }

    #[test]
    fn test_no_alternative_audience() {
        let event = NotificationEvent::ReassignmentNoAlternative(NoAlternativePayload {
            service: None,
            ts: 0,
            passenger_id: UserId::from("p1"),
            booking_id: BookingId::from("b1"),
            cancelled_route_id: RouteId::from("r1"),
            refund_initiated: true,
            reason: CancellationReason::NoAlternative,
        });
        assert_eq!(event.audience(), Audience::Passenger);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["reason"]["kind"], "no_alternative");
    }
}
