//! Corridor, speed and stop analysis over live location samples
//!
//! Pure functions; per-ride state lives in the monitor's sessions.

use crate::domain::geo::{haversine_km, Point, Polyline};
use crate::domain::tracking::{DeviationSample, DeviationSeverity, DeviationStatus};
use crate::infra::config::CorridorConfig;
use crate::services::matcher::project_point_to_polyline;
use serde::Serialize;

/// Beyond this distance a deviation is critical regardless of corridor width
pub const CRITICAL_DISTANCE_KM: f64 = 20.0;
/// Off-corridor longer than this is critical
pub const CRITICAL_OFF_ROUTE_SECS: u64 = 15 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CorridorCheck {
    pub within_corridor: bool,
    pub distance_km: f64,
    pub severity: DeviationSeverity,
}

/// Distance from the route and severity bucketed by multiples of the corridor width
pub fn check_corridor(point: Point, polyline: &Polyline, width_km: f64) -> CorridorCheck {
    // Zero epsilon: only the true perpendicular minimum counts
    let projection = project_point_to_polyline(point, polyline, 0.0);
    let distance_km = projection.distance_off_route_km;
    let ratio = if width_km > 0.0 { distance_km / width_km } else { f64::INFINITY };

    let severity = if distance_km > CRITICAL_DISTANCE_KM {
        DeviationSeverity::Critical
    } else if ratio <= 1.0 {
        DeviationSeverity::None
    } else if ratio <= 2.0 {
        DeviationSeverity::Low
    } else if ratio <= 4.0 {
        DeviationSeverity::Medium
    } else {
        DeviationSeverity::High
    };

    CorridorCheck { within_corridor: distance_km <= width_km, distance_km, severity }
}

/// Fold the time spent off the corridor into a check
pub fn deviation_status(check: &CorridorCheck, off_route_secs: u64) -> DeviationStatus {
    let severity = if !check.within_corridor && off_route_secs > CRITICAL_OFF_ROUTE_SECS {
        DeviationSeverity::Critical
    } else {
        check.severity
    };
    DeviationStatus { severity, distance_km: check.distance_km, duration_secs: off_route_secs }
}

/// Reported speed, or speed derived from the previous sample
pub fn effective_speeds(history: &[DeviationSample]) -> Vec<Option<f64>> {
    history
        .iter()
        .enumerate()
        .map(|(i, sample)| {
            sample.speed_kmh.or_else(|| {
                let prev = history.get(i.checked_sub(1)?)?;
                let secs = (sample.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
                if secs <= 0.0 {
                    return None;
                }
                Some(haversine_km(prev.point, sample.point) / (secs / 3600.0))
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedPattern {
    /// Several consecutive samples above the limit
    Sustained,
    /// Latest sample above the spike limit
    Spike,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeedAlert {
    pub pattern: SpeedPattern,
    pub severity: DeviationSeverity,
    pub speed_kmh: f64,
    pub message: String,
}

/// Look for abnormal speed at the tail of `history`
pub fn analyze_speed_patterns(
    history: &[DeviationSample],
    config: &CorridorConfig,
) -> Option<SpeedAlert> {
    let speeds = effective_speeds(history);

    let run: Vec<f64> = speeds
        .iter()
        .rev()
        .map_while(|&s| s.filter(|&v| v > config.speed_limit_kmh))
        .collect();

    if config.sustained_speed_samples > 0 && run.len() >= config.sustained_speed_samples {
        let avg = run.iter().sum::<f64>() / run.len() as f64;
        let severity = if avg > config.speed_spike_kmh {
            DeviationSeverity::High
        } else {
            DeviationSeverity::Medium
        };
        return Some(SpeedAlert {
            pattern: SpeedPattern::Sustained,
            severity,
            speed_kmh: avg,
            message: format!(
                "sustained speed of {:.0} km/h over {} samples (limit {:.0} km/h)",
                avg,
                run.len(),
                config.speed_limit_kmh
            ),
        });
    }

    let latest = speeds.last().copied().flatten()?;
    if latest > config.speed_spike_kmh {
        return Some(SpeedAlert {
            pattern: SpeedPattern::Spike,
            severity: DeviationSeverity::Medium,
            speed_kmh: latest,
            message: format!(
                "speed spike of {:.0} km/h (spike limit {:.0} km/h)",
                latest, config.speed_spike_kmh
            ),
        });
    }
    None
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopAlert {
    pub severity: DeviationSeverity,
    pub duration_secs: u64,
    pub location: Point,
    pub message: String,
}

/// Flag a stationary period at the tail of `history` that has lasted too long
pub fn detect_unusual_stops(
    history: &[DeviationSample],
    config: &CorridorConfig,
) -> Option<StopAlert> {
    let last = history.last()?;

    let stationary = |s: &DeviationSample| {
        haversine_km(s.point, last.point) <= config.stop_radius_km
            && s.speed_kmh.map_or(true, |v| v <= config.stop_speed_kmh)
    };
    if !stationary(last) {
        return None;
    }

    let since = history
        .iter()
        .rev()
        .take_while(|s| stationary(*s))
        .last()
        .map_or(last.timestamp, |s| s.timestamp);
    let duration_secs = (last.timestamp - since).num_seconds().max(0) as u64;
    let minutes = duration_secs / 60;

    if duration_secs >= config.critical_stop_secs {
        Some(StopAlert {
            severity: DeviationSeverity::Critical,
            duration_secs,
            location: last.point,
            message: format!("critical stop: stationary for {minutes} minutes"),
        })
    } else if duration_secs >= config.suspicious_stop_secs {
        Some(StopAlert {
            severity: DeviationSeverity::Medium,
            duration_secs,
            location: last.point,
            message: format!("suspicious stop: stationary for {minutes} minutes"),
        })
    } else {
        None
    }
}
