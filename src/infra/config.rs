//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section and field is optional; missing values take the defaults below.

use anyhow::Context;
use chrono::Duration;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Identifier stamped on every emitted event
    pub id: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { id: "ridematch".to_string() }
    }
}

/// Trip-matching tolerances and scoring ceilings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Max off-route distance for a projection onto the route shape
    pub deviation_threshold_km: f64,
    /// Looser tolerance when matching against the route's start or end
    pub endpoint_threshold_km: f64,
    /// Detour at which the detour penalty reaches its full weight
    pub max_detour_percent: f64,
    /// Vertices this close are taken as authoritative projections
    pub exact_vertex_epsilon_km: f64,
    /// Two-point routes shorter than this use endpoint-proximity matching
    pub short_route_cutoff_km: f64,
    /// Endpoint tolerance for short routes
    pub short_route_tolerance_km: f64,
    /// Minimum trip/route length ratio for short routes (0..1)
    pub min_distance_similarity: f64,
    /// Default cap on ranked results
    pub max_results: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            deviation_threshold_km: 10.0,
            endpoint_threshold_km: 20.0,
            max_detour_percent: 20.0,
            exact_vertex_epsilon_km: 0.5,
            short_route_cutoff_km: 50.0,
            short_route_tolerance_km: 20.0,
            min_distance_similarity: 0.7,
            max_results: 10,
        }
    }
}

/// Live safety corridor, speed and stop thresholds
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CorridorConfig {
    pub width_m: f64,
    /// Suppression window per (ride, alert type)
    pub alert_cooldown_secs: u64,
    /// Samples with a worse accuracy radius are ignored
    pub max_sample_accuracy_m: f64,
    pub speed_limit_kmh: f64,
    pub speed_spike_kmh: f64,
    /// Consecutive samples above the limit that count as sustained speeding
    pub sustained_speed_samples: usize,
    pub stop_radius_km: f64,
    pub stop_speed_kmh: f64,
    pub suspicious_stop_secs: u64,
    pub critical_stop_secs: u64,
    /// Samples retained per ride for speed and stop analysis
    pub history_len: usize,
}

impl Default for CorridorConfig {
    fn default() -> Self {
        Self {
            width_m: 500.0,
            alert_cooldown_secs: 300,
            max_sample_accuracy_m: 100.0,
            speed_limit_kmh: 120.0,
            speed_spike_kmh: 150.0,
            sustained_speed_samples: 3,
            stop_radius_km: 0.05,
            stop_speed_kmh: 3.0,
            suspicious_stop_secs: 600,
            critical_stop_secs: 1800,
            history_len: 240,
        }
    }
}

impl CorridorConfig {
    #[inline]
    pub fn width_km(&self) -> f64 {
        self.width_m / 1000.0
    }

    #[inline]
    pub fn alert_cooldown(&self) -> Duration {
        Duration::seconds(self.alert_cooldown_secs as i64)
    }
}

/// Forced-migration search rules
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReassignmentConfig {
    /// Search starts this long before the cancelled departure (or now, if earlier)
    pub window_before_hours: i64,
    pub window_after_hours: i64,
    pub min_score: f64,
    /// Skip other routes posted by the cancelling driver
    pub exclude_same_driver: bool,
    /// Bookings already migrated this many times are not migrated again
    pub max_hops: usize,
}

impl Default for ReassignmentConfig {
    fn default() -> Self {
        Self {
            window_before_hours: 24,
            window_after_hours: 48,
            min_score: 40.0,
            exclude_same_driver: true,
            max_hops: 3,
        }
    }
}

/// Longest search window on either side of a cancelled departure
pub const MAX_WINDOW_HOURS: i64 = 24 * 30;

impl ReassignmentConfig {
    pub fn window_before(&self) -> Duration {
        Duration::hours(self.window_before_hours.clamp(0, MAX_WINDOW_HOURS))
    }

    pub fn window_after(&self) -> Duration {
        Duration::hours(self.window_after_hours.clamp(0, MAX_WINDOW_HOURS))
    }
}

/// External routing provider (OSRM-compatible HTTP API)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_ms: u64,
    /// Assumed average speed for straight-line fallback durations
    pub fallback_speed_kmh: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "driving".to_string(),
            timeout_ms: 5000,
            fallback_speed_kmh: 40.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// File path for the event log (JSONL format)
    pub file: String,
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { file: "events.jsonl".to_string(), channel_capacity: 1000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub service: ServiceConfig,
    pub matching: MatchingConfig,
    pub corridor: CorridorConfig,
    pub reassignment: ReassignmentConfig,
    pub routing: RoutingConfig,
    pub events: EventsConfig,
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    service_id: String,
    matching: MatchingConfig,
    corridor: CorridorConfig,
    reassignment: ReassignmentConfig,
    routing: RoutingConfig,
    events_file: String,
    events_channel_capacity: usize,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            service_id: toml_config.service.id,
            matching: toml_config.matching,
            corridor: toml_config.corridor,
            reassignment: toml_config.reassignment,
            routing: toml_config.routing,
            events_file: toml_config.events.file,
            events_channel_capacity: toml_config.events.channel_capacity,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, path.display().to_string());
        config.validate().with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from a path, falling back to defaults on any error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        let m = &self.matching;
        anyhow::ensure!(m.deviation_threshold_km > 0.0, "matching.deviation_threshold_km must be > 0");
        anyhow::ensure!(
            m.endpoint_threshold_km >= m.deviation_threshold_km,
            "matching.endpoint_threshold_km must be >= deviation_threshold_km"
        );
        anyhow::ensure!(
            (0.0..=m.deviation_threshold_km).contains(&m.exact_vertex_epsilon_km),
            "matching.exact_vertex_epsilon_km must be within 0..deviation_threshold_km"
        );
        anyhow::ensure!(m.max_detour_percent > 0.0, "matching.max_detour_percent must be > 0");
        anyhow::ensure!(
            (0.0..=1.0).contains(&m.min_distance_similarity),
            "matching.min_distance_similarity must be within 0..1"
        );
        anyhow::ensure!(self.corridor.width_m > 0.0, "corridor.width_m must be > 0");
        anyhow::ensure!(
            (0.0..=100.0).contains(&self.reassignment.min_score),
            "reassignment.min_score must be within 0..100"
        );
        let r = &self.reassignment;
        for (name, hours) in
            [("window_before_hours", r.window_before_hours), ("window_after_hours", r.window_after_hours)]
        {
            anyhow::ensure!(
                (0..=MAX_WINDOW_HOURS).contains(&hours),
                "reassignment.{name} must be within 0..{MAX_WINDOW_HOURS}"
            );
        }
        Ok(())
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn matching(&self) -> &MatchingConfig {
        &self.matching
    }

    pub fn corridor(&self) -> &CorridorConfig {
        &self.corridor
    }

    pub fn reassignment(&self) -> &ReassignmentConfig {
        &self.reassignment
    }

    pub fn routing(&self) -> &RoutingConfig {
        &self.routing
    }

    pub fn events_file(&self) -> &str {
        &self.events_file
    }

    pub fn events_channel_capacity(&self) -> usize {
        self.events_channel_capacity
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}
