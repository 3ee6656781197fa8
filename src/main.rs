//! Ridematch - route matching, live corridor monitoring and forced reassignment
//!
//! Module structure:
//! - `domain/` - Core business types (geometry, routes, bookings, tracking)
//! - `io/` - External interfaces (routing provider, collaborators, event egress)
//! - `services/` - Business logic (RouteMatcher, CorridorMonitor, ReassignmentCoordinator)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::{Parser, Subcommand};
use ridematch::domain::booking::Booking;
use ridematch::domain::geo::{Point, Polyline};
use ridematch::domain::tracking::DeviationSample;
use ridematch::domain::types::{CandidateRoute, RideId, TripRequest, UserId};
use ridematch::infra::{Config, Metrics};
use ridematch::io::{
    create_event_channel, resolve_geometry, EventLog, EventSender, InMemoryBookingLedger,
    InMemoryRideDirectory, OsrmProvider, RecordingPayments,
};
use ridematch::services::{CorridorMonitor, ReassignmentCoordinator, RouteMatcher, TrackedRide};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Ride-sharing route matching and safety tools
#[derive(Parser, Debug)]
#[command(name = "ridematch", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/dev.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rank posted routes for a pickup/dropoff pair
    Match {
        /// JSON array of candidate routes
        #[arg(short, long)]
        routes: String,
        /// Pickup as lon,lat
        #[arg(long, allow_hyphen_values = true)]
        pickup: Point,
        /// Dropoff as lon,lat
        #[arg(long, allow_hyphen_values = true)]
        dropoff: Point,
        /// Overrides matching.max_results
        #[arg(short = 'n', long)]
        max_results: Option<usize>,
    },
    /// Replay a recorded ride track through the corridor monitor
    Monitor {
        /// JSON ride with polyline and samples
        #[arg(short, long)]
        ride: String,
    },
    /// Cancel a route and migrate its bookings
    Reassign {
        /// JSON scenario: cancelled route, remaining routes and affected bookings
        #[arg(short, long)]
        scenario: String,
    },
    /// Fetch road geometry for waypoints, falling back to a straight line
    Route {
        /// Waypoints as lon,lat;lon,lat;...
        #[arg(short, long, value_delimiter = ';', required = true, allow_hyphen_values = true)]
        waypoints: Vec<Point>,
    },
}

#[derive(Debug, Deserialize)]
struct RideReplay {
    ride_id: RideId,
    driver_id: UserId,
    #[serde(default)]
    passenger_ids: Vec<UserId>,
    polyline: Vec<Point>,
    samples: Vec<DeviationSample>,
}

#[derive(Debug, Deserialize)]
struct CancellationScenario {
    cancelled_route: CandidateRoute,
    #[serde(default)]
    routes: Vec<CandidateRoute>,
    bookings: Vec<Booking>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(Path::new(path))
        .with_context(|| format!("Failed to read {path}"))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {path}"))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default INFO level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), git = env!("GIT_HASH"), "ridematch_starting");

    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);
    info!(
        config_file = %config.config_file(),
        service_id = %config.service_id(),
        deviation_threshold_km = %config.matching().deviation_threshold_km,
        corridor_width_m = %config.corridor().width_m,
        min_score = %config.reassignment().min_score,
        events_file = %config.events_file(),
        "config_loaded"
    );

    let metrics = Arc::new(Metrics::new());

    // Periodic reporter for long replays
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report(0).log();
        }
    });

    let (events, events_rx) =
        create_event_channel(config.events_channel_capacity(), config.service_id().to_string());
    let events = events.with_metrics(metrics.clone());
    let event_log = EventLog::new(config.events_file());
    let log_task = tokio::spawn(event_log.run(events_rx));

    let active_rides = match args.command {
        Command::Match { routes, pickup, dropoff, max_results } => {
            run_match(&config, &metrics, &routes, pickup, dropoff, max_results)?;
            drop(events);
            0
        }
        Command::Monitor { ride } => run_monitor(&config, &metrics, events, &ride)?,
        Command::Reassign { scenario } => {
            run_reassign(&config, &metrics, events, &scenario).await?;
            0
        }
        Command::Route { waypoints } => {
            run_route(&config, &metrics, &waypoints).await?;
            drop(events);
            0
        }
    };

    // Every sender is gone by now; the log drains and exits
    match log_task.await {
        Ok(written) => info!(written = %written, "events_flushed"),
        Err(e) => warn!(error = %e, "event_log_task_failed"),
    }
    reporter.abort();

    metrics.report(active_rides).log();
    info!("ridematch shutdown complete");
    Ok(())
}

fn run_match(
    config: &Config,
    metrics: &Arc<Metrics>,
    routes_path: &str,
    pickup: Point,
    dropoff: Point,
    max_results: Option<usize>,
) -> anyhow::Result<()> {
    let routes: Vec<CandidateRoute> = read_json(routes_path)?;
    let trip = TripRequest::new(pickup, dropoff)?;
    let matcher = RouteMatcher::with_metrics(config.matching().clone(), metrics.clone());

    let limit = max_results.unwrap_or(config.matching().max_results);
    let ranked = matcher.find_matching_rides(&trip, &routes, limit);
    info!(candidates = %routes.len(), matched = %ranked.len(), "match_completed");
    print_json(&ranked)
}

/// Replays samples in order and returns the number of rides still tracked
fn run_monitor(
    config: &Config,
    metrics: &Arc<Metrics>,
    events: EventSender,
    ride_path: &str,
) -> anyhow::Result<usize> {
    let replay: RideReplay = read_json(ride_path)?;
    let polyline = Polyline::new(replay.polyline).context("ride polyline is invalid")?;

    let monitor = CorridorMonitor::new(config.corridor().clone())
        .with_events(events)
        .with_metrics(metrics.clone());
    monitor.start_tracking(TrackedRide {
        ride_id: replay.ride_id.clone(),
        driver_id: replay.driver_id,
        passenger_ids: replay.passenger_ids,
        polyline,
    });

    let mut alerts = Vec::new();
    for sample in replay.samples {
        match monitor.record_sample(&replay.ride_id, sample) {
            Ok(emitted) => alerts.extend(emitted),
            Err(e) => warn!(ride_id = %replay.ride_id, error = %e, "replay_sample_skipped"),
        }
    }

    let summary = monitor.stop_tracking(&replay.ride_id);
    print_json(&serde_json::json!({ "alerts": alerts, "summary": summary }))?;
    Ok(monitor.active_rides())
}

async fn run_reassign(
    config: &Config,
    metrics: &Arc<Metrics>,
    events: EventSender,
    scenario_path: &str,
) -> anyhow::Result<()> {
    let scenario: CancellationScenario = read_json(scenario_path)?;

    let directory = Arc::new(InMemoryRideDirectory::from_routes(scenario.routes));
    let ledger = Arc::new(InMemoryBookingLedger::from_bookings(scenario.bookings.clone()));
    let payments = Arc::new(RecordingPayments::new());

    let coordinator = ReassignmentCoordinator::new(
        config.reassignment().clone(),
        config.matching().clone(),
        directory,
        ledger.clone(),
        payments.clone(),
    )
    .with_events(events)
    .with_metrics(metrics.clone());

    let report =
        coordinator.find_alternative_rides(&scenario.cancelled_route, &scenario.bookings).await;

    print_json(&serde_json::json!({
        "report": report,
        "bookings": ledger.all(),
        "refunds": payments.refunds(),
    }))
}

async fn run_route(
    config: &Config,
    metrics: &Arc<Metrics>,
    waypoints: &[Point],
) -> anyhow::Result<()> {
    let routing = config.routing();
    let provider = OsrmProvider::new(routing)?;
    let geometry = resolve_geometry(
        &provider,
        waypoints,
        routing.fallback_speed_kmh,
        Some(metrics.as_ref()),
    )
    .await?;
    info!(
        distance_km = %geometry.distance_km,
        duration_min = %geometry.duration_min,
        points = %geometry.polyline.len(),
        fallback = %geometry.is_fallback,
        "route_resolved"
    );
    print_json(&geometry)
}
