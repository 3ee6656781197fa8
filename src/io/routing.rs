//! Route geometry providers
//!
//! Routes are fetched from an OSRM-compatible HTTP endpoint. When the
//! provider fails, `resolve_geometry` substitutes a straight line through
//! the waypoints with a duration estimated at an assumed average speed.

use crate::domain::geo::{GeoError, Point, Polyline};
use crate::infra::config::RoutingConfig;
use crate::infra::metrics::Metrics;
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Road geometry between waypoints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteGeometry {
    pub polyline: Vec<Point>,
    pub distance_km: f64,
    pub duration_min: f64,
    /// True when the geometry is a straight-line estimate
    pub is_fallback: bool,
}

#[async_trait]
pub trait RouteGeometryProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn route(&self, waypoints: &[Point]) -> anyhow::Result<RouteGeometry>;
}

/// OSRM `route` service client
pub struct OsrmProvider {
    client: reqwest::Client,
    base_url: String,
    profile: String,
}

impl OsrmProvider {
    pub fn new(config: &RoutingConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build routing HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            profile: config.profile.clone(),
        })
    }

    fn route_url(&self, waypoints: &[Point]) -> String {
        let coords: Vec<String> =
            waypoints.iter().map(|p| format!("{},{}", p.lon, p.lat)).collect();
        format!(
            "{}/route/v1/{}/{}?overview=full&geometries=geojson",
            self.base_url,
            self.profile,
            coords.join(";")
        )
    }
}

#[derive(Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Deserialize)]
struct OsrmRoute {
    /// Metres
    distance: f64,
    /// Seconds
    duration: f64,
    geometry: OsrmGeometry,
}

#[derive(Deserialize)]
struct OsrmGeometry {
    /// `[lon, lat]` pairs
    coordinates: Vec<[f64; 2]>,
}

/// Convert an OSRM route response body into a geometry
pub fn parse_osrm_response(body: &str) -> anyhow::Result<RouteGeometry> {
    let response: OsrmResponse =
        serde_json::from_str(body).context("malformed OSRM response")?;
    if response.code != "Ok" {
        bail!(
            "OSRM returned {}: {}",
            response.code,
            response.message.unwrap_or_default()
        );
    }
    let Some(route) = response.routes.into_iter().next() else {
        bail!("OSRM returned no routes");
    };

    let polyline: Vec<Point> = route.geometry.coordinates.into_iter().map(Point::from).collect();
    Polyline::from_slice(&polyline).context("OSRM geometry is not a usable polyline")?;

    Ok(RouteGeometry {
        polyline,
        distance_km: route.distance / 1000.0,
        duration_min: route.duration / 60.0,
        is_fallback: false,
    })
}

#[async_trait]
impl RouteGeometryProvider for OsrmProvider {
    fn name(&self) -> &'static str {
        "osrm"
    }

    async fn route(&self, waypoints: &[Point]) -> anyhow::Result<RouteGeometry> {
        if waypoints.len() < 2 {
            bail!(GeoError::TooFewPoints(waypoints.len()));
        }
        let url = self.route_url(waypoints);
        let start = Instant::now();

        let body = self
            .client
            .get(&url)
            .send()
            .await
            .context("OSRM request failed")?
            .error_for_status()
            .context("OSRM returned an error status")?
            .text()
            .await
            .context("failed to read OSRM response")?;

        let geometry = parse_osrm_response(&body)?;
        debug!(
            points = %geometry.polyline.len(),
            distance_km = %geometry.distance_km,
            latency_ms = %start.elapsed().as_millis(),
            "osrm_route_fetched"
        );
        Ok(geometry)
    }
}

/// Straight line through the waypoints at `speed_kmh`
pub fn straight_line_fallback(
    waypoints: &[Point],
    speed_kmh: f64,
) -> Result<RouteGeometry, GeoError> {
    let polyline = Polyline::from_slice(waypoints)?;
    let distance_km = polyline.length_km();
    let duration_min = if speed_kmh > 0.0 { distance_km / speed_kmh * 60.0 } else { 0.0 };
    Ok(RouteGeometry {
        polyline: waypoints.to_vec(),
        distance_km,
        duration_min,
        is_fallback: true,
    })
}

/// Ask the provider, falling back to a straight line on any failure.
///
/// Only malformed waypoints are an error.
pub async fn resolve_geometry(
    provider: &dyn RouteGeometryProvider,
    waypoints: &[Point],
    fallback_speed_kmh: f64,
    metrics: Option<&Metrics>,
) -> anyhow::Result<RouteGeometry> {
    for p in waypoints {
        p.validate()?;
    }

    match provider.route(waypoints).await {
        Ok(geometry) => Ok(geometry),
        Err(e) => {
            warn!(
                provider = %provider.name(),
                error = %format!("{e:#}"),
                waypoints = %waypoints.len(),
                "routing_fallback_straight_line"
            );
            if let Some(metrics) = metrics {
                metrics.record_routing_fallback();
            }
            Ok(straight_line_fallback(waypoints, fallback_speed_kmh)?)
        }
    }
}
