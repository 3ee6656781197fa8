//! Lock-free metrics collection and periodic reporting
//!
//! Counter updates are lock-free; `report()` swaps the periodic counters.
//! Every atomic is Relaxed and statistical only: never branch on these values.

use crate::domain::tracking::DeviationSeverity;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries (microseconds)
/// Buckets: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120
const BUCKET_BOUNDS: [u64; 10] = [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120];
const NUM_BUCKETS: usize = 11;

/// Upper bounds for percentile estimation (last bucket uses 2x the previous bound)
const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
    [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120, 10240];

/// Number of deviation severities tracked (NONE..CRITICAL)
const NUM_SEVERITIES: usize = 5;

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

#[inline]
fn severity_index(severity: DeviationSeverity) -> usize {
    match severity {
        DeviationSeverity::None => 0,
        DeviationSeverity::Low => 1,
        DeviationSeverity::Medium => 2,
        DeviationSeverity::High => 3,
        DeviationSeverity::Critical => 4,
    }
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Upper bound of the bucket containing the given percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;
    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector shared by the matcher, monitor and coordinator
pub struct Metrics {
    /// Route/trip pairs evaluated (monotonic)
    matches_evaluated: AtomicU64,
    /// Pairs that produced a match (monotonic)
    matches_accepted: AtomicU64,
    /// Evaluations since last report (reset on report)
    matches_since_report: AtomicU64,
    /// Sum of match latencies in microseconds (reset on report)
    match_latency_sum_us: AtomicU64,
    /// Max match latency (reset on report)
    match_latency_max_us: AtomicU64,
    /// Match latency histogram (reset on report)
    match_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Candidates skipped for missing or degenerate geometry (monotonic)
    invalid_geometry_total: AtomicU64,
    /// Location samples accepted by the corridor monitor (monotonic)
    samples_total: AtomicU64,
    /// Samples rejected as stale (monotonic)
    stale_samples_total: AtomicU64,
    /// Alerts emitted, indexed by severity (monotonic)
    alerts_by_severity: [AtomicU64; NUM_SEVERITIES],
    /// Alerts suppressed by the per-ride cooldown (monotonic)
    alerts_suppressed: AtomicU64,
    /// Bookings moved onto a replacement route (monotonic)
    reassigned_total: AtomicU64,
    /// Bookings with no viable replacement (monotonic)
    no_alternative_total: AtomicU64,
    /// Bookings whose migration failed with an error (monotonic)
    reassignment_errors_total: AtomicU64,
    /// Seats moved onto replacement routes (monotonic)
    seats_migrated_total: AtomicU64,
    /// Refunds initiated for stranded passengers (monotonic)
    refunds_total: AtomicU64,
    /// Routing provider failures answered with the straight-line fallback (monotonic)
    routing_fallbacks_total: AtomicU64,
    /// Notification events dropped because the channel was full (monotonic)
    events_dropped: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            matches_evaluated: AtomicU64::new(0),
            matches_accepted: AtomicU64::new(0),
            matches_since_report: AtomicU64::new(0),
            match_latency_sum_us: AtomicU64::new(0),
            match_latency_max_us: AtomicU64::new(0),
            match_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            invalid_geometry_total: AtomicU64::new(0),
            samples_total: AtomicU64::new(0),
            stale_samples_total: AtomicU64::new(0),
            alerts_by_severity: std::array::from_fn(|_| AtomicU64::new(0)),
            alerts_suppressed: AtomicU64::new(0),
            reassigned_total: AtomicU64::new(0),
            no_alternative_total: AtomicU64::new(0),
            reassignment_errors_total: AtomicU64::new(0),
            seats_migrated_total: AtomicU64::new(0),
            refunds_total: AtomicU64::new(0),
            routing_fallbacks_total: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record one trip/route evaluation with its latency (lock-free)
    #[inline]
    pub fn record_match_evaluated(&self, latency_us: u64, accepted: bool) {
        self.matches_evaluated.fetch_add(1, Ordering::Relaxed);
        self.matches_since_report.fetch_add(1, Ordering::Relaxed);
        if accepted {
            self.matches_accepted.fetch_add(1, Ordering::Relaxed);
        }
        self.match_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.match_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.match_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_invalid_geometry(&self) {
        self.invalid_geometry_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample(&self) {
        self.samples_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stale_sample(&self) {
        self.stale_samples_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alert(&self, severity: DeviationSeverity) {
        self.alerts_by_severity[severity_index(severity)].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alert_suppressed(&self) {
        self.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reassigned(&self, seats: u32) {
        self.reassigned_total.fetch_add(1, Ordering::Relaxed);
        self.seats_migrated_total.fetch_add(u64::from(seats), Ordering::Relaxed);
    }

    #[inline]
    pub fn record_no_alternative(&self, refunded: bool) {
        self.no_alternative_total.fetch_add(1, Ordering::Relaxed);
        if refunded {
            self.refunds_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_reassignment_error(&self) {
        self.reassignment_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_routing_fallback(&self) {
        self.routing_fallbacks_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn matches_evaluated(&self) -> u64 {
        self.matches_evaluated.load(Ordering::Relaxed)
    }

    pub fn seats_migrated(&self) -> u64 {
        self.seats_migrated_total.load(Ordering::Relaxed)
    }

    pub fn alerts_suppressed(&self) -> u64 {
        self.alerts_suppressed.load(Ordering::Relaxed)
    }

    pub fn routing_fallbacks(&self) -> u64 {
        self.routing_fallbacks_total.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    /// Generate a summary, resetting the periodic counters
    pub fn report(&self, active_rides: usize) -> MetricsSummary {
        let evaluated = self.matches_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.match_latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max = self.match_latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.match_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };
        let matches_per_sec = if elapsed.as_secs_f64() > 0.0 {
            evaluated as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let mut alerts_by_severity = [0u64; NUM_SEVERITIES];
        for (i, counter) in self.alerts_by_severity.iter().enumerate() {
            alerts_by_severity[i] = counter.load(Ordering::Relaxed);
        }

        MetricsSummary {
            matches_evaluated_total: self.matches_evaluated.load(Ordering::Relaxed),
            matches_accepted_total: self.matches_accepted.load(Ordering::Relaxed),
            matches_per_sec,
            avg_match_latency_us: if evaluated > 0 { latency_sum / evaluated } else { 0 },
            max_match_latency_us: latency_max,
            match_lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            match_lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            invalid_geometry_total: self.invalid_geometry_total.load(Ordering::Relaxed),
            active_rides,
            samples_total: self.samples_total.load(Ordering::Relaxed),
            stale_samples_total: self.stale_samples_total.load(Ordering::Relaxed),
            alerts_by_severity,
            alerts_suppressed: self.alerts_suppressed.load(Ordering::Relaxed),
            reassigned_total: self.reassigned_total.load(Ordering::Relaxed),
            no_alternative_total: self.no_alternative_total.load(Ordering::Relaxed),
            reassignment_errors_total: self.reassignment_errors_total.load(Ordering::Relaxed),
            seats_migrated_total: self.seats_migrated_total.load(Ordering::Relaxed),
            refunds_total: self.refunds_total.load(Ordering::Relaxed),
            routing_fallbacks_total: self.routing_fallbacks_total.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub matches_evaluated_total: u64,
    pub matches_accepted_total: u64,
    pub matches_per_sec: f64,
    pub avg_match_latency_us: u64,
    pub max_match_latency_us: u64,
    /// Bounds: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub match_lat_p50_us: u64,
    pub match_lat_p99_us: u64,
    pub invalid_geometry_total: u64,
    pub active_rides: usize,
    pub samples_total: u64,
    pub stale_samples_total: u64,
    /// Indexed NONE, LOW, MEDIUM, HIGH, CRITICAL
    pub alerts_by_severity: [u64; NUM_SEVERITIES],
    pub alerts_suppressed: u64,
    pub reassigned_total: u64,
    pub no_alternative_total: u64,
    pub reassignment_errors_total: u64,
    pub seats_migrated_total: u64,
    pub refunds_total: u64,
    pub routing_fallbacks_total: u64,
    pub events_dropped: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            matches_total = %self.matches_evaluated_total,
            matches_accepted = %self.matches_accepted_total,
            matches_per_sec = format!("{:.1}", self.matches_per_sec),
            avg_match_us = %self.avg_match_latency_us,
            p99_match_us = %self.match_lat_p99_us,
            active_rides = %self.active_rides,
            samples = %self.samples_total,
            alerts_high = %self.alerts_by_severity[3],
            alerts_critical = %self.alerts_by_severity[4],
            alerts_suppressed = %self.alerts_suppressed,
            reassigned = %self.reassigned_total,
            no_alternative = %self.no_alternative_total,
            reassignment_errors = %self.reassignment_errors_total,
            routing_fallbacks = %self.routing_fallbacks_total,
            events_dropped = %self.events_dropped,
            "metrics"
        );
    }
}
