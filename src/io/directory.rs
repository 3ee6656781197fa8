//! Ride directory: driver-posted routes and their live seat counters

use crate::domain::types::{CandidateRoute, RouteId, SearchWindow};
use anyhow::bail;
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait RideDirectory: Send + Sync {
    /// Routes departing inside `window`, with their current seat counts
    async fn active_routes(&self, window: &SearchWindow) -> anyhow::Result<Vec<CandidateRoute>>;

    /// Atomically take `seats` from the route. Ok(false) if not enough are left.
    async fn reserve_seats(&self, route_id: &RouteId, seats: u32) -> anyhow::Result<bool>;

    /// Give back seats taken by `reserve_seats`
    async fn release_seats(&self, route_id: &RouteId, seats: u32) -> anyhow::Result<()>;
}

/// Free seats on one route, decremented with compare-and-swap
#[derive(Debug, Default)]
pub struct SeatCounter(AtomicU32);

impl SeatCounter {
    pub fn new(seats: u32) -> Self {
        Self(AtomicU32::new(seats))
    }

    #[inline]
    pub fn available(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Take `seats` if that many are free
    pub fn try_reserve(&self, seats: u32) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current < seats {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                current - seats,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn release(&self, seats: u32) {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(seats);
            match self.0.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

struct DirectoryEntry {
    route: CandidateRoute,
    seats: Arc<SeatCounter>,
}

/// Directory backed by process memory
#[derive(Default)]
pub struct InMemoryRideDirectory {
    routes: RwLock<FxHashMap<RouteId, DirectoryEntry>>,
}

impl InMemoryRideDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_routes(routes: impl IntoIterator<Item = CandidateRoute>) -> Self {
        let directory = Self::new();
        for route in routes {
            directory.insert(route);
        }
        directory
    }

    /// Add or replace a route; its seat counter starts at `available_capacity`
    pub fn insert(&self, route: CandidateRoute) {
        let seats = Arc::new(SeatCounter::new(route.available_capacity));
        self.routes.write().insert(route.id.clone(), DirectoryEntry { route, seats });
    }

    pub fn available_seats(&self, route_id: &RouteId) -> Option<u32> {
        self.routes.read().get(route_id).map(|e| e.seats.available())
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    fn counter(&self, route_id: &RouteId) -> Option<Arc<SeatCounter>> {
        self.routes.read().get(route_id).map(|e| e.seats.clone())
    }
}

#[async_trait]
impl RideDirectory for InMemoryRideDirectory {
    async fn active_routes(&self, window: &SearchWindow) -> anyhow::Result<Vec<CandidateRoute>> {
        let routes = self.routes.read();
        let mut found: Vec<CandidateRoute> = routes
            .values()
            .filter(|e| window.contains(e.route.scheduled_departure))
            .map(|e| {
                let mut route = e.route.clone();
                route.available_capacity = e.seats.available();
                route
            })
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn reserve_seats(&self, route_id: &RouteId, seats: u32) -> anyhow::Result<bool> {
        let Some(counter) = self.counter(route_id) else {
            bail!("unknown route {route_id}");
        };
        let reserved = counter.try_reserve(seats);
        debug!(
            route_id = %route_id,
            seats = %seats,
            reserved = %reserved,
            remaining = %counter.available(),
            "seat_reservation"
        );
        Ok(reserved)
    }

    async fn release_seats(&self, route_id: &RouteId, seats: u32) -> anyhow::Result<()> {
        let Some(counter) = self.counter(route_id) else {
            bail!("unknown route {route_id}");
        };
        counter.release(seats);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geo::Point;
    use crate::domain::types::UserId;
    use chrono::{Duration, TimeZone, Utc};

    fn route(id: &str, seats: u32, hours_from_base: i64) -> CandidateRoute {
        let base = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        CandidateRoute {
            id: RouteId::from(id),
            owner_id: UserId::from("d"),
            polyline: vec![Point::new(0.0, 0.0), Point::new(0.0, 1.0)],
            total_distance_km: 111.0,
            total_duration_min: 90.0,
            available_capacity: seats,
            scheduled_departure: base + Duration::hours(hours_from_base),
            status: Default::default(),
            constraints: Default::default(),
        }
    }

    #[test]
    fn test_seat_counter_never_oversells() {
        let counter = SeatCounter::new(3);
        assert!(counter.try_reserve(2));
        assert!(!counter.try_reserve(2));
        assert!(counter.try_reserve(1));
        assert_eq!(counter.available(), 0);
        counter.release(2);
        assert_eq!(counter.available(), 2);
    }

    #[test]
    fn test_seat_counter_concurrent() {
        let counter = Arc::new(SeatCounter::new(50));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = counter.clone();
                std::thread::spawn(move || (0..20).filter(|_| c.try_reserve(1)).count())
            })
            .collect();
        let taken: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(taken, 50);
        assert_eq!(counter.available(), 0);
    }

    #[tokio::test]
    async fn test_active_routes_filters_window_and_reports_live_seats() {
        let directory = InMemoryRideDirectory::from_routes(vec![
            route("a", 2, 0),
            route("b", 4, 10),
            route("late", 4, 100),
        ]);
        assert!(directory.reserve_seats(&RouteId::from("b"), 3).await.unwrap());

        let base = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let window = SearchWindow { from: base - Duration::hours(1), until: base + Duration::hours(48) };
        let routes = directory.active_routes(&window).await.unwrap();

        let ids: Vec<&str> = routes.iter().map(|r| r.id.0.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(routes[1].available_capacity, 1);
    }

    #[tokio::test]
    async fn test_unknown_route_is_error() {
        let directory = InMemoryRideDirectory::new();
        assert!(directory.reserve_seats(&RouteId::from("nope"), 1).await.is_err());
        assert!(directory.release_seats(&RouteId::from("nope"), 1).await.is_err());
    }
}
