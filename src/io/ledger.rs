//! Booking ledger collaborator

use crate::domain::booking::{Booking, BookingStatus, CancellationReason, ReassignmentRecord};
use crate::domain::types::BookingId;
use anyhow::bail;
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

#[async_trait]
pub trait BookingLedger: Send + Sync {
    /// Move a live booking into `CancelledPendingReassignment` and store its
    /// migration history, attempt count included
    async fn mark_pending_reassignment(
        &self,
        id: &BookingId,
        record: ReassignmentRecord,
    ) -> anyhow::Result<()>;

    async fn cancel(&self, id: &BookingId, reason: CancellationReason) -> anyhow::Result<()>;

    async fn create_booking(&self, booking: Booking) -> anyhow::Result<()>;

    async fn get(&self, id: &BookingId) -> anyhow::Result<Option<Booking>>;
}

#[derive(Default)]
pub struct InMemoryBookingLedger {
    bookings: RwLock<FxHashMap<BookingId, Booking>>,
}

impl InMemoryBookingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bookings(bookings: impl IntoIterator<Item = Booking>) -> Self {
        let ledger = Self::new();
        {
            let mut map = ledger.bookings.write();
            for b in bookings {
                map.insert(b.id.clone(), b);
            }
        }
        ledger
    }

    /// Snapshot of every booking, ordered by id
    pub fn all(&self) -> Vec<Booking> {
        let mut all: Vec<Booking> = self.bookings.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn len(&self) -> usize {
        self.bookings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.read().is_empty()
    }
}

#[async_trait]
impl BookingLedger for InMemoryBookingLedger {
    async fn mark_pending_reassignment(
        &self,
        id: &BookingId,
        record: ReassignmentRecord,
    ) -> anyhow::Result<()> {
        let mut bookings = self.bookings.write();
        let Some(booking) = bookings.get_mut(id) else {
            bail!("unknown booking {id}");
        };
        if !booking.status.is_reassignable() {
            bail!("booking {id} is {} and cannot be reassigned", booking.status.as_str());
        }
        booking.status = BookingStatus::CancelledPendingReassignment;
        booking.reassignment = Some(record);
        Ok(())
    }

    async fn cancel(&self, id: &BookingId, reason: CancellationReason) -> anyhow::Result<()> {
        let mut bookings = self.bookings.write();
        let Some(booking) = bookings.get_mut(id) else {
            bail!("unknown booking {id}");
        };
        booking.status = BookingStatus::Cancelled;
        booking.cancellation = Some(reason);
        debug!(booking_id = %id, "booking_cancelled");
        Ok(())
    }

    async fn create_booking(&self, booking: Booking) -> anyhow::Result<()> {
        let mut bookings = self.bookings.write();
        if bookings.contains_key(&booking.id) {
            bail!("booking {} already exists", booking.id);
        }
        debug!(booking_id = %booking.id, route_id = %booking.route_id, "booking_created");
        bookings.insert(booking.id.clone(), booking);
        Ok(())
    }

    async fn get(&self, id: &BookingId) -> anyhow::Result<Option<Booking>> {
        Ok(self.bookings.read().get(id).cloned())
    }
}
