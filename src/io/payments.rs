//! Payment collaborator (refunds only)

use crate::domain::types::BookingId;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate_refund(&self, booking_id: &BookingId, amount_cents: u64) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundRequest {
    pub booking_id: BookingId,
    pub amount_cents: u64,
}

/// Gateway that records refund requests instead of moving money
#[derive(Default)]
pub struct RecordingPayments {
    refunds: Mutex<Vec<RefundRequest>>,
}

impl RecordingPayments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refunds(&self) -> Vec<RefundRequest> {
        self.refunds.lock().clone()
    }
}

#[async_trait]
impl PaymentGateway for RecordingPayments {
    async fn initiate_refund(&self, booking_id: &BookingId, amount_cents: u64) -> anyhow::Result<()> {
        info!(booking_id = %booking_id, amount_cents = %amount_cents, "refund_initiated");
        self.refunds.lock().push(RefundRequest { booking_id: booking_id.clone(), amount_cents });
        Ok(())
    }
}
