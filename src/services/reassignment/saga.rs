//! Per-booking completion markers for the reassignment workflow

use serde::Serialize;
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStep {
    /// Booking moved to `CancelledPendingReassignment`
    Suspended,
    SeatsReserved,
    ReplacementCreated,
    OriginalCancelled,
    RefundInitiated,
    /// Compensation: reserved seats handed back
    SeatsReleased,
    Notified,
}

/// Steps completed for one booking, in order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SagaLog {
    steps: SmallVec<[SagaStep; 8]>,
}

impl SagaLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&mut self, step: SagaStep) {
        self.steps.push(step);
    }

    #[inline]
    pub fn completed(&self, step: SagaStep) -> bool {
        self.steps.contains(&step)
    }

    pub fn steps(&self) -> &[SagaStep] {
        &self.steps
    }

    /// False when a failure left the booking half-migrated: seats held
    /// without a replacement, or a replacement next to a live original.
    pub fn is_consistent(&self) -> bool {
        use SagaStep::*;
        let reserved = self.completed(SeatsReserved);
        let created = self.completed(ReplacementCreated);

        if created && !reserved {
            return false;
        }
        if created && !self.completed(OriginalCancelled) {
            return false;
        }
        if reserved && !created && !self.completed(SeatsReleased) {
            return false;
        }
        if self.completed(RefundInitiated) && !self.completed(OriginalCancelled) {
            return false;
        }
        true
    }
}
