//! IO modules - external system interfaces
//!
//! - `events` - Typed channel for outbound notification events
//! - `event_log` - Notification output to file (JSONL format)
//! - `routing` - Route geometry providers (OSRM HTTP, straight-line fallback)
//! - `directory` - Ride directory collaborator and atomic seat counters
//! - `ledger` - Booking ledger collaborator
//! - `payments` - Refund gateway collaborator

pub mod directory;
pub mod event_log;
pub mod events;
pub mod ledger;
pub mod payments;
pub mod routing;

// Re-export commonly used types
pub use directory::{InMemoryRideDirectory, RideDirectory};
pub use event_log::EventLog;
pub use events::{create_event_channel, Audience, EventSender, NotificationEvent};
pub use ledger::{BookingLedger, InMemoryBookingLedger};
pub use payments::{PaymentGateway, RecordingPayments};
pub use routing::{resolve_geometry, OsrmProvider, RouteGeometry, RouteGeometryProvider};
