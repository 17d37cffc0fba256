//! Types shared by every TurboMarket worker crate.
//!
//! - [`logging`]: subscriber setup and the `internal!` macro
//! - campaign, content, envelope, outcome and event records that travel
//!   through the job queue as payloads and results

pub mod campaign;
pub mod content;
pub mod envelope;
pub mod event;
pub mod logging;
pub mod outcome;

pub use campaign::{CampaignRequest, DeliveryPlan, Recipient};
pub use content::{ContentMetadata, EmailContent};
pub use envelope::{Destination, EmailAddress, Envelope};
pub use event::Event;
pub use outcome::{DeliveryOutcome, DeliveryStatus, DeliverySummary};
pub use tracing;

/// Process-wide lifecycle signal broadcast by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}

/// Milliseconds since the Unix epoch
#[must_use]
pub fn now_ms() -> u64 {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();

    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
