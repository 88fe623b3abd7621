// Structured events emitted by the timeline engine, never thrown as errors.
//
// Grounded on events.go's event-name catalog (most of it reserved/commented out there); the
// active set used by ReaderLiveMPDUpdateContext.go is kept live here, and the names the Go source
// had commented out as TBD are kept as documented constants for callers who want to wire up a
// richer sink later, without expanding this crate's own emission surface.

use chrono::{DateTime, Utc};
use tracing::debug;

/// Name of a structured stats event emitted by the live reader/context.
pub mod event_name {
    pub const TIMELINE_GAP: &str = "MPD_ERR_TIMELINE_GAP";
    pub const TIMELINE_FUTURE: &str = "MPD_ERR_TIMELINE_FUTURE";
    pub const NO_LIVEPOINT_ENTRIES: &str = "MPD_ERR_NO_LIVEPOINT_ENTRIES";
    pub const NO_ACTIVE_PERIOD: &str = "MPD_NO_ACTIVE_PERIOD";
    pub const NO_ADAPT_AFTER_FILTER: &str = "MPD_NO_ADAPT_AFTER_FILTER";
    pub const NO_REPRESENTATION_AFTER_FILTER: &str = "MPD_NO_REPRESENTATION_AFTER_FILTER";

    // Reserved for future wiring, matching names left commented out as TBD in the source
    // material this reader is grounded on. Not currently emitted by this crate.
    pub const NEW_MPD: &str = "NEW_MPD";
    pub const UPD_MPD: &str = "UPD_MPD";
}

/// A structured event describing something noteworthy about the state of a Reader or
/// ReaderContext. Events are informational; they are never raised as errors.
#[derive(Debug, Clone)]
pub struct StatsEvent {
    pub event_clock: DateTime<Utc>,
    pub id: String,
    pub name: &'static str,
    pub values: Vec<String>,
}

/// Sink capability for structured events. Mirrors the single-method capability trait shape used
/// elsewhere in this crate (compare a progress-observer capability in a download pipeline).
pub trait StatsSink: Send + Sync {
    fn emit(&self, event: StatsEvent);
}

/// A `StatsSink` that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStatsSink;

impl StatsSink for NullStatsSink {
    fn emit(&self, _event: StatsEvent) {}
}

/// A `StatsSink` that logs each event via `tracing::debug!`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatsSink;

impl StatsSink for TracingStatsSink {
    fn emit(&self, event: StatsEvent) {
        debug!(id = %event.id, name = event.name, values = ?event.values, clock = %event.event_clock, "dash live event");
    }
}
