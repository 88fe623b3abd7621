//! Live (dynamic) DASH manifest support: MPD classification, live-point discovery, and
//! `SegmentTimeline` traversal.
//!
//! The pieces of this module mirror a pipeline: [`factory::ReaderFactory`] validates and
//! classifies an [`crate::MPD`], producing a [`reader::Reader`]; the caller feeds subsequent
//! manifest refreshes to the `Reader`; [`context::ReaderContext`] instances, created from the
//! `Reader`, track where a particular consumer is in the timeline and hand out
//! [`context::ChunkUrl`]s one at a time or as a bounded, cancellable stream
//! ([`stream::ChunkUrlStream`]).

mod time;
mod selector;
mod factory;
mod reader;
mod context;
mod stream;
mod events;

pub use time::adjust_url_path;
pub use selector::{
    StreamSelector, MatchResult, RepresentationSelector, MinBandwidthSelector,
    MaxBandwidthSelector, StreamSelectorList,
};
pub use factory::ReaderFactory;
pub use reader::{Reader, LiveSegmentTimelineReader};
pub use context::{ReaderContext, ChunkUrl, LiveReaderContext};
pub use stream::{CancelToken, ChunkUrlStream};
pub use events::{StatsEvent, StatsSink, NullStatsSink, TracingStatsSink};

/// Profile URN required on `MPD@profiles` for a live presentation.
pub const LIVE_PROFILE: &str = "urn:mpeg:dash:profile:isoff-live:2011";
/// Profile URN required on `MPD@profiles` for an on-demand presentation.
pub const ON_DEMAND_PROFILE: &str = "urn:mpeg:dash:profile:isoff-ondemand:2011";

pub(crate) const TIME_TOKEN: &str = "$Time$";
pub(crate) const NUMBER_TOKEN: &str = "$Number$";
pub(crate) const REPRESENTATION_ID_TOKEN: &str = "$RepresentationID$";

/// Parse an MPD manifest from any `io::Read` source. Thin wrapper over [`crate::parse_reader`],
/// kept here alongside the rest of the live-engine entry points.
pub fn read_mpd_from_stream<R: std::io::Read>(r: R) -> Result<crate::MPD, crate::DashMpdError> {
    crate::parse_reader(r)
}

/// Parse an MPD manifest from a file on disk.
pub fn read_mpd_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<crate::MPD, crate::DashMpdError> {
    let path = path.as_ref();
    let f = std::fs::File::open(path)
        .map_err(|e| crate::DashMpdError::Io(e, format!("opening {}", path.display())))?;
    read_mpd_from_stream(f)
}
