// The Reader: owns the current MPD, serializes updates, exposes a monotonic update counter.
//
// Grounded on ReaderBase.go (readerBaseExtn: checkUpdate/Update) and ReaderIf.go (Reader
// interface). Concurrency switched from Go's sync.RWMutex to std::sync::RwLock guarding an
// Arc<MPD> snapshot, matching this crate's synchronous (non-async) style.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::trace;
use url::Url;

use crate::{MPD, DashMpdError};
use super::context::LiveReaderContext;
use super::events::StatsSink;
use super::selector::{StreamSelector, RepresentationSelector};
use super::time::parse_time;

/// Holds the current (and previous) MPD for one presentation, and arbitrates between the single
/// writer (`update`) and any number of readers (`check_update`, `make_context`).
pub trait Reader: Send + Sync {
    /// Feeds a freshly fetched MPD to the reader.
    ///
    /// Returns `(publish_advanced, new_period)`. `new_period` detection is reserved (always
    /// `false` for now) pending a defined rule for what "a new Period appeared" means across
    /// refreshes; see the discussion on this in `DESIGN.md`.
    fn update(&self, new_mpd: &MPD) -> Result<(bool, bool), DashMpdError>;

    /// Returns the current MPD snapshot and the update counter it was current as of.
    fn check_update(&self) -> (Arc<MPD>, u64);

    /// Installs a sink for structured events emitted while locating the live point or walking the
    /// timeline. Replaces any previously installed sink.
    fn set_stats_sink(&self, sink: Arc<dyn StatsSink>);

    /// Creates a fresh [`LiveReaderContext`], or re-bases `prior` against the current MPD if one
    /// is supplied.
    fn make_context(
        &self,
        prior: Option<LiveReaderContext>,
        stream_selector: StreamSelector,
        representation_selector: Arc<dyn RepresentationSelector>,
    ) -> Result<LiveReaderContext, DashMpdError>;
}

struct Inner {
    current: Option<Arc<MPD>>,
    last: Option<Arc<MPD>>,
    upd_counter: u64,
}

/// The sole [`Reader`] implementation in this crate, for live presentations whose AdaptationSets
/// use `SegmentTemplate` with `SegmentTimeline`.
pub struct LiveSegmentTimelineReader {
    pub(crate) id: String,
    pub(crate) base_time: DateTime<Utc>,
    pub(crate) base_url: Url,
    pub(crate) is_number: bool,
    pub(crate) is_time: bool,
    state: RwLock<Inner>,
    stats_sink: RwLock<Arc<dyn StatsSink>>,
}

impl LiveSegmentTimelineReader {
    pub(crate) fn new(id: &str, base_time: DateTime<Utc>, base_url: Url, is_number: bool, is_time: bool) -> LiveSegmentTimelineReader {
        LiveSegmentTimelineReader {
            id: id.to_string(),
            base_time,
            base_url,
            is_number,
            is_time,
            state: RwLock::new(Inner { current: None, last: None, upd_counter: 0 }),
            stats_sink: RwLock::new(Arc::new(super::events::NullStatsSink)),
        }
    }

    pub(crate) fn stats_sink(&self) -> Arc<dyn StatsSink> {
        self.stats_sink.read().unwrap().clone()
    }
}

impl Reader for LiveSegmentTimelineReader {
    #[tracing::instrument(level = "trace", skip(self, new_mpd), fields(id = %self.id))]
    fn update(&self, new_mpd: &MPD) -> Result<(bool, bool), DashMpdError> {
        let Some(publish_time_str) = &new_mpd.publishTime else {
            return Err(DashMpdError::MalformedMpd(String::from("MPD@publishTime MUST be present")));
        };
        let publish_time = parse_time(publish_time_str)?;

        let mut state = self.state.write().unwrap();
        if let Some(current) = &state.current {
            let current_publish_time = parse_time(current.publishTime.as_deref().unwrap())?;
            if current_publish_time == publish_time {
                trace!("update: publishTime unchanged, no-op");
                return Ok((false, false));
            }
            if current_publish_time > publish_time {
                return Err(DashMpdError::PublishTimeRegressed);
            }
        }
        state.last = state.current.take();
        state.current = Some(Arc::new(new_mpd.clone()));
        state.upd_counter += 1;
        // Detecting a genuinely new Period across refreshes is left unimplemented: see
        // DESIGN.md's Open Question decisions.
        Ok((true, false))
    }

    fn check_update(&self) -> (Arc<MPD>, u64) {
        let state = self.state.read().unwrap();
        (state.current.clone().expect("Reader::update must be called before check_update"), state.upd_counter)
    }

    fn set_stats_sink(&self, sink: Arc<dyn StatsSink>) {
        *self.stats_sink.write().unwrap() = sink;
    }

    fn make_context(
        &self,
        prior: Option<LiveReaderContext>,
        stream_selector: StreamSelector,
        representation_selector: Arc<dyn RepresentationSelector>,
    ) -> Result<LiveReaderContext, DashMpdError> {
        LiveReaderContext::make(self, prior, stream_selector, representation_selector)
    }
}
