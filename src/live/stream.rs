// Bounded, cancellable URL stream adapter.
//
// Grounded on ReaderBaseContext.go's getURLs, fixing its apparent truncation to two buffered
// chunks (a bare `select` with no surrounding loop) into a producer that runs until
// cancellation, end of stream, or an error, consistent with how a `range` over a Go channel is
// meant to behave.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::DashMpdError;
use super::context::{ChunkUrl, ReaderContext};

const CHANNEL_CAPACITY: usize = 10;

/// A cheap, cloneable handle used to ask a running [`ChunkUrlStream`]'s producer thread to stop.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A finite, bounded iterator of [`ChunkUrl`]s backed by a background thread that drives a
/// [`ReaderContext`] until cancellation, `TimelineExhausted`, or any other error.
pub struct ChunkUrlStream {
    receiver: Option<Receiver<Result<ChunkUrl, DashMpdError>>>,
    handle: Option<JoinHandle<()>>,
    cancel: CancelToken,
}

impl Iterator for ChunkUrlStream {
    type Item = Result<ChunkUrl, DashMpdError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.as_ref()?.recv().ok()
    }
}

impl Drop for ChunkUrlStream {
    fn drop(&mut self) {
        self.cancel.cancel();
        // Drop the receiver first so a producer blocked on a full channel unblocks immediately
        // with a send error, rather than the join below waiting on it forever.
        self.receiver.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub(crate) fn spawn(mut ctx: Box<dyn ReaderContext>, cancel: CancelToken) -> Result<ChunkUrlStream, DashMpdError> {
    let first = ctx.next_url()?;
    let (tx, rx) = mpsc::sync_channel(CHANNEL_CAPACITY);
    // The eager first item always fits: the channel was just created with spare capacity.
    let _ = tx.send(Ok(first));

    let thread_cancel = cancel.clone();
    let handle = thread::spawn(move || {
        loop {
            if thread_cancel.is_cancelled() {
                return;
            }
            match ctx.next_url() {
                Ok(chunk) => {
                    if tx.send(Ok(chunk)).is_err() {
                        return;
                    }
                }
                Err(DashMpdError::TimelineExhausted) => return,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    return;
                }
            }
        }
    });

    Ok(ChunkUrlStream { receiver: Some(rx), handle: Some(handle), cancel })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::selector::{MaxBandwidthSelector, StreamSelector};
    use crate::live::reader::{LiveSegmentTimelineReader, Reader};
    use crate::live::context::LiveReaderContext;
    use chrono::Utc;
    use url::Url;
    use std::sync::Arc as StdArc;

    fn mpd_with(timeline_s: &str) -> crate::MPD {
        let xml = format!(r#"<?xml version="1.0"?>
<MPD type="dynamic" profiles="urn:mpeg:dash:profile:isoff-live:2011"
     publishTime="2024-01-01T00:00:00Z" availabilityStartTime="2024-01-01T00:00:00Z" minimumUpdatePeriod="PT2S">
  <Period id="0">
    <AdaptationSet id="0" contentType="video" segmentAlignment="true">
      <SegmentTemplate media="chunk-$Number$.m4s" timescale="100" startNumber="1">
        <SegmentTimeline>{timeline_s}</SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v0" bandwidth="500000"/>
    </AdaptationSet>
  </Period>
</MPD>"#);
        crate::parse(&xml).unwrap()
    }

    #[test]
    fn stream_yields_every_buffered_chunk_until_exhaustion() {
        let m = mpd_with(r#"<S t="0" d="100" r="3"/>"#);
        let reader = LiveSegmentTimelineReader::new(
            "r1", Utc::now(), Url::parse("http://h/live.mpd").unwrap(), true, false);
        reader.update(&m).unwrap();
        let ctx = LiveReaderContext::make(&reader, None, StreamSelector::new("video"), StdArc::new(MaxBandwidthSelector)).unwrap();
        let stream = Box::new(ctx).next_urls(CancelToken::new()).unwrap();
        let chunks: Vec<_> = stream.collect();
        // 4 media segments, no init URL configured in this fixture.
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.is_ok()));
    }

    #[test]
    fn cancel_stops_the_producer() {
        let m = mpd_with(r#"<S t="0" d="100" r="200"/>"#);
        let reader = LiveSegmentTimelineReader::new(
            "r1", Utc::now(), Url::parse("http://h/live.mpd").unwrap(), true, false);
        reader.update(&m).unwrap();
        let ctx = LiveReaderContext::make(&reader, None, StreamSelector::new("video"), StdArc::new(MaxBandwidthSelector)).unwrap();
        let cancel = CancelToken::new();
        let mut stream = Box::new(ctx).next_urls(cancel.clone()).unwrap();
        assert!(stream.next().is_some());
        cancel.cancel();
        drop(stream);
    }
}
