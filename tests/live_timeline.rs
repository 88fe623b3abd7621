// End-to-end tests driving a Reader/ReaderContext against synthetic, in-memory MPDs.
// No network access, unlike tests/dynamic.rs/tests/selecting.rs in the upstream crate this one
// descends from.

mod common;

use std::sync::{Arc, Mutex};

use chrono::Utc;
use pretty_assertions::assert_eq;

use dash_mpd_live::DashMpdError;
use dash_mpd_live::live::{
    CancelToken, MaxBandwidthSelector, NullStatsSink, Reader, ReaderContext, ReaderFactory,
    StatsEvent, StatsSink, StreamSelector,
};

fn mpd_xml(timeline_s: &str, publish_time: &str, ast: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<MPD type="dynamic" profiles="urn:mpeg:dash:profile:isoff-live:2011"
     publishTime="{publish_time}" availabilityStartTime="{ast}" minimumUpdatePeriod="PT2S">
  <Period id="0" start="PT0S">
    <AdaptationSet id="0" contentType="video" segmentAlignment="true">
      <SegmentTemplate media="http://h/v/chunk-$Number$.m4s" timescale="100" startNumber="1">
        <SegmentTimeline>{timeline_s}</SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v0" bandwidth="500000"/>
    </AdaptationSet>
  </Period>
</MPD>"#
    )
}

#[derive(Default)]
struct CapturingStatsSink(Mutex<Vec<StatsEvent>>);

impl StatsSink for CapturingStatsSink {
    fn emit(&self, event: StatsEvent) {
        self.0.lock().unwrap().push(event);
    }
}

// S1: live-point locate mid-timeline, plus ChunkUrl.duration/fetch_at per property 2.
#[test]
fn s1_live_point_locate_mid_timeline() {
    common::setup_logging();
    let xml = mpd_xml(r#"<S t="0" d="200" r="4"/>"#, "2020-01-01T00:00:04Z", "2020-01-01T00:00:00Z");
    let mpd = dash_mpd_live::parse(&xml).unwrap();
    let factory = ReaderFactory::new();
    let reader = factory.get_reader("s1", "http://h/live.mpd", &mpd).unwrap();

    let mut ctx = reader.make_context(None, StreamSelector::new("video"), Arc::new(MaxBandwidthSelector)).unwrap();
    let chunk = ctx.next_url().unwrap();
    assert_eq!(chunk.url.as_str(), "http://h/v/chunk-3.m4s");
    assert_eq!(chunk.duration, chrono::Duration::seconds(2));
    assert_eq!(chunk.fetch_at, "2020-01-01T00:00:04Z".parse::<chrono::DateTime<Utc>>().unwrap());
}

// S2: cursor rebases across a manifest refresh that appends a new SegmentTimeline entry.
#[test]
fn s2_cursor_rebases_across_refresh() {
    common::setup_logging();
    let ast = "2020-01-01T00:00:00Z";
    let xml1 = mpd_xml(r#"<S t="0" d="200" r="4"/>"#, "2020-01-01T00:00:00Z", ast);
    let mpd1 = dash_mpd_live::parse(&xml1).unwrap();
    let factory = ReaderFactory::new();
    let reader = factory.get_reader("s2", "http://h/live.mpd", &mpd1).unwrap();

    let mut ctx = reader.make_context(None, StreamSelector::new("video"), Arc::new(MaxBandwidthSelector)).unwrap();
    // Drain all 5 segments of the initial timeline (r=4 means 5 total S entries worth of chunks).
    let mut last_ok = None;
    loop {
        match ctx.next_url() {
            Ok(c) => last_ok = Some(c),
            Err(DashMpdError::TimelineExhausted) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(last_ok.unwrap().url.as_str().ends_with("chunk-5.m4s"));

    let xml2 = mpd_xml(r#"<S t="1000" d="200" r="2"/>"#, "2020-01-01T00:00:06Z", ast);
    let mpd2 = dash_mpd_live::parse(&xml2).unwrap();
    reader.update(&mpd2).unwrap();

    let mut ctx2 = reader.make_context(Some(ctx), StreamSelector::new("video"), Arc::new(MaxBandwidthSelector)).unwrap();
    let chunk = ctx2.next_url().unwrap();
    assert_eq!(chunk.url.as_str(), "http://h/v/chunk-6.m4s");
}

// S3: $Time$-based addressing yields a URL containing the tick position.
#[test]
fn s3_time_based_addressing() {
    common::setup_logging();
    let xml = format!(
        r#"<?xml version="1.0"?>
<MPD type="dynamic" profiles="urn:mpeg:dash:profile:isoff-live:2011"
     publishTime="2020-01-01T00:00:01Z" availabilityStartTime="2020-01-01T00:00:00Z" minimumUpdatePeriod="PT2S">
  <Period id="0" start="PT0S">
    <AdaptationSet id="0" contentType="video" segmentAlignment="true">
      <SegmentTemplate media="http://h/v/chunk-$Time$.m4s" timescale="90000" startNumber="1">
        <SegmentTimeline><S t="0" d="90000" r="0"/></SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v0" bandwidth="500000"/>
    </AdaptationSet>
  </Period>
</MPD>"#
    );
    let mpd = dash_mpd_live::parse(&xml).unwrap();
    let factory = ReaderFactory::new();
    let reader = factory.get_reader("s3", "http://h/live.mpd", &mpd).unwrap();
    let mut ctx = reader.make_context(None, StreamSelector::new("video"), Arc::new(MaxBandwidthSelector)).unwrap();
    let chunk = ctx.next_url().unwrap();
    assert_eq!(chunk.url.as_str(), "http://h/v/chunk-0.m4s");
}

// S4: live-point locate before the first Period starts reports NoActivePeriod and records the event.
#[test]
fn s4_no_active_period_before_first_period_start() {
    common::setup_logging();
    let xml = mpd_xml(r#"<S t="0" d="200" r="4"/>"#, "2019-01-01T00:00:00Z", "2020-01-01T00:00:00Z");
    let mpd = dash_mpd_live::parse(&xml).unwrap();
    let factory = ReaderFactory::new();
    let reader = factory.get_reader("s4", "http://h/live.mpd", &mpd);
    // publishTime before availabilityStartTime + Period@start is rejected during validation or
    // during the initial live-point locate performed by get_reader's own reader.update call;
    // either way no usable reader/context results.
    match reader {
        Err(e) => assert!(matches!(e,
            DashMpdError::NoActivePeriod | DashMpdError::LivePointInFuture | DashMpdError::MalformedMpd(_))),
        Ok(reader) => {
            let sink = Arc::new(CapturingStatsSink::default());
            reader.set_stats_sink(sink.clone());
            let err = reader.make_context(None, StreamSelector::new("video"), Arc::new(MaxBandwidthSelector)).unwrap_err();
            assert!(matches!(err, DashMpdError::NoActivePeriod | DashMpdError::LivePointInFuture));
            let events = sink.0.lock().unwrap();
            assert!(events.iter().any(|e| e.name == "MPD_NO_ACTIVE_PERIOD"));
        }
    }
}

// S6: resubmitting an MPD with an unchanged PublishTime is a no-op.
#[test]
fn s6_update_is_noop_on_unchanged_publish_time() {
    common::setup_logging();
    let xml = mpd_xml(r#"<S t="0" d="200" r="4"/>"#, "2020-01-01T00:00:04Z", "2020-01-01T00:00:00Z");
    let mpd = dash_mpd_live::parse(&xml).unwrap();
    let factory = ReaderFactory::new();
    let reader = factory.get_reader("s6", "http://h/live.mpd", &mpd).unwrap();
    let (_, counter_before) = reader.check_update();

    let (advanced, new_period) = reader.update(&mpd).unwrap();
    assert!(!advanced);
    assert!(!new_period);
    let (_, counter_after) = reader.check_update();
    assert_eq!(counter_before, counter_after);
}

// Property 3: $Number$ substitutions form a strictly increasing sequence starting at StartNumber.
#[test]
fn number_sequence_strictly_increasing_from_start_number() {
    common::setup_logging();
    let xml = mpd_xml(r#"<S t="0" d="100" r="3"/>"#, "2020-01-01T00:00:00Z", "2020-01-01T00:00:00Z");
    let mpd = dash_mpd_live::parse(&xml).unwrap();
    let factory = ReaderFactory::new();
    let reader = factory.get_reader("num", "http://h/live.mpd", &mpd).unwrap();
    let mut ctx = reader.make_context(None, StreamSelector::new("video"), Arc::new(MaxBandwidthSelector)).unwrap();

    let mut numbers = Vec::new();
    loop {
        match ctx.next_url() {
            Ok(c) => {
                let n: u64 = c.url.path().rsplit('-').next().unwrap().trim_end_matches(".m4s").parse().unwrap();
                numbers.push(n);
            }
            Err(DashMpdError::TimelineExhausted) => break,
            Err(e) => panic!("{e}"),
        }
    }
    assert_eq!(numbers.first(), Some(&1));
    for w in numbers.windows(2) {
        assert!(w[1] > w[0]);
    }
}

// Property 5 / 8: after exhaustion the context yields no further URLs, and next_urls cancellation
// terminates the stream promptly.
#[test]
fn stream_cancellation_terminates_promptly() {
    common::setup_logging();
    let xml = mpd_xml(r#"<S t="0" d="100" r="500"/>"#, "2020-01-01T00:00:00Z", "2020-01-01T00:00:00Z");
    let mpd = dash_mpd_live::parse(&xml).unwrap();
    let factory = ReaderFactory::new();
    let reader = factory.get_reader("cancel", "http://h/live.mpd", &mpd).unwrap();
    let ctx = reader.make_context(None, StreamSelector::new("video"), Arc::new(MaxBandwidthSelector)).unwrap();

    let cancel = CancelToken::new();
    let mut stream = Box::new(ctx).next_urls(cancel.clone()).unwrap();
    assert!(stream.next().is_some());
    cancel.cancel();
    drop(stream);
}

#[test]
fn blank_stats_sink_accepts_events_silently() {
    let sink: Arc<dyn StatsSink> = Arc::new(NullStatsSink);
    sink.emit(StatsEvent {
        event_clock: Utc::now(),
        id: "x".to_string(),
        name: "MPD_NO_ACTIVE_PERIOD",
        values: vec![],
    });
}
