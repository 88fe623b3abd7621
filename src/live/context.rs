// The timeline engine: per-consumer cursor over a live SegmentTimeline.
//
// Grounded on ReaderBaseContext.go (Select/selectAdapationSets/filterRepresentation) and
// ReaderLiveMPDUpdateContext.go (moveToNext/getActivePeriod/adjustRepUpdate/livePointLocate/
// getURL/nextURL).

use chrono::{DateTime, Utc};
use url::Url;

use crate::{MPD, Period, AdaptationSet, Representation, SegmentTemplate, SegmentTimeline, BaseURL, DashMpdError};
use super::events::{event_name, StatsSink};
use super::reader::LiveSegmentTimelineReader;
use super::selector::{MatchResult, RepresentationSelector, StreamSelector};
use super::stream::{CancelToken, ChunkUrlStream};
use super::time::{adjust_url_path, parse_duration, parse_time};
use super::REPRESENTATION_ID_TOKEN;

use std::sync::Arc;

/// A fully resolved media (or initialization) segment URL, ready to be fetched.
#[derive(Debug, Clone)]
pub struct ChunkUrl {
    pub url: Url,
    pub range: Option<String>,
    pub duration: chrono::Duration,
    pub fetch_at: DateTime<Utc>,
}

/// A consumer's cursor into a live presentation: the bound AdaptationSet/Representation, and the
/// position within its SegmentTimeline.
pub trait ReaderContext: Send {
    fn next_url(&mut self) -> Result<ChunkUrl, DashMpdError>;

    /// Wraps this context as a bounded, cancellable iterator of [`ChunkUrl`]. The first item is
    /// produced eagerly (its error, if any, is returned directly); the rest stream from a
    /// background thread over a channel of capacity 10.
    fn next_urls(self: Box<Self>, cancel: CancelToken) -> Result<ChunkUrlStream, DashMpdError> {
        super::stream::spawn(self, cancel)
    }

    fn content_type(&self) -> &str;
    fn lang(&self) -> Option<&str>;
    fn codecs(&self) -> Option<&str>;
    fn upd_counter(&self) -> u64;
}

enum LivePointOutcome {
    Ok,
    NoEntry,
    FutureEntry,
}

/// The sole [`ReaderContext`] implementation, for `SegmentTemplate`+`SegmentTimeline`
/// presentations.
pub struct LiveReaderContext {
    stream_selector: StreamSelector,
    representation_selector: Arc<dyn RepresentationSelector>,
    stats_sink: Arc<dyn StatsSink>,
    id: String,

    adapt_set_id: Option<i64>,
    rep_id: Option<String>,
    content_type: String,
    lang: Option<String>,
    codecs: Option<String>,

    base_wc_time: DateTime<Utc>,
    timeline: SegmentTimeline,
    timescale: u64,
    is_number: bool,
    is_time: bool,
    init_url: Option<Url>,
    init_range: Option<String>,
    base_url: Url,

    init_url_served: bool,
    cur_s_entry: usize,
    cur_repeat: i64,
    chunk_number: u64,
    chunk_time_ticks: i64,
    elapsed_duration_ticks: i64,
    start_number: u64,

    upd_counter: u64,
}

impl LiveReaderContext {
    fn blank(reader: &LiveSegmentTimelineReader, stream_selector: StreamSelector,
             representation_selector: Arc<dyn RepresentationSelector>, stats_sink: Arc<dyn StatsSink>) -> LiveReaderContext {
        LiveReaderContext {
            stream_selector,
            representation_selector,
            stats_sink,
            id: reader.id.clone(),
            adapt_set_id: None,
            rep_id: None,
            content_type: String::new(),
            lang: None,
            codecs: None,
            base_wc_time: reader.base_time,
            timeline: SegmentTimeline { segments: Vec::new() },
            timescale: 1,
            is_number: reader.is_number,
            is_time: reader.is_time,
            init_url: None,
            init_range: None,
            base_url: reader.base_url.clone(),
            init_url_served: true,
            cur_s_entry: 0,
            cur_repeat: 0,
            chunk_number: 0,
            chunk_time_ticks: 0,
            elapsed_duration_ticks: 0,
            start_number: 0,
            upd_counter: 0,
        }
    }

    pub(crate) fn make(
        reader: &LiveSegmentTimelineReader,
        prior: Option<LiveReaderContext>,
        stream_selector: StreamSelector,
        representation_selector: Arc<dyn RepresentationSelector>,
    ) -> Result<LiveReaderContext, DashMpdError> {
        let (cur_mpd, upd_counter) = reader.check_update();
        match prior {
            None => {
                let mut ctx = LiveReaderContext::blank(reader, stream_selector, representation_selector, reader.stats_sink());
                ctx.live_point_locate(reader, &cur_mpd)?;
                ctx.upd_counter = upd_counter;
                Ok(ctx)
            }
            Some(mut ctx) => {
                let selectors_changed = ctx.stream_selector != stream_selector
                    || ctx.representation_selector.selector_id() != representation_selector.selector_id();
                if selectors_changed {
                    ctx.stream_selector = stream_selector;
                    ctx.representation_selector = representation_selector;
                    ctx.adjust_rep_update(reader, &cur_mpd)?;
                } else if ctx.upd_counter == upd_counter {
                    return Ok(ctx);
                } else {
                    ctx.adjust_rep_update(reader, &cur_mpd)?;
                }
                ctx.upd_counter = upd_counter;
                Ok(ctx)
            }
        }
    }

    fn emit(&self, name: &'static str, values: Vec<String>) {
        self.stats_sink.emit(super::events::StatsEvent {
            event_clock: Utc::now(),
            id: self.id.clone(),
            name,
            values,
        });
    }

    fn select(&self, period: &Period) -> Result<(i64, String, String, Option<String>, Option<String>), DashMpdError> {
        let total_adapts = period.adaptations.as_ref().map(|v| v.len()).unwrap_or(0);
        let Some(adapt) = select_adaptation_set(&self.stream_selector, period) else {
            self.emit(event_name::NO_ADAPT_AFTER_FILTER, vec![total_adapts.to_string()]);
            return Err(DashMpdError::NoAdaptationSet(total_adapts));
        };
        let candidates = filter_representations(&self.stream_selector, adapt);
        let Some(rep) = self.representation_selector.select(&candidates) else {
            self.emit(event_name::NO_REPRESENTATION_AFTER_FILTER, vec![candidates.len().to_string()]);
            return Err(DashMpdError::NoRepresentation(candidates.len()));
        };
        Ok((
            adapt.id.unwrap_or(0),
            rep.id.clone().unwrap_or_default(),
            adapt.contentType.clone().unwrap_or_default(),
            adapt.lang.clone(),
            rep.codecs.clone().or_else(|| adapt.codecs.clone()),
        ))
    }

    fn entry_start_time(&self) -> Result<DateTime<Utc>, DashMpdError> {
        let ticks = self.elapsed_duration_ticks + self.chunk_time_ticks;
        Ok(self.base_wc_time + ticks_to_duration(ticks, self.timescale)?)
    }

    fn get_url(&self) -> Option<crate::S> {
        let entry = self.timeline.segments.get(self.cur_s_entry)?;
        let reps = entry.r.unwrap_or(0) + 1;
        if self.cur_repeat >= reps {
            return None;
        }
        Some(entry.clone())
    }

    fn move_to_next(&mut self, wall_clock: Option<DateTime<Utc>>) -> Result<LivePointOutcome, DashMpdError> {
        // If wc sits exactly on a segment boundary and a following segment actually exists, that
        // segment's window is what owns the boundary instant (its own wc == entry_start check
        // below takes over). But wc may be beyond the last segment the timeline currently
        // describes, with nothing newer announced yet; `boundary_fallback` remembers the cursor
        // position just before such a tentative advance so we can land back there instead of
        // reporting NoEntry.
        let mut boundary_fallback: Option<(usize, i64, i64, i64, u64)> = None;
        loop {
            if self.cur_s_entry >= self.timeline.segments.len() {
                if let Some((s, r, ct, ed, cn)) = boundary_fallback {
                    self.cur_s_entry = s;
                    self.cur_repeat = r;
                    self.chunk_time_ticks = ct;
                    self.elapsed_duration_ticks = ed;
                    self.chunk_number = cn;
                    return Ok(LivePointOutcome::Ok);
                }
                if let Some(wc) = wall_clock {
                    let entry_start = self.entry_start_time()?;
                    self.emit(event_name::NO_LIVEPOINT_ENTRIES, vec![wc.to_rfc3339(), entry_start.to_rfc3339()]);
                }
                return Ok(LivePointOutcome::NoEntry);
            }
            let entry = self.timeline.segments[self.cur_s_entry].clone();
            let reps = entry.r.unwrap_or(0) + 1;
            if self.cur_repeat >= reps {
                self.cur_s_entry += 1;
                self.cur_repeat = 0;
                self.elapsed_duration_ticks += self.chunk_time_ticks;
                self.chunk_time_ticks = 0;
                continue;
            }
            if self.cur_repeat == 0 {
                let entry_t = entry.t.unwrap_or(0);
                if entry_t != 0 {
                    let old_elapsed = self.elapsed_duration_ticks;
                    if entry_t > old_elapsed {
                        self.elapsed_duration_ticks = entry_t;
                        if self.cur_s_entry != 0 {
                            self.emit(event_name::TIMELINE_GAP, vec![old_elapsed.to_string(), entry_t.to_string()]);
                        }
                    } else {
                        self.elapsed_duration_ticks = entry_t;
                    }
                }
            }
            let entry_start = self.entry_start_time()?;
            if let Some(wc) = wall_clock {
                if wc == entry_start {
                    return Ok(LivePointOutcome::Ok);
                }
                if wc < entry_start {
                    self.emit(event_name::TIMELINE_FUTURE, vec![wc.to_rfc3339(), entry_start.to_rfc3339()]);
                    return Ok(LivePointOutcome::FutureEntry);
                }
                // wc == entry_end belongs to the next segment, whose window begins there, but
                // only if that next segment actually exists yet (see boundary_fallback above).
                let entry_end = entry_start + ticks_to_duration(entry.d, self.timescale)?;
                if wc < entry_end {
                    return Ok(LivePointOutcome::Ok);
                }
                boundary_fallback = Some((self.cur_s_entry, self.cur_repeat, self.chunk_time_ticks,
                    self.elapsed_duration_ticks, self.chunk_number));
                self.cur_repeat += 1;
                self.chunk_time_ticks += entry.d;
                self.chunk_number += 1;
                continue;
            }
            self.cur_repeat += 1;
            self.chunk_time_ticks += entry.d;
            self.chunk_number += 1;
            return Ok(LivePointOutcome::Ok);
        }
    }

    fn get_active_period<'a>(&self, reader: &LiveSegmentTimelineReader, mpd: &'a MPD) -> Result<(&'a Period, DateTime<Utc>), DashMpdError> {
        let cur_wc = parse_time(mpd.publishTime.as_deref()
            .ok_or_else(|| DashMpdError::MalformedMpd(String::from("MPD@publishTime missing")))?)?;
        let mut p_swc = reader.base_time;
        for period in &mpd.periods {
            if let Some(start) = &period.start {
                if !start.is_empty() {
                    p_swc += parse_duration(start)?;
                }
            }
            if cur_wc < p_swc {
                break;
            }
            if cur_wc > p_swc {
                if let Some(dur) = period.duration {
                    let dur = chrono::Duration::from_std(dur)
                        .map_err(|e| DashMpdError::InvalidDuration(e.to_string()))?;
                    let p_ewc = p_swc + dur;
                    if p_ewc < cur_wc {
                        continue;
                    }
                }
            }
            return Ok((period, p_swc));
        }
        self.emit(event_name::NO_ACTIVE_PERIOD, vec![mpd.periods.len().to_string()]);
        Err(DashMpdError::NoActivePeriod)
    }

    fn set_init(&mut self, template: &SegmentTemplate, rp_base_url: &Url, rep_id: &str) -> Result<(), DashMpdError> {
        match template.initializationElement.as_ref().and_then(|i| i.sourceURL.as_deref()) {
            Some(source) if !source.is_empty() => {
                let substituted = source.replace(REPRESENTATION_ID_TOKEN, rep_id);
                self.init_url = Some(adjust_url_path(rp_base_url, &[], &substituted)?);
                self.init_range = template.initializationElement.as_ref().and_then(|i| i.range.clone());
                self.init_url_served = false;
            }
            _ => {
                self.init_url = None;
                self.init_range = None;
                self.init_url_served = true;
            }
        }
        Ok(())
    }

    fn live_point_locate(&mut self, reader: &LiveSegmentTimelineReader, mpd: &MPD) -> Result<(), DashMpdError> {
        let cur_wc = parse_time(mpd.publishTime.as_deref()
            .ok_or_else(|| DashMpdError::MalformedMpd(String::from("MPD@publishTime missing")))?)?;
        let (period, p_swc) = self.get_active_period(reader, mpd)?;
        let (adapt_id, rep_id, content_type, lang, codecs) = self.select(period)?;
        self.adapt_set_id = Some(adapt_id);
        self.rep_id = Some(rep_id.clone());
        self.content_type = content_type;
        self.lang = lang;
        self.codecs = codecs;

        let period_base_url = adjust_url_path(&reader.base_url, &base_url_list(&period.BaseURL), "")?;
        let mut located = false;
        for adapt in period.adaptations.iter().flatten() {
            if adapt.id != Some(adapt_id) {
                continue;
            }
            let adapt_base_url = adjust_url_path(&period_base_url, &base_url_list(&adapt.BaseURL), "")?;
            let Some(template) = &adapt.SegmentTemplate else {
                return Err(DashMpdError::MalformedMpd(format!("AdaptationSet({adapt_id}) has no SegmentTemplate")));
            };
            for rep in adapt.representations.iter().flatten() {
                if rep.id.as_deref() != Some(rep_id.as_str()) {
                    continue;
                }
                let rp_base_url = adjust_url_path(&adapt_base_url, &base_url_list(&rep.BaseURL), "")?;
                let timescale = template.timescale
                    .ok_or_else(|| DashMpdError::MalformedMpd(String::from("SegmentTemplate@timescale missing")))?;
                self.timescale = timescale;
                self.base_wc_time = compute_base_wc_time(p_swc, rep, template, timescale)?;
                self.timeline = template.SegmentTimeline.clone().unwrap_or(SegmentTimeline { segments: Vec::new() });
                self.is_number = reader.is_number;
                self.is_time = reader.is_time;
                self.set_init(template, &rp_base_url, &rep_id)?;
                self.base_url = build_media_url(template, &rp_base_url, &rep_id)?;
                self.cur_s_entry = 0;
                self.cur_repeat = 0;
                self.chunk_number = 0;
                self.chunk_time_ticks = 0;
                self.elapsed_duration_ticks = 0;
                self.start_number = template.startNumber.unwrap_or(0);
                located = true;
                break;
            }
            if located {
                break;
            }
        }
        if !located {
            return Err(DashMpdError::NoRepresentation(0));
        }
        match self.move_to_next(Some(cur_wc))? {
            LivePointOutcome::Ok => Ok(()),
            LivePointOutcome::NoEntry => Err(DashMpdError::NoLivePointEntries),
            LivePointOutcome::FutureEntry => Err(DashMpdError::LivePointInFuture),
        }
    }

    fn adjust_rep_update(&mut self, reader: &LiveSegmentTimelineReader, mpd: &MPD) -> Result<(), DashMpdError> {
        let cur_wc = parse_time(mpd.publishTime.as_deref()
            .ok_or_else(|| DashMpdError::MalformedMpd(String::from("MPD@publishTime missing")))?)?;
        let (period, p_swc) = self.get_active_period(reader, mpd)?;
        let Some(adapt_id) = self.adapt_set_id else {
            return self.live_point_locate(reader, mpd);
        };
        let Some(rep_id) = self.rep_id.clone() else {
            return self.live_point_locate(reader, mpd);
        };

        let period_base_url = adjust_url_path(&reader.base_url, &base_url_list(&period.BaseURL), "")?;
        for adapt in period.adaptations.iter().flatten() {
            if adapt.id != Some(adapt_id) {
                continue;
            }
            let adapt_base_url = adjust_url_path(&period_base_url, &base_url_list(&adapt.BaseURL), "")?;
            let Some(template) = &adapt.SegmentTemplate else {
                return Err(DashMpdError::MalformedMpd(format!("AdaptationSet({adapt_id}) has no SegmentTemplate")));
            };
            for rep in adapt.representations.iter().flatten() {
                if rep.id.as_deref() != Some(rep_id.as_str()) {
                    continue;
                }
                let rp_base_url = adjust_url_path(&adapt_base_url, &base_url_list(&rep.BaseURL), "")?;
                let timescale = template.timescale
                    .ok_or_else(|| DashMpdError::MalformedMpd(String::from("SegmentTemplate@timescale missing")))?;
                let base_wc_time = compute_base_wc_time(p_swc, rep, template, timescale)?;
                if base_wc_time != self.base_wc_time {
                    return Err(DashMpdError::BaseTimeMismatch);
                }
                let old_entry_start = self.entry_start_time()?;

                self.timescale = timescale;
                self.set_init(template, &rp_base_url, &rep_id)?;
                self.base_url = build_media_url(template, &rp_base_url, &rep_id)?;
                self.timeline = template.SegmentTimeline.clone().unwrap_or(SegmentTimeline { segments: Vec::new() });
                self.cur_s_entry = 0;
                self.cur_repeat = 0;
                self.chunk_time_ticks = 0;
                self.start_number = template.startNumber.unwrap_or(0);

                let target = std::cmp::max(cur_wc, old_entry_start + chrono::Duration::microseconds(1));
                match self.move_to_next(Some(target))? {
                    LivePointOutcome::Ok | LivePointOutcome::NoEntry | LivePointOutcome::FutureEntry => {}
                }
                return Ok(());
            }
        }
        Err(DashMpdError::NoRepresentation(0))
    }
}

impl ReaderContext for LiveReaderContext {
    fn next_url(&mut self) -> Result<ChunkUrl, DashMpdError> {
        if !self.init_url_served {
            self.init_url_served = true;
            let url = self.init_url.clone().unwrap_or_else(|| self.base_url.clone());
            return Ok(ChunkUrl {
                url,
                range: self.init_range.clone(),
                duration: chrono::Duration::zero(),
                fetch_at: self.base_wc_time,
            });
        }
        let entry = self.get_url().ok_or(DashMpdError::TimelineExhausted)?;
        let duration = ticks_to_duration(entry.d, self.timescale)?;
        let fetch_at = self.entry_start_time()?;
        let mut url = self.base_url.clone();
        if self.is_number {
            let number = self.chunk_number + self.start_number;
            url = substitute_path_token(&url, super::NUMBER_TOKEN, &number.to_string());
        }
        if self.is_time {
            let ticks = self.elapsed_duration_ticks + self.chunk_time_ticks;
            url = substitute_path_token(&url, super::TIME_TOKEN, &ticks.to_string());
        }
        self.move_to_next(None)?;
        Ok(ChunkUrl { url, range: None, duration, fetch_at })
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn lang(&self) -> Option<&str> {
        self.lang.as_deref()
    }

    fn codecs(&self) -> Option<&str> {
        self.codecs.as_deref()
    }

    fn upd_counter(&self) -> u64 {
        self.upd_counter
    }
}

fn base_url_list(b: &Option<BaseURL>) -> Vec<String> {
    b.iter().map(|x| x.base.clone()).collect()
}

fn ticks_to_duration(ticks: i64, timescale: u64) -> Result<chrono::Duration, DashMpdError> {
    if timescale == 0 {
        return Err(DashMpdError::MalformedMpd(String::from("SegmentTemplate@timescale is zero")));
    }
    let micros = ticks.checked_mul(1_000_000)
        .ok_or_else(|| DashMpdError::MalformedMpd(String::from("tick arithmetic overflow")))?
        / timescale as i64;
    Ok(chrono::Duration::microseconds(micros))
}

fn compute_base_wc_time(p_swc: DateTime<Utc>, rep: &Representation, template: &SegmentTemplate, timescale: u64) -> Result<DateTime<Utc>, DashMpdError> {
    let mut base_wc_time = p_swc;
    if let Some(pto) = rep.SegmentBase.as_ref().and_then(|sb| sb.presentationTimeOffset) {
        if pto > 0 {
            base_wc_time -= ticks_to_duration(pto as i64, timescale)?;
        }
    }
    if let Some(pto) = template.presentationTimeOffset {
        if pto > 0 {
            base_wc_time -= ticks_to_duration(pto as i64, timescale)?;
        }
    }
    if let Some(ato) = template.availabilityTimeOffset {
        if ato > 0.0 {
            let micros = (ato * 1_000_000.0) as i64;
            base_wc_time += chrono::Duration::microseconds(micros);
        }
    }
    Ok(base_wc_time)
}

fn build_media_url(template: &SegmentTemplate, rp_base_url: &Url, rep_id: &str) -> Result<Url, DashMpdError> {
    let media = template.media.as_deref().unwrap_or("");
    let substituted = media.replace(REPRESENTATION_ID_TOKEN, rep_id);
    adjust_url_path(rp_base_url, &[], &substituted)
}

fn substitute_path_token(u: &Url, token: &str, value: &str) -> Url {
    let mut u = u.clone();
    let new_path = u.path().replace(token, value);
    u.set_path(&new_path);
    u
}

fn select_adaptation_set<'a>(stream_selector: &StreamSelector, period: &'a Period) -> Option<&'a AdaptationSet> {
    let mut best: Option<(&AdaptationSet, MatchResult)> = None;
    for adapt in period.adaptations.iter().flatten() {
        if adapt.contentType.as_deref().unwrap_or("").is_empty() {
            continue;
        }
        let m = stream_selector.is_match(adapt);
        if m == MatchResult::NotFound {
            continue;
        }
        match &best {
            None => best = Some((adapt, m)),
            Some((_, best_m)) if m > *best_m => best = Some((adapt, m)),
            _ => {}
        }
    }
    best.map(|(a, _)| a)
}

fn filter_representations<'a>(stream_selector: &StreamSelector, adapt: &'a AdaptationSet) -> Vec<&'a Representation> {
    let mut found = Vec::new();
    let mut partial = Vec::new();
    let mut dont_care = Vec::new();
    for rep in adapt.representations.iter().flatten() {
        match stream_selector.is_match_representation(rep) {
            MatchResult::Found => found.push(rep),
            MatchResult::Partial => partial.push(rep),
            MatchResult::DontCare => dont_care.push(rep),
            MatchResult::NotFound => {}
        }
    }
    found.extend(partial);
    found.extend(dont_care);
    found
}
