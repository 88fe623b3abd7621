// MPD validation / classification and Reader construction.
//
// Grounded on ReaderFactory.go (validate/validateDynamicMpd/validateDynamicAdaptSet/
// validateStatic/makeDASHReader).

use url::Url;

use crate::{MPD, Period, AdaptationSet, DashMpdError};
use super::time::{parse_duration, parse_time, is_present_duration, is_present_time, adjust_url_path};
use super::reader::{LiveSegmentTimelineReader, Reader};
use super::{LIVE_PROFILE, ON_DEMAND_PROFILE, TIME_TOKEN, NUMBER_TOKEN};

/// Validates a parsed MPD and, if it describes a live `SegmentTemplate`+`SegmentTimeline`
/// presentation, constructs a [`super::Reader`] for it.
///
/// Any other combination (static/on-demand, live without SegmentTimeline, mixed `$Time$`/
/// `$Number$` usage, etc.) is rejected — this factory drives exactly one MPD variant.
#[derive(Debug, Default)]
pub struct ReaderFactory;

impl ReaderFactory {
    pub fn new() -> ReaderFactory {
        ReaderFactory
    }

    /// `mpd_url` is the URL the manifest was retrieved from (used to resolve relative BaseURLs).
    #[tracing::instrument(level = "trace", skip(self, mpd))]
    pub fn get_reader(&self, id: &str, mpd_url: &str, mpd: &MPD) -> Result<LiveSegmentTimelineReader, DashMpdError> {
        let parsed = Url::parse(mpd_url)
            .map_err(|e| DashMpdError::InvalidUrl(format!("{mpd_url}: {e}")))?;
        let base_url_strs: Vec<String> = mpd.base_urls.iter()
            .flatten()
            .map(|b| b.base.clone())
            .collect();
        let base_url = adjust_url_path(&parsed, &base_url_strs, "./")?;

        validate_mpd_duration_fields(mpd)?;
        if !is_present_time(&mpd.publishTime) {
            return Err(DashMpdError::MalformedMpd(String::from("MPD@publishTime MUST be present")));
        }

        match mpd.mpdtype.as_deref() {
            Some("static") => {
                validate_static(mpd)?;
                Err(DashMpdError::UnsupportedVariant(String::from("static (on-demand) MPD is not driven by this reader")))
            }
            Some("dynamic") => {
                let (is_time_based, ast) = validate_dynamic_mpd(mpd)?;
                let reader = LiveSegmentTimelineReader::new(id, ast, base_url, !is_time_based, is_time_based);
                reader.update(mpd)?;
                Ok(reader)
            }
            _ => Err(DashMpdError::MalformedMpd(String::from("MPD@type MUST be \"static\" or \"dynamic\""))),
        }
    }
}

fn validate_mpd_duration_fields(mpd: &MPD) -> Result<(), DashMpdError> {
    for field in [&mpd.minBufferTime, &mpd.timeShiftBufferDepth, &mpd.suggestedPresentationDelay,
                  &mpd.minimumUpdatePeriod] {
        if let Some(v) = field {
            parse_duration(v).map_err(|e| DashMpdError::MalformedMpd(format!("invalid duration field ({v}): {e}")))?;
        }
    }
    for period in &mpd.periods {
        validate_period_duration_fields(period)?;
    }
    Ok(())
}

fn validate_period_duration_fields(period: &Period) -> Result<(), DashMpdError> {
    if let Some(start) = &period.start {
        parse_duration(start)
            .map_err(|e| DashMpdError::MalformedMpd(format!("Period@start ({start}) invalid: {e}")))?;
    }
    Ok(())
}

fn validate_static(mpd: &MPD) -> Result<(), DashMpdError> {
    match &mpd.profiles {
        Some(p) if p.contains(ON_DEMAND_PROFILE) => Ok(()),
        _ => Err(DashMpdError::MalformedMpd(format!(
            "MPD@profiles MUST include {ON_DEMAND_PROFILE} for MPD@type=\"static\""))),
    }
}

// Returns (is_time_based, availability_start_time).
fn validate_dynamic_mpd(mpd: &MPD) -> Result<(bool, chrono::DateTime<chrono::Utc>), DashMpdError> {
    match &mpd.profiles {
        Some(p) if p.contains(LIVE_PROFILE) => {}
        other => return Err(DashMpdError::MalformedMpd(format!(
            "MPD@profiles ({other:?}) MUST include {LIVE_PROFILE} for MPD@type=\"dynamic\""))),
    }
    if !is_present_time(&mpd.availabilityStartTime) {
        return Err(DashMpdError::MalformedMpd(String::from("MPD@availabilityStartTime MUST be present")));
    }
    let ast = parse_time(mpd.availabilityStartTime.as_deref().unwrap())?;
    if mpd.periods.is_empty() {
        return Err(DashMpdError::MalformedMpd(String::from("MPD MUST contain at least one Period")));
    }
    let mup_present = is_present_duration(&mpd.minimumUpdatePeriod);

    let mut is_segment_timeline: Option<bool> = None;
    let mut is_time_based: Option<bool> = None;
    let mut prev_had_duration = true; // the first Period needs no predecessor

    let num_periods = mpd.periods.len();
    for (i, period) in mpd.periods.iter().enumerate() {
        if !is_present_duration(&period.start) {
            if i > 0 && !prev_had_duration {
                return Err(DashMpdError::MalformedMpd(format!(
                    "Period[{i}]@start MUST be present: the previous Period has no @duration to derive it from")));
            }
        }
        // Period.duration is already parsed to a std::time::Duration by serde; presence is what
        // matters here, not its formatted text.
        prev_had_duration = period.duration.is_some();

        if i == num_periods - 1 && period.duration.is_none() && !mup_present
            && mpd.mediaPresentationDuration.is_none() {
            return Err(DashMpdError::MalformedMpd(String::from(
                "the last Period MUST have @duration, or MPD MUST have @mediaPresentationDuration, when no @minimumUpdatePeriod is present")));
        }

        for adapt in period.adaptations.iter().flatten() {
            validate_dynamic_adapt_set(adapt, &mut is_segment_timeline, &mut is_time_based)?;
        }
    }
    Ok((is_time_based.unwrap_or(false), ast))
}

fn validate_dynamic_adapt_set(
    adapt: &AdaptationSet,
    is_segment_timeline: &mut Option<bool>,
    is_time_based: &mut Option<bool>,
) -> Result<(), DashMpdError> {
    if adapt.segmentAlignment != Some(true) {
        return Err(DashMpdError::MalformedMpd(format!(
            "AdaptationSet({:?})@segmentAlignment MUST be \"true\"", adapt.id)));
    }
    let Some(template) = &adapt.SegmentTemplate else {
        return Err(DashMpdError::MalformedMpd(format!(
            "AdaptationSet({:?}) MUST have a SegmentTemplate", adapt.id)));
    };
    let media = template.media.as_deref().unwrap_or("");
    if media.is_empty() {
        return Err(DashMpdError::MalformedMpd(format!(
            "AdaptationSet({:?})/SegmentTemplate@media MUST be present", adapt.id)));
    }
    let time_based = media.contains(TIME_TOKEN);
    let number_based = media.contains(NUMBER_TOKEN);
    if time_based == number_based {
        return Err(DashMpdError::MalformedMpd(format!(
            "AdaptationSet({:?})/SegmentTemplate@media ({media}) MUST contain exactly one of {TIME_TOKEN} or {NUMBER_TOKEN}",
            adapt.id)));
    }
    match is_time_based {
        None => *is_time_based = Some(time_based),
        Some(existing) if *existing != time_based => {
            return Err(DashMpdError::MalformedMpd(String::from(
                "different AdaptationSets use different URL template patterns, not supported")));
        }
        _ => {}
    }

    let segment_timeline_present = template.SegmentTimeline.as_ref().is_some_and(|t| !t.segments.is_empty());
    let duration_present = template.duration.is_some();
    let timescale_present = template.timescale.is_some();
    if segment_timeline_present && duration_present {
        return Err(DashMpdError::MalformedMpd(format!(
            "AdaptationSet({:?}): only one of SegmentTemplate@duration or SegmentTimeline may be present", adapt.id)));
    }
    if segment_timeline_present && !timescale_present {
        return Err(DashMpdError::MalformedMpd(format!(
            "AdaptationSet({:?})/SegmentTemplate@timescale MUST be present with SegmentTimeline", adapt.id)));
    }
    match is_segment_timeline {
        None => *is_segment_timeline = Some(segment_timeline_present),
        Some(existing) if *existing != segment_timeline_present => {
            return Err(DashMpdError::MalformedMpd(String::from(
                "different AdaptationSets use different segment addressing schemes, not supported")));
        }
        _ => {}
    }

    for rep in adapt.representations.iter().flatten() {
        if rep.id.as_deref().unwrap_or("").is_empty() {
            return Err(DashMpdError::MalformedMpd(format!(
                "Representation in AdaptationSet({:?}) MUST have a non-empty @id", adapt.id)));
        }
        if !rep.bandwidth.is_some_and(|b| b > 0) {
            return Err(DashMpdError::MalformedMpd(format!(
                "Representation({:?}) MUST have @bandwidth > 0", rep.id)));
        }
    }
    if !segment_timeline_present {
        return Err(DashMpdError::UnsupportedVariant(String::from(
            "live MPD without SegmentTimeline is not supported by this reader")));
    }
    Ok(())
}
