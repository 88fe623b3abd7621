//! A Rust library for parsing DASH MPD manifests and tracking the live point of a dynamic
//! (live) SegmentTimeline across manifest refreshes.
//!
//! [DASH](https://en.wikipedia.org/wiki/Dynamic_Adaptive_Streaming_over_HTTP) (dynamic adaptive
//! streaming over HTTP), also called MPEG-DASH, is a technology used for media streaming over the
//! web. The Media Presentation Description (MPD) is a description of the resources forming a
//! streaming service, that a DASH client uses to determine which assets to request in order to
//! perform adaptive streaming of the content.
//!
//! This crate provides a serde-based parser for the subset of the DASH MPD format (ISO/IEC
//! 23009-1) needed to drive a live, `SegmentTemplate`+`SegmentTimeline` presentation: classifying
//! a manifest, locating the live point across Periods, and walking the timeline to produce the
//! sequence of chunk URLs a player should fetch. See the [`live`] module for the reader/context
//! API. This crate does not perform any network I/O, media decoding, or muxing: it operates
//! entirely on an already-parsed [`MPD`] tree.
//!
//! ## DASH features supported
//!
//! - Dynamic (live) MPD manifests using `SegmentTemplate` with `SegmentTimeline`
//! - Multi-period content, live-point discovery across Periods
//! - `$Time$`, `$Number$`, `$RepresentationID$` URL template substitution
//! - Manifest refresh / cursor rebasing (`Reader::update`, `ReaderContext` re-creation)
//!
//! ## Limitations / unsupported features
//!
//! - Static (on-demand) MPD manifests are recognized by [`live::ReaderFactory`] but not driven
//! - `SegmentList` and `SegmentBase`-only Representations
//! - DRM / Encrypted Media Extensions
//! - Subtitle tracks
//! - Actually fetching MPDs or media segments over the network

#![allow(non_snake_case)]

pub mod live;

use serde::Deserialize;
use serde::de;
use std::time::Duration;


/// Errors that can arise while parsing, validating or reading a DASH MPD manifest, or while
/// tracking the live point of a dynamic presentation.
#[derive(thiserror::Error, Debug)]
pub enum DashMpdError {
    #[error("I/O error: {1}: {0}")]
    Io(#[source] std::io::Error, String),

    #[error("parse error: {0}")]
    Parsing(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("malformed MPD: {0}")]
    MalformedMpd(String),

    #[error("unsupported MPD variant: {0}")]
    UnsupportedVariant(String),

    #[error("MPD@publishTime did not advance")]
    PublishTimeRegressed,

    #[error("no active Period found for current PublishTime")]
    NoActivePeriod,

    #[error("no AdaptationSet matched the stream selector ({0} candidates considered)")]
    NoAdaptationSet(usize),

    #[error("no Representation matched the representation selector ({0} candidates considered)")]
    NoRepresentation(usize),

    #[error("base wall-clock time changed across a selector update")]
    BaseTimeMismatch,

    #[error("end of SegmentTimeline reached")]
    TimelineExhausted,

    #[error("requested live point lies in the future")]
    LivePointInFuture,

    #[error("no SegmentTimeline entries available at the requested live point")]
    NoLivePointEntries,

    #[error("other error: {0}")]
    Other(String),
}


/// Parse an XML duration string, as per <https://www.w3.org/TR/xmlschema-2/#duration>.
///
/// The lexical representation for duration is the ISO 8601 extended format PnYnMnDTnHnMnS.
/// Note a bug in the current version of the `iso8601` crate which incorrectly parses strings like
/// "PT344S" (seen in a real MPD) as a zero duration.
pub fn parse_xs_duration(s: &str) -> Result<Duration, DashMpdError> {
    match iso8601::duration(s) {
        Ok(iso_duration) => {
            match iso_duration {
                iso8601::Duration::Weeks(w) => Ok(Duration::new(w as u64 * 60 * 60 * 24 * 7, 0)),
                iso8601::Duration::YMDHMS { year, month, day, hour, minute, second, millisecond } => {
                    let mut secs: u64 = second.into();
                    secs += minute as u64 * 60;
                    secs += hour   as u64 * 60 * 60;
                    secs += day    as u64 * 60 * 60 * 24;
                    secs += month  as u64 * 60 * 60 * 24 * 31;
                    secs += year   as u64 * 60 * 60 * 24 * 31 * 365;
                    Ok(Duration::new(secs, millisecond * 1000))
                },
            }
        },
        Err(e) => Err(DashMpdError::InvalidDuration(format!("{s}: {e:?}"))),
    }
}

// Deserialize an optional XML duration string to an Option<Duration>.
fn deserialize_xs_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: de::Deserializer<'de>,
{
    match <Option<String>>::deserialize(deserializer) {
        Ok(optstring) => match optstring {
            Some(xs) => match parse_xs_duration(&xs) {
                Ok(d) => Ok(Some(d)),
                Err(e) => Err(de::Error::custom(e)),
            },
            None => Ok(None),
        },
        Err(_) => Ok(None),
    }
}


/// Describes a sequence of contiguous Segments with identical duration.
#[derive(Debug, Deserialize, Clone)]
pub struct S {
    /// Time anchor, in units of the enclosing `SegmentTemplate`'s timescale.
    pub t: Option<i64>,
    /// The segment duration (shall not exceed MPD@maxSegmentDuration).
    pub d: i64,
    /// The repeat count (number of contiguous segments with identical duration, minus one),
    /// defaulting to zero if not present.
    pub r: Option<i64>,
}

/// Contains a sequence of `S` elements, each describing a run of contiguous segments of identical
/// duration.
#[derive(Debug, Deserialize, Clone)]
pub struct SegmentTimeline {
    #[serde(rename = "S")]
    pub segments: Vec<S>,
}

/// The first media segment in a sequence. Subsequent segments are appended to this one to
/// produce a playable stream.
#[derive(Debug, Deserialize, Clone)]
pub struct Initialization {
    pub sourceURL: Option<String>,
    pub range: Option<String>,
}

/// Allows template-based `SegmentURL` construction, using substitution identifiers such as
/// `$Time$` and `$Number$`.
#[derive(Debug, Deserialize, Clone)]
pub struct SegmentTemplate {
    pub initialization: Option<String>,
    pub media: Option<String>,
    #[serde(rename = "Initialization")]
    pub initializationElement: Option<Initialization>,
    pub SegmentTimeline: Option<SegmentTimeline>,
    pub startNumber: Option<u64>,
    // the spec says this is an unsigned int, not an xs:duration
    pub duration: Option<u64>,
    pub timescale: Option<u64>,
    pub presentationTimeOffset: Option<u64>,
    pub availabilityTimeOffset: Option<f64>,
}

/// A URI string that specifies one or more common locations for Segments and other resources.
#[derive(Debug, Deserialize, Clone)]
pub struct BaseURL {
    #[serde(rename = "$value")]
    pub base: String,
    pub serviceLocation: Option<String>,
}

/// Specifies some common information concerning media segments addressed without a template.
#[derive(Debug, Deserialize, Clone)]
pub struct SegmentBase {
    #[serde(rename = "Initialization")]
    pub initialization: Option<Initialization>,
    pub timescale: Option<u64>,
    pub presentationTimeOffset: Option<u64>,
    pub indexRange: Option<String>,
}

/// A representation describes a version of the content, using a specific encoding and bitrate.
#[derive(Debug, Deserialize, Clone)]
pub struct Representation {
    pub id: Option<String>,
    pub mimeType: Option<String>,
    /// An RFC6381 string, <https://tools.ietf.org/html/rfc6381>
    pub codecs: Option<String>,
    pub contentType: Option<String>,
    pub bandwidth: Option<u64>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub BaseURL: Option<BaseURL>,
    pub SegmentTemplate: Option<SegmentTemplate>,
    pub SegmentBase: Option<SegmentBase>,
}

/// Contains a set of Representations. For example, if multiple language streams are available for
/// the audio content, each one can be in its own AdaptationSet.
#[derive(Debug, Deserialize, Clone)]
pub struct AdaptationSet {
    pub id: Option<i64>,
    pub BaseURL: Option<BaseURL>,
    pub contentType: Option<String>,
    /// Content language, in RFC 5646 format.
    pub lang: Option<String>,
    pub segmentAlignment: Option<bool>,
    pub mimeType: Option<String>,
    /// An RFC6381 string, <https://tools.ietf.org/html/rfc6381>
    pub codecs: Option<String>,
    pub SegmentTemplate: Option<SegmentTemplate>,
    #[serde(rename = "Representation")]
    pub representations: Option<Vec<Representation>>,
}

/// Describes a chunk of the content with a start time and a duration. Content can be split up
/// into multiple Periods (such as chapters, advertising segments).
#[derive(Debug, Deserialize, Clone)]
pub struct Period {
    pub id: Option<String>,
    pub start: Option<String>,
    // the spec says that this is an xs:duration, not an unsigned int as for other "duration" fields
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_xs_duration")]
    pub duration: Option<Duration>,
    pub BaseURL: Option<BaseURL>,
    #[serde(rename = "AdaptationSet")]
    pub adaptations: Option<Vec<AdaptationSet>>,
}

/// The root node of a parsed DASH MPD manifest.
#[derive(Debug, Deserialize, Clone)]
pub struct MPD {
    #[serde(rename = "type")]
    pub mpdtype: Option<String>,
    pub profiles: Option<String>,
    pub minBufferTime: Option<String>,
    pub minimumUpdatePeriod: Option<String>,
    pub timeShiftBufferDepth: Option<String>,
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_xs_duration")]
    pub mediaPresentationDuration: Option<Duration>,
    pub suggestedPresentationDelay: Option<String>,
    pub publishTime: Option<String>,
    pub availabilityStartTime: Option<String>,
    #[serde(rename = "Period")]
    pub periods: Vec<Period>,
    /// There may be several BaseURLs, for redundancy (for example multiple CDNs).
    #[serde(rename = "BaseURL")]
    pub base_urls: Option<Vec<BaseURL>>,
}


/// Parse an MPD manifest, provided as an XML string, returning an `MPD` node.
pub fn parse(xml: &str) -> Result<MPD, DashMpdError> {
    quick_xml::de::from_str(xml)
        .map_err(|e| DashMpdError::Parsing(format!("{e}")))
}

/// Parse an MPD manifest from any `io::Read` source.
pub fn parse_reader<R: std::io::Read>(r: R) -> Result<MPD, DashMpdError> {
    let mut buf = String::new();
    let mut r = r;
    std::io::Read::read_to_string(&mut r, &mut buf)
        .map_err(|e| DashMpdError::Io(e, String::from("reading MPD stream")))?;
    parse(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_xs_duration() {
        assert_eq!(parse_xs_duration("PT1.2S").unwrap(), Duration::new(1, 200_000_000));
        assert_eq!(parse_xs_duration("PT130S").unwrap(), Duration::new(130, 0));
        assert_eq!(parse_xs_duration("PT0H0M30.030S").unwrap(), Duration::new(30, 30_000_000));
    }

    #[test]
    fn test_parse_minimal_dynamic_mpd() {
        let xml = r#"<?xml version="1.0"?>
<MPD type="dynamic" profiles="urn:mpeg:dash:profile:isoff-live:2011"
     publishTime="2024-01-01T00:00:04Z" availabilityStartTime="2024-01-01T00:00:00Z">
  <Period id="0">
    <AdaptationSet contentType="video" segmentAlignment="true">
      <SegmentTemplate media="chunk-$Number$.m4s" timescale="100" startNumber="1">
        <SegmentTimeline>
          <S t="0" d="200" r="4"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v0" bandwidth="500000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;
        let mpd = parse(xml).unwrap();
        assert_eq!(mpd.mpdtype.as_deref(), Some("dynamic"));
        assert_eq!(mpd.periods.len(), 1);
        let adapt = &mpd.periods[0].adaptations.as_ref().unwrap()[0];
        let st = adapt.SegmentTemplate.as_ref().unwrap();
        let tl = st.SegmentTimeline.as_ref().unwrap();
        assert_eq!(tl.segments.len(), 1);
        assert_eq!(tl.segments[0].r, Some(4));
    }
}
