// Duration parsing and BaseURL path adjustment.
//
// Grounded on Reader.go (ParseDuration/IsPresentTime/IsPresentDuration) and
// ReaderHelper_test.go (AdjustURLPath join semantics).

use chrono::{DateTime, Utc};
use url::Url;

use crate::DashMpdError;

/// Parses an ISO-8601 duration (as used on `MPD@minimumUpdatePeriod`, `Period@start`, etc.) into a
/// signed `chrono::Duration`.
pub fn parse_duration(s: &str) -> Result<chrono::Duration, DashMpdError> {
    let std_dur = crate::parse_xs_duration(s)?;
    chrono::Duration::from_std(std_dur)
        .map_err(|e| DashMpdError::InvalidDuration(format!("{s}: {e}")))
}

/// Parses an RFC 3339 wall-clock timestamp, as used on `MPD@publishTime` and
/// `MPD@availabilityStartTime`.
pub fn parse_time(s: &str) -> Result<DateTime<Utc>, DashMpdError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DashMpdError::InvalidDuration(format!("invalid wall-clock time {s}: {e}")))
}

pub fn is_present_time(v: &Option<String>) -> bool {
    v.as_ref().is_some_and(|s| !s.is_empty())
}

pub fn is_present_duration(v: &Option<String>) -> bool {
    v.as_ref().is_some_and(|s| !s.is_empty())
}

/// Joins a reference URL against an ordered list of `BaseURL` values (empty, absolute, or
/// relative) and a trailing path fragment, following the same fold-style resolution as a chain of
/// `<BaseURL>` elements in the DASH spec: each entry (and finally `tail`) is resolved against the
/// URL produced by the previous step, using ordinary RFC 3986 reference resolution. An empty
/// string leaves its predecessor unchanged; an absolute URL replaces it outright; a relative path
/// resolves against the predecessor's directory.
pub fn adjust_url_path(reference: &Url, base_urls: &[String], tail: &str) -> Result<Url, DashMpdError> {
    let mut current = reference.clone();
    for entry in base_urls {
        current = current.join(entry)
            .map_err(|e| DashMpdError::InvalidUrl(format!("joining BaseURL {entry}: {e}")))?;
    }
    current = current.join(tail)
        .map_err(|e| DashMpdError::InvalidUrl(format!("joining path {tail}: {e}")))?;
    Ok(current)
}
