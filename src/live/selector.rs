// Stream and representation selection.
//
// Grounded on StreamSelector.go, RepresentationSelector.go and StreamSelectorList.go.

use std::fmt;
use regex::Regex;
use serde::Deserialize;

use crate::{AdaptationSet, Representation, DashMpdError};

/// Result of matching a selector against an AdaptationSet or Representation, ordered so that a
/// `max()` over several criteria picks the strongest signal seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchResult {
    /// The criterion doesn't apply (no filter configured for it).
    DontCare,
    /// A filter was configured but nothing matched.
    NotFound,
    /// Matched via a secondary criterion (e.g. a child Representation's codec).
    Partial,
    /// Matched directly.
    Found,
}

/// Selection criteria for choosing an AdaptationSet, and then a Representation within it.
///
/// An empty `bitrates`/`codecs`/`langs` list means "anything is accepted" for that criterion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamSelector {
    #[serde(default)]
    pub id: String,
    pub content_type: String,
    /// Bitrate comparison expressions, e.g. `">3000000"`, `"<=3000000"`.
    #[serde(default)]
    pub bitrates: Vec<String>,
    /// Regexes matched against `Codecs`.
    #[serde(default)]
    pub codecs: Vec<String>,
    /// Regexes matched against `AdaptationSet@lang` (ISO 639-2).
    #[serde(default)]
    pub langs: Vec<String>,
}

impl StreamSelector {
    pub fn new(content_type: impl Into<String>) -> StreamSelector {
        StreamSelector {
            id: String::new(),
            content_type: content_type.into(),
            bitrates: Vec::new(),
            codecs: Vec::new(),
            langs: Vec::new(),
        }
    }

    pub fn is_match(&self, adapt: &AdaptationSet) -> MatchResult {
        if adapt.contentType.as_deref() != Some(self.content_type.as_str()) {
            return MatchResult::NotFound;
        }
        let codec = self.match_codec(adapt);
        if codec == MatchResult::NotFound {
            return codec;
        }
        codec.max(self.match_lang(adapt))
    }

    fn match_lang(&self, adapt: &AdaptationSet) -> MatchResult {
        if self.langs.is_empty() {
            return MatchResult::DontCare;
        }
        let Some(lang) = adapt.lang.as_deref() else {
            return MatchResult::DontCare;
        };
        for pattern in &self.langs {
            if let Ok(re) = Regex::new(pattern) {
                if re.is_match(lang) {
                    return MatchResult::Found;
                }
            }
        }
        MatchResult::NotFound
    }

    fn match_codec(&self, adapt: &AdaptationSet) -> MatchResult {
        if self.codecs.is_empty() {
            return MatchResult::DontCare;
        }
        if let Some(codecs) = adapt.codecs.as_deref() {
            for pattern in &self.codecs {
                if let Ok(re) = Regex::new(pattern) {
                    if re.is_match(codecs) {
                        return MatchResult::Found;
                    }
                }
            }
        }
        let mut best = MatchResult::DontCare;
        if let Some(reps) = &adapt.representations {
            for rep in reps {
                best = best.max(self.match_codec_rep(rep));
            }
        }
        best
    }

    pub fn is_match_representation(&self, rep: &Representation) -> MatchResult {
        let bitrate = self.match_bitrate_rep(rep);
        if bitrate == MatchResult::NotFound {
            return bitrate;
        }
        bitrate.max(self.match_codec_rep(rep))
    }

    fn match_bitrate_rep(&self, rep: &Representation) -> MatchResult {
        if self.bitrates.is_empty() {
            return MatchResult::DontCare;
        }
        let Some(bandwidth) = rep.bandwidth else {
            return MatchResult::NotFound;
        };
        for expr in &self.bitrates {
            match eval_bitrate_expr(expr, bandwidth) {
                Some(true) => continue,
                _ => return MatchResult::NotFound,
            }
        }
        MatchResult::Found
    }

    fn match_codec_rep(&self, rep: &Representation) -> MatchResult {
        if self.codecs.is_empty() {
            return MatchResult::DontCare;
        }
        let Some(codecs) = rep.codecs.as_deref() else {
            return MatchResult::NotFound;
        };
        for pattern in &self.codecs {
            if let Ok(re) = Regex::new(pattern) {
                if re.is_match(codecs) {
                    return MatchResult::Found;
                }
            }
        }
        MatchResult::NotFound
    }
}

// Evaluates a small comparison expression like ">3000000" or "<=500000" against `bandwidth`.
// Returns None if the expression can't be parsed (treated as NotFound by the caller).
fn eval_bitrate_expr(expr: &str, bandwidth: u64) -> Option<bool> {
    let expr = expr.trim();
    let (op, rest) = if let Some(r) = expr.strip_prefix(">=") {
        (">=", r)
    } else if let Some(r) = expr.strip_prefix("<=") {
        ("<=", r)
    } else if let Some(r) = expr.strip_prefix("==") {
        ("==", r)
    } else if let Some(r) = expr.strip_prefix('>') {
        (">", r)
    } else if let Some(r) = expr.strip_prefix('<') {
        ("<", r)
    } else {
        return None;
    };
    let threshold: u64 = rest.trim().parse().ok()?;
    Some(match op {
        ">=" => bandwidth >= threshold,
        "<=" => bandwidth <= threshold,
        "==" => bandwidth == threshold,
        ">" => bandwidth > threshold,
        "<" => bandwidth < threshold,
        _ => unreachable!(),
    })
}


/// Ranks a list of candidate Representations (already filtered and ordered Found, then Partial,
/// then DontCare by the caller) and picks one.
pub trait RepresentationSelector: fmt::Debug + Send + Sync {
    fn select<'a>(&self, reps: &[&'a Representation]) -> Option<&'a Representation>;

    /// A stable identity used to detect selector changes across `Reader::make_context` calls
    /// (trait objects erase their concrete type, so we can't compare via `Any`/`PartialEq`).
    fn selector_id(&self) -> String {
        format!("{self:?}")
    }
}

/// Selects the Representation with the smallest positive bandwidth.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinBandwidthSelector;

impl RepresentationSelector for MinBandwidthSelector {
    fn select<'a>(&self, reps: &[&'a Representation]) -> Option<&'a Representation> {
        reps.iter()
            .filter(|r| r.bandwidth.is_some_and(|b| b > 0))
            .min_by_key(|r| r.bandwidth.unwrap())
            .copied()
    }
}

/// Selects the Representation with the largest bandwidth.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxBandwidthSelector;

impl RepresentationSelector for MaxBandwidthSelector {
    fn select<'a>(&self, reps: &[&'a Representation]) -> Option<&'a Representation> {
        reps.iter()
            .filter(|r| r.bandwidth.is_some_and(|b| b > 0))
            .max_by_key(|r| r.bandwidth.unwrap())
            .copied()
    }
}


/// A named list of [`StreamSelector`]s, typically loaded from a JSON configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamSelectorList(pub Vec<StreamSelector>);

impl StreamSelectorList {
    /// Loads a `StreamSelectorList` from a JSON file (same shape as a vec of [`StreamSelector`]).
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<StreamSelectorList, DashMpdError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| DashMpdError::Io(e, format!("reading {}", path.as_ref().display())))?;
        let mut list: StreamSelectorList = serde_json::from_str(&content)
            .map_err(|e| DashMpdError::Parsing(format!("decoding selector list: {e}")))?;
        for (i, sel) in list.0.iter_mut().enumerate() {
            if sel.id.is_empty() {
                sel.id = i.to_string();
            }
        }
        Ok(list)
    }

    /// Returns the selector for a given content type, or a bare pass-through selector if none is
    /// configured for it.
    pub fn get(&self, content_type: &str) -> StreamSelector {
        self.0.iter()
            .find(|s| s.content_type == content_type)
            .cloned()
            .unwrap_or_else(|| StreamSelector::new(content_type))
    }
}
