//! Hierarchical document identifiers.
//!
//! Ids are dash-delimited alphanumeric segments where each segment adds one
//! level of nesting:
//!
//! ```text
//! E13            epic     depth 0
//! E13-F01        feature  depth 1, parent E13
//! E13-F01-T01    task     depth 2, parent E13-F01
//! ```

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

const ID_REGEX: &str = r"^[A-Za-z0-9]+(-[A-Za-z0-9]+)*$";
const PREFIXED_SEGMENT_REGEX: &str = r"^([A-Za-z]+)[0-9]+$";

static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| compile(ID_REGEX));

/// Segment shape that carries a level prefix, e.g. `F01` or `T12`.
static PREFIXED_SEGMENT: LazyLock<Regex> = LazyLock::new(|| compile(PREFIXED_SEGMENT_REGEX));

/// Compile one of the constant patterns above.
fn compile(pattern: &'static str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => unreachable!("built-in pattern {pattern:?} does not compile: {e}"),
    }
}

/// Check whether a string is a well-formed hierarchical id.
pub fn is_valid_id(value: &str) -> bool {
    ID_PATTERN.is_match(value)
}

/// A borrowed, validated view over a hierarchical id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HierarchicalId<'a>(&'a str);

impl<'a> HierarchicalId<'a> {
    /// Parse an id, returning `None` if it does not match the naming pattern.
    pub fn parse(value: &'a str) -> Option<Self> {
        is_valid_id(value).then_some(Self(value))
    }

    pub fn as_str(&self) -> &'a str {
        self.0
    }

    /// Iterate over the dash-delimited segments.
    pub fn segments(&self) -> impl Iterator<Item = &'a str> + use<'a> {
        self.0.split('-')
    }

    /// The final segment (the document's own level).
    pub fn last_segment(&self) -> &'a str {
        self.0.rsplit('-').next().unwrap_or(self.0)
    }

    /// Nesting depth: 0 for a single segment, +1 per additional segment.
    pub fn depth(&self) -> usize {
        self.0.matches('-').count()
    }

    /// The id implied by dropping the last segment, if there is one.
    pub fn parent(&self) -> Option<HierarchicalId<'a>> {
        self.0.rsplit_once('-').map(|(parent, _)| HierarchicalId(parent))
    }

    /// Level prefix of the last segment (`T` for `E13-F01-T01`).
    ///
    /// Returns `None` when the segment is not `<letters><digits>`, which is
    /// the case for hash-style ids like `a3f9c2d1`.
    pub fn level_prefix(&self) -> Option<&'a str> {
        PREFIXED_SEGMENT
            .captures(self.last_segment())
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

impl fmt::Display for HierarchicalId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}
