//! Event descriptors, raw match results, and finalized timings.
//!
//! An [`EventDescriptor`] names a lifecycle milestone and binds it to a
//! registered source by name. Sources answer a lookup with raw
//! [`FindResult`]s, which the orchestrator turns into [`Timing`]s.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

use crate::error::SourceError;

/// Policy for reducing the raw matches of one event into timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSelector {
    /// Keep only the earliest match.
    #[default]
    First,
    /// Keep only the latest match.
    Last,
    /// Keep every match; each becomes its own timing.
    All,
}

impl MatchSelector {
    /// Reduces time-sorted raw results according to the policy.
    ///
    /// Empty input yields empty output regardless of policy.
    #[must_use]
    pub fn select(self, mut results: Vec<FindResult>) -> Vec<FindResult> {
        if results.is_empty() {
            return results;
        }
        match self {
            Self::First => {
                results.truncate(1);
                results
            }
            Self::Last => {
                results.drain(..results.len() - 1);
                results
            }
            Self::All => results,
        }
    }
}

/// Source-specific match payload for an event.
///
/// Each source interprets the variants it understands and rejects the rest
/// with [`SourceError::UnsupportedMatcher`]. The set is closed on purpose:
/// the known sources and the ways they can be searched are enumerable.
#[derive(Debug, Clone)]
pub enum EventMatcher {
    /// Regex search over a log source's cached buffer.
    Pattern(Regex),
    /// Lookup of a path in the instance metadata document.
    MetadataPath(String),
    /// The compute-fleet request's creation time.
    FleetRequest,
    /// The instance's launch time from the fleet API.
    InstanceLaunch,
    /// Creation times of pods scheduled on this node.
    PodCreation,
}

/// Rule for annotating a raw match with a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentRule {
    /// Use the matched line itself as the comment.
    MatchedLine,
}

impl CommentRule {
    /// Produces the comment for a matched line.
    #[must_use]
    pub fn apply(self, line: &str) -> String {
        match self {
            Self::MatchedLine => line.to_string(),
        }
    }
}

/// A named lifecycle milestone to be timed from a specific source.
#[derive(Debug, Clone)]
pub struct EventDescriptor {
    /// Unique, human-readable event name.
    pub name: String,
    /// Unique metric key used for metrics export.
    pub metric: String,
    /// Name of the source this event is bound to.
    pub source: String,
    /// How the source should search for this event.
    pub matcher: EventMatcher,
    /// Optional annotation rule for matched results.
    pub comment: Option<CommentRule>,
    /// Policy for reducing multiple raw matches.
    pub selector: MatchSelector,
    /// Whether this event marks the end of the measured sequence.
    pub terminal: bool,
}

impl EventDescriptor {
    /// Creates a descriptor with the default selector (`First`), no comment
    /// rule, and non-terminal.
    pub fn new(
        name: impl Into<String>,
        metric: impl Into<String>,
        source: impl Into<String>,
        matcher: EventMatcher,
    ) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
            source: source.into(),
            matcher,
            comment: None,
            selector: MatchSelector::First,
            terminal: false,
        }
    }

    /// Sets the match-selection policy.
    #[must_use]
    pub fn with_selector(mut self, selector: MatchSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Sets the comment rule.
    #[must_use]
    pub fn with_comment(mut self, rule: CommentRule) -> Self {
        self.comment = Some(rule);
        self
    }

    /// Marks the event as terminal.
    #[must_use]
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

/// One raw match from a source lookup.
#[derive(Debug)]
pub struct FindResult {
    /// The matched line or record, verbatim.
    pub line: String,
    /// The extracted or derived timestamp, if one could be determined.
    pub timestamp: Option<DateTime<Utc>>,
    /// Optional annotation produced by the event's comment rule.
    pub comment: Option<String>,
    /// Per-result error (timestamp parse or lookup failure). Non-fatal.
    pub error: Option<SourceError>,
}

impl FindResult {
    /// A successful result with a timestamp.
    #[must_use]
    pub fn with_timestamp(line: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            line: line.into(),
            timestamp: Some(timestamp),
            comment: None,
            error: None,
        }
    }

    /// Timestamp used for chronological ordering; results without one sort
    /// first.
    #[must_use]
    pub fn sort_timestamp(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// A finalized, correlated instance of an event.
///
/// Timings are created fresh on every measurement pass. The relative offset
/// is set once the pass's anchor timestamp is known and never touched again.
#[derive(Debug, Clone, Serialize)]
pub struct Timing {
    /// The event's name.
    pub event: String,
    /// The event's metric key.
    pub metric: String,
    /// Whether the event is terminal.
    pub terminal: bool,
    /// Absolute timestamp, if one could be determined this round.
    pub timestamp: Option<DateTime<Utc>>,
    /// Offset from the pass's anchor timing, in seconds. May be negative.
    #[serde(rename = "seconds")]
    pub offset: Option<f64>,
    /// Optional annotation carried over from the raw match.
    pub comment: Option<String>,
    /// Carried error: "this event's timestamp could not be determined this
    /// round". Non-fatal; the retry loop keeps polling.
    pub error: Option<String>,
}

impl Timing {
    /// Timestamp used for chronological ordering; timings without one sort
    /// first.
    #[must_use]
    pub fn sort_timestamp(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
