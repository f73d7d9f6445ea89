//! Error types for event sources.
//!
//! Most variants here are *retryable*: a source that cannot produce a match
//! this round will usually succeed on a later pass once the node has booted
//! further. Callers record these errors on timings instead of propagating
//! them.

use thiserror::Error;

/// Errors that can occur while querying an event source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The backing data was fetched but contained no match for the event.
    #[error("no matches in {path} for pattern \"{pattern}\"")]
    NoMatch {
        /// The log path or API the source searched.
        path: String,
        /// The pattern that produced no matches.
        pattern: String,
    },

    /// The configured log path resolved to no readable file.
    #[error("unable to resolve log path {path}: {reason}")]
    Unresolved {
        /// The configured path or glob pattern.
        path: String,
        /// Why resolution failed.
        reason: String,
    },

    /// A matched line carried no recognizable timestamp.
    #[error("no timestamp matching \"{pattern}\" on line: {line}")]
    TimestampNotFound {
        /// The timestamp capture pattern.
        pattern: String,
        /// The line that was searched.
        line: String,
    },

    /// An extracted timestamp string could not be parsed.
    #[error("unable to parse timestamp \"{raw}\": {reason}")]
    TimestampParse {
        /// The raw timestamp text.
        raw: String,
        /// The parser's complaint.
        reason: String,
    },

    /// An event was bound to a source that cannot serve its matcher variant.
    #[error("source \"{source_name}\" cannot serve matcher {matcher}")]
    UnsupportedMatcher {
        /// The source name.
        source_name: String,
        /// Debug rendering of the matcher variant.
        matcher: String,
    },

    /// The requested metadata document path is not served.
    #[error("metadata path \"{0}\" is not available")]
    UnknownMetadataPath(String),

    /// An HTTP request to a backing API failed outright.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A backing API answered with a non-success status.
    #[error("unexpected status {status} from {url}")]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// The request URL.
        url: String,
    },

    /// An I/O error occurred while reading a log file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A backing API returned a body that could not be decoded.
    #[error("invalid response body: {0}")]
    Deserialize(#[from] serde_json::Error),

    /// A lookup against a backing API came back empty or inconsistent.
    #[error("{0}")]
    Api(String),
}

/// Result type alias for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;
