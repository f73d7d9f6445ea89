//! CLI error type.

use thiserror::Error;

/// Errors surfaced to the terminal.
#[derive(Debug, Error)]
pub enum CliError {
    /// A source failed while being set up.
    #[error("source setup failed: {0}")]
    Source(#[from] bootline_sources::SourceError),

    /// The measurement ended without resolving every required event. The
    /// partial result has already been rendered.
    #[error("{0}")]
    Incomplete(String),

    /// JSON rendering failed.
    #[error("unable to render measurement: {0}")]
    Render(#[from] serde_json::Error),

    /// Metrics encoding failed.
    #[error("unable to encode metrics: {0}")]
    Metrics(#[from] std::fmt::Error),

    /// An I/O error, typically from the metrics listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_passes_message_through() {
        let err = CliError::Incomplete("timed out with unresolved events: Pod Ready".to_string());
        assert_eq!(err.to_string(), "timed out with unresolved events: Pod Ready");
    }
}
