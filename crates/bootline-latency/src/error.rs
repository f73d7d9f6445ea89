//! Error types for the measurement engine.

use thiserror::Error;

use crate::measure::Measurement;

/// An event that could not be registered.
#[derive(Debug, Clone, Error)]
#[error("event \"{event}\" references unregistered source \"{source_name}\"")]
pub struct RegistrationError {
    /// The event's name.
    pub event: String,
    /// The source name the event asked for.
    pub source_name: String,
}

/// Errors from a bounded measurement run.
///
/// Both variants carry the last measurement taken, so callers can still
/// render whatever was resolved before the run stopped.
#[derive(Debug, Error)]
pub enum MeasureError {
    /// The deadline passed with events still unresolved.
    #[error("timed out with unresolved events: {}", unresolved.join(", "))]
    Timeout {
        /// Names of events that never produced an error-free timing.
        unresolved: Vec<String>,
        /// The final (incomplete) measurement.
        measurement: Box<Measurement>,
    },

    /// The run was cancelled from outside.
    #[error("measurement cancelled")]
    Cancelled {
        /// The last measurement taken before cancellation.
        measurement: Box<Measurement>,
    },
}

impl MeasureError {
    /// The last measurement taken before the run stopped.
    #[must_use]
    pub fn measurement(&self) -> &Measurement {
        match self {
            Self::Timeout { measurement, .. } | Self::Cancelled { measurement } => measurement,
        }
    }

    /// Consumes the error, yielding the last measurement.
    #[must_use]
    pub fn into_measurement(self) -> Measurement {
        match self {
            Self::Timeout { measurement, .. } | Self::Cancelled { measurement } => *measurement,
        }
    }
}

/// Result type alias for measurement operations.
pub type Result<T> = std::result::Result<T, MeasureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_error_names_event_and_source() {
        let err = RegistrationError {
            event: "Pod Created".to_string(),
            source_name: "k8s".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "event \"Pod Created\" references unregistered source \"k8s\""
        );
    }

    #[test]
    fn timeout_lists_unresolved_events() {
        let err = MeasureError::Timeout {
            unresolved: vec!["Node Ready".to_string(), "Pod Ready".to_string()],
            measurement: Box::new(Measurement::default()),
        };
        assert_eq!(
            err.to_string(),
            "timed out with unresolved events: Node Ready, Pod Ready"
        );
        assert!(err.measurement().timings.is_empty());
    }
}
