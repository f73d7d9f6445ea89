//! The measurement engine.
//!
//! A [`Measurer`] owns a registry of named [`Source`]s and the
//! [`EventDescriptor`]s bound to them. Each [`Measurer::measure`] pass
//! queries every event, correlates the raw matches into [`Timing`]s, sorts
//! them chronologically, truncates after the last terminal event, and
//! normalizes timestamps against the anchor timing.
//! [`Measurer::measure_until`] wraps that in a bounded, cancellable retry
//! loop for nodes that are still booting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bootline_sources::{EventDescriptor, MetadataProvider, NodeMetadata, Source, Timing};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{MeasureError, RegistrationError, Result};

/// One correlated pass over all registered events.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Measurement {
    /// Node metadata, when a provider was registered and reachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<NodeMetadata>,
    /// The correlated timings, chronologically sorted and truncated after
    /// the last terminal event.
    pub timings: Vec<Timing>,
    /// Names of required events that did not produce an error-free timing
    /// this pass. Empty means the pass is complete.
    #[serde(skip)]
    pub unresolved: Vec<String>,
}

impl Measurement {
    /// Whether every required event resolved this pass.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Outcome of building a measurer: the measurer itself plus the events that
/// could not be registered.
pub struct BuildReport {
    /// The assembled measurer.
    pub measurer: Measurer,
    /// Events referencing sources that were never registered. Skipped, not
    /// fatal: a deployment without cloud API access simply measures fewer
    /// events.
    pub skipped: Vec<RegistrationError>,
}

/// Builder for [`Measurer`].
#[derive(Default)]
pub struct MeasurerBuilder {
    sources: HashMap<String, Arc<dyn Source>>,
    events: Vec<EventDescriptor>,
    metadata: Option<Arc<dyn MetadataProvider>>,
}

impl MeasurerBuilder {
    /// Registers a source under its own name. A later source with the same
    /// name replaces the earlier one.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn Source>) -> Self {
        let name = source.name().to_string();
        tracing::debug!(source = %name, backing = %source.describe(), "registering source");
        self.sources.insert(name, source);
        self
    }

    /// Registers several sources.
    #[must_use]
    pub fn with_sources(mut self, sources: impl IntoIterator<Item = Arc<dyn Source>>) -> Self {
        for source in sources {
            self = self.with_source(source);
        }
        self
    }

    /// Registers an event.
    #[must_use]
    pub fn with_event(mut self, event: EventDescriptor) -> Self {
        self.events.push(event);
        self
    }

    /// Registers several events, preserving order.
    #[must_use]
    pub fn with_events(mut self, events: impl IntoIterator<Item = EventDescriptor>) -> Self {
        self.events.extend(events);
        self
    }

    /// Sets the best-effort node metadata provider.
    #[must_use]
    pub fn with_metadata_provider(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.metadata = Some(provider);
        self
    }

    /// Validates event bindings and assembles the measurer. Events bound to
    /// unregistered sources are reported in [`BuildReport::skipped`].
    #[must_use]
    pub fn build(self) -> BuildReport {
        let mut events = Vec::with_capacity(self.events.len());
        let mut skipped = Vec::new();
        for event in self.events {
            if self.sources.contains_key(&event.source) {
                events.push(event);
            } else {
                skipped.push(RegistrationError {
                    event: event.name,
                    source_name: event.source,
                });
            }
        }
        BuildReport {
            measurer: Measurer {
                sources: self.sources,
                events,
                metadata: self.metadata,
            },
            skipped,
        }
    }
}

/// Correlates lifecycle events from registered sources into measurements.
pub struct Measurer {
    sources: HashMap<String, Arc<dyn Source>>,
    events: Vec<EventDescriptor>,
    metadata: Option<Arc<dyn MetadataProvider>>,
}

impl Measurer {
    /// Starts building a measurer.
    #[must_use]
    pub fn builder() -> MeasurerBuilder {
        MeasurerBuilder::default()
    }

    /// The registered events, in registration order.
    #[must_use]
    pub fn events(&self) -> &[EventDescriptor] {
        &self.events
    }

    /// Drops every source's cache so the next pass re-reads backing data.
    pub fn clear_caches(&self) {
        for source in self.sources.values() {
            source.clear_cache();
        }
    }

    /// Runs one measurement pass.
    ///
    /// Source and per-event failures never abort the pass; they are recorded
    /// as errored timings so callers can see exactly which events are still
    /// pending.
    pub async fn measure(&self) -> Measurement {
        let mut timings = Vec::new();
        for event in &self.events {
            let Some(source) = self.sources.get(&event.source) else {
                // Unreachable after build(), but never worth a panic.
                continue;
            };
            match source.find(event).await {
                Ok(results) => {
                    for result in results {
                        timings.push(Timing {
                            event: event.name.clone(),
                            metric: event.metric.clone(),
                            terminal: event.terminal,
                            timestamp: result.timestamp,
                            offset: None,
                            comment: result.comment,
                            error: result.error.map(|e| e.to_string()),
                        });
                    }
                }
                Err(err) => {
                    tracing::debug!(event = %event.name, source = %event.source, %err, "event not found this pass");
                    timings.push(Timing {
                        event: event.name.clone(),
                        metric: event.metric.clone(),
                        terminal: event.terminal,
                        timestamp: None,
                        offset: None,
                        comment: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        let unresolved = self.unresolved(&timings);

        timings.sort_by_key(Timing::sort_timestamp);
        if let Some(last_terminal) = timings.iter().rposition(|t| t.terminal) {
            timings.truncate(last_terminal + 1);
        }

        // The anchor is the first error-free timing in chronological order,
        // falling back to the first timing of the pass. Timings earlier than
        // the anchor get negative offsets, which callers are expected to
        // notice rather than have hidden from them.
        let anchor = timings
            .iter()
            .find(|t| t.error.is_none() && t.timestamp.is_some())
            .or_else(|| timings.first())
            .and_then(|t| t.timestamp);
        if let Some(anchor) = anchor {
            for timing in &mut timings {
                if let Some(timestamp) = timing.timestamp {
                    let seconds = (timestamp - anchor).num_milliseconds() as f64 / 1000.0;
                    timing.offset = Some(seconds);
                }
            }
        }

        let metadata = match &self.metadata {
            Some(provider) => match provider.node_metadata().await {
                Ok(metadata) => Some(metadata),
                Err(err) => {
                    tracing::warn!(%err, "node metadata unavailable");
                    None
                }
            },
            None => None,
        };

        Measurement {
            metadata,
            timings,
            unresolved,
        }
    }

    /// Names of required events lacking an error-free timing.
    ///
    /// When terminal events are registered they alone decide completeness;
    /// otherwise every event is required.
    fn unresolved(&self, timings: &[Timing]) -> Vec<String> {
        let has_terminal = self.events.iter().any(|e| e.terminal);
        self.events
            .iter()
            .filter(|event| !has_terminal || event.terminal)
            .filter(|event| {
                !timings
                    .iter()
                    .any(|t| t.event == event.name && t.error.is_none())
            })
            .map(|event| event.name.clone())
            .collect()
    }

    /// Measures repeatedly until complete, the timeout passes, or the token
    /// is cancelled.
    ///
    /// Caches are cleared between passes so each retry sees fresh data. The
    /// nap between passes never extends past the deadline, so a short
    /// timeout returns promptly even with a long retry delay.
    ///
    /// # Errors
    ///
    /// [`MeasureError::Timeout`] when the deadline passes with required
    /// events unresolved, [`MeasureError::Cancelled`] on cancellation. Both
    /// carry the last measurement taken.
    pub async fn measure_until(
        &self,
        timeout: Duration,
        retry_delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<Measurement> {
        let deadline = Instant::now() + timeout;
        loop {
            let measurement = self.measure().await;
            if measurement.is_complete() {
                return Ok(measurement);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(MeasureError::Timeout {
                    unresolved: measurement.unresolved.clone(),
                    measurement: Box::new(measurement),
                });
            }
            tracing::info!(
                unresolved = measurement.unresolved.len(),
                remaining_secs = remaining.as_secs(),
                "measurement incomplete, retrying"
            );
            self.clear_caches();
            let nap = retry_delay.min(remaining);
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(MeasureError::Cancelled {
                        measurement: Box::new(measurement),
                    });
                }
                () = tokio::time::sleep(nap) => {}
            }
        }
    }
}
