//! Prometheus export of measurement timings.
//!
//! Each unique event metric becomes a gauge whose value is the event's
//! offset from the measurement anchor, in seconds, labeled with the node's
//! dimensions.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::measure::Measurement;

/// Gauge storing fractional seconds.
type SecondsGauge = Gauge<f64, AtomicU64>;

/// Label set attached to every timing gauge.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Default, EncodeLabelSet)]
pub struct TimingLabels {
    /// Experiment dimension for A/B comparisons of boot configurations.
    pub experiment: String,
    /// The node's instance type.
    pub instance_type: String,
    /// The node's machine image id.
    pub ami_id: String,
    /// The node's region.
    pub region: String,
    /// The node's availability zone.
    pub availability_zone: String,
}

impl TimingLabels {
    fn new(measurement: &Measurement, experiment: &str) -> Self {
        let mut labels = Self {
            experiment: experiment.to_string(),
            ..Self::default()
        };
        if let Some(metadata) = &measurement.metadata {
            labels.instance_type = metadata.instance_type.clone();
            labels.ami_id = metadata.image_id.clone();
            labels.region = metadata.region.clone();
            labels.availability_zone = metadata.availability_zone.clone();
        }
        labels
    }
}

/// A registry of per-event timing gauges built from a measurement.
pub struct MeasurementMetrics {
    registry: Registry,
    gauges: HashMap<String, Family<TimingLabels, SecondsGauge>>,
}

impl MeasurementMetrics {
    /// Content type for the text exposition format.
    pub const CONTENT_TYPE: &'static str =
        "application/openmetrics-text; version=1.0.0; charset=utf-8";

    /// Builds gauges for every metric in the measurement and records the
    /// current offsets.
    #[must_use]
    pub fn from_measurement(measurement: &Measurement, experiment: &str) -> Self {
        let mut registry = Registry::default();
        let mut gauges: HashMap<String, Family<TimingLabels, SecondsGauge>> = HashMap::new();
        for timing in &measurement.timings {
            if gauges.contains_key(&timing.metric) {
                continue;
            }
            let family = Family::<TimingLabels, SecondsGauge>::default();
            registry.register(
                timing.metric.clone(),
                format!("Offset of \"{}\" from the measurement anchor in seconds", timing.event),
                family.clone(),
            );
            gauges.insert(timing.metric.clone(), family);
        }
        let metrics = Self { registry, gauges };
        metrics.record(measurement, experiment);
        metrics
    }

    /// Records the offsets of a measurement's timings. Errored timings have
    /// no offset and are skipped.
    pub fn record(&self, measurement: &Measurement, experiment: &str) {
        let labels = TimingLabels::new(measurement, experiment);
        for timing in &measurement.timings {
            let Some(offset) = timing.offset else {
                continue;
            };
            let Some(family) = self.gauges.get(&timing.metric) else {
                tracing::warn!(metric = %timing.metric, "no gauge registered for metric");
                continue;
            };
            family.get_or_create(&labels).set(offset);
        }
    }

    /// Encodes the registry in the OpenMetrics text format.
    ///
    /// # Errors
    ///
    /// Propagates formatting errors from the encoder.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut out = String::new();
        encode(&mut out, &self.registry)?;
        Ok(out)
    }
}
