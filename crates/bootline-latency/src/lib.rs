//! # Bootline Latency
//!
//! The measurement engine for node boot latency. Correlates lifecycle
//! events from registered sources into a chronological, anchor-normalized
//! timeline, retries until the node finishes booting, and renders the
//! result as JSON, a markdown chart, or Prometheus gauges.
//!
//! ## Core Types
//!
//! - [`Measurer`]: owns the source registry and event bindings; runs
//!   measurement passes
//! - [`Measurement`]: one correlated pass, with timings and node metadata
//! - [`MeasureError`]: timeout/cancellation outcomes that still carry the
//!   last measurement
//! - [`MeasurementMetrics`]: Prometheus gauges built from a measurement
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use bootline_latency::{default_events, Measurer};
//! use bootline_sources::SyslogSource;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), bootline_latency::MeasureError> {
//! let report = Measurer::builder()
//!     .with_source(Arc::new(SyslogSource::new(SyslogSource::DEFAULT_PATH, 2024)))
//!     .with_events(default_events("default"))
//!     .build();
//! let measurement = report
//!     .measurer
//!     .measure_until(
//!         Duration::from_secs(600),
//!         Duration::from_secs(5),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! println!("{} timings", measurement.timings.len());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chart;
pub mod error;
pub mod events;
pub mod measure;
pub mod metrics;

pub use chart::{chart, ChartOptions};
pub use error::{MeasureError, RegistrationError, Result};
pub use events::default_events;
pub use measure::{BuildReport, Measurement, Measurer, MeasurerBuilder};
pub use metrics::{MeasurementMetrics, TimingLabels};
