//! Markdown chart rendering for measurements.

use tabled::builder::Builder;
use tabled::settings::Style;

use crate::measure::Measurement;

/// Chart column headers, in display order.
pub const COLUMNS: [&str; 4] = ["Event", "Timestamp", "T", "Comment"];

/// Rendering options for [`chart`].
#[derive(Debug, Clone, Default)]
pub struct ChartOptions {
    /// Column headers to omit, matched case-insensitively.
    pub hidden_columns: Vec<String>,
}

impl ChartOptions {
    fn keep(&self, column: &str) -> bool {
        !self
            .hidden_columns
            .iter()
            .any(|hidden| hidden.eq_ignore_ascii_case(column))
    }

    fn filter(&self, row: [String; 4]) -> Vec<String> {
        COLUMNS
            .iter()
            .zip(row)
            .filter(|(column, _)| self.keep(column))
            .map(|(_, cell)| cell)
            .collect()
    }
}

/// Renders the measurement as a markdown table, preceded by a metadata
/// heading when metadata is present.
///
/// Errored timings carry no timestamp worth charting; they are logged and
/// skipped.
#[must_use]
pub fn chart(measurement: &Measurement, opts: &ChartOptions) -> String {
    let mut out = String::new();
    if let Some(metadata) = &measurement.metadata {
        out.push_str(&format!(
            "### {} ({}) | {} | {} | {} | {}\n",
            metadata.instance_id,
            metadata.private_ip,
            metadata.instance_type,
            metadata.architecture,
            metadata.availability_zone,
            metadata.image_id,
        ));
    }

    let mut builder = Builder::default();
    builder.push_record(opts.filter(COLUMNS.map(String::from)));
    for timing in &measurement.timings {
        if let Some(error) = &timing.error {
            tracing::warn!(event = %timing.event, %error, "omitting errored timing from chart");
            continue;
        }
        let timestamp = timing
            .timestamp
            .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .unwrap_or_default();
        // One decimal keeps sub-second boot phases apart without widening
        // the column for the long tail.
        let offset = timing
            .offset
            .map(|t| format!("{t:.1}s"))
            .unwrap_or_default();
        builder.push_record(opts.filter([
            timing.event.clone(),
            timestamp,
            offset,
            timing.comment.clone().unwrap_or_default(),
        ]));
    }

    let mut table = builder.build();
    table.with(Style::markdown());
    out.push_str(&table.to_string());
    out.push('\n');
    out
}
