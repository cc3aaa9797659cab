//! ---
//! vg_section: "05-networking-external-interfaces"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Shapes stored measurements into chart records for historical reads."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vgraph_sim::{Sample, SampleKind};
use vgraph_storage::Measurement;

/// Envelope returned by the latest/history endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartResponse {
    pub data: Vec<Sample>,
    pub count: usize,
    /// Kind filter as requested; empty when both kinds are returned.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "chartId")]
    pub chart_id: String,
}

impl ChartResponse {
    pub fn new(data: Vec<Sample>, kind: Option<SampleKind>, chart_id: String) -> Self {
        Self {
            count: data.len(),
            data,
            kind: kind.map(|k| k.to_string()).unwrap_or_default(),
            chart_id,
        }
    }
}

/// Expand rows into samples, current before voltage for each row, keeping
/// the row order. `time` is the absolute distance from `now` in seconds.
pub fn chart_records(
    rows: &[Measurement],
    kind: Option<SampleKind>,
    chart_id: &str,
    now: DateTime<Utc>,
) -> Vec<Sample> {
    let mut records = Vec::with_capacity(rows.len() * 2);
    for row in rows {
        let age = seconds_between(now, row.measurement_time);
        for (sample_kind, value) in [
            (SampleKind::Current, row.current_value),
            (SampleKind::Voltage, row.voltage_value),
        ] {
            if kind.map_or(true, |wanted| wanted == sample_kind) {
                records.push(Sample {
                    kind: sample_kind,
                    elapsed_seconds: age,
                    value,
                    chart_id: chart_id.to_owned(),
                    timestamp: row.measurement_time,
                    overload: row.is_overload,
                });
            }
        }
    }
    records
}

fn seconds_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    let delta = a - b;
    let seconds = match delta.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1e9,
        None => delta.num_milliseconds() as f64 / 1e3,
    };
    seconds.abs()
}
