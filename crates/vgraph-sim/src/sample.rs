//! ---
//! vg_section: "02-generation"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Telemetry sample types shared by the generator, hub and transport."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Physical quantity carried by a [`Sample`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SampleKind {
    Current,
    Voltage,
}

/// One telemetry data point as pushed to listeners.
///
/// Serialises to `{type, time, value, chartId?, timestamp, overload}`; `chartId`
/// is omitted when empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "type")]
    pub kind: SampleKind,
    /// Seconds since the owning session started.
    #[serde(rename = "time")]
    pub elapsed_seconds: f64,
    pub value: f64,
    #[serde(rename = "chartId", default, skip_serializing_if = "String::is_empty")]
    pub chart_id: String,
    pub timestamp: DateTime<Utc>,
    pub overload: bool,
}

/// Output of one synthesizer step: a single underlying measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub current: f64,
    pub voltage: f64,
    pub overload: bool,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Split the reading into its current and voltage samples, in that order.
    pub fn samples(&self, elapsed_seconds: f64, chart_id: &str) -> [Sample; 2] {
        let sample = |kind, value| Sample {
            kind,
            elapsed_seconds,
            value,
            chart_id: chart_id.to_owned(),
            timestamp: self.timestamp,
            overload: self.overload,
        };
        [
            sample(SampleKind::Current, self.current),
            sample(SampleKind::Voltage, self.voltage),
        ]
    }
}
