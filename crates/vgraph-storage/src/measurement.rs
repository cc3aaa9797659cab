//! ---
//! vg_section: "03-persistence-logging"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Measurement storage abstractions and bindings."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, StorageError};

/// One recorded tick: current and voltage captured together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Identifier assigned by the store on insert.
    #[serde(default)]
    pub id: Option<u64>,
    /// Wall-clock instant the values were generated.
    pub measurement_time: DateTime<Utc>,
    /// Current reading.
    pub current_value: f64,
    /// Voltage reading.
    pub voltage_value: f64,
    /// Circuit the sensor is attached to.
    pub circuit_id: String,
    /// Sensor model label.
    pub sensor_model: String,
    /// Whether the tick fell in an overload window.
    pub is_overload: bool,
}

/// Result ordering for [`MeasurementQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Most recent rows first.
    NewestFirst,
    /// Oldest rows first.
    #[default]
    OldestFirst,
}

/// Typed read request against a [`MeasurementStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementQuery {
    /// Inclusive lower bound on `measurement_time`.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `measurement_time`.
    pub end: Option<DateTime<Utc>>,
    /// Maximum number of rows returned.
    pub limit: usize,
    /// Ordering applied before `limit`.
    pub order: SortOrder,
}

impl MeasurementQuery {
    /// The `limit` most recent rows, newest first.
    pub fn latest(limit: usize) -> Self {
        Self {
            start: None,
            end: None,
            limit,
            order: SortOrder::NewestFirst,
        }
    }

    /// Rows within optional bounds, oldest first.
    pub fn range(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Self {
        Self {
            start,
            end,
            limit,
            order: SortOrder::OldestFirst,
        }
    }

    /// Reject queries whose bounds cannot match anything.
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(StorageError::InvalidQuery(format!(
                    "start {} is after end {}",
                    start.to_rfc3339(),
                    end.to_rfc3339()
                )));
            }
        }
        Ok(())
    }

    /// Whether `row` satisfies the time bounds.
    pub fn matches(&self, row: &Measurement) -> bool {
        self.start.map_or(true, |start| row.measurement_time >= start)
            && self.end.map_or(true, |end| row.measurement_time <= end)
    }

    /// Filter, order and truncate `rows` according to this query.
    pub fn select<'a, I>(&self, rows: I) -> Vec<Measurement>
    where
        I: IntoIterator<Item = &'a Measurement>,
    {
        let mut matched: Vec<Measurement> = rows
            .into_iter()
            .filter(|row| self.matches(row))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            a.measurement_time
                .cmp(&b.measurement_time)
                .then(a.id.cmp(&b.id))
        });
        if self.order == SortOrder::NewestFirst {
            matched.reverse();
        }
        matched.truncate(self.limit);
        matched
    }
}

/// Storage collaborator: the only operations the generation core relies on.
#[async_trait]
pub trait MeasurementStore: Send + Sync + 'static {
    /// Check that the store can accept writes.
    async fn ping(&self) -> Result<()>;

    /// Persist one row and return its assigned identifier.
    async fn insert_measurement(&self, row: &Measurement) -> Result<u64>;

    /// Read rows for historical views.
    async fn query_measurements(&self, query: &MeasurementQuery) -> Result<Vec<Measurement>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn row(id: u64, offset_s: i64) -> Measurement {
        Measurement {
            id: Some(id),
            measurement_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + Duration::seconds(offset_s),
            current_value: 2.0,
            voltage_value: 6.0,
            circuit_id: "circuit_B".into(),
            sensor_model: "I-Sensor-Pro".into(),
            is_overload: false,
        }
    }

    #[test]
    fn latest_returns_newest_first() {
        let rows = vec![row(1, 0), row(2, 1), row(3, 2), row(4, 3)];
        let picked = MeasurementQuery::latest(2).select(&rows);
        let ids: Vec<_> = picked.iter().map(|r| r.id.unwrap()).collect();
        assert_eq!(ids, vec![4, 3]);
    }

    #[test]
    fn range_is_inclusive_and_oldest_first() {
        let rows = vec![row(4, 3), row(1, 0), row(3, 2), row(2, 1)];
        let start = rows[1].measurement_time + Duration::seconds(1);
        let end = start + Duration::seconds(1);
        let picked = MeasurementQuery::range(Some(start), Some(end), 10).select(&rows);
        let ids: Vec<_> = picked.iter().map(|r| r.id.unwrap()).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn inverted_bounds_are_invalid() {
        let now = Utc::now();
        let query = MeasurementQuery::range(Some(now), Some(now - Duration::seconds(1)), 10);
        assert!(matches!(
            query.validate(),
            Err(StorageError::InvalidQuery(_))
        ));
    }
}
