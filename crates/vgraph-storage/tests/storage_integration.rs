//! ---
//! vg_section: "03-persistence-logging"
//! vg_subsection: "testing"
//! vg_type: "source"
//! vg_scope: "test"
//! vg_description: "Journal store and persistence sink integration tests."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::tempdir;
use vgraph_storage::{
    metrics::StorageMetrics, JournalStore, Measurement, MeasurementQuery, MeasurementStore,
    PersistenceSink,
};

fn measurement(offset_ms: i64, current: f64, overload: bool) -> Measurement {
    Measurement {
        id: None,
        measurement_time: Utc::now() + Duration::milliseconds(offset_ms),
        current_value: current,
        voltage_value: 5.0,
        circuit_id: "circuit_B".into(),
        sensor_model: "I-Sensor-Pro".into(),
        is_overload: overload,
    }
}

#[tokio::test]
async fn sink_writes_through_journal() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(JournalStore::open(&dir.path().join("measurements.jsonl"))?);
    let registry = Arc::new(prometheus::Registry::new());
    let metrics = StorageMetrics::new(registry.clone())?;
    let sink = PersistenceSink::spawn(store.clone(), 64, Some(metrics));

    for i in 0..10 {
        sink.record(measurement(i * 20, 2.0 + i as f64 * 0.01, i == 7))?;
    }
    sink.shutdown().await;

    let latest = store
        .query_measurements(&MeasurementQuery::latest(3))
        .await?;
    assert_eq!(latest.len(), 3);
    assert_eq!(latest[0].id, Some(10));
    assert!(latest[0].measurement_time >= latest[1].measurement_time);

    let overloads: Vec<_> = store
        .query_measurements(&MeasurementQuery::range(None, None, 100))
        .await?
        .into_iter()
        .filter(|m| m.is_overload)
        .collect();
    assert_eq!(overloads.len(), 1);

    let written = registry
        .gather()
        .into_iter()
        .find(|f| f.get_name() == "vgraph_rows_written_total")
        .map(|f| f.get_metric()[0].get_counter().get_value());
    assert_eq!(written, Some(10.0));
    Ok(())
}

#[tokio::test]
async fn history_window_bounds_rows() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store = JournalStore::open(&dir.path().join("measurements.jsonl"))?;
    let base = Utc::now();
    for i in 0..6 {
        let mut row = measurement(0, 2.0, false);
        row.measurement_time = base + Duration::seconds(i);
        store.insert_measurement(&row).await?;
    }

    let window = MeasurementQuery::range(
        Some(base + Duration::seconds(2)),
        Some(base + Duration::seconds(4)),
        2,
    );
    let rows = store.query_measurements(&window).await?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].measurement_time, base + Duration::seconds(2));
    assert_eq!(rows[1].measurement_time, base + Duration::seconds(3));
    Ok(())
}
