//! ---
//! vg_section: "03-persistence-logging"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Best-effort persistence sink decoupling the tick loop from storage latency."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::measurement::{Measurement, MeasurementStore};
use crate::metrics::StorageMetrics;

/// Reasons a measurement was not accepted by the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("persistence queue is full")]
    QueueFull,
    #[error("persistence sink is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct SinkCounters {
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time counters for the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkSnapshot {
    pub written: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Queues measurements and inserts them from a single writer task.
///
/// `record` never waits on storage: a full queue drops the row and counts it.
/// Insert failures are logged and counted; they never reach the caller.
pub struct PersistenceSink {
    sender: Mutex<Option<mpsc::Sender<Measurement>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<SinkCounters>,
    metrics: Option<StorageMetrics>,
}

impl PersistenceSink {
    /// Spawn the writer task on the current runtime.
    pub fn spawn(
        store: Arc<dyn MeasurementStore>,
        capacity: usize,
        metrics: Option<StorageMetrics>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(SinkCounters::default());
        let writer = tokio::spawn(write_loop(store, rx, counters.clone(), metrics.clone()));
        Self {
            sender: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
            counters,
            metrics,
        }
    }

    /// Hand a row to the writer without waiting.
    pub fn record(&self, row: Measurement) -> Result<(), SinkError> {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(SinkError::Closed);
        };
        match sender.try_send(row) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.record_dropped();
                }
                Err(SinkError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }

    pub fn snapshot(&self) -> SinkSnapshot {
        SinkSnapshot {
            written: self.counters.written.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting rows and wait for the queue to drain.
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(err) = writer.await {
                warn!(error = %err, "persistence writer task failed");
            }
        }
    }
}

impl std::fmt::Debug for PersistenceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceSink")
            .field("stats", &self.snapshot())
            .finish_non_exhaustive()
    }
}

async fn write_loop(
    store: Arc<dyn MeasurementStore>,
    mut rx: mpsc::Receiver<Measurement>,
    counters: Arc<SinkCounters>,
    metrics: Option<StorageMetrics>,
) {
    while let Some(row) = rx.recv().await {
        let started = Instant::now();
        match store.insert_measurement(&row).await {
            Ok(id) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &metrics {
                    metrics.record_written(started.elapsed().as_secs_f64());
                }
                trace!(id, "measurement persisted");
            }
            Err(err) => {
                let failed = counters.failed.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(metrics) = &metrics {
                    metrics.record_failed();
                }
                // First failure, then every hundredth.
                if failed == 1 || failed % 100 == 0 {
                    warn!(
                        error = %err,
                        measurement_time = %row.measurement_time,
                        failed,
                        "failed to persist measurement"
                    );
                }
            }
        }
    }
    debug!("persistence writer drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::Utc;

    fn row() -> Measurement {
        Measurement {
            id: None,
            measurement_time: Utc::now(),
            current_value: 2.0,
            voltage_value: 6.0,
            circuit_id: "circuit_B".into(),
            sensor_model: "I-Sensor-Pro".into(),
            is_overload: false,
        }
    }

    #[tokio::test]
    async fn shutdown_drains_queue() {
        let store = Arc::new(MemoryStore::default());
        let sink = PersistenceSink::spawn(store.clone(), 16, None);
        for _ in 0..5 {
            sink.record(row()).unwrap();
        }
        sink.shutdown().await;
        assert_eq!(store.len(), 5);
        assert_eq!(sink.snapshot().written, 5);
        assert_eq!(sink.record(row()), Err(SinkError::Closed));
    }

    #[tokio::test]
    async fn insert_failures_are_counted() {
        let store = Arc::new(MemoryStore::default());
        store.set_available(false);
        let sink = PersistenceSink::spawn(store.clone(), 16, None);
        sink.record(row()).unwrap();
        sink.record(row()).unwrap();
        sink.shutdown().await;
        let stats = sink.snapshot();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.written, 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn full_queue_drops_rows() {
        let store = Arc::new(MemoryStore::default());
        let sink = PersistenceSink::spawn(store, 2, None);
        // The writer cannot run until this task yields.
        sink.record(row()).unwrap();
        sink.record(row()).unwrap();
        assert_eq!(sink.record(row()), Err(SinkError::QueueFull));
        assert_eq!(sink.snapshot().dropped, 1);
        sink.shutdown().await;
        assert_eq!(sink.snapshot().written, 2);
    }
}
