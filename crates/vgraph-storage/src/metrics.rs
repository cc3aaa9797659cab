//! ---
//! vg_section: "03-persistence-logging"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Prometheus instrumentation for the persistence sink."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{self, Histogram, HistogramOpts, IntCounter, Opts, Registry};

use crate::Result;

/// Metrics published by the persistence sink.
#[derive(Clone)]
pub struct StorageMetrics {
    rows_written: IntCounter,
    rows_failed: IntCounter,
    rows_dropped: IntCounter,
    insert_duration: Histogram,
}

impl StorageMetrics {
    /// Register all storage metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let rows_written = IntCounter::with_opts(Opts::new(
            "vgraph_rows_written_total",
            "Total number of measurements persisted",
        ))?;
        registry.register(Box::new(rows_written.clone()))?;

        let rows_failed = IntCounter::with_opts(Opts::new(
            "vgraph_rows_failed_total",
            "Total number of measurement inserts rejected by storage",
        ))?;
        registry.register(Box::new(rows_failed.clone()))?;

        let rows_dropped = IntCounter::with_opts(Opts::new(
            "vgraph_rows_dropped_total",
            "Total number of measurements dropped because the sink queue was full",
        ))?;
        registry.register(Box::new(rows_dropped.clone()))?;

        let insert_duration = Histogram::with_opts(
            HistogramOpts::new(
                "vgraph_insert_duration_seconds",
                "Latency of a single measurement insert",
            )
            .buckets(prometheus::exponential_buckets(0.0001, 2.0, 14)?),
        )?;
        registry.register(Box::new(insert_duration.clone()))?;

        Ok(Self {
            rows_written,
            rows_failed,
            rows_dropped,
            insert_duration,
        })
    }

    pub fn record_written(&self, seconds: f64) {
        self.rows_written.inc();
        self.insert_duration.observe(seconds);
    }

    pub fn record_failed(&self) {
        self.rows_failed.inc();
    }

    pub fn record_dropped(&self) {
        self.rows_dropped.inc();
    }
}

impl std::fmt::Debug for StorageMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageMetrics").finish_non_exhaustive()
    }
}
