//! ---
//! vg_section: "03-persistence-logging"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Measurement storage abstractions and bindings."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
//! Storage collaborator contract and the best-effort persistence sink.

/// Result alias used throughout the storage crate.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Error type for the storage subsystem.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Wrapper for IO errors encountered while reading/writing journal files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// The backing store cannot currently accept requests.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// The query bounds are inconsistent.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// A blocking storage task panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub mod journal;
pub mod measurement;
pub mod memory;
pub mod metrics;
pub mod sink;

pub use journal::JournalStore;
pub use measurement::{Measurement, MeasurementQuery, MeasurementStore, SortOrder};
pub use memory::MemoryStore;
pub use metrics::StorageMetrics;
pub use sink::{PersistenceSink, SinkError, SinkSnapshot};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_error_display() {
        let err = StorageError::Unavailable("journal locked".into());
        assert_eq!(format!("{err}"), "storage unavailable: journal locked");
    }
}
