//! ---
//! vg_section: "01-core-functionality"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Shared primitives and utilities for the telemetry runtime."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
//! Shared primitives for the VisualGraph telemetry workspace.
//! This crate exposes configuration loading, tracing initialisation, and
//! tick timing utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod time;

pub use config::{
    ApiConfig, AppConfig, GenerationConfig, HubConfig, LoadedAppConfig, LoggingConfig,
    MetricsConfig, StorageBackend, StorageConfig, WaveformConfig,
};
pub use logging::{init_cli_tracing, init_tracing, LogFormat};
pub use metrics::{JitterHistogram, JitterSummary, LoopTimingReporter};
