//! ---
//! vg_section: "05-networking-external-interfaces"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Network surfaces for the telemetry service."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
//! Generation control endpoints, historical reads and the `/ws` listener stream.

pub mod history;
pub mod rest;
pub mod websocket;

pub use history::{chart_records, ChartResponse};
pub use rest::{ApiServerBuilder, ApiServerHandle};
