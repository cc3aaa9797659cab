//! ---
//! vg_section: "01-core-functionality"
//! vg_subsection: "01-bootstrap"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Generation controller and broadcast hub exports."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
//! Telemetry generation and broadcast.
//!
//! [`GenerationController`] owns the single generation session and drives the
//! synthesizer on a fixed tick; every tick fans out to the [`BroadcastHub`] and
//! to the persistence sink independently.

pub mod controller;
pub mod error;
pub mod hub;
pub mod scheduling;

pub use controller::{
    GenerationController, GenerationControllerBuilder, GenerationStatus, NoiseFactory,
    SessionDetails, StartOutcome, StartRequest, StopOutcome,
};
pub use error::{GenerationError, HubError, Result};
pub use hub::{BroadcastHub, ListenerConnection, ListenerId};
pub use scheduling::TickTimer;
