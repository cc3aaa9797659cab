//! ---
//! vg_section: "02-generation"
//! vg_subsection: "01-bootstrap"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Waveform synthesizer module exports and shared sample types."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
//! Synthetic sensor telemetry for the VisualGraph service.
//!
//! The synthesizer is a pure function of its inputs apart from the injected
//! [`NoiseSource`]; tests supply [`ScriptedNoise`] for reproducible output.

pub mod noise;
pub mod sample;
pub mod waveform;

pub use noise::{NoiseSource, ScriptedNoise, SeededNoise};
pub use sample::{Reading, Sample, SampleKind};
pub use waveform::WaveformSynthesizer;
