//! ---
//! vg_section: "01-core-functionality"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Lifecycle and fan-out error taxonomy."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---

/// Lifecycle violations surfaced to API callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("generation is already running")]
    AlreadyRunning,
    #[error("generation is not running")]
    NotRunning,
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The hub actor has exited; no further listeners or samples are accepted.
    #[error("broadcast hub is closed")]
    Closed,
    /// The actor is behind; the sample was dropped.
    #[error("broadcast hub command queue is full")]
    Backlogged,
}

pub type Result<T> = std::result::Result<T, GenerationError>;
