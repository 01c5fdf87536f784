//! Error types for pinmap.
//!
//! Nothing in this crate is fatal to the host: capacity pressure is answered
//! by eviction and pool growth, and budget overruns are reported through
//! stats, not errors. The variants below cover the remaining boundary and
//! configuration failures.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PinmapError>;

/// Errors produced by the pinmap engine.
#[derive(Debug, Error)]
pub enum PinmapError {
    /// Malformed input at the engine boundary (bad bounds, bad coordinates).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
