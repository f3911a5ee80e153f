//! Error types for the basal_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for basal_core operations
///
/// Implausible measurements (zero readings, oversized reservoir drops) are
/// not errors; they are excluded or reported through a verdict instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed input handed to a pure operation (bad ordering, end before start)
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
