//! Error types for Transmit

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Transmit
#[derive(Error, Debug)]
pub enum Error {
    /// The client did not declare a `uid` when opening its stream
    #[error("Missing required client uid")]
    MissingUid,

    /// Configuration errors (invalid channel pattern, bad ping interval, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bus-related errors
    #[error("Bus error: {0}")]
    Bus(#[from] anyhow::Error),

    /// Sync message encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
