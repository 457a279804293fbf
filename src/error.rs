//! Error types for calamus.
//!
//! Only configuration construction and plan assembly can fail; the merge
//! decision entry points return `Option` and never error (an impossible
//! request degrades to "no plan").

use thiserror::Error;

/// Error type for calamus operations.
#[derive(Debug, Error)]
pub enum CalamusError {
    /// A configuration value was out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An argument violated an API precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CalamusError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        CalamusError::Config(msg.into())
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        CalamusError::InvalidArgument(msg.into())
    }
}

/// Result type for calamus operations.
pub type Result<T> = std::result::Result<T, CalamusError>;
