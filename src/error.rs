//! Error types for the Tollgate crate.

use thiserror::Error;

/// Main error type for Tollgate operations.
///
/// Admission decisions themselves never fail; errors only come from
/// construction, configuration loading, and the eviction hook.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Invalid limiter or service configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure while assembling layered configuration sources
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
