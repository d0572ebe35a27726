//! Settings error types.

use thiserror::Error;

/// Errors that can occur when loading or resolving settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A service name has no definition.
    #[error("unknown service: {0}")]
    UnknownService(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
