//! Error types for the device coordinator.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Device is offline: {0}")]
    DeviceOffline(String),

    /// Carries the full user-facing text, e.g. `Missing device_id parameter`.
    #[error("{0}")]
    InvalidParameter(String),

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error("Callback error: {0}")]
    Callback(String),

    #[error("Message too large for device: {size} bytes exceeds {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn missing(field: &str) -> Self {
        Error::InvalidParameter(format!("Missing {} parameter", field))
    }

    pub fn missing_required() -> Self {
        Error::InvalidParameter("Missing required parameters".to_string())
    }

    pub fn invalid(field: &str, value: impl std::fmt::Display) -> Self {
        Error::InvalidParameter(format!("Invalid {}: {}", field, value))
    }
}
