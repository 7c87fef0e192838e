//! Error types for the training dashboard.

use thiserror::Error;

/// Result type for dashboard operations.
pub type DashboardResult<T> = Result<T, DashboardError>;

/// Errors that stop the dashboard from starting or running.
///
/// Frame, render and submission faults are handled where they occur and
/// never reach this type.
#[derive(Debug, Error)]
pub enum DashboardError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DashboardError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
