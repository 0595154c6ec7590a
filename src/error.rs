//! Error taxonomy for the chart-rendering service.

use thiserror::Error;

/// Result type used throughout the service.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors that can occur while handling chart-rendering tasks.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Submitted task config failed validation.
    #[error("invalid task config: {0}")]
    Validation(String),

    /// No task exists with the given id.
    #[error("task not found: {0}")]
    NotFound(String),

    /// Rasterization or upload failed after exhausting retries.
    #[error("processing failed: {0}")]
    Processing(String),

    /// Retention-sweep object deletion failed for one or more files.
    #[error("cleanup error: {0}")]
    Cleanup(String),

    /// Object-store operation failed.
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Anything else unexpected.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// The stable error-type tag surfaced in HTTP error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::NotFound(_) => "NOT_FOUND_ERROR",
            ServiceError::Processing(_) => "PROCESSING_ERROR",
            ServiceError::Cleanup(_) => "CLEANUP_ERROR",
            ServiceError::ObjectStore(_) => "SYSTEM_ERROR",
            ServiceError::Json(_) => "SYSTEM_ERROR",
            ServiceError::Internal(_) => "SYSTEM_ERROR",
        }
    }

    /// HTTP status code to report this error as.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::Processing(_) | ServiceError::Cleanup(_) => 422,
            ServiceError::ObjectStore(_) | ServiceError::Json(_) | ServiceError::Internal(_) => 500,
        }
    }
}
