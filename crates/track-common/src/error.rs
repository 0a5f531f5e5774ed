//! Error types for navipack services.

use thiserror::Error;

/// Result type alias using BundleError.
pub type BundleResult<T> = Result<T, BundleError>;

/// Primary error type for the tile bundling pipeline.
#[derive(Debug, Error)]
pub enum BundleError {
    // === Upload Errors ===
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid track data: {0}")]
    TrackParseError(String),

    // === Tile Errors ===
    #[error("Upstream tile server unavailable for {url}: {reason}")]
    UpstreamUnavailable { url: String, reason: String },

    #[error("Failed to decode tile image: {0}")]
    ImageDecodeError(String),

    // === Job Errors ===
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Archival failed: {0}")]
    ArchiveFailure(String),

    // === Storage Errors ===
    #[error("Storage error: {0}")]
    StorageError(String),

    // === Infrastructure Errors ===
    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl BundleError {
    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            BundleError::InvalidUpload(_)
            | BundleError::UnsupportedFormat(_)
            | BundleError::TrackParseError(_) => 400,

            BundleError::NotFound(_) => 404,

            BundleError::UpstreamUnavailable { .. } => 502,

            _ => 500,
        }
    }
}

// Conversion from common error types
impl From<std::io::Error> for BundleError {
    fn from(err: std::io::Error) -> Self {
        BundleError::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for BundleError {
    fn from(err: serde_json::Error) -> Self {
        BundleError::InternalError(format!("JSON error: {}", err))
    }
}
