//! Error types for station-metadata services.

use thiserror::Error;

/// Result type alias using MetadataError.
pub type MetadataResult<T> = Result<T, MetadataError>;

/// Primary error type for metadata pipeline operations.
#[derive(Debug, Error)]
pub enum MetadataError {
    // === Stage Errors ===
    #[error("Conversion tool failed (exit code {code:?}): {message}")]
    ToolFailed { code: Option<i32>, message: String },

    #[error("Failed to spawn tool '{tool}': {message}")]
    ToolSpawnError { tool: String, message: String },

    #[error("Stage timed out after {0} seconds")]
    StageTimeout(u64),

    // === Verifier Errors ===
    #[error("Invalid catalog document: {0}")]
    InvalidCatalogDocument(String),
}
