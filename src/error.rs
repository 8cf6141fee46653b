//! Error types for Vizreg
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in Vizreg
#[derive(Debug, Error)]
pub enum VizregError {
    /// The metadata store has no active connection
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Test result not found in storage
    #[error("Test not found: {0}")]
    TestNotFound(String),

    /// Baseline promotion requested for a test without a current image
    #[error("No current image to promote: {0}")]
    NoCurrentImage(String),

    /// Test result already reached its terminal transition
    #[error("Test already finished: {0}")]
    AlreadyFinished(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Vizreg operations
pub type Result<T> = std::result::Result<T, VizregError>;
