//! Central error handling for the baking engine.
//!
//! Provides a unified BakeError enum with consistent categorization across
//! initialization, per-pass submission, resize, and readback failures.

/// Centralized error type for all baking operations.
#[derive(thiserror::Error, Debug)]
pub enum BakeError {
    /// Device, pipeline, buffer, or acceleration-structure creation failed.
    /// Fatal: aborts session start.
    #[error("Initialization error: {0}")]
    Init(String),

    /// A single sampling pass failed to execute or complete. Recoverable:
    /// the scheduler retries the identical pass a bounded number of times.
    #[error("Pass submission error: {0}")]
    PassSubmission(String),

    /// Reallocation on a resolution change failed. Recoverable: the resize
    /// is rejected and the prior resolution and state are retained.
    #[error("Resize error: {0}")]
    Resize(String),

    /// Snapshot readback or buffer mapping failed.
    #[error("Readback error: {0}")]
    Readback(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BakeError {
    /// Convenience constructors for common error categories.
    pub fn init<T: ToString>(msg: T) -> Self {
        BakeError::Init(msg.to_string())
    }

    pub fn pass<T: ToString>(msg: T) -> Self {
        BakeError::PassSubmission(msg.to_string())
    }

    pub fn resize<T: ToString>(msg: T) -> Self {
        BakeError::Resize(msg.to_string())
    }

    pub fn readback<T: ToString>(msg: T) -> Self {
        BakeError::Readback(msg.to_string())
    }
}

/// Result type alias for baking operations.
pub type BakeResult<T> = Result<T, BakeError>;
