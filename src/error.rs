//! Error types for flowstage pipelines.
//!
//! Failures never escape a worker task; they travel through the pipeline as
//! values and reach downstream stages through their `error` entry point.

use thiserror::Error;

/// Main error type flowing through stage pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// A processor reported a failure for a unit of work.
    #[error("processor failed: {0}")]
    Processor(String),
    /// A processor panicked; the panic was contained at the worker boundary.
    #[error("processor panicked: {0}")]
    Panicked(String),
    /// Custom error with message.
    #[error("stage error: {0}")]
    Custom(String),
}

impl StageError {
    /// Shorthand for a processor-reported failure.
    pub fn processor(msg: impl Into<String>) -> Self {
        StageError::Processor(msg.into())
    }

    /// True when this error came from a contained panic.
    pub fn is_panic(&self) -> bool {
        matches!(self, StageError::Panicked(_))
    }
}

impl From<String> for StageError {
    fn from(msg: String) -> Self {
        StageError::Custom(msg)
    }
}

impl From<&str> for StageError {
    fn from(msg: &str) -> Self {
        StageError::Custom(msg.to_string())
    }
}

/// Result type carried by payloads and returned by processors.
pub type StageResult<T> = Result<T, StageError>;
