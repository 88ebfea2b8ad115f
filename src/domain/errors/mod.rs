// Domain errors - Error types shared by ports and adapters

use std::fmt;

/// Domain-specific error types
#[derive(Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Invalid arguments provided
    BadArgs(String),
    /// File system operation failed
    FsFail(String),
    /// Encoder binary or module could not be found or loaded
    EncoderUnavailable(String),
    /// Encoder invocation exited unsuccessfully or produced unusable output
    ProcessingError(String),
    /// Diagnostic probe failed
    ProbeFailed(String),
    /// Operation exceeded its wall-clock budget
    TimedOut(String),
    /// Operation was cancelled by the caller
    Cancelled,
    /// Internal error
    InternalError(String),
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::BadArgs(msg) => write!(f, "Bad arguments: {}", msg),
            DomainError::FsFail(msg) => write!(f, "File system error: {}", msg),
            DomainError::EncoderUnavailable(msg) => write!(f, "Encoder unavailable: {}", msg),
            DomainError::ProcessingError(msg) => write!(f, "Processing error: {}", msg),
            DomainError::ProbeFailed(msg) => write!(f, "Probe failed: {}", msg),
            DomainError::TimedOut(msg) => write!(f, "Timed out: {}", msg),
            DomainError::Cancelled => write!(f, "Cancelled"),
            DomainError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for DomainError {}
