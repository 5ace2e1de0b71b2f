//! Error types for comment generation
//!
//! This module defines the error taxonomy of the crate. Cancellation and timeout are
//! *not* errors: they are ordinary [`Outcome`](crate::request::Outcome) variants. Everything
//! here is a genuine failure that a caller may want to inspect or report.

use thiserror::Error;

use crate::cache::CacheError;
use crate::remote::RemoteError;

/// Numeric error codes reported alongside failures.
///
/// The numbering is grouped by subsystem: 1xxx system, 2xxx LLM backend, 4xxx cache,
/// 5xxx comment service, 6xxx credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success,
    SystemError,
    ParameterError,
    LlmServiceError,
    LlmTimeout,
    LlmUnavailable,
    LlmInterrupted,
    LlmExecutionError,
    CacheServiceError,
    CommentServiceError,
    CommentRequestNumExceeded,
    AuthApiKeyNotSet,
}

impl ErrorCode {
    pub fn code(&self) -> u32 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::SystemError => 1001,
            ErrorCode::ParameterError => 1002,
            ErrorCode::LlmServiceError => 2001,
            ErrorCode::LlmTimeout => 2002,
            ErrorCode::LlmUnavailable => 2003,
            ErrorCode::LlmInterrupted => 2004,
            ErrorCode::LlmExecutionError => 2005,
            ErrorCode::CacheServiceError => 4001,
            ErrorCode::CommentServiceError => 5001,
            ErrorCode::CommentRequestNumExceeded => 5002,
            ErrorCode::AuthApiKeyNotSet => 6001,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::SystemError => "internal system error",
            ErrorCode::ParameterError => "invalid parameter",
            ErrorCode::LlmServiceError => "LLM service error",
            ErrorCode::LlmTimeout => "LLM call timed out",
            ErrorCode::LlmUnavailable => "LLM service unavailable",
            ErrorCode::LlmInterrupted => "LLM call interrupted",
            ErrorCode::LlmExecutionError => "LLM execution error",
            ErrorCode::CacheServiceError => "cache service error",
            ErrorCode::CommentServiceError => "comment service error",
            ErrorCode::CommentRequestNumExceeded => "too many in-flight comment requests",
            ErrorCode::AuthApiKeyNotSet => "API key not configured for caller",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// Main error type for comment generation
#[derive(Error, Debug)]
pub enum CommentError {
    /// Request failed validation before anything was scheduled
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Caller has no API key but the orchestrator requires one
    #[error("No API key configured for tenant '{tenant}'")]
    MissingCredential { tenant: String },

    /// A live request is already registered under this id
    #[error("Request id already in flight: {0}")]
    DuplicateRequestId(String),

    /// Worker pool and its queue are both full
    #[error("Worker pool exhausted: {in_flight} requests in flight (capacity {capacity})")]
    PoolExhausted { in_flight: usize, capacity: usize },

    /// No tokio runtime to schedule work on
    #[error("No tokio runtime available: {0}")]
    RuntimeUnavailable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote LLM call failed
    #[error("Remote call failed: {0}")]
    Remote(#[from] RemoteError),

    /// Cache backend failed
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Wrapped failure from inside a task body
    #[error("{code}: {message}")]
    Service {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for comment generation
pub type Result<T> = std::result::Result<T, CommentError>;

impl CommentError {
    /// Wrap an arbitrary failure as a comment service error, keeping the cause.
    pub fn service<E>(cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CommentError::Service {
            code: ErrorCode::CommentServiceError,
            message: cause.to_string(),
            source: Some(Box::new(cause)),
        }
    }

    /// Wrap a failure from a task body exactly once.
    ///
    /// Errors that are already `Service` pass through unchanged.
    pub fn into_service(self) -> Self {
        match self {
            err @ CommentError::Service { .. } => err,
            other => CommentError::service(other),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CommentError::InvalidRequest(_) => ErrorCode::ParameterError,
            CommentError::MissingCredential { .. } => ErrorCode::AuthApiKeyNotSet,
            CommentError::DuplicateRequestId(_) => ErrorCode::ParameterError,
            CommentError::PoolExhausted { .. } => ErrorCode::CommentRequestNumExceeded,
            CommentError::RuntimeUnavailable(_) | CommentError::Config(_) => {
                ErrorCode::SystemError
            }
            CommentError::Remote(e) => e.code(),
            CommentError::Cache(_) => ErrorCode::CacheServiceError,
            CommentError::Serialization(_) => ErrorCode::SystemError,
            CommentError::Service { code, .. } => *code,
            CommentError::Other(_) => ErrorCode::SystemError,
        }
    }
}

impl From<serde_json::Error> for CommentError {
    fn from(e: serde_json::Error) -> Self {
        CommentError::Serialization(e.to_string())
    }
}

impl From<String> for CommentError {
    fn from(s: String) -> Self {
        CommentError::Other(s)
    }
}

impl From<&str> for CommentError {
    fn from(s: &str) -> Self {
        CommentError::Other(s.to_string())
    }
}
