//! Remote LLM backends
//!
//! A [`RemoteCaller`] performs the one slow call in the pipeline. Implementations must
//! report interruption as [`RemoteError::Interrupted`] so the orchestrator can route it to a
//! cancelled outcome instead of a failure.

pub mod cli;

pub use cli::CliRemoteCaller;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::ErrorCode;
use crate::request::{ApiKey, CommentRequest, RequestContext};

/// Errors surfaced by a remote backend
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The call was aborted because the worker was interrupted
    #[error("Remote call interrupted")]
    Interrupted,

    /// Network or transport failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Backend ran but reported failure
    #[error("Execution error: {0}")]
    Execution(String),

    /// Backend could not be reached or started at all
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl RemoteError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, RemoteError::Interrupted)
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            RemoteError::Interrupted => ErrorCode::LlmInterrupted,
            RemoteError::Connection(_) => ErrorCode::LlmServiceError,
            RemoteError::Execution(_) => ErrorCode::LlmExecutionError,
            RemoteError::Unavailable(_) => ErrorCode::LlmUnavailable,
        }
    }
}

/// Everything a backend needs for one call.
///
/// Prompt rendering is left to the backend; it receives the full request.
#[derive(Debug, Clone, Copy)]
pub struct RemoteCall<'a> {
    pub request_id: &'a str,
    pub request: &'a CommentRequest,
    pub model: &'a str,
    pub credential: Option<&'a ApiKey>,
}

#[async_trait]
pub trait RemoteCaller: Send + Sync {
    /// Run the remote call and return the generated text.
    ///
    /// The returned future may be dropped at any await point when the request is cancelled
    /// or times out; implementations should release their resources on drop.
    async fn call(&self, call: &RemoteCall<'_>) -> Result<String, RemoteError>;

    /// Models this backend can serve for the given caller
    async fn available_models(&self, _ctx: &RequestContext) -> Result<Vec<String>, RemoteError> {
        Ok(Vec::new())
    }
}
