//! Request, response and outcome types

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CommentError, ErrorCode};

/// What kind of comment work is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    /// Write a fresh comment for `new_method`
    #[default]
    Generate,
    /// Update `old_comment` to match `new_method`
    Update,
    /// Update, with a retrieved example attached to the prompt
    UpdateWithRag,
}

impl RequestMode {
    /// Short tag used inside cache keys
    pub fn as_key_segment(&self) -> &'static str {
        match self {
            RequestMode::Generate => "generate",
            RequestMode::Update => "update",
            RequestMode::UpdateWithRag => "rag",
        }
    }
}

impl std::str::FromStr for RequestMode {
    type Err = CommentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate" => Ok(RequestMode::Generate),
            "update" => Ok(RequestMode::Update),
            "rag" | "update_with_rag" => Ok(RequestMode::UpdateWithRag),
            other => Err(CommentError::InvalidRequest(format!(
                "unknown mode '{}', expected generate, update or rag",
                other
            ))),
        }
    }
}

/// A comment generation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommentRequest {
    pub old_method: Option<String>,
    pub old_comment: Option<String>,
    pub new_method: String,
    #[serde(default)]
    pub mode: RequestMode,
    pub rag_example: Option<String>,
    /// Model to use; the configured default applies when absent
    pub model: Option<String>,
    /// Client-supplied id; a UUID is generated when absent
    pub request_id: Option<String>,
    /// Per-request deadline override in milliseconds
    pub timeout_ms: Option<u64>,
}

impl CommentRequest {
    pub fn new(new_method: impl Into<String>) -> Self {
        Self {
            new_method: new_method.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_old(mut self, old_method: impl Into<String>, old_comment: impl Into<String>) -> Self {
        self.old_method = Some(old_method.into());
        self.old_comment = Some(old_comment.into());
        self
    }

    pub fn with_rag_example(mut self, example: impl Into<String>) -> Self {
        self.rag_example = Some(example.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Check the request before anything is scheduled
    pub fn validate(&self) -> Result<(), CommentError> {
        if self.new_method.trim().is_empty() {
            return Err(CommentError::InvalidRequest(
                "new_method must not be blank".to_string(),
            ));
        }
        if self.timeout_ms == Some(0) {
            return Err(CommentError::InvalidRequest(
                "timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Caller API key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Per-caller context carried explicitly from the submitting caller into the worker task.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Tenant (user) the request belongs to; scopes cache keys
    pub tenant: String,
    pub credential: Option<ApiKey>,
}

impl RequestContext {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, key: ApiKey) -> Self {
        self.credential = Some(key);
        self
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn has_credential(&self) -> bool {
        self.credential
            .as_ref()
            .map(|k| !k.expose().trim().is_empty())
            .unwrap_or(false)
    }
}

/// Response returned to callers for successful and cancelled requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentResponse {
    pub success: bool,
    pub generated_comment: Option<String>,
    pub model_used: Option<String>,
    pub processing_time_ms: Option<u64>,
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CommentResponse {
    pub fn success(comment: impl Into<String>) -> Self {
        Self {
            success: true,
            generated_comment: Some(comment.into()),
            model_used: None,
            processing_time_ms: None,
            request_id: None,
            timestamp: Utc::now(),
            error_message: None,
            cancelled: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn cancelled(request_id: impl Into<String>) -> Self {
        Self {
            success: false,
            generated_comment: None,
            model_used: None,
            processing_time_ms: None,
            request_id: Some(request_id.into()),
            timestamp: Utc::now(),
            error_message: Some("request cancelled".to_string()),
            cancelled: true,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_model_used(mut self, model: impl Into<String>) -> Self {
        self.model_used = Some(model.into());
        self
    }

    pub fn with_processing_time(mut self, time_ms: u64) -> Self {
        self.processing_time_ms = Some(time_ms);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Terminal result of one request
///
/// Exactly one of these is ever stored in a [`RequestHandle`](crate::handle::RequestHandle).
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(CommentResponse),
    Cancelled(CommentResponse),
    TimedOut { request_id: String, elapsed_ms: u64 },
    Failed(Arc<CommentError>),
}

impl Outcome {
    pub fn failed(error: CommentError) -> Self {
        Outcome::Failed(Arc::new(error))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled(_))
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Outcome::TimedOut { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// Response carried by success and cancellation outcomes
    pub fn response(&self) -> Option<&CommentResponse> {
        match self {
            Outcome::Success(r) | Outcome::Cancelled(r) => Some(r),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&CommentError> {
        match self {
            Outcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            Outcome::Success(_) | Outcome::Cancelled(_) => ErrorCode::Success,
            Outcome::TimedOut { .. } => ErrorCode::LlmTimeout,
            Outcome::Failed(e) => e.code(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Cancelled(_) => "cancelled",
            Outcome::TimedOut { .. } => "timed_out",
            Outcome::Failed(_) => "failed",
        }
    }
}
