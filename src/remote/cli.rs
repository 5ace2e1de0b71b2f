//! Remote caller backed by an LLM command-line client
//!
//! Runs `<command> [args..] --model <id> --system-prompt <text> <prompt>` and takes stdout as
//! the generated comment. The child is killed when the call future is dropped, which is how
//! an interrupted request stops it.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::remote::{RemoteCall, RemoteCaller, RemoteError};
use crate::request::{CommentRequest, RequestMode};

/// Environment variable the caller's API key is handed to the child in
pub const API_KEY_ENV: &str = "COMMENT_API_KEY";

const GENERATE_SYSTEM_PROMPT: &str = "You are a documentation assistant. Write a concise \
doc comment for the given method. Reply with the comment only.";

const UPDATE_SYSTEM_PROMPT: &str = "You are a documentation assistant. The method below was \
changed. Update its old doc comment so it matches the new code. Reply with the comment only.";

#[derive(Clone, Debug)]
pub struct CliRemoteCaller {
    command: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CliRemoteCaller {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Arguments placed before the generated ones
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl Default for CliRemoteCaller {
    fn default() -> Self {
        Self::new("claude").with_args(["--print"])
    }
}

/// System prompt for the request's mode
pub fn system_prompt(request: &CommentRequest) -> &'static str {
    if is_update(request) {
        UPDATE_SYSTEM_PROMPT
    } else {
        GENERATE_SYSTEM_PROMPT
    }
}

/// User prompt for the request
pub fn render_prompt(request: &CommentRequest) -> String {
    if !is_update(request) {
        return format!("Method:\n{}\n", request.new_method);
    }

    let mut prompt = String::new();
    if let Some(example) = request.rag_example.as_deref().filter(|e| !e.is_empty()) {
        prompt.push_str("There are some examples:\n");
        prompt.push_str(example);
        prompt.push_str("\n\n");
    }
    prompt.push_str(&format!(
        "Old method:\n{}\n\nOld comment:\n{}\n\nNew method:\n{}\n",
        request.old_method.as_deref().unwrap_or(""),
        request.old_comment.as_deref().unwrap_or(""),
        request.new_method
    ));
    prompt
}

fn is_update(request: &CommentRequest) -> bool {
    match request.mode {
        RequestMode::Generate => false,
        RequestMode::Update | RequestMode::UpdateWithRag => request
            .old_comment
            .as_deref()
            .map(|c| !c.is_empty())
            .unwrap_or(false),
    }
}

#[async_trait]
impl RemoteCaller for CliRemoteCaller {
    async fn call(&self, call: &RemoteCall<'_>) -> Result<String, RemoteError> {
        let mut cmd = Command::new(&self.command);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.args(&self.args);
        cmd.arg("--model").arg(call.model);
        cmd.arg("--system-prompt").arg(system_prompt(call.request));

        // Prompt goes last as the positional argument
        cmd.arg(render_prompt(call.request));

        if let Some(key) = call.credential {
            cmd.env(API_KEY_ENV, key.expose());
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!(
            "Running LLM CLI {:?} for request_id={}, model={}",
            self.command,
            call.request_id,
            call.model
        );

        let output = cmd.output().await.map_err(|e| {
            RemoteError::Unavailable(format!("failed to start {:?}: {}", self.command, e))
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            tracing::warn!("LLM CLI stderr (request_id={}): {}", call.request_id, stderr);
        }

        match output.status.code() {
            Some(0) => {}
            // Terminated by a signal
            None => return Err(RemoteError::Interrupted),
            Some(code) => {
                return Err(RemoteError::Execution(format!(
                    "exit code {}: {}",
                    code, stderr
                )))
            }
        }

        let response = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if response.is_empty() {
            return Err(RemoteError::Execution("empty response".to_string()));
        }
        Ok(response)
    }
}
