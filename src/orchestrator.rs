//! Comment generation orchestrator
//!
//! For each accepted request the orchestrator creates a [`RequestHandle`], registers it, arms
//! a deadline and hands the task body to the worker pool. The body walks a fixed sequence of
//! stages:
//!
//! ```text
//! Submitted -> Running -> CacheHit                          (resolved from cache)
//!                      -> RemoteCall -> PostProcess -> Resolved
//! ```
//!
//! Each arrow into `Running`, `RemoteCall`, `PostProcess` and `Resolved` is a checkpoint: if
//! the request was cancelled, timed out, interrupted, or already resolved, the body stops and
//! resolves as cancelled (or timed out). Cache failures never fail a request; a failed read
//! is a miss and a failed write is skipped.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{CacheGateway, CacheKey, CachedResult};
use crate::config::OrchestratorConfig;
use crate::deadline::DeadlineScheduler;
use crate::error::{CommentError, ErrorCode, Result};
use crate::handle::RequestHandle;
use crate::pool::WorkerPool;
use crate::registry::{RequestRegistry, WorkerInterrupt};
use crate::remote::{RemoteCall, RemoteCaller, RemoteError};
use crate::request::{CommentRequest, CommentResponse, Outcome, RequestContext};

/// Transformation applied to generated text before it is cached and returned
pub trait PostProcessor: Send + Sync {
    fn process(&self, generated: String) -> Result<String>;
}

/// Returns the generated text unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl PostProcessor for Passthrough {
    fn process(&self, generated: String) -> Result<String> {
        Ok(generated)
    }
}

/// Where a task body currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Submitted,
    Running,
    CacheHit,
    RemoteCall,
    PostProcess,
    Resolved,
}

/// Why a task body stopped early
enum Halt {
    /// Stopped at a checkpoint or by interruption while in `stage`
    Stopped { stage: Stage },
    Failed(CommentError),
}

impl From<CommentError> for Halt {
    fn from(err: CommentError) -> Self {
        Halt::Failed(err)
    }
}

/// Everything one task body owns
struct Job {
    request_id: String,
    request: CommentRequest,
    model: String,
    ctx: RequestContext,
    handle: RequestHandle,
}

#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    registry: Arc<RequestRegistry>,
    remote: Arc<dyn RemoteCaller>,
    cache: Arc<dyn CacheGateway>,
    post_processor: Arc<dyn PostProcessor>,
    pool: WorkerPool,
    deadlines: DeadlineScheduler,
}

impl Orchestrator {
    /// Create an orchestrator on the current tokio runtime.
    pub fn new(
        config: OrchestratorConfig,
        remote: Arc<dyn RemoteCaller>,
        cache: Arc<dyn CacheGateway>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime =
            Handle::try_current().map_err(|e| CommentError::RuntimeUnavailable(e.to_string()))?;

        info!(
            "Initializing comment orchestrator (default_model={}, default_timeout_ms={}, max_workers={})",
            config.default_model,
            config.default_timeout.as_millis(),
            config.pool.max_workers
        );

        Ok(Self {
            pool: WorkerPool::new(runtime.clone(), config.pool.clone()),
            deadlines: DeadlineScheduler::new(runtime),
            registry: RequestRegistry::new(),
            config: Arc::new(config),
            remote,
            cache,
            post_processor: Arc::new(Passthrough),
        })
    }

    pub fn with_post_processor(mut self, post_processor: impl PostProcessor + 'static) -> Self {
        self.post_processor = Arc::new(post_processor);
        self
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Accept a request and start working on it.
    ///
    /// Returns once the task is scheduled; the handle resolves later.
    pub fn submit(&self, request: CommentRequest, ctx: RequestContext) -> Result<RequestHandle> {
        request.validate()?;
        if self.config.require_credential && !ctx.has_credential() {
            warn!("Rejecting request without API key for tenant '{}'", ctx.tenant);
            return Err(CommentError::MissingCredential {
                tenant: ctx.tenant.clone(),
            });
        }

        let request_id = request
            .request_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_timeout);
        let model = request
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.config.default_model.clone());

        let handle = RequestHandle::new(request_id.clone());
        self.registry.register(&request_id, handle.clone())?;
        self.deadlines.arm(&handle, timeout, self.registry.clone());

        info!(
            "Accepted comment request request_id={}, model={}, mode={:?}, timeout_ms={}",
            request_id,
            model,
            request.mode,
            timeout.as_millis()
        );

        let job = Job {
            request_id,
            request,
            model,
            ctx,
            handle: handle.clone(),
        };
        let this = self.clone();
        if let Err(err) = self.pool.spawn(this.run(job)) {
            // Releases the registry entry and disarms the deadline
            handle.resolve(Outcome::failed(CommentError::Service {
                code: err.code(),
                message: err.to_string(),
                source: None,
            }));
            return Err(err);
        }

        Ok(handle)
    }

    /// Cancel an in-flight request. Unknown or finished ids are ignored.
    pub fn cancel(&self, request_id: &str) {
        info!("Cancel requested for request_id={}", request_id);
        self.registry.cancel(request_id);
    }

    /// Submit and wait for the outcome
    pub async fn generate(&self, request: CommentRequest, ctx: RequestContext) -> Result<Outcome> {
        let handle = self.submit(request, ctx)?;
        Ok(handle.wait().await)
    }

    /// Models the remote backend can serve for this caller
    pub async fn available_models(&self, ctx: &RequestContext) -> Result<Vec<String>> {
        Ok(self.remote.available_models(ctx).await?)
    }

    async fn run(self, job: Job) {
        let handle = job.handle.clone();
        let request_id = job.request_id.clone();

        let result = AssertUnwindSafe(self.execute(&job)).catch_unwind().await;

        let outcome = match result {
            Ok(Ok(response)) => Outcome::Success(response),
            Ok(Err(Halt::Stopped { stage })) => self.stopped_outcome(&handle, stage),
            Ok(Err(Halt::Failed(err))) => {
                error!("Comment request failed, request_id={}: {}", request_id, err);
                Outcome::failed(err.into_service())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Comment task panicked, request_id={}: {}", request_id, message);
                Outcome::failed(CommentError::Service {
                    code: ErrorCode::CommentServiceError,
                    message,
                    source: None,
                })
            }
        };

        handle.resolve(outcome);
    }

    /// Outcome for a body that stopped early.
    ///
    /// A stop caused by the deadline resolves the same way the deadline does, so the result
    /// does not depend on whether the timer or the worker resolves first.
    fn stopped_outcome(&self, handle: &RequestHandle, stage: Stage) -> Outcome {
        let request_id = handle.request_id();
        // Timed out and not cancelled: TimedOut. Anything else (cancel flag set, both flags,
        // or a bare interrupt): Cancelled.
        if self.registry.is_timed_out(request_id) && !self.registry.is_cancelled(request_id) {
            debug!("Request {} stopped at {:?} after its deadline", request_id, stage);
            return Outcome::TimedOut {
                request_id: request_id.to_string(),
                elapsed_ms: handle.elapsed().as_millis() as u64,
            };
        }

        info!("Request {} cancelled at {:?}", request_id, stage);
        Outcome::Cancelled(CommentResponse::cancelled(request_id))
    }

    async fn execute(&self, job: &Job) -> std::result::Result<CommentResponse, Halt> {
        let interrupt = WorkerInterrupt::new();
        if !self.registry.register_worker(&job.handle, interrupt.clone()) {
            debug!("Request {} resolved before its task started", job.request_id);
            return Err(Halt::Stopped {
                stage: Stage::Submitted,
            });
        }
        debug!("Task started on worker, request_id={}", job.request_id);

        let mut checkpoint = Checkpoint {
            registry: &self.registry,
            handle: &job.handle,
            interrupt: &interrupt,
            stage: Stage::Submitted,
        };
        checkpoint.advance(Stage::Running)?;

        let key = CacheKey::for_request(&job.request, &job.model, &job.ctx);
        match self.cache.get(&key).await {
            Ok(Some(hit)) => {
                info!("Cache hit for request_id={}, key={}", job.request_id, key);
                return Ok(CommentResponse::success(hit.content)
                    .with_model_used(hit.model_used)
                    .with_request_id(job.request_id.clone())
                    .with_processing_time(job.handle.elapsed().as_millis() as u64)
                    .with_metadata("cache", "hit"));
            }
            Ok(None) => debug!("Cache miss for key={}", key),
            Err(e) => warn!(
                "Cache read failed for key={}, continuing without cache: {}",
                key, e
            ),
        }

        checkpoint.advance(Stage::RemoteCall)?;

        let call = RemoteCall {
            request_id: &job.request_id,
            request: &job.request,
            model: &job.model,
            credential: job.ctx.credential.as_ref(),
        };
        let result = tokio::select! {
            biased;
            _ = interrupt.interrupted() => Err(RemoteError::Interrupted),
            result = self.remote.call(&call) => result,
        };

        let generated = match result {
            Ok(text) => text,
            Err(e) if e.is_interrupted() || checkpoint.is_stopped() => {
                info!(
                    "Remote call interrupted, request_id={}: {}",
                    job.request_id, e
                );
                return Err(Halt::Stopped {
                    stage: Stage::RemoteCall,
                });
            }
            Err(e) => {
                error!("Remote call failed, request_id={}: {}", job.request_id, e);
                return Err(Halt::Failed(e.into()));
            }
        };

        checkpoint.advance(Stage::PostProcess)?;

        let content = self.post_processor.process(generated)?;

        match self
            .cache
            .put(&key, CachedResult::new(content.clone(), job.model.clone()))
            .await
        {
            Ok(()) => debug!("Cached result for key={}", key),
            Err(e) => warn!("Cache write failed for key={}, skipping: {}", key, e),
        }

        checkpoint.advance(Stage::Resolved)?;

        Ok(CommentResponse::success(content)
            .with_model_used(job.model.clone())
            .with_request_id(job.request_id.clone())
            .with_processing_time(job.handle.elapsed().as_millis() as u64)
            .with_metadata("cache", "miss"))
    }
}

/// The single stop check consulted between stages
struct Checkpoint<'a> {
    registry: &'a RequestRegistry,
    handle: &'a RequestHandle,
    interrupt: &'a WorkerInterrupt,
    stage: Stage,
}

impl Checkpoint<'_> {
    fn is_stopped(&self) -> bool {
        let id = self.handle.request_id();
        self.handle.is_done()
            || self.interrupt.is_interrupted()
            || self.registry.is_cancelled(id)
            || self.registry.is_timed_out(id)
    }

    fn advance(&mut self, next: Stage) -> std::result::Result<(), Halt> {
        if self.is_stopped() {
            debug!(
                "Checkpoint before {:?} stopped request_id={}",
                next,
                self.handle.request_id()
            );
            return Err(Halt::Stopped { stage: self.stage });
        }
        self.stage = next;
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("task panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("task panicked: {}", s)
    } else {
        "task panicked".to_string()
    }
}
