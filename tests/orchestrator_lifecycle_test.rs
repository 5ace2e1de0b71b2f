//! Integration tests for the request lifecycle
//!
//! These tests drive the orchestrator through its public API with scripted backends:
//! - success, cache hits and per-request stamping
//! - cancellation before and during the remote call
//! - deadlines racing slow backends
//! - degraded caches, failing and panicking backends
//! - submission policies (duplicate ids, credentials, pool saturation)

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use ouroboros_comment::cache::{CacheConfig, CacheError};
use ouroboros_comment::{
    ApiKey, CacheGateway, CacheKey, CachedResult, CommentError, CommentRequest, ErrorCode,
    MemoryCache, Orchestrator, OrchestratorConfig, PoolConfig, PostProcessor, RejectionPolicy,
    RemoteCall, RemoteCaller, RemoteError, RequestContext, RequestRegistry,
};

// ============================================================================
// Scripted backends
// ============================================================================

/// Sleeps, then answers. Records whether its call future was dropped mid-flight.
struct ScriptedRemote {
    delay: Duration,
    reply: String,
    calls: AtomicUsize,
    active: Arc<AtomicUsize>,
    peak: AtomicUsize,
    interrupted: Arc<AtomicBool>,
    last_credential: Mutex<Option<String>>,
}

impl ScriptedRemote {
    fn new(delay_ms: u64, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::from_millis(delay_ms),
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
            interrupted: Arc::new(AtomicBool::new(false)),
            last_credential: Mutex::new(None),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Most calls that were ever in flight at the same time
    fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Leaves the active count on drop; flags interruption unless disarmed first
struct ActiveCall {
    active: Arc<AtomicUsize>,
    interrupted: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.armed {
            self.interrupted.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl RemoteCaller for ScriptedRemote {
    async fn call(&self, call: &RemoteCall<'_>) -> Result<String, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_credential.lock().unwrap() = call.credential.map(|k| k.expose().to_string());

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        let mut active = ActiveCall {
            active: self.active.clone(),
            interrupted: self.interrupted.clone(),
            armed: true,
        };
        tokio::time::sleep(self.delay).await;
        active.armed = false;

        Ok(self.reply.clone())
    }

    async fn available_models(&self, _ctx: &RequestContext) -> Result<Vec<String>, RemoteError> {
        Ok(vec!["m1".to_string(), "m2".to_string()])
    }
}

struct RefusingRemote;

#[async_trait]
impl RemoteCaller for RefusingRemote {
    async fn call(&self, _call: &RemoteCall<'_>) -> Result<String, RemoteError> {
        Err(RemoteError::Connection("connection refused".to_string()))
    }
}

struct PanickingRemote;

#[async_trait]
impl RemoteCaller for PanickingRemote {
    async fn call(&self, _call: &RemoteCall<'_>) -> Result<String, RemoteError> {
        panic!("backend exploded");
    }
}

/// Every operation fails
struct BrokenCache {
    reads: AtomicUsize,
    writes: AtomicUsize,
}

#[async_trait]
impl CacheGateway for BrokenCache {
    async fn get(&self, _key: &CacheKey) -> Result<Option<CachedResult>, CacheError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Backend("cache offline".to_string()))
    }

    async fn put(&self, _key: &CacheKey, _value: CachedResult) -> Result<(), CacheError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Backend("cache offline".to_string()))
    }
}

/// Cancels its own request after the result is computed
struct CancelAfterCompute {
    registry: Arc<RequestRegistry>,
    request_id: String,
}

impl PostProcessor for CancelAfterCompute {
    fn process(&self, generated: String) -> ouroboros_comment::Result<String> {
        self.registry.cancel(&self.request_id);
        Ok(generated)
    }
}

fn memory_cache() -> Arc<MemoryCache> {
    Arc::new(MemoryCache::new(CacheConfig::small()))
}

fn orchestrator_with(
    remote: Arc<dyn RemoteCaller>,
    cache: Arc<dyn CacheGateway>,
    config: OrchestratorConfig,
) -> Orchestrator {
    Orchestrator::new(config, remote, cache).unwrap()
}

fn request(id: &str) -> CommentRequest {
    CommentRequest::new("fn add(a: i32, b: i32) -> i32 { a + b }")
        .with_model("m1")
        .with_request_id(id)
}

async fn wait_for_calls(remote: &ScriptedRemote, n: usize) {
    for _ in 0..200 {
        if remote.calls() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("remote was never called");
}

// ============================================================================
// Success and cache
// ============================================================================

#[tokio::test]
async fn test_success_outcome() -> Result<()> {
    let remote = ScriptedRemote::new(50, "X");
    let orch = orchestrator_with(remote.clone(), memory_cache(), OrchestratorConfig::default());

    let handle = orch.submit(
        CommentRequest::new("fn a() {}")
            .with_model("m1")
            .with_timeout_ms(5000),
        RequestContext::anonymous(),
    )?;
    let request_id = handle.request_id().to_string();
    assert!(!request_id.is_empty());

    let outcome = handle.wait().await;
    assert!(outcome.is_success());
    assert!(handle.is_done());
    assert!(handle.is_success());

    let response = outcome.response().unwrap();
    assert_eq!(response.generated_comment.as_deref(), Some("X"));
    assert_eq!(response.model_used.as_deref(), Some("m1"));
    assert!(response.processing_time_ms.unwrap() >= 50);
    assert_eq!(response.request_id.as_deref(), Some(request_id.as_str()));

    assert!(orch.registry().lookup(&request_id).is_none());
    Ok(())
}

#[tokio::test]
async fn test_second_identical_request_is_cache_hit() -> Result<()> {
    let remote = ScriptedRemote::new(30, "/// Adds two numbers");
    let orch = orchestrator_with(remote.clone(), memory_cache(), OrchestratorConfig::default());
    let ctx = RequestContext::new("alice");

    let first = orch.generate(request("first"), ctx.clone()).await?;
    let second = orch.generate(request("second"), ctx).await?;

    assert_eq!(remote.calls(), 1);

    let first = first.response().unwrap();
    let second = second.response().unwrap();
    assert_eq!(second.generated_comment, first.generated_comment);
    assert_eq!(second.model_used.as_deref(), Some("m1"));
    // Stamped per request, never taken from the cache
    assert_eq!(second.request_id.as_deref(), Some("second"));
    assert!(second.processing_time_ms.unwrap() < first.processing_time_ms.unwrap());
    assert_eq!(second.metadata.get("cache").map(String::as_str), Some("hit"));
    Ok(())
}

#[tokio::test]
async fn test_cache_is_scoped_per_tenant() -> Result<()> {
    let remote = ScriptedRemote::new(1, "/// doc");
    let orch = orchestrator_with(remote.clone(), memory_cache(), OrchestratorConfig::default());

    orch.generate(request("a"), RequestContext::new("alice")).await?;
    orch.generate(request("b"), RequestContext::new("bob")).await?;

    assert_eq!(remote.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_broken_cache_degrades_to_miss() -> Result<()> {
    let remote = ScriptedRemote::new(1, "/// still works");
    let cache = Arc::new(BrokenCache {
        reads: AtomicUsize::new(0),
        writes: AtomicUsize::new(0),
    });
    let orch = orchestrator_with(remote.clone(), cache.clone(), OrchestratorConfig::default());

    for id in ["one", "two"] {
        let outcome = orch.generate(request(id), RequestContext::anonymous()).await?;
        assert!(outcome.is_success(), "{:?}", outcome);
    }

    assert_eq!(remote.calls(), 2);
    assert_eq!(cache.reads.load(Ordering::SeqCst), 2);
    assert_eq!(cache.writes.load(Ordering::SeqCst), 2);
    Ok(())
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_during_remote_call() -> Result<()> {
    let remote = ScriptedRemote::new(500, "too late");
    let orch = orchestrator_with(remote.clone(), memory_cache(), OrchestratorConfig::default());

    let handle = orch.submit(request("cancel-me"), RequestContext::anonymous())?;
    wait_for_calls(&remote, 1).await;

    let started = std::time::Instant::now();
    orch.cancel("cancel-me");
    let outcome = handle.wait().await;

    assert!(outcome.is_cancelled());
    assert!(started.elapsed() < Duration::from_millis(100));
    let response = outcome.response().unwrap();
    assert!(response.cancelled);
    assert!(!response.success);
    assert_eq!(response.request_id.as_deref(), Some("cancel-me"));

    // Give the worker a turn to drop the remote future
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(remote.was_interrupted());
    assert!(orch.registry().lookup("cancel-me").is_none());
    Ok(())
}

#[tokio::test]
async fn test_cancel_is_idempotent_and_late_cancel_is_ignored() -> Result<()> {
    let remote = ScriptedRemote::new(1, "/// kept");
    let orch = orchestrator_with(remote.clone(), memory_cache(), OrchestratorConfig::default());

    let handle = orch.submit(request("finished"), RequestContext::anonymous())?;
    let outcome = handle.wait().await;
    assert!(outcome.is_success());

    orch.cancel("finished");
    orch.cancel("finished");
    orch.cancel("never-existed");

    assert!(handle.outcome().unwrap().is_success());
    assert!(orch.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_double_cancel_in_flight() -> Result<()> {
    let remote = ScriptedRemote::new(300, "unused");
    let orch = orchestrator_with(remote.clone(), memory_cache(), OrchestratorConfig::default());

    let handle = orch.submit(request("twice"), RequestContext::anonymous())?;
    wait_for_calls(&remote, 1).await;

    orch.cancel("twice");
    orch.cancel("twice");

    assert!(handle.wait().await.is_cancelled());
    Ok(())
}

#[tokio::test]
async fn test_cancel_after_result_computed_discards_it() -> Result<()> {
    let remote = ScriptedRemote::new(1, "/// computed");
    let cache = memory_cache();
    let plain = orchestrator_with(remote.clone(), cache.clone(), OrchestratorConfig::default());
    let orch = plain.clone().with_post_processor(CancelAfterCompute {
        registry: plain.registry().clone(),
        request_id: "late".to_string(),
    });

    let outcome = orch.generate(request("late"), RequestContext::anonymous()).await?;
    assert!(outcome.is_cancelled());

    // Let the worker finish its cache write
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The computed result was still cached
    let again = plain.generate(request("again"), RequestContext::anonymous()).await?;
    assert_eq!(
        again.response().unwrap().generated_comment.as_deref(),
        Some("/// computed")
    );
    assert_eq!(remote.calls(), 1);
    Ok(())
}

// ============================================================================
// Deadlines
// ============================================================================

#[tokio::test]
async fn test_deadline_beats_slow_backend() -> Result<()> {
    let remote = ScriptedRemote::new(200, "too slow");
    let orch = orchestrator_with(remote.clone(), memory_cache(), OrchestratorConfig::default());

    let outcome = orch
        .generate(
            request("slow").with_timeout_ms(10),
            RequestContext::anonymous(),
        )
        .await?;

    assert!(outcome.is_timed_out(), "{:?}", outcome);
    assert_eq!(outcome.error_code(), ErrorCode::LlmTimeout);
    match &outcome {
        ouroboros_comment::Outcome::TimedOut {
            request_id,
            elapsed_ms,
        } => {
            assert_eq!(request_id, "slow");
            assert!(*elapsed_ms >= 10);
        }
        other => panic!("unexpected {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(remote.was_interrupted());
    assert!(orch.registry().lookup("slow").is_none());
    Ok(())
}

#[tokio::test]
async fn test_default_timeout_applies() -> Result<()> {
    let remote = ScriptedRemote::new(200, "too slow");
    let config = OrchestratorConfig::builder()
        .default_timeout(Duration::from_millis(20))
        .build();
    let orch = orchestrator_with(remote.clone(), memory_cache(), config);

    let outcome = orch.generate(request("default-deadline"), RequestContext::anonymous()).await?;
    assert!(outcome.is_timed_out());
    Ok(())
}

#[tokio::test]
async fn test_fast_result_not_overwritten_by_deadline() -> Result<()> {
    let remote = ScriptedRemote::new(5, "/// fast");
    let orch = orchestrator_with(remote.clone(), memory_cache(), OrchestratorConfig::default());

    let handle = orch.submit(
        request("fast").with_timeout_ms(60),
        RequestContext::anonymous(),
    )?;
    assert!(handle.wait().await.is_success());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(handle.outcome().unwrap().is_success());
    Ok(())
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_remote_error_is_wrapped_service_error() -> Result<()> {
    let orch = orchestrator_with(
        Arc::new(RefusingRemote),
        memory_cache(),
        OrchestratorConfig::default(),
    );

    let outcome = orch.generate(request("refused"), RequestContext::anonymous()).await?;
    assert!(outcome.is_failed());
    assert_eq!(outcome.error_code(), ErrorCode::CommentServiceError);

    let err = outcome.error().unwrap();
    let cause = std::error::Error::source(err).expect("cause attached");
    assert!(cause.to_string().contains("connection refused"));
    assert!(orch.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_panicking_backend_fails_request() -> Result<()> {
    let orch = orchestrator_with(
        Arc::new(PanickingRemote),
        memory_cache(),
        OrchestratorConfig::default(),
    );

    let outcome = orch.generate(request("boom"), RequestContext::anonymous()).await?;
    assert!(outcome.is_failed());
    assert!(outcome.error().unwrap().to_string().contains("backend exploded"));
    assert!(orch.registry().lookup("boom").is_none());
    Ok(())
}

// ============================================================================
// Submission policies
// ============================================================================

#[tokio::test]
async fn test_duplicate_live_id_rejected() -> Result<()> {
    let remote = ScriptedRemote::new(300, "unused");
    let orch = orchestrator_with(remote.clone(), memory_cache(), OrchestratorConfig::default());

    let first = orch.submit(request("dup"), RequestContext::anonymous())?;
    let err = orch
        .submit(request("dup"), RequestContext::anonymous())
        .unwrap_err();
    assert!(matches!(err, CommentError::DuplicateRequestId(ref id) if id == "dup"));

    orch.cancel("dup");
    assert!(first.wait().await.is_cancelled());

    // Free again once the first one resolved
    let reused = orch.submit(request("dup"), RequestContext::anonymous())?;
    orch.cancel("dup");
    assert!(reused.wait().await.is_cancelled());
    Ok(())
}

#[tokio::test]
async fn test_credential_required_and_forwarded() -> Result<()> {
    let remote = ScriptedRemote::new(1, "/// ok");
    let config = OrchestratorConfig::builder().require_credential(true).build();
    let orch = orchestrator_with(remote.clone(), memory_cache(), config);

    let err = orch
        .submit(request("no-key"), RequestContext::new("alice"))
        .unwrap_err();
    assert!(matches!(err, CommentError::MissingCredential { .. }));
    assert_eq!(err.code(), ErrorCode::AuthApiKeyNotSet);

    let ctx = RequestContext::new("alice").with_credential(ApiKey::new("sk-alice"));
    let outcome = orch.generate(request("with-key"), ctx).await?;
    assert!(outcome.is_success());
    assert_eq!(
        remote.last_credential.lock().unwrap().as_deref(),
        Some("sk-alice")
    );
    Ok(())
}

#[tokio::test]
async fn test_saturated_pool_rejects_with_abort_policy() -> Result<()> {
    let remote = ScriptedRemote::new(300, "unused");
    let config = OrchestratorConfig::builder()
        .pool(PoolConfig {
            max_workers: 1,
            queue_capacity: 0,
            rejection: RejectionPolicy::Abort,
        })
        .build();
    let orch = orchestrator_with(remote.clone(), memory_cache(), config);

    let busy = orch.submit(request("busy"), RequestContext::anonymous())?;
    let err = orch
        .submit(request("rejected"), RequestContext::anonymous())
        .unwrap_err();
    assert!(matches!(err, CommentError::PoolExhausted { .. }));
    assert!(orch.registry().lookup("rejected").is_none());

    orch.cancel("busy");
    assert!(busy.wait().await.is_cancelled());
    Ok(())
}

#[tokio::test]
async fn test_caller_runs_policy_accepts_overflow() -> Result<()> {
    let remote = ScriptedRemote::new(20, "/// overflow");
    let config = OrchestratorConfig::builder()
        .pool(PoolConfig {
            max_workers: 1,
            queue_capacity: 0,
            rejection: RejectionPolicy::CallerRuns,
        })
        .build();
    let orch = orchestrator_with(remote.clone(), memory_cache(), config);

    let a = orch.submit(request("a"), RequestContext::new("t1"))?;
    let b = orch.submit(request("b"), RequestContext::new("t2"))?;

    assert!(a.wait().await.is_success());
    assert!(b.wait().await.is_success());
    assert_eq!(remote.peak_concurrency(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_saturated_pool_never_exceeds_max_workers() -> Result<()> {
    let remote = ScriptedRemote::new(100, "/// bounded");
    let config = OrchestratorConfig::builder()
        .pool(PoolConfig {
            max_workers: 2,
            queue_capacity: 2,
            rejection: RejectionPolicy::CallerRuns,
        })
        .build();
    let orch = orchestrator_with(remote.clone(), memory_cache(), config);

    let mut handles = Vec::new();
    for i in 0..12 {
        let ctx = RequestContext::new(format!("tenant-{}", i));
        handles.push(orch.submit(request(&format!("bounded-{}", i)), ctx)?);
    }
    for handle in handles {
        assert!(handle.wait().await.is_success());
    }

    assert_eq!(remote.calls(), 12);
    assert!(remote.peak_concurrency() <= 2);
    Ok(())
}

#[tokio::test]
async fn test_available_models_delegates() -> Result<()> {
    let orch = orchestrator_with(
        ScriptedRemote::new(1, "x"),
        memory_cache(),
        OrchestratorConfig::default(),
    );
    let models = orch.available_models(&RequestContext::new("alice")).await?;
    assert_eq!(models, vec!["m1", "m2"]);
    Ok(())
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_requests_leave_no_entries() -> Result<()> {
    let remote = ScriptedRemote::new(10, "/// doc");
    let orch = orchestrator_with(remote.clone(), memory_cache(), OrchestratorConfig::default());

    let mut handles = Vec::new();
    for i in 0..32 {
        let req = CommentRequest::new(format!("fn f{}() {{}}", i))
            .with_model("m1")
            .with_request_id(format!("req-{}", i));
        handles.push(orch.submit(req, RequestContext::anonymous())?);
    }
    // Cancel every fourth request while the rest complete
    for i in (0..32).step_by(4) {
        orch.cancel(&format!("req-{}", i));
    }

    for (i, handle) in handles.iter().enumerate() {
        let outcome = handle.wait().await;
        if i % 4 == 0 {
            assert!(outcome.is_cancelled() || outcome.is_success());
        } else {
            assert!(outcome.is_success(), "req-{}: {:?}", i, outcome);
        }
    }

    assert!(orch.registry().is_empty());
    Ok(())
}
