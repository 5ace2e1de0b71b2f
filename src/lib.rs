//! Cancellable, deadline-bounded, cache-fronted comment generation.
//!
//! An [`Orchestrator`] turns a [`CommentRequest`] into a generated doc comment by calling a
//! slow [`RemoteCaller`]. Every request gets a [`RequestHandle`] that resolves exactly once,
//! to success, cancellation, timeout or failure. Results are cached per tenant, model and
//! content through a [`CacheGateway`].

pub mod cache;
pub mod config;
pub mod deadline;
pub mod error;
pub mod handle;
pub mod orchestrator;
pub mod pool;
pub mod registry;
pub mod remote;
pub mod request;

pub use cache::{CacheGateway, CacheKey, CachedResult, MemoryCache};
pub use config::{OrchestratorConfig, PoolConfig, RejectionPolicy};
pub use error::{CommentError, ErrorCode, Result};
pub use handle::RequestHandle;
pub use orchestrator::{Orchestrator, Passthrough, PostProcessor, Stage};
pub use registry::{RequestRegistry, WorkerInterrupt};
pub use remote::{CliRemoteCaller, RemoteCall, RemoteCaller, RemoteError};
pub use request::{
    ApiKey, CommentRequest, CommentResponse, Outcome, RequestContext, RequestMode,
};
