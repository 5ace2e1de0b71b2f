//! Bounded worker pool for task bodies
//!
//! At most `max_workers` task bodies run at once; up to `queue_capacity` more may wait for
//! a worker. Work offered beyond that is handled by the configured [`RejectionPolicy`].
//! Overflow accepted under `CallerRuns` still waits for a worker, so only the queue grows.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{PoolConfig, RejectionPolicy};
use crate::error::{CommentError, Result};

#[derive(Clone)]
pub struct WorkerPool {
    runtime: Handle,
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    config: PoolConfig,
}

/// Releases one in-flight slot when the task finishes, panics or is aborted
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(runtime: Handle, config: PoolConfig) -> Self {
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(config.max_workers)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            config,
        }
    }

    /// Accepted tasks that have not finished yet (running or queued)
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Maximum number of accepted tasks before the rejection policy applies
    pub fn capacity(&self) -> usize {
        self.config.max_workers + self.config.queue_capacity
    }

    /// Tasks currently holding a worker
    pub fn busy_workers(&self) -> usize {
        self.config.max_workers - self.permits.available_permits()
    }

    pub fn spawn<F>(&self, task: F) -> Result<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let capacity = self.capacity();
        let accepted = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_ok();

        if !accepted {
            match self.config.rejection {
                RejectionPolicy::Abort => {
                    warn!("Worker pool saturated, rejecting task (capacity {})", capacity);
                    return Err(CommentError::PoolExhausted {
                        in_flight: self.in_flight(),
                        capacity,
                    });
                }
                RejectionPolicy::CallerRuns => {
                    warn!(
                        "Worker pool saturated (capacity {}), queueing task past the limit",
                        capacity
                    );
                    self.in_flight.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let guard = InFlightGuard(self.in_flight.clone());
        let permits = self.permits.clone();
        Ok(self.runtime.spawn(async move {
            let _guard = guard;
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("Worker pool closed before task started");
                    return;
                }
            };
            task.await;
        }))
    }
}
