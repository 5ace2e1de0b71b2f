//! Per-request deadlines
//!
//! One timer task per request races the request's own completion. When the timer wins it
//! marks the request timed out in the registry (interrupting the worker) and then resolves
//! the handle with [`Outcome::TimedOut`]. Any other resolution disarms the timer through a
//! completion callback, so a late timer never touches a resolved handle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::warn;

use crate::handle::RequestHandle;
use crate::registry::RequestRegistry;
use crate::request::Outcome;

#[derive(Clone)]
pub struct DeadlineScheduler {
    runtime: Handle,
    armed: Arc<AtomicUsize>,
}

/// Decrements the armed count when the timer task finishes or is aborted
struct ArmedGuard(Arc<AtomicUsize>);

impl Drop for ArmedGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DeadlineScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            armed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Arm a deadline for `handle`
    pub fn arm(&self, handle: &RequestHandle, timeout: Duration, registry: Arc<RequestRegistry>) {
        self.armed.fetch_add(1, Ordering::SeqCst);
        let guard = ArmedGuard(self.armed.clone());
        let target = handle.clone();

        let timer = self.runtime.spawn(async move {
            let _guard = guard;
            tokio::time::sleep(timeout).await;
            fire(&target, timeout, &registry);
        });

        let abort = timer.abort_handle();
        handle.on_complete(move |_| abort.abort());
    }

    /// Timers that have neither fired nor been disarmed yet
    pub fn armed(&self) -> usize {
        self.armed.load(Ordering::SeqCst)
    }
}

fn fire(handle: &RequestHandle, timeout: Duration, registry: &RequestRegistry) {
    if handle.is_done() {
        return;
    }

    let request_id = handle.request_id().to_string();
    warn!(
        "Comment request timed out, request_id={}, timeout_ms={}",
        request_id,
        timeout.as_millis()
    );
    registry.timeout(&request_id);
    handle.resolve(Outcome::TimedOut {
        elapsed_ms: handle.elapsed().as_millis() as u64,
        request_id,
    });
}
