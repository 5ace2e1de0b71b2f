//! In-flight request registry
//!
//! Maps a request id to its handle, the interrupt of the worker currently running it, and
//! the cancelled / timed-out flags consulted at checkpoints. Entries are removed by a
//! completion callback installed at registration, so a resolved request never lingers.
//!
//! Policies:
//! - a second registration under a live id is rejected with
//!   [`CommentError::DuplicateRequestId`];
//! - `cancel` and `timeout` on an unknown or empty id do nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{CommentError, Result};
use crate::handle::RequestHandle;

/// Forceful abort signal for the worker running a request.
///
/// Cloning shares the underlying signal. Interrupting is idempotent.
#[derive(Debug, Clone, Default)]
pub struct WorkerInterrupt {
    token: CancellationToken,
}

impl WorkerInterrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.token.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once [`interrupt`](Self::interrupt) has been called
    pub async fn interrupted(&self) {
        self.token.cancelled().await
    }
}

struct Entry {
    handle: RequestHandle,
    worker: Option<WorkerInterrupt>,
    cancelled: bool,
    timed_out: bool,
}

/// Process-wide table of in-flight requests
#[derive(Default)]
pub struct RequestRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl RequestRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a handle and arrange for its automatic removal on completion.
    pub fn register(self: &Arc<Self>, request_id: &str, handle: RequestHandle) -> Result<()> {
        if request_id.is_empty() {
            return Ok(());
        }

        {
            let mut entries = self.lock();
            if entries.contains_key(request_id) {
                return Err(CommentError::DuplicateRequestId(request_id.to_string()));
            }
            entries.insert(
                request_id.to_string(),
                Entry {
                    handle: handle.clone(),
                    worker: None,
                    cancelled: false,
                    timed_out: false,
                },
            );
        }

        let registry: Weak<Self> = Arc::downgrade(self);
        let id = request_id.to_string();
        let registered = handle.clone();
        handle.on_complete(move |_| {
            if let Some(registry) = registry.upgrade() {
                registry.remove_if_current(&id, &registered);
            }
        });

        debug!("Registered request {}", request_id);
        Ok(())
    }

    /// Record the interrupt of the worker now running `handle`, replacing any previous one.
    ///
    /// Returns `false` if `handle` is no longer the live registration for its id (it already
    /// resolved, or the id was reused by a newer request).
    pub fn register_worker(&self, handle: &RequestHandle, worker: WorkerInterrupt) -> bool {
        let request_id = handle.request_id();
        if request_id.is_empty() {
            return false;
        }
        match self.lock().get_mut(request_id) {
            Some(entry) if entry.handle.ptr_eq(handle) => {
                entry.worker = Some(worker);
                true
            }
            _ => false,
        }
    }

    /// Cancel a request: flag it, interrupt its worker, and resolve its handle as cancelled.
    pub fn cancel(&self, request_id: &str) {
        if request_id.is_empty() {
            return;
        }

        let (handle, worker) = {
            let mut entries = self.lock();
            match entries.get_mut(request_id) {
                Some(entry) => {
                    entry.cancelled = true;
                    (entry.handle.clone(), entry.worker.clone())
                }
                None => {
                    debug!("Cancel for unknown or finished request {}", request_id);
                    return;
                }
            }
        };

        if let Some(worker) = worker.filter(|w| !w.is_interrupted()) {
            worker.interrupt();
        }
        if handle.cancel() {
            info!("Cancelled request request_id={}", request_id);
        }
    }

    /// Flag a request as timed out and interrupt its worker. Does not resolve the handle.
    pub fn timeout(&self, request_id: &str) {
        if request_id.is_empty() {
            return;
        }

        let worker = {
            let mut entries = self.lock();
            match entries.get_mut(request_id) {
                Some(entry) => {
                    entry.timed_out = true;
                    entry.worker.clone()
                }
                None => return,
            }
        };

        if let Some(worker) = worker.filter(|w| !w.is_interrupted()) {
            worker.interrupt();
        }
    }

    pub fn is_cancelled(&self, request_id: &str) -> bool {
        self.lock()
            .get(request_id)
            .map(|e| e.cancelled)
            .unwrap_or(false)
    }

    pub fn is_timed_out(&self, request_id: &str) -> bool {
        self.lock()
            .get(request_id)
            .map(|e| e.timed_out)
            .unwrap_or(false)
    }

    /// Remove all state for `request_id`. Idempotent.
    pub fn unregister(&self, request_id: &str) {
        if self.lock().remove(request_id).is_some() {
            debug!("Unregistered request {}", request_id);
        }
    }

    /// Handle registered under `request_id`, if still in flight
    pub fn lookup(&self, request_id: &str) -> Option<RequestHandle> {
        self.lock().get(request_id).map(|e| e.handle.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn remove_if_current(&self, request_id: &str, handle: &RequestHandle) {
        let mut entries = self.lock();
        if entries
            .get(request_id)
            .map(|e| e.handle.ptr_eq(handle))
            .unwrap_or(false)
        {
            entries.remove(request_id);
            debug!("Unregistered completed request {}", request_id);
        }
    }
}
