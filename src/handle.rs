//! Single-assignment request handles
//!
//! A [`RequestHandle`] is the promise side of one in-flight request. The task body, the
//! cancel path and the deadline timer all race to resolve it; the first write wins and every
//! later attempt is a no-op. Completion callbacks run exactly once, right after the winning
//! write, on whichever task performed it.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::debug;

use crate::request::{CommentResponse, Outcome};

type Callback = Box<dyn FnOnce(&Outcome) + Send + 'static>;

/// Shared handle to one request's eventual [`Outcome`]
#[derive(Clone)]
pub struct RequestHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    request_id: String,
    submitted_at: Instant,
    slot: watch::Sender<Option<Outcome>>,
    /// `None` once the callbacks have been taken by the resolver
    callbacks: Mutex<Option<Vec<Callback>>>,
}

impl RequestHandle {
    pub fn new(request_id: impl Into<String>) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            inner: Arc::new(HandleInner {
                request_id: request_id.into(),
                submitted_at: Instant::now(),
                slot,
                callbacks: Mutex::new(Some(Vec::new())),
            }),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    /// Time since the handle was created
    pub fn elapsed(&self) -> Duration {
        self.inner.submitted_at.elapsed()
    }

    pub fn is_done(&self) -> bool {
        self.inner.slot.borrow().is_some()
    }

    pub fn is_success(&self) -> bool {
        self.inner
            .slot
            .borrow()
            .as_ref()
            .map(Outcome::is_success)
            .unwrap_or(false)
    }

    /// The outcome, if resolved
    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.slot.borrow().clone()
    }

    /// Resolve the handle. Returns `true` only for the write that won.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        let snapshot = outcome.clone();
        let mut pending = Some(outcome);
        let won = self.inner.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = pending.take();
            true
        });

        if !won {
            debug!(
                "Ignoring late {} resolution, request_id={}",
                snapshot.kind(),
                self.inner.request_id
            );
            return false;
        }

        let callbacks = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .unwrap_or_default();
        for callback in callbacks {
            callback(&snapshot);
        }
        true
    }

    /// Resolve as cancelled. No-op if already resolved.
    pub fn cancel(&self) -> bool {
        self.resolve(Outcome::Cancelled(CommentResponse::cancelled(
            self.inner.request_id.clone(),
        )))
    }

    /// Register a callback to run once the handle resolves.
    ///
    /// Runs immediately on the calling thread if the handle is already resolved.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        {
            let mut guard = self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(callbacks) = guard.as_mut() {
                callbacks.push(Box::new(callback));
                return;
            }
        }

        // Resolver already took the list; the slot is set.
        if let Some(outcome) = self.outcome() {
            callback(&outcome);
        }
    }

    /// Wait for the outcome
    pub async fn wait(&self) -> Outcome {
        let mut rx = self.inner.slot.subscribe();
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            // The sender lives in `self.inner`, so `changed` cannot fail while we hold `self`.
            if rx.changed().await.is_err() {
                return Outcome::failed(crate::error::CommentError::Other(format!(
                    "handle for {} dropped before resolution",
                    self.inner.request_id
                )));
            }
        }
    }

    /// `true` if both values refer to the same handle
    pub fn ptr_eq(&self, other: &RequestHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("request_id", &self.inner.request_id)
            .field("done", &self.is_done())
            .finish()
    }
}
