//! Cancellable worker threads.
//!
//! Every node that consumes frames runs its loop on a [`Worker`]. Loops
//! block only in bounded waits and re-check their [`CancelToken`] after
//! each one, so `stop()` returns within one wait interval.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::error::{NodeError, NodeResult};

type WakeHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct TokenState {
    cancelled: AtomicBool,
    wake_hooks: Mutex<Vec<WakeHook>>,
}

/// Shared cancellation flag for a worker loop.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        !self.is_cancelled()
    }

    /// Register a hook run once on cancellation, used to kick a loop out of
    /// a wait that is not sliced.
    pub fn on_cancel(&self, hook: impl Fn() + Send + Sync + 'static) {
        let mut hooks = self
            .state
            .wake_hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        hooks.push(Box::new(hook));
    }

    /// Set the flag and run wake hooks. Idempotent.
    pub fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let hooks = std::mem::take(
            &mut *self
                .state
                .wake_hooks
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        );
        for hook in hooks {
            hook();
        }
    }

    /// Sleep up to `total`, waking every `slice` to check for cancellation.
    /// Returns `false` if cancelled before the full duration elapsed.
    pub fn sleep(&self, total: Duration, slice: Duration) -> bool {
        let deadline = Instant::now() + total;
        let slice = slice.max(Duration::from_millis(1));
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A named thread bound to a cancellation token.
pub struct Worker {
    name: String,
    token: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn `body` on a new thread. The body receives the token it must
    /// poll between bounded waits.
    pub fn spawn<F>(name: impl Into<String>, body: F) -> NodeResult<Self>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let name = name.into();
        let token = CancelToken::new();
        let thread_token = token.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(thread_token))
            .map_err(|e| NodeError::OutOfMemory(format!("spawn {name}: {e}")))?;
        tracing::debug!("worker {} started", name);
        Ok(Self {
            name,
            token,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel, wake and join. Safe to call more than once.
    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("worker {} panicked", self.name);
            } else {
                tracing::debug!("worker {} joined", self.name);
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}
