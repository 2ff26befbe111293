//! Cooperative cancellation.
//!
//! Tokens are cheap to clone and checked between yielded items in iteration
//! loops. Cancellation surfaces as the distinguished `SnapError::Cancelled`,
//! never as a generic failure. Listeners registered for cancellation are
//! removed on normal completion so long-lived tokens do not accumulate dead
//! callbacks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Result, SnapError};

type Listener = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

/// Handle identifying one registered cancellation listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Shared cancellation flag with synchronous listeners.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the flag and fire listeners in registration order. Idempotent;
    /// listeners fire at most once.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        for (_, listener) in listeners.iter() {
            listener();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Bail with `SnapError::Cancelled` when the flag is set. Call between
    /// items in any loop that can run long.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SnapError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Register a listener fired once on cancellation. Fires immediately if
    /// the token is already cancelled.
    pub fn on_cancel(&self, f: impl Fn() + Send + Sync + 'static) -> ListenerId {
        if self.is_cancelled() {
            f();
            return ListenerId(u64::MAX);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        listeners.push((id, Box::new(f)));
        ListenerId(id)
    }

    /// Deregister a listener; required on normal completion to avoid leaks.
    pub fn remove_listener(&self, id: ListenerId) {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        listeners.retain(|(lid, _)| *lid != id.0);
    }

    /// Number of live listeners (test aid).
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
