//! Registry of in-flight background tasks.
//!
//! Backend invocations started by the dispatcher outlive the request that
//! triggered them. They are registered here so a graceful shutdown can wait
//! for them instead of dropping replies mid-flight.

// std::sync::Mutex is correct here: the lock is never held across .await points.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{info, warn};

// ============================================================================
// BackgroundTasks
// ============================================================================

/// Tracks spawned tasks so they can be awaited on shutdown. Cheap to clone.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task and register its handle.
    ///
    /// Registration happens before this returns, so even a task that finishes
    /// immediately is observed by `shutdown()`.
    pub fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);

        let mut guard = self.lock();
        guard.retain(|h| !h.is_finished());
        guard.push(handle);
    }

    /// Wait for every registered task to complete, including tasks spawned
    /// while waiting.
    ///
    /// A panicking task is logged and does not stop the wait for the others.
    pub async fn shutdown(&self) {
        let mut waited = false;
        loop {
            let handles = std::mem::take(&mut *self.lock());
            if handles.is_empty() {
                break;
            }

            info!(count = handles.len(), "Waiting for in-flight tasks to complete");
            waited = true;

            for (i, handle) in handles.into_iter().enumerate() {
                if let Err(e) = handle.await {
                    warn!(task = i, error = %e, "Background task panicked");
                }
            }
        }

        if waited {
            info!("All in-flight tasks completed");
        }
    }

    /// Number of tasks that have not finished yet.
    pub fn pending_count(&self) -> usize {
        let mut guard = self.lock();
        guard.retain(|h| !h.is_finished());
        guard.len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        // A panic while holding the lock cannot leave the Vec inconsistent.
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
