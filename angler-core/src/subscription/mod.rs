use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::AbortHandle;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to a spawned listener, timer or behavior task.
///
/// Cancelling aborts the task: it is never polled again, so nothing it was
/// waiting on (timers, event receivers, pending goals) can fire afterwards.
/// `cancel` is idempotent and safe on a task that already finished.
/// Dropping the handle cancels the task.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    label: &'static str,
    handle: Option<AbortHandle>,
}

impl Subscription {
    /// Spawn `task` on the current runtime.
    pub fn spawn<F>(label: &'static str, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(task).abort_handle();
        tracing::trace!(subscription = id, label, "subscription registered");
        Self {
            id,
            label,
            handle: Some(handle),
        }
    }

    /// Run `task` once after `delay`, unless cancelled first.
    pub fn timer<F>(label: &'static str, delay: Duration, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(label, async move {
            tokio::time::sleep(delay).await;
            task.await;
        })
    }

    /// Still registered and not yet finished.
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Returns true when this call stopped a task that had not finished.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let live = !handle.is_finished();
                handle.abort();
                if live {
                    tracing::trace!(subscription = self.id, label = self.label, "subscription cancelled");
                }
                live
            }
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
