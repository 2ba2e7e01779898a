//! Debounced task: a single pending action, replaced on every new trigger
//! and cancellable on teardown.
//!
//! The domain layers (draft auto-save, search-as-you-type) each keep one of
//! these instead of ad-hoc timer juggling; replacing rather than queueing
//! is what keeps a burst of triggers from producing a burst of side
//! effects.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::AbortHandle;

pub struct DebouncedTask {
    delay: Duration,
    pending: Mutex<Option<AbortHandle>>,
}

impl DebouncedTask {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedules `run` after the delay, aborting whatever was pending. Must
    /// be called from within a tokio runtime.
    pub fn trigger<F, Fut>(&self, run: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            run().await;
        });
        let mut pending = self.lock_pending();
        if let Some(previous) = pending.replace(handle.abort_handle()) {
            previous.abort();
        }
    }

    /// Cancels the pending run, if any. Idempotent.
    pub fn cancel(&self) {
        if let Some(handle) = self.lock_pending().take() {
            handle.abort();
        }
    }

    /// `true` while a run is scheduled or executing.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.lock_pending()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<AbortHandle>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for DebouncedTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
