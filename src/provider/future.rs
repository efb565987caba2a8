//! Completion primitive for asynchronous provider requests.
//!
//! A [`ProviderFuture`] is created by the client core, registered with the
//! request tracker, and handed to the provider alongside the request. The
//! provider completes it exactly once from its own tasks; completion is
//! idempotent so the tracker can fail outstanding requests a second time
//! during connection teardown without racing the provider.

use std::{
    pin::pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::sync::Notify;

use crate::error::{Error, Result};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Pre-completion hook owned by a [`ProviderFuture`].
///
/// The hook runs on the completing task strictly before any awaiter is
/// woken, so state transitions it performs are visible to the caller the
/// moment `sync` returns. The local transaction context uses this to roll
/// its transaction state over atomically with the provider outcome.
pub trait ProviderSynchronization: Send + Sync {
    fn on_pending_success(&self);
    fn on_pending_failure(&self, cause: &Error);
}

struct FutureState {
    token: u64,
    completed: AtomicBool,
    outcome: Mutex<Option<Result<()>>>,
    notify: Notify,
    synchronization: Option<Box<dyn ProviderSynchronization>>,
}

/// Single request completion shared between the caller, the provider, and
/// the request tracker.
#[derive(Clone)]
pub struct ProviderFuture {
    state: Arc<FutureState>,
}

impl ProviderFuture {
    #[must_use]
    pub fn new() -> Self { Self::build(None) }

    /// A future whose completion first runs `synchronization`.
    #[must_use]
    pub fn with_synchronization(synchronization: Box<dyn ProviderSynchronization>) -> Self {
        Self::build(Some(synchronization))
    }

    fn build(synchronization: Option<Box<dyn ProviderSynchronization>>) -> Self {
        Self {
            state: Arc::new(FutureState {
                token: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
                completed: AtomicBool::new(false),
                outcome: Mutex::new(None),
                notify: Notify::new(),
                synchronization,
            }),
        }
    }

    /// Identity used by the request tracker.
    #[must_use]
    pub fn token(&self) -> u64 { self.state.token }

    #[must_use]
    pub fn is_complete(&self) -> bool { self.state.completed.load(Ordering::Acquire) }

    /// Complete the request successfully. Later completions are ignored.
    pub fn on_success(&self) {
        if self.try_complete() {
            if let Some(synchronization) = &self.state.synchronization {
                synchronization.on_pending_success();
            }
            self.finish(Ok(()));
        }
    }

    /// Complete the request with `cause`. Later completions are ignored.
    pub fn on_failure(&self, cause: Error) {
        if self.try_complete() {
            if let Some(synchronization) = &self.state.synchronization {
                synchronization.on_pending_failure(&cause);
            }
            self.finish(Err(cause));
        }
    }

    fn try_complete(&self) -> bool {
        self.state
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self, outcome: Result<()>) {
        *self.state.outcome.lock().expect("future outcome poisoned") = Some(outcome);
        self.state.notify.notify_waiters();
    }

    /// Await the provider outcome.
    ///
    /// # Errors
    ///
    /// Returns the provider failure the request was completed with, or
    /// [`Error::Timeout`] when `timeout` elapses first.
    pub async fn sync(&self, timeout: Option<Duration>) -> Result<()> {
        match timeout {
            None => Ok(self.wait().await?),
            Some(window) => match tokio::time::timeout(window, self.wait()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::Timeout(window)),
            },
        }
    }

    async fn wait(&self) -> Result<()> {
        loop {
            let mut notified = pin!(self.state.notify.notified());
            notified.as_mut().enable();
            if let Some(outcome) = self
                .state
                .outcome
                .lock()
                .expect("future outcome poisoned")
                .clone()
            {
                return outcome;
            }
            notified.await;
        }
    }
}

impl Default for ProviderFuture {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Debug for ProviderFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFuture")
            .field("token", &self.state.token)
            .field("complete", &self.is_complete())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[tokio::test]
    async fn completes_waiters_with_the_first_outcome_only() {
        let future = ProviderFuture::new();
        let remote = future.clone();
        let waiter = tokio::spawn(async move { remote.sync(None).await });

        future.on_failure(Error::ProviderClosed);
        future.on_success();

        let outcome = waiter.await.expect("waiter finished");
        assert!(matches!(outcome, Err(Error::ProviderClosed)));
        assert!(future.is_complete());
    }

    #[tokio::test]
    async fn sync_after_completion_returns_immediately() {
        let future = ProviderFuture::new();
        future.on_success();
        future.sync(None).await.expect("already complete");
    }

    #[tokio::test(start_paused = true)]
    async fn sync_times_out_when_no_completion_arrives() {
        let future = ProviderFuture::new();
        let outcome = future.sync(Some(Duration::from_secs(1))).await;
        assert!(matches!(outcome, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn synchronization_runs_once_before_waiters_wake() {
        struct Counter(AtomicUsize);
        impl ProviderSynchronization for Counter {
            fn on_pending_success(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            fn on_pending_failure(&self, _cause: &Error) {
                self.0.fetch_add(100, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let hook = Arc::clone(&counter);
        struct Hook(Arc<Counter>);
        impl ProviderSynchronization for Hook {
            fn on_pending_success(&self) { self.0.on_pending_success(); }
            fn on_pending_failure(&self, cause: &Error) { self.0.on_pending_failure(cause); }
        }

        let future = ProviderFuture::with_synchronization(Box::new(Hook(hook)));
        future.on_success();
        future.on_success();
        future.sync(None).await.expect("success");
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
