//! In-flight request tracking.
//!
//! Every provider request registers its future here before the call is
//! issued and deregisters afterwards, so that a connection failure can
//! complete everything still pending. Completion is idempotent at the
//! future level, which lets the failure path run twice: once inline to
//! unblock current awaiters and once on the executor to catch requests
//! registered in the window between the two passes.

use dashmap::DashMap;
use log::debug;

use crate::{error::Error, provider::ProviderFuture};

#[derive(Default)]
pub(crate) struct RequestTracker {
    pending: DashMap<u64, ProviderFuture>,
}

impl RequestTracker {
    pub(crate) fn new() -> Self { Self::default() }

    pub(crate) fn register(&self, request: &ProviderFuture) {
        self.pending.insert(request.token(), request.clone());
    }

    pub(crate) fn deregister(&self, request: &ProviderFuture) {
        self.pending.remove(&request.token());
    }

    /// Complete every tracked request with `cause`. Requests that already
    /// completed ignore the failure.
    pub(crate) fn fail_all(&self, cause: &Error) {
        let tokens: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        debug!("failing tracked requests: count={}, cause={cause}", tokens.len());
        for token in tokens {
            if let Some(entry) = self.pending.get(&token) {
                entry.value().on_failure(cause.clone());
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize { self.pending.len() }
}
