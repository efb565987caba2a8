//! Canonical error and result types for the crate.
//!
//! Synchronous operations translate provider failures into this taxonomy at
//! the API boundary. Errors are cheap to clone so a single transport failure
//! can complete every tracked request with the same cause.

use std::{sync::Arc, time::Duration};

use thiserror::Error;

/// Top-level error type exposed by `courier`.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The operation is not valid for the current resource state, for
    /// example calling into a closed session or setting the client id after
    /// the connection was established.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The client id was null, empty, or rejected by the broker.
    #[error("invalid client id: {0}")]
    InvalidClientId(String),

    /// The destination was missing, deleted, or owned by another connection.
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    /// The message selector failed validation.
    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    /// The transport was lost permanently. Carries the first failure
    /// observed so that every caller sees the same root cause.
    #[error("connection failed: {0}")]
    ConnectionFailed(Arc<Error>),

    /// The operation belongs to a newer API generation excluded from this
    /// client.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A provider request did not complete within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The provider was destroyed while a request was pending. Benign during
    /// orderly shutdown, fatal otherwise.
    #[error("the provider is closed")]
    ProviderClosed,

    /// An I/O level failure reported by the provider.
    #[error("transport failure: {0}")]
    Io(String),

    /// The active transaction was discarded, typically after failover
    /// doomed it on the broker side.
    #[error("transaction rolled back: {0}")]
    TransactionRolledBack(String),
}

impl Error {
    /// Build an [`Error::IllegalState`] from any displayable message.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// Wrap the first transport failure seen on a connection.
    #[must_use]
    pub fn connection_failed(cause: Error) -> Self {
        Self::ConnectionFailed(Arc::new(cause))
    }

    /// The root failure behind a [`Error::ConnectionFailed`], or the error
    /// itself for every other kind.
    #[must_use]
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::ConnectionFailed(cause) => cause.root_cause(),
            other => other,
        }
    }
}

/// Canonical result alias used by `courier` public APIs.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failed_reports_root_cause() {
        let failure = Error::connection_failed(Error::Io("broken pipe".into()));
        assert!(matches!(failure.root_cause(), Error::Io(m) if m == "broken pipe"));
        assert_eq!(
            failure.to_string(),
            "connection failed: transport failure: broken pipe"
        );
    }

    #[test]
    fn nested_connection_failures_unwrap_to_the_original_error() {
        let inner = Error::connection_failed(Error::ProviderClosed);
        let outer = Error::connection_failed(inner);
        assert!(matches!(outer.root_cause(), Error::ProviderClosed));
    }
}
