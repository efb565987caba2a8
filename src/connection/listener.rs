//! Connection lifecycle listeners.
//!
//! Listeners observe transport-level events: establishment, interruption,
//! restoration, failure, inbound traffic, and remote closure of child
//! resources. Callbacks run on the connection's executor in submission
//! order and must not block for long.

use std::sync::Arc;

use crate::{
    envelope::InboundEnvelope,
    error::Error,
    meta::{ConsumerId, ProducerId, SessionId},
};

/// Observer of connection-level events. Every method has an empty default
/// so implementations pick only what they care about.
pub trait ConnectionListener: Send + Sync {
    fn on_connection_established(&self, _remote_uri: &str) {}

    fn on_connection_interrupted(&self, _remote_uri: &str) {}

    fn on_connection_restored(&self, _remote_uri: &str) {}

    fn on_connection_failure(&self, _cause: &Error) {}

    fn on_inbound_message(&self, _envelope: &InboundEnvelope) {}

    fn on_session_closed(&self, _session_id: &SessionId, _cause: &Error) {}

    fn on_consumer_closed(&self, _consumer_id: &ConsumerId, _cause: &Error) {}

    fn on_producer_closed(&self, _producer_id: &ProducerId, _cause: &Error) {}
}

/// Callback invoked with asynchronous errors when registered.
pub type ExceptionHandler = Arc<dyn Fn(Error) + Send + Sync>;
