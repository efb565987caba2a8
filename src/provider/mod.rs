//! Provider contract.
//!
//! The provider is the wire-level client that speaks the broker protocol:
//! encoder, decoder, socket I/O, and reconnection policy all live behind
//! this trait. The core issues requests paired with a [`ProviderFuture`]
//! and receives inbound messages and lifecycle events through the
//! [`ProviderListener`] it installs.

mod future;
pub mod test_support;

use std::sync::Arc;

use async_trait::async_trait;

pub use future::{ProviderFuture, ProviderSynchronization};

use crate::{
    envelope::{InboundEnvelope, OutboundEnvelope},
    error::{Error, Result},
    message::MessageFactoryHandle,
    meta::{ConsumerId, Resource, SessionId, TransactionInfo},
};

/// Disposition applied when settling an inbound delivery. Validity per
/// acknowledgement mode is a broker concern; the core forwards the kind
/// unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckType {
    /// The message reached the application but is not yet consumed.
    Delivered,
    /// The message is consumed.
    Accepted,
    /// The message is returned for immediate redelivery.
    Released,
    /// The message is rejected outright.
    Rejected,
    /// Delivery failed; redelivery counts are incremented.
    ModifiedFailed,
    /// Delivery failed and the message must not come back here.
    ModifiedFailedUndeliverable,
    /// The message is poisoned and routed to dead-letter handling.
    Poisoned,
}

/// Asynchronous transport provider the connection state machine drives.
///
/// Every request method either fails fast (for example with
/// [`Error::ProviderClosed`]) or accepts the request and completes the
/// supplied future from a provider task once the broker outcome is known.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Install the event listener. Must be called before [`Provider::start`].
    fn set_listener(&self, listener: Arc<dyn ProviderListener>);

    /// Start wire-level processing.
    async fn start(&self) -> Result<()>;

    /// Tear down the transport. Outstanding requests fail with
    /// [`Error::ProviderClosed`].
    async fn close(&self);

    async fn create(&self, resource: Resource, request: ProviderFuture) -> Result<()>;

    async fn start_resource(&self, resource: Resource, request: ProviderFuture) -> Result<()>;

    async fn stop_resource(&self, resource: Resource, request: ProviderFuture) -> Result<()>;

    async fn destroy(&self, resource: Resource, request: ProviderFuture) -> Result<()>;

    async fn send(&self, envelope: OutboundEnvelope, request: ProviderFuture) -> Result<()>;

    async fn acknowledge(
        &self,
        envelope: InboundEnvelope,
        ack_type: AckType,
        request: ProviderFuture,
    ) -> Result<()>;

    /// Acknowledge every delivered message of the session at once.
    async fn acknowledge_session(
        &self,
        session_id: SessionId,
        ack_type: AckType,
        request: ProviderFuture,
    ) -> Result<()>;

    async fn commit(&self, transaction: TransactionInfo, request: ProviderFuture) -> Result<()>;

    async fn rollback(&self, transaction: TransactionInfo, request: ProviderFuture) -> Result<()>;

    async fn recover(&self, session_id: SessionId, request: ProviderFuture) -> Result<()>;

    /// Ask the broker for one delivery on a zero-prefetch consumer.
    /// `timeout` follows pull conventions: `-1` drains immediately
    /// available messages only, `0` waits indefinitely, positive values
    /// wait that many milliseconds.
    async fn pull(
        &self,
        consumer_id: ConsumerId,
        timeout: i64,
        request: ProviderFuture,
    ) -> Result<()>;

    async fn unsubscribe(&self, subscription_name: &str, request: ProviderFuture) -> Result<()>;

    /// Factory for messages compatible with this provider's wire format.
    fn message_factory(&self) -> MessageFactoryHandle;

    /// The URI currently connected, if any.
    fn remote_uri(&self) -> Option<String>;
}

/// Events pushed by the provider from its own tasks.
///
/// Implementations must not block provider tasks on application code; the
/// connection routes user-visible callbacks through its executor for that
/// reason. The recovery pair is awaited by the provider's failover driver
/// so state re-declaration completes before traffic resumes.
#[async_trait]
pub trait ProviderListener: Send + Sync {
    fn on_inbound_message(&self, envelope: InboundEnvelope);

    fn on_connection_interrupted(&self, remote_uri: &str);

    /// Re-declare all broker-side state on `provider` after transport loss.
    async fn on_connection_recovery(&self, provider: &dyn Provider) -> Result<()>;

    /// Finalise recovery: swap provider-derived state such as the message
    /// factory and the connected URI.
    async fn on_connection_recovered(&self, provider: &dyn Provider) -> Result<()>;

    fn on_connection_restored(&self, remote_uri: &str);

    fn on_connection_established(&self, remote_uri: &str);

    fn on_connection_failure(&self, cause: Error);

    fn on_resource_closed(&self, resource: Resource, cause: Error);

    fn on_provider_exception(&self, cause: Error);
}
