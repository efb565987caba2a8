//! Dispatch envelopes exchanged with the provider.
//!
//! Envelopes wrap a message with the routing metadata the state machines
//! need: the owning producer or consumer, the per-producer dispatch id used
//! for ordering, and the transaction the operation is enrolled in, if any.

use crate::{
    destination::Destination,
    message::Message,
    meta::{ConsumerId, ProducerId, TransactionId},
};

/// A message pushed to the client by the provider.
#[derive(Clone, Debug)]
pub struct InboundEnvelope {
    pub consumer_id: ConsumerId,
    pub message: Message,
    /// Provider-assigned delivery sequence for the consumer.
    pub dispatch_id: u64,
    /// Set by the transaction context when the delivery is acknowledged
    /// inside a local transaction.
    pub transaction_id: Option<TransactionId>,
    /// Deliveries the broker already attempted for this message.
    pub redelivery_count: u32,
}

impl InboundEnvelope {
    #[must_use]
    pub fn new(consumer_id: ConsumerId, message: Message, dispatch_id: u64) -> Self {
        Self {
            consumer_id,
            message,
            dispatch_id,
            transaction_id: None,
            redelivery_count: 0,
        }
    }
}

/// A message handed to the provider for transmission.
#[derive(Clone, Debug)]
pub struct OutboundEnvelope {
    pub producer_id: ProducerId,
    pub destination: Destination,
    pub message: Message,
    /// Per-producer send sequence; strictly increasing per session order.
    pub dispatch_id: u64,
    /// Terminal on send, no broker acknowledgement expected.
    pub presettle: bool,
    /// The caller does not await the broker outcome.
    pub send_async: bool,
    /// Set by the transaction context when the send is enrolled in a local
    /// transaction.
    pub transaction_id: Option<TransactionId>,
}
