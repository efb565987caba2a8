#![doc(html_root_url = "https://docs.rs/courier/latest")]
//! Client core for message-oriented middleware.
//!
//! `courier` implements the connection/session control plane and the
//! message-dispatch state machine of a standard message-service client:
//! resource lifecycle, session and consumer start/stop semantics,
//! transactional send/acknowledge coordination, asynchronous request
//! tracking, and failover-time recovery orchestration. The wire protocol
//! itself lives behind the [`provider::Provider`] contract.

pub mod config;
pub mod connection;
pub mod destination;
pub mod envelope;
pub mod error;
mod executor;
pub mod message;
pub mod meta;
pub mod policy;
pub mod provider;
pub mod session;
mod tracker;
mod transaction;
pub mod util;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionListener, ConnectionMetaData, ExceptionHandler};
pub use destination::{Destination, DestinationKind};
pub use envelope::{InboundEnvelope, OutboundEnvelope};
pub use error::{Error, Result};
pub use message::{Body, DeliveryMode, Message, MessageFactory, PropertyValue};
pub use meta::{AckMode, ConnectionId, ConsumerId, ProducerId, Resource, SessionId, TransactionId};
pub use provider::{AckType, Provider, ProviderFuture, ProviderListener};
pub use session::{
    MessageConsumer, MessageHandler, MessageProducer, QueueBrowser, SendOptions, Session,
};
