//! Identifiers and resource descriptors shared between the client state
//! machines and the provider contract.
//!
//! Every broker-side resource the client manages is described by an info
//! struct carrying a dense, totally ordered id scoped to its parent. The
//! [`Resource`] enum is the tagged union handed to the provider for
//! create/start/stop/destroy requests and handed back on remote closure.

use std::{fmt, sync::Arc};

use crate::{
    config::ConnectionConfig,
    destination::Destination,
    error::{Error, Result},
    policy::{
        DeserializationPolicy, MessageIdPolicy, PrefetchPolicy, PresettlePolicy, RedeliveryPolicy,
    },
};

/// Opaque connection identifier, unique per connection.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
    #[must_use]
    pub fn new(value: impl Into<Arc<str>>) -> Self { Self(value.into()) }

    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

macro_rules! scoped_id {
    ($(#[$docs:meta])* $name:ident, $parent:ty, $parent_field:ident) => {
        $(#[$docs])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name {
            $parent_field: $parent,
            value: u64,
        }

        impl $name {
            #[must_use]
            pub fn new($parent_field: $parent, value: u64) -> Self {
                Self { $parent_field, value }
            }

            #[must_use]
            pub fn $parent_field(&self) -> &$parent { &self.$parent_field }

            #[must_use]
            pub fn value(&self) -> u64 { self.value }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", self.$parent_field, self.value)
            }
        }
    };
}

scoped_id!(
    /// Session identifier: connection id plus a monotonic counter.
    SessionId,
    ConnectionId,
    connection_id
);
scoped_id!(
    /// Producer identifier scoped to its owning session.
    ProducerId,
    SessionId,
    session_id
);
scoped_id!(
    /// Consumer identifier scoped to its owning session.
    ConsumerId,
    SessionId,
    session_id
);
scoped_id!(
    /// Transaction identifier: connection id plus a monotonic counter.
    TransactionId,
    ConnectionId,
    connection_id
);

/// Acknowledgement mode of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckMode {
    /// All sends and acknowledgements are grouped in local transactions.
    Transacted,
    /// Messages are acknowledged automatically after delivery.
    AutoAck,
    /// The application acknowledges delivered messages explicitly.
    ClientAck,
    /// Lazy acknowledgement that tolerates duplicates.
    DupsOk,
}

impl AckMode {
    #[must_use]
    pub fn is_transacted(self) -> bool { matches!(self, Self::Transacted) }

    /// Resolve the effective mode for a new session the way the classic
    /// two-argument creation API did: a transacted session always uses
    /// [`AckMode::Transacted`], while a non-transacted session rejects it.
    pub fn negotiate(transacted: bool, requested: AckMode) -> Result<AckMode> {
        if transacted {
            return Ok(AckMode::Transacted);
        }
        if requested.is_transacted() {
            return Err(Error::illegal_state(
                "acknowledgement mode Transacted cannot be used for a non-transacted session",
            ));
        }
        Ok(requested)
    }
}

/// Connection state declared to the provider when the connection resource is
/// created or re-declared during recovery.
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub configured_uri: Option<String>,
    pub connected_uri: Option<String>,
    pub config: ConnectionConfig,
}

/// Policy copies a session inherits from its connection at creation time.
#[derive(Clone, Debug, Default)]
pub struct SessionPolicies {
    pub message_id: MessageIdPolicy,
    pub prefetch: PrefetchPolicy,
    pub presettle: PresettlePolicy,
    pub redelivery: RedeliveryPolicy,
    pub deserialization: DeserializationPolicy,
}

/// Session state declared to the provider.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub id: SessionId,
    pub ack_mode: AckMode,
    pub send_acks_async: bool,
    pub policies: SessionPolicies,
}

/// Producer state declared to the provider. A producer without a destination
/// is anonymous and names the target per send.
#[derive(Clone, Debug)]
pub struct ProducerInfo {
    pub id: ProducerId,
    pub destination: Option<Destination>,
    pub presettle: bool,
}

/// Consumer state declared to the provider.
#[derive(Clone, Debug)]
pub struct ConsumerInfo {
    pub id: ConsumerId,
    pub destination: Destination,
    pub selector: Option<String>,
    pub no_local: bool,
    pub subscription_name: Option<String>,
    pub browser: bool,
    pub prefetch: u32,
    pub presettle: bool,
}

impl ConsumerInfo {
    #[must_use]
    pub fn is_durable(&self) -> bool { self.subscription_name.is_some() }
}

/// Transaction state used for provider commit and rollback requests.
#[derive(Clone, Debug)]
pub struct TransactionInfo {
    pub session_id: SessionId,
    pub id: TransactionId,
}

/// Tagged union of every resource the provider manages on the client's
/// behalf. Remote closure events dispatch on the tag rather than downcasting.
#[derive(Clone, Debug)]
pub enum Resource {
    Connection(ConnectionInfo),
    Session(SessionInfo),
    Producer(ProducerInfo),
    Consumer(ConsumerInfo),
    TemporaryDestination(Destination),
    Transaction(TransactionInfo),
}

impl Resource {
    /// Human readable tag used in log lines.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Session(_) => "session",
            Self::Producer(_) => "producer",
            Self::Consumer(_) => "consumer",
            Self::TemporaryDestination(_) => "temporary destination",
            Self::Transaction(_) => "transaction",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_id() -> SessionId { SessionId::new(ConnectionId::new("ID:test-1"), 2) }

    #[test]
    fn ids_render_as_colon_joined_paths() {
        let consumer = ConsumerId::new(session_id(), 7);
        assert_eq!(consumer.to_string(), "ID:test-1:2:7");
    }

    #[test]
    fn scoped_ids_compare_within_their_parent() {
        let first = ProducerId::new(session_id(), 1);
        let second = ProducerId::new(session_id(), 2);
        assert_ne!(first, second);
        assert_eq!(first.session_id(), second.session_id());
    }

    #[test]
    fn negotiate_forces_transacted_mode() {
        let mode = AckMode::negotiate(true, AckMode::AutoAck).expect("transacted wins");
        assert_eq!(mode, AckMode::Transacted);
    }

    #[test]
    fn negotiate_rejects_transacted_mode_on_plain_sessions() {
        let result = AckMode::negotiate(false, AckMode::Transacted);
        assert!(matches!(result, Err(Error::IllegalState(_))));
    }
}
