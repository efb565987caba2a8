//! Destination value type.
//!
//! Destinations are plain values with identity: a name, a kind, and for
//! temporary destinations the id of the owning connection. Name parsing and
//! address translation are provider concerns.

use std::fmt;

use crate::meta::ConnectionId;

/// Whether a destination follows queue or topic distribution semantics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DestinationKind {
    Queue,
    Topic,
}

/// A message source or target known to the broker.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Destination {
    name: String,
    kind: DestinationKind,
    temporary: bool,
    owner: Option<ConnectionId>,
}

impl Destination {
    #[must_use]
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Queue,
            temporary: false,
            owner: None,
        }
    }

    #[must_use]
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Topic,
            temporary: false,
            owner: None,
        }
    }

    /// A temporary queue owned by `owner` for the lifetime of its connection.
    #[must_use]
    pub fn temporary_queue(name: impl Into<String>, owner: ConnectionId) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Queue,
            temporary: true,
            owner: Some(owner),
        }
    }

    /// A temporary topic owned by `owner` for the lifetime of its connection.
    #[must_use]
    pub fn temporary_topic(name: impl Into<String>, owner: ConnectionId) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Topic,
            temporary: true,
            owner: Some(owner),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    #[must_use]
    pub fn kind(&self) -> DestinationKind { self.kind }

    #[must_use]
    pub fn is_queue(&self) -> bool { self.kind == DestinationKind::Queue }

    #[must_use]
    pub fn is_topic(&self) -> bool { self.kind == DestinationKind::Topic }

    #[must_use]
    pub fn is_temporary(&self) -> bool { self.temporary }

    /// The connection that created this destination, for temporary ones.
    #[must_use]
    pub fn owner(&self) -> Option<&ConnectionId> { self.owner.as_ref() }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match (self.kind, self.temporary) {
            (DestinationKind::Queue, false) => "queue",
            (DestinationKind::Queue, true) => "temp-queue",
            (DestinationKind::Topic, false) => "topic",
            (DestinationKind::Topic, true) => "temp-topic",
        };
        write!(f, "{kind}://{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_destinations_remember_their_owner() {
        let owner = ConnectionId::new("ID:conn-1");
        let dest = Destination::temporary_queue("ID:conn-1:1", owner.clone());
        assert!(dest.is_temporary());
        assert_eq!(dest.owner(), Some(&owner));
        assert_eq!(dest.to_string(), "temp-queue://ID:conn-1:1");
    }

    #[test]
    fn named_destinations_have_no_owner() {
        let dest = Destination::topic("prices");
        assert!(dest.is_topic());
        assert!(!dest.is_temporary());
        assert!(dest.owner().is_none());
    }
}
