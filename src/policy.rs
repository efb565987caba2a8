//! Opaque policy objects copied from the connection into each session.
//!
//! Policies tune provider behaviour per resource: prefetch window sizes,
//! redelivery handling, presettled (fire and forget) sends, message id
//! generation, and body deserialization trust. The core consults them at
//! resource creation and send time and otherwise passes them through.

use crate::{destination::Destination, meta::AckMode, provider::AckType};

/// Credit window sizes granted to consumers, by destination flavour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrefetchPolicy {
    pub queue_prefetch: u32,
    pub topic_prefetch: u32,
    pub durable_topic_prefetch: u32,
    pub queue_browser_prefetch: u32,
}

impl Default for PrefetchPolicy {
    fn default() -> Self {
        Self {
            queue_prefetch: 1000,
            topic_prefetch: 1000,
            durable_topic_prefetch: 1000,
            queue_browser_prefetch: 1000,
        }
    }
}

impl PrefetchPolicy {
    /// Window size for a consumer of `destination`.
    #[must_use]
    pub fn prefetch_for(&self, destination: &Destination, durable: bool, browser: bool) -> u32 {
        if destination.is_queue() {
            if browser {
                self.queue_browser_prefetch
            } else {
                self.queue_prefetch
            }
        } else if durable {
            self.durable_topic_prefetch
        } else {
            self.topic_prefetch
        }
    }
}

/// How many redeliveries a consumer tolerates and the acknowledgement used
/// to dispose of messages that exceed the limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// Maximum redeliveries before the outcome applies; `-1` is unlimited.
    pub max_redeliveries: i32,
    /// Disposition applied once the limit is exceeded.
    pub outcome: AckType,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_redeliveries: -1,
            outcome: AckType::ModifiedFailedUndeliverable,
        }
    }
}

impl RedeliveryPolicy {
    #[must_use]
    pub fn is_exceeded(&self, redelivery_count: u32) -> bool {
        self.max_redeliveries >= 0 && redelivery_count > self.max_redeliveries as u32
    }
}

/// Controls which sends and receives are settled without awaiting broker
/// acknowledgement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PresettlePolicy {
    pub presettle_all: bool,
    pub presettle_producers: bool,
    pub presettle_topic_producers: bool,
    pub presettle_queue_producers: bool,
    pub presettle_transacted_producers: bool,
    pub presettle_consumers: bool,
}

impl PresettlePolicy {
    /// Whether a producer sending to `destination` is presettled.
    #[must_use]
    pub fn is_producer_presettled(&self, ack_mode: AckMode, destination: &Destination) -> bool {
        if self.presettle_all || self.presettle_producers {
            return true;
        }
        if ack_mode.is_transacted() && self.presettle_transacted_producers {
            return true;
        }
        if destination.is_queue() {
            self.presettle_queue_producers
        } else {
            self.presettle_topic_producers
        }
    }

    #[must_use]
    pub fn is_consumer_presettled(&self, ack_mode: AckMode) -> bool {
        // Transacted receipt always requires settlement with the broker.
        !ack_mode.is_transacted() && (self.presettle_all || self.presettle_consumers)
    }
}

/// Message id generation style for outbound messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MessageIdStyle {
    /// `ID:`-prefixed ids, the interoperable default.
    #[default]
    Prefixed,
    /// Bare producer/sequence ids for brokers that reject the prefix.
    Plain,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageIdPolicy {
    pub style: MessageIdStyle,
}

impl MessageIdPolicy {
    /// Build the provider message id for `sequence` from `producer_id`.
    #[must_use]
    pub fn build_message_id(&self, producer_id: &crate::meta::ProducerId, sequence: u64) -> String {
        match self.style {
            MessageIdStyle::Prefixed => format!("ID:{producer_id}-{sequence}"),
            MessageIdStyle::Plain => format!("{producer_id}-{sequence}"),
        }
    }
}

/// Trust lists consulted before deserializing object message bodies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeserializationPolicy {
    pub allow_list: Vec<String>,
    pub deny_list: Vec<String>,
}

impl DeserializationPolicy {
    /// A type is trusted when no deny entry matches and either the allow
    /// list is empty or one of its entries matches.
    #[must_use]
    pub fn is_trusted(&self, type_name: &str) -> bool {
        let matches = |prefix: &String| type_name.starts_with(prefix.as_str());
        if self.deny_list.iter().any(matches) {
            return false;
        }
        self.allow_list.is_empty() || self.allow_list.iter().any(matches)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::meta::{ConnectionId, ProducerId, SessionId};

    #[rstest]
    #[case::queue(Destination::queue("q"), false, false, 10)]
    #[case::browser(Destination::queue("q"), false, true, 40)]
    #[case::topic(Destination::topic("t"), false, false, 20)]
    #[case::durable(Destination::topic("t"), true, false, 30)]
    fn prefetch_selects_window_by_destination(
        #[case] destination: Destination,
        #[case] durable: bool,
        #[case] browser: bool,
        #[case] expected: u32,
    ) {
        let policy = PrefetchPolicy {
            queue_prefetch: 10,
            topic_prefetch: 20,
            durable_topic_prefetch: 30,
            queue_browser_prefetch: 40,
        };
        assert_eq!(policy.prefetch_for(&destination, durable, browser), expected);
    }

    #[test]
    fn transacted_consumers_are_never_presettled() {
        let policy = PresettlePolicy {
            presettle_all: true,
            ..PresettlePolicy::default()
        };
        assert!(policy.is_consumer_presettled(AckMode::AutoAck));
        assert!(!policy.is_consumer_presettled(AckMode::Transacted));
    }

    #[test]
    fn message_ids_carry_the_configured_prefix() {
        let producer = ProducerId::new(SessionId::new(ConnectionId::new("ID:c"), 1), 4);
        let prefixed = MessageIdPolicy::default();
        assert_eq!(prefixed.build_message_id(&producer, 9), "ID:ID:c:1:4-9");
        let plain = MessageIdPolicy {
            style: MessageIdStyle::Plain,
        };
        assert_eq!(plain.build_message_id(&producer, 9), "ID:c:1:4-9");
    }

    #[test]
    fn deny_list_wins_over_allow_list() {
        let policy = DeserializationPolicy {
            allow_list: vec!["com.example".into()],
            deny_list: vec!["com.example.internal".into()],
        };
        assert!(policy.is_trusted("com.example.Order"));
        assert!(!policy.is_trusted("com.example.internal.Secret"));
        assert!(!policy.is_trusted("org.other.Thing"));
    }

    #[test]
    fn unlimited_redelivery_never_exceeds() {
        let policy = RedeliveryPolicy::default();
        assert!(!policy.is_exceeded(u32::MAX));
        let bounded = RedeliveryPolicy {
            max_redeliveries: 2,
            ..RedeliveryPolicy::default()
        };
        assert!(!bounded.is_exceeded(2));
        assert!(bounded.is_exceeded(3));
    }
}
