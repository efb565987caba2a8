//! Connection configuration.
//!
//! All tunables are fixed at connection construction time. Sessions copy the
//! policy objects they need so later mutation of a shared config cannot skew
//! an established session.

use std::time::Duration;

use crate::policy::{
    DeserializationPolicy, MessageIdPolicy, PrefetchPolicy, PresettlePolicy, RedeliveryPolicy,
};

/// Default window for connection establishment requests.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Default window for the final resource teardown during close.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings applied to a connection and inherited by its sessions.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    /// URI the application asked for, before any provider rewriting.
    pub configured_uri: Option<String>,

    pub connect_timeout: Duration,
    pub close_timeout: Duration,
    /// `None` waits indefinitely for send completion.
    pub send_timeout: Option<Duration>,
    /// `None` waits indefinitely for any other provider request.
    pub request_timeout: Option<Duration>,

    /// Await broker acknowledgement for every send.
    pub force_sync_send: bool,
    /// Never await broker acknowledgement, even for persistent sends.
    pub force_async_send: bool,
    /// Dispatch acknowledgements without awaiting their completion.
    pub force_async_acks: bool,
    /// Stamp the authenticated user id on outbound messages.
    pub populate_user_id: bool,
    /// Reject property names that are not valid identifiers.
    pub validate_property_names: bool,
    /// Filter expired messages client side before delivery.
    pub local_message_expiry: bool,
    /// Reorder prefetched messages by priority client side.
    pub local_message_priority: bool,
    /// Timed receives only consult the local prefetch buffer.
    pub receive_local_only: bool,
    /// No-wait receives only consult the local prefetch buffer.
    pub receive_no_wait_local_only: bool,

    /// Prefix prepended to queue names before they reach the broker.
    pub queue_prefix: Option<String>,
    /// Prefix prepended to topic names before they reach the broker.
    pub topic_prefix: Option<String>,

    pub prefetch: PrefetchPolicy,
    pub redelivery: RedeliveryPolicy,
    pub presettle: PresettlePolicy,
    pub message_id: MessageIdPolicy,
    pub deserialization: DeserializationPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            configured_uri: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            send_timeout: None,
            request_timeout: None,
            force_sync_send: false,
            force_async_send: false,
            force_async_acks: false,
            populate_user_id: false,
            validate_property_names: true,
            local_message_expiry: true,
            local_message_priority: false,
            receive_local_only: false,
            receive_no_wait_local_only: false,
            queue_prefix: None,
            topic_prefix: None,
            prefetch: PrefetchPolicy::default(),
            redelivery: RedeliveryPolicy::default(),
            presettle: PresettlePolicy::default(),
            message_id: MessageIdPolicy::default(),
            deserialization: DeserializationPolicy::default(),
        }
    }
}

impl ConnectionConfig {
    /// Apply the configured prefix to a destination name bound for the
    /// broker. Temporary destinations are never prefixed.
    #[must_use]
    pub fn prefixed_name(&self, name: &str, queue: bool) -> String {
        let prefix = if queue {
            self.queue_prefix.as_deref()
        } else {
            self.topic_prefix.as_deref()
        };
        match prefix {
            Some(prefix) => format!("{prefix}{name}"),
            None => name.to_owned(),
        }
    }

    /// Username encoded for the user-id message header.
    #[must_use]
    pub fn encoded_username(&self) -> Option<bytes::Bytes> {
        self.username
            .as_ref()
            .map(|name| bytes::Bytes::copy_from_slice(name.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_apply_per_destination_kind() {
        let config = ConnectionConfig {
            queue_prefix: Some("queue://".into()),
            ..ConnectionConfig::default()
        };
        assert_eq!(config.prefixed_name("orders", true), "queue://orders");
        assert_eq!(config.prefixed_name("prices", false), "prices");
    }

    #[test]
    fn encoded_username_mirrors_credentials() {
        let mut config = ConnectionConfig::default();
        assert!(config.encoded_username().is_none());
        config.username = Some("alice".into());
        assert_eq!(config.encoded_username().expect("encoded"), "alice".as_bytes());
    }
}
