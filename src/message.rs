//! In-memory message model.
//!
//! The body is opaque to the core: it is carried as one of a few body kinds
//! and handed to the provider untouched. Headers mirror the standard
//! message-service set; inbound messages are flipped to read-only before
//! they reach application code.

use std::{collections::HashMap, fmt, sync::Arc};

use bytes::Bytes;

use crate::{
    destination::Destination,
    error::{Error, Result},
};

/// Default priority applied when the producer does not override it.
pub const DEFAULT_PRIORITY: u8 = 4;

/// Delivery durability requested for an outbound message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    #[default]
    Persistent,
    NonPersistent,
}

/// Typed property values carried in the message property map.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => value.fmt(f),
            Self::Int(value) => value.fmt(f),
            Self::Long(value) => value.fmt(f),
            Self::Double(value) => value.fmt(f),
            Self::String(value) => value.fmt(f),
        }
    }
}

/// Body kinds understood by the model. Encoding is a provider concern.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    Text(String),
    Map(HashMap<String, PropertyValue>),
    Stream(Vec<PropertyValue>),
}

/// A single message with standard headers, application properties, and an
/// opaque body.
#[derive(Clone, Debug, Default)]
pub struct Message {
    message_id: Option<String>,
    correlation_id: Option<String>,
    destination: Option<Destination>,
    reply_to: Option<Destination>,
    delivery_mode: DeliveryMode,
    priority: u8,
    redelivered: bool,
    /// Milliseconds since the epoch; zero means "not stamped".
    timestamp: i64,
    /// Absolute expiry in milliseconds since the epoch; zero means "never".
    expiration: i64,
    message_type: Option<String>,
    user_id: Option<Bytes>,
    properties: HashMap<String, PropertyValue>,
    body: Body,
    read_only_body: bool,
    read_only_properties: bool,
    validate_property_names: bool,
}

impl Message {
    #[must_use]
    pub fn new() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            validate_property_names: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_body(body: Body) -> Self {
        let mut message = Self::new();
        message.body = body;
        message
    }

    pub fn message_id(&self) -> Option<&str> { self.message_id.as_deref() }

    pub fn set_message_id(&mut self, id: Option<String>) { self.message_id = id; }

    pub fn correlation_id(&self) -> Option<&str> { self.correlation_id.as_deref() }

    pub fn set_correlation_id(&mut self, id: Option<String>) { self.correlation_id = id; }

    pub fn destination(&self) -> Option<&Destination> { self.destination.as_ref() }

    pub fn set_destination(&mut self, destination: Option<Destination>) {
        self.destination = destination;
    }

    pub fn reply_to(&self) -> Option<&Destination> { self.reply_to.as_ref() }

    pub fn set_reply_to(&mut self, destination: Option<Destination>) {
        self.reply_to = destination;
    }

    pub fn delivery_mode(&self) -> DeliveryMode { self.delivery_mode }

    pub fn set_delivery_mode(&mut self, mode: DeliveryMode) { self.delivery_mode = mode; }

    pub fn priority(&self) -> u8 { self.priority }

    /// Priorities are clamped to the standard 0..=9 range.
    pub fn set_priority(&mut self, priority: u8) { self.priority = priority.min(9); }

    pub fn is_redelivered(&self) -> bool { self.redelivered }

    pub fn set_redelivered(&mut self, redelivered: bool) { self.redelivered = redelivered; }

    pub fn timestamp(&self) -> i64 { self.timestamp }

    pub fn set_timestamp(&mut self, timestamp: i64) { self.timestamp = timestamp; }

    pub fn expiration(&self) -> i64 { self.expiration }

    pub fn set_expiration(&mut self, expiration: i64) { self.expiration = expiration; }

    /// Whether the message is expired relative to `now` in epoch millis.
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool { self.expiration != 0 && now > self.expiration }

    pub fn message_type(&self) -> Option<&str> { self.message_type.as_deref() }

    pub fn set_message_type(&mut self, message_type: Option<String>) {
        self.message_type = message_type;
    }

    pub fn user_id(&self) -> Option<&Bytes> { self.user_id.as_ref() }

    pub fn set_user_id(&mut self, user_id: Option<Bytes>) { self.user_id = user_id; }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> { self.properties.get(name) }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// Set an application property.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::IllegalState`] when the properties are read-only
    /// and with [`Error::IllegalState`] when name validation is enabled and
    /// `name` is not a valid identifier.
    pub fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        if self.read_only_properties {
            return Err(Error::illegal_state("message properties are read-only"));
        }
        if self.validate_property_names {
            check_property_name(name)?;
        }
        self.properties.insert(name.to_owned(), value);
        Ok(())
    }

    pub fn body(&self) -> &Body { &self.body }

    /// Replace the message body.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::IllegalState`] when the body is read-only.
    pub fn set_body(&mut self, body: Body) -> Result<()> {
        if self.read_only_body {
            return Err(Error::illegal_state("message body is read-only"));
        }
        self.body = body;
        Ok(())
    }

    /// Drop the body and make it writable again.
    pub fn clear_body(&mut self) {
        self.read_only_body = false;
        self.body = Body::Empty;
    }

    /// Drop all application properties and make them writable again.
    pub fn clear_properties(&mut self) {
        self.read_only_properties = false;
        self.properties.clear();
    }

    pub fn is_read_only_body(&self) -> bool { self.read_only_body }

    pub fn is_read_only_properties(&self) -> bool { self.read_only_properties }

    pub(crate) fn set_read_only(&mut self, body: bool, properties: bool) {
        self.read_only_body = body;
        self.read_only_properties = properties;
    }

    pub(crate) fn set_validate_property_names(&mut self, validate: bool) {
        self.validate_property_names = validate;
    }
}

fn check_property_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
        Ok(())
    } else {
        Err(Error::illegal_state(format!(
            "invalid property name: {name:?}"
        )))
    }
}

/// Creates blank messages of each supported body kind. Providers supply a
/// factory so wire-specific message facades can be swapped in transparently
/// after failover.
pub trait MessageFactory: Send + Sync {
    fn message(&self) -> Message;

    fn bytes_message(&self) -> Message { Message::with_body(Body::Bytes(Bytes::new())) }

    fn text_message(&self, text: Option<String>) -> Message {
        Message::with_body(Body::Text(text.unwrap_or_default()))
    }

    fn map_message(&self) -> Message { Message::with_body(Body::Map(HashMap::new())) }

    fn stream_message(&self) -> Message { Message::with_body(Body::Stream(Vec::new())) }
}

/// Factory producing the plain in-memory model above.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainMessageFactory;

impl MessageFactory for PlainMessageFactory {
    fn message(&self) -> Message { Message::new() }
}

/// Shared handle to a provider's message factory.
pub type MessageFactoryHandle = Arc<dyn MessageFactory>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_messages_reject_mutation() {
        let mut message = Message::new();
        message.set_read_only(true, true);
        assert!(message.set_body(Body::Text("x".into())).is_err());
        assert!(message
            .set_property("attempt", PropertyValue::Int(1))
            .is_err());
        message.clear_body();
        assert!(message.set_body(Body::Text("x".into())).is_ok());
    }

    #[test]
    fn property_names_are_validated_when_enabled() {
        let mut message = Message::new();
        let err = message
            .set_property("not a name", PropertyValue::Bool(true))
            .expect_err("space rejected");
        assert!(matches!(err, Error::IllegalState(_)));
        message.set_validate_property_names(false);
        message
            .set_property("not a name", PropertyValue::Bool(true))
            .expect("validation disabled");
    }

    #[test]
    fn expiry_is_relative_to_the_supplied_clock() {
        let mut message = Message::new();
        assert!(!message.is_expired(i64::MAX));
        message.set_expiration(1_000);
        assert!(!message.is_expired(1_000));
        assert!(message.is_expired(1_001));
    }

    #[test]
    fn priorities_clamp_to_the_standard_range() {
        let mut message = Message::new();
        message.set_priority(200);
        assert_eq!(message.priority(), 9);
    }
}
