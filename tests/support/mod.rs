//! Shared scaffolding for the integration suite: a connected client over
//! the mock provider, event-recording listeners, and polling helpers for
//! work that settles on the connection and session executors.
#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use courier::{
    provider::test_support::MockProvider,
    Body, Connection, ConnectionConfig, ConnectionListener, ConsumerId, Error, InboundEnvelope,
    Message, MessageHandler, ProducerId, SessionId,
};

/// A connection attached to a fresh mock provider with default config.
pub async fn new_connection() -> (Arc<MockProvider>, Connection) {
    new_connection_with(ConnectionConfig::default()).await
}

pub async fn new_connection_with(config: ConnectionConfig) -> (Arc<MockProvider>, Connection) {
    let provider = MockProvider::new();
    let connection = Connection::new(provider.clone(), config)
        .await
        .expect("connection attaches to the mock provider");
    (provider, connection)
}

pub fn text_message(text: &str) -> Message { Message::with_body(Body::Text(text.to_owned())) }

/// Poll `predicate` until it holds or two seconds elapse.
pub async fn wait_until(predicate: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    predicate()
}

/// Message listener that stores everything it receives.
pub fn message_collector() -> (MessageHandler, Arc<Mutex<Vec<Message>>>) {
    let store: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&store);
    let handler: MessageHandler =
        Arc::new(move |message| sink.lock().expect("messages poisoned").push(message));
    (handler, store)
}

pub fn body_text(message: &Message) -> String {
    match message.body() {
        Body::Text(text) => text.clone(),
        other => panic!("expected a text body, got {other:?}"),
    }
}

/// Connection listener that records every callback as a short tag.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("events poisoned").clone()
    }

    pub fn has_event(&self, tag: &str) -> bool {
        self.events().iter().any(|event| event.starts_with(tag))
    }

    fn push(&self, event: String) {
        self.events.lock().expect("events poisoned").push(event);
    }
}

impl ConnectionListener for RecordingListener {
    fn on_connection_established(&self, remote_uri: &str) {
        self.push(format!("established:{remote_uri}"));
    }

    fn on_connection_interrupted(&self, remote_uri: &str) {
        self.push(format!("interrupted:{remote_uri}"));
    }

    fn on_connection_restored(&self, remote_uri: &str) {
        self.push(format!("restored:{remote_uri}"));
    }

    fn on_connection_failure(&self, cause: &Error) {
        self.push(format!("failure:{cause}"));
    }

    fn on_inbound_message(&self, envelope: &InboundEnvelope) {
        self.push(format!("inbound:{}", envelope.dispatch_id));
    }

    fn on_session_closed(&self, session_id: &SessionId, _cause: &Error) {
        self.push(format!("session-closed:{session_id}"));
    }

    fn on_consumer_closed(&self, consumer_id: &ConsumerId, _cause: &Error) {
        self.push(format!("consumer-closed:{consumer_id}"));
    }

    fn on_producer_closed(&self, producer_id: &ProducerId, _cause: &Error) {
        self.push(format!("producer-closed:{producer_id}"));
    }
}
