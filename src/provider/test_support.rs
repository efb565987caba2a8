//! Scripted in-memory provider for exercising the client state machines.
//!
//! The mock records every request it receives and, by default, completes
//! the paired future immediately. Tests can hold completions to observe
//! blocked callers, script request failures, and push inbound messages or
//! lifecycle events through the installed listener.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;

use super::{AckType, Provider, ProviderFuture, ProviderListener};
use crate::{
    envelope::{InboundEnvelope, OutboundEnvelope},
    error::{Error, Result},
    message::{Message, MessageFactoryHandle, PlainMessageFactory},
    meta::{ConsumerId, Resource, SessionId, TransactionInfo},
};

/// One recorded provider request.
#[derive(Clone, Debug)]
pub enum ProviderCall {
    Create(Resource),
    StartResource(Resource),
    StopResource(Resource),
    Destroy(Resource),
    Send(OutboundEnvelope),
    Acknowledge(InboundEnvelope, AckType),
    AcknowledgeSession(SessionId, AckType),
    Commit(TransactionInfo),
    Rollback(TransactionInfo),
    Recover(SessionId),
    Pull(ConsumerId, i64),
    Unsubscribe(String),
}

/// In-memory [`Provider`] with scriptable completions.
pub struct MockProvider {
    listener: Mutex<Option<Arc<dyn ProviderListener>>>,
    calls: Mutex<Vec<ProviderCall>>,
    held: Mutex<Vec<ProviderFuture>>,
    hold_completions: AtomicBool,
    fail_next: Mutex<Option<Error>>,
    closed: AtomicBool,
    dispatch_ids: Mutex<HashMap<ConsumerId, u64>>,
    remote_uri: String,
    factory: MessageFactoryHandle,
}

impl MockProvider {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listener: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            hold_completions: AtomicBool::new(false),
            fail_next: Mutex::new(None),
            closed: AtomicBool::new(false),
            dispatch_ids: Mutex::new(HashMap::new()),
            remote_uri: "mock://remote".to_owned(),
            factory: Arc::new(PlainMessageFactory),
        })
    }

    /// Snapshot of every request recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().expect("calls poisoned").clone()
    }

    /// Drain the recorded requests.
    #[must_use]
    pub fn take_calls(&self) -> Vec<ProviderCall> {
        std::mem::take(&mut *self.calls.lock().expect("calls poisoned"))
    }

    /// Stop completing request futures; they accumulate until
    /// [`MockProvider::complete_held`] runs or a test fails them itself.
    pub fn hold_completions(&self) {
        self.hold_completions.store(true, Ordering::SeqCst);
    }

    /// Number of requests currently held open.
    #[must_use]
    pub fn held_count(&self) -> usize { self.held.lock().expect("held poisoned").len() }

    /// Complete every held request successfully.
    pub fn complete_held(&self) {
        for request in self.held.lock().expect("held poisoned").drain(..) {
            request.on_success();
        }
    }

    /// Complete the next request future with `cause` instead of success.
    pub fn fail_next_request(&self, cause: Error) {
        *self.fail_next.lock().expect("fail_next poisoned") = Some(cause);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::SeqCst) }

    /// The installed listener; panics when the connection has not attached.
    #[must_use]
    pub fn listener(&self) -> Arc<dyn ProviderListener> {
        self.listener
            .lock()
            .expect("listener poisoned")
            .clone()
            .expect("no provider listener installed")
    }

    /// Push one message at `consumer_id`, assigning the next dispatch id.
    pub fn deliver(&self, consumer_id: ConsumerId, message: Message) {
        let dispatch_id = {
            let mut ids = self.dispatch_ids.lock().expect("dispatch ids poisoned");
            let next = ids.entry(consumer_id.clone()).or_insert(0);
            *next += 1;
            *next
        };
        self.listener()
            .on_inbound_message(InboundEnvelope::new(consumer_id, message, dispatch_id));
    }

    /// Run a full interruption/recovery cycle through the listener, the way
    /// a failover driver would.
    pub async fn drive_recovery(self: &Arc<Self>) -> Result<()> {
        let listener = self.listener();
        listener.on_connection_interrupted(&self.remote_uri);
        listener.on_connection_recovery(self.as_ref()).await?;
        listener.on_connection_recovered(self.as_ref()).await?;
        listener.on_connection_restored(&self.remote_uri);
        Ok(())
    }

    fn accept(&self, call: ProviderCall, request: ProviderFuture) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ProviderClosed);
        }
        self.calls.lock().expect("calls poisoned").push(call);
        if self.hold_completions.load(Ordering::SeqCst) {
            self.held.lock().expect("held poisoned").push(request);
        } else if let Some(cause) = self.fail_next.lock().expect("fail_next poisoned").take() {
            request.on_failure(cause);
        } else {
            request.on_success();
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn set_listener(&self, listener: Arc<dyn ProviderListener>) {
        *self.listener.lock().expect("listener poisoned") = Some(listener);
    }

    async fn start(&self) -> Result<()> { Ok(()) }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for request in self.held.lock().expect("held poisoned").drain(..) {
            request.on_failure(Error::ProviderClosed);
        }
    }

    async fn create(&self, resource: Resource, request: ProviderFuture) -> Result<()> {
        let establishing = matches!(resource, Resource::Connection(_));
        self.accept(ProviderCall::Create(resource), request)?;
        if establishing && !self.hold_completions.load(Ordering::SeqCst) {
            self.listener().on_connection_established(&self.remote_uri);
        }
        Ok(())
    }

    async fn start_resource(&self, resource: Resource, request: ProviderFuture) -> Result<()> {
        self.accept(ProviderCall::StartResource(resource), request)
    }

    async fn stop_resource(&self, resource: Resource, request: ProviderFuture) -> Result<()> {
        self.accept(ProviderCall::StopResource(resource), request)
    }

    async fn destroy(&self, resource: Resource, request: ProviderFuture) -> Result<()> {
        self.accept(ProviderCall::Destroy(resource), request)
    }

    async fn send(&self, envelope: OutboundEnvelope, request: ProviderFuture) -> Result<()> {
        self.accept(ProviderCall::Send(envelope), request)
    }

    async fn acknowledge(
        &self,
        envelope: InboundEnvelope,
        ack_type: AckType,
        request: ProviderFuture,
    ) -> Result<()> {
        self.accept(ProviderCall::Acknowledge(envelope, ack_type), request)
    }

    async fn acknowledge_session(
        &self,
        session_id: SessionId,
        ack_type: AckType,
        request: ProviderFuture,
    ) -> Result<()> {
        self.accept(ProviderCall::AcknowledgeSession(session_id, ack_type), request)
    }

    async fn commit(&self, transaction: TransactionInfo, request: ProviderFuture) -> Result<()> {
        self.accept(ProviderCall::Commit(transaction), request)
    }

    async fn rollback(&self, transaction: TransactionInfo, request: ProviderFuture) -> Result<()> {
        self.accept(ProviderCall::Rollback(transaction), request)
    }

    async fn recover(&self, session_id: SessionId, request: ProviderFuture) -> Result<()> {
        self.accept(ProviderCall::Recover(session_id), request)
    }

    async fn pull(
        &self,
        consumer_id: ConsumerId,
        timeout: i64,
        request: ProviderFuture,
    ) -> Result<()> {
        self.accept(ProviderCall::Pull(consumer_id, timeout), request)
    }

    async fn unsubscribe(&self, subscription_name: &str, request: ProviderFuture) -> Result<()> {
        self.accept(
            ProviderCall::Unsubscribe(subscription_name.to_owned()),
            request,
        )
    }

    fn message_factory(&self) -> MessageFactoryHandle { Arc::clone(&self.factory) }

    fn remote_uri(&self) -> Option<String> { Some(self.remote_uri.clone()) }
}
