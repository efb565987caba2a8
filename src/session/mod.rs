//! Session state machine.
//!
//! A session owns its producers and consumers, serialises sends so messages
//! leave in issue order, routes inbound envelopes to consumers, and
//! coordinates recover/commit/rollback with its transaction context. While
//! stopped, inbound envelopes buffer in a bounded dispatch buffer and drain
//! in arrival order on start.

mod browser;
pub(crate) mod consumer;
pub(crate) mod producer;
mod queue;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, Weak,
};

pub use browser::QueueBrowser;
pub use consumer::MessageConsumer;
pub use producer::{MessageProducer, SendOptions};

use dashmap::DashMap;
use log::{debug, info, trace, warn};

use consumer::ConsumerInner;
use producer::ProducerInner;
use queue::{BufferOffer, DispatchBuffer, STOPPED_BUFFER_CAPACITY};

use crate::{
    connection::ConnectionInner,
    destination::Destination,
    envelope::{InboundEnvelope, OutboundEnvelope},
    error::{Error, Result},
    executor::SerialExecutor,
    message::Message,
    meta::{AckMode, ConsumerId, ConsumerInfo, ProducerId, ProducerInfo, Resource, SessionId,
           SessionInfo},
    provider::{AckType, Provider, ProviderFuture},
    transaction::TransactionContext,
    util,
};

/// Callback invoked with each asynchronously delivered message.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

pub(crate) struct SessionInner {
    connection: Weak<ConnectionInner>,
    info: SessionInfo,
    producers: DashMap<ProducerId, Arc<ProducerInner>>,
    consumers: DashMap<ConsumerId, Arc<ConsumerInner>>,
    listener: Mutex<Option<MessageHandler>>,
    closed: AtomicBool,
    started: AtomicBool,
    buffer: DispatchBuffer,
    dispatcher: Mutex<Option<Arc<SerialExecutor>>>,
    send_lock: tokio::sync::Mutex<()>,
    consumer_ids: AtomicU64,
    producer_ids: AtomicU64,
    pub(crate) transaction: TransactionContext,
    session_recovered: AtomicBool,
    failure_cause: Mutex<Option<Error>>,
}

impl SessionInner {
    pub(crate) fn new(connection: &Arc<ConnectionInner>, info: SessionInfo) -> Arc<Self> {
        let transaction = if info.ack_mode.is_transacted() {
            TransactionContext::local(info.id.clone())
        } else {
            TransactionContext::none()
        };
        Arc::new(Self {
            connection: Arc::downgrade(connection),
            info,
            producers: DashMap::new(),
            consumers: DashMap::new(),
            listener: Mutex::new(None),
            closed: AtomicBool::new(false),
            started: AtomicBool::new(false),
            buffer: DispatchBuffer::new(STOPPED_BUFFER_CAPACITY),
            dispatcher: Mutex::new(None),
            send_lock: tokio::sync::Mutex::new(()),
            consumer_ids: AtomicU64::new(0),
            producer_ids: AtomicU64::new(0),
            transaction,
            session_recovered: AtomicBool::new(false),
            failure_cause: Mutex::new(None),
        })
    }

    pub(crate) fn id(&self) -> &SessionId { &self.info.id }

    pub(crate) fn ack_mode(&self) -> AckMode { self.info.ack_mode }

    pub(crate) fn is_transacted(&self) -> bool { self.info.ack_mode.is_transacted() }

    pub(crate) fn connection(&self) -> Result<Arc<ConnectionInner>> {
        self.connection
            .upgrade()
            .ok_or_else(|| Error::illegal_state("the connection is closed"))
    }

    pub(crate) fn check_closed(&self) -> Result<()> {
        if !self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let cause = self.failure_cause.lock().expect("failure cause poisoned");
        Err(match cause.as_ref() {
            None => Error::illegal_state("the session is closed"),
            Some(cause) => Error::illegal_state(format!(
                "the session was closed due to an unrecoverable error: {cause}"
            )),
        })
    }

    pub(crate) fn set_failure_cause(&self, cause: Option<Error>) {
        if cause.is_some() {
            *self.failure_cause.lock().expect("failure cause poisoned") = cause;
        }
    }

    pub(crate) fn local_message_expiry(&self) -> bool {
        self.connection
            .upgrade()
            .is_some_and(|connection| connection.local_message_expiry())
    }

    pub(crate) fn redelivery_policy(&self) -> crate::policy::RedeliveryPolicy {
        self.info.policies.redelivery
    }

    pub(crate) fn check_no_message_listener(&self) -> Result<()> {
        if self.listener.lock().expect("listener poisoned").is_some() {
            return Err(Error::illegal_state(
                "cannot receive synchronously while a message listener is set",
            ));
        }
        Ok(())
    }

    fn consumer_snapshot(&self) -> Vec<Arc<ConsumerInner>> {
        self.consumers.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    fn producer_snapshot(&self) -> Vec<Arc<ProducerInner>> {
        self.producers.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub(crate) fn remove_consumer(&self, id: &ConsumerId) { self.consumers.remove(id); }

    pub(crate) fn remove_producer(&self, id: &ProducerId) { self.producers.remove(id); }

    pub(crate) fn lookup_consumer(&self, id: &ConsumerId) -> Option<Arc<ConsumerInner>> {
        self.consumers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn lookup_producer(&self, id: &ProducerId) -> Option<Arc<ProducerInner>> {
        self.producers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn is_destination_in_use(&self, destination: &Destination) -> bool {
        self.consumer_snapshot()
            .iter()
            .any(|consumer| consumer.is_using_destination(destination))
    }

    pub(crate) fn has_subscription(&self, name: &str) -> bool {
        self.consumer_snapshot()
            .iter()
            .any(|consumer| consumer.info.subscription_name.as_deref() == Some(name))
    }

    fn next_consumer_id(&self) -> ConsumerId {
        ConsumerId::new(self.info.id.clone(), self.consumer_ids.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn next_producer_id(&self) -> ProducerId {
        ProducerId::new(self.info.id.clone(), self.producer_ids.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn dispatcher(&self) -> Arc<SerialExecutor> {
        let mut slot = self.dispatcher.lock().expect("dispatcher poisoned");
        match slot.as_ref() {
            Some(dispatcher) => Arc::clone(dispatcher),
            None => {
                let dispatcher = Arc::new(SerialExecutor::new(format!(
                    "session [{}] dispatcher",
                    self.info.id
                )));
                *slot = Some(Arc::clone(&dispatcher));
                dispatcher
            }
        }
    }

    pub(crate) fn report_async_error(&self, error: Error) {
        if let Some(connection) = self.connection.upgrade() {
            connection.on_async_exception(error);
        } else {
            debug!("async error after connection drop: {error}");
        }
    }

    //----- Delivery -----------------------------------------------------//

    /// Entry point for envelopes the provider pushed at this session.
    /// Runs on a provider task and must not block.
    pub(crate) fn on_inbound_message(self: &Arc<Self>, envelope: InboundEnvelope) {
        match self.buffer.offer(envelope) {
            BufferOffer::Dispatch(envelope) => self.dispatch_later(envelope),
            BufferOffer::Buffered => {}
            BufferOffer::Overflow(envelope) => {
                warn!(
                    "stopped session buffer overflow: session={}, buffered={}, dispatch_id={}",
                    self.info.id,
                    self.buffer.buffered_len(),
                    envelope.dispatch_id
                );
                self.report_async_error(Error::illegal_state(format!(
                    "stopped session {} refused a delivery: buffer capacity {} exhausted",
                    self.info.id, STOPPED_BUFFER_CAPACITY
                )));
            }
        }
    }

    fn dispatch_later(self: &Arc<Self>, envelope: InboundEnvelope) {
        let session = Arc::clone(self);
        let accepted = self
            .dispatcher()
            .execute(async move { session.dispatch(envelope).await });
        if !accepted {
            trace!("dispatcher gone, dropping delivery: session={}", self.info.id);
        }
    }

    async fn dispatch(self: &Arc<Self>, mut envelope: InboundEnvelope) {
        if self.session_recovered.load(Ordering::Acquire) {
            envelope.message.set_redelivered(true);
        }

        let listener = self.listener.lock().expect("listener poisoned").clone();
        if let Some(listener) = listener {
            listener(envelope.message.clone());
            return;
        }

        match self.lookup_consumer(&envelope.consumer_id) {
            Some(consumer) => consumer.on_inbound_message(self, envelope).await,
            None => self.report_async_error(Error::illegal_state(format!(
                "no consumer registered for delivery: consumer={}",
                envelope.consumer_id
            ))),
        }
    }

    pub(crate) async fn acknowledge_envelope(
        &self,
        envelope: InboundEnvelope,
        ack_type: AckType,
    ) -> Result<()> {
        let connection = self.connection()?;
        self.transaction.acknowledge(&connection, envelope, ack_type).await
    }

    //----- Send ---------------------------------------------------------//

    /// Stamp headers and hand the message to the transaction context. The
    /// send lock is held across the provider hand-off so messages from this
    /// session publish in issue order.
    pub(crate) async fn send(
        self: &Arc<Self>,
        producer: &Arc<ProducerInner>,
        destination: &Destination,
        message: &mut Message,
        options: SendOptions,
    ) -> Result<()> {
        self.check_closed()?;
        let connection = self.connection()?;
        if destination.is_temporary() && connection.is_temporary_destination_deleted(destination) {
            return Err(Error::illegal_state("temporary destination has been deleted"));
        }

        let _send = self.send_lock.lock().await;

        message.set_delivery_mode(options.delivery_mode);
        message.set_priority(options.priority);
        message.set_redelivered(false);
        message.set_destination(Some(destination.clone()));

        let timestamp = util::epoch_millis();
        message.set_timestamp(if options.disable_timestamp { 0 } else { timestamp });
        message.set_expiration(if options.time_to_live > 0 {
            timestamp + options.time_to_live
        } else {
            0
        });

        let sequence = producer.next_message_sequence();
        let message_id = (!options.disable_message_id).then(|| {
            self.info
                .policies
                .message_id
                .build_message_id(producer.id(), sequence)
        });
        message.set_message_id(message_id);

        // Never trust a caller-supplied user id.
        message.set_user_id(if connection.populate_user_id() {
            connection.encoded_username()
        } else {
            None
        });

        let sync_send = connection.force_sync_send()
            || (!connection.force_async_send()
                && options.delivery_mode == crate::message::DeliveryMode::Persistent
                && !self.is_transacted());

        let presettle = producer.is_anonymous()
            && self
                .info
                .policies
                .presettle
                .is_producer_presettled(self.info.ack_mode, destination);

        let envelope = OutboundEnvelope {
            producer_id: producer.id().clone(),
            destination: destination.clone(),
            message: message.clone(),
            dispatch_id: sequence,
            presettle,
            send_async: !sync_send,
            transaction_id: None,
        };

        self.transaction.send(&connection, envelope).await
    }

    //----- Lifecycle ----------------------------------------------------//

    /// Resume delivery: drain the stopped buffer in arrival order on the
    /// dispatcher, then open every consumer's credit window.
    pub(crate) async fn start(self: &Arc<Self>) -> Result<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let session = Arc::clone(self);
        self.dispatcher().execute(async move {
            for envelope in session.buffer.release() {
                session.dispatch(envelope).await;
            }
        });

        for consumer in self.consumer_snapshot() {
            consumer.start().await?;
        }
        Ok(())
    }

    /// Suspend delivery. Queued dispatcher work still completes; envelopes
    /// arriving afterwards buffer until the next start.
    pub(crate) fn stop(&self) {
        self.started.store(false, Ordering::Release);
        self.buffer.suspend();
        for consumer in self.consumer_snapshot() {
            consumer.stop();
        }
        let dispatcher = self.dispatcher.lock().expect("dispatcher poisoned").take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.shutdown_detached();
        }
    }

    pub(crate) fn is_started(&self) -> bool { self.started.load(Ordering::Acquire) }

    /// Local teardown without provider requests: the broker-side resources
    /// are destroyed by the caller or already gone.
    pub(crate) fn shutdown(&self, cause: Option<Error>) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.set_failure_cause(cause.clone());
            self.stop();
            for consumer in self.consumer_snapshot() {
                consumer.shutdown(cause.clone(), self);
            }
            for producer in self.producer_snapshot() {
                producer.shutdown(cause.clone(), self);
            }
            self.transaction.shutdown();
        }
    }

    pub(crate) fn session_closed(&self, cause: Error) {
        info!("session remotely closed: id={}, cause={cause}", self.info.id);
        self.shutdown(Some(cause));
    }

    pub(crate) fn consumer_closed(&self, info: &ConsumerInfo, cause: Error) -> Option<ConsumerId> {
        info!("consumer remotely closed: id={}, cause={cause}", info.id);
        let consumer = self.lookup_consumer(&info.id)?;
        consumer.shutdown(Some(cause), self);
        Some(info.id.clone())
    }

    pub(crate) fn producer_closed(&self, info: &ProducerInfo, cause: Error) -> Option<ProducerId> {
        info!("producer remotely closed: id={}, cause={cause}", info.id);
        let producer = self.lookup_producer(&info.id)?;
        producer.shutdown(Some(cause), self);
        Some(info.id.clone())
    }

    //----- Recovery -----------------------------------------------------//

    pub(crate) fn on_connection_interrupted(&self) {
        trace!("session interrupted: id={}", self.info.id);
        self.transaction.on_connection_interrupted();
    }

    /// Re-declare this session and everything it owns on the recovering
    /// provider: session, fresh transaction, producers, then consumers.
    pub(crate) async fn on_connection_recovery(&self, provider: &dyn Provider) -> Result<()> {
        let connection = self.connection()?;
        let timeout = connection.request_timeout();

        let request = ProviderFuture::new();
        provider
            .create(Resource::Session(self.info.clone()), request.clone())
            .await?;
        request.sync(timeout).await?;

        self.transaction.on_connection_recovery(&connection, provider).await?;

        for producer in self.producer_snapshot() {
            producer.on_connection_recovery(provider, timeout).await?;
        }
        for consumer in self.consumer_snapshot() {
            consumer.on_connection_recovery(provider, timeout).await?;
        }
        Ok(())
    }

    pub(crate) fn on_connection_recovered(&self) {
        trace!("session recovered: id={}", self.info.id);
    }

    pub(crate) fn on_connection_restored(&self) {
        trace!("session restored: id={}", self.info.id);
    }

    //----- Creation helpers ---------------------------------------------//

    async fn create_consumer_inner(
        self: &Arc<Self>,
        destination: &Destination,
        selector: Option<&str>,
        no_local: bool,
        subscription_name: Option<String>,
        browser: bool,
    ) -> Result<Arc<ConsumerInner>> {
        self.check_closed()?;
        let connection = self.connection()?;
        if destination.is_temporary() {
            connection.check_consume_from_temporary(destination)?;
            if connection.is_temporary_destination_deleted(destination) {
                return Err(Error::InvalidDestination(
                    "temporary destination has been deleted".into(),
                ));
            }
        }
        let selector = check_selector(selector)?;

        let id = self.next_consumer_id();
        let prefetch = self.info.policies.prefetch.prefetch_for(
            destination,
            subscription_name.is_some(),
            browser,
        );
        let info = ConsumerInfo {
            id: id.clone(),
            destination: destination.clone(),
            selector,
            no_local,
            subscription_name,
            browser,
            prefetch,
            presettle: self
                .info
                .policies
                .presettle
                .is_consumer_presettled(self.info.ack_mode),
        };
        let consumer = ConsumerInner::new(info.clone(), self);

        // Register before the provider call so a prompt first delivery
        // finds its consumer; undo registration when creation fails.
        self.consumers.insert(id.clone(), Arc::clone(&consumer));
        if let Err(error) = connection.create_resource(Resource::Consumer(info)).await {
            self.consumers.remove(&id);
            return Err(error);
        }

        if self.is_started() {
            consumer.start().await?;
        }
        Ok(consumer)
    }

    async fn create_producer_inner(
        self: &Arc<Self>,
        destination: Option<&Destination>,
    ) -> Result<Arc<ProducerInner>> {
        self.check_closed()?;
        let connection = self.connection()?;

        let id = self.next_producer_id();
        let presettle = destination.is_some_and(|destination| {
            self.info
                .policies
                .presettle
                .is_producer_presettled(self.info.ack_mode, destination)
        });
        let info = ProducerInfo {
            id: id.clone(),
            destination: destination.cloned(),
            presettle,
        };
        let producer = ProducerInner::new(info.clone(), self);

        self.producers.insert(id.clone(), Arc::clone(&producer));
        if let Err(error) = connection.create_resource(Resource::Producer(info)).await {
            self.producers.remove(&id);
            return Err(error);
        }
        Ok(producer)
    }
}

/// Session handle returned by [`crate::Connection::create_session`].
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.inner.info.id).finish()
    }
}

impl Session {
    pub(crate) fn new(inner: Arc<SessionInner>) -> Self { Self { inner } }

    #[must_use]
    pub fn session_id(&self) -> &SessionId { self.inner.id() }

    #[must_use]
    pub fn ack_mode(&self) -> AckMode { self.inner.ack_mode() }

    #[must_use]
    pub fn is_transacted(&self) -> bool { self.inner.is_transacted() }

    /// Install or clear the session-wide delivery callback. When set it
    /// receives every message dispatched to this session, bypassing
    /// consumer-level listeners and queues.
    pub fn set_message_listener(&self, listener: Option<MessageHandler>) -> Result<()> {
        self.inner.check_closed()?;
        *self.inner.listener.lock().expect("listener poisoned") = listener;
        Ok(())
    }

    /// Create a consumer for `destination` with no selector.
    pub async fn create_consumer(&self, destination: &Destination) -> Result<MessageConsumer> {
        self.create_consumer_with_selector(destination, None, false).await
    }

    /// Create a consumer with an optional selector and no-local filtering.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidSelector`] when the selector is
    /// malformed, [`Error::InvalidDestination`] for deleted or foreign
    /// temporary destinations, and [`Error::IllegalState`] when closed.
    pub async fn create_consumer_with_selector(
        &self,
        destination: &Destination,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<MessageConsumer> {
        let consumer = self
            .inner
            .create_consumer_inner(destination, selector, no_local, None, false)
            .await?;
        Ok(MessageConsumer::new(consumer))
    }

    /// Create a durable topic subscriber named `name`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::IllegalState`] unless the connection carries an
    /// explicitly assigned client id, and with
    /// [`Error::InvalidDestination`] when `destination` is not a topic.
    pub async fn create_durable_subscriber(
        &self,
        destination: &Destination,
        name: &str,
        selector: Option<&str>,
        no_local: bool,
    ) -> Result<MessageConsumer> {
        if !destination.is_topic() {
            return Err(Error::InvalidDestination(
                "durable subscriptions require a topic".into(),
            ));
        }
        let connection = self.inner.connection()?;
        if !connection.is_explicit_client_id() {
            return Err(Error::illegal_state(
                "a durable subscriber requires an explicitly assigned client id",
            ));
        }
        let consumer = self
            .inner
            .create_consumer_inner(destination, selector, no_local, Some(name.to_owned()), false)
            .await?;
        Ok(MessageConsumer::new(consumer))
    }

    /// Create a producer, anonymous when `destination` is `None`.
    pub async fn create_producer(
        &self,
        destination: Option<&Destination>,
    ) -> Result<MessageProducer> {
        let producer = self.inner.create_producer_inner(destination).await?;
        Ok(MessageProducer::new(producer))
    }

    /// Create a browser over the messages waiting on a queue.
    pub async fn create_browser(
        &self,
        destination: &Destination,
        selector: Option<&str>,
    ) -> Result<QueueBrowser> {
        if !destination.is_queue() {
            return Err(Error::InvalidDestination("browsing requires a queue".into()));
        }
        let consumer = self
            .inner
            .create_consumer_inner(destination, selector, false, None, true)
            .await?;
        Ok(QueueBrowser::new(MessageConsumer::new(consumer)))
    }

    /// A queue destination with the connection's queue prefix applied.
    pub fn create_queue(&self, name: &str) -> Result<Destination> {
        self.inner.check_closed()?;
        let connection = self.inner.connection()?;
        Ok(Destination::queue(connection.prefixed_name(name, true)))
    }

    /// A topic destination with the connection's topic prefix applied.
    pub fn create_topic(&self, name: &str) -> Result<Destination> {
        self.inner.check_closed()?;
        let connection = self.inner.connection()?;
        Ok(Destination::topic(connection.prefixed_name(name, false)))
    }

    /// A broker-named temporary queue scoped to this connection.
    pub async fn create_temporary_queue(&self) -> Result<Destination> {
        self.inner.check_closed()?;
        let connection = self.inner.connection()?;
        connection.create_temporary_destination(true).await
    }

    /// A broker-named temporary topic scoped to this connection.
    pub async fn create_temporary_topic(&self) -> Result<Destination> {
        self.inner.check_closed()?;
        let connection = self.inner.connection()?;
        connection.create_temporary_destination(false).await
    }

    /// A blank message from the provider's message factory.
    pub fn create_message(&self) -> Result<Message> { self.init_message(|m| m) }

    pub fn create_bytes_message(&self) -> Result<Message> {
        self.factory_message(|factory| factory.bytes_message())
    }

    pub fn create_text_message(&self, text: Option<String>) -> Result<Message> {
        self.factory_message(|factory| factory.text_message(text))
    }

    pub fn create_map_message(&self) -> Result<Message> {
        self.factory_message(|factory| factory.map_message())
    }

    pub fn create_stream_message(&self) -> Result<Message> {
        self.factory_message(|factory| factory.stream_message())
    }

    fn init_message(&self, build: impl FnOnce(Message) -> Message) -> Result<Message> {
        self.factory_message(|factory| build(factory.message()))
    }

    fn factory_message(
        &self,
        build: impl FnOnce(&dyn crate::message::MessageFactory) -> Message,
    ) -> Result<Message> {
        self.inner.check_closed()?;
        let connection = self.inner.connection()?;
        let factory = connection.message_factory()?;
        let mut message = build(factory.as_ref());
        message.set_validate_property_names(connection.validate_property_names());
        Ok(message)
    }

    /// Acknowledge every message delivered to this session as consumed.
    /// Only meaningful in client-acknowledge mode.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::IllegalState`] on a transacted session.
    pub async fn acknowledge(&self) -> Result<()> {
        self.inner.check_closed()?;
        if self.is_transacted() {
            return Err(Error::illegal_state(
                "session acknowledge called inside a transacted session",
            ));
        }
        let connection = self.inner.connection()?;
        connection
            .acknowledge_session(self.inner.id().clone(), AckType::Accepted)
            .await
    }

    /// Redeliver unacknowledged messages of a non-transacted session.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::IllegalState`] on a transacted session.
    pub async fn recover(&self) -> Result<()> {
        self.inner.check_closed()?;
        if self.is_transacted() {
            return Err(Error::illegal_state(
                "cannot call recover on a transacted session",
            ));
        }
        let connection = self.inner.connection()?;
        connection.recover_session(self.inner.id().clone()).await?;
        self.inner.session_recovered.store(true, Ordering::Release);
        Ok(())
    }

    /// Commit the open transaction and begin its successor.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::IllegalState`] on a non-transacted session and
    /// with [`Error::TransactionRolledBack`] when the transaction was lost
    /// to failover.
    pub async fn commit(&self) -> Result<()> {
        self.inner.check_closed()?;
        if !self.is_transacted() {
            return Err(Error::illegal_state("not a transacted session"));
        }
        let connection = self.inner.connection()?;
        self.inner.transaction.commit(&connection).await
    }

    /// Roll back the open transaction and begin its successor. Consumers
    /// are suspended for the provider teardown and resumed afterwards,
    /// every one of them, even when the rollback itself failed.
    pub async fn rollback(&self) -> Result<()> {
        self.inner.check_closed()?;
        if !self.is_transacted() {
            return Err(Error::illegal_state("not a transacted session"));
        }
        let connection = self.inner.connection()?;

        let mut suspend_error = None;
        for consumer in self.inner.consumer_snapshot() {
            if let Err(error) = consumer.suspend_for_rollback().await {
                suspend_error = Some(error);
                break;
            }
        }

        let rollback_result = self.inner.transaction.rollback(&connection).await;

        let mut resume_error = None;
        for consumer in self.inner.consumer_snapshot() {
            if let Err(error) = consumer.resume_after_rollback().await {
                warn!("consumer failed to resume after rollback: {error}");
                resume_error.get_or_insert(error);
            }
        }

        rollback_result?;
        if let Some(error) = suspend_error {
            return Err(error);
        }
        match resume_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Remove a durable subscription that has no active consumer.
    pub async fn unsubscribe(&self, name: &str) -> Result<()> {
        self.inner.check_closed()?;
        let connection = self.inner.connection()?;
        connection.unsubscribe(name).await
    }

    /// Close the session, its consumers and producers, and destroy the
    /// broker-side session state. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        debug!("session closing: id={}", self.inner.id());
        let connection = self.inner.connection()?;
        self.inner.shutdown(None);
        connection.remove_session(self.inner.id());
        connection
            .destroy_resource(Resource::Session(self.inner.info.clone()))
            .await
    }

    /// Shared consumers belong to a newer API generation.
    pub fn create_shared_consumer(&self, _topic: &Destination, _name: &str) -> Result<MessageConsumer> {
        Err(Error::NotSupported("shared consumers".into()))
    }

    /// Shared durable consumers belong to a newer API generation.
    pub fn create_shared_durable_consumer(
        &self,
        _topic: &Destination,
        _name: &str,
    ) -> Result<MessageConsumer> {
        Err(Error::NotSupported("shared durable consumers".into()))
    }
}

/// Normalise and validate a message selector: blank selectors collapse to
/// `None`, unterminated string literals are rejected. Expression parsing
/// beyond that is a broker concern.
fn check_selector(selector: Option<&str>) -> Result<Option<String>> {
    let Some(selector) = selector else {
        return Ok(None);
    };
    let trimmed = selector.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.matches('\'').count() % 2 != 0 {
        return Err(Error::InvalidSelector(format!(
            "unterminated string literal in selector: {trimmed:?}"
        )));
    }
    Ok(Some(trimmed.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_selectors_collapse_to_none() {
        assert_eq!(check_selector(None).expect("none"), None);
        assert_eq!(check_selector(Some("  ")).expect("blank"), None);
        assert_eq!(
            check_selector(Some(" color = 'red' ")).expect("valid"),
            Some("color = 'red'".to_owned())
        );
    }

    #[test]
    fn unbalanced_quotes_are_rejected() {
        let result = check_selector(Some("color = 'red"));
        assert!(matches!(result, Err(Error::InvalidSelector(_))));
    }
}
