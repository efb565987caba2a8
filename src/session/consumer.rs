//! Message consumer.
//!
//! Consumers receive envelopes routed through their session's dispatcher.
//! With a listener installed, delivery and acknowledgement run on the
//! session's dispatch executor; otherwise envelopes queue locally for the
//! synchronous receive calls. Rollback suspends the broker-side credit
//! window so no new deliveries race the transaction teardown.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};

use log::{debug, trace};

use crate::{
    destination::Destination,
    envelope::InboundEnvelope,
    error::{Error, Result},
    message::Message,
    meta::{AckMode, ConsumerId, ConsumerInfo, Resource},
    provider::{AckType, Provider, ProviderFuture},
    session::{queue::MessageQueue, MessageHandler, SessionInner},
    util,
};

pub(crate) struct ConsumerInner {
    pub(crate) info: ConsumerInfo,
    session: Weak<SessionInner>,
    started: AtomicBool,
    closed: AtomicBool,
    failure_cause: Mutex<Option<Error>>,
    listener: Mutex<Option<MessageHandler>>,
    queue: MessageQueue,
}

impl ConsumerInner {
    pub(crate) fn new(info: ConsumerInfo, session: &Arc<SessionInner>) -> Arc<Self> {
        Arc::new(Self {
            info,
            session: Arc::downgrade(session),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            failure_cause: Mutex::new(None),
            listener: Mutex::new(None),
            queue: MessageQueue::new(),
        })
    }

    pub(crate) fn id(&self) -> &ConsumerId { &self.info.id }

    pub(crate) fn session(&self) -> Result<Arc<SessionInner>> {
        self.session
            .upgrade()
            .ok_or_else(|| Error::illegal_state("the session is closed"))
    }

    pub(crate) fn check_closed(&self) -> Result<()> {
        if !self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let cause = self.failure_cause.lock().expect("failure cause poisoned");
        Err(match cause.as_ref() {
            None => Error::illegal_state("the consumer is closed"),
            Some(cause) => Error::illegal_state(format!(
                "the consumer was closed due to an unrecoverable error: {cause}"
            )),
        })
    }

    pub(crate) fn set_failure_cause(&self, cause: Option<Error>) {
        *self.failure_cause.lock().expect("failure cause poisoned") = cause;
    }

    pub(crate) fn is_started(&self) -> bool { self.started.load(Ordering::Acquire) }

    pub(crate) fn has_listener(&self) -> bool {
        self.listener.lock().expect("listener poisoned").is_some()
    }

    pub(crate) fn is_using_destination(&self, destination: &Destination) -> bool {
        self.info.destination == *destination
    }

    /// Open the broker-side credit window and begin local delivery.
    pub(crate) async fn start(&self) -> Result<()> {
        let session = self.session()?;
        let connection = session.connection()?;
        self.started.store(true, Ordering::Release);
        connection
            .start_resource(Resource::Consumer(self.info.clone()))
            .await
    }

    /// Stop local delivery. Prefetched envelopes keep buffering in the
    /// session until it starts again.
    pub(crate) fn stop(&self) { self.started.store(false, Ordering::Release); }

    /// Halt broker dispatch ahead of a transaction rollback.
    pub(crate) async fn suspend_for_rollback(&self) -> Result<()> {
        self.stop();
        let session = self.session()?;
        let connection = session.connection()?;
        connection
            .stop_resource(Resource::Consumer(self.info.clone()))
            .await
    }

    /// Restore broker dispatch after rollback, failed or not.
    pub(crate) async fn resume_after_rollback(&self) -> Result<()> { self.start().await }

    /// Deliver one envelope on the session dispatcher.
    pub(crate) async fn on_inbound_message(
        self: &Arc<Self>,
        session: &Arc<SessionInner>,
        envelope: InboundEnvelope,
    ) {
        if session.local_message_expiry() && envelope.message.is_expired(util::epoch_millis()) {
            trace!("dropping expired message: consumer={}", self.id());
            self.settle(session, envelope, AckType::ModifiedFailedUndeliverable)
                .await;
            return;
        }
        let redelivery = session.redelivery_policy();
        if redelivery.is_exceeded(envelope.redelivery_count) {
            debug!(
                "redelivery limit exceeded: consumer={}, count={}",
                self.id(),
                envelope.redelivery_count
            );
            self.settle(session, envelope, redelivery.outcome).await;
            return;
        }

        let listener = self.listener.lock().expect("listener poisoned").clone();
        match listener {
            Some(listener) => {
                listener(envelope.message.clone());
                let ack_type = match session.ack_mode() {
                    AckMode::ClientAck => AckType::Delivered,
                    _ => AckType::Accepted,
                };
                self.settle(session, envelope, ack_type).await;
            }
            None => {
                if !self.queue.enqueue(envelope) {
                    trace!("discarding delivery to closed consumer: id={}", self.id());
                }
            }
        }
    }

    async fn settle(
        &self,
        session: &Arc<SessionInner>,
        envelope: InboundEnvelope,
        ack_type: AckType,
    ) {
        if let Err(error) = session.acknowledge_envelope(envelope, ack_type).await {
            session.report_async_error(error);
        }
    }

    async fn ack_from_receive(
        &self,
        session: &Arc<SessionInner>,
        envelope: InboundEnvelope,
    ) -> Result<()> {
        let ack_type = match session.ack_mode() {
            AckMode::ClientAck => AckType::Delivered,
            _ => AckType::Accepted,
        };
        session.acknowledge_envelope(envelope, ack_type).await
    }

    /// Local teardown: mark closed, leave the registry, wake receivers.
    pub(crate) fn shutdown(&self, cause: Option<Error>, session: &SessionInner) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if cause.is_some() {
                self.set_failure_cause(cause);
            }
            self.stop();
            session.remove_consumer(&self.info.id);
            self.queue.close();
        }
    }

    /// Re-declare this consumer on a recovering provider, restoring its
    /// credit window when it was started before the interruption.
    pub(crate) async fn on_connection_recovery(
        &self,
        provider: &dyn Provider,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let request = ProviderFuture::new();
        provider
            .create(Resource::Consumer(self.info.clone()), request.clone())
            .await?;
        request.sync(timeout).await?;

        if self.is_started() {
            let request = ProviderFuture::new();
            provider
                .start_resource(Resource::Consumer(self.info.clone()), request.clone())
                .await?;
            request.sync(timeout).await?;
        }
        Ok(())
    }
}

/// Consumer handle returned by [`crate::Session::create_consumer`].
#[derive(Clone)]
pub struct MessageConsumer {
    inner: Arc<ConsumerInner>,
}

impl MessageConsumer {
    pub(crate) fn new(inner: Arc<ConsumerInner>) -> Self { Self { inner } }

    #[must_use]
    pub fn consumer_id(&self) -> &ConsumerId { self.inner.id() }

    #[must_use]
    pub fn destination(&self) -> &Destination { &self.inner.info.destination }

    #[must_use]
    pub fn selector(&self) -> Option<&str> { self.inner.info.selector.as_deref() }

    /// Install or clear the asynchronous delivery callback.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::IllegalState`] when the consumer is closed.
    pub fn set_message_listener(&self, listener: Option<MessageHandler>) -> Result<()> {
        self.inner.check_closed()?;
        *self.inner.listener.lock().expect("listener poisoned") = listener;
        Ok(())
    }

    /// Block until the next message arrives or the consumer closes.
    pub async fn receive(&self) -> Result<Option<Message>> {
        let session = self.pre_receive()?;
        if self.inner.info.prefetch == 0 {
            session.connection()?.pull(self.inner.id().clone(), 0).await?;
        }
        loop {
            let Some(envelope) = self.inner.queue.dequeue().await else {
                return Ok(None);
            };
            if let Some(message) = self.accept(&session, envelope).await? {
                return Ok(Some(message));
            }
        }
    }

    /// Wait up to `timeout` for the next message. An empty local buffer
    /// asks the broker for a timed pull unless receives are configured to
    /// consult local credit only.
    pub async fn receive_timeout(&self, timeout: Duration) -> Result<Option<Message>> {
        let session = self.pre_receive()?;
        let connection = session.connection()?;
        if self.inner.queue.is_empty()
            && (self.inner.info.prefetch == 0 || !connection.receive_local_only())
        {
            let millis = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
            connection.pull(self.inner.id().clone(), millis).await?;
        }
        loop {
            let Some(envelope) = self.inner.queue.dequeue_timeout(timeout).await else {
                return Ok(None);
            };
            if let Some(message) = self.accept(&session, envelope).await? {
                return Ok(Some(message));
            }
        }
    }

    /// Take a locally available message without waiting. An empty local
    /// buffer triggers a drain pull unless no-wait receives are configured
    /// to consult local credit only.
    pub async fn receive_no_wait(&self) -> Result<Option<Message>> {
        let session = self.pre_receive()?;
        let connection = session.connection()?;
        if self.inner.queue.is_empty()
            && (self.inner.info.prefetch == 0 || !connection.receive_no_wait_local_only())
        {
            connection.pull(self.inner.id().clone(), -1).await?;
        }
        loop {
            let Some(envelope) = self.inner.queue.try_dequeue() else {
                return Ok(None);
            };
            if let Some(message) = self.accept(&session, envelope).await? {
                return Ok(Some(message));
            }
        }
    }

    fn pre_receive(&self) -> Result<Arc<SessionInner>> {
        self.inner.check_closed()?;
        let session = self.inner.session()?;
        session.check_no_message_listener()?;
        if self.inner.has_listener() {
            return Err(Error::illegal_state(
                "cannot receive synchronously while a message listener is set",
            ));
        }
        Ok(session)
    }

    /// Acknowledge a dequeued envelope, filtering locally expired messages
    /// and deliveries past their redelivery limit.
    async fn accept(
        &self,
        session: &Arc<SessionInner>,
        envelope: InboundEnvelope,
    ) -> Result<Option<Message>> {
        if session.local_message_expiry() && envelope.message.is_expired(util::epoch_millis()) {
            debug!("skipping expired message: consumer={}", self.inner.id());
            session
                .acknowledge_envelope(envelope, AckType::ModifiedFailedUndeliverable)
                .await?;
            return Ok(None);
        }
        let redelivery = session.redelivery_policy();
        if redelivery.is_exceeded(envelope.redelivery_count) {
            session
                .acknowledge_envelope(envelope, redelivery.outcome)
                .await?;
            return Ok(None);
        }
        let message = envelope.message.clone();
        self.inner.ack_from_receive(session, envelope).await?;
        Ok(Some(message))
    }

    /// Close the consumer and destroy its broker-side state. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        debug!("consumer closing: id={}", self.inner.id());
        let session = self.inner.session()?;
        self.inner.shutdown(None, &session);
        let connection = session.connection()?;
        connection
            .destroy_resource(Resource::Consumer(self.inner.info.clone()))
            .await
    }
}
