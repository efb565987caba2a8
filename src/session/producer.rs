//! Message producer.
//!
//! A producer is registered with the broker at creation time and owns the
//! dispatch sequence used to order its sends. Producers created without a
//! destination are anonymous and name the target per send.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, Weak,
};

use log::info;

use crate::{
    destination::Destination,
    error::{Error, Result},
    message::{DeliveryMode, Message, DEFAULT_PRIORITY},
    meta::{ProducerId, ProducerInfo, Resource},
    provider::{Provider, ProviderFuture},
    session::SessionInner,
};

/// Header defaults applied to sends that do not override them.
#[derive(Clone, Copy, Debug)]
pub struct SendOptions {
    pub delivery_mode: DeliveryMode,
    pub priority: u8,
    /// Time to live in milliseconds; zero means the message never expires.
    pub time_to_live: i64,
    pub disable_message_id: bool,
    pub disable_timestamp: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            delivery_mode: DeliveryMode::Persistent,
            priority: DEFAULT_PRIORITY,
            time_to_live: 0,
            disable_message_id: false,
            disable_timestamp: false,
        }
    }
}

pub(crate) struct ProducerInner {
    pub(crate) info: ProducerInfo,
    session: Weak<SessionInner>,
    closed: AtomicBool,
    failure_cause: Mutex<Option<Error>>,
    message_sequence: AtomicU64,
    defaults: Mutex<SendOptions>,
}

impl ProducerInner {
    pub(crate) fn new(info: ProducerInfo, session: &Arc<SessionInner>) -> Arc<Self> {
        Arc::new(Self {
            info,
            session: Arc::downgrade(session),
            closed: AtomicBool::new(false),
            failure_cause: Mutex::new(None),
            message_sequence: AtomicU64::new(0),
            defaults: Mutex::new(SendOptions::default()),
        })
    }

    pub(crate) fn id(&self) -> &ProducerId { &self.info.id }

    pub(crate) fn next_message_sequence(&self) -> u64 {
        self.message_sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn is_anonymous(&self) -> bool { self.info.destination.is_none() }

    fn session(&self) -> Result<Arc<SessionInner>> {
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
            None => Error::illegal_state("the producer is closed"),
            Some(cause) => Error::illegal_state(format!(
                "the producer was closed due to an unrecoverable error: {cause}"
            )),
        })
    }

    pub(crate) fn set_failure_cause(&self, cause: Option<Error>) {
        *self.failure_cause.lock().expect("failure cause poisoned") = cause;
    }

    /// Local teardown: mark closed and leave the session registry.
    pub(crate) fn shutdown(&self, cause: Option<Error>, session: &SessionInner) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if cause.is_some() {
                self.set_failure_cause(cause);
            }
            session.remove_producer(&self.info.id);
        }
    }

    /// Re-declare this producer on a recovering provider.
    pub(crate) async fn on_connection_recovery(
        &self,
        provider: &dyn Provider,
        timeout: Option<std::time::Duration>,
    ) -> Result<()> {
        let request = ProviderFuture::new();
        provider
            .create(Resource::Producer(self.info.clone()), request.clone())
            .await?;
        request.sync(timeout).await
    }
}

/// Producer handle returned by [`crate::Session::create_producer`].
#[derive(Clone)]
pub struct MessageProducer {
    inner: Arc<ProducerInner>,
}

impl MessageProducer {
    pub(crate) fn new(inner: Arc<ProducerInner>) -> Self { Self { inner } }

    #[must_use]
    pub fn producer_id(&self) -> &ProducerId { self.inner.id() }

    /// The fixed target destination, or `None` for anonymous producers.
    #[must_use]
    pub fn destination(&self) -> Option<&Destination> { self.inner.info.destination.as_ref() }

    /// Current send defaults.
    #[must_use]
    pub fn send_options(&self) -> SendOptions {
        *self.inner.defaults.lock().expect("send defaults poisoned")
    }

    /// Replace the send defaults used by [`MessageProducer::send`].
    pub fn set_send_options(&self, options: SendOptions) {
        *self.inner.defaults.lock().expect("send defaults poisoned") = options;
    }

    /// Send `message` to the producer's fixed destination with the current
    /// defaults. Headers are stamped on the caller's message.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidDestination`] on an anonymous producer and
    /// with [`Error::IllegalState`] when the producer or session is closed.
    pub async fn send(&self, message: &mut Message) -> Result<()> {
        let destination = self.inner.info.destination.clone().ok_or_else(|| {
            Error::InvalidDestination(
                "anonymous producer requires an explicit destination per send".into(),
            )
        })?;
        self.dispatch(&destination, message, self.send_options()).await
    }

    /// Send through an anonymous producer to `destination`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotSupported`] on a producer created with a fixed
    /// destination.
    pub async fn send_to(&self, destination: &Destination, message: &mut Message) -> Result<()> {
        if self.inner.info.destination.is_some() {
            return Err(Error::NotSupported(
                "per-send destinations require an anonymous producer".into(),
            ));
        }
        self.dispatch(destination, message, self.send_options()).await
    }

    /// Send with one-off header overrides instead of the producer defaults.
    pub async fn send_with(
        &self,
        message: &mut Message,
        options: SendOptions,
    ) -> Result<()> {
        let destination = self.inner.info.destination.clone().ok_or_else(|| {
            Error::InvalidDestination(
                "anonymous producer requires an explicit destination per send".into(),
            )
        })?;
        self.dispatch(&destination, message, options).await
    }

    async fn dispatch(
        &self,
        destination: &Destination,
        message: &mut Message,
        options: SendOptions,
    ) -> Result<()> {
        self.inner.check_closed()?;
        let session = self.inner.session()?;
        session.send(&self.inner, destination, message, options).await
    }

    /// Close the producer and destroy its broker-side state. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        info!("producer closing: id={}", self.inner.id());
        let session = self.inner.session()?;
        self.inner.shutdown(None, &session);
        let connection = session.connection()?;
        connection
            .destroy_resource(Resource::Producer(self.inner.info.clone()))
            .await
    }
}
