//! Connection state machine.
//!
//! The connection owns its sessions, temporary destinations, the provider
//! lifecycle, listener fan-out, and the tracked request helpers every child
//! resource routes through. Establishment is lazy: the first operation that
//! needs the broker declares the connection resource.

mod events;
mod listener;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
    time::Duration,
};

use bytes::Bytes;
use dashmap::DashMap;
use log::debug;

pub use listener::{ConnectionListener, ExceptionHandler};

use events::ProviderEventRelay;

use crate::{
    config::ConnectionConfig,
    destination::Destination,
    envelope::{InboundEnvelope, OutboundEnvelope},
    error::{Error, Result},
    executor::SerialExecutor,
    message::MessageFactoryHandle,
    meta::{
        AckMode, ConnectionId, ConnectionInfo, ConsumerId, Resource, SessionId, SessionInfo,
        SessionPolicies, TransactionId, TransactionInfo,
    },
    provider::{AckType, Provider, ProviderFuture, ProviderSynchronization},
    session::{Session, SessionInner},
    tracker::RequestTracker,
    util::IdGenerator,
};

/// Static facts about this client implementation.
#[derive(Clone, Copy, Debug)]
pub struct ConnectionMetaData {
    pub provider_name: &'static str,
    pub provider_version: &'static str,
    pub api_major_version: u32,
    pub api_minor_version: u32,
}

const METADATA: ConnectionMetaData = ConnectionMetaData {
    provider_name: "courier",
    provider_version: env!("CARGO_PKG_VERSION"),
    api_major_version: 1,
    api_minor_version: 1,
};

fn connection_ids() -> &'static IdGenerator {
    static IDS: OnceLock<IdGenerator> = OnceLock::new();
    IDS.get_or_init(IdGenerator::default)
}

#[derive(Default)]
struct ClientIdState {
    value: Option<String>,
    explicit: bool,
}

pub(crate) struct ConnectionInner {
    id: ConnectionId,
    config: ConnectionConfig,
    client_id: Mutex<ClientIdState>,
    connected_uri: Mutex<Option<String>>,
    provider: Mutex<Option<Arc<dyn Provider>>>,
    message_factory: Mutex<Option<MessageFactoryHandle>>,
    sessions: DashMap<SessionId, Arc<SessionInner>>,
    temp_destinations: DashMap<String, Destination>,
    listeners: Mutex<Vec<Arc<dyn ConnectionListener>>>,
    exception_listener: Mutex<Option<ExceptionHandler>>,
    pub(crate) tracker: RequestTracker,
    pub(crate) executor: SerialExecutor,
    connect_lock: tokio::sync::Mutex<()>,
    close_lock: tokio::sync::Mutex<()>,
    connected: AtomicBool,
    started: AtomicBool,
    closing: AtomicBool,
    closed: AtomicBool,
    failed: AtomicBool,
    first_failure: OnceLock<Error>,
    session_ids: AtomicU64,
    temp_dest_ids: AtomicU64,
    transaction_ids: AtomicU64,
}

impl ConnectionInner {
    //----- State checks -------------------------------------------------//

    pub(crate) fn id(&self) -> &ConnectionId { &self.id }

    pub(crate) fn is_connected(&self) -> bool { self.connected.load(Ordering::Acquire) }

    pub(crate) fn is_started(&self) -> bool { self.started.load(Ordering::Acquire) }

    pub(crate) fn is_closing(&self) -> bool { self.closing.load(Ordering::Acquire) }

    pub(crate) fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }

    pub(crate) fn is_failed(&self) -> bool { self.failed.load(Ordering::Acquire) }

    fn check_closed(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::illegal_state("the connection is closed"));
        }
        Ok(())
    }

    pub(crate) fn check_closed_or_failed(&self) -> Result<()> {
        self.check_closed()?;
        if self.is_failed() {
            let cause = self
                .first_failure
                .get()
                .cloned()
                .unwrap_or(Error::ProviderClosed);
            return Err(Error::connection_failed(cause));
        }
        Ok(())
    }

    pub(crate) fn provider(&self) -> Result<Arc<dyn Provider>> {
        self.provider
            .lock()
            .expect("provider slot poisoned")
            .clone()
            .ok_or(Error::ProviderClosed)
    }

    //----- Config accessors ---------------------------------------------//

    pub(crate) fn request_timeout(&self) -> Option<Duration> { self.config.request_timeout }

    pub(crate) fn force_sync_send(&self) -> bool { self.config.force_sync_send }

    pub(crate) fn force_async_send(&self) -> bool { self.config.force_async_send }

    pub(crate) fn populate_user_id(&self) -> bool { self.config.populate_user_id }

    pub(crate) fn validate_property_names(&self) -> bool { self.config.validate_property_names }

    pub(crate) fn local_message_expiry(&self) -> bool { self.config.local_message_expiry }

    pub(crate) fn receive_local_only(&self) -> bool { self.config.receive_local_only }

    pub(crate) fn receive_no_wait_local_only(&self) -> bool {
        self.config.receive_no_wait_local_only
    }

    pub(crate) fn encoded_username(&self) -> Option<Bytes> { self.config.encoded_username() }

    pub(crate) fn prefixed_name(&self, name: &str, queue: bool) -> String {
        self.config.prefixed_name(name, queue)
    }

    pub(crate) fn is_explicit_client_id(&self) -> bool {
        self.client_id.lock().expect("client id poisoned").explicit
    }

    fn client_id_value(&self) -> Option<String> {
        self.client_id.lock().expect("client id poisoned").value.clone()
    }

    pub(crate) fn message_factory(&self) -> Result<MessageFactoryHandle> {
        if let Some(factory) = self
            .message_factory
            .lock()
            .expect("message factory poisoned")
            .clone()
        {
            return Ok(factory);
        }
        // Not yet established; fall back to the provider's current factory.
        let factory = self.provider()?.message_factory();
        self.set_message_factory(factory.clone());
        Ok(factory)
    }

    pub(crate) fn set_message_factory(&self, factory: MessageFactoryHandle) {
        *self
            .message_factory
            .lock()
            .expect("message factory poisoned") = Some(factory);
    }

    pub(crate) fn set_connected_uri(&self, uri: Option<String>) {
        *self.connected_uri.lock().expect("connected uri poisoned") = uri;
    }

    pub(crate) fn connected_uri(&self) -> Option<String> {
        self.connected_uri.lock().expect("connected uri poisoned").clone()
    }

    //----- Id allocation ------------------------------------------------//

    fn next_session_id(&self) -> SessionId {
        SessionId::new(self.id.clone(), self.session_ids.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn next_transaction_id(&self) -> TransactionId {
        TransactionId::new(
            self.id.clone(),
            self.transaction_ids.fetch_add(1, Ordering::Relaxed) + 1,
        )
    }

    //----- Registries ---------------------------------------------------//

    pub(crate) fn session_snapshot(&self) -> Vec<Arc<SessionInner>> {
        self.sessions.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub(crate) fn lookup_session(&self, id: &SessionId) -> Option<Arc<SessionInner>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn remove_session(&self, id: &SessionId) { self.sessions.remove(id); }

    pub(crate) fn listener_snapshot(&self) -> Vec<Arc<dyn ConnectionListener>> {
        self.listeners.lock().expect("listeners poisoned").clone()
    }

    //----- Connect ------------------------------------------------------//

    /// Declare the connection resource if that has not happened yet. The
    /// first caller wins; the double check keeps the fast path lock-free.
    pub(crate) async fn connect(&self) -> Result<()> {
        if self.is_connected() || self.is_closed() {
            return Ok(());
        }
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() || self.is_closed() {
            return Ok(());
        }

        {
            let mut state = self.client_id.lock().expect("client id poisoned");
            if state.value.as_deref().map_or(true, |value| value.trim().is_empty()) {
                state.value = Some(connection_ids().generate());
            }
        }

        self.create_resource_timed(
            Resource::Connection(self.connection_info()),
            Some(self.config.connect_timeout),
        )
        .await?;
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            client_id: self.client_id_value(),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
            configured_uri: self.config.configured_uri.clone(),
            connected_uri: self.connected_uri(),
            config: self.config.clone(),
        }
    }

    //----- Tracked provider requests ------------------------------------//

    pub(crate) async fn create_resource(&self, resource: Resource) -> Result<()> {
        self.create_resource_timed(resource, self.config.request_timeout).await
    }

    async fn create_resource_timed(
        &self,
        resource: Resource,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.check_closed_or_failed()?;
        let provider = self.provider()?;
        let request = ProviderFuture::new();
        self.tracker.register(&request);
        let outcome = match provider.create(resource, request.clone()).await {
            Ok(()) => request.sync(timeout).await,
            Err(error) => Err(error),
        };
        self.tracker.deregister(&request);
        outcome
    }

    pub(crate) async fn start_resource(&self, resource: Resource) -> Result<()> {
        self.check_closed_or_failed()?;
        let provider = self.provider()?;
        let request = ProviderFuture::new();
        self.tracker.register(&request);
        let outcome = match provider.start_resource(resource, request.clone()).await {
            Ok(()) => request.sync(self.config.request_timeout).await,
            Err(error) => Err(error),
        };
        self.tracker.deregister(&request);
        outcome
    }

    pub(crate) async fn stop_resource(&self, resource: Resource) -> Result<()> {
        self.check_closed_or_failed()?;
        let provider = self.provider()?;
        let request = ProviderFuture::new();
        self.tracker.register(&request);
        let outcome = match provider.stop_resource(resource, request.clone()).await {
            Ok(()) => request.sync(self.config.request_timeout).await,
            Err(error) => Err(error),
        };
        self.tracker.deregister(&request);
        outcome
    }

    pub(crate) async fn destroy_resource(&self, resource: Resource) -> Result<()> {
        self.check_closed_or_failed()?;
        let provider = self.provider()?;
        let request = ProviderFuture::new();
        self.tracker.register(&request);
        let outcome = match provider.destroy(resource, request.clone()).await {
            Ok(()) => request.sync(self.config.request_timeout).await,
            Err(error) => Err(error),
        };
        self.tracker.deregister(&request);
        outcome
    }

    pub(crate) async fn send_envelope(&self, envelope: OutboundEnvelope) -> Result<()> {
        self.check_closed_or_failed()?;
        let provider = self.provider()?;
        let request = ProviderFuture::new();
        self.tracker.register(&request);
        let outcome = match provider.send(envelope, request.clone()).await {
            Ok(()) => request.sync(self.config.send_timeout).await,
            Err(error) => Err(error),
        };
        self.tracker.deregister(&request);
        outcome
    }

    // Acknowledgements are not tracked: they are frequent, often issued
    // from delivery callbacks, and a lost connection fails them through
    // the provider rather than the tracker.
    pub(crate) async fn acknowledge_envelope(
        &self,
        envelope: InboundEnvelope,
        ack_type: AckType,
    ) -> Result<()> {
        self.check_closed_or_failed()?;
        let provider = self.provider()?;
        let request = ProviderFuture::new();
        provider.acknowledge(envelope, ack_type, request.clone()).await?;
        request.sync(self.config.request_timeout).await
    }

    pub(crate) async fn acknowledge_session(
        &self,
        session_id: SessionId,
        ack_type: AckType,
    ) -> Result<()> {
        self.check_closed_or_failed()?;
        let provider = self.provider()?;
        let request = ProviderFuture::new();
        provider
            .acknowledge_session(session_id, ack_type, request.clone())
            .await?;
        request.sync(self.config.request_timeout).await
    }

    pub(crate) async fn commit_transaction(
        &self,
        transaction: TransactionInfo,
        synchronization: Option<Box<dyn ProviderSynchronization>>,
    ) -> Result<()> {
        self.check_closed_or_failed()?;
        let provider = self.provider()?;
        let request = match synchronization {
            Some(synchronization) => ProviderFuture::with_synchronization(synchronization),
            None => ProviderFuture::new(),
        };
        self.tracker.register(&request);
        let outcome = match provider.commit(transaction, request.clone()).await {
            Ok(()) => request.sync(self.config.request_timeout).await,
            Err(error) => Err(error),
        };
        self.tracker.deregister(&request);
        outcome
    }

    pub(crate) async fn rollback_transaction(
        &self,
        transaction: TransactionInfo,
        synchronization: Option<Box<dyn ProviderSynchronization>>,
    ) -> Result<()> {
        self.check_closed_or_failed()?;
        let provider = self.provider()?;
        let request = match synchronization {
            Some(synchronization) => ProviderFuture::with_synchronization(synchronization),
            None => ProviderFuture::new(),
        };
        self.tracker.register(&request);
        let outcome = match provider.rollback(transaction, request.clone()).await {
            Ok(()) => request.sync(self.config.request_timeout).await,
            Err(error) => Err(error),
        };
        self.tracker.deregister(&request);
        outcome
    }

    pub(crate) async fn recover_session(&self, session_id: SessionId) -> Result<()> {
        self.check_closed_or_failed()?;
        let provider = self.provider()?;
        let request = ProviderFuture::new();
        self.tracker.register(&request);
        let outcome = match provider.recover(session_id, request.clone()).await {
            Ok(()) => request.sync(self.config.request_timeout).await,
            Err(error) => Err(error),
        };
        self.tracker.deregister(&request);
        outcome
    }

    pub(crate) async fn pull(&self, consumer_id: ConsumerId, timeout: i64) -> Result<()> {
        self.check_closed_or_failed()?;
        let provider = self.provider()?;
        let request = ProviderFuture::new();
        self.tracker.register(&request);
        let outcome = match provider.pull(consumer_id, timeout, request.clone()).await {
            Ok(()) => request.sync(self.config.request_timeout).await,
            Err(error) => Err(error),
        };
        self.tracker.deregister(&request);
        outcome
    }

    pub(crate) async fn unsubscribe(&self, name: &str) -> Result<()> {
        self.check_closed_or_failed()?;
        for session in self.session_snapshot() {
            if session.has_subscription(name) {
                return Err(Error::illegal_state(
                    "the durable subscription is in use by an active consumer",
                ));
            }
        }
        let provider = self.provider()?;
        let request = ProviderFuture::new();
        self.tracker.register(&request);
        let outcome = match provider.unsubscribe(name, request.clone()).await {
            Ok(()) => request.sync(self.config.request_timeout).await,
            Err(error) => Err(error),
        };
        self.tracker.deregister(&request);
        outcome
    }

    //----- Temporary destinations ---------------------------------------//

    pub(crate) async fn create_temporary_destination(
        self: &Arc<Self>,
        queue: bool,
    ) -> Result<Destination> {
        self.check_closed_or_failed()?;
        self.connect().await?;
        let name = format!(
            "{}:{}",
            self.id,
            self.temp_dest_ids.fetch_add(1, Ordering::Relaxed) + 1
        );
        let destination = if queue {
            Destination::temporary_queue(name, self.id.clone())
        } else {
            Destination::temporary_topic(name, self.id.clone())
        };
        self.create_resource(Resource::TemporaryDestination(destination.clone()))
            .await?;
        self.temp_destinations
            .insert(destination.name().to_owned(), destination.clone());
        Ok(destination)
    }

    pub(crate) async fn delete_temporary_destination(
        &self,
        destination: &Destination,
    ) -> Result<()> {
        self.check_closed_or_failed()?;
        if !destination.is_temporary() {
            return Err(Error::InvalidDestination(
                "only temporary destinations can be deleted".into(),
            ));
        }
        for session in self.session_snapshot() {
            if session.is_destination_in_use(destination) {
                return Err(Error::illegal_state(
                    "a consumer is consuming from the temporary destination",
                ));
            }
        }
        self.temp_destinations.remove(destination.name());
        self.destroy_resource(Resource::TemporaryDestination(destination.clone()))
            .await
    }

    pub(crate) fn is_temporary_destination_deleted(&self, destination: &Destination) -> bool {
        !self.temp_destinations.contains_key(destination.name())
    }

    pub(crate) fn temp_destination_snapshot(&self) -> Vec<Destination> {
        self.temp_destinations
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub(crate) fn clear_temp_destinations(&self) { self.temp_destinations.clear(); }

    pub(crate) fn check_consume_from_temporary(&self, destination: &Destination) -> Result<()> {
        if destination.owner() != Some(&self.id) {
            return Err(Error::InvalidDestination(
                "cannot consume from a temporary destination created by another connection".into(),
            ));
        }
        Ok(())
    }

    //----- Start / stop / close -----------------------------------------//

    pub(crate) async fn start(&self) -> Result<()> {
        self.check_closed_or_failed()?;
        self.connect().await?;
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            for session in self.session_snapshot() {
                session.start().await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn do_stop(&self, check_closed: bool) -> Result<()> {
        if check_closed {
            self.check_closed_or_failed()?;
        }
        if self
            .started
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            for session in self.session_snapshot() {
                session.stop();
            }
        }
        Ok(())
    }

    pub(crate) async fn close(&self) -> Result<()> {
        if !self.is_closed() && !self.is_failed() {
            // Closing an already-failed connection must not surface errors.
            self.do_stop(false).await?;
        }

        {
            let _guard = self.close_lock.lock().await;
            if self.is_closed() {
                return Ok(());
            }
            self.closing.store(true, Ordering::Release);

            for session in self.session_snapshot() {
                session.shutdown(None);
            }
            self.sessions.clear();
            self.clear_temp_destinations();

            if self.is_connected() && !self.is_failed() {
                if let Ok(provider) = self.provider() {
                    let request = ProviderFuture::new();
                    let info = Resource::Connection(self.connection_info());
                    match provider.destroy(info, request.clone()).await {
                        Ok(()) => {
                            if let Err(error) =
                                request.sync(Some(self.config.close_timeout)).await
                            {
                                debug!("failed destroying connection resource: {error}");
                            }
                        }
                        Err(Error::ProviderClosed) => {
                            debug!("ignoring provider closed during connection close");
                        }
                        Err(error) => {
                            debug!("failed destroying connection resource: {error}");
                        }
                    }
                }
            }

            self.connected.store(false, Ordering::Release);
            self.started.store(false, Ordering::Release);
            self.closing.store(false, Ordering::Release);
            self.closed.store(true, Ordering::Release);
        }

        self.executor.shutdown().await;
        let provider = self.provider.lock().expect("provider slot poisoned").take();
        if let Some(provider) = provider {
            provider.close().await;
        }
        Ok(())
    }

    //----- Async error surface ------------------------------------------//

    /// Route an asynchronous error to the registered exception listener on
    /// the executor, or log it when nobody listens.
    pub(crate) fn on_async_exception(&self, error: Error) {
        if self.is_closed() || self.is_closing() {
            return;
        }
        let handler = self
            .exception_listener
            .lock()
            .expect("exception listener poisoned")
            .clone();
        match handler {
            Some(handler) => {
                self.executor.execute(async move { handler(error) });
            }
            None => debug!("async exception with no exception listener: {error}"),
        }
    }

    pub(crate) fn record_failure(&self, error: Error) {
        self.failed.store(true, Ordering::Release);
        let _ = self.first_failure.set(error);
    }

    pub(crate) fn mark_shut_down(&self) {
        self.started.store(false, Ordering::Release);
        self.connected.store(false, Ordering::Release);
    }
}

/// Connection handle over the shared state machine. Clones are cheap and
/// refer to the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Attach to `provider`, install the event listener, and start the
    /// wire layer. The connection resource itself is declared lazily by
    /// the first operation that needs the broker.
    pub async fn new(provider: Arc<dyn Provider>, config: ConnectionConfig) -> Result<Self> {
        let id = ConnectionId::new(connection_ids().generate());
        let inner = Arc::new(ConnectionInner {
            executor: SerialExecutor::new(format!("connection [{id}] executor")),
            id,
            config,
            client_id: Mutex::new(ClientIdState::default()),
            connected_uri: Mutex::new(None),
            provider: Mutex::new(Some(Arc::clone(&provider))),
            message_factory: Mutex::new(None),
            sessions: DashMap::new(),
            temp_destinations: DashMap::new(),
            listeners: Mutex::new(Vec::new()),
            exception_listener: Mutex::new(None),
            tracker: RequestTracker::new(),
            connect_lock: tokio::sync::Mutex::new(()),
            close_lock: tokio::sync::Mutex::new(()),
            connected: AtomicBool::new(false),
            started: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            first_failure: OnceLock::new(),
            session_ids: AtomicU64::new(0),
            temp_dest_ids: AtomicU64::new(0),
            transaction_ids: AtomicU64::new(0),
        });

        provider.set_listener(Arc::new(ProviderEventRelay::new(&inner)));
        if let Err(error) = provider.start().await {
            inner.executor.shutdown().await;
            return Err(error);
        }
        Ok(Self { inner })
    }

    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId { self.inner.id() }

    /// The active client id, if one was assigned or generated yet.
    pub fn client_id(&self) -> Result<Option<String>> {
        self.inner.check_closed_or_failed()?;
        Ok(self.inner.client_id_value())
    }

    /// Assign the client id and connect so the broker validates it.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidClientId`] for an empty id and with
    /// [`Error::IllegalState`] when an id was already set or the connection
    /// is established.
    pub async fn set_client_id(&self, client_id: &str) -> Result<()> {
        self.inner.check_closed_or_failed()?;
        {
            let mut state = self.inner.client_id.lock().expect("client id poisoned");
            if state.explicit {
                return Err(Error::illegal_state("the client id has already been set"));
            }
            if client_id.trim().is_empty() {
                return Err(Error::InvalidClientId(
                    "cannot have an empty client id".into(),
                ));
            }
            if self.inner.is_connected() {
                return Err(Error::illegal_state(
                    "cannot set the client id once connected",
                ));
            }
            state.value = Some(client_id.to_owned());
            state.explicit = true;
        }
        self.inner.connect().await
    }

    /// Begin (or resume) message delivery to every session.
    pub async fn start(&self) -> Result<()> { self.inner.start().await }

    /// Pause message delivery. Idempotent.
    pub async fn stop(&self) -> Result<()> { self.inner.do_stop(true).await }

    /// Close the connection and everything it owns. Idempotent, and per
    /// the API contract it does not fail when the connection already
    /// failed.
    pub async fn close(&self) -> Result<()> { self.inner.close().await }

    /// Create a session in the requested acknowledgement mode.
    pub async fn create_session(&self, ack_mode: AckMode) -> Result<Session> {
        self.inner.check_closed_or_failed()?;
        self.inner.connect().await?;

        let info = SessionInfo {
            id: self.inner.next_session_id(),
            ack_mode,
            send_acks_async: self.inner.config.force_async_acks,
            policies: SessionPolicies {
                message_id: self.inner.config.message_id,
                prefetch: self.inner.config.prefetch,
                presettle: self.inner.config.presettle,
                redelivery: self.inner.config.redelivery,
                deserialization: self.inner.config.deserialization.clone(),
            },
        };
        let session = SessionInner::new(&self.inner, info.clone());

        self.inner
            .create_resource(Resource::Session(info.clone()))
            .await?;
        // A transacted session always has an open transaction.
        session.transaction.begin(&self.inner).await?;
        self.inner.sessions.insert(info.id.clone(), Arc::clone(&session));

        if self.inner.is_started() {
            session.start().await?;
        }
        Ok(Session::new(session))
    }

    /// A broker-named temporary queue owned by this connection.
    pub async fn create_temporary_queue(&self) -> Result<Destination> {
        self.inner.create_temporary_destination(true).await
    }

    /// A broker-named temporary topic owned by this connection.
    pub async fn create_temporary_topic(&self) -> Result<Destination> {
        self.inner.create_temporary_destination(false).await
    }

    /// Destroy a temporary destination this connection created.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::IllegalState`] while any consumer of this
    /// connection subscribes to it.
    pub async fn delete_temporary_destination(&self, destination: &Destination) -> Result<()> {
        self.inner.delete_temporary_destination(destination).await
    }

    /// Remove a durable subscription with no active consumer.
    pub async fn unsubscribe(&self, name: &str) -> Result<()> { self.inner.unsubscribe(name).await }

    /// Install or clear the asynchronous exception callback.
    pub fn set_exception_listener(&self, listener: Option<ExceptionHandler>) -> Result<()> {
        self.inner.check_closed_or_failed()?;
        *self
            .inner
            .exception_listener
            .lock()
            .expect("exception listener poisoned") = listener;
        Ok(())
    }

    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.inner
            .listeners
            .lock()
            .expect("listeners poisoned")
            .push(listener);
    }

    /// Remove a previously added listener; returns whether it was present.
    pub fn remove_connection_listener(&self, listener: &Arc<dyn ConnectionListener>) -> bool {
        let mut listeners = self.inner.listeners.lock().expect("listeners poisoned");
        let before = listeners.len();
        listeners.retain(|candidate| !Arc::ptr_eq(candidate, listener));
        listeners.len() != before
    }

    pub fn metadata(&self) -> Result<ConnectionMetaData> {
        self.inner.check_closed_or_failed()?;
        Ok(METADATA)
    }

    /// Server-side session pooling belongs to a surface this client does
    /// not implement.
    pub async fn create_connection_consumer(
        &self,
        _destination: &Destination,
        _selector: Option<&str>,
        _max_messages: u32,
    ) -> Result<()> {
        self.inner.check_closed_or_failed()?;
        self.inner.connect().await?;
        Err(Error::NotSupported("connection consumers".into()))
    }

    /// Durable connection consumers are refused alongside the plain ones.
    pub async fn create_durable_connection_consumer(
        &self,
        _destination: &Destination,
        _subscription_name: &str,
        _selector: Option<&str>,
        _max_messages: u32,
    ) -> Result<()> {
        self.inner.check_closed_or_failed()?;
        self.inner.connect().await?;
        Err(Error::NotSupported("durable connection consumers".into()))
    }

    #[must_use]
    pub fn is_connected(&self) -> bool { self.inner.is_connected() }

    #[must_use]
    pub fn is_started(&self) -> bool { self.inner.is_started() }

    #[must_use]
    pub fn is_closed(&self) -> bool { self.inner.is_closed() }

    #[must_use]
    pub fn is_failed(&self) -> bool { self.inner.is_failed() }

    /// The URI the provider reports as currently connected.
    #[must_use]
    pub fn connected_uri(&self) -> Option<String> { self.inner.connected_uri() }
}
