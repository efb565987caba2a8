//! Provider event handling and recovery orchestration.
//!
//! The provider holds a weak relay to the connection so events outlive
//! neither side: after the connection drops, late events are discarded.
//! Failure and remote-closure handling follow a two-phase shape: mark the
//! affected resource synchronously so blocked callers observe the failure,
//! then run the teardown and listener fan-out on the executor where it
//! cannot stall provider tasks.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use log::{debug, info, warn};

use super::ConnectionInner;
use crate::{
    envelope::InboundEnvelope,
    error::{Error, Result},
    meta::Resource,
    provider::{Provider, ProviderFuture, ProviderListener},
};

/// Listener installed on the provider, forwarding into the connection.
pub(crate) struct ProviderEventRelay {
    connection: Weak<ConnectionInner>,
}

impl ProviderEventRelay {
    pub(crate) fn new(connection: &Arc<ConnectionInner>) -> Self {
        Self {
            connection: Arc::downgrade(connection),
        }
    }

    fn connection(&self) -> Option<Arc<ConnectionInner>> { self.connection.upgrade() }
}

#[async_trait]
impl ProviderListener for ProviderEventRelay {
    fn on_inbound_message(&self, envelope: InboundEnvelope) {
        if let Some(connection) = self.connection() {
            connection.handle_inbound_message(envelope);
        }
    }

    fn on_connection_interrupted(&self, remote_uri: &str) {
        if let Some(connection) = self.connection() {
            connection.handle_connection_interrupted(remote_uri);
        }
    }

    async fn on_connection_recovery(&self, provider: &dyn Provider) -> Result<()> {
        match self.connection() {
            Some(connection) => connection.handle_connection_recovery(provider).await,
            None => Ok(()),
        }
    }

    async fn on_connection_recovered(&self, provider: &dyn Provider) -> Result<()> {
        match self.connection() {
            Some(connection) => connection.handle_connection_recovered(provider).await,
            None => Ok(()),
        }
    }

    fn on_connection_restored(&self, remote_uri: &str) {
        if let Some(connection) = self.connection() {
            connection.handle_connection_restored(remote_uri);
        }
    }

    fn on_connection_established(&self, remote_uri: &str) {
        if let Some(connection) = self.connection() {
            connection.handle_connection_established(remote_uri);
        }
    }

    fn on_connection_failure(&self, cause: Error) {
        if let Some(connection) = self.connection() {
            connection.handle_connection_failure(cause);
        }
    }

    fn on_resource_closed(&self, resource: Resource, cause: Error) {
        if let Some(connection) = self.connection() {
            connection.handle_resource_closed(resource, cause);
        }
    }

    fn on_provider_exception(&self, cause: Error) {
        if let Some(connection) = self.connection() {
            connection.on_async_exception(cause);
        }
    }
}

impl ConnectionInner {
    /// Route one inbound envelope to its session and fan it out to
    /// connection listeners on the executor.
    pub(crate) fn handle_inbound_message(self: &Arc<Self>, mut envelope: InboundEnvelope) {
        envelope.message.set_read_only(true, true);
        envelope
            .message
            .set_validate_property_names(self.validate_property_names());

        if let Some(session) = self.lookup_session(envelope.consumer_id.session_id()) {
            session.on_inbound_message(envelope.clone());
        }

        for listener in self.listener_snapshot() {
            let envelope = envelope.clone();
            self.executor.execute(async move {
                listener.on_inbound_message(&envelope);
            });
        }
    }

    pub(crate) fn handle_connection_interrupted(self: &Arc<Self>, remote_uri: &str) {
        info!("connection interrupted: id={}, uri={remote_uri}", self.id());
        for session in self.session_snapshot() {
            session.on_connection_interrupted();
        }
        for listener in self.listener_snapshot() {
            let remote_uri = remote_uri.to_owned();
            self.executor.execute(async move {
                listener.on_connection_interrupted(&remote_uri);
            });
        }
    }

    /// Re-declare all broker-side state on the recovering provider:
    /// connection, temporary destinations, then each session with its
    /// transaction, producers, and consumers.
    pub(crate) async fn handle_connection_recovery(
        self: &Arc<Self>,
        provider: &dyn Provider,
    ) -> Result<()> {
        debug!("connection starting recovery: id={}", self.id());

        let request = ProviderFuture::new();
        provider
            .create(Resource::Connection(self.connection_info()), request.clone())
            .await?;
        request.sync(self.request_timeout()).await?;

        for destination in self.temp_destination_snapshot() {
            self.create_resource(Resource::TemporaryDestination(destination))
                .await?;
        }

        for session in self.session_snapshot() {
            session.on_connection_recovery(provider).await?;
        }
        Ok(())
    }

    pub(crate) async fn handle_connection_recovered(
        self: &Arc<Self>,
        provider: &dyn Provider,
    ) -> Result<()> {
        debug!("connection finalizing recovery: id={}", self.id());
        self.set_message_factory(provider.message_factory());
        self.set_connected_uri(provider.remote_uri());
        for session in self.session_snapshot() {
            session.on_connection_recovered();
        }
        Ok(())
    }

    pub(crate) fn handle_connection_restored(self: &Arc<Self>, remote_uri: &str) {
        info!("connection restored: id={}, uri={remote_uri}", self.id());
        for session in self.session_snapshot() {
            session.on_connection_restored();
        }
        for listener in self.listener_snapshot() {
            let remote_uri = remote_uri.to_owned();
            self.executor.execute(async move {
                listener.on_connection_restored(&remote_uri);
            });
        }
    }

    pub(crate) fn handle_connection_established(self: &Arc<Self>, remote_uri: &str) {
        info!("connection established: id={}, uri={remote_uri}", self.id());
        if let Ok(provider) = self.provider() {
            self.set_message_factory(provider.message_factory());
            self.set_connected_uri(provider.remote_uri());
        }
        for listener in self.listener_snapshot() {
            let remote_uri = remote_uri.to_owned();
            self.executor.execute(async move {
                listener.on_connection_established(&remote_uri);
            });
        }
    }

    /// The transport is permanently gone. Mark the failure, unblock every
    /// tracked request, then tear the connection down on the executor.
    pub(crate) fn handle_connection_failure(self: &Arc<Self>, cause: Error) {
        warn!("connection failed: id={}, cause={cause}", self.id());
        self.record_failure(cause.clone());
        self.on_async_exception(cause.clone());
        let failure = Error::connection_failed(cause);
        self.tracker.fail_all(&failure);

        if self.is_closing() || self.is_closed() {
            return;
        }
        let connection = Arc::clone(self);
        self.executor.execute(async move {
            if let Ok(provider) = connection.provider() {
                provider.close().await;
            }
            // A request registered between the inline pass and this task
            // would otherwise hang forever.
            connection.tracker.fail_all(&failure);
            connection.shutdown(Some(failure.clone())).await;
            for listener in connection.listener_snapshot() {
                listener.on_connection_failure(&failure);
            }
        });
    }

    /// Free all connection resources without the orderly close handshake.
    pub(crate) async fn shutdown(self: &Arc<Self>, cause: Option<Error>) {
        for session in self.session_snapshot() {
            session.shutdown(cause.clone());
        }

        if self.is_connected() && !self.is_failed() && !self.is_closing() {
            if let Err(error) = self
                .destroy_resource(Resource::Connection(self.connection_info()))
                .await
            {
                debug!("failed destroying connection during shutdown: {error}");
            }
        }

        self.clear_temp_destinations();
        self.mark_shut_down();
    }

    /// A session, producer, or consumer was closed by the broker. Mark the
    /// failure synchronously, clean up on the executor.
    pub(crate) fn handle_resource_closed(self: &Arc<Self>, resource: Resource, cause: Error) {
        if self.is_closing() || self.is_closed() {
            return;
        }

        match &resource {
            Resource::Session(session_info) => {
                if let Some(session) = self.lookup_session(&session_info.id) {
                    session.set_failure_cause(Some(cause.clone()));
                }
            }
            Resource::Producer(producer_info) => {
                if let Some(session) = self.lookup_session(producer_info.id.session_id()) {
                    if let Some(producer) = session.lookup_producer(&producer_info.id) {
                        producer.set_failure_cause(Some(cause.clone()));
                    }
                }
            }
            Resource::Consumer(consumer_info) => {
                if let Some(session) = self.lookup_session(consumer_info.id.session_id()) {
                    if let Some(consumer) = session.lookup_consumer(&consumer_info.id) {
                        consumer.set_failure_cause(Some(cause.clone()));
                    }
                }
            }
            _ => {}
        }

        let connection = Arc::clone(self);
        self.executor.execute(async move {
            match resource {
                Resource::Session(session_info) => {
                    if let Some(session) = connection.lookup_session(&session_info.id) {
                        session.session_closed(cause.clone());
                        for listener in connection.listener_snapshot() {
                            listener.on_session_closed(&session_info.id, &cause);
                        }
                    }
                }
                Resource::Producer(producer_info) => {
                    if let Some(session) = connection.lookup_session(producer_info.id.session_id())
                    {
                        if let Some(id) = session.producer_closed(&producer_info, cause.clone()) {
                            for listener in connection.listener_snapshot() {
                                listener.on_producer_closed(&id, &cause);
                            }
                        }
                    }
                }
                Resource::Consumer(consumer_info) => {
                    if let Some(session) = connection.lookup_session(consumer_info.id.session_id())
                    {
                        if let Some(id) = session.consumer_closed(&consumer_info, cause.clone()) {
                            for listener in connection.listener_snapshot() {
                                listener.on_consumer_closed(&id, &cause);
                            }
                        }
                    }
                }
                other => {
                    info!("a remote resource was closed: kind={}, cause={cause}", other.kind());
                }
            }
        });
    }
}
