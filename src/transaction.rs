//! Per-session transaction coordination.
//!
//! A transacted session always has an open transaction: creation begins one
//! and every commit or rollback atomically replaces the discharged
//! transaction with a fresh one. When the discharge outcome cannot be
//! confirmed (transport loss, failed rollover) the context is in doubt and
//! refuses further work until recovery installs a new transaction.

use std::sync::{Arc, Mutex};

use log::debug;

use crate::{
    connection::ConnectionInner,
    envelope::{InboundEnvelope, OutboundEnvelope},
    error::{Error, Result},
    meta::{Resource, SessionId, TransactionId, TransactionInfo},
    provider::{AckType, Provider, ProviderFuture, ProviderSynchronization},
};

/// Transaction behaviour for one session: pass-through for acknowledged
/// sessions, local transactions for transacted ones.
pub(crate) enum TransactionContext {
    None,
    Local(LocalTransactionContext),
}

impl TransactionContext {
    pub(crate) fn none() -> Self { Self::None }

    pub(crate) fn local(session_id: SessionId) -> Self {
        Self::Local(LocalTransactionContext::new(session_id))
    }

    pub(crate) fn is_transacted(&self) -> bool { matches!(self, Self::Local(_)) }

    /// Open the initial transaction. No-op for pass-through sessions.
    pub(crate) async fn begin(&self, connection: &Arc<ConnectionInner>) -> Result<()> {
        match self {
            Self::None => Ok(()),
            Self::Local(local) => local.begin(connection).await,
        }
    }

    pub(crate) async fn send(
        &self,
        connection: &Arc<ConnectionInner>,
        mut envelope: OutboundEnvelope,
    ) -> Result<()> {
        match self {
            Self::None => connection.send_envelope(envelope).await,
            Self::Local(local) => {
                envelope.transaction_id = Some(local.current_id()?);
                connection.send_envelope(envelope).await
            }
        }
    }

    pub(crate) async fn acknowledge(
        &self,
        connection: &Arc<ConnectionInner>,
        mut envelope: InboundEnvelope,
        ack_type: AckType,
    ) -> Result<()> {
        match self {
            Self::None => connection.acknowledge_envelope(envelope, ack_type).await,
            Self::Local(local) => {
                // Only consumption outcomes participate in the transaction.
                if matches!(ack_type, AckType::Delivered | AckType::Accepted) {
                    envelope.transaction_id = Some(local.current_id()?);
                }
                connection.acknowledge_envelope(envelope, ack_type).await
            }
        }
    }

    pub(crate) async fn commit(&self, connection: &Arc<ConnectionInner>) -> Result<()> {
        match self {
            Self::None => Err(Error::illegal_state("not a transacted session")),
            Self::Local(local) => local.discharge(connection, Discharge::Commit).await,
        }
    }

    pub(crate) async fn rollback(&self, connection: &Arc<ConnectionInner>) -> Result<()> {
        match self {
            Self::None => Err(Error::illegal_state("not a transacted session")),
            Self::Local(local) => local.discharge(connection, Discharge::Rollback).await,
        }
    }

    /// The broker side of the current transaction is gone; doom it.
    pub(crate) fn on_connection_interrupted(&self) {
        if let Self::Local(local) = self {
            local.state.lock().expect("transaction state poisoned").in_doubt = true;
        }
    }

    /// Declare a fresh transaction on the recovering provider before any
    /// producer or consumer of the session is replayed.
    pub(crate) async fn on_connection_recovery(
        &self,
        connection: &Arc<ConnectionInner>,
        provider: &dyn Provider,
    ) -> Result<()> {
        let Self::Local(local) = self else {
            return Ok(());
        };
        let info = local.allocate(connection);
        let request = ProviderFuture::new();
        provider
            .create(Resource::Transaction(info.clone()), request.clone())
            .await?;
        request.sync(connection.request_timeout()).await?;
        let mut state = local.state.lock().expect("transaction state poisoned");
        state.current = Some(info);
        state.in_doubt = false;
        Ok(())
    }

    pub(crate) fn shutdown(&self) {
        if let Self::Local(local) = self {
            local.state.lock().expect("transaction state poisoned").current = None;
        }
    }
}

enum Discharge {
    Commit,
    Rollback,
}

#[derive(Default)]
struct TxState {
    current: Option<TransactionInfo>,
    in_doubt: bool,
}

pub(crate) struct LocalTransactionContext {
    session_id: SessionId,
    state: Arc<Mutex<TxState>>,
}

/// Clears the discharged transaction before awaiters wake, so a caller
/// observing the provider outcome never sees the stale transaction id.
struct DischargeSynchronization {
    state: Arc<Mutex<TxState>>,
}

impl ProviderSynchronization for DischargeSynchronization {
    fn on_pending_success(&self) {
        self.state.lock().expect("transaction state poisoned").current = None;
    }

    fn on_pending_failure(&self, _cause: &Error) {
        self.state.lock().expect("transaction state poisoned").current = None;
    }
}

impl LocalTransactionContext {
    fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            state: Arc::new(Mutex::new(TxState::default())),
        }
    }

    fn allocate(&self, connection: &Arc<ConnectionInner>) -> TransactionInfo {
        TransactionInfo {
            session_id: self.session_id.clone(),
            id: connection.next_transaction_id(),
        }
    }

    fn current_id(&self) -> Result<TransactionId> {
        let state = self.state.lock().expect("transaction state poisoned");
        if state.in_doubt {
            return Err(Error::TransactionRolledBack(
                "the active transaction was lost with the connection".into(),
            ));
        }
        state
            .current
            .as_ref()
            .map(|info| info.id.clone())
            .ok_or_else(|| Error::illegal_state("no transaction is active"))
    }

    async fn begin(&self, connection: &Arc<ConnectionInner>) -> Result<()> {
        let info = self.allocate(connection);
        debug!("transaction started: id={}", info.id);
        connection
            .create_resource(Resource::Transaction(info.clone()))
            .await?;
        let mut state = self.state.lock().expect("transaction state poisoned");
        state.current = Some(info);
        state.in_doubt = false;
        Ok(())
    }

    async fn discharge(&self, connection: &Arc<ConnectionInner>, mode: Discharge) -> Result<()> {
        let (info, in_doubt) = {
            let state = self.state.lock().expect("transaction state poisoned");
            (state.current.clone(), state.in_doubt)
        };

        if in_doubt {
            // The broker lost the transaction during failover. Install a
            // replacement; commit must report the loss, rollback achieved
            // its outcome regardless.
            self.begin(connection).await?;
            return match mode {
                Discharge::Commit => Err(Error::TransactionRolledBack(
                    "the transaction was rolled back with the failed connection".into(),
                )),
                Discharge::Rollback => Ok(()),
            };
        }

        let info = info.ok_or_else(|| Error::illegal_state("no transaction is active"))?;
        let synchronization = Box::new(DischargeSynchronization {
            state: Arc::clone(&self.state),
        });
        let outcome = match mode {
            Discharge::Commit => {
                connection
                    .commit_transaction(info, Some(synchronization))
                    .await
            }
            Discharge::Rollback => {
                connection
                    .rollback_transaction(info, Some(synchronization))
                    .await
            }
        };

        // Roll over to a fresh transaction whatever the discharge outcome;
        // only a failed rollover leaves the context in doubt.
        let rollover = self.begin(connection).await;
        if rollover.is_err() {
            self.state.lock().expect("transaction state poisoned").in_doubt = true;
        }
        outcome.and(rollover)
    }
}
