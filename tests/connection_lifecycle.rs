//! Connection lifecycle: lazy establishment, client id rules, close
//! semantics, temporary destinations, and transport failure handling.

mod support;

use std::sync::{Arc, Mutex};

use courier::{
    provider::test_support::ProviderCall, AckMode, Error, ExceptionHandler, Resource,
};
use support::{new_connection, wait_until, RecordingListener};

#[tokio::test]
async fn connect_is_lazy_and_triggered_by_session_creation() {
    let (provider, connection) = new_connection().await;
    assert!(!connection.is_connected());
    assert!(provider.calls().is_empty());

    connection
        .create_session(AckMode::AutoAck)
        .await
        .expect("session created");

    assert!(connection.is_connected());
    let calls = provider.calls();
    assert!(matches!(calls[0], ProviderCall::Create(Resource::Connection(_))));
    assert!(matches!(calls[1], ProviderCall::Create(Resource::Session(_))));
}

#[tokio::test]
async fn connect_generates_a_client_id_when_none_is_set() {
    let (provider, connection) = new_connection().await;
    connection.start().await.expect("start connects");

    let client_id = connection.client_id().expect("client id readable");
    assert!(client_id.expect("generated").starts_with("ID:"));

    let calls = provider.calls();
    let ProviderCall::Create(Resource::Connection(info)) = &calls[0] else {
        panic!("expected the connection declaration first");
    };
    assert!(info.client_id.is_some());
}

#[tokio::test]
async fn client_id_can_be_set_exactly_once() {
    let (_provider, connection) = new_connection().await;
    connection.set_client_id("alice").await.expect("first assignment");
    assert_eq!(
        connection.client_id().expect("readable"),
        Some("alice".to_owned())
    );

    let second = connection.set_client_id("bob").await;
    assert!(matches!(second, Err(Error::IllegalState(_))));
}

#[tokio::test]
async fn client_id_is_rejected_after_connect() {
    let (_provider, connection) = new_connection().await;
    connection
        .create_session(AckMode::AutoAck)
        .await
        .expect("session connects");

    let result = connection.set_client_id("late").await;
    assert!(matches!(result, Err(Error::IllegalState(_))));
}

#[tokio::test]
async fn empty_client_ids_are_invalid() {
    let (_provider, connection) = new_connection().await;
    let result = connection.set_client_id("   ").await;
    assert!(matches!(result, Err(Error::InvalidClientId(_))));
}

#[tokio::test]
async fn close_is_idempotent_and_destroys_the_connection_resource() {
    let (provider, connection) = new_connection().await;
    connection.start().await.expect("start");
    connection.close().await.expect("first close");
    connection.close().await.expect("second close is a no-op");

    let destroys: Vec<_> = provider
        .calls()
        .into_iter()
        .filter(|call| matches!(call, ProviderCall::Destroy(Resource::Connection(_))))
        .collect();
    assert_eq!(destroys.len(), 1);
    assert!(provider.is_closed());

    let result = connection.create_session(AckMode::AutoAck).await;
    assert!(matches!(result, Err(Error::IllegalState(_))));
}

#[tokio::test]
async fn metadata_reports_this_client() {
    let (_provider, connection) = new_connection().await;
    let metadata = connection.metadata().expect("metadata");
    assert_eq!(metadata.provider_name, "courier");
    assert!(!metadata.provider_version.is_empty());
}

#[tokio::test]
async fn connection_consumers_are_not_supported() {
    let (_provider, connection) = new_connection().await;
    let destination = courier::Destination::queue("q");
    let result = connection
        .create_connection_consumer(&destination, None, 10)
        .await;
    assert!(matches!(result, Err(Error::NotSupported(_))));
}

#[tokio::test]
async fn temporary_destination_names_are_scoped_to_the_connection() {
    let (provider, connection) = new_connection().await;
    let queue = connection.create_temporary_queue().await.expect("temp queue");
    let topic = connection.create_temporary_topic().await.expect("temp topic");

    let prefix = format!("{}:", connection.connection_id());
    assert!(queue.name().starts_with(&prefix));
    assert!(topic.name().starts_with(&prefix));
    assert_ne!(queue.name(), topic.name());

    let creates = provider
        .calls()
        .into_iter()
        .filter(|call| matches!(call, ProviderCall::Create(Resource::TemporaryDestination(_))))
        .count();
    assert_eq!(creates, 2);
}

#[tokio::test]
async fn temporary_destinations_cannot_be_deleted_while_consumed() {
    let (provider, connection) = new_connection().await;
    let session = connection
        .create_session(AckMode::AutoAck)
        .await
        .expect("session");
    let queue = connection.create_temporary_queue().await.expect("temp queue");
    let consumer = session.create_consumer(&queue).await.expect("consumer");

    let blocked = connection.delete_temporary_destination(&queue).await;
    assert!(matches!(blocked, Err(Error::IllegalState(_))));

    consumer.close().await.expect("consumer closed");
    connection
        .delete_temporary_destination(&queue)
        .await
        .expect("deletion succeeds once unused");

    assert!(provider.calls().iter().any(|call| {
        matches!(call, ProviderCall::Destroy(Resource::TemporaryDestination(d)) if d == &queue)
    }));
}

#[tokio::test]
async fn foreign_temporary_destinations_are_rejected() {
    let (_provider, first) = new_connection().await;
    let (_other_provider, second) = new_connection().await;
    let foreign = second.create_temporary_queue().await.expect("temp queue");

    let session = first.create_session(AckMode::AutoAck).await.expect("session");
    let result = session.create_consumer(&foreign).await;
    assert!(matches!(result, Err(Error::InvalidDestination(_))));
}

#[tokio::test]
async fn a_blocked_request_fails_when_the_transport_is_lost() {
    let (provider, connection) = new_connection().await;
    let session = connection
        .create_session(AckMode::AutoAck)
        .await
        .expect("session");
    let queue = session.create_queue("orders").expect("queue");
    let producer = session.create_producer(Some(&queue)).await.expect("producer");

    provider.hold_completions();
    let sender = {
        let producer = producer.clone();
        tokio::spawn(async move {
            let mut message = support::text_message("stuck");
            producer.send(&mut message).await
        })
    };
    assert!(wait_until(|| provider.held_count() == 1).await);

    provider
        .listener()
        .on_connection_failure(Error::Io("wire dropped".into()));

    let send_result = sender.await.expect("send task joined");
    let error = send_result.expect_err("send observed the failure");
    assert!(matches!(error.root_cause(), Error::Io(m) if m == "wire dropped"));

    // Every later operation reports the same first failure.
    let next = connection.create_session(AckMode::AutoAck).await;
    let next_error = next.expect_err("connection is failed");
    assert!(matches!(next_error, Error::ConnectionFailed(_)));
    assert!(matches!(next_error.root_cause(), Error::Io(m) if m == "wire dropped"));

    // Close must still succeed on a failed connection.
    connection.close().await.expect("close does not fail");
}

#[tokio::test]
async fn connection_failure_reaches_listeners_and_exception_handler() {
    let (provider, connection) = new_connection().await;
    let listener = RecordingListener::new();
    connection.add_connection_listener(listener.clone());

    let errors: Arc<Mutex<Vec<Error>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let handler: ExceptionHandler =
        Arc::new(move |error| sink.lock().expect("errors poisoned").push(error));
    connection
        .set_exception_listener(Some(handler))
        .expect("handler installed");

    connection.start().await.expect("start");
    provider
        .listener()
        .on_connection_failure(Error::Io("poof".into()));

    assert!(wait_until(|| listener.has_event("failure:")).await);
    assert!(
        wait_until(|| !errors.lock().expect("errors poisoned").is_empty()).await,
        "exception listener should observe the failure"
    );
    assert!(connection.is_failed());
}

#[tokio::test]
async fn unsubscribe_requires_the_subscription_to_be_idle() {
    let (provider, connection) = new_connection().await;
    connection.set_client_id("subscriber-1").await.expect("client id");
    let session = connection
        .create_session(AckMode::AutoAck)
        .await
        .expect("session");
    let topic = session.create_topic("prices").expect("topic");
    let subscriber = session
        .create_durable_subscriber(&topic, "price-watch", None, false)
        .await
        .expect("durable subscriber");

    let blocked = session.unsubscribe("price-watch").await;
    assert!(matches!(blocked, Err(Error::IllegalState(_))));

    subscriber.close().await.expect("subscriber closed");
    session.unsubscribe("price-watch").await.expect("unsubscribed");
    assert!(provider
        .calls()
        .iter()
        .any(|call| matches!(call, ProviderCall::Unsubscribe(name) if name == "price-watch")));
}

#[tokio::test]
async fn durable_subscribers_require_an_explicit_client_id() {
    let (_provider, connection) = new_connection().await;
    let session = connection
        .create_session(AckMode::AutoAck)
        .await
        .expect("session");
    let topic = session.create_topic("prices").expect("topic");

    let result = session
        .create_durable_subscriber(&topic, "price-watch", None, false)
        .await;
    assert!(matches!(result, Err(Error::IllegalState(_))));
}
