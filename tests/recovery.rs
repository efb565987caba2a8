//! Failover recovery: re-declaration ordering, consumer resumption, and
//! remote resource closure handling.

mod support;

use std::time::Duration;

use courier::{
    provider::test_support::ProviderCall, AckMode, Error, Resource,
};
use support::{new_connection, text_message, wait_until, RecordingListener};

#[tokio::test]
async fn recovery_redeclares_connection_state_in_order() {
    let (provider, connection) = new_connection().await;
    connection.start().await.expect("start");
    let _temp = connection.create_temporary_queue().await.expect("temp queue");
    let session = connection
        .create_session(AckMode::Transacted)
        .await
        .expect("session");
    let queue = session.create_queue("q").expect("queue");
    let _producer = session.create_producer(Some(&queue)).await.expect("producer");
    let _consumer = session.create_consumer(&queue).await.expect("consumer");
    let _ = provider.take_calls();

    provider.drive_recovery().await.expect("recovery completes");

    let declared: Vec<&'static str> = provider
        .calls()
        .iter()
        .filter_map(|call| match call {
            ProviderCall::Create(Resource::Connection(_)) => Some("connection"),
            ProviderCall::Create(Resource::TemporaryDestination(_)) => Some("temp-destination"),
            ProviderCall::Create(Resource::Session(_)) => Some("session"),
            ProviderCall::Create(Resource::Transaction(_)) => Some("transaction"),
            ProviderCall::Create(Resource::Producer(_)) => Some("producer"),
            ProviderCall::Create(Resource::Consumer(_)) => Some("consumer"),
            _ => None,
        })
        .collect();
    assert_eq!(
        declared,
        [
            "connection",
            "temp-destination",
            "session",
            "transaction",
            "producer",
            "consumer"
        ]
    );
}

#[tokio::test]
async fn recovery_restores_credit_for_started_consumers_only() {
    let (provider, connection) = new_connection().await;
    connection.start().await.expect("start");
    let session = connection
        .create_session(AckMode::AutoAck)
        .await
        .expect("session");
    let queue = session.create_queue("q").expect("queue");
    let consumer = session.create_consumer(&queue).await.expect("consumer");

    let restarted = |calls: Vec<ProviderCall>| {
        calls
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::StartResource(Resource::Consumer(info)) => Some(info.id),
                _ => None,
            })
            .collect::<Vec<_>>()
    };

    let _ = provider.take_calls();
    provider.drive_recovery().await.expect("recovery while started");
    assert!(restarted(provider.take_calls()).contains(consumer.consumer_id()));

    connection.stop().await.expect("stop");
    let _ = provider.take_calls();
    provider.drive_recovery().await.expect("recovery while stopped");
    assert!(restarted(provider.take_calls()).is_empty());
}

#[tokio::test]
async fn interruption_and_restoration_reach_connection_listeners() {
    let (provider, connection) = new_connection().await;
    let listener = RecordingListener::new();
    connection.add_connection_listener(listener.clone());
    connection.start().await.expect("start");

    provider.drive_recovery().await.expect("recovery completes");

    assert!(wait_until(|| listener.has_event("interrupted:")).await);
    assert!(wait_until(|| listener.has_event("restored:")).await);
}

#[tokio::test]
async fn a_remotely_closed_consumer_reports_its_failure_cause() {
    let (provider, connection) = new_connection().await;
    let listener = RecordingListener::new();
    connection.add_connection_listener(listener.clone());
    connection.start().await.expect("start");
    let session = connection
        .create_session(AckMode::AutoAck)
        .await
        .expect("session");
    let queue = session.create_queue("q").expect("queue");
    let consumer = session.create_consumer(&queue).await.expect("consumer");

    let info = provider
        .calls()
        .into_iter()
        .find_map(|call| match call {
            ProviderCall::Create(Resource::Consumer(info)) => Some(info),
            _ => None,
        })
        .expect("consumer declared");
    provider.listener().on_resource_closed(
        Resource::Consumer(info),
        Error::Io("link detached".into()),
    );

    assert!(wait_until(|| listener.has_event("consumer-closed:")).await);
    let error = consumer
        .receive_no_wait()
        .await
        .expect_err("closed consumer refuses receive");
    let Error::IllegalState(text) = error else {
        panic!("expected illegal state, got {error:?}");
    };
    assert!(text.contains("unrecoverable"), "cause surfaces in: {text}");
}

#[tokio::test]
async fn a_remotely_closed_session_shuts_down_its_children() {
    let (provider, connection) = new_connection().await;
    let listener = RecordingListener::new();
    connection.add_connection_listener(listener.clone());
    connection.start().await.expect("start");
    let session = connection
        .create_session(AckMode::AutoAck)
        .await
        .expect("session");
    let queue = session.create_queue("q").expect("queue");
    let producer = session.create_producer(Some(&queue)).await.expect("producer");

    let info = provider
        .calls()
        .into_iter()
        .find_map(|call| match call {
            ProviderCall::Create(Resource::Session(info)) => Some(info),
            _ => None,
        })
        .expect("session declared");
    provider
        .listener()
        .on_resource_closed(Resource::Session(info), Error::Io("session torn down".into()));

    assert!(wait_until(|| listener.has_event("session-closed:")).await);
    let mut message = text_message("late");
    let error = producer.send(&mut message).await.expect_err("producer is gone");
    assert!(matches!(error, Error::IllegalState(_)));
}

#[tokio::test]
async fn delivery_resumes_after_recovery() {
    let (provider, connection) = new_connection().await;
    connection.start().await.expect("start");
    let session = connection
        .create_session(AckMode::AutoAck)
        .await
        .expect("session");
    let queue = session.create_queue("q").expect("queue");
    let consumer = session.create_consumer(&queue).await.expect("consumer");

    provider.drive_recovery().await.expect("recovery completes");

    provider.deliver(consumer.consumer_id().clone(), text_message("after"));
    let message = consumer
        .receive_timeout(Duration::from_secs(1))
        .await
        .expect("receive")
        .expect("message");
    assert_eq!(support::body_text(&message), "after");
}
