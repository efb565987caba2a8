//! Local transaction coordination: the always-open transaction, commit and
//! rollback rollover, envelope tagging, and failover dooming.

mod support;

use courier::{
    provider::test_support::ProviderCall, AckMode, AckType, Error, Resource, TransactionId,
};
use support::{new_connection, text_message, wait_until};

fn created_transactions(calls: &[ProviderCall]) -> Vec<TransactionId> {
    calls
        .iter()
        .filter_map(|call| match call {
            ProviderCall::Create(Resource::Transaction(info)) => Some(info.id.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn a_transacted_session_opens_a_transaction_at_creation() {
    let (provider, connection) = new_connection().await;
    let session = connection
        .create_session(AckMode::Transacted)
        .await
        .expect("transacted session");
    assert!(session.is_transacted());

    let transactions = created_transactions(&provider.calls());
    assert_eq!(transactions.len(), 1);
}

#[tokio::test]
async fn transacted_sends_carry_the_open_transaction_id() {
    let (provider, connection) = new_connection().await;
    let session = connection
        .create_session(AckMode::Transacted)
        .await
        .expect("session");
    let queue = session.create_queue("q").expect("queue");
    let producer = session.create_producer(Some(&queue)).await.expect("producer");

    let mut message = text_message("in-tx");
    producer.send(&mut message).await.expect("send");

    let calls = provider.calls();
    let open_tx = created_transactions(&calls)[0].clone();
    let ProviderCall::Send(envelope) = calls.last().expect("send recorded") else {
        panic!("expected a send call");
    };
    assert_eq!(envelope.transaction_id.as_ref(), Some(&open_tx));
    // Transacted sends never wait on individual broker acknowledgement.
    assert!(envelope.send_async);
}

#[tokio::test]
async fn commit_discharges_and_begins_a_fresh_transaction() {
    let (provider, connection) = new_connection().await;
    let session = connection
        .create_session(AckMode::Transacted)
        .await
        .expect("session");

    session.commit().await.expect("commit");

    let calls = provider.calls();
    let transactions = created_transactions(&calls);
    assert_eq!(transactions.len(), 2, "initial transaction plus its successor");

    let committed: Vec<TransactionId> = calls
        .iter()
        .filter_map(|call| match call {
            ProviderCall::Commit(info) => Some(info.id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(committed, vec![transactions[0].clone()]);
}

#[tokio::test]
async fn rollback_suspends_consumers_and_replaces_the_transaction() {
    let (provider, connection) = new_connection().await;
    connection.start().await.expect("start");
    let session = connection
        .create_session(AckMode::Transacted)
        .await
        .expect("session");
    let queue = session.create_queue("q").expect("queue");
    let consumer = session.create_consumer(&queue).await.expect("consumer");
    let producer = session.create_producer(Some(&queue)).await.expect("producer");

    for text in ["m1", "m2"] {
        let mut message = text_message(text);
        producer.send(&mut message).await.expect("send");
    }
    let _ = provider.take_calls();

    session.rollback().await.expect("rollback");

    let calls = provider.calls();
    let rolled_back = calls
        .iter()
        .filter(|call| matches!(call, ProviderCall::Rollback(_)))
        .count();
    assert_eq!(rolled_back, 1);
    assert_eq!(created_transactions(&calls).len(), 1, "fresh transaction declared");

    // The consumer's credit window was closed for the teardown and
    // reopened afterwards.
    let consumer_id = consumer.consumer_id();
    assert!(calls.iter().any(|call| {
        matches!(call, ProviderCall::StopResource(Resource::Consumer(info)) if &info.id == consumer_id)
    }));
    assert!(calls.iter().any(|call| {
        matches!(call, ProviderCall::StartResource(Resource::Consumer(info)) if &info.id == consumer_id)
    }));

    // Committing the replacement transaction is a clean no-op commit.
    session.commit().await.expect("commit after rollback");
}

#[tokio::test]
async fn commit_and_rollback_require_a_transacted_session() {
    let (_provider, connection) = new_connection().await;
    let session = connection
        .create_session(AckMode::AutoAck)
        .await
        .expect("session");
    assert!(matches!(session.commit().await, Err(Error::IllegalState(_))));
    assert!(matches!(session.rollback().await, Err(Error::IllegalState(_))));
}

#[tokio::test]
async fn transacted_receipt_is_acknowledged_inside_the_transaction() {
    let (provider, connection) = new_connection().await;
    connection.start().await.expect("start");
    let session = connection
        .create_session(AckMode::Transacted)
        .await
        .expect("session");
    let queue = session.create_queue("q").expect("queue");
    let consumer = session.create_consumer(&queue).await.expect("consumer");

    provider.deliver(consumer.consumer_id().clone(), text_message("take"));
    let message = consumer
        .receive_timeout(std::time::Duration::from_secs(1))
        .await
        .expect("receive")
        .expect("message");
    assert_eq!(support::body_text(&message), "take");

    let open_tx = created_transactions(&provider.calls())[0].clone();
    assert!(wait_until(|| {
        provider.calls().iter().any(|call| {
            matches!(
                call,
                ProviderCall::Acknowledge(envelope, AckType::Accepted)
                    if envelope.transaction_id.as_ref() == Some(&open_tx)
            )
        })
    })
    .await);
}

#[tokio::test]
async fn an_interrupted_transaction_is_doomed_until_replaced() {
    let (provider, connection) = new_connection().await;
    let session = connection
        .create_session(AckMode::Transacted)
        .await
        .expect("session");
    let queue = session.create_queue("q").expect("queue");
    let producer = session.create_producer(Some(&queue)).await.expect("producer");

    provider.listener().on_connection_interrupted("mock://remote");

    // Sends against the doomed transaction are refused.
    let mut message = text_message("doomed");
    let send_result = producer.send(&mut message).await;
    assert!(matches!(send_result, Err(Error::TransactionRolledBack(_))));

    // Commit reports the loss but installs a replacement transaction.
    let commit_result = session.commit().await;
    assert!(matches!(commit_result, Err(Error::TransactionRolledBack(_))));

    let mut retry = text_message("retry");
    producer.send(&mut retry).await.expect("send on the fresh transaction");
    session.commit().await.expect("commit succeeds again");
}

#[tokio::test]
async fn rollback_of_a_doomed_transaction_succeeds_quietly() {
    let (provider, connection) = new_connection().await;
    let session = connection
        .create_session(AckMode::Transacted)
        .await
        .expect("session");

    provider.listener().on_connection_interrupted("mock://remote");
    let _ = provider.take_calls();

    session.rollback().await.expect("rollback achieves its outcome");

    // No provider rollback was issued for the lost transaction, only the
    // declaration of its successor.
    let calls = provider.calls();
    assert!(!calls.iter().any(|call| matches!(call, ProviderCall::Rollback(_))));
    assert_eq!(created_transactions(&calls).len(), 1);
}
