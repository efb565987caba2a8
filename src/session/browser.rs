//! Queue browsing.
//!
//! A browser is a consumer flagged so the broker serves message copies
//! without removing them from the queue. Iteration reuses the consumer's
//! receive path.

use std::time::Duration;

use crate::{
    destination::Destination,
    error::Result,
    message::Message,
    session::consumer::MessageConsumer,
};

/// Non-destructive view over the messages waiting on a queue.
pub struct QueueBrowser {
    consumer: MessageConsumer,
}

impl QueueBrowser {
    pub(crate) fn new(consumer: MessageConsumer) -> Self { Self { consumer } }

    #[must_use]
    pub fn destination(&self) -> &Destination { self.consumer.destination() }

    #[must_use]
    pub fn selector(&self) -> Option<&str> { self.consumer.selector() }

    /// The next browsed message, waiting up to `timeout` for the broker to
    /// serve one. `None` once the browse is exhausted.
    pub async fn next_timeout(&self, timeout: Duration) -> Result<Option<Message>> {
        self.consumer.receive_timeout(timeout).await
    }

    /// A locally available browsed message, without waiting.
    pub async fn next_no_wait(&self) -> Result<Option<Message>> {
        self.consumer.receive_no_wait().await
    }

    /// Close the browser and its backing consumer.
    pub async fn close(&self) -> Result<()> { self.consumer.close().await }
}
