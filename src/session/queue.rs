//! Envelope buffering for sessions and consumers.
//!
//! [`DispatchBuffer`] gates delivery while a session is stopped: envelopes
//! offered before `release` are buffered (up to a hard cap) and handed back
//! in arrival order when delivery resumes. [`MessageQueue`] is the unbounded
//! FIFO each consumer drains from its synchronous receive calls.

use std::{
    collections::VecDeque,
    pin::pin,
    sync::Mutex,
    time::Duration,
};

use tokio::sync::Notify;

use crate::envelope::InboundEnvelope;

/// Hard cap on envelopes buffered while a session is stopped. Hitting it
/// means the application left a consuming session stopped while the broker
/// kept dispatching, which is a programming error to surface, not to hide.
pub(crate) const STOPPED_BUFFER_CAPACITY: usize = 10_000;

/// Outcome of offering an envelope to a [`DispatchBuffer`].
#[derive(Debug)]
pub(crate) enum BufferOffer {
    /// Delivery is running; dispatch the envelope now.
    Dispatch(InboundEnvelope),
    /// Delivery is stopped; the envelope was buffered.
    Buffered,
    /// The buffer is full; the envelope is refused and returned.
    Overflow(InboundEnvelope),
}

struct BufferState {
    delivering: bool,
    entries: VecDeque<InboundEnvelope>,
}

/// Delivery gate plus bounded FIFO for a stopped session.
///
/// The gate and the buffer share one lock so an envelope can never slip
/// past a concurrent `release`: it is either buffered (and part of the
/// released batch) or told to dispatch (and therefore ordered behind the
/// batch on the session dispatcher).
pub(crate) struct DispatchBuffer {
    state: Mutex<BufferState>,
    capacity: usize,
}

impl DispatchBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                delivering: false,
                entries: VecDeque::new(),
            }),
            capacity,
        }
    }

    pub(crate) fn offer(&self, envelope: InboundEnvelope) -> BufferOffer {
        let mut state = self.state.lock().expect("dispatch buffer poisoned");
        if state.delivering {
            BufferOffer::Dispatch(envelope)
        } else if state.entries.len() >= self.capacity {
            BufferOffer::Overflow(envelope)
        } else {
            state.entries.push_back(envelope);
            BufferOffer::Buffered
        }
    }

    /// Open the gate and take everything buffered, in arrival order.
    #[must_use]
    pub(crate) fn release(&self) -> Vec<InboundEnvelope> {
        let mut state = self.state.lock().expect("dispatch buffer poisoned");
        state.delivering = true;
        state.entries.drain(..).collect()
    }

    /// Close the gate; subsequent offers buffer again.
    pub(crate) fn suspend(&self) {
        self.state.lock().expect("dispatch buffer poisoned").delivering = false;
    }

    pub(crate) fn buffered_len(&self) -> usize {
        self.state.lock().expect("dispatch buffer poisoned").entries.len()
    }
}

struct QueueState {
    entries: VecDeque<InboundEnvelope>,
    closed: bool,
}

/// Unbounded FIFO a consumer's receive calls block on.
pub(crate) struct MessageQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MessageQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Append an envelope; returns `false` once the queue is closed.
    pub(crate) fn enqueue(&self, envelope: InboundEnvelope) -> bool {
        let mut state = self.state.lock().expect("message queue poisoned");
        if state.closed {
            return false;
        }
        state.entries.push_back(envelope);
        drop(state);
        self.notify.notify_waiters();
        true
    }

    pub(crate) fn try_dequeue(&self) -> Option<InboundEnvelope> {
        self.state
            .lock()
            .expect("message queue poisoned")
            .entries
            .pop_front()
    }

    /// Wait for the next envelope. Returns `None` once the queue is closed
    /// and drained.
    pub(crate) async fn dequeue(&self) -> Option<InboundEnvelope> {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().expect("message queue poisoned");
                if let Some(envelope) = state.entries.pop_front() {
                    return Some(envelope);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Wait up to `timeout` for the next envelope.
    pub(crate) async fn dequeue_timeout(&self, timeout: Duration) -> Option<InboundEnvelope> {
        tokio::time::timeout(timeout, self.dequeue())
            .await
            .ok()
            .flatten()
    }

    /// Refuse further envelopes and wake all blocked receivers.
    pub(crate) fn close(&self) {
        self.state.lock().expect("message queue poisoned").closed = true;
        self.notify.notify_waiters();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.state
            .lock()
            .expect("message queue poisoned")
            .entries
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::Message,
        meta::{ConnectionId, ConsumerId, SessionId},
    };

    fn envelope(dispatch_id: u64) -> InboundEnvelope {
        let consumer = ConsumerId::new(SessionId::new(ConnectionId::new("ID:c"), 1), 1);
        InboundEnvelope::new(consumer, Message::new(), dispatch_id)
    }

    #[test]
    fn buffer_holds_envelopes_until_released() {
        let buffer = DispatchBuffer::new(4);
        assert!(matches!(buffer.offer(envelope(1)), BufferOffer::Buffered));
        assert!(matches!(buffer.offer(envelope(2)), BufferOffer::Buffered));

        let released = buffer.release();
        assert_eq!(
            released.iter().map(|e| e.dispatch_id).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(matches!(buffer.offer(envelope(3)), BufferOffer::Dispatch(_)));

        buffer.suspend();
        assert!(matches!(buffer.offer(envelope(4)), BufferOffer::Buffered));
    }

    #[test]
    fn buffer_refuses_overflow_and_returns_the_envelope() {
        let buffer = DispatchBuffer::new(2);
        assert!(matches!(buffer.offer(envelope(1)), BufferOffer::Buffered));
        assert!(matches!(buffer.offer(envelope(2)), BufferOffer::Buffered));
        match buffer.offer(envelope(3)) {
            BufferOffer::Overflow(refused) => assert_eq!(refused.dispatch_id, 3),
            other => panic!("expected overflow, got {other:?}"),
        }
        assert_eq!(buffer.buffered_len(), 2);
    }

    #[tokio::test]
    async fn queue_preserves_fifo_order() {
        let queue = MessageQueue::new();
        for id in 1..=3 {
            assert!(queue.enqueue(envelope(id)));
        }
        for id in 1..=3 {
            let received = queue.dequeue().await.expect("queued envelope");
            assert_eq!(received.dispatch_id, id);
        }
    }

    #[tokio::test]
    async fn closed_queue_drains_then_reports_end() {
        let queue = MessageQueue::new();
        queue.enqueue(envelope(1));
        queue.close();
        assert!(!queue.enqueue(envelope(2)));
        assert!(queue.dequeue().await.is_some());
        assert!(queue.dequeue().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_timeout_expires_empty() {
        let queue = MessageQueue::new();
        let outcome = queue.dequeue_timeout(Duration::from_millis(50)).await;
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn blocked_dequeue_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(MessageQueue::new());
        let waiter = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::task::yield_now().await;
        queue.enqueue(envelope(9));
        let received = waiter.await.expect("join").expect("envelope");
        assert_eq!(received.dispatch_id, 9);
    }
}
