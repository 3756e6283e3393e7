//! The bounded hand-off between the intake loop and the workers.
//!
//! Capacity equals the worker count, so the intake loop stops reading from
//! the consumer while every worker is busy and the queue is full. Dropping
//! the [`QueueSender`] closes the queue; workers drain what is left and then
//! see `None`.

use {
    doozer_common::Message,
    tokio::sync::{Mutex, mpsc},
};

/// Create a queue holding at most `capacity` messages (minimum 1).
pub fn bounded(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (QueueSender { inner: sender }, QueueReceiver {
        inner: Mutex::new(receiver),
    })
}

#[derive(Debug)]
pub struct QueueSender {
    inner: mpsc::Sender<Message>,
}

impl QueueSender {
    /// Wait for a free slot, then enqueue. Hands the message back if every
    /// receiver is gone.
    pub async fn push(&self, message: Message) -> Result<(), Message> {
        self.inner.send(message).await.map_err(|err| err.0)
    }

    /// Enqueue without waiting. Hands the message back when full or closed.
    pub fn try_push(&self, message: Message) -> Result<(), Message> {
        self.inner.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(m) | mpsc::error::TrySendError::Closed(m) => m,
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.max_capacity()
    }

    /// Messages currently waiting for a worker.
    pub fn len(&self) -> usize {
        self.inner.max_capacity() - self.inner.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receiving half, shared by every worker.
#[derive(Debug)]
pub struct QueueReceiver {
    inner: Mutex<mpsc::Receiver<Message>>,
}

impl QueueReceiver {
    /// Next message in FIFO order; `None` once the queue is closed and
    /// drained.
    pub async fn pop(&self) -> Option<Message> {
        self.inner.lock().await.recv().await
    }
}
