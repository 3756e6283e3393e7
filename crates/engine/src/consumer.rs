//! Message sources.
//!
//! A [`Consumer`] yields one message per `read`. Running out of messages is
//! reported as [`ReadError::EndOfStream`], which ends the application's
//! intake loop cleanly.

use std::{collections::VecDeque, sync::Mutex};

use {
    async_trait::async_trait,
    doozer_common::Message,
    serde_json::Value,
    thiserror::Error,
    tokio::{
        io::{AsyncBufRead, AsyncBufReadExt, Lines},
        sync::{Mutex as AsyncMutex, mpsc},
    },
    tracing::warn,
};

#[derive(Debug, Error)]
pub enum ReadError {
    /// The source has no more messages. Not a failure.
    #[error("end of stream")]
    EndOfStream,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Something the application can pull messages from.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Wait for the next message.
    async fn read(&self) -> Result<Message, ReadError>;
}

/// Serves a fixed set of messages, then ends the stream.
#[derive(Debug, Default)]
pub struct IterConsumer {
    messages: Mutex<VecDeque<Message>>,
}

impl IterConsumer {
    pub fn new(messages: impl IntoIterator<Item = Message>) -> Self {
        Self {
            messages: Mutex::new(messages.into_iter().collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl Consumer for IterConsumer {
    async fn read(&self) -> Result<Message, ReadError> {
        let next = self
            .messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        next.ok_or(ReadError::EndOfStream)
    }
}

/// Reads from an in-process channel.
///
/// The stream ends once every [`Resubmitter`] has been dropped and the
/// channel is empty. Error handlers can hold a `Resubmitter` to put a
/// message back on the stream.
#[derive(Debug)]
pub struct ChannelConsumer {
    receiver: AsyncMutex<mpsc::UnboundedReceiver<Message>>,
}

/// Sending half of a [`ChannelConsumer`].
#[derive(Debug, Clone)]
pub struct Resubmitter {
    sender: mpsc::UnboundedSender<Message>,
}

impl ChannelConsumer {
    pub fn new() -> (Self, Resubmitter) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                receiver: AsyncMutex::new(receiver),
            },
            Resubmitter { sender },
        )
    }
}

impl Resubmitter {
    /// Queue `message`; hands it back when the consumer is gone.
    pub fn submit(&self, message: Message) -> Result<(), Message> {
        self.sender.send(message).map_err(|err| err.0)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[async_trait]
impl Consumer for ChannelConsumer {
    async fn read(&self) -> Result<Message, ReadError> {
        self.receiver
            .lock()
            .await
            .recv()
            .await
            .ok_or(ReadError::EndOfStream)
    }
}

/// Reads one JSON document per line.
///
/// A line holding a serialized [`Message`] (an object with a `payload` key)
/// is read as that message; any other JSON value becomes the payload of a
/// new message. Blank lines are skipped, and malformed lines are logged and
/// skipped.
pub struct LinesConsumer<R> {
    lines: AsyncMutex<Lines<R>>,
}

impl<R: AsyncBufRead + Unpin> LinesConsumer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: AsyncMutex::new(reader.lines()),
        }
    }
}

#[async_trait]
impl<R> Consumer for LinesConsumer<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn read(&self) -> Result<Message, ReadError> {
        let mut lines = self.lines.lock().await;
        loop {
            let Some(line) = lines
                .next_line()
                .await
                .map_err(|err| ReadError::Failed(err.into()))?
            else {
                return Err(ReadError::EndOfStream);
            };
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(text) {
                Ok(value) => return Ok(message_from_value(value)),
                Err(err) => warn!(error = %err, "skipping malformed input line"),
            }
        }
    }
}

fn message_from_value(value: Value) -> Message {
    if value.get("payload").is_none() {
        return Message::new(value);
    }
    match serde_json::from_value::<Message>(value.clone()) {
        Ok(message) => message,
        Err(_) => Message::new(value),
    }
}
