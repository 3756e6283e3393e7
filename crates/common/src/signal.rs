//! Outcomes a hook or processing function can report back to the worker.
//!
//! A hook either succeeds, asks the worker to stop handling the current
//! item ([`Abort`]), or fails ([`Failure`]). The worker matches on
//! [`CallbackError`] explicitly; nothing relies on unwinding.

use std::fmt;

use {serde_json::Value, thiserror::Error};

use crate::message::Message;

pub type CallbackResult<T> = Result<T, CallbackError>;

/// Stop processing the current message (or result) and go straight to
/// cleanup. This is not a failure.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}")]
pub struct Abort {
    reason: String,
    subject: Option<Value>,
}

impl Abort {
    /// `reason` should read as `noun.verb`, e.g. `"provider.ignored"`.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            subject: None,
        }
    }

    /// Abort on behalf of a message, keeping a copy for the log.
    pub fn for_message(reason: impl Into<String>, message: &Message) -> Self {
        Self::new(reason).with_subject(message.to_value())
    }

    /// Attach the message or result being aborted.
    #[must_use]
    pub fn with_subject(mut self, subject: Value) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn subject(&self) -> Option<&Value> {
        self.subject.as_ref()
    }
}

/// A processing failure, classified by `kind`.
///
/// The kind is what error-handling policy keys on: the retry extension
/// only retries failures whose kind is listed in `RETRY_EXCEPTIONS`.
#[derive(Debug)]
pub struct Failure {
    kind: String,
    source: anyhow::Error,
}

impl Failure {
    /// Kind given to failures converted from a bare error.
    pub const DEFAULT_KIND: &'static str = "error";
    /// Kind retried by a default-configured retry extension.
    pub const RETRYABLE: &'static str = "retryable";

    pub fn new(kind: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self {
            kind: kind.into(),
            source: source.into(),
        }
    }

    pub fn retryable(source: impl Into<anyhow::Error>) -> Self {
        Self::new(Self::RETRYABLE, source)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.source
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.source)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

impl From<anyhow::Error> for Failure {
    fn from(source: anyhow::Error) -> Self {
        Self::new(Self::DEFAULT_KIND, source)
    }
}

/// Why a hook did not return a value.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("aborted: {0}")]
    Abort(#[from] Abort),

    #[error(transparent)]
    Failed(#[from] Failure),
}

impl CallbackError {
    /// Shorthand for `CallbackError::Abort(Abort::new(reason))`.
    #[must_use]
    pub fn abort(reason: impl Into<String>) -> Self {
        Self::Abort(Abort::new(reason))
    }

    /// A failure of the default kind.
    #[must_use]
    pub fn other(source: impl Into<anyhow::Error>) -> Self {
        Self::Failed(Failure::new(Failure::DEFAULT_KIND, source))
    }

    /// A failure the retry extension will pick up with default settings.
    #[must_use]
    pub fn retryable(source: impl Into<anyhow::Error>) -> Self {
        Self::Failed(Failure::retryable(source))
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort(_))
    }
}

impl From<anyhow::Error> for CallbackError {
    fn from(source: anyhow::Error) -> Self {
        Self::Failed(source.into())
    }
}
