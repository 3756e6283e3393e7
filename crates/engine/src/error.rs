use {
    doozer_common::{CallbackError, FromMessage},
    thiserror::Error,
};

use crate::{consumer::ReadError, registry::HookKind};

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error(transparent)]
    Settings(#[from] doozer_config::Error),

    #[error("startup hook failed: {source}")]
    Startup {
        #[source]
        source: CallbackError,
    },

    #[error("consumer failed: {source}")]
    Consumer {
        #[source]
        source: ReadError,
    },

    #[error("{hook} callback failed: {source}")]
    Callback {
        hook: HookKind,
        #[source]
        source: CallbackError,
    },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn callback(hook: HookKind, source: CallbackError) -> Self {
        Self::Callback { hook, source }
    }

    /// True for errors raised before any task starts.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Settings(_))
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

doozer_common::impl_context!();
