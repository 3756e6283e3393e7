use std::path::PathBuf;

use {doozer_common::FromMessage, thiserror::Error};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error("unsupported settings format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("missing required setting: {key}")]
    MissingSetting { key: String },

    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn missing(key: impl Into<String>) -> Self {
        Self::MissingSetting { key: key.into() }
    }

    #[must_use]
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

doozer_common::impl_context!();
