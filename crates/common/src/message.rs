//! The record that flows from a consumer, through the workers, to the
//! acknowledgement callbacks.

use std::time::Duration;

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    uuid::Uuid,
};

/// A unit of work read from a consumer.
///
/// `metadata` and `payload` are free-form. Retry bookkeeping lives in a
/// dedicated side channel (serialized as `_retry`) so that it never mixes
/// with user metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "_retry", default, skip_serializing_if = "Option::is_none")]
    retry: Option<RetryState>,
}

impl Message {
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            metadata: Map::new(),
            payload: payload.into(),
            retry: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Retry bookkeeping, present once the message has been retried at
    /// least once.
    pub fn retry(&self) -> Option<&RetryState> {
        self.retry.as_ref()
    }

    /// Replace the retry bookkeeping.
    ///
    /// Only the retry extension's error handler calls this; the recorded
    /// count must never go down.
    pub fn set_retry(&mut self, state: RetryState) {
        debug_assert!(
            self.retry
                .as_ref()
                .is_none_or(|current| state.count >= current.count),
            "retry count must not decrease"
        );
        self.retry = Some(state);
    }

    /// Serialize for log fields and abort subjects.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Per-message retry state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryState {
    pub count: u32,
    pub start_time: DateTime<Utc>,
    /// Delay applied before the most recent retry, in seconds on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "secs")]
    pub delay: Option<Duration>,
}

impl RetryState {
    /// State for a message that has never been retried.
    pub fn first(start_time: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            start_time,
            delay: None,
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(d)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(D::Error::custom))
            .transpose()
    }
}
