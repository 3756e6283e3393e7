//! The settings mapping shared by an application and its extensions.

use std::{collections::BTreeMap, time::Duration};

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::debug,
};

use crate::error::{Error, Result};

/// Elevates logging verbosity when true.
pub const DEBUG: &str = "DEBUG";
/// Idle interval, in seconds, after which an idle worker reports itself.
pub const SLEEP_TIME: &str = "SLEEP_TIME";

const DEFAULT_SLEEP_TIME: f64 = 0.1;

/// Uppercase-keyed application settings.
///
/// Values are plain JSON so that settings files, environment variables and
/// code can all feed the same mapping. Extensions read their own keys
/// through the typed accessors, which report type mismatches as
/// [`Error::InvalidSetting`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(BTreeMap<String, Value>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings holding only the application defaults.
    pub fn with_defaults() -> Self {
        let mut settings = Self::new();
        settings.apply_defaults();
        settings
    }

    /// Fill in `DEBUG` and `SLEEP_TIME` where absent.
    pub fn apply_defaults(&mut self) {
        self.set_default(DEBUG, false);
        self.set_default(SLEEP_TIME, DEFAULT_SLEEP_TIME);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Insert `value` unless `key` is already set; returns the stored value.
    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &Value {
        self.0.entry(key.into()).or_insert_with(|| value.into())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy every uppercase key of `mapping` over the current values.
    ///
    /// Other keys are ignored so that a settings file can carry unrelated
    /// sections.
    pub fn merge_mapping<K, V>(&mut self, mapping: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in mapping {
            let key = key.into();
            if is_setting_key(&key) {
                self.0.insert(key, value.into());
            } else {
                debug!(key = %key, "ignoring non-uppercase setting");
            }
        }
    }

    /// Merge a JSON object; anything else is rejected.
    pub fn merge_value(&mut self, value: &Value) -> Result<()> {
        let Value::Object(map) = value else {
            return Err(Error::message("settings must be a mapping"));
        };
        self.merge_mapping(map.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    /// Override settings from `PREFIX_KEY=value` process environment
    /// variables.
    pub fn merge_env(&mut self, prefix: &str) {
        self.merge_env_from(prefix, std::env::vars());
    }

    /// Override settings from `PREFIX_KEY=value` pairs.
    ///
    /// Values that parse as a JSON scalar (`true`, `2`, `0.5`, `null`) keep
    /// that type; anything else is stored as a string.
    pub fn merge_env_from(&mut self, prefix: &str, vars: impl IntoIterator<Item = (String, String)>) {
        let prefix = format!("{prefix}_");
        for (name, raw) in vars {
            let Some(key) = name.strip_prefix(&prefix) else {
                continue;
            };
            if !is_setting_key(key) {
                continue;
            }
            let value = match serde_json::from_str::<Value>(&raw) {
                Ok(v) if !v.is_object() && !v.is_array() => v,
                _ => Value::String(raw),
            };
            debug!(key = %key, "setting overridden from environment");
            self.0.insert(key.to_string(), value);
        }
    }

    /// The value for `key`, or [`Error::MissingSetting`].
    pub fn require(&self, key: &str) -> Result<&Value> {
        self.get(key).ok_or_else(|| Error::missing(key))
    }

    /// A boolean; absent keys read as `false`.
    pub fn bool(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(Error::invalid(key, format!("expected a boolean, got {other}"))),
        }
    }

    /// A number; `default` when absent.
    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| Error::invalid(key, format!("expected a number, got {value}"))),
        }
    }

    /// A non-negative number of seconds; `default` when absent.
    pub fn duration_or(&self, key: &str, default: Duration) -> Result<Duration> {
        Ok(self.optional_duration(key)?.unwrap_or(default))
    }

    /// A non-negative number of seconds, or `None` when absent or null.
    pub fn optional_duration(&self, key: &str) -> Result<Option<Duration>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => {
                let secs = value.as_f64().ok_or_else(|| {
                    Error::invalid(key, format!("expected a number of seconds, got {value}"))
                })?;
                Duration::try_from_secs_f64(secs)
                    .map(Some)
                    .map_err(|_| Error::invalid(key, format!("{secs} is not a valid duration")))
            },
        }
    }

    /// A non-negative integer, or `None` when absent or null.
    pub fn optional_u32(&self, key: &str) -> Result<Option<u32>> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| {
                    Error::invalid(key, format!("expected a non-negative integer, got {value}"))
                }),
        }
    }

    /// A string or list of strings, or `None` when absent.
    pub fn string_set(&self, key: &str) -> Result<Option<Vec<String>>> {
        let invalid = |value: &Value| {
            Error::invalid(key, format!("expected a string or list of strings, got {value}"))
        };
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
            Some(value @ Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_owned).ok_or_else(|| invalid(value)))
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(other) => Err(invalid(other)),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut settings = Self::new();
        settings.merge_mapping(iter);
        settings
    }
}

fn is_setting_key(key: &str) -> bool {
    !key.is_empty()
        && key.chars().any(|c| c.is_ascii_uppercase())
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
