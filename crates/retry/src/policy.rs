use std::time::Duration;

use {
    chrono::{DateTime, TimeDelta, Utc},
    doozer::{Failure, Settings},
    doozer_config::{Error, Result},
};

/// Multiplier applied to the delay for every earlier retry.
pub const RETRY_BACKOFF: &str = "RETRY_BACKOFF";
/// Base delay, in seconds, before the first retry.
pub const RETRY_DELAY: &str = "RETRY_DELAY";
/// Failure kinds that are retried.
pub const RETRY_EXCEPTIONS: &str = "RETRY_EXCEPTIONS";
/// Maximum number of retries per message; `null` for no limit.
pub const RETRY_THRESHOLD: &str = "RETRY_THRESHOLD";
/// Seconds after the first retry past which a message is no longer
/// retried; `null` for no limit.
pub const RETRY_TIMEOUT: &str = "RETRY_TIMEOUT";

/// Validated retry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub backoff: f64,
    pub delay: Duration,
    pub kinds: Vec<String>,
    pub threshold: Option<u32>,
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: 1.0,
            delay: Duration::ZERO,
            kinds: vec![Failure::RETRYABLE.to_string()],
            threshold: None,
            timeout: None,
        }
    }
}

impl RetryPolicy {
    /// Read and validate the `RETRY_*` settings. Absent keys take the
    /// defaults; negative delays or backoffs are rejected.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let defaults = Self::default();

        let backoff = settings.f64_or(RETRY_BACKOFF, defaults.backoff)?;
        if !backoff.is_finite() || backoff < 0.0 {
            return Err(Error::invalid(RETRY_BACKOFF, "must be a non-negative number"));
        }

        if settings.f64_or(RETRY_DELAY, 0.0)? < 0.0 {
            return Err(Error::invalid(RETRY_DELAY, "must not be negative"));
        }
        let delay = settings.duration_or(RETRY_DELAY, defaults.delay)?;

        let kinds = settings
            .string_set(RETRY_EXCEPTIONS)?
            .unwrap_or(defaults.kinds);

        Ok(Self {
            backoff,
            delay,
            kinds,
            threshold: settings.optional_u32(RETRY_THRESHOLD)?,
            timeout: settings.optional_duration(RETRY_TIMEOUT)?,
        })
    }

    /// `delay × backoff^count`, saturating at [`Duration::MAX`].
    pub fn delay_for(&self, count: u32) -> Duration {
        let secs = self.delay.as_secs_f64() * self.backoff.powf(f64::from(count));
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    pub fn exceeded_threshold(&self, count: u32) -> bool {
        self.threshold.is_some_and(|threshold| count >= threshold)
    }

    pub fn exceeded_timeout(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let Some(timeout) = self.timeout else {
            return false;
        };
        TimeDelta::from_std(timeout)
            .ok()
            .and_then(|timeout| start.checked_add_signed(timeout))
            .is_some_and(|deadline| deadline <= now)
    }

    pub fn is_retryable(&self, failure: &Failure) -> bool {
        self.kinds.iter().any(|kind| failure.is_kind(kind))
    }
}
