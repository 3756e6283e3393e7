//! Retry failed messages with exponential backoff.
//!
//! [`Retry`] installs an error handler at the front of the error chain.
//! When a failure's kind is listed in `RETRY_EXCEPTIONS`, the handler
//! waits `RETRY_DELAY × RETRY_BACKOFF^count`, bumps the message's retry
//! count, hands the message to the [`RetryCallback`] and aborts the rest of
//! the error chain. Once `RETRY_THRESHOLD` retries have been made, or
//! `RETRY_TIMEOUT` has passed since the first one, the failure falls
//! through to the remaining error handlers.
//!
//! ```no_run
//! use doozer::{Application, ChannelConsumer};
//! use doozer_retry::Retry;
//!
//! # fn main() -> doozer::Result<()> {
//! let (consumer, resubmitter) = ChannelConsumer::new();
//! let mut app = Application::new("worker").with_consumer(consumer);
//! app.settings_mut().insert("RETRY_THRESHOLD", 5);
//! app.init_extension(Retry::new(resubmitter))?;
//! # Ok(())
//! # }
//! ```

mod policy;

use std::sync::Arc;

use {
    async_trait::async_trait,
    chrono::Utc,
    doozer::{
        Abort, Application, CallbackError, CallbackResult, ErrorHandler, Extension, Failure,
        Message, Resubmitter, RetryState, Settings,
    },
    futures::future::BoxFuture,
    serde_json::{Value, json},
    tracing::{debug, info},
};

pub use policy::{
    RETRY_BACKOFF, RETRY_DELAY, RETRY_EXCEPTIONS, RETRY_THRESHOLD, RETRY_TIMEOUT, RetryPolicy,
};

/// Puts a message back on its way after a retryable failure.
#[async_trait]
pub trait RetryCallback: Send + Sync {
    async fn retry(&self, app: &Application, message: &Message) -> CallbackResult<()>;
}

/// Resubmits to the channel the application is consuming from.
#[async_trait]
impl RetryCallback for Resubmitter {
    async fn retry(&self, _app: &Application, message: &Message) -> CallbackResult<()> {
        self.submit(message.clone())
            .map_err(|_| CallbackError::other(anyhow::anyhow!("consumer channel is closed")))
    }
}

struct FnRetry<F>(F);

#[async_trait]
impl<F> RetryCallback for FnRetry<F>
where
    F: for<'a> Fn(&'a Application, &'a Message) -> BoxFuture<'a, CallbackResult<()>>
        + Send
        + Sync,
{
    async fn retry(&self, app: &Application, message: &Message) -> CallbackResult<()> {
        (self.0)(app, message).await
    }
}

/// The retry extension.
pub struct Retry {
    callback: Arc<dyn RetryCallback>,
}

impl Retry {
    pub const NAME: &'static str = "retry";

    pub fn new(callback: impl RetryCallback + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Use a closure as the retry callback.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a Application, &'a Message) -> BoxFuture<'a, CallbackResult<()>>
            + Send
            + Sync
            + 'static,
    {
        Self::new(FnRetry(f))
    }
}

impl Extension for Retry {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn default_settings(&self) -> Settings {
        [
            (RETRY_BACKOFF, json!(1)),
            (RETRY_DELAY, json!(0)),
            (RETRY_EXCEPTIONS, json!([Failure::RETRYABLE])),
            (RETRY_THRESHOLD, Value::Null),
            (RETRY_TIMEOUT, Value::Null),
        ]
        .into_iter()
        .collect()
    }

    fn init_app(&self, app: &mut Application) -> doozer::Result<()> {
        let policy = RetryPolicy::from_settings(app.settings())?;
        debug!(?policy, "retry policy configured");
        app.callbacks_mut().insert_error_handler(
            0,
            Arc::new(RetryHandler {
                policy,
                callback: Arc::clone(&self.callback),
            }),
        );
        Ok(())
    }
}

/// The error handler [`Retry`] installs.
pub struct RetryHandler {
    policy: RetryPolicy,
    callback: Arc<dyn RetryCallback>,
}

#[async_trait]
impl ErrorHandler for RetryHandler {
    fn name(&self) -> &str {
        Retry::NAME
    }

    async fn handle(
        &self,
        app: &Application,
        message: &mut Message,
        failure: &Failure,
    ) -> CallbackResult<()> {
        if !self.policy.is_retryable(failure) {
            return Ok(());
        }

        let mut state = message
            .retry()
            .cloned()
            .unwrap_or_else(|| RetryState::first(Utc::now()));

        if self.policy.exceeded_threshold(state.count) {
            info!(message_id = %message.id, count = state.count, "retry.exhausted");
            return Ok(());
        }
        if self.policy.exceeded_timeout(state.start_time, Utc::now()) {
            info!(message_id = %message.id, count = state.count, "retry.expired");
            return Ok(());
        }

        let delay = self.policy.delay_for(state.count);
        if !delay.is_zero() {
            state.delay = Some(delay);
            tokio::time::sleep(delay).await;
        }

        state.count += 1;
        let count = state.count;
        message.set_retry(state);
        self.callback.retry(app, message).await?;

        info!(message_id = %message.id, count, delay = ?delay, "message.retried");
        Err(Abort::for_message("message.retried", message).into())
    }
}
