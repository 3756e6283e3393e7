//! The application orchestrator.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use {
    doozer_common::{CallbackResult, Failure, Message, logging},
    doozer_config::{
        Settings,
        settings::{DEBUG, SLEEP_TIME},
    },
    futures::future::{BoxFuture, join_all, try_join_all},
    serde_json::Value,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info},
};

use crate::{
    consumer::Consumer,
    error::{Context, Error, Result},
    extension::Extension,
    registry::{
        CallbackRegistry, ErrorHandler, FnHook, HookKind, LifecycleHook, MessageAcknowledgement,
        MessagePreprocessor, Processor, ResultPostprocessor,
    },
};

/// Owns the settings, callbacks, consumer, processing function and
/// extensions of one engine instance.
///
/// Build it, register callbacks and extensions, then call [`run`] (or
/// [`run_async`] from inside a runtime). One application serves one run at
/// a time.
///
/// [`run`]: Application::run
/// [`run_async`]: Application::run_async
pub struct Application {
    name: String,
    settings: Settings,
    callbacks: CallbackRegistry,
    consumer: Option<Arc<dyn Consumer>>,
    processor: Option<Arc<dyn Processor>>,
    extensions: HashMap<String, Arc<dyn Extension>>,
    shutdown: CancellationToken,
}

impl Application {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_settings(name, Settings::new())
    }

    /// Start from `settings`; defaults fill in whatever is missing.
    pub fn with_settings(name: impl Into<String>, mut settings: Settings) -> Self {
        settings.apply_defaults();
        Self {
            name: name.into(),
            settings,
            callbacks: CallbackRegistry::new(),
            consumer: None,
            processor: None,
            extensions: HashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut CallbackRegistry {
        &mut self.callbacks
    }

    /// Cancelling this token stops intake; queued messages are still
    /// processed and teardown still runs.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // ── Consumer and processing function ────────────────────────────────

    pub fn set_consumer(&mut self, consumer: impl Consumer + 'static) -> &mut Self {
        self.consumer = Some(Arc::new(consumer));
        self
    }

    #[must_use]
    pub fn with_consumer(mut self, consumer: impl Consumer + 'static) -> Self {
        self.set_consumer(consumer);
        self
    }

    pub fn set_processor(&mut self, processor: impl Processor + 'static) -> &mut Self {
        self.processor = Some(Arc::new(processor));
        self
    }

    #[must_use]
    pub fn with_processor(mut self, processor: impl Processor + 'static) -> Self {
        self.set_processor(processor);
        self
    }

    /// Use a closure as the processing function.
    pub fn processor_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a Application, &'a Message) -> BoxFuture<'a, CallbackResult<Vec<Value>>>
            + Send
            + Sync
            + 'static,
    {
        self.set_processor(FnHook::new(f))
    }

    // ── Callback registration ───────────────────────────────────────────

    pub fn startup<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a Application) -> BoxFuture<'a, CallbackResult<()>> + Send + Sync + 'static,
    {
        self.register_startup(Arc::new(FnHook::new(f)))
    }

    pub fn teardown<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a Application) -> BoxFuture<'a, CallbackResult<()>> + Send + Sync + 'static,
    {
        self.register_teardown(Arc::new(FnHook::new(f)))
    }

    pub fn message_preprocessor<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a Application, Message) -> BoxFuture<'a, CallbackResult<Message>>
            + Send
            + Sync
            + 'static,
    {
        self.register_message_preprocessor(Arc::new(FnHook::new(f)))
    }

    pub fn result_postprocessor<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a Application, Value) -> BoxFuture<'a, CallbackResult<Value>>
            + Send
            + Sync
            + 'static,
    {
        self.register_result_postprocessor(Arc::new(FnHook::new(f)))
    }

    pub fn message_acknowledgement<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a Application, &'a Message) -> BoxFuture<'a, CallbackResult<()>>
            + Send
            + Sync
            + 'static,
    {
        self.register_message_acknowledgement(Arc::new(FnHook::new(f)))
    }

    pub fn error<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(
                &'a Application,
                &'a mut Message,
                &'a Failure,
            ) -> BoxFuture<'a, CallbackResult<()>>
            + Send
            + Sync
            + 'static,
    {
        self.register_error(Arc::new(FnHook::new(f)))
    }

    pub fn register_startup(&mut self, hook: Arc<dyn LifecycleHook>) -> &mut Self {
        self.callbacks.add_startup(hook);
        self
    }

    pub fn register_teardown(&mut self, hook: Arc<dyn LifecycleHook>) -> &mut Self {
        self.callbacks.add_teardown(hook);
        self
    }

    pub fn register_message_preprocessor(
        &mut self,
        hook: Arc<dyn MessagePreprocessor>,
    ) -> &mut Self {
        self.callbacks.add_preprocessor(hook);
        self
    }

    pub fn register_result_postprocessor(
        &mut self,
        hook: Arc<dyn ResultPostprocessor>,
    ) -> &mut Self {
        self.callbacks.add_postprocessor(hook);
        self
    }

    pub fn register_message_acknowledgement(
        &mut self,
        hook: Arc<dyn MessageAcknowledgement>,
    ) -> &mut Self {
        self.callbacks.add_acknowledgement(hook);
        self
    }

    pub fn register_error(&mut self, hook: Arc<dyn ErrorHandler>) -> &mut Self {
        self.callbacks.add_error_handler(hook);
        self
    }

    // ── Extensions ──────────────────────────────────────────────────────

    /// Apply an extension's defaults, check its required settings, let it
    /// register its callbacks and store it under its lowercased name.
    ///
    /// Registering a second extension with the same name replaces the
    /// first in the lookup map; callbacks it already registered stay.
    pub fn init_extension<E: Extension + 'static>(&mut self, extension: E) -> Result<()> {
        let name = extension.name().to_lowercase();
        for (key, value) in extension.default_settings().iter() {
            self.settings.set_default(key, value.clone());
        }
        for key in extension.required_settings() {
            self.settings.require(key)?;
        }
        extension.init_app(self)?;

        if self.extensions.insert(name.clone(), Arc::new(extension)).is_some() {
            debug!(extension = %name, "extension.replaced");
        }
        info!(extension = %name, "extension.registered");
        Ok(())
    }

    pub fn extension(&self, name: &str) -> Option<&Arc<dyn Extension>> {
        self.extensions.get(&name.to_lowercase())
    }

    pub fn extensions(&self) -> impl Iterator<Item = (&str, &Arc<dyn Extension>)> {
        self.extensions.iter().map(|(k, v)| (k.as_str(), v))
    }

    // ── Running ─────────────────────────────────────────────────────────

    /// Run on a fresh single-threaded runtime until the consumer ends or
    /// the application is shut down.
    ///
    /// Configuration problems and startup hook failures are returned.
    /// Anything that goes wrong once messages are flowing is logged, and
    /// the application drains its queue and runs its teardown hooks before
    /// this returns.
    pub fn run(&mut self, num_workers: usize, debug: bool) -> Result<()> {
        self.check(num_workers)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start the runtime")?;
        let result = runtime.block_on(self.run_async(num_workers, debug));
        // A blocking read (stdin) may still be parked on the blocking pool.
        runtime.shutdown_background();
        result
    }

    /// [`run`](Application::run) on the caller's runtime.
    pub async fn run_async(&mut self, num_workers: usize, debug: bool) -> Result<()> {
        let (consumer, processor, idle) = self.check(num_workers)?;

        self.start().await?;

        if debug {
            self.settings.insert(DEBUG, true);
        }
        if self.settings.bool(DEBUG)? {
            logging::elevate_to_debug();
        }

        let app: &Application = self;
        info!(application = %app.name, workers = num_workers, "application.started");
        app.serve(consumer, processor, num_workers, idle).await;
        app.stop().await;
        info!(application = %app.name, "application.stopped");
        Ok(())
    }

    /// Fail before any task starts if the application cannot run.
    fn check(
        &self,
        num_workers: usize,
    ) -> Result<(Arc<dyn Consumer>, Arc<dyn Processor>, Duration)> {
        let consumer = self
            .consumer
            .clone()
            .ok_or_else(|| Error::configuration("a consumer must be set before running"))?;
        let processor = self
            .processor
            .clone()
            .ok_or_else(|| Error::configuration("a processing function must be set before running"))?;
        if num_workers == 0 {
            return Err(Error::configuration("at least one worker is required"));
        }
        self.settings.bool(DEBUG)?;
        let idle = self
            .settings
            .duration_or(SLEEP_TIME, Duration::from_millis(100))?;
        Ok((consumer, processor, idle))
    }

    /// Run every startup hook concurrently; the first failure wins.
    async fn start(&self) -> Result<()> {
        let hooks = self.callbacks.startup_hooks();
        try_join_all(hooks.iter().map(|hook| hook.call(self)))
            .await
            .map_err(|source| Error::Startup { source })?;
        Ok(())
    }

    /// Run every teardown hook concurrently, logging failures.
    async fn stop(&self) {
        let hooks = self.callbacks.teardown_hooks();
        let results = join_all(
            hooks
                .iter()
                .map(|hook| async move { (hook.name(), hook.call(self).await) }),
        )
        .await;
        for (name, result) in results {
            if let Err(err) = result {
                error!(hook = %HookKind::Teardown, callback = name, error = %err, "callback.failed");
            }
        }
    }
}

impl fmt::Display for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("callbacks", &self.callbacks)
            .field("has_consumer", &self.consumer.is_some())
            .field("has_processor", &self.processor.is_some())
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .finish()
    }
}
