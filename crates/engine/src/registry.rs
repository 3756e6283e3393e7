//! Callback traits and the ordered, per-kind callback registry.
//!
//! Callbacks of one kind run in registration order. Each is an async trait
//! object; closures are adapted through [`FnHook`].

use std::{fmt, sync::Arc};

use {
    async_trait::async_trait,
    doozer_common::{CallbackResult, Failure, Message},
    futures::future::BoxFuture,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::debug,
};

use crate::app::Application;

/// The hook points a callback can be registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Error,
    MessageAcknowledgement,
    MessagePreprocessor,
    ResultPostprocessor,
    Startup,
    Teardown,
}

impl HookKind {
    pub const ALL: &'static [HookKind] = &[
        HookKind::Error,
        HookKind::MessageAcknowledgement,
        HookKind::MessagePreprocessor,
        HookKind::ResultPostprocessor,
        HookKind::Startup,
        HookKind::Teardown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::MessageAcknowledgement => "message_acknowledgement",
            Self::MessagePreprocessor => "message_preprocessor",
            Self::ResultPostprocessor => "result_postprocessor",
            Self::Startup => "startup",
            Self::Teardown => "teardown",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Callback traits ─────────────────────────────────────────────────────────

/// Runs once at startup or teardown.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn call(&self, app: &Application) -> CallbackResult<()>;
}

/// Transforms a message before the processing function sees it.
#[async_trait]
pub trait MessagePreprocessor: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn preprocess(&self, app: &Application, message: Message) -> CallbackResult<Message>;
}

/// Transforms one result of the processing function.
#[async_trait]
pub trait ResultPostprocessor: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn postprocess(&self, app: &Application, result: Value) -> CallbackResult<Value>;
}

/// Acknowledges a message once processing is over, whatever the outcome.
///
/// Always receives the message exactly as the consumer produced it.
#[async_trait]
pub trait MessageAcknowledgement: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn acknowledge(&self, app: &Application, message: &Message) -> CallbackResult<()>;
}

/// Reacts to a failure raised while handling a message.
///
/// Returning an [`Abort`](doozer_common::Abort) stops the remaining error
/// handlers for this message.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(
        &self,
        app: &Application,
        message: &mut Message,
        failure: &Failure,
    ) -> CallbackResult<()>;
}

/// The application's processing function.
///
/// Produces zero or more results, each of which is fed through the result
/// postprocessors independently.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, app: &Application, message: &Message) -> CallbackResult<Vec<Value>>;
}

// ── Closure adapter ─────────────────────────────────────────────────────────

/// Adapts a closure returning a boxed future to any of the callback traits.
///
/// The closure's type name doubles as the callback name unless one is given
/// with [`FnHook::named`].
pub struct FnHook<F> {
    name: &'static str,
    f: F,
}

impl<F> FnHook<F> {
    pub fn new(f: F) -> Self {
        Self {
            name: std::any::type_name::<F>(),
            f,
        }
    }

    #[must_use]
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

impl<F> fmt::Debug for FnHook<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHook").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> LifecycleHook for FnHook<F>
where
    F: for<'a> Fn(&'a Application) -> BoxFuture<'a, CallbackResult<()>> + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    async fn call(&self, app: &Application) -> CallbackResult<()> {
        (self.f)(app).await
    }
}

#[async_trait]
impl<F> MessagePreprocessor for FnHook<F>
where
    F: for<'a> Fn(&'a Application, Message) -> BoxFuture<'a, CallbackResult<Message>>
        + Send
        + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    async fn preprocess(&self, app: &Application, message: Message) -> CallbackResult<Message> {
        (self.f)(app, message).await
    }
}

#[async_trait]
impl<F> ResultPostprocessor for FnHook<F>
where
    F: for<'a> Fn(&'a Application, Value) -> BoxFuture<'a, CallbackResult<Value>> + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    async fn postprocess(&self, app: &Application, result: Value) -> CallbackResult<Value> {
        (self.f)(app, result).await
    }
}

#[async_trait]
impl<F> MessageAcknowledgement for FnHook<F>
where
    F: for<'a> Fn(&'a Application, &'a Message) -> BoxFuture<'a, CallbackResult<()>>
        + Send
        + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    async fn acknowledge(&self, app: &Application, message: &Message) -> CallbackResult<()> {
        (self.f)(app, message).await
    }
}

#[async_trait]
impl<F> ErrorHandler for FnHook<F>
where
    F: for<'a> Fn(&'a Application, &'a mut Message, &'a Failure) -> BoxFuture<'a, CallbackResult<()>>
        + Send
        + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(
        &self,
        app: &Application,
        message: &mut Message,
        failure: &Failure,
    ) -> CallbackResult<()> {
        (self.f)(app, message, failure).await
    }
}

#[async_trait]
impl<F> Processor for FnHook<F>
where
    F: for<'a> Fn(&'a Application, &'a Message) -> BoxFuture<'a, CallbackResult<Vec<Value>>>
        + Send
        + Sync,
{
    async fn process(&self, app: &Application, message: &Message) -> CallbackResult<Vec<Value>> {
        (self.f)(app, message).await
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Ordered callback lists, one per [`HookKind`].
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    startup: Vec<Arc<dyn LifecycleHook>>,
    teardown: Vec<Arc<dyn LifecycleHook>>,
    preprocessors: Vec<Arc<dyn MessagePreprocessor>>,
    postprocessors: Vec<Arc<dyn ResultPostprocessor>>,
    acknowledgements: Vec<Arc<dyn MessageAcknowledgement>>,
    error_handlers: Vec<Arc<dyn ErrorHandler>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_startup(&mut self, hook: Arc<dyn LifecycleHook>) {
        registered(HookKind::Startup, hook.name());
        self.startup.push(hook);
    }

    pub fn add_teardown(&mut self, hook: Arc<dyn LifecycleHook>) {
        registered(HookKind::Teardown, hook.name());
        self.teardown.push(hook);
    }

    pub fn add_preprocessor(&mut self, hook: Arc<dyn MessagePreprocessor>) {
        registered(HookKind::MessagePreprocessor, hook.name());
        self.preprocessors.push(hook);
    }

    pub fn add_postprocessor(&mut self, hook: Arc<dyn ResultPostprocessor>) {
        registered(HookKind::ResultPostprocessor, hook.name());
        self.postprocessors.push(hook);
    }

    pub fn add_acknowledgement(&mut self, hook: Arc<dyn MessageAcknowledgement>) {
        registered(HookKind::MessageAcknowledgement, hook.name());
        self.acknowledgements.push(hook);
    }

    pub fn add_error_handler(&mut self, hook: Arc<dyn ErrorHandler>) {
        registered(HookKind::Error, hook.name());
        self.error_handlers.push(hook);
    }

    /// Insert an error handler at `index`, clamped to the list length.
    ///
    /// Index 0 makes the handler run before everything registered so far.
    pub fn insert_error_handler(&mut self, index: usize, hook: Arc<dyn ErrorHandler>) {
        registered(HookKind::Error, hook.name());
        let index = index.min(self.error_handlers.len());
        self.error_handlers.insert(index, hook);
    }

    pub fn startup_hooks(&self) -> &[Arc<dyn LifecycleHook>] {
        &self.startup
    }

    pub fn teardown_hooks(&self) -> &[Arc<dyn LifecycleHook>] {
        &self.teardown
    }

    pub fn preprocessors(&self) -> &[Arc<dyn MessagePreprocessor>] {
        &self.preprocessors
    }

    pub fn postprocessors(&self) -> &[Arc<dyn ResultPostprocessor>] {
        &self.postprocessors
    }

    pub fn acknowledgements(&self) -> &[Arc<dyn MessageAcknowledgement>] {
        &self.acknowledgements
    }

    pub fn error_handlers(&self) -> &[Arc<dyn ErrorHandler>] {
        &self.error_handlers
    }

    /// Number of callbacks registered under `kind`.
    pub fn len(&self, kind: HookKind) -> usize {
        match kind {
            HookKind::Error => self.error_handlers.len(),
            HookKind::MessageAcknowledgement => self.acknowledgements.len(),
            HookKind::MessagePreprocessor => self.preprocessors.len(),
            HookKind::ResultPostprocessor => self.postprocessors.len(),
            HookKind::Startup => self.startup.len(),
            HookKind::Teardown => self.teardown.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        HookKind::ALL.iter().all(|kind| self.len(*kind) == 0)
    }

    /// Callback names under `kind`, in execution order.
    pub fn names(&self, kind: HookKind) -> Vec<&str> {
        match kind {
            HookKind::Error => self.error_handlers.iter().map(|h| h.name()).collect(),
            HookKind::MessageAcknowledgement => {
                self.acknowledgements.iter().map(|h| h.name()).collect()
            },
            HookKind::MessagePreprocessor => self.preprocessors.iter().map(|h| h.name()).collect(),
            HookKind::ResultPostprocessor => self.postprocessors.iter().map(|h| h.name()).collect(),
            HookKind::Startup => self.startup.iter().map(|h| h.name()).collect(),
            HookKind::Teardown => self.teardown.iter().map(|h| h.name()).collect(),
        }
    }

    /// Thread a message through every preprocessor in order.
    ///
    /// Stops at the first callback that aborts or fails.
    pub async fn preprocess(&self, app: &Application, message: Message) -> CallbackResult<Message> {
        let mut message = message;
        for hook in &self.preprocessors {
            message = hook.preprocess(app, message).await?;
        }
        Ok(message)
    }

    /// Thread one result through every postprocessor in order.
    pub async fn postprocess(&self, app: &Application, result: Value) -> CallbackResult<Value> {
        let mut result = result;
        for hook in &self.postprocessors {
            result = hook.postprocess(app, result).await?;
        }
        Ok(result)
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in HookKind::ALL {
            map.entry(&kind.as_str(), &self.names(*kind));
        }
        map.finish()
    }
}

fn registered(kind: HookKind, name: &str) {
    debug!(hook = %kind, callback = name, "callback.registered");
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, doozer_common::CallbackError, rstest::rstest, serde_json::json};

    struct Named(&'static str);

    #[async_trait]
    impl ErrorHandler for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn handle(&self, _: &Application, _: &mut Message, _: &Failure) -> CallbackResult<()> {
            Ok(())
        }
    }

    struct Suffix(&'static str);

    #[async_trait]
    impl MessagePreprocessor for Suffix {
        async fn preprocess(&self, _: &Application, mut message: Message) -> CallbackResult<Message> {
            let text = format!("{}{}", message.payload.as_str().unwrap_or_default(), self.0);
            message.payload = json!(text);
            Ok(message)
        }
    }

    #[rstest]
    #[case(HookKind::Error, "error")]
    #[case(HookKind::MessageAcknowledgement, "message_acknowledgement")]
    #[case(HookKind::ResultPostprocessor, "result_postprocessor")]
    #[case(HookKind::Teardown, "teardown")]
    fn hook_kind_display_matches_serde(#[case] kind: HookKind, #[case] expected: &str) {
        assert_eq!(kind.to_string(), expected);
        assert_eq!(serde_json::to_value(kind).unwrap(), json!(expected));
    }

    #[test]
    fn insert_error_handler_clamps_index() {
        let mut registry = CallbackRegistry::new();
        registry.add_error_handler(Arc::new(Named("user")));
        registry.insert_error_handler(0, Arc::new(Named("first")));
        registry.insert_error_handler(99, Arc::new(Named("last")));

        assert_eq!(registry.names(HookKind::Error), vec!["first", "user", "last"]);
        assert_eq!(registry.len(HookKind::Error), 3);
        assert!(!registry.is_empty());
    }

    fn lifecycle<F>(f: F) -> FnHook<F>
    where
        F: for<'a> Fn(&'a Application) -> BoxFuture<'a, CallbackResult<()>> + Send + Sync,
    {
        FnHook::new(f)
    }

    fn postprocessor<F>(f: F) -> Arc<dyn ResultPostprocessor>
    where
        F: for<'a> Fn(&'a Application, Value) -> BoxFuture<'a, CallbackResult<Value>>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(FnHook::new(f))
    }

    #[test]
    fn default_name_is_type_name() {
        let hook = Suffix("!");
        assert!(MessagePreprocessor::name(&hook).ends_with("Suffix"));

        let closure = lifecycle(|_app| Box::pin(async { Ok(()) }));
        assert!(LifecycleHook::name(&closure).contains("closure"));
        assert_eq!(LifecycleHook::name(&closure.named("noop")), "noop");
    }

    #[tokio::test]
    async fn preprocess_runs_in_registration_order() {
        let app = Application::new("registry-test");
        let mut registry = CallbackRegistry::new();
        registry.add_preprocessor(Arc::new(Suffix("a")));
        registry.add_preprocessor(Arc::new(Suffix("b")));

        let message = registry.preprocess(&app, Message::new("x")).await.unwrap();
        assert_eq!(message.payload, json!("xab"));
    }

    #[tokio::test]
    async fn postprocess_stops_at_first_abort() {
        let app = Application::new("registry-test");
        let mut registry = CallbackRegistry::new();
        registry.add_postprocessor(postprocessor(|_, _| {
            Box::pin(async { Err(CallbackError::abort("result.ignored")) })
        }));
        registry.add_postprocessor(postprocessor(|_, _| {
            Box::pin(async { Err(CallbackError::other(anyhow::anyhow!("must not run"))) })
        }));

        let err = registry.postprocess(&app, json!(1)).await.unwrap_err();
        assert!(err.is_abort());
    }
}
