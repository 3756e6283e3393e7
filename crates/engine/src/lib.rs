//! A message-processing engine.
//!
//! An [`Application`] pulls messages from a [`Consumer`] one at a time,
//! hands them to a pool of workers through a bounded queue, runs each one
//! through the preprocessor chain, the processing function and the result
//! postprocessor chain, and always acknowledges the original message.
//!
//! ```no_run
//! use doozer::{Application, IterConsumer, Message};
//!
//! # fn main() -> doozer::Result<()> {
//! let mut app = Application::new("echo")
//!     .with_consumer(IterConsumer::new([Message::new("hello")]));
//! app.processor_fn(|_app, message| {
//!     let payload = message.payload.clone();
//!     Box::pin(async move { Ok(vec![payload]) })
//! });
//! app.run(1, false)
//! # }
//! ```

pub mod app;
pub mod consumer;
pub mod error;
pub mod extension;
pub mod queue;
pub mod registry;
mod worker;

pub use {
    app::Application,
    consumer::{ChannelConsumer, Consumer, IterConsumer, LinesConsumer, ReadError, Resubmitter},
    doozer_common::{Abort, CallbackError, CallbackResult, Failure, Message, RetryState},
    doozer_config::Settings,
    error::{Error, Result},
    extension::Extension,
    registry::{
        CallbackRegistry, ErrorHandler, FnHook, HookKind, LifecycleHook, MessageAcknowledgement,
        MessagePreprocessor, Processor, ResultPostprocessor,
    },
};
