//! Shared types used across the doozer crates: the [`Message`] record that
//! flows through the pipeline, the signals hooks return, and logging setup.

pub mod error;
pub mod logging;
pub mod message;
pub mod signal;

pub use {
    error::FromMessage,
    message::{Message, RetryState},
    signal::{Abort, CallbackError, CallbackResult, Failure},
};
