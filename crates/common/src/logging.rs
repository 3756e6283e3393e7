//! Process-wide tracing setup.
//!
//! The filter is installed behind a reload handle so that a running
//! application can raise verbosity when it starts in debug mode.

use std::sync::OnceLock;

use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

static FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// How the process logger should look.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Default directive when `RUST_LOG` is not set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Install the global subscriber.
///
/// Safe to call more than once; only the first call takes effect.
pub fn init(options: &LogOptions) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&options.level));
    let (filter, handle) = reload::Layer::new(filter);
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout belongs to the application's output.
    let installed = if options.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    if installed.is_ok() {
        let _ = FILTER.set(handle);
    }
}

/// Lower the active filter to `debug` unless it is already more verbose.
///
/// Returns `false` when the logger was not installed through [`init`].
pub fn elevate_to_debug() -> bool {
    let Some(handle) = FILTER.get() else {
        return false;
    };
    let already_verbose = handle
        .with_current(|filter| {
            filter
                .max_level_hint()
                .is_some_and(|level| level >= tracing::level_filters::LevelFilter::DEBUG)
        })
        .unwrap_or(false);
    if already_verbose {
        return true;
    }
    handle.reload(EnvFilter::new("debug")).is_ok()
}
