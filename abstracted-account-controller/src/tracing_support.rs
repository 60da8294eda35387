//! Tracing subscriber setup.
//!
//! The controller emits `tracing` events unconditionally; this module only
//! helps binaries install a subscriber. Disable the `subscriber` feature to
//! drop the `tracing-subscriber` dependency and bring your own.

#[cfg(feature = "subscriber")]
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Tracing output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Multi-line, human-readable output.
    Pretty,

    /// Single-line output.
    Compact,

    /// JSON lines, for log shippers.
    Json,
}

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level filter.
    ///
    /// If None, uses RUST_LOG environment variable or defaults to "info".
    pub level: Option<tracing::Level>,

    pub format: TracingFormat,

    /// Include timestamps in output.
    pub timestamps: bool,

    /// Include target module names in output.
    pub target: bool,

    pub thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: TracingFormat::Compact,
            timestamps: true,
            target: true,
            thread_ids: false,
        }
    }
}

/// Error installing the global subscriber
#[cfg(feature = "subscriber")]
pub type InitError = tracing_subscriber::util::TryInitError;

/// Install a compact subscriber filtered by `RUST_LOG` (default `info`).
///
/// # Example
///
/// ```ignore
/// abstracted_account_controller::tracing_support::init_subscriber()?;
/// ```
#[cfg(feature = "subscriber")]
pub fn init_subscriber() -> Result<(), InitError> {
    init_subscriber_with_config(TracingConfig::default())
}

/// Install a subscriber built from `config`.
///
/// Fails if a global subscriber is already set.
#[cfg(feature = "subscriber")]
pub fn init_subscriber_with_config(config: TracingConfig) -> Result<(), InitError> {
    tracing_subscriber::registry()
        .with(output_layer(&config))
        .with(filter(&config))
        .try_init()
}

#[cfg(feature = "subscriber")]
fn filter(config: &TracingConfig) -> EnvFilter {
    match config.level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

#[cfg(feature = "subscriber")]
fn output_layer(config: &TracingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let base = fmt::layer()
        .with_target(config.target)
        .with_thread_ids(config.thread_ids);

    match (config.format, config.timestamps) {
        (TracingFormat::Pretty, true) => base.pretty().boxed(),
        (TracingFormat::Pretty, false) => base.pretty().without_time().boxed(),
        (TracingFormat::Compact, true) => base.compact().boxed(),
        (TracingFormat::Compact, false) => base.compact().without_time().boxed(),
        (TracingFormat::Json, true) => base.json().boxed(),
        (TracingFormat::Json, false) => base.json().without_time().boxed(),
    }
}
