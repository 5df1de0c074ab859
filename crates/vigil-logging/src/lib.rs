//! # vigil-logging
//!
//! Installs the global `tracing` subscriber: an `EnvFilter` built from the
//! configured level and per-module overrides (`RUST_LOG` wins when set), and
//! a stderr formatter in either compact text or JSON lines.

#![deny(unsafe_code)]

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use vigil_settings::LoggingSettings;

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The configured filter directives do not parse.
    #[error("invalid log filter {directives:?}: {source}")]
    Filter {
        /// The rejected directives.
        directives: String,
        /// Parser error.
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    /// A global subscriber is already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

impl LoggingError {
    /// Short classification string for logs.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Filter { .. } => "filter",
            Self::AlreadyInitialized(_) => "already_initialized",
        }
    }
}

/// Build the filter directives for `settings`, e.g. `info,vigil_ws=debug`.
pub fn filter_directives(settings: &LoggingSettings) -> String {
    let mut directives = settings.level.to_lowercase();
    for (module, level) in &settings.module_levels {
        directives.push_str(&format!(",{}={}", module, level.to_lowercase()));
    }
    directives
}

/// Build the env filter. `RUST_LOG` takes precedence over `settings`.
pub fn build_filter(settings: &LoggingSettings) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = filter_directives(settings);
    EnvFilter::try_new(&directives).map_err(|source| LoggingError::Filter { directives, source })
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let filter = build_filter(settings)?;

    let fmt_layer = if settings.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter))
        .try_init()?;
    Ok(())
}
