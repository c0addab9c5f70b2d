//! Logging and tracing initialization.
//!
//! Subscribers are built as a [`tracing::Dispatch`] so callers can hand one
//! to a session coordinator explicitly instead of relying on the global
//! default.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::Dispatch;

use crate::config::LoggingConfig;
use crate::error::DucktrackResult;

/// Build a subscriber for the given configuration without installing it.
pub fn build_dispatch(config: &LoggingConfig) -> DucktrackResult<Dispatch> {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_names(true)
        .with_file(false)
        .with_line_number(false);

    let dispatch = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let builder = builder.with_writer(Mutex::new(file)).with_ansi(false);
            if config.json {
                Dispatch::new(builder.json().finish())
            } else {
                Dispatch::new(builder.finish())
            }
        }
        None if config.json => Dispatch::new(builder.json().finish()),
        None => Dispatch::new(builder.finish()),
    };

    Ok(dispatch)
}

/// Initialize the global tracing subscriber and return a handle to it.
pub fn init_logging(config: &LoggingConfig) -> DucktrackResult<Dispatch> {
    let dispatch = build_dispatch(config)?;
    tracing::dispatcher::set_global_default(dispatch.clone()).ok();
    Ok(dispatch)
}
