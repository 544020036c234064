//! Structured logging setup, following the same `tracing` +
//! `tracing-subscriber` wiring used throughout this codebase: an
//! `EnvFilter` that defaults to the configured level but still honors
//! `RUST_LOG` if set, feeding a plain ANSI `fmt` layer.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

/// Installs the global `tracing` subscriber. `LogLevel::None` skips
/// installation entirely, leaving every `tracing` call a no-op.
pub fn init(level: LogLevel) {
    let directive = match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
        LogLevel::None => return,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
