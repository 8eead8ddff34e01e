//! Logger collaborator.
//!
//! The runtime reports lifecycle transitions and per-service failures through a
//! [`Logger`] handed to it at construction, so embedders can route those messages
//! wherever they like. Lower layers (registry, bus, plugin manager) emit `tracing`
//! events directly.

use std::fmt::Write as _;

use tracing::Level;

/// Structured key/value pairs attached to a log line.
pub type Fields<'a> = &'a [(&'a str, &'a str)];

pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: &str, fields: Fields<'_>);

    fn debug(&self, message: &str, fields: Fields<'_>) {
        self.log(Level::DEBUG, message, fields);
    }

    fn info(&self, message: &str, fields: Fields<'_>) {
        self.log(Level::INFO, message, fields);
    }

    fn warn(&self, message: &str, fields: Fields<'_>) {
        self.log(Level::WARN, message, fields);
    }

    fn error(&self, message: &str, fields: Fields<'_>) {
        self.log(Level::ERROR, message, fields);
    }
}

/// Discards everything. Builder default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: Level, _message: &str, _fields: Fields<'_>) {}
}

/// Forwards to the `tracing` macros under the `component_runtime::runtime` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str, fields: Fields<'_>) {
        let fields = render(fields);
        match level {
            Level::ERROR => tracing::error!(target: "component_runtime::runtime", %fields, "{message}"),
            Level::WARN => tracing::warn!(target: "component_runtime::runtime", %fields, "{message}"),
            Level::INFO => tracing::info!(target: "component_runtime::runtime", %fields, "{message}"),
            Level::DEBUG => tracing::debug!(target: "component_runtime::runtime", %fields, "{message}"),
            Level::TRACE => tracing::trace!(target: "component_runtime::runtime", %fields, "{message}"),
        }
    }
}

fn render(fields: Fields<'_>) -> String {
    let mut out = String::new();
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{key}={value}");
    }
    out
}
