//! # Observability
//!
//! Every layer of the runtime logs through `tracing` with structured fields, so
//! output can be filtered per component:
//!
//! | Field | Emitted by |
//! |---|---|
//! | `component_id` | registry |
//! | `topic`, `subscription` | event bus |
//! | `plugin_id` | plugin manager |
//! | `system_id`, `from`, `to` | runtime phase transitions |
//! | `operation_id`, `service_id` | runtime execution and service control |
//!
//! [`setup_tracing`] installs a compact `fmt` subscriber filtered by `RUST_LOG`:
//!
//! ```bash
//! # Lifecycle only
//! RUST_LOG=info cargo run -p runtime-sample
//!
//! # Registrations, subscriptions and phase transitions too
//! RUST_LOG=debug cargo run -p runtime-sample
//!
//! # Just the bus
//! RUST_LOG=component_runtime::event=debug cargo run -p runtime-sample
//! ```
//!
//! With `RUST_LOG=debug` a daemon run looks like:
//!
//! ```text
//! DEBUG Phase transition system_id="sample" from=uninitialized to=initializing
//! DEBUG Registered component_id="greet" kind=operation size=1
//!  INFO Plugin loaded plugin_id="sample" components=2
//!  INFO Runtime running; waiting for shutdown signal system_id="sample"
//! ```

use tracing_subscriber::EnvFilter;

use crate::error::BoxError;

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Panics if one is already installed.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_target(false)
        .compact()
        .init();
}

/// Like [`setup_tracing`], but returns an error instead of panicking when a
/// global subscriber is already set.
pub fn try_setup_tracing() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_target(false)
        .compact()
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_an_error_not_a_panic() {
        let _ = try_setup_tracing();
        assert!(try_setup_tracing().is_err());
    }
}
