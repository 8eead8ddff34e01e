//! # Runtime Sample
//!
//! A small application built on [`component_runtime`], showing the pieces a real
//! deployment wires together.
//!
//! - **[greeter]**: [`Operation`](component_runtime::Operation)s. `greet` parses a typed
//!   request out of the input envelope; `echo` hands its input back.
//! - **[heartbeat]**: a [`Service`](component_runtime::Service) that runs a background
//!   ticker between `start` and `stop` and announces every tick on the event bus.
//! - **[plugin]**: the [`SamplePlugin`](plugin::SamplePlugin) bundling all of the above.
//!
//! The binary in `main.rs` runs the plugin either as a daemon (no arguments) or as
//! a one-shot command:
//!
//! ```bash
//! RUST_LOG=info cargo run -p runtime-sample
//! cargo run -p runtime-sample -- greet '{"name": "Ada"}'
//! ```

pub mod error;
pub mod greeter;
pub mod heartbeat;
pub mod plugin;

pub use error::SampleError;
pub use plugin::SamplePlugin;
