//! # Component Runtime
//!
//! An in-process, component-oriented application runtime. Independent units
//! ("components") register themselves in a [`Registry`], are exposed as named
//! [`Operation`]s and [`Service`]s, talk over an [`EventBus`], and are started and
//! stopped together by a [`Runtime`].
//!
//! ## Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────── Runtime ────────────────────────┐
//!  RuntimeBuilder │  Registry ◀── PluginManager ◀── Plugin::initialize      │
//!  ─────────────▶ │     │                                                   │
//!                 │     ├─ Operation ◀── execute_operation / execute_command│
//!                 │     └─ Service   ◀── start / stop / start_service       │
//!                 │  EventBus  ◀── lifecycle + result events                │
//!                 │  Config · Logger · Store                                │
//!                 └─────────────────────────────────────────────────────────┘
//! ```
//!
//! - **Registry**: name-keyed directory of [`ComponentHandle`]s. Duplicate and
//!   empty IDs are rejected.
//! - **EventBus**: exact-topic publish/subscribe with sync and async delivery and
//!   a deterministic [`wait_async`](EventBus::wait_async) drain point.
//! - **PluginManager**: loads bundles of components atomically. A plugin that fails
//!   to initialize leaves nothing behind.
//! - **Runtime**: the lifecycle state machine
//!   (`Uninitialized → Initialized → Running → Stopped`), fail-fast on start,
//!   best-effort on stop.
//! - **RuntimeBuilder**: fluent front-end that fills in defaults for anything not
//!   supplied and runs in daemon or command mode.
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use component_runtime::{
//!     BoxError, Component, ComponentHandle, ComponentInfo, ComponentType, Context, Envelope,
//!     Operation, OperationResult, Plugin, PluginRegistrar, RuntimeBuilder,
//! };
//! use serde_json::json;
//!
//! struct Upper {
//!     info: ComponentInfo,
//! }
//!
//! impl Component for Upper {
//!     fn info(&self) -> &ComponentInfo {
//!         &self.info
//!     }
//! }
//!
//! #[async_trait]
//! impl Operation for Upper {
//!     async fn execute(&self, _ctx: &Context, input: Envelope) -> Result<OperationResult, BoxError> {
//!         let text = input.data.as_str().ok_or("expected a string")?;
//!         Ok(json!(text.to_uppercase()).into())
//!     }
//! }
//!
//! struct TextPlugin;
//!
//! #[async_trait]
//! impl Plugin for TextPlugin {
//!     fn id(&self) -> &str { "text" }
//!     fn version(&self) -> &str { "1.0.0" }
//!
//!     async fn initialize(&self, _ctx: &Context, registrar: &mut PluginRegistrar) -> Result<(), BoxError> {
//!         registrar.register(ComponentHandle::operation(Upper {
//!             info: ComponentInfo::new("upper", "Upper", ComponentType::Operation),
//!         }))?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let out = RuntimeBuilder::new()
//!         .with_plugin(TextPlugin)
//!         .build_command("upper", Envelope::new(json!("hello")))
//!         .await
//!         .unwrap();
//!     assert_eq!(out.data, json!("HELLO"));
//! }
//! ```
//!
//! ## Concurrency Model
//!
//! - Every shared structure (registry map, subscriber table, plugin table, runtime
//!   phase) sits behind its own `parking_lot` lock; no lock is ever held while
//!   another is taken or while user code runs.
//! - Handlers, operations and services may call back into the runtime.
//! - Cancellation is cooperative through [`Context`]; the runtime passes it on but
//!   never polls it between lifecycle steps.
//!
//! ## Testing
//!
//! The [`mock`] module provides scripted operations, counting services, configurable
//! plugins and an event recorder. See its docs for usage.

pub mod builder;
pub mod component;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod logger;
pub mod mock;
pub mod plugin;
pub mod registry;
pub mod runtime;
pub mod store;
pub mod telemetry;

// Re-export core types for convenience
pub use builder::RuntimeBuilder;
pub use component::{
    Component, ComponentHandle, ComponentInfo, ComponentType, Envelope, Metadata, Operation,
    OperationResult, Service, ServiceState, ServiceStatus,
};
pub use config::{Config, InMemoryConfig, RuntimeSettings};
pub use context::Context;
pub use error::{BoxError, ErrorKind, RuntimeError, RuntimeResult};
pub use event::{topics, Event, EventBus, HandlerResult, Payload, Subscription};
pub use logger::{Logger, NoopLogger, TracingLogger};
pub use plugin::{BasicPluginManager, Plugin, PluginError, PluginManager, PluginRegistrar};
pub use registry::{InMemoryRegistry, Registry, RegistryError};
pub use runtime::{Phase, Runtime, RuntimeParts};
pub use store::{InMemoryStore, Store};
pub use telemetry::{setup_tracing, try_setup_tracing};
