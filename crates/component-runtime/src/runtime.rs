//! # Runtime
//!
//! The orchestrator that owns a [`Registry`], an [`EventBus`], a [`PluginManager`]
//! and the external collaborators ([`Config`], [`Logger`], [`Store`]), and drives
//! them through one lifecycle:
//!
//! ```text
//! Uninitialized ──initialize──▶ Initialized ──start──▶ Running ──stop──▶ Stopped
//!                                                         ▲                 │
//!                                                         └──────start──────┘
//! ```
//!
//! Transitional phases (`Initializing`, `Starting`, `Stopping`) reject concurrent
//! lifecycle calls. A `start` that fails part way leaves the runtime `Failed`; the
//! services that did start keep running until [`Runtime::stop`] is called.
//!
//! ## Lock discipline
//!
//! The phase lives behind a single `parking_lot::RwLock` that is only ever held
//! for a read or a swap. It is released before any operation, service, plugin or
//! store code runs and before any event is published, so handlers may call back
//! into the runtime.
//!
//! ## Events
//!
//! | Topic | When | Payload |
//! |---|---|---|
//! | `system.initialized` | `initialize` succeeded | `system_id` |
//! | `system.started` | `start` succeeded | `system_id`, `services` |
//! | `system.service.failed` | a service failed during `start` | `service_id`, `error` |
//! | `system.stopped` | `stop` finished | `system_id` |
//! | `operation.executed` / `operation.failed` | after each execution | `operation_id` (+ `error`) |
//! | `service.started` / `service.stopped` / `service.failed` | `start_service` / `stop_service` | `service_id` (+ `error`) |

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use tracing::debug;

use crate::component::{
    Component, ComponentHandle, ComponentInfo, ComponentType, Envelope, Service,
};
use crate::config::{Config, RuntimeSettings};
use crate::context::Context;
use crate::error::{BoxError, RuntimeError, RuntimeResult};
use crate::event::{panic_message, topics, Event, EventBus};
use crate::logger::{Logger, NoopLogger};
use crate::plugin::{Plugin, PluginManager};
use crate::registry::Registry;
use crate::store::Store;

/// Lifecycle phase of a [`Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Uninitialized,
    Initializing,
    Initialized,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl Phase {
    pub fn is_initialized(self) -> bool {
        !matches!(self, Phase::Uninitialized | Phase::Initializing)
    }

    pub fn is_running(self) -> bool {
        self == Phase::Running
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Initializing => "initializing",
            Phase::Initialized => "initialized",
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::Stopping => "stopping",
            Phase::Stopped => "stopped",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Everything [`Runtime::from_parts`] needs. Every field except `logger` and
/// `system_id` is required.
#[derive(Default)]
pub struct RuntimeParts {
    pub registry: Option<Arc<dyn Registry>>,
    pub plugin_manager: Option<Arc<dyn PluginManager>>,
    pub event_bus: Option<EventBus>,
    pub config: Option<Arc<dyn Config>>,
    pub store: Option<Arc<dyn Store>>,
    pub logger: Option<Arc<dyn Logger>>,
    /// Overrides `runtime.system_id` from the config.
    pub system_id: Option<String>,
}

/// The component runtime. See the [module docs](self).
pub struct Runtime {
    info: ComponentInfo,
    settings: RuntimeSettings,
    phase: RwLock<Phase>,
    registry: Arc<dyn Registry>,
    plugins: Arc<dyn PluginManager>,
    events: EventBus,
    config: Arc<dyn Config>,
    store: Arc<dyn Store>,
    logger: Arc<dyn Logger>,
}

impl Runtime {
    /// Strict constructor: fails with `MissingDependency` instead of filling in
    /// defaults. [`RuntimeBuilder`](crate::RuntimeBuilder) is the forgiving front-end.
    pub fn from_parts(parts: RuntimeParts) -> RuntimeResult<Self> {
        let registry = parts.registry.ok_or(RuntimeError::MissingDependency("registry"))?;
        let plugins = parts
            .plugin_manager
            .ok_or(RuntimeError::MissingDependency("plugin manager"))?;
        let events = parts
            .event_bus
            .ok_or(RuntimeError::MissingDependency("event bus"))?;
        let config = parts.config.ok_or(RuntimeError::MissingDependency("config"))?;
        let store = parts.store.ok_or(RuntimeError::MissingDependency("store"))?;
        let logger = parts.logger.unwrap_or_else(|| Arc::new(NoopLogger));

        let mut settings = RuntimeSettings::from_config(config.as_ref());
        if let Some(id) = parts.system_id.filter(|id| !id.is_empty()) {
            settings.system_id = id;
        }

        Ok(Self {
            info: ComponentInfo::new(
                settings.system_id.clone(),
                settings.system_id.clone(),
                ComponentType::System,
            ),
            settings,
            phase: RwLock::new(Phase::Uninitialized),
            registry,
            plugins,
            events,
            config,
            store,
            logger,
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Initialize the registry, then the store.
    ///
    /// Only valid from `Uninitialized`. On failure the phase goes back to
    /// `Uninitialized` and the cause is wrapped in `SystemNotInitialized`.
    pub async fn initialize(&self, ctx: &Context) -> RuntimeResult<()> {
        self.enter("initialize", &[Phase::Uninitialized], Phase::Initializing)?;

        let outcome = self.initialize_collaborators(ctx).await;
        match outcome {
            Ok(()) => {
                self.set_phase(Phase::Initialized);
                self.logger
                    .info("System initialized", &[("system_id", self.id())]);
                self.emit(Event::new(topics::SYSTEM_INITIALIZED, self.id()).with("system_id", self.id()));
                Ok(())
            }
            Err(e) => {
                self.set_phase(Phase::Uninitialized);
                self.logger.error(
                    "System initialization failed",
                    &[("system_id", self.id()), ("error", e.to_string().as_str())],
                );
                Err(e)
            }
        }
    }

    async fn initialize_collaborators(&self, ctx: &Context) -> RuntimeResult<()> {
        self.registry
            .initialize()
            .await
            .map_err(|e| RuntimeError::not_initialized("registry initialization failed", Box::new(e)))?;
        self.store
            .initialize(ctx)
            .await
            .map_err(|e| RuntimeError::not_initialized("store initialization failed", e))?;
        Ok(())
    }

    /// Start plugin lifecycles, the store, then every registered service in
    /// registration order.
    ///
    /// Fail-fast: the first failure aborts the call, is published on
    /// `system.service.failed` when a service caused it, and leaves the phase
    /// `Failed`. Services already started are **not** stopped.
    pub async fn start(&self, ctx: &Context) -> RuntimeResult<()> {
        {
            let mut phase = self.phase.write();
            match *phase {
                Phase::Uninitialized => {
                    return Err(RuntimeError::SystemNotInitialized {
                        reason: "start called before initialize".to_string(),
                        source: None,
                    })
                }
                Phase::Initialized | Phase::Stopped => *phase = Phase::Starting,
                other => {
                    return Err(RuntimeError::InvalidState {
                        action: "start",
                        phase: other,
                    })
                }
            }
        }

        match self.start_all(ctx).await {
            Ok(started) => {
                self.set_phase(Phase::Running);
                self.logger.info(
                    "System started",
                    &[("system_id", self.id()), ("services", started.to_string().as_str())],
                );
                self.emit(
                    Event::new(topics::SYSTEM_STARTED, self.id())
                        .with("system_id", self.id())
                        .with("services", started),
                );
                Ok(())
            }
            Err(e) => {
                self.set_phase(Phase::Failed);
                self.logger.error(
                    "System start failed",
                    &[("system_id", self.id()), ("error", e.to_string().as_str())],
                );
                Err(e)
            }
        }
    }

    async fn start_all(&self, ctx: &Context) -> RuntimeResult<usize> {
        // =====================================================================
        // Step 1: Plugins, then the store
        // =====================================================================
        self.plugins.start(ctx).await?;
        self.store
            .start(ctx)
            .await
            .map_err(|source| RuntimeError::ServiceStartFailed {
                id: "store".to_string(),
                source,
            })?;

        // =====================================================================
        // Step 2: Services, in registration order
        // =====================================================================
        let services = self.lifecycle_services();
        for service in &services {
            let id = service.id().to_string();
            debug!(service_id = %id, "Starting service");
            if let Err(source) = service.start(ctx).await {
                let error = source.to_string();
                self.logger
                    .error("Service failed to start", &[("service_id", id.as_str()), ("error", error.as_str())]);
                self.emit(
                    Event::new(topics::SYSTEM_SERVICE_FAILED, self.id())
                        .with("service_id", id.clone())
                        .with("error", error),
                );
                return Err(RuntimeError::ServiceStartFailed { id, source });
            }
        }
        Ok(services.len())
    }

    /// Stop every registered service in reverse registration order, then the
    /// store, then plugin lifecycles, and drain async event handlers.
    ///
    /// Best-effort: individual failures are logged and skipped. Valid from
    /// `Running` and from `Failed` (to clean up after a partial start).
    pub async fn stop(&self, ctx: &Context) -> RuntimeResult<()> {
        {
            let mut phase = self.phase.write();
            match *phase {
                Phase::Running | Phase::Failed => *phase = Phase::Stopping,
                _ => return Err(RuntimeError::SystemNotStarted),
            }
        }

        // =====================================================================
        // Step 1: Services, newest first
        // =====================================================================
        for service in self.lifecycle_services().into_iter().rev() {
            if let Err(e) = service.stop(ctx).await {
                self.logger.warn(
                    "Service failed to stop",
                    &[("service_id", service.id()), ("error", e.to_string().as_str())],
                );
            }
        }

        // =====================================================================
        // Step 2: Store and plugins
        // =====================================================================
        if let Err(e) = self.store.stop(ctx).await {
            self.logger
                .warn("Store failed to stop", &[("error", e.to_string().as_str())]);
        }
        if let Err(e) = self.plugins.stop(ctx).await {
            self.logger
                .warn("Plugin failed to stop", &[("error", e.to_string().as_str())]);
        }

        self.set_phase(Phase::Stopped);
        self.emit(Event::new(topics::SYSTEM_STOPPED, self.id()).with("system_id", self.id()));

        // =====================================================================
        // Step 3: Drain async handlers
        // =====================================================================
        let timeout = self.settings.shutdown_timeout();
        if tokio::time::timeout(timeout, self.events.wait_async())
            .await
            .is_err()
        {
            let in_flight = self.events.in_flight().to_string();
            let timeout_ms = self.settings.shutdown_timeout_ms.to_string();
            self.logger.warn(
                "Timed out draining async event handlers",
                &[
                    ("system_id", self.id()),
                    ("in_flight", in_flight.as_str()),
                    ("timeout_ms", timeout_ms.as_str()),
                ],
            );
        }

        self.logger.info("System stopped", &[("system_id", self.id())]);
        Ok(())
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run the operation registered under `id`. Requires `Running`.
    pub async fn execute_operation(
        &self,
        ctx: &Context,
        id: &str,
        input: Envelope,
    ) -> RuntimeResult<Envelope> {
        if !self.is_running() {
            return Err(RuntimeError::SystemNotStarted);
        }
        self.execute(ctx, id, input).await
    }

    /// Run an operation in command mode: the runtime only needs to be
    /// initialized, services are not started.
    pub async fn execute_command(
        &self,
        ctx: &Context,
        id: &str,
        input: Envelope,
    ) -> RuntimeResult<Envelope> {
        self.require_initialized("execute_command")?;
        self.execute(ctx, id, input).await
    }

    async fn execute(&self, ctx: &Context, id: &str, input: Envelope) -> RuntimeResult<Envelope> {
        let operation = self
            .registry
            .get(id)
            .ok()
            .and_then(|handle| handle.as_operation().cloned())
            .ok_or_else(|| RuntimeError::OperationNotFound { id: id.to_string() })?;

        debug!(operation_id = %id, "Executing operation");
        let result = match AssertUnwindSafe(operation.execute(ctx, input))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(format!("operation panicked: {}", panic_message(panic.as_ref())).into()),
        };

        match result {
            Ok(output) => {
                self.emit(Event::new(topics::OPERATION_EXECUTED, self.id()).with("operation_id", id));
                Ok(output.into_envelope())
            }
            Err(source) => {
                let error = source.to_string();
                self.logger
                    .warn("Operation failed", &[("operation_id", id), ("error", error.as_str())]);
                self.emit(
                    Event::new(topics::OPERATION_FAILED, self.id())
                        .with("operation_id", id)
                        .with("error", error),
                );
                Err(RuntimeError::OperationFailed {
                    id: id.to_string(),
                    source,
                })
            }
        }
    }

    /// Start a single service. Requires an initialized runtime.
    pub async fn start_service(&self, ctx: &Context, id: &str) -> RuntimeResult<()> {
        self.require_initialized("start_service")?;
        let service = self.service(id)?;
        match service.start(ctx).await {
            Ok(()) => {
                self.logger.info("Service started", &[("service_id", id)]);
                self.emit(Event::new(topics::SERVICE_STARTED, self.id()).with("service_id", id));
                Ok(())
            }
            Err(source) => {
                self.emit_service_failure(id, &source);
                Err(RuntimeError::ServiceStartFailed {
                    id: id.to_string(),
                    source,
                })
            }
        }
    }

    /// Stop a single service. Requires an initialized runtime.
    pub async fn stop_service(&self, ctx: &Context, id: &str) -> RuntimeResult<()> {
        self.require_initialized("stop_service")?;
        let service = self.service(id)?;
        match service.stop(ctx).await {
            Ok(()) => {
                self.logger.info("Service stopped", &[("service_id", id)]);
                self.emit(Event::new(topics::SERVICE_STOPPED, self.id()).with("service_id", id));
                Ok(())
            }
            Err(source) => {
                self.emit_service_failure(id, &source);
                Err(RuntimeError::ServiceStopFailed {
                    id: id.to_string(),
                    source,
                })
            }
        }
    }

    // =========================================================================
    // Components and plugins
    // =========================================================================

    pub fn register(&self, component: ComponentHandle) -> RuntimeResult<()> {
        Ok(self.registry.register(component)?)
    }

    pub async fn load_plugin(&self, ctx: &Context, plugin: Arc<dyn Plugin>) -> RuntimeResult<()> {
        Ok(self.plugins.load(ctx, plugin).await?)
    }

    /// Load plugins in order, stopping at the first failure. Plugins loaded
    /// before the failure stay loaded.
    pub async fn load_plugins(
        &self,
        ctx: &Context,
        plugins: impl IntoIterator<Item = Arc<dyn Plugin>>,
    ) -> RuntimeResult<()> {
        for plugin in plugins {
            self.load_plugin(ctx, plugin).await?;
        }
        Ok(())
    }

    pub async fn unload_plugin(&self, ctx: &Context, plugin_id: &str) -> RuntimeResult<()> {
        Ok(self.plugins.unload(ctx, plugin_id).await?)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn phase(&self) -> Phase {
        *self.phase.read()
    }

    pub fn is_initialized(&self) -> bool {
        self.phase().is_initialized()
    }

    pub fn is_running(&self) -> bool {
        self.phase().is_running()
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn plugin_manager(&self) -> &Arc<dyn PluginManager> {
        &self.plugins
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &Arc<dyn Config> {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn enter(&self, action: &'static str, from: &[Phase], to: Phase) -> RuntimeResult<()> {
        let mut phase = self.phase.write();
        if !from.contains(&*phase) {
            return Err(RuntimeError::InvalidState {
                action,
                phase: *phase,
            });
        }
        debug!(system_id = %self.id(), from = %*phase, to = %to, "Phase transition");
        *phase = to;
        Ok(())
    }

    fn set_phase(&self, to: Phase) {
        let mut phase = self.phase.write();
        debug!(system_id = %self.id(), from = %*phase, to = %to, "Phase transition");
        *phase = to;
    }

    fn require_initialized(&self, action: &str) -> RuntimeResult<()> {
        if self.is_initialized() {
            return Ok(());
        }
        Err(RuntimeError::SystemNotInitialized {
            reason: format!("{action} called before initialize"),
            source: None,
        })
    }

    fn service(&self, id: &str) -> RuntimeResult<Arc<dyn Service>> {
        self.registry
            .get(id)
            .ok()
            .and_then(|handle| handle.as_service().cloned())
            .ok_or_else(|| RuntimeError::ServiceNotFound { id: id.to_string() })
    }

    /// Services the runtime drives during `start`/`stop`, in registration order.
    /// Excludes the runtime's own ID and `System`-typed entries.
    fn lifecycle_services(&self) -> Vec<Arc<dyn Service>> {
        self.registry
            .list()
            .into_iter()
            .filter_map(|handle| match handle {
                ComponentHandle::Service(service)
                    if service.id() != self.id()
                        && service.component_type() != ComponentType::System =>
                {
                    Some(service)
                }
                _ => None,
            })
            .collect()
    }

    fn emit_service_failure(&self, id: &str, source: &BoxError) {
        let error = source.to_string();
        self.logger
            .warn("Service lifecycle call failed", &[("service_id", id), ("error", error.as_str())]);
        self.emit(
            Event::new(topics::SERVICE_FAILED, self.id())
                .with("service_id", id)
                .with("error", error),
        );
    }

    fn emit(&self, event: Event) {
        self.events.publish(event);
    }
}

impl Component for Runtime {
    fn info(&self) -> &ComponentInfo {
        &self.info
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.id())
            .field("phase", &self.phase())
            .field("components", &self.registry.count())
            .field("plugins", &self.plugins.list())
            .finish()
    }
}
