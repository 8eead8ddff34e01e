//! Fluent assembly of a [`Runtime`].
//!
//! Anything not supplied is default-filled right before construction:
//!
//! | Dependency | Default |
//! |---|---|
//! | registry | [`InMemoryRegistry`] |
//! | plugin manager | [`BasicPluginManager`] bound to the resolved registry |
//! | event bus | a fresh [`EventBus`] |
//! | config | [`InMemoryConfig`] |
//! | store | [`InMemoryStore`] |
//! | logger | [`NoopLogger`] |
//!
//! An explicitly supplied dependency is never replaced. The filled-in set goes
//! through the strict [`Runtime::from_parts`].

use std::future::Future;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::component::Envelope;
use crate::config::{Config, InMemoryConfig};
use crate::context::Context;
use crate::error::RuntimeResult;
use crate::event::EventBus;
use crate::logger::{Logger, NoopLogger};
use crate::plugin::{BasicPluginManager, Plugin, PluginManager};
use crate::registry::{InMemoryRegistry, Registry};
use crate::runtime::{Runtime, RuntimeParts};
use crate::store::{InMemoryStore, Store};

#[derive(Default)]
pub struct RuntimeBuilder {
    plugins: Vec<Arc<dyn Plugin>>,
    registry: Option<Arc<dyn Registry>>,
    plugin_manager: Option<Arc<dyn PluginManager>>,
    event_bus: Option<EventBus>,
    config: Option<Arc<dyn Config>>,
    store: Option<Arc<dyn Store>>,
    logger: Option<Arc<dyn Logger>>,
    system_id: Option<String>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append plugins; they are loaded in the order given.
    pub fn with_plugins(mut self, plugins: impl IntoIterator<Item = Arc<dyn Plugin>>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    pub fn with_plugin<P: Plugin + 'static>(mut self, plugin: P) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    pub fn with_config(mut self, config: Arc<dyn Config>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Note: a supplied plugin manager registers into whatever registry it was
    /// created with, which should be the one handed to [`with_registry`](Self::with_registry).
    pub fn with_plugin_manager(mut self, plugin_manager: Arc<dyn PluginManager>) -> Self {
        self.plugin_manager = Some(plugin_manager);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }

    /// Construct the runtime without initializing it. Plugins handed to the
    /// builder are returned alongside, still unloaded.
    pub fn assemble(self) -> RuntimeResult<(Runtime, Vec<Arc<dyn Plugin>>)> {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(InMemoryRegistry::new()));
        let plugin_manager = self
            .plugin_manager
            .unwrap_or_else(|| Arc::new(BasicPluginManager::new(registry.clone())));

        let runtime = Runtime::from_parts(RuntimeParts {
            registry: Some(registry),
            plugin_manager: Some(plugin_manager),
            event_bus: Some(self.event_bus.unwrap_or_default()),
            config: Some(
                self.config
                    .unwrap_or_else(|| Arc::new(InMemoryConfig::new())),
            ),
            store: Some(self.store.unwrap_or_else(|| Arc::new(InMemoryStore::new()))),
            logger: Some(self.logger.unwrap_or_else(|| Arc::new(NoopLogger))),
            system_id: self.system_id,
        })?;
        Ok((runtime, self.plugins))
    }

    /// Construct, initialize and load every plugin. The returned runtime is
    /// `Initialized`; call [`Runtime::start`] to bring services up.
    ///
    /// If a plugin fails to load, the ones loaded before it are unloaded again,
    /// newest first, before the error is returned.
    pub async fn build(self, ctx: &Context) -> RuntimeResult<Runtime> {
        let (runtime, plugins) = self.assemble()?;
        runtime.initialize(ctx).await?;
        if let Err(e) = runtime.load_plugins(ctx, plugins).await {
            unload_all(&runtime, ctx, "Plugin unload failed after load error").await;
            return Err(e);
        }
        Ok(runtime)
    }

    /// Run as a daemon until Ctrl-C, then stop.
    pub async fn build_daemon(self) -> RuntimeResult<()> {
        self.build_daemon_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C; shutting down");
            }
        })
        .await
    }

    /// Run as a daemon until `shutdown` resolves, then stop.
    ///
    /// If `start` fails, the services that did start are stopped before the
    /// error is returned.
    pub async fn build_daemon_until<F>(self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let run = Context::background();
        let runtime = self.build(&run).await?;

        if let Err(e) = runtime.start(&run).await {
            if let Err(stop_err) = runtime.stop(&Context::background()).await {
                warn!(error = %stop_err, "Cleanup after failed start did not complete");
            }
            return Err(e);
        }

        info!(system_id = %runtime.settings().system_id, "Runtime running; waiting for shutdown signal");
        shutdown.await;
        info!(system_id = %runtime.settings().system_id, "Shutdown requested");

        run.cancel();
        runtime.stop(&Context::background()).await
    }

    /// Run a single operation in command mode and return its output.
    ///
    /// The runtime is initialized and plugins are loaded, but services are
    /// **not** started. Plugins are unloaded again afterwards.
    pub async fn build_command(self, operation_id: &str, input: Envelope) -> RuntimeResult<Envelope> {
        let ctx = Context::background();
        let runtime = self.build(&ctx).await?;

        let result = runtime.execute_command(&ctx, operation_id, input).await;
        unload_all(&runtime, &ctx, "Plugin unload failed after command").await;
        result
    }
}

/// Unload every loaded plugin, newest first. Failures are logged and skipped.
async fn unload_all(runtime: &Runtime, ctx: &Context, message: &str) {
    for plugin_id in runtime.plugin_manager().list().into_iter().rev() {
        if let Err(e) = runtime.unload_plugin(ctx, &plugin_id).await {
            warn!(%plugin_id, error = %e, "{message}");
        }
    }
}
