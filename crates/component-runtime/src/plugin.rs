//! # Plugins
//!
//! A [`Plugin`] is a bundle of components delivered together. Loading a plugin runs
//! its [`initialize`](Plugin::initialize) hook, which registers components through a
//! [`PluginRegistrar`]; unloading runs [`dispose`](Plugin::dispose) and removes those
//! components again.
//!
//! ## Atomic loading
//!
//! The registrar **stages** registrations. Nothing reaches the registry until
//! `initialize` has returned `Ok`, and if committing one of the staged components
//! fails the ones already committed are removed again. A plugin that fails to load
//! therefore leaves no trace in the registry and never shows up in
//! [`PluginManager::list`].
//!
//! ## Lifecycle
//!
//! Plugins can optionally take part in the runtime lifecycle by overriding
//! [`start`](Plugin::start) and [`stop`](Plugin::stop). The manager starts them in
//! load order (fail-fast) and stops them in reverse order (best-effort).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::component::{ComponentHandle, Operation, Service};
use crate::context::Context;
use crate::error::{BoxError, ErrorKind};
use crate::registry::{validate_id, Registry, RegistryError};

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin id must not be empty")]
    InvalidId,

    #[error("plugin already loaded: {plugin_id}")]
    AlreadyLoaded { plugin_id: String },

    #[error("failed to load plugin {plugin_id}: {source}")]
    Load {
        plugin_id: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to unload plugin {plugin_id}: {source}")]
    Unload {
        plugin_id: String,
        #[source]
        source: BoxError,
    },

    #[error("plugin not loaded: {plugin_id}")]
    NotLoaded { plugin_id: String },

    #[error("plugin {plugin_id} failed to start: {source}")]
    Start {
        plugin_id: String,
        #[source]
        source: BoxError,
    },

    #[error("plugin {plugin_id} failed to stop: {source}")]
    Stop {
        plugin_id: String,
        #[source]
        source: BoxError,
    },
}

impl PluginError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PluginError::InvalidId | PluginError::AlreadyLoaded { .. } | PluginError::Load { .. } => {
                ErrorKind::PluginLoadFailed
            }
            PluginError::Unload { .. } | PluginError::NotLoaded { .. } => {
                ErrorKind::PluginUnloadFailed
            }
            PluginError::Start { .. } => ErrorKind::ServiceStartFailed,
            PluginError::Stop { .. } => ErrorKind::ServiceStopFailed,
        }
    }
}

/// A bundle that registers one or more components at load time.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn id(&self) -> &str;

    fn version(&self) -> &str;

    /// Register this plugin's components. Registrations are staged and only
    /// become visible once this returns `Ok`.
    async fn initialize(&self, ctx: &Context, registrar: &mut PluginRegistrar)
        -> Result<(), BoxError>;

    /// Release whatever `initialize` acquired. The manager removes the plugin's
    /// components from the registry itself.
    async fn dispose(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn start(&self, _ctx: &Context) -> Result<(), BoxError> {
        Ok(())
    }

    async fn stop(&self, _ctx: &Context) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Staging area handed to [`Plugin::initialize`].
pub struct PluginRegistrar {
    plugin_id: String,
    registry: Arc<dyn Registry>,
    staged: Vec<ComponentHandle>,
}

impl PluginRegistrar {
    pub(crate) fn new(plugin_id: impl Into<String>, registry: Arc<dyn Registry>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            registry,
            staged: Vec::new(),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Stage a component. Rejects empty IDs and IDs already present in the
    /// registry or already staged by this plugin.
    pub fn register(&mut self, component: ComponentHandle) -> Result<(), RegistryError> {
        validate_id(&component)?;
        let id = component.id();
        if self.registry.has(id) || self.staged.iter().any(|c| c.id() == id) {
            return Err(RegistryError::AlreadyExists { id: id.to_string() });
        }
        debug!(plugin_id = %self.plugin_id, component_id = %id, "Staged component");
        self.staged.push(component);
        Ok(())
    }

    pub fn register_operation<O: Operation + 'static>(
        &mut self,
        operation: O,
    ) -> Result<(), RegistryError> {
        self.register(ComponentHandle::operation(operation))
    }

    pub fn register_service<S: Service + 'static>(&mut self, service: S) -> Result<(), RegistryError> {
        self.register(ComponentHandle::service(service))
    }

    pub fn staged_ids(&self) -> Vec<String> {
        self.staged.iter().map(|c| c.id().to_string()).collect()
    }

    /// Read access to what is already registered, e.g. to look up a dependency.
    pub fn registry(&self) -> &dyn Registry {
        self.registry.as_ref()
    }

    /// Move every staged component into the registry, or none of them.
    fn commit(self) -> Result<Vec<ComponentHandle>, RegistryError> {
        let PluginRegistrar {
            plugin_id,
            registry,
            staged,
        } = self;
        let mut committed: Vec<ComponentHandle> = Vec::with_capacity(staged.len());
        for component in staged {
            if let Err(e) = registry.register(component.clone()) {
                for done in &committed {
                    if let Err(rollback) = registry.remove_instance(done) {
                        warn!(%plugin_id, component_id = %done.id(), error = %rollback, "Rollback could not remove component");
                    }
                }
                return Err(e);
            }
            committed.push(component);
        }
        Ok(committed)
    }
}

/// Loads, unloads and tracks plugins.
#[async_trait]
pub trait PluginManager: Send + Sync {
    async fn load(&self, ctx: &Context, plugin: Arc<dyn Plugin>) -> Result<(), PluginError>;

    async fn unload(&self, ctx: &Context, plugin_id: &str) -> Result<(), PluginError>;

    fn get(&self, plugin_id: &str) -> Option<Arc<dyn Plugin>>;

    /// IDs of loaded plugins, in load order.
    fn list(&self) -> Vec<String>;

    /// IDs of the components a loaded plugin registered.
    fn components_of(&self, plugin_id: &str) -> Option<Vec<String>>;

    async fn start(&self, ctx: &Context) -> Result<(), PluginError>;

    async fn stop(&self, ctx: &Context) -> Result<(), PluginError>;
}

struct LoadedPlugin {
    plugin: Arc<dyn Plugin>,
    components: Vec<ComponentHandle>,
}

#[derive(Default)]
struct PluginTable {
    loaded: HashMap<String, LoadedPlugin>,
    order: Vec<String>,
    loading: HashSet<String>,
}

/// Default [`PluginManager`], bound to the registry its plugins register into.
pub struct BasicPluginManager {
    registry: Arc<dyn Registry>,
    table: RwLock<PluginTable>,
}

impl BasicPluginManager {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            table: RwLock::new(PluginTable::default()),
        }
    }

    fn loaded_in_order(&self) -> Vec<Arc<dyn Plugin>> {
        let table = self.table.read();
        table
            .order
            .iter()
            .filter_map(|id| table.loaded.get(id).map(|p| p.plugin.clone()))
            .collect()
    }
}

#[async_trait]
impl PluginManager for BasicPluginManager {
    async fn load(&self, ctx: &Context, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let plugin_id = plugin.id().to_string();
        if plugin_id.is_empty() {
            return Err(PluginError::InvalidId);
        }
        {
            let mut table = self.table.write();
            if table.loaded.contains_key(&plugin_id) || !table.loading.insert(plugin_id.clone()) {
                return Err(PluginError::AlreadyLoaded { plugin_id });
            }
        }

        debug!(%plugin_id, version = plugin.version(), "Loading plugin");
        let mut registrar = PluginRegistrar::new(plugin_id.clone(), self.registry.clone());
        let outcome = match plugin.initialize(ctx, &mut registrar).await {
            Ok(()) => registrar.commit().map_err(|e| PluginError::Load {
                plugin_id: plugin_id.clone(),
                source: Box::new(e),
            }),
            Err(source) => Err(PluginError::Load {
                plugin_id: plugin_id.clone(),
                source,
            }),
        };

        let mut table = self.table.write();
        table.loading.remove(&plugin_id);
        match outcome {
            Ok(components) => {
                info!(%plugin_id, components = components.len(), "Plugin loaded");
                table.order.push(plugin_id.clone());
                table.loaded.insert(plugin_id, LoadedPlugin { plugin, components });
                Ok(())
            }
            Err(e) => {
                warn!(%plugin_id, error = %e, "Plugin load failed");
                Err(e)
            }
        }
    }

    async fn unload(&self, _ctx: &Context, plugin_id: &str) -> Result<(), PluginError> {
        let entry = {
            let mut table = self.table.write();
            let entry = table
                .loaded
                .remove(plugin_id)
                .ok_or_else(|| PluginError::NotLoaded {
                    plugin_id: plugin_id.to_string(),
                })?;
            table.order.retain(|id| id != plugin_id);
            entry
        };

        let disposed = entry.plugin.dispose().await;
        // Only entries this plugin still owns; a replacement under the same ID stays.
        for component in &entry.components {
            if self.registry.remove_instance(component).is_err() {
                debug!(%plugin_id, component_id = %component.id(), "Component no longer owned by plugin");
            }
        }

        match disposed {
            Ok(()) => {
                info!(%plugin_id, "Plugin unloaded");
                Ok(())
            }
            Err(source) => {
                warn!(%plugin_id, error = %source, "Plugin dispose failed; marked unloaded anyway");
                Err(PluginError::Unload {
                    plugin_id: plugin_id.to_string(),
                    source,
                })
            }
        }
    }

    fn get(&self, plugin_id: &str) -> Option<Arc<dyn Plugin>> {
        self.table
            .read()
            .loaded
            .get(plugin_id)
            .map(|p| p.plugin.clone())
    }

    fn list(&self) -> Vec<String> {
        self.table.read().order.clone()
    }

    fn components_of(&self, plugin_id: &str) -> Option<Vec<String>> {
        self.table
            .read()
            .loaded
            .get(plugin_id)
            .map(|p| p.components.iter().map(|c| c.id().to_string()).collect())
    }

    async fn start(&self, ctx: &Context) -> Result<(), PluginError> {
        for plugin in self.loaded_in_order() {
            plugin.start(ctx).await.map_err(|source| PluginError::Start {
                plugin_id: plugin.id().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    async fn stop(&self, ctx: &Context) -> Result<(), PluginError> {
        let mut first_failure = None;
        for plugin in self.loaded_in_order().into_iter().rev() {
            if let Err(source) = plugin.stop(ctx).await {
                warn!(plugin_id = plugin.id(), error = %source, "Plugin stop failed");
                first_failure.get_or_insert(PluginError::Stop {
                    plugin_id: plugin.id().to_string(),
                    source,
                });
            }
        }
        first_failure.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, ComponentInfo, ComponentType};
    use crate::registry::InMemoryRegistry;
    use parking_lot::Mutex;

    struct Part(ComponentInfo);

    impl Component for Part {
        fn info(&self) -> &ComponentInfo {
            &self.0
        }
    }

    fn part(id: &str) -> ComponentHandle {
        ComponentHandle::basic(Part(ComponentInfo::new(id, id, ComponentType::Basic)))
    }

    struct Bundle {
        id: &'static str,
        parts: Vec<&'static str>,
        fail_after_staging: bool,
        fail_dispose: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Bundle {
        fn new(id: &'static str, parts: Vec<&'static str>) -> Self {
            Self {
                id,
                parts,
                fail_after_staging: false,
                fail_dispose: false,
                log: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Plugin for Bundle {
        fn id(&self) -> &str {
            self.id
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        async fn initialize(
            &self,
            _ctx: &Context,
            registrar: &mut PluginRegistrar,
        ) -> Result<(), BoxError> {
            for p in &self.parts {
                registrar.register(part(p))?;
            }
            if self.fail_after_staging {
                return Err("initialize exploded".into());
            }
            Ok(())
        }

        async fn dispose(&self) -> Result<(), BoxError> {
            if self.fail_dispose {
                return Err("dispose exploded".into());
            }
            Ok(())
        }

        async fn start(&self, _ctx: &Context) -> Result<(), BoxError> {
            self.log.lock().push(format!("start:{}", self.id));
            Ok(())
        }

        async fn stop(&self, _ctx: &Context) -> Result<(), BoxError> {
            self.log.lock().push(format!("stop:{}", self.id));
            Ok(())
        }
    }

    fn setup() -> (Arc<InMemoryRegistry>, BasicPluginManager) {
        let registry = Arc::new(InMemoryRegistry::new());
        let manager = BasicPluginManager::new(registry.clone());
        (registry, manager)
    }

    #[tokio::test]
    async fn load_registers_components_and_lists_plugin() {
        let (registry, manager) = setup();
        let ctx = Context::background();
        manager
            .load(&ctx, Arc::new(Bundle::new("web", vec!["http", "router"])))
            .await
            .unwrap();

        assert_eq!(manager.list(), vec!["web"]);
        assert!(registry.has("http") && registry.has("router"));
        assert_eq!(
            manager.components_of("web"),
            Some(vec!["http".to_string(), "router".to_string()])
        );
        assert_eq!(manager.get("web").unwrap().version(), "1.0.0");
    }

    #[tokio::test]
    async fn failing_initialize_leaves_nothing_behind() {
        let (registry, manager) = setup();
        let mut bundle = Bundle::new("broken", vec!["a", "b"]);
        bundle.fail_after_staging = true;

        let err = manager
            .load(&Context::background(), Arc::new(bundle))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PluginLoadFailed);
        assert!(matches!(&err, PluginError::Load { source, .. } if source.to_string() == "initialize exploded"));
        assert_eq!(registry.count(), 0);
        assert!(manager.list().is_empty());
        assert!(manager.get("broken").is_none());
    }

    #[tokio::test]
    async fn conflicting_component_fails_whole_plugin() {
        let (registry, manager) = setup();
        registry.register(part("shared")).unwrap();

        let err = manager
            .load(
                &Context::background(),
                Arc::new(Bundle::new("greedy", vec!["mine", "shared"])),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PluginLoadFailed);
        assert!(!registry.has("mine"));
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn double_load_is_rejected() {
        let (_, manager) = setup();
        let ctx = Context::background();
        manager.load(&ctx, Arc::new(Bundle::new("p", vec![]))).await.unwrap();
        let err = manager
            .load(&ctx, Arc::new(Bundle::new("p", vec![])))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::AlreadyLoaded { .. }));
    }

    #[tokio::test]
    async fn unload_removes_components_even_when_dispose_fails() {
        let (registry, manager) = setup();
        let ctx = Context::background();
        let mut bundle = Bundle::new("db", vec!["pool"]);
        bundle.fail_dispose = true;
        manager.load(&ctx, Arc::new(bundle)).await.unwrap();

        let err = manager.unload(&ctx, "db").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PluginUnloadFailed);
        assert!(manager.list().is_empty());
        assert!(!registry.has("pool"));

        let err = manager.unload(&ctx, "db").await.unwrap_err();
        assert!(matches!(err, PluginError::NotLoaded { .. }));
    }

    #[tokio::test]
    async fn unload_keeps_a_component_registered_by_someone_else() {
        let (registry, manager) = setup();
        let ctx = Context::background();
        manager
            .load(&ctx, Arc::new(Bundle::new("p", vec!["x"])))
            .await
            .unwrap();

        registry.remove("x").unwrap();
        let replacement = part("x");
        registry.register(replacement.clone()).unwrap();

        manager.unload(&ctx, "p").await.unwrap();
        let current = registry.get("x").unwrap();
        assert!(current.same_instance(&replacement));
    }

    #[tokio::test]
    async fn lifecycle_runs_in_load_order_and_reverse() {
        let (_, manager) = setup();
        let ctx = Context::background();
        let log = Arc::new(Mutex::new(Vec::new()));
        for id in ["first", "second"] {
            let mut bundle = Bundle::new(id, vec![]);
            bundle.log = log.clone();
            manager.load(&ctx, Arc::new(bundle)).await.unwrap();
        }

        manager.start(&ctx).await.unwrap();
        manager.stop(&ctx).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["start:first", "start:second", "stop:second", "stop:first"]
        );
    }
}
