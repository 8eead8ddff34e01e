use std::time::Duration;

use async_trait::async_trait;
use component_runtime::{BoxError, ComponentHandle, Context, EventBus, Plugin, PluginRegistrar};
use tracing::info;

use crate::greeter::{Echo, Greeter};
use crate::heartbeat::Heartbeat;

/// Registers `greet`, `echo` and the `heartbeat` service.
///
/// The heartbeat publishes on the bus handed in here, which should be the one the
/// runtime is built with.
pub struct SamplePlugin {
    bus: EventBus,
    heartbeat_interval: Duration,
}

impl SamplePlugin {
    pub const ID: &'static str = "sample";

    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            heartbeat_interval: Duration::from_secs(1),
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

#[async_trait]
impl Plugin for SamplePlugin {
    fn id(&self) -> &str {
        Self::ID
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn initialize(&self, _ctx: &Context, registrar: &mut PluginRegistrar) -> Result<(), BoxError> {
        registrar.register_operation(Greeter::new())?;
        registrar.register_operation(Echo::new())?;
        registrar.register(ComponentHandle::service(Heartbeat::new(
            self.bus.clone(),
            self.heartbeat_interval,
        )))?;
        info!(plugin_id = Self::ID, staged = ?registrar.staged_ids(), "Sample plugin initialized");
        Ok(())
    }
}
