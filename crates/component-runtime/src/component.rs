//! # Components
//!
//! A component is the unit the [`Registry`](crate::Registry) stores: something with a
//! unique ID, a name, a type and free-form metadata. Two capabilities sit on top of
//! the base [`Component`] trait:
//!
//! - [`Operation`]: executes once per call, turning an input [`Envelope`] into an output.
//! - [`Service`]: has a start/stop lifecycle and a [`ServiceStatus`].
//!
//! ## Tagged entries instead of downcasting
//!
//! Registry entries are [`ComponentHandle`] values. The variant *is* the capability:
//! a handle built with [`ComponentHandle::operation`] can be executed, one built with
//! [`ComponentHandle::service`] can be started and stopped, and everything else is a
//! plain component. Lookups return the handle and callers ask it for the capability
//! they need ([`as_operation`](ComponentHandle::as_operation),
//! [`as_service`](ComponentHandle::as_service)), getting `None` for the wrong kind.
//!
//! ## Implementing a component
//!
//! Embed a [`ComponentInfo`] and return it from [`Component::info`]; everything else
//! (`id`, `name`, `component_type`, `metadata`) is provided.
//!
//! ```rust
//! use component_runtime::{BoxError, Component, ComponentInfo, ComponentType, Context,
//!     Envelope, Operation, OperationResult};
//! use async_trait::async_trait;
//!
//! struct Echo {
//!     info: ComponentInfo,
//! }
//!
//! impl Component for Echo {
//!     fn info(&self) -> &ComponentInfo {
//!         &self.info
//!     }
//! }
//!
//! #[async_trait]
//! impl Operation for Echo {
//!     async fn execute(&self, _ctx: &Context, input: Envelope) -> Result<OperationResult, BoxError> {
//!         Ok(input.into())
//!     }
//! }
//!
//! let echo = Echo { info: ComponentInfo::new("echo", "Echo", ComponentType::Operation) };
//! assert_eq!(echo.id(), "echo");
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::error::BoxError;

/// String-keyed component metadata.
pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentType {
    Basic,
    Operation,
    Service,
    System,
    Application,
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentType::Basic => "basic",
            ComponentType::Operation => "operation",
            ComponentType::Service => "service",
            ComponentType::System => "system",
            ComponentType::Application => "application",
        };
        f.write_str(s)
    }
}

/// Identity shared by every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub id: String,
    pub name: String,
    pub component_type: ComponentType,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ComponentInfo {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        component_type: ComponentType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            component_type,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Base contract: an identifiable, typed unit.
pub trait Component: Send + Sync {
    fn info(&self) -> &ComponentInfo;

    fn id(&self) -> &str {
        &self.info().id
    }

    fn name(&self) -> &str {
        &self.info().name
    }

    fn component_type(&self) -> ComponentType {
        self.info().component_type
    }

    fn metadata(&self) -> &Metadata {
        &self.info().metadata
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Data-plus-metadata envelope used for operation input and output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub data: Value,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Envelope {
    pub fn new(data: impl Into<Value>) -> Self {
        Self {
            data: data.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl From<Value> for Envelope {
    fn from(data: Value) -> Self {
        Envelope::new(data)
    }
}

/// What an [`Operation`] hands back: either a complete envelope or a bare value
/// that the runtime wraps into one.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    Envelope(Envelope),
    Raw(Value),
}

impl OperationResult {
    /// Normalize to an [`Envelope`], wrapping raw values with empty metadata.
    pub fn into_envelope(self) -> Envelope {
        match self {
            OperationResult::Envelope(envelope) => envelope,
            OperationResult::Raw(value) => Envelope::new(value),
        }
    }
}

impl From<Envelope> for OperationResult {
    fn from(envelope: Envelope) -> Self {
        OperationResult::Envelope(envelope)
    }
}

impl From<Value> for OperationResult {
    fn from(value: Value) -> Self {
        OperationResult::Raw(value)
    }
}

/// A component that produces an output from an input, once per call.
#[async_trait]
pub trait Operation: Component {
    async fn execute(&self, ctx: &Context, input: Envelope) -> Result<OperationResult, BoxError>;
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ServiceStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopping => "stopping",
            ServiceStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A component with a start/stop lifecycle.
#[async_trait]
pub trait Service: Component {
    async fn start(&self, ctx: &Context) -> Result<(), BoxError>;

    async fn stop(&self, ctx: &Context) -> Result<(), BoxError>;

    fn status(&self) -> ServiceStatus;

    fn is_running(&self) -> bool {
        self.status() == ServiceStatus::Running
    }
}

/// Status cell that drives the [`ServiceStatus`] transitions for a service
/// implementation.
///
/// ```rust,ignore
/// async fn start(&self, ctx: &Context) -> Result<(), BoxError> {
///     self.state.start_with(async { self.open_socket().await }).await
/// }
/// ```
#[derive(Debug, Default)]
pub struct ServiceState {
    status: Mutex<ServiceStatus>,
}

impl ServiceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ServiceStatus {
        *self.status.lock()
    }

    pub fn set(&self, status: ServiceStatus) {
        *self.status.lock() = status;
    }

    /// `Starting` while `work` runs, then `Running` or `Failed`.
    ///
    /// Starting an already running service is a no-op.
    pub async fn start_with<F>(&self, work: F) -> Result<(), BoxError>
    where
        F: Future<Output = Result<(), BoxError>> + Send,
    {
        {
            let mut status = self.status.lock();
            if *status == ServiceStatus::Running {
                return Ok(());
            }
            *status = ServiceStatus::Starting;
        }
        let result = work.await;
        self.set(if result.is_ok() {
            ServiceStatus::Running
        } else {
            ServiceStatus::Failed
        });
        result
    }

    /// `Stopping` while `work` runs, then `Stopped` or `Failed`.
    ///
    /// Stopping a service that is already stopped is a no-op.
    pub async fn stop_with<F>(&self, work: F) -> Result<(), BoxError>
    where
        F: Future<Output = Result<(), BoxError>> + Send,
    {
        {
            let mut status = self.status.lock();
            if *status == ServiceStatus::Stopped {
                return Ok(());
            }
            *status = ServiceStatus::Stopping;
        }
        let result = work.await;
        self.set(if result.is_ok() {
            ServiceStatus::Stopped
        } else {
            ServiceStatus::Failed
        });
        result
    }
}

// ---------------------------------------------------------------------------
// ComponentHandle
// ---------------------------------------------------------------------------

/// A registry entry: a component tagged with the capability it offers.
#[derive(Clone)]
pub enum ComponentHandle {
    Basic(Arc<dyn Component>),
    Operation(Arc<dyn Operation>),
    Service(Arc<dyn Service>),
}

impl ComponentHandle {
    pub fn basic<C: Component + 'static>(component: C) -> Self {
        ComponentHandle::Basic(Arc::new(component))
    }

    pub fn operation<O: Operation + 'static>(operation: O) -> Self {
        ComponentHandle::Operation(Arc::new(operation))
    }

    pub fn service<S: Service + 'static>(service: S) -> Self {
        ComponentHandle::Service(Arc::new(service))
    }

    pub fn info(&self) -> &ComponentInfo {
        match self {
            ComponentHandle::Basic(c) => c.info(),
            ComponentHandle::Operation(o) => o.info(),
            ComponentHandle::Service(s) => s.info(),
        }
    }

    pub fn id(&self) -> &str {
        &self.info().id
    }

    /// The effective type. The variant wins over whatever the component's own
    /// info claims, so an entry reported as `Operation` is always executable.
    pub fn kind(&self) -> ComponentType {
        match self {
            ComponentHandle::Basic(c) => match c.component_type() {
                ComponentType::Operation | ComponentType::Service => ComponentType::Basic,
                other => other,
            },
            ComponentHandle::Operation(_) => ComponentType::Operation,
            ComponentHandle::Service(_) => ComponentType::Service,
        }
    }

    /// True when both handles point at the same component instance, not merely
    /// one with the same ID.
    pub fn same_instance(&self, other: &ComponentHandle) -> bool {
        self.data_ptr() == other.data_ptr()
    }

    fn data_ptr(&self) -> *const () {
        match self {
            ComponentHandle::Basic(c) => Arc::as_ptr(c) as *const (),
            ComponentHandle::Operation(o) => Arc::as_ptr(o) as *const (),
            ComponentHandle::Service(s) => Arc::as_ptr(s) as *const (),
        }
    }

    pub fn as_operation(&self) -> Option<&Arc<dyn Operation>> {
        match self {
            ComponentHandle::Operation(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_service(&self) -> Option<&Arc<dyn Service>> {
        match self {
            ComponentHandle::Service(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Plain(ComponentInfo);

    impl Component for Plain {
        fn info(&self) -> &ComponentInfo {
            &self.0
        }
    }

    #[test]
    fn basic_handle_never_reports_a_capability_it_lacks() {
        let handle = ComponentHandle::basic(Plain(ComponentInfo::new(
            "liar",
            "Liar",
            ComponentType::Service,
        )));
        assert_eq!(handle.kind(), ComponentType::Basic);
        assert!(handle.as_service().is_none());
        assert!(handle.as_operation().is_none());
    }

    #[test]
    fn system_type_survives_on_basic_handles() {
        let handle = ComponentHandle::basic(Plain(ComponentInfo::new(
            "sys",
            "System",
            ComponentType::System,
        )));
        assert_eq!(handle.kind(), ComponentType::System);
    }

    #[test]
    fn same_instance_compares_identity_not_id() {
        let first = ComponentHandle::basic(Plain(ComponentInfo::new("x", "X", ComponentType::Basic)));
        let second = ComponentHandle::basic(Plain(ComponentInfo::new("x", "X", ComponentType::Basic)));
        assert!(first.same_instance(&first.clone()));
        assert!(!first.same_instance(&second));
    }

    #[test]
    fn raw_result_is_wrapped() {
        let out = OperationResult::from(json!({"x": 1})).into_envelope();
        assert_eq!(out.data, json!({"x": 1}));
        assert!(out.metadata.is_empty());
    }

    #[tokio::test]
    async fn service_state_records_failure() {
        let state = ServiceState::new();
        let result = state.start_with(async { Err::<(), BoxError>("nope".into()) }).await;
        assert!(result.is_err());
        assert_eq!(state.status(), ServiceStatus::Failed);

        state.start_with(async { Ok(()) }).await.unwrap();
        assert_eq!(state.status(), ServiceStatus::Running);

        state.stop_with(async { Ok(()) }).await.unwrap();
        assert_eq!(state.status(), ServiceStatus::Stopped);
    }
}
