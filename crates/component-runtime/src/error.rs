//! # Runtime Errors
//!
//! This module defines the error taxonomy shared by every part of the runtime.
//! Leaf components ([`Registry`](crate::Registry), [`PluginManager`](crate::PluginManager))
//! return their own error enums; the [`Runtime`](crate::Runtime) wraps them, and wraps
//! failures coming out of user code, with the identifying ID of the operation or
//! service involved.
//!
//! Every error exposes [`kind()`](RuntimeError::kind) so callers can match on the
//! taxonomy without caring which layer produced it:
//!
//! ```rust,ignore
//! match runtime.execute_operation(&ctx, "echo", input).await {
//!     Err(e) if e.kind() == ErrorKind::SystemNotStarted => { /* start first */ }
//!     Err(e) => return Err(e),
//!     Ok(output) => { /* ... */ }
//! }
//! ```

use crate::plugin::PluginError;
use crate::registry::RegistryError;

/// Error type produced by user-supplied code (operations, services, plugins,
/// event handlers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Convenience alias used throughout the crate.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Error taxonomy. One code per failure class, independent of the concrete
/// error type carrying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidItem,
    ItemAlreadyExists,
    ItemNotFound,
    PluginLoadFailed,
    PluginUnloadFailed,
    SystemNotInitialized,
    SystemNotStarted,
    OperationNotFound,
    OperationFailed,
    ServiceNotFound,
    ServiceStartFailed,
    ServiceStopFailed,
    /// A lifecycle call was made from a phase that does not permit it.
    InvalidState,
    /// The strict constructor was handed an incomplete set of dependencies.
    MissingDependency,
}

/// Errors returned by the [`Runtime`](crate::Runtime) and the builder.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("system not initialized: {reason}")]
    SystemNotInitialized {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("system not started")]
    SystemNotStarted,

    #[error("cannot {action} while system is {phase}")]
    InvalidState {
        action: &'static str,
        phase: crate::runtime::Phase,
    },

    #[error("operation not found: {id}")]
    OperationNotFound { id: String },

    #[error("operation {id} failed: {source}")]
    OperationFailed {
        id: String,
        #[source]
        source: BoxError,
    },

    #[error("service not found: {id}")]
    ServiceNotFound { id: String },

    #[error("service {id} failed to start: {source}")]
    ServiceStartFailed {
        id: String,
        #[source]
        source: BoxError,
    },

    #[error("service {id} failed to stop: {source}")]
    ServiceStopFailed {
        id: String,
        #[source]
        source: BoxError,
    },

    #[error("{0} is required")]
    MissingDependency(&'static str),
}

impl RuntimeError {
    /// The taxonomy code of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::Registry(e) => e.kind(),
            RuntimeError::Plugin(e) => e.kind(),
            RuntimeError::SystemNotInitialized { .. } => ErrorKind::SystemNotInitialized,
            RuntimeError::SystemNotStarted => ErrorKind::SystemNotStarted,
            RuntimeError::InvalidState { .. } => ErrorKind::InvalidState,
            RuntimeError::OperationNotFound { .. } => ErrorKind::OperationNotFound,
            RuntimeError::OperationFailed { .. } => ErrorKind::OperationFailed,
            RuntimeError::ServiceNotFound { .. } => ErrorKind::ServiceNotFound,
            RuntimeError::ServiceStartFailed { .. } => ErrorKind::ServiceStartFailed,
            RuntimeError::ServiceStopFailed { .. } => ErrorKind::ServiceStopFailed,
            RuntimeError::MissingDependency(_) => ErrorKind::MissingDependency,
        }
    }

    pub(crate) fn not_initialized(reason: impl Into<String>, source: BoxError) -> Self {
        RuntimeError::SystemNotInitialized {
            reason: reason.into(),
            source: Some(source),
        }
    }
}
