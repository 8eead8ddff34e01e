//! # Component Registry
//!
//! The registry is the name-keyed directory of every component known to a
//! [`Runtime`](crate::Runtime). It is deliberately dumb: it stores
//! [`ComponentHandle`]s by ID, refuses duplicates and empty IDs, and hands out
//! snapshots. It never calls lifecycle hooks on what it stores.
//!
//! ## Ordering
//!
//! [`Registry::list`] returns entries in registration order. The runtime relies on
//! this to start services in the order they were registered and to stop them in
//! reverse.
//!
//! ## Concurrency
//!
//! Every method takes `&self`; [`InMemoryRegistry`] guards its map with a single
//! read/write lock. `list` and `count` observe a point-in-time snapshot, so a
//! concurrent writer may or may not be reflected, but a partially inserted entry
//! is never visible.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::component::ComponentHandle;
use crate::error::ErrorKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid item: {reason}")]
    InvalidItem { reason: String },

    #[error("item already exists: {id}")]
    AlreadyExists { id: String },

    #[error("item not found: {id}")]
    NotFound { id: String },
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::InvalidItem { .. } => ErrorKind::InvalidItem,
            RegistryError::AlreadyExists { .. } => ErrorKind::ItemAlreadyExists,
            RegistryError::NotFound { .. } => ErrorKind::ItemNotFound,
        }
    }
}

/// Directory of registered components.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Add a component. Fails with `InvalidItem` for an empty ID and with
    /// `AlreadyExists` when the ID is taken; the existing entry is kept.
    fn register(&self, item: ComponentHandle) -> Result<(), RegistryError>;

    fn get(&self, id: &str) -> Result<ComponentHandle, RegistryError>;

    /// Remove and return the entry for `id`.
    fn remove(&self, id: &str) -> Result<ComponentHandle, RegistryError>;

    /// Remove the entry for `item`'s ID only while it is still that same
    /// instance. Anything else under the ID is left alone and reported as
    /// `NotFound`.
    fn remove_instance(&self, item: &ComponentHandle) -> Result<ComponentHandle, RegistryError> {
        let current = self.get(item.id())?;
        if !current.same_instance(item) {
            return Err(RegistryError::NotFound {
                id: item.id().to_string(),
            });
        }
        self.remove(item.id())
    }

    /// Snapshot of all entries, in registration order.
    fn list(&self) -> Vec<ComponentHandle>;

    fn has(&self, id: &str) -> bool;

    fn count(&self) -> usize;

    /// Drop every entry. No disposal hooks are run.
    fn clear(&self);

    /// One-time setup performed by [`Runtime::initialize`](crate::Runtime::initialize).
    async fn initialize(&self) -> Result<(), RegistryError> {
        Ok(())
    }
}

pub(crate) fn validate_id(item: &ComponentHandle) -> Result<(), RegistryError> {
    if item.id().is_empty() {
        return Err(RegistryError::InvalidItem {
            reason: "component id must not be empty".to_string(),
        });
    }
    Ok(())
}

#[derive(Default)]
struct Entries {
    items: HashMap<String, (u64, ComponentHandle)>,
    next_seq: u64,
}

/// Default [`Registry`]: an in-process map behind a `parking_lot::RwLock`.
#[derive(Default)]
pub struct InMemoryRegistry {
    entries: RwLock<Entries>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    fn register(&self, item: ComponentHandle) -> Result<(), RegistryError> {
        validate_id(&item)?;

        let mut entries = self.entries.write();
        let id = item.id().to_string();
        if entries.items.contains_key(&id) {
            warn!(component_id = %id, "Duplicate registration rejected");
            return Err(RegistryError::AlreadyExists { id });
        }
        let seq = entries.next_seq;
        entries.next_seq += 1;
        let kind = item.kind();
        entries.items.insert(id.clone(), (seq, item));
        debug!(component_id = %id, %kind, size = entries.items.len(), "Registered");
        Ok(())
    }

    fn get(&self, id: &str) -> Result<ComponentHandle, RegistryError> {
        self.entries
            .read()
            .items
            .get(id)
            .map(|(_, item)| item.clone())
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
    }

    fn remove(&self, id: &str) -> Result<ComponentHandle, RegistryError> {
        let mut entries = self.entries.write();
        match entries.items.remove(id) {
            Some((_, item)) => {
                debug!(component_id = %id, size = entries.items.len(), "Removed");
                Ok(item)
            }
            None => Err(RegistryError::NotFound { id: id.to_string() }),
        }
    }

    fn remove_instance(&self, item: &ComponentHandle) -> Result<ComponentHandle, RegistryError> {
        let id = item.id();
        let mut entries = self.entries.write();
        let owned = matches!(entries.items.get(id), Some((_, current)) if current.same_instance(item));
        if !owned {
            return Err(RegistryError::NotFound { id: id.to_string() });
        }
        match entries.items.remove(id) {
            Some((_, removed)) => {
                debug!(component_id = %id, size = entries.items.len(), "Removed");
                Ok(removed)
            }
            None => Err(RegistryError::NotFound { id: id.to_string() }),
        }
    }

    fn list(&self) -> Vec<ComponentHandle> {
        let entries = self.entries.read();
        let mut snapshot: Vec<_> = entries.items.values().cloned().collect();
        drop(entries);
        snapshot.sort_by_key(|(seq, _)| *seq);
        snapshot.into_iter().map(|(_, item)| item).collect()
    }

    fn has(&self, id: &str) -> bool {
        self.entries.read().items.contains_key(id)
    }

    fn count(&self) -> usize {
        self.entries.read().items.len()
    }

    fn clear(&self) {
        let mut entries = self.entries.write();
        let removed = entries.items.len();
        entries.items.clear();
        info!(removed, "Registry cleared");
    }
}
