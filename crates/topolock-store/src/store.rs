//! Coordination store contract
//!
//! Lock recipes only rely on what a ZooKeeper-style store guarantees:
//! atomic creation with a per-parent monotonically increasing sequence,
//! session-scoped ephemeral nodes, versioned deletes and one-shot
//! notification when a node goes away.

use async_trait::async_trait;
use tokio::sync::oneshot;

use topolock_common::path;

use crate::error::StoreError;

/// Version argument of [`CoordinationStore::delete`] that matches any version
pub const ANY_VERSION: i32 = -1;

/// Width of the zero-padded sequence suffix appended to sequential nodes
pub const SEQUENCE_DIGITS: usize = 10;

/// How a node is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateMode {
    #[default]
    Persistent,
    PersistentSequential,
    /// Removed when the creating session ends
    Ephemeral,
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Node metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    /// Data version, bumped on every write
    pub version: i32,
    /// Child version, bumped on every child create or delete
    pub cversion: i32,
    pub num_children: usize,
    /// Owning session id for ephemeral nodes, 0 otherwise
    pub ephemeral_owner: u64,
}

impl Stat {
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner != 0
    }
}

/// Why a removal watch fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    NodeDeleted(String),
    /// The watching session or the store ended before the node was deleted
    Closed,
}

/// One-shot notification for the removal of a node
#[derive(Debug)]
pub struct RemovalWatch {
    path: String,
    receiver: Option<oneshot::Receiver<WatchEvent>>,
}

impl RemovalWatch {
    pub fn new(path: impl Into<String>, receiver: oneshot::Receiver<WatchEvent>) -> Self {
        Self {
            path: path.into(),
            receiver: Some(receiver),
        }
    }

    /// A watch on a node that was already absent when the watch was requested
    pub fn fired(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            receiver: None,
        }
    }

    pub fn is_fired(&self) -> bool {
        self.receiver.is_none()
    }

    pub async fn wait(self) -> WatchEvent {
        match self.receiver {
            None => WatchEvent::NodeDeleted(self.path),
            Some(receiver) => receiver.await.unwrap_or(WatchEvent::Closed),
        }
    }
}

/// Operations a backing coordination store must provide
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Create a node and return its assigned path
    ///
    /// Sequential modes append a `SEQUENCE_DIGITS` wide counter to `path`; a
    /// path ending in `/` therefore creates a child of that directory.
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<String, StoreError>;

    /// Child names, in no particular order
    async fn children(&self, path: &str) -> Result<Vec<String>, StoreError>;

    async fn get(&self, path: &str) -> Result<(Vec<u8>, Stat), StoreError>;

    async fn exists(&self, path: &str) -> Result<Option<Stat>, StoreError>;

    /// Delete a node; `ANY_VERSION` skips the version check
    async fn delete(&self, path: &str, version: i32) -> Result<(), StoreError>;

    /// Watch for the removal of `path`
    ///
    /// Stores without notifications keep this default and callers fall back
    /// to polling.
    async fn watch_removal(&self, path: &str) -> Result<RemovalWatch, StoreError> {
        let _ = path;
        Err(StoreError::Unimplemented("watch_removal"))
    }
}

/// Create a node, materializing missing parent directories first
///
/// Parents are created as empty persistent nodes; a parent created
/// concurrently by someone else is not an error.
pub async fn create_recursive(
    store: &dyn CoordinationStore,
    node_path: &str,
    data: &[u8],
    mode: CreateMode,
) -> Result<String, StoreError> {
    match store.create(node_path, data, mode).await {
        Err(StoreError::NoNode(_)) => {
            ensure_dirs(store, path::parent(node_path)).await?;
            store.create(node_path, data, mode).await
        }
        result => result,
    }
}

async fn ensure_dirs(store: &dyn CoordinationStore, dir: &str) -> Result<(), StoreError> {
    let mut current = String::new();
    for component in dir.split('/').filter(|c| !c.is_empty()) {
        current.push('/');
        current.push_str(component);
        match store.create(&current, &[], CreateMode::Persistent).await {
            Ok(_) | Err(StoreError::NodeExists(_)) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
