//! In-process coordination store
//!
//! `MemoryStore` plays the role of the replicated ensemble and
//! `MemorySession` the role of a client connection. A single mutex guards
//! the whole tree, so every operation is atomic with respect to every other.
//! Ending a session (explicitly or by dropping its last handle) removes the
//! ephemeral nodes it created, fires their removal watches, and wakes every
//! watch the session itself installed with `WatchEvent::Closed`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use topolock_common::path;

use crate::error::StoreError;
use crate::store::{
    ANY_VERSION, CoordinationStore, CreateMode, RemovalWatch, SEQUENCE_DIGITS, Stat, WatchEvent,
};

struct Node {
    data: Vec<u8>,
    version: i32,
    cversion: i32,
    ephemeral_owner: u64,
    next_sequence: u64,
    children: BTreeSet<String>,
}

impl Node {
    fn new(data: Vec<u8>, ephemeral_owner: u64) -> Self {
        Self {
            data,
            version: 0,
            cversion: 0,
            ephemeral_owner,
            next_sequence: 0,
            children: BTreeSet::new(),
        }
    }

    fn stat(&self) -> Stat {
        Stat {
            version: self.version,
            cversion: self.cversion,
            num_children: self.children.len(),
            ephemeral_owner: self.ephemeral_owner,
        }
    }
}

struct Tree {
    nodes: HashMap<String, Node>,
    sessions: HashSet<u64>,
    next_session_id: u64,
    /// Removal watchers per path, tagged with the session that installed them
    watchers: HashMap<String, Vec<(u64, oneshot::Sender<WatchEvent>)>>,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), Node::new(Vec::new(), 0));
        Self {
            nodes,
            sessions: HashSet::new(),
            // 0 marks persistent nodes
            next_session_id: 1,
            watchers: HashMap::new(),
        }
    }

    fn open_session(&mut self) -> u64 {
        let id = self.next_session_id;
        self.next_session_id += 1;
        self.sessions.insert(id);
        id
    }

    /// Returns the number of ephemeral nodes removed
    fn close_session(&mut self, id: u64) -> usize {
        if !self.sessions.remove(&id) {
            return 0;
        }
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == id)
            .map(|(node_path, _)| node_path.clone())
            .collect();
        for node_path in &owned {
            self.remove(node_path);
        }

        // Outstanding watches of the session fire with Closed
        for watchers in self.watchers.values_mut() {
            let (closed, kept): (Vec<_>, Vec<_>) =
                watchers.drain(..).partition(|(owner, _)| *owner == id);
            *watchers = kept;
            for (_, watcher) in closed {
                let _ = watcher.send(WatchEvent::Closed);
            }
        }
        self.watchers.retain(|_, watchers| !watchers.is_empty());
        owned.len()
    }

    fn create(
        &mut self,
        session: u64,
        node_path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> Result<String, StoreError> {
        validate(node_path, mode.is_sequential())?;
        let parent_path = path::parent(node_path);

        let parent = self
            .nodes
            .get(parent_path)
            .ok_or_else(|| StoreError::NoNode(node_path.to_string()))?;
        if parent.ephemeral_owner != 0 {
            return Err(StoreError::NoChildrenForEphemerals(node_path.to_string()));
        }

        let created = if mode.is_sequential() {
            format!(
                "{}{:0width$}",
                node_path,
                parent.next_sequence,
                width = SEQUENCE_DIGITS
            )
        } else {
            node_path.to_string()
        };
        if self.nodes.contains_key(&created) {
            return Err(StoreError::NodeExists(created));
        }

        if let Some(parent) = self.nodes.get_mut(parent_path) {
            if mode.is_sequential() {
                parent.next_sequence += 1;
            }
            parent.cversion += 1;
            parent.children.insert(path::base(&created).to_string());
        }
        let owner = if mode.is_ephemeral() { session } else { 0 };
        self.nodes
            .insert(created.clone(), Node::new(data.to_vec(), owner));
        Ok(created)
    }

    fn node(&self, node_path: &str) -> Result<&Node, StoreError> {
        validate_lookup(node_path)?;
        self.nodes
            .get(node_path)
            .ok_or_else(|| StoreError::NoNode(node_path.to_string()))
    }

    fn delete(&mut self, node_path: &str, version: i32) -> Result<(), StoreError> {
        let node = self.node(node_path)?;
        if node_path == "/" {
            return Err(StoreError::InvalidPath(node_path.to_string()));
        }
        if version != ANY_VERSION && version != node.version {
            return Err(StoreError::BadVersion {
                path: node_path.to_string(),
                expected: version,
                actual: node.version,
            });
        }
        if !node.children.is_empty() {
            return Err(StoreError::NotEmpty(node_path.to_string()));
        }
        self.remove(node_path);
        Ok(())
    }

    fn remove(&mut self, node_path: &str) {
        self.nodes.remove(node_path);
        if let Some(parent) = self.nodes.get_mut(path::parent(node_path)) {
            parent.children.remove(path::base(node_path));
            parent.cversion += 1;
        }
        if let Some(watchers) = self.watchers.remove(node_path) {
            for (_, watcher) in watchers {
                let _ = watcher.send(WatchEvent::NodeDeleted(node_path.to_string()));
            }
        }
    }

    fn watch_removal(&mut self, session: u64, node_path: &str) -> Result<RemovalWatch, StoreError> {
        validate_lookup(node_path)?;
        if !self.nodes.contains_key(node_path) {
            return Ok(RemovalWatch::fired(node_path));
        }
        let (sender, receiver) = oneshot::channel();
        let watchers = self.watchers.entry(node_path.to_string()).or_default();
        watchers.retain(|(_, watcher)| !watcher.is_closed());
        watchers.push((session, sender));
        Ok(RemovalWatch::new(node_path, receiver))
    }
}

fn validate(node_path: &str, sequential: bool) -> Result<(), StoreError> {
    let invalid = || StoreError::InvalidPath(node_path.to_string());
    let body = node_path.strip_prefix('/').ok_or_else(invalid)?;
    let body = if sequential {
        body.strip_suffix('/').unwrap_or(body)
    } else {
        body
    };
    if body.is_empty() {
        return if sequential { Ok(()) } else { Err(invalid()) };
    }
    if body
        .split('/')
        .any(|component| component.is_empty() || component == "." || component == "..")
    {
        return Err(invalid());
    }
    Ok(())
}

fn validate_lookup(node_path: &str) -> Result<(), StoreError> {
    if node_path == "/" {
        return Ok(());
    }
    validate(node_path, false)
}

/// Shared in-process store; hand out one [`MemorySession`] per client
#[derive(Clone)]
pub struct MemoryStore {
    tree: Arc<Mutex<Tree>>,
    watches: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
            watches: true,
        }
    }

    /// A store whose sessions report watches as unsupported, forcing pollers
    pub fn without_watches() -> Self {
        Self {
            watches: false,
            ..Self::new()
        }
    }

    /// Open a new client session
    pub fn connect(&self) -> MemorySession {
        let id = self.tree.lock().open_session();
        debug!(session_id = id, "Session opened");
        MemorySession {
            handle: Arc::new(SessionHandle {
                id,
                tree: self.tree.clone(),
                watches: self.watches,
            }),
        }
    }

    pub fn session_count(&self) -> usize {
        self.tree.lock().sessions.len()
    }
}

struct SessionHandle {
    id: u64,
    tree: Arc<Mutex<Tree>>,
    watches: bool,
}

impl SessionHandle {
    fn close(&self) -> usize {
        let removed = self.tree.lock().close_session(self.id);
        debug!(
            session_id = self.id,
            removed_ephemerals = removed,
            "Session closed"
        );
        removed
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// A client session; clones share the session, which ends with the last clone
#[derive(Clone)]
pub struct MemorySession {
    handle: Arc<SessionHandle>,
}

impl fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySession")
            .field("id", &self.handle.id)
            .finish()
    }
}

impl MemorySession {
    pub fn id(&self) -> u64 {
        self.handle.id
    }

    /// End the session now, as if the client had crashed
    ///
    /// Returns the number of ephemeral nodes removed.
    pub fn close(&self) -> usize {
        self.handle.close()
    }

    pub fn is_closed(&self) -> bool {
        !self.handle.tree.lock().sessions.contains(&self.handle.id)
    }

    fn with_tree<T>(
        &self,
        op: impl FnOnce(&mut Tree) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut tree = self.handle.tree.lock();
        if !tree.sessions.contains(&self.handle.id) {
            return Err(StoreError::SessionExpired);
        }
        op(&mut tree)
    }
}

#[async_trait]
impl CoordinationStore for MemorySession {
    async fn create(
        &self,
        node_path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> Result<String, StoreError> {
        let session = self.handle.id;
        self.with_tree(|tree| tree.create(session, node_path, data, mode))
    }

    async fn children(&self, node_path: &str) -> Result<Vec<String>, StoreError> {
        self.with_tree(|tree| {
            Ok(tree
                .node(node_path)?
                .children
                .iter()
                .cloned()
                .collect())
        })
    }

    async fn get(&self, node_path: &str) -> Result<(Vec<u8>, Stat), StoreError> {
        self.with_tree(|tree| {
            let node = tree.node(node_path)?;
            Ok((node.data.clone(), node.stat()))
        })
    }

    async fn exists(&self, node_path: &str) -> Result<Option<Stat>, StoreError> {
        self.with_tree(|tree| match tree.node(node_path) {
            Ok(node) => Ok(Some(node.stat())),
            Err(StoreError::NoNode(_)) => Ok(None),
            Err(err) => Err(err),
        })
    }

    async fn delete(&self, node_path: &str, version: i32) -> Result<(), StoreError> {
        self.with_tree(|tree| tree.delete(node_path, version))
    }

    async fn watch_removal(&self, node_path: &str) -> Result<RemovalWatch, StoreError> {
        if !self.handle.watches {
            return Err(StoreError::Unimplemented("watch_removal"));
        }
        let session = self.handle.id;
        self.with_tree(|tree| tree.watch_removal(session, node_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sequential_children() {
        let store = MemoryStore::new();
        let session = store.connect();

        session
            .create("/queue", &[], CreateMode::Persistent)
            .await
            .unwrap();
        let first = session
            .create("/queue/", b"a", CreateMode::EphemeralSequential)
            .await
            .unwrap();
        let second = session
            .create("/queue/", b"b", CreateMode::EphemeralSequential)
            .await
            .unwrap();

        assert_eq!(first, "/queue/0000000000");
        assert_eq!(second, "/queue/0000000001");

        let mut children = session.children("/queue").await.unwrap();
        children.sort();
        assert_eq!(children, vec!["0000000000", "0000000001"]);

        let (data, stat) = session.get(&second).await.unwrap();
        assert_eq!(data, b"b");
        assert_eq!(stat.ephemeral_owner, session.id());
        assert!(stat.is_ephemeral());
    }

    #[tokio::test]
    async fn test_sequence_not_reused_after_delete() {
        let store = MemoryStore::new();
        let session = store.connect();

        session
            .create("/queue", &[], CreateMode::Persistent)
            .await
            .unwrap();
        let first = session
            .create("/queue/", &[], CreateMode::EphemeralSequential)
            .await
            .unwrap();
        session.delete(&first, ANY_VERSION).await.unwrap();
        let second = session
            .create("/queue/", &[], CreateMode::EphemeralSequential)
            .await
            .unwrap();

        assert_eq!(second, "/queue/0000000001");
    }

    #[tokio::test]
    async fn test_prefixed_sequential_name() {
        let store = MemoryStore::new();
        let session = store.connect();

        session.create("/q", &[], CreateMode::Persistent).await.unwrap();
        let created = session
            .create("/q/lock-", &[], CreateMode::PersistentSequential)
            .await
            .unwrap();
        assert_eq!(created, "/q/lock-0000000000");
        assert_eq!(
            session.children("/q").await.unwrap(),
            vec!["lock-0000000000"]
        );
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let store = MemoryStore::new();
        let session = store.connect();

        let err = session
            .create("/missing/child", &[], CreateMode::Persistent)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NoNode("/missing/child".to_string()));

        session.create("/a", &[], CreateMode::Persistent).await.unwrap();
        let err = session
            .create("/a", &[], CreateMode::Persistent)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NodeExists("/a".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_paths() {
        let store = MemoryStore::new();
        let session = store.connect();

        for bad in ["relative", "/a//b", "/a/", "/", "/a/../b"] {
            let err = session
                .create(bad, &[], CreateMode::Persistent)
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidPath(_)), "{bad}: {err}");
        }
    }

    #[tokio::test]
    async fn test_ephemeral_cannot_have_children() {
        let store = MemoryStore::new();
        let session = store.connect();

        session
            .create("/eph", &[], CreateMode::Ephemeral)
            .await
            .unwrap();
        let err = session
            .create("/eph/child", &[], CreateMode::Persistent)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoChildrenForEphemerals(_)));
    }

    #[tokio::test]
    async fn test_delete_checks() {
        let store = MemoryStore::new();
        let session = store.connect();

        session.create("/d", &[], CreateMode::Persistent).await.unwrap();
        session
            .create("/d/child", &[], CreateMode::Persistent)
            .await
            .unwrap();

        assert_eq!(
            session.delete("/d", ANY_VERSION).await.unwrap_err(),
            StoreError::NotEmpty("/d".to_string())
        );
        assert!(matches!(
            session.delete("/d/child", 7).await.unwrap_err(),
            StoreError::BadVersion { expected: 7, actual: 0, .. }
        ));

        session.delete("/d/child", 0).await.unwrap();
        assert_eq!(
            session.delete("/d/child", ANY_VERSION).await.unwrap_err(),
            StoreError::NoNode("/d/child".to_string())
        );
        assert_eq!(session.exists("/d/child").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_session_removes_ephemerals() {
        let store = MemoryStore::new();
        let owner = store.connect();
        let observer = store.connect();

        owner.create("/q", &[], CreateMode::Persistent).await.unwrap();
        let entry = owner
            .create("/q/", b"held", CreateMode::EphemeralSequential)
            .await
            .unwrap();
        let watch = observer.watch_removal(&entry).await.unwrap();
        assert!(!watch.is_fired());

        assert_eq!(owner.close(), 1);
        assert!(owner.is_closed());
        assert_eq!(watch.wait().await, WatchEvent::NodeDeleted(entry.clone()));

        // Persistent nodes survive the session
        assert!(observer.exists("/q").await.unwrap().is_some());
        assert_eq!(observer.exists(&entry).await.unwrap(), None);
        assert_eq!(
            owner.children("/q").await.unwrap_err(),
            StoreError::SessionExpired
        );
    }

    #[tokio::test]
    async fn test_dropping_last_handle_closes_session() {
        let store = MemoryStore::new();
        let observer = store.connect();
        let owner = store.connect();
        let clone = owner.clone();

        observer
            .create("/q", &[], CreateMode::Persistent)
            .await
            .unwrap();
        owner
            .create("/q/", &[], CreateMode::EphemeralSequential)
            .await
            .unwrap();

        drop(owner);
        assert_eq!(observer.children("/q").await.unwrap().len(), 1);
        drop(clone);
        assert!(observer.children("/q").await.unwrap().is_empty());
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn test_watch_on_missing_node_is_fired() {
        let store = MemoryStore::new();
        let session = store.connect();

        let watch = session.watch_removal("/nothing").await.unwrap();
        assert!(watch.is_fired());
        assert_eq!(
            watch.wait().await,
            WatchEvent::NodeDeleted("/nothing".to_string())
        );
    }

    #[tokio::test]
    async fn test_watch_fires_on_delete() {
        let store = MemoryStore::new();
        let session = store.connect();

        session.create("/w", &[], CreateMode::Persistent).await.unwrap();
        let watch = session.watch_removal("/w").await.unwrap();
        session.delete("/w", ANY_VERSION).await.unwrap();

        assert_eq!(watch.wait().await, WatchEvent::NodeDeleted("/w".to_string()));
    }

    #[tokio::test]
    async fn test_session_close_wakes_own_watches() {
        let store = MemoryStore::new();
        let owner = store.connect();
        let watcher = store.connect();
        let bystander = store.connect();

        owner.create("/held", &[], CreateMode::Ephemeral).await.unwrap();
        let own_watch = watcher.watch_removal("/held").await.unwrap();
        let other_watch = bystander.watch_removal("/held").await.unwrap();

        watcher.close();
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), own_watch.wait())
                .await
                .unwrap(),
            WatchEvent::Closed
        );

        // The node and other sessions' watches are untouched
        assert!(owner.exists("/held").await.unwrap().is_some());
        owner.close();
        assert_eq!(
            other_watch.wait().await,
            WatchEvent::NodeDeleted("/held".to_string())
        );
    }

    #[tokio::test]
    async fn test_store_without_watches() {
        let store = MemoryStore::without_watches();
        let session = store.connect();

        session.create("/w", &[], CreateMode::Persistent).await.unwrap();
        assert_eq!(
            session.watch_removal("/w").await.unwrap_err(),
            StoreError::Unimplemented("watch_removal")
        );
    }
}
