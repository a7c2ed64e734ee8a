//! Root-scoped view over a coordination store session

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use topolock_common::{Context, TopoError, path};
use topolock_store::{ANY_VERSION, CoordinationStore, Stat};

use crate::config::LockConfig;
use crate::errors::guarded;

/// Type of a directory listing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// The node has children
    Directory,
    File,
}

/// One child returned by [`TopoServer::list_dir`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    /// Only set for full listings
    pub entry_type: Option<EntryType>,
    pub ephemeral: bool,
}

/// A store session plus the namespace root every path is resolved against
///
/// Cloning is cheap; clones share the underlying session.
#[derive(Clone)]
pub struct TopoServer {
    store: Arc<dyn CoordinationStore>,
    /// Cleaned root without trailing slash, empty for `/`
    root: String,
    config: LockConfig,
}

impl fmt::Debug for TopoServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopoServer")
            .field("root", &self.root())
            .field("config", &self.config)
            .finish()
    }
}

impl TopoServer {
    pub fn new(store: Arc<dyn CoordinationStore>, root: &str) -> Self {
        Self::with_config(store, LockConfig::default().with_root(root))
    }

    pub fn with_config(store: Arc<dyn CoordinationStore>, config: LockConfig) -> Self {
        let root = match path::clean(&config.root).as_str() {
            "/" => String::new(),
            cleaned => cleaned.to_string(),
        };
        Self {
            store,
            root,
            config,
        }
    }

    pub fn root(&self) -> &str {
        if self.root.is_empty() { "/" } else { &self.root }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &dyn CoordinationStore {
        self.store.as_ref()
    }

    /// Absolute store path for a path relative to the root
    pub(crate) fn full_path(&self, relative: &str) -> String {
        match path::clean(relative).as_str() {
            "/" if !self.root.is_empty() => self.root.clone(),
            cleaned => format!("{}{}", self.root, cleaned),
        }
    }

    /// Strip the root prefix so the result can be handed back to `full_path`
    pub(crate) fn relative_path(&self, full: &str) -> String {
        match full.strip_prefix(self.root.as_str()) {
            Some(relative) if relative.starts_with('/') => relative.to_string(),
            _ => full.to_string(),
        }
    }

    /// List the children of `dir_path`, sorted by name
    ///
    /// With `full`, every child is also stat'ed to fill in its type and
    /// whether it is ephemeral; children deleted while listing are skipped.
    pub async fn list_dir(
        &self,
        ctx: &Context,
        dir_path: &str,
        full: bool,
    ) -> Result<Vec<DirEntry>, TopoError> {
        let dir = self.full_path(dir_path);
        let mut children = guarded(ctx, dir_path, self.store.children(&dir)).await?;
        children.sort();

        let mut entries = Vec::with_capacity(children.len());
        for name in children {
            if !full {
                entries.push(DirEntry {
                    name,
                    entry_type: None,
                    ephemeral: false,
                });
                continue;
            }

            let child = path::join(&[&dir, &name]);
            let Some(stat) = guarded(ctx, dir_path, self.store.exists(&child)).await? else {
                debug!(path = %child, "Child vanished while listing");
                continue;
            };
            entries.push(DirEntry {
                name,
                entry_type: Some(entry_type(&stat)),
                ephemeral: stat.is_ephemeral(),
            });
        }
        Ok(entries)
    }

    pub async fn get(&self, ctx: &Context, file_path: &str) -> Result<(Vec<u8>, Stat), TopoError> {
        let full = self.full_path(file_path);
        guarded(ctx, file_path, self.store.get(&full)).await
    }

    /// Delete a node; `None` deletes whatever version is present
    pub async fn delete(
        &self,
        ctx: &Context,
        file_path: &str,
        version: Option<i32>,
    ) -> Result<(), TopoError> {
        let full = self.full_path(file_path);
        let version = version.unwrap_or(ANY_VERSION);
        guarded(ctx, file_path, self.store.delete(&full, version)).await
    }
}

fn entry_type(stat: &Stat) -> EntryType {
    if stat.num_children > 0 {
        EntryType::Directory
    } else {
        EntryType::File
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use topolock_common::ErrorKind;
    use topolock_store::{CreateMode, MemoryStore};

    fn server(root: &str) -> (MemoryStore, TopoServer) {
        let store = MemoryStore::new();
        let server = TopoServer::new(Arc::new(store.connect()), root);
        (store, server)
    }

    #[test]
    fn test_paths_under_root() {
        let (_store, server) = server("/vitess/global/");
        assert_eq!(server.root(), "/vitess/global");
        assert_eq!(
            server.full_path("keyspaces/ks1"),
            "/vitess/global/keyspaces/ks1"
        );
        assert_eq!(server.full_path("/"), "/vitess/global");
        assert_eq!(
            server.relative_path("/vitess/global/keyspaces/ks1/locks/0000000000"),
            "/keyspaces/ks1/locks/0000000000"
        );
    }

    #[test]
    fn test_paths_under_slash_root() {
        let (_store, server) = server("/");
        assert_eq!(server.root(), "/");
        assert_eq!(server.full_path("/a/b"), "/a/b");
        assert_eq!(server.full_path("/"), "/");
        assert_eq!(server.relative_path("/a/locks/0000000001"), "/a/locks/0000000001");
    }

    #[tokio::test]
    async fn test_list_dir_full() {
        let (store, server) = server("/");
        let session = store.connect();
        session.create("/d", &[], CreateMode::Persistent).await.unwrap();
        session.create("/d/locks", &[], CreateMode::Persistent).await.unwrap();
        session
            .create("/d/locks/", b"x", CreateMode::EphemeralSequential)
            .await
            .unwrap();
        session.create("/d/eph", &[], CreateMode::Ephemeral).await.unwrap();

        let ctx = Context::background();
        let entries = server.list_dir(&ctx, "/d", true).await.unwrap();
        assert_eq!(
            entries,
            vec![
                DirEntry {
                    name: "eph".to_string(),
                    entry_type: Some(EntryType::File),
                    ephemeral: true,
                },
                DirEntry {
                    name: "locks".to_string(),
                    entry_type: Some(EntryType::Directory),
                    ephemeral: false,
                },
            ]
        );

        let names = server.list_dir(&ctx, "/d", false).await.unwrap();
        assert!(names.iter().all(|entry| entry.entry_type.is_none()));
    }

    #[tokio::test]
    async fn test_list_missing_dir() {
        let (_store, server) = server("/");
        let err = server
            .list_dir(&Context::background(), "/nope", true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSuchResource);
        assert_eq!(err.path(), "/nope");
    }

    #[tokio::test]
    async fn test_get_and_delete_relative_to_root() {
        let (store, server) = server("/topo");
        let session = store.connect();
        session.create("/topo", &[], CreateMode::Persistent).await.unwrap();
        session
            .create("/topo/file", b"contents", CreateMode::Persistent)
            .await
            .unwrap();

        let ctx = Context::background();
        let (data, stat) = server.get(&ctx, "/file").await.unwrap();
        assert_eq!(data, b"contents");
        assert_eq!(stat.version, 0);

        let err = server.delete(&ctx, "/file", Some(3)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadVersion);

        server.delete(&ctx, "/file", None).await.unwrap();
        let err = server.delete(&ctx, "/file", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSuchResource);
    }
}
