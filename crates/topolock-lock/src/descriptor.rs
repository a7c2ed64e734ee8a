//! Lock descriptors returned by successful acquisitions

use std::fmt;

use async_trait::async_trait;
use tracing::debug;

use topolock_common::{Context, TopoError};

use crate::server::TopoServer;

/// A held lock
#[async_trait]
pub trait LockDescriptor: Send + Sync + fmt::Debug {
    /// Queue entry path, relative to the server root
    fn path(&self) -> &str;

    /// Verify the lock is still held
    async fn check(&self, ctx: &Context) -> Result<(), TopoError>;

    /// Release the lock. Releasing twice is an error.
    async fn unlock(&self, ctx: &Context) -> Result<(), TopoError>;
}

/// Descriptor for a queue lock: the entry path plus the server owning the session
#[derive(Debug, Clone)]
pub struct QueueLockDescriptor {
    server: TopoServer,
    node_path: String,
}

impl QueueLockDescriptor {
    pub(crate) fn new(server: TopoServer, node_path: String) -> Self {
        Self { server, node_path }
    }
}

#[async_trait]
impl LockDescriptor for QueueLockDescriptor {
    fn path(&self) -> &str {
        &self.node_path
    }

    async fn check(&self, _ctx: &Context) -> Result<(), TopoError> {
        // TODO: compare the entry's ephemeral owner with the server session;
        // a lost session silently drops the entry and this still reports Ok.
        Ok(())
    }

    async fn unlock(&self, ctx: &Context) -> Result<(), TopoError> {
        self.server.delete(ctx, &self.node_path, None).await?;
        debug!(node = %self.node_path, "Lock released");
        Ok(())
    }
}
