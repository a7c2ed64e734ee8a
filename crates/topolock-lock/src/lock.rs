//! Lock entry points
//!
//! `lock`, `lock_with_ttl` and `lock_name` are the same blocking acquisition.
//! The store has no lock expiry, so the TTL is accepted and ignored.
//! `try_lock` refuses up front when the queue already has entries; that check
//! races with concurrent callers, and the queue still decides who holds the lock.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use topolock_common::{Context, LOCKS_PATH, TopoError, path};
use topolock_store::{ANY_VERSION, CreateMode, create_recursive};

use crate::descriptor::{LockDescriptor, QueueLockDescriptor};
use crate::diagnostics::{Contention, inspect_queue};
use crate::errors::{classify, guarded};
use crate::queue::obtain_queue_lock;
use crate::server::{EntryType, TopoServer};

/// Lock operations of a topology connection
#[async_trait]
pub trait LockConn: Send + Sync {
    /// Block until the lock on `dir_path` is held or `ctx` is done
    async fn lock(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
    ) -> Result<Box<dyn LockDescriptor>, TopoError>;

    /// Same as `lock`; the TTL has no effect
    async fn lock_with_ttl(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
        ttl: Duration,
    ) -> Result<Box<dyn LockDescriptor>, TopoError>;

    /// Lock an arbitrary named path; missing directories are created
    async fn lock_name(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
    ) -> Result<Box<dyn LockDescriptor>, TopoError>;

    /// Fail with `AlreadyLocked` instead of queueing behind an existing entry
    async fn try_lock(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
    ) -> Result<Box<dyn LockDescriptor>, TopoError>;
}

#[async_trait]
impl LockConn for TopoServer {
    async fn lock(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
    ) -> Result<Box<dyn LockDescriptor>, TopoError> {
        let descriptor = self.acquire(ctx, dir_path, contents).await?;
        Ok(Box::new(descriptor))
    }

    async fn lock_with_ttl(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
        ttl: Duration,
    ) -> Result<Box<dyn LockDescriptor>, TopoError> {
        debug!(dir = %dir_path, ?ttl, "Lock TTL ignored, store has no lock expiry");
        let descriptor = self.acquire(ctx, dir_path, contents).await?;
        Ok(Box::new(descriptor))
    }

    async fn lock_name(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
    ) -> Result<Box<dyn LockDescriptor>, TopoError> {
        let descriptor = self.acquire(ctx, dir_path, contents).await?;
        Ok(Box::new(descriptor))
    }

    async fn try_lock(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
    ) -> Result<Box<dyn LockDescriptor>, TopoError> {
        let entries = self.list_dir(ctx, dir_path, true).await?;

        // A queue path with children means someone holds or awaits the lock
        if entries
            .iter()
            .any(|entry| entry.name == LOCKS_PATH && entry.entry_type == Some(EntryType::Directory))
        {
            return Err(TopoError::AlreadyLocked(dir_path.to_string()));
        }

        let descriptor = self.acquire(ctx, dir_path, contents).await?;
        Ok(Box::new(descriptor))
    }
}

impl TopoServer {
    /// Queue an entry under `dir_path` and wait for it to reach the front
    ///
    /// On failure the entry is deleted and the queue inspected under a fresh
    /// context bounded by the cleanup timeout, since `ctx` may already be done.
    pub async fn acquire(
        &self,
        ctx: &Context,
        dir_path: &str,
        contents: &str,
    ) -> Result<QueueLockDescriptor, TopoError> {
        // The trailing slash makes sequential entries children of the queue path
        let locks_dir = format!("{}/", self.full_path(&path::join(&[dir_path, LOCKS_PATH])));

        let node_path = guarded(
            ctx,
            &locks_dir,
            create_recursive(
                self.store(),
                &locks_dir,
                contents.as_bytes(),
                CreateMode::EphemeralSequential,
            ),
        )
        .await?;

        if let Err(err) =
            obtain_queue_lock(ctx, self.store(), &node_path, self.config().poll_interval).await
        {
            let classified = classify(err, &node_path);
            warn!("Failed to obtain lock: {}", classified);

            let cleanup_ctx = Context::background().with_timeout(self.config().cleanup_timeout);
            if let Err(err) = guarded(
                &cleanup_ctx,
                &node_path,
                self.store().delete(&node_path, ANY_VERSION),
            )
            .await
            {
                warn!(
                    "Failed to cleanup unsuccessful lock path {}: {}",
                    node_path, err
                );
            }

            inspect_queue(&cleanup_ctx, self.store(), path::parent(&node_path)).await;
            return Err(classified);
        }

        let relative = self.relative_path(&node_path);
        debug!(dir = %dir_path, node = %relative, "Lock acquired");
        Ok(QueueLockDescriptor::new(self.clone(), relative))
    }

    /// Report the most likely holder of the lock on `dir_path`
    pub async fn contention(&self, ctx: &Context, dir_path: &str) -> Contention {
        let queue_dir = self.full_path(&path::join(&[dir_path, LOCKS_PATH]));
        match inspect_queue(ctx, self.store(), &queue_dir).await {
            Contention::Holder { path, contents } => Contention::Holder {
                path: self.relative_path(&path),
                contents,
            },
            other => other,
        }
    }
}
