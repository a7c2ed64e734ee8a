//! Queue lock recipe
//!
//! Every attempt owns one ephemeral sequential entry under the queue path.
//! The entry with the lowest sequence holds the lock; every other entry
//! watches its next-lower sibling and re-ranks once that sibling is gone.

use std::time::Duration;

use tracing::debug;

use topolock_common::{Context, ContextError, path};
use topolock_store::{CoordinationStore, SEQUENCE_DIGITS, StoreError};

#[derive(thiserror::Error, Debug)]
pub(crate) enum QueueError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("empty queue node: {0}")]
    EmptyQueue(String),

    #[error("queue entry no longer present: {0}")]
    EntryMissing(String),
}

/// Sequence number of a queue entry name, taken from its trailing digits
pub(crate) fn sequence_of(name: &str) -> Option<u64> {
    let start = name.len().checked_sub(SEQUENCE_DIGITS)?;
    let suffix = name.get(start..)?;
    if !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Order queue entries by sequence; names without a suffix are ignored
pub(crate) fn rank(children: Vec<String>) -> Vec<(u64, String)> {
    let mut ranked: Vec<(u64, String)> = children
        .into_iter()
        .filter_map(|name| sequence_of(&name).map(|seq| (seq, name)))
        .collect();
    ranked.sort_unstable();
    ranked
}

/// Wait until `node_path` holds the lowest sequence in its queue
///
/// Only `ctx` bounds the wait. When the store has no watches, the queue is
/// re-ranked every `poll_interval`.
pub(crate) async fn obtain_queue_lock(
    ctx: &Context,
    store: &dyn CoordinationStore,
    node_path: &str,
    poll_interval: Duration,
) -> Result<(), QueueError> {
    let queue_dir = path::parent(node_path);
    let own = path::base(node_path);

    loop {
        let children = ctx.run(store.children(queue_dir)).await??;
        let ranked = rank(children);

        let predecessor = match ranked.iter().position(|(_, name)| name == own) {
            Some(0) => return Ok(()),
            Some(idx) => &ranked[idx - 1].1,
            None if ranked.is_empty() => {
                return Err(QueueError::EmptyQueue(queue_dir.to_string()));
            }
            None => return Err(QueueError::EntryMissing(node_path.to_string())),
        };
        let predecessor_path = path::join(&[queue_dir, predecessor]);

        match ctx.run(store.watch_removal(&predecessor_path)).await? {
            Ok(watch) if watch.is_fired() => {
                debug!(node = %node_path, predecessor = %predecessor_path, "Predecessor already gone");
            }
            Ok(watch) => {
                debug!(node = %node_path, predecessor = %predecessor_path, "Waiting for predecessor");
                ctx.run(watch.wait()).await?;
            }
            Err(StoreError::Unimplemented(_)) => {
                ctx.run(tokio::time::sleep(poll_interval)).await?;
            }
            Err(err) => return Err(err.into()),
        }
    }
}
