//! Contention diagnostics
//!
//! After an attempt fails, the queue is inspected so operators can see who
//! is most likely holding the lock. Nothing here affects the error returned
//! to the caller; every failure is logged and swallowed.

use tracing::warn;

use topolock_common::{Context, path};
use topolock_store::CoordinationStore;

use crate::errors::guarded;
use crate::queue::rank;

/// What the queue looked like when it was inspected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contention {
    /// Nobody is queued; retrying right away is likely to succeed
    QueueEmpty,
    /// The lowest queued entry and the reason it was taken with
    Holder { path: String, contents: String },
    /// The queue could not be inspected
    Unknown,
}

/// Inspect `queue_dir` and log the most likely blocking entry
pub(crate) async fn inspect_queue(
    ctx: &Context,
    store: &dyn CoordinationStore,
    queue_dir: &str,
) -> Contention {
    let children = match guarded(ctx, queue_dir, store.children(queue_dir)).await {
        Ok(children) => children,
        Err(err) => {
            warn!("Failed to get children of {}: {}", queue_dir, err);
            return Contention::Unknown;
        }
    };

    let Some((_, first)) = rank(children).into_iter().next() else {
        warn!("No other locks present, you may just try again now.");
        return Contention::QueueEmpty;
    };

    let child_path = path::join(&[queue_dir, &first]);
    match guarded(ctx, &child_path, store.get(&child_path)).await {
        Ok((data, _)) => {
            let contents = String::from_utf8_lossy(&data).into_owned();
            warn!("------ Most likely blocking lock: {}\n{}", child_path, contents);
            Contention::Holder {
                path: child_path,
                contents,
            }
        }
        Err(err) => {
            warn!(
                "Failed to get first locks node {} (may have just ended): {}",
                child_path, err
            );
            Contention::Unknown
        }
    }
}
