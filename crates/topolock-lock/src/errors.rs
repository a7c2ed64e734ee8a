//! Translation of store errors and context signals into `TopoError`

use std::future::Future;

use topolock_common::{Context, TopoError};
use topolock_store::StoreError;

use crate::queue::QueueError;

/// Map a store error onto the topology error taxonomy
pub fn convert_error(err: StoreError, node_path: &str) -> TopoError {
    match err {
        StoreError::NoNode(_) => TopoError::NoSuchResource(node_path.to_string()),
        StoreError::NodeExists(_) => TopoError::NodeExists(node_path.to_string()),
        StoreError::BadVersion { .. } => TopoError::BadVersion(node_path.to_string()),
        other => TopoError::store_failure(node_path, other),
    }
}

/// Classify why waiting for the queue failed
pub(crate) fn classify(err: QueueError, node_path: &str) -> TopoError {
    match err {
        QueueError::Context(err) => TopoError::from_context(err, node_path),
        QueueError::Store(err) => convert_error(err, node_path),
        other => TopoError::store_failure(node_path, other),
    }
}

/// Run a store call under `ctx`, translating both failure channels
pub(crate) async fn guarded<T, F>(ctx: &Context, node_path: &str, call: F) -> Result<T, TopoError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    ctx.run(call)
        .await
        .map_err(|err| TopoError::from_context(err, node_path))?
        .map_err(|err| convert_error(err, node_path))
}
