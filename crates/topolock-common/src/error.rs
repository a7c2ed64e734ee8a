//! Error types for topolock
//!
//! This module defines:
//! - `TopoError`: the error returned by every lock and namespace operation
//! - `ErrorKind`: a `Copy` discriminant for matching without destructuring

use crate::context::ContextError;

/// Boxed error used to carry store-level causes across crate boundaries
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error kinds surfaced to lock callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AlreadyLocked,
    NodeExists,
    NoSuchResource,
    BadVersion,
    Timeout,
    Interrupted,
    StoreFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AlreadyLocked => "already_locked",
            ErrorKind::NodeExists => "node_exists",
            ErrorKind::NoSuchResource => "no_such_resource",
            ErrorKind::BadVersion => "bad_version",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::StoreFailure => "store_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Topology/lock error, always carrying the path it refers to
#[derive(thiserror::Error, Debug)]
pub enum TopoError {
    #[error("lock already exists at path {0}")]
    AlreadyLocked(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("node doesn't exist: {0}")]
    NoSuchResource(String),

    #[error("bad node version: {0}")]
    BadVersion(String),

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("interrupted: {0}")]
    Interrupted(String),

    #[error("store operation failed on {path}: {source}")]
    StoreFailure {
        path: String,
        #[source]
        source: BoxError,
    },
}

impl TopoError {
    /// Wrap any store-level error with the path that was being operated on
    pub fn store_failure(path: impl Into<String>, source: impl Into<BoxError>) -> Self {
        TopoError::StoreFailure {
            path: path.into(),
            source: source.into(),
        }
    }

    /// Translate a cancellation/deadline signal
    pub fn from_context(err: ContextError, path: impl Into<String>) -> Self {
        match err {
            ContextError::DeadlineExceeded => TopoError::Timeout(path.into()),
            ContextError::Canceled => TopoError::Interrupted(path.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TopoError::AlreadyLocked(_) => ErrorKind::AlreadyLocked,
            TopoError::NodeExists(_) => ErrorKind::NodeExists,
            TopoError::NoSuchResource(_) => ErrorKind::NoSuchResource,
            TopoError::BadVersion(_) => ErrorKind::BadVersion,
            TopoError::Timeout(_) => ErrorKind::Timeout,
            TopoError::Interrupted(_) => ErrorKind::Interrupted,
            TopoError::StoreFailure { .. } => ErrorKind::StoreFailure,
        }
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind() == kind
    }

    /// Path the error refers to
    pub fn path(&self) -> &str {
        match self {
            TopoError::AlreadyLocked(path)
            | TopoError::NodeExists(path)
            | TopoError::NoSuchResource(path)
            | TopoError::BadVersion(path)
            | TopoError::Timeout(path)
            | TopoError::Interrupted(path) => path,
            TopoError::StoreFailure { path, .. } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_context() {
        let err = TopoError::from_context(ContextError::DeadlineExceeded, "/a/locks/0000000001");
        assert!(err.is_kind(ErrorKind::Timeout));
        assert_eq!(err.path(), "/a/locks/0000000001");

        let err = TopoError::from_context(ContextError::Canceled, "/a/locks/0000000002");
        assert!(err.is_kind(ErrorKind::Interrupted));
    }

    #[test]
    fn test_store_failure_keeps_source() {
        let io = std::io::Error::other("connection reset");
        let err = TopoError::store_failure("/a/locks/0000000003", io);
        assert_eq!(err.kind(), ErrorKind::StoreFailure);
        assert_eq!(err.path(), "/a/locks/0000000003");
        assert!(err.to_string().contains("connection reset"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::AlreadyLocked.to_string(), "already_locked");
        assert_eq!(ErrorKind::NoSuchResource.as_str(), "no_such_resource");
    }
}
