//! Topolock Common - Shared types and utilities
//!
//! This crate provides the foundational types used across all topolock components:
//! - Error taxonomy returned to lock callers
//! - Cancellation/deadline context for blocking calls
//! - Namespace path helpers
//! - Common constants

pub mod context;
pub mod error;
pub mod path;

// Re-exports for convenience
pub use context::{CancelHandle, Context, ContextError};
pub use error::{BoxError, ErrorKind, TopoError};

/// Reserved child of a lock directory holding one queue entry per lock attempt
pub const LOCKS_PATH: &str = "locks";
