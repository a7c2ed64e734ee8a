//! Topolock Lock - fair distributed locks on a coordination store
//!
//! This crate provides:
//! - `TopoServer`, a root-scoped view over a coordination store session
//! - The queue lock recipe: one ephemeral sequential entry per attempt,
//!   promoted when it holds the lowest sequence among its siblings
//! - Cleanup and contention diagnostics for failed attempts
//! - Lock descriptors for checking and releasing held locks

pub mod config;
pub mod descriptor;
pub mod diagnostics;
mod errors;
pub mod lock;
mod queue;
pub mod server;

pub use config::LockConfig;
pub use descriptor::{LockDescriptor, QueueLockDescriptor};
pub use diagnostics::Contention;
pub use errors::convert_error;
pub use lock::LockConn;
pub use server::{DirEntry, EntryType, TopoServer};

pub use topolock_common::{Context, ErrorKind, TopoError};
