//! Topolock Store - coordination store contract
//!
//! This crate provides:
//! - The `CoordinationStore` trait lock recipes are written against
//! - Sequential/ephemeral create modes, node stats and removal watches
//! - `create_recursive` for materializing missing parent directories
//! - `MemoryStore`, an in-process store with sessions used by tests and demos

mod error;
mod memory;
mod store;

pub use error::StoreError;
pub use memory::{MemorySession, MemoryStore};
pub use store::*;
