//! Repository Module
//!
//! Data access layer for the coordinator.
//! Records live in one key/value space; each repository owns the keys of one
//! kind of record.

pub mod build;
pub mod catalog;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod stream;

// Re-export for convenience
pub use build as build_repository;
pub use catalog as catalog_repository;
pub use stream as stream_repository;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{KvStore, StoreError, StoreResult};
