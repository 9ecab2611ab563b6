//! Service Module
//!
//! Business logic layer for the coordinator.
//! Services orchestrate between repositories, the builder registry and the
//! event broker.

pub mod build;
pub mod catalog;
pub mod dispatch;
pub mod ingest;
pub mod registry;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

// Re-export for convenience
pub use build as build_service;
pub use catalog as catalog_service;
pub use dispatch as dispatch_service;
pub use ingest as ingest_service;
