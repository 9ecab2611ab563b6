//! Service layer
//!
//! Services contain business logic for the builder. They are trait-based so
//! the session can be exercised without a container engine.

mod execution;

// Re-export traits
pub use execution::ExecutionService;

// Re-export implementations
pub use execution::StandardExecutionService;
