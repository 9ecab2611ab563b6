//! Data Transfer Objects for inter-service communication
//!
//! Messages exchanged between the coordinator, builders and API clients.
//! DTOs are plain serde types; behavior lives in `domain`.

pub mod build;
pub mod event;
pub mod protocol;
