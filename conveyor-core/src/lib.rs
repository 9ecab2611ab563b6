//! Conveyor Core
//!
//! Core types and abstractions for the Conveyor CI/CD system.
//!
//! This crate contains:
//! - Domain types: tasks, steps, parameters, builds, builders
//! - DTOs: messages exchanged between the coordinator and builders
//! - Template substitution and service ordering shared by both sides

pub mod domain;
pub mod dto;
pub mod error;
pub mod order;
pub mod template;

pub use error::{TaskError, TaskResult};
