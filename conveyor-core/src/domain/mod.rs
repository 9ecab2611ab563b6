//! Core domain types
//!
//! These types are shared between the coordinator (which persists them) and
//! the builders (which execute them).

pub mod build;
pub mod builder;
pub mod parameter;
pub mod project;
pub mod step;
pub mod task;
