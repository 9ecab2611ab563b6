use conveyor_core::TaskError;
use thiserror::Error;

use crate::engine::EngineError;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("no output stream named {0}")]
    MissingStream(String),

    #[error("build has {got} step(s) but its task has {expected}")]
    StepMismatch { expected: usize, got: usize },

    #[error("could not prepare workspace: {0}")]
    Workspace(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
