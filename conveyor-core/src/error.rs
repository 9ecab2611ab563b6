//! Task definition errors

use thiserror::Error;

/// Errors raised while parsing, validating or parameterizing a task
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task or one of its steps is structurally invalid
    #[error("invalid task definition: {0}")]
    Validation(String),

    /// A `${name}` placeholder or a required parameter has no value
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    /// A derived parameter could not be computed
    #[error("could not resolve parameter {name}: {reason}")]
    ParameterResolution { name: String, reason: String },

    /// Service links form a cycle; the path ends where it started
    #[error("dependency cycle between services: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// A service links to a name that is not declared in the same step
    #[error("service {service} links to unknown service {link}")]
    UnknownService { service: String, link: String },

    #[error("could not parse task: {0}")]
    Parse(String),
}

impl From<serde_yaml::Error> for TaskError {
    fn from(err: serde_yaml::Error) -> Self {
        TaskError::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::Parse(err.to_string())
    }
}

pub type TaskResult<T> = std::result::Result<T, TaskError>;
