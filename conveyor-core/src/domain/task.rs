//! Task definitions
//!
//! A task is an immutable, ordered list of steps plus the parameters and
//! registry credentials they rely on. Tasks are read from YAML or JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::parameter::{BUILTIN_PARAMETERS, Parameter, ResolvedParameters, check_required};
use crate::domain::step::Step;
use crate::error::{TaskError, TaskResult};

const DEFAULT_REGISTRY: &str = "docker.io";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub docker: TaskDocker,

    #[serde(default)]
    pub parameters: Vec<Parameter>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDocker {
    #[serde(default)]
    pub registries: Vec<RegistryConfig>,
}

/// Credentials for one image registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry host, e.g. `ghcr.io` or `registry.local:5000`
    pub address: String,

    /// Name of a resolved parameter holding `username:password`
    pub credentials: String,
}

/// Username and password for a registry, after parameter resolution
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    pub address: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("address", &self.address)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Task {
    pub fn from_yaml(source: &str) -> TaskResult<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn from_json(source: &str) -> TaskResult<Self> {
        Ok(serde_json::from_str(source)?)
    }

    /// Validates the definition before any build is created from it
    ///
    /// Placeholders are checked by name only: derived values are unknown
    /// until a builder resolves them.
    pub fn validate(&self) -> TaskResult<()> {
        if self.name.trim().is_empty() {
            return Err(TaskError::Validation("task name cannot be empty".into()));
        }
        if self.steps.is_empty() {
            return Err(TaskError::Validation(format!(
                "task {} has no steps",
                self.name
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for parameter in &self.parameters {
            if !seen.insert(parameter.name()) {
                return Err(TaskError::Validation(format!(
                    "parameter {} is declared twice",
                    parameter.name()
                )));
            }
        }

        let known = |name: &str| {
            BUILTIN_PARAMETERS.iter().any(|b| *b == name) || self.parameters.iter().any(|p| p.name() == name)
        };

        for registry in &self.docker.registries {
            if !known(registry.credentials.as_str()) {
                return Err(TaskError::MissingParameter(registry.credentials.clone()));
            }
        }

        for (index, step) in self.steps.iter().enumerate() {
            step.check_structure().map_err(|e| match e {
                TaskError::Validation(msg) => TaskError::Validation(format!("step {}: {msg}", index + 1)),
                other => other,
            })?;
            step.check_placeholders(&known)?;
        }

        Ok(())
    }

    /// Validates the definition and the caller overrides for a new build
    pub fn validate_overrides(&self, overrides: &HashMap<String, String>) -> TaskResult<()> {
        self.validate()?;
        check_required(&self.parameters, overrides)
    }

    /// Finds credentials for the registry hosting `image`
    pub fn registry_auth(&self, image: &str, params: &ResolvedParameters) -> Option<RegistryAuth> {
        let host = registry_host(image);
        let registry = self
            .docker
            .registries
            .iter()
            .find(|r| normalize_registry(&r.address) == host)?;

        let raw = params.value(&registry.credentials)?;
        let (username, password) = raw.split_once(':')?;

        Some(RegistryAuth {
            address: registry.address.clone(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Returns the registry host of an image reference
///
/// The first path segment is a host when it contains a `.` or `:` or is
/// `localhost`; otherwise the image lives on the default registry.
pub fn registry_host(image: &str) -> String {
    match image.split_once('/') {
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            first.to_string()
        }
        _ => DEFAULT_REGISTRY.to_string(),
    }
}

fn normalize_registry(address: &str) -> String {
    let address = address
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    match address {
        "index.docker.io" | "registry-1.docker.io" | "registry.hub.docker.com" => {
            DEFAULT_REGISTRY.to_string()
        }
        other => other.to_string(),
    }
}
