//! Step model
//!
//! Steps form a closed set of container workloads. Every variant offers the
//! same contract: structural validation, placeholder validation against the
//! resolved parameters, substitution into a fresh copy, and the list of
//! output streams it writes to.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::parameter::ResolvedParameters;
use crate::error::{TaskError, TaskResult};
use crate::order::service_order;
use crate::template::{check_known, missing_to_error, substitute};

pub const DEFAULT_MOUNT_POINT: &str = "/conveyor_ci";
pub const RUN_STREAM: &str = "run";
pub const BUILD_STREAM: &str = "build";

/// A single unit of work in a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Step {
    /// Run one container to completion
    Run(ContainerRun),

    /// Build an image; nothing is run
    Build(ContainerBuild),

    /// Run several linked services until the first one exits
    #[serde(alias = "compose")]
    Stack(ContainerStack),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRun {
    #[serde(default)]
    pub description: String,

    pub image: String,

    #[serde(default, deserialize_with = "deserialize_command")]
    pub command: Vec<String>,

    #[serde(default, deserialize_with = "deserialize_environment")]
    pub environment: BTreeMap<String, String>,

    /// Relative to the mount point
    #[serde(default)]
    pub working_dir: String,

    #[serde(default = "default_mount_point")]
    pub mount_point: String,

    #[serde(default, alias = "ignoreExit")]
    pub ignore_exit_code: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerBuild {
    #[serde(default)]
    pub description: String,

    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,

    #[serde(default = "default_context")]
    pub context: String,

    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStack {
    #[serde(default)]
    pub description: String,

    pub services: BTreeMap<String, ServiceDefinition>,
}

/// One container of a stack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    #[serde(default)]
    pub image: String,

    /// Build the image from the working tree instead of pulling it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<ServiceBuild>,

    #[serde(default, alias = "workingDir")]
    pub working_dir: String,

    #[serde(default, deserialize_with = "deserialize_command")]
    pub command: Vec<String>,

    /// Services that must be created before this one
    #[serde(default)]
    pub links: Vec<String>,

    #[serde(default, deserialize_with = "deserialize_environment")]
    pub environment: BTreeMap<String, String>,

    /// `host:container` bind mounts; relative host paths are taken from the working tree
    #[serde(default)]
    pub volumes: Vec<String>,

    #[serde(default)]
    pub expose: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceBuild {
    #[serde(default = "default_context")]
    pub context: String,

    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
}

fn default_mount_point() -> String {
    DEFAULT_MOUNT_POINT.to_string()
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

fn default_context() -> String {
    ".".to_string()
}

impl Step {
    pub fn description(&self) -> &str {
        match self {
            Step::Run(s) => &s.description,
            Step::Build(s) => &s.description,
            Step::Stack(s) => &s.description,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Step::Run(_) => "run",
            Step::Build(_) => "build",
            Step::Stack(_) => "stack",
        }
    }

    /// Names of the streams this step writes to
    pub fn output_streams(&self) -> Vec<String> {
        match self {
            Step::Run(_) => vec![RUN_STREAM.to_string()],
            Step::Build(_) => vec![BUILD_STREAM.to_string()],
            Step::Stack(s) => s.services.keys().cloned().collect(),
        }
    }

    /// Checks the shape of the step, independent of parameter values
    pub fn check_structure(&self) -> TaskResult<()> {
        match self {
            Step::Run(run) => {
                if run.image.trim().is_empty() {
                    return Err(TaskError::Validation("run step needs an image".into()));
                }
                if !run.mount_point.starts_with('/') && !run.mount_point.starts_with("${") {
                    return Err(TaskError::Validation(format!(
                        "mount point {} must be an absolute path",
                        run.mount_point
                    )));
                }
            }
            Step::Build(build) => {
                if build.dockerfile.trim().is_empty() {
                    return Err(TaskError::Validation("build step needs a dockerfile".into()));
                }
            }
            Step::Stack(stack) => {
                if stack.services.is_empty() {
                    return Err(TaskError::Validation(
                        "stack step needs at least one service".into(),
                    ));
                }
                for (name, service) in &stack.services {
                    if service.image.trim().is_empty() && service.build.is_none() {
                        return Err(TaskError::Validation(format!(
                            "service {name} needs an image or a build section"
                        )));
                    }
                }
                service_order(&stack.links())?;
            }
        }
        Ok(())
    }

    /// Checks that every placeholder names a known parameter
    pub fn check_placeholders(&self, known: &impl Fn(&str) -> bool) -> TaskResult<()> {
        let mut missing = BTreeSet::new();
        for field in self.templated_fields() {
            check_known(field, known, &mut missing);
        }
        missing_to_error(missing)
    }

    /// Full validation against the parameters of one run
    pub fn validate(&self, params: &ResolvedParameters) -> TaskResult<()> {
        self.check_structure()?;
        self.check_placeholders(&|name: &str| params.contains(name))
    }

    /// Returns a copy with every placeholder substituted
    pub fn set_params(&self, params: &ResolvedParameters) -> Step {
        let sub = |s: &String| substitute(s, params);
        match self {
            Step::Run(run) => Step::Run(ContainerRun {
                description: run.description.clone(),
                image: sub(&run.image),
                command: run.command.iter().map(sub).collect(),
                environment: substitute_map(&run.environment, params),
                working_dir: sub(&run.working_dir),
                mount_point: sub(&run.mount_point),
                ignore_exit_code: run.ignore_exit_code,
            }),
            Step::Build(build) => Step::Build(ContainerBuild {
                description: build.description.clone(),
                dockerfile: sub(&build.dockerfile),
                context: sub(&build.context),
                tags: build.tags.iter().map(sub).collect(),
            }),
            Step::Stack(stack) => Step::Stack(ContainerStack {
                description: stack.description.clone(),
                services: stack
                    .services
                    .iter()
                    .map(|(name, service)| (name.clone(), service.set_params(params)))
                    .collect(),
            }),
        }
    }

    fn templated_fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        match self {
            Step::Run(run) => {
                fields.push(run.image.as_str());
                fields.push(run.working_dir.as_str());
                fields.push(run.mount_point.as_str());
                fields.extend(run.command.iter().map(String::as_str));
                push_map(&mut fields, &run.environment);
            }
            Step::Build(build) => {
                fields.push(build.dockerfile.as_str());
                fields.push(build.context.as_str());
                fields.extend(build.tags.iter().map(String::as_str));
            }
            Step::Stack(stack) => {
                for service in stack.services.values() {
                    service.templated_fields(&mut fields);
                }
            }
        }
        fields
    }
}

impl ContainerStack {
    /// Link graph handed to the service scheduler
    pub fn links(&self) -> BTreeMap<String, Vec<String>> {
        self.services
            .iter()
            .map(|(name, service)| (name.clone(), service.links.clone()))
            .collect()
    }
}

impl ServiceDefinition {
    fn set_params(&self, params: &ResolvedParameters) -> ServiceDefinition {
        let sub = |s: &String| substitute(s, params);
        ServiceDefinition {
            image: sub(&self.image),
            build: self.build.as_ref().map(|b| ServiceBuild {
                context: sub(&b.context),
                dockerfile: sub(&b.dockerfile),
            }),
            working_dir: sub(&self.working_dir),
            command: self.command.iter().map(sub).collect(),
            links: self.links.clone(),
            environment: substitute_map(&self.environment, params),
            volumes: self.volumes.iter().map(sub).collect(),
            expose: self.expose.iter().map(sub).collect(),
        }
    }

    fn templated_fields<'a>(&'a self, fields: &mut Vec<&'a str>) {
        fields.push(self.image.as_str());
        fields.push(self.working_dir.as_str());
        if let Some(build) = &self.build {
            fields.push(build.context.as_str());
            fields.push(build.dockerfile.as_str());
        }
        fields.extend(self.command.iter().map(String::as_str));
        fields.extend(self.volumes.iter().map(String::as_str));
        fields.extend(self.expose.iter().map(String::as_str));
        push_map(fields, &self.environment);
    }
}

fn substitute_map(
    map: &BTreeMap<String, String>,
    params: &ResolvedParameters,
) -> BTreeMap<String, String> {
    map.iter()
        .map(|(k, v)| (substitute(k, params), substitute(v, params)))
        .collect()
}

fn push_map<'a>(fields: &mut Vec<&'a str>, map: &'a BTreeMap<String, String>) {
    for (k, v) in map {
        fields.push(k.as_str());
        fields.push(v.as_str());
    }
}

// =============================================================================
// Flexible input shapes
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum CommandInput {
    Line(String),
    Args(Vec<String>),
}

/// Accepts `["sh", "-c", "make"]` or a shell-style string such as `sh -c "make test"`
fn deserialize_command<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match CommandInput::deserialize(deserializer)? {
        CommandInput::Line(line) => shell_words::split(&line).map_err(serde::de::Error::custom),
        CommandInput::Args(args) => Ok(args),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Flag(bool),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Integer(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Flag(b) => b.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EnvironmentInput {
    Map(BTreeMap<String, Option<Scalar>>),
    List(Vec<String>),
}

/// Accepts a map (scalar values are stringified) or a `KEY=VALUE` list
fn deserialize_environment<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    match EnvironmentInput::deserialize(deserializer)? {
        EnvironmentInput::Map(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, v.map(Scalar::into_string).unwrap_or_default()))
            .collect()),
        EnvironmentInput::List(entries) => Ok(entries
            .into_iter()
            .map(|entry| match entry.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (entry, String::new()),
            })
            .collect()),
    }
}
