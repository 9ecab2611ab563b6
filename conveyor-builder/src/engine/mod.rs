//! Container engine
//!
//! The step logic talks to containers through [`ContainerEngine`]; the
//! production implementation drives Docker through bollard.

mod docker;
#[cfg(test)]
pub mod fake;

pub use docker::DockerEngine;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use conveyor_core::domain::task::RegistryAuth;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::emitter::StreamWriter;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),

    #[error("image build failed: {0}")]
    Build(String),

    #[error("image pull failed: {0}")]
    Pull(String),

    #[error("could not read build context: {0}")]
    Context(#[from] std::io::Error),

    #[error("no exit code reported for container {0}")]
    NoExitCode(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Everything needed to create one container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,

    /// `KEY=VALUE` pairs
    pub env: Vec<String>,

    pub working_dir: Option<String>,

    /// `host:container[:mode]` bind mounts
    pub binds: Vec<String>,

    /// `port/proto` entries
    pub exposed_ports: Vec<String>,

    pub network: String,

    /// Name other containers on the network reach this one by
    pub alias: String,
}

/// An image build from a directory of the working tree
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuild {
    pub context: PathBuf,
    pub dockerfile: String,
    pub tags: Vec<String>,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Pulls `image`, writing progress to `output`
    async fn pull_image(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
        output: &StreamWriter,
    ) -> EngineResult<()>;

    /// Builds and tags an image, writing the build output to `output`
    async fn build_image(&self, build: &ImageBuild, output: &StreamWriter) -> EngineResult<()>;

    async fn create_network(&self, name: &str) -> EngineResult<()>;

    async fn remove_network(&self, name: &str) -> EngineResult<()>;

    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<()>;

    async fn start_container(&self, name: &str) -> EngineResult<()>;

    /// Combined stdout and stderr; ends when the container exits
    fn logs<'a>(&'a self, name: &str) -> BoxStream<'a, EngineResult<Bytes>>;

    /// Blocks until the container exits and returns its exit code
    async fn wait_container(&self, name: &str) -> EngineResult<i64>;

    /// Asks the container to stop, killing it after `grace`
    async fn stop_container(&self, name: &str, grace: Duration) -> EngineResult<()>;

    async fn kill_container(&self, name: &str) -> EngineResult<()>;

    async fn remove_container(&self, name: &str) -> EngineResult<()>;
}
