use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bollard::{
    Docker,
    auth::DockerCredentials,
    container::{
        Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
        NetworkingConfig, RemoveContainerOptions, StopContainerOptions,
    },
    errors::Error::DockerContainerWaitError,
    image::{BuildImageOptions, CreateImageOptions, TagImageOptions},
    network::CreateNetworkOptions,
    secret::{EndpointSettings, HostConfig},
};
use bytes::Bytes;
use conveyor_core::domain::task::RegistryAuth;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};

use super::{ContainerEngine, ContainerSpec, EngineError, EngineResult, ImageBuild};
use crate::emitter::StreamWriter;

/// Docker daemon reached over the local socket
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn connect() -> EngineResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    pub async fn check_available(&self) -> EngineResult<()> {
        let version = self.docker.version().await?;
        tracing::info!(
            "Docker is available: {}",
            version.version.unwrap_or_else(|| "unknown version".to_string())
        );
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn pull_image(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
        output: &StreamWriter,
    ) -> EngineResult<()> {
        let (from_image, tag) = split_tag(image);
        let credentials = auth.map(|auth| DockerCredentials {
            username: Some(auth.username.clone()),
            password: Some(auth.password.clone()),
            serveraddress: Some(auth.address.clone()),
            ..Default::default()
        });

        let mut progress = self.docker.create_image(
            Some(CreateImageOptions {
                from_image,
                tag,
                ..Default::default()
            }),
            None,
            credentials,
        );

        while let Some(info) = progress.try_next().await? {
            if let Some(error) = info.error {
                return Err(EngineError::Pull(error));
            }
            // Per-layer download progress is too chatty for the stream
            if info.progress.is_none()
                && let Some(status) = info.status
            {
                match info.id {
                    Some(id) => output.line(&format!("{id}: {status}")),
                    None => output.line(&status),
                }
            }
        }

        Ok(())
    }

    async fn build_image(&self, build: &ImageBuild, output: &StreamWriter) -> EngineResult<()> {
        let context = build.context.clone();
        let tarball = tokio::task::spawn_blocking(move || archive(&context))
            .await
            .map_err(|e| EngineError::Build(e.to_string()))??;

        let first_tag = build.tags.first().cloned().unwrap_or_default();
        let mut stream = self.docker.build_image(
            BuildImageOptions {
                dockerfile: build.dockerfile.clone(),
                t: first_tag.clone(),
                rm: true,
                ..Default::default()
            },
            None,
            Some(tarball.into()),
        );

        while let Some(info) = stream.try_next().await? {
            if let Some(error) = info.error {
                return Err(EngineError::Build(error));
            }
            if let Some(text) = info.stream {
                output.write(text.as_bytes());
            }
        }
        output.flush();

        for tag in build.tags.iter().skip(1) {
            let (repo, version) = split_tag(tag);
            self.docker
                .tag_image(
                    &first_tag,
                    Some(TagImageOptions {
                        repo,
                        tag: version,
                    }),
                )
                .await?;
            output.line(&format!("Tagged {tag}"));
        }

        Ok(())
    }

    async fn create_network(&self, name: &str) -> EngineResult<()> {
        let mut labels = HashMap::new();
        labels.insert("owner", "conveyor");

        self.docker
            .create_network(CreateNetworkOptions {
                name,
                driver: "bridge",
                labels,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> EngineResult<()> {
        Ok(self.docker.remove_network(name).await?)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<()> {
        let exposed_ports = spec
            .exposed_ports
            .iter()
            .map(|port| (port.clone(), HashMap::new()))
            .collect::<HashMap<_, _>>();

        let mut endpoints = HashMap::new();
        endpoints.insert(
            spec.network.clone(),
            EndpointSettings {
                aliases: Some(vec![spec.alias.clone()]),
                ..Default::default()
            },
        );

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                Config {
                    image: Some(spec.image.clone()),
                    cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
                    env: Some(spec.env.clone()),
                    working_dir: spec.working_dir.clone(),
                    exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
                    host_config: Some(HostConfig {
                        binds: Some(spec.binds.clone()),
                        ..Default::default()
                    }),
                    networking_config: Some(NetworkingConfig {
                        endpoints_config: endpoints,
                    }),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn start_container(&self, name: &str) -> EngineResult<()> {
        Ok(self.docker.start_container::<String>(name, None).await?)
    }

    fn logs<'a>(&'a self, name: &str) -> BoxStream<'a, EngineResult<Bytes>> {
        self.docker
            .logs(
                name,
                Some(LogsOptions::<String> {
                    follow: true,
                    stdout: true,
                    stderr: true,
                    tail: "all".to_string(),
                    ..Default::default()
                }),
            )
            .map(|chunk| {
                chunk
                    .map(|log| match log {
                        LogOutput::Console { message } => message,
                        LogOutput::StdOut { message } => message,
                        LogOutput::StdErr { message } => message,
                        LogOutput::StdIn { message } => message,
                    })
                    .map_err(EngineError::from)
            })
            .boxed()
    }

    async fn wait_container(&self, name: &str) -> EngineResult<i64> {
        let result = self
            .docker
            .wait_container::<String>(name, None)
            .try_collect::<Vec<_>>()
            .await;

        match result {
            Ok(responses) => responses
                .first()
                .map(|response| response.status_code)
                .ok_or_else(|| EngineError::NoExitCode(name.to_string())),
            Err(DockerContainerWaitError { code, .. }) => Ok(code),
            Err(e) => Err(e.into()),
        }
    }

    async fn stop_container(&self, name: &str, grace: Duration) -> EngineResult<()> {
        Ok(self
            .docker
            .stop_container(
                name,
                Some(StopContainerOptions {
                    t: grace.as_secs() as i64,
                }),
            )
            .await?)
    }

    async fn kill_container(&self, name: &str) -> EngineResult<()> {
        Ok(self
            .docker
            .kill_container(
                name,
                Some(KillContainerOptions {
                    signal: "SIGKILL".to_string(),
                }),
            )
            .await?)
    }

    async fn remove_container(&self, name: &str) -> EngineResult<()> {
        Ok(self
            .docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?)
    }
}

/// Splits `repo[:tag]`; a colon inside the registry host is not a tag
fn split_tag(image: &str) -> (String, String) {
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => (
            image[..name_start + i].to_string(),
            image[name_start + i + 1..].to_string(),
        ),
        None => (image.to_string(), "latest".to_string()),
    }
}

fn archive(context: &Path) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", context)?;
    builder.into_inner()
}
