//! Service runner
//!
//! Drives one container through pull (or build), create, run, stop and
//! remove. Runners of the same step share a [`CancellationToken`]: the
//! first container to exit on its own cancels it, and every other runner
//! then stops its container.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use conveyor_core::domain::step::{ContainerRun, RUN_STREAM, ServiceDefinition};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::emitter::StreamWriter;
use crate::engine::{ContainerSpec, ImageBuild};
use crate::error::Result;
use crate::step::StepContext;

/// Extra time given to the engine to carry out a graceful stop
const STOP_SLACK: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Pull(String),
    Build(ImageBuild),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceExit {
    pub code: i64,

    /// Stopped because a sibling exited; the code does not count
    pub stopped: bool,
}

pub struct ServiceRunner<'a> {
    ctx: &'a StepContext<'a>,
    writer: &'a StreamWriter,
    source: ImageSource,
    spec: ContainerSpec,
    created: AtomicBool,
}

impl<'a> ServiceRunner<'a> {
    pub fn new(
        ctx: &'a StepContext<'a>,
        writer: &'a StreamWriter,
        source: ImageSource,
        spec: ContainerSpec,
    ) -> Self {
        Self {
            ctx,
            writer,
            source,
            spec,
            created: AtomicBool::new(false),
        }
    }

    /// Runner for the single container of a run step
    pub fn for_run(ctx: &'a StepContext<'a>, run: &ContainerRun, writer: &'a StreamWriter) -> Self {
        let mount_point = run.mount_point.trim_end_matches('/');
        let working_dir = match run.working_dir.trim_matches('/') {
            "" => mount_point.to_string(),
            dir => format!("{mount_point}/{dir}"),
        };

        let spec = ContainerSpec {
            name: ctx.container_name(RUN_STREAM),
            image: run.image.clone(),
            command: run.command.clone(),
            env: environment(&run.environment),
            working_dir: Some(working_dir),
            binds: vec![format!("{}:{}", ctx.workspace.display(), run.mount_point)],
            exposed_ports: Vec::new(),
            network: ctx.network_name(),
            alias: RUN_STREAM.to_string(),
        };

        Self::new(ctx, writer, ImageSource::Pull(run.image.clone()), spec)
    }

    /// Runner for one service of a stack step
    pub fn for_service(
        ctx: &'a StepContext<'a>,
        name: &str,
        service: &ServiceDefinition,
        writer: &'a StreamWriter,
    ) -> Self {
        let (source, image) = match &service.build {
            Some(build) => {
                let tag = format!("conveyor-{}", ctx.container_name(name)).to_lowercase();
                let source = ImageSource::Build(ImageBuild {
                    context: ctx.workspace.join(&build.context),
                    dockerfile: build.dockerfile.clone(),
                    tags: vec![tag.clone()],
                });
                (source, tag)
            }
            None => (ImageSource::Pull(service.image.clone()), service.image.clone()),
        };

        let spec = ContainerSpec {
            name: ctx.container_name(name),
            image,
            command: service.command.clone(),
            env: environment(&service.environment),
            working_dir: (!service.working_dir.is_empty()).then(|| service.working_dir.clone()),
            binds: service
                .volumes
                .iter()
                .map(|volume| bind(ctx.workspace, volume))
                .collect(),
            exposed_ports: service.expose.iter().map(|port| exposed_port(port)).collect(),
            network: ctx.network_name(),
            alias: name.to_string(),
        };

        Self::new(ctx, writer, source, spec)
    }

    pub fn name(&self) -> &str {
        &self.spec.alias
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub async fn pull_or_build(&self) -> Result<()> {
        match &self.source {
            ImageSource::Pull(image) => {
                let auth = self.ctx.task.registry_auth(image, self.ctx.params);
                self.ctx
                    .engine
                    .pull_image(image, auth.as_ref(), self.writer)
                    .await?;
            }
            ImageSource::Build(build) => {
                self.ctx.engine.build_image(build, self.writer).await?;
            }
        }
        Ok(())
    }

    pub async fn create(&self) -> Result<()> {
        self.ctx.engine.create_container(&self.spec).await?;
        self.created.store(true, Ordering::SeqCst);
        self.writer.line(&format!("Created {}", self.spec.alias));
        Ok(())
    }

    /// Starts the container and blocks until it exits or `stop` is cancelled
    ///
    /// Output is streamed line by line to the service's writer. On its own
    /// exit the runner cancels `stop` so its siblings shut down.
    pub async fn run(&self, stop: &CancellationToken) -> Result<ServiceExit> {
        let engine = self.ctx.engine;
        let name = &self.spec.name;

        if let Err(e) = engine.start_container(name).await {
            stop.cancel();
            return Err(e.into());
        }

        let pump = async {
            let mut output = engine.logs(name);
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(bytes) => self.writer.write(&bytes),
                    Err(e) => {
                        tracing::warn!("Lost output of {}: {}", name, e);
                        break;
                    }
                }
            }
            self.writer.flush();
        };

        let exit = async {
            tokio::select! {
                biased;
                code = engine.wait_container(name) => {
                    code.map(|code| ServiceExit { code, stopped: false })
                }
                _ = stop.cancelled() => {
                    self.stop().await;
                    engine
                        .wait_container(name)
                        .await
                        .map(|code| ServiceExit { code, stopped: true })
                }
            }
        };

        let ((), exit) = tokio::join!(pump, exit);

        // First one out stops the rest
        stop.cancel();

        let exit = exit?;
        if !exit.stopped {
            tracing::debug!("{} exited with {}", name, exit.code);
        }
        Ok(exit)
    }

    /// Stops the container, killing it when the grace period runs out
    pub async fn stop(&self) {
        let engine = self.ctx.engine;
        let name = &self.spec.name;
        let grace = self.ctx.stop_grace;

        match tokio::time::timeout(grace + STOP_SLACK, engine.stop_container(name, grace)).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => tracing::warn!("Could not stop {}: {}", name, e),
            Err(_) => tracing::warn!("Timed out stopping {}", name),
        }

        if let Err(e) = engine.kill_container(name).await {
            tracing::warn!("Could not kill {}: {}", name, e);
        }
    }

    /// Removes the container if it was created
    pub async fn remove(&self) {
        if !self.created.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.ctx.engine.remove_container(&self.spec.name).await {
            tracing::warn!("Could not remove {}: {}", self.spec.name, e);
        }
    }
}

fn environment(env: &std::collections::BTreeMap<String, String>) -> Vec<String> {
    env.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

/// `./data:/data` binds a directory of the working tree; anything else is
/// passed through
fn bind(workspace: &Path, volume: &str) -> String {
    match volume.split_once(':') {
        Some((host, rest)) if host.starts_with('.') => {
            format!("{}:{}", workspace.join(host).display(), rest)
        }
        _ => volume.to_string(),
    }
}

fn exposed_port(port: &str) -> String {
    if port.contains('/') {
        port.to_string()
    } else {
        format!("{port}/tcp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::{FakeEngine, FakeExit};
    use crate::step::testing::{context, task, writers};
    use conveyor_core::domain::parameter::ResolvedParameters;

    #[test]
    fn test_bind_relative_paths() {
        let workspace = Path::new("/work/p1");
        assert_eq!(bind(workspace, "./data:/data"), "/work/p1/./data:/data");
        assert_eq!(bind(workspace, "/var/run:/run:ro"), "/var/run:/run:ro");
        assert_eq!(bind(workspace, "cache:/cache"), "cache:/cache");
    }

    #[test]
    fn test_exposed_port() {
        assert_eq!(exposed_port("5432"), "5432/tcp");
        assert_eq!(exposed_port("53/udp"), "53/udp");
    }

    #[tokio::test]
    async fn test_run_container_spec() {
        let engine = FakeEngine::new();
        let task = task();
        let params = ResolvedParameters::default();
        let ctx = context(&engine, &task, &params, Path::new("/work/p1"));
        let (writers, _rx) = writers(&["run"]);

        let run: ContainerRun = serde_yaml::from_str(
            "image: golang:1.22\ncommand: go test ./...\nworkingDir: src\nenvironment:\n  CI: true\n",
        )
        .unwrap();
        let runner = ServiceRunner::for_run(&ctx, &run, writers.get("run").unwrap());

        let spec = runner.spec();
        assert_eq!(spec.name, "b1-0-run");
        assert_eq!(spec.working_dir.as_deref(), Some("/conveyor_ci/src"));
        assert_eq!(spec.binds, vec!["/work/p1:/conveyor_ci"]);
        assert_eq!(spec.command, vec!["go", "test", "./..."]);
        assert_eq!(spec.env, vec!["CI=true"]);
        assert_eq!(spec.network, "conveyor-b1-0");
    }

    #[tokio::test]
    async fn test_stop_broadcast_reaches_sibling() {
        let engine = FakeEngine::new()
            .exit("web", FakeExit::Code(0))
            .exit("db", FakeExit::UntilStopped);
        let task = task();
        let params = ResolvedParameters::default();
        let ctx = context(&engine, &task, &params, Path::new("/work"));
        let (writers, _rx) = writers(&["db", "web"]);

        let db = ServiceDefinition {
            image: "postgres:16".into(),
            ..Default::default()
        };
        let web = ServiceDefinition {
            image: "app".into(),
            ..Default::default()
        };
        let db = ServiceRunner::for_service(&ctx, "db", &db, writers.get("db").unwrap());
        let web = ServiceRunner::for_service(&ctx, "web", &web, writers.get("web").unwrap());
        db.create().await.unwrap();
        web.create().await.unwrap();

        let stop = CancellationToken::new();
        let (db_exit, web_exit) = tokio::join!(db.run(&stop), web.run(&stop));

        assert_eq!(web_exit.unwrap(), ServiceExit { code: 0, stopped: false });
        let db_exit = db_exit.unwrap();
        assert!(db_exit.stopped);
        assert!(engine.calls().contains(&"stop db".to_string()));
    }
}
