//! In-process engine used by the step tests

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use conveyor_core::domain::task::RegistryAuth;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{ContainerEngine, ContainerSpec, EngineError, EngineResult, ImageBuild};
use crate::emitter::StreamWriter;

/// How a fake container ends
#[derive(Debug, Clone, Copy)]
pub enum FakeExit {
    /// Exits on its own with this code
    Code(i64),

    /// Runs until it is stopped, then exits with 143
    UntilStopped,
}

#[derive(Default)]
pub struct FakeEngine {
    calls: Mutex<Vec<String>>,
    containers: Mutex<HashMap<String, ContainerSpec>>,

    /// Keyed by the alias of the container
    exits: Mutex<HashMap<String, FakeExit>>,
    output: Mutex<HashMap<String, Vec<String>>>,
    failing_images: Mutex<HashSet<String>>,

    stopped: Mutex<HashSet<String>>,
    stop_signal: Notify,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exit(self, alias: &str, exit: FakeExit) -> Self {
        self.exits.lock().insert(alias.to_string(), exit);
        self
    }

    pub fn output(self, alias: &str, lines: &[&str]) -> Self {
        self.output.lock().insert(
            alias.to_string(),
            lines.iter().map(|l| format!("{l}\n")).collect(),
        );
        self
    }

    pub fn failing_pull(self, image: &str) -> Self {
        self.failing_images.lock().insert(image.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn alias(&self, name: &str) -> String {
        self.containers
            .lock()
            .get(name)
            .map(|spec| spec.alias.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn pull_image(
        &self,
        image: &str,
        _auth: Option<&RegistryAuth>,
        output: &StreamWriter,
    ) -> EngineResult<()> {
        self.record(format!("pull {image}"));
        if self.failing_images.lock().contains(image) {
            return Err(EngineError::Pull(format!("manifest for {image} not found")));
        }
        output.line(&format!("Pulled {image}"));
        Ok(())
    }

    async fn build_image(&self, build: &ImageBuild, output: &StreamWriter) -> EngineResult<()> {
        self.record(format!("build {}", build.tags.join(",")));
        output.write(b"Step 1/1 : FROM alpine\n");
        Ok(())
    }

    async fn create_network(&self, name: &str) -> EngineResult<()> {
        self.record(format!("create network {name}"));
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> EngineResult<()> {
        self.record(format!("remove network {name}"));
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> EngineResult<()> {
        self.record(format!("create {}", spec.alias));
        self.containers.lock().insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn start_container(&self, name: &str) -> EngineResult<()> {
        self.record(format!("start {}", self.alias(name)));
        Ok(())
    }

    fn logs<'a>(&'a self, name: &str) -> BoxStream<'a, EngineResult<Bytes>> {
        let lines = self
            .output
            .lock()
            .get(&self.alias(name))
            .cloned()
            .unwrap_or_default();
        stream::iter(lines.into_iter().map(|l| Ok(Bytes::from(l)))).boxed()
    }

    async fn wait_container(&self, name: &str) -> EngineResult<i64> {
        let alias = self.alias(name);
        let exit = self
            .exits
            .lock()
            .get(&alias)
            .copied()
            .unwrap_or(FakeExit::Code(0));

        match exit {
            FakeExit::Code(code) => {
                // Let siblings start before the first one exits
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(code)
            }
            FakeExit::UntilStopped => loop {
                let signal = self.stop_signal.notified();
                if self.stopped.lock().contains(name) {
                    return Ok(143);
                }
                signal.await;
            },
        }
    }

    async fn stop_container(&self, name: &str, _grace: Duration) -> EngineResult<()> {
        self.record(format!("stop {}", self.alias(name)));
        self.stopped.lock().insert(name.to_string());
        self.stop_signal.notify_waiters();
        Ok(())
    }

    async fn kill_container(&self, name: &str) -> EngineResult<()> {
        self.record(format!("kill {}", self.alias(name)));
        self.stopped.lock().insert(name.to_string());
        self.stop_signal.notify_waiters();
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> EngineResult<()> {
        self.record(format!("remove {}", self.alias(name)));
        Ok(())
    }
}
