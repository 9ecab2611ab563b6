//! Step execution
//!
//! Runs one substituted step against the container engine and reports the
//! outcome on the step's streams. Every stream opens with a banner and
//! closes with a line tagged with the step's terminal status.

pub mod build;
pub mod run;
pub mod service;
pub mod stack;

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::time::Duration;

use conveyor_core::domain::build::StepStatus;
use conveyor_core::domain::parameter::ResolvedParameters;
use conveyor_core::domain::step::Step;
use conveyor_core::domain::task::Task;
use conveyor_core::dto::build::StepDetail;
use futures::FutureExt;

use crate::emitter::{Emitter, StreamWriter};
use crate::engine::ContainerEngine;
use crate::error::{ExecutionError, Result};

/// What a step needs from the build it belongs to
pub struct StepContext<'a> {
    pub engine: &'a dyn ContainerEngine,
    pub task: &'a Task,
    pub params: &'a ResolvedParameters,

    /// Working tree of the project, mounted into run containers
    pub workspace: &'a Path,

    /// Unique per build step; prefixes container and network names
    pub run_id: String,

    pub stop_grace: Duration,
}

impl StepContext<'_> {
    pub fn network_name(&self) -> String {
        format!("conveyor-{}", self.run_id)
    }

    pub fn container_name(&self, service: &str) -> String {
        format!("{}-{}", self.run_id, service)
    }
}

/// Writers for every stream of one build step, by stream name
pub struct Writers(BTreeMap<String, StreamWriter>);

impl Writers {
    pub fn new(emitter: &Emitter, detail: &StepDetail) -> Self {
        Self(
            detail
                .streams
                .iter()
                .map(|stream| (stream.name.clone(), emitter.writer(detail.step.id, stream)))
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Result<&StreamWriter> {
        self.0
            .get(name)
            .ok_or_else(|| ExecutionError::MissingStream(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamWriter> {
        self.0.values()
    }

    /// Reports `message` and fails every stream
    pub fn fail(&self, message: &str) {
        for writer in self.iter() {
            writer.line(message);
            writer.finish(StepStatus::Failed, None);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub status: StepStatus,

    /// Exit code per stream; `None` when nothing exited on its own
    pub exit_codes: BTreeMap<String, Option<i64>>,
}

impl StepOutcome {
    pub fn single(stream: &str, status: StepStatus, exit_code: Option<i64>) -> Self {
        let mut exit_codes = BTreeMap::new();
        exit_codes.insert(stream.to_string(), exit_code);
        Self { status, exit_codes }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// Runs `step`, which must already have its parameters substituted
pub async fn execute(ctx: &StepContext<'_>, step: &Step, writers: &Writers) -> StepOutcome {
    let description = match step.description() {
        "" => step.kind(),
        description => description,
    };
    for writer in writers.iter() {
        writer.banner(description);
    }

    let result = match step {
        Step::Run(run) => run::execute(ctx, run, writers).await,
        Step::Build(build) => build::execute(ctx, build, writers).await,
        Step::Stack(stack) => stack::execute(ctx, stack, writers).await,
    };

    match result {
        Ok(outcome) => {
            for writer in writers.iter() {
                let code = outcome.exit_codes.get(writer.name()).copied().flatten();
                writer.finish(outcome.status, code);
            }
            outcome
        }
        Err(e) => {
            tracing::error!("Unexpected error in step {}: {}", ctx.run_id, e);
            writers.fail(&format!("error: {e}"));
            StepOutcome {
                status: StepStatus::Failed,
                exit_codes: BTreeMap::new(),
            }
        }
    }
}

/// Runs `body` with a dedicated network that is removed afterwards, even
/// when `body` fails or panics
pub async fn with_network<T, F>(engine: &dyn ContainerEngine, name: &str, body: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    engine.create_network(name).await?;

    let result = AssertUnwindSafe(body).catch_unwind().await;

    if let Err(e) = engine.remove_network(name).await {
        tracing::warn!("Could not remove network {}: {}", name, e);
    }

    match result {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use conveyor_core::domain::build::{BuildStep, Stream};
    use conveyor_core::dto::protocol::{BuilderMessage, LogLine};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    /// Writers for a step with the given streams plus the receiving end
    pub fn writers(streams: &[&str]) -> (Writers, mpsc::UnboundedReceiver<BuilderMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let step = BuildStep::new(Uuid::new_v4(), 0);
        let detail = StepDetail {
            streams: streams.iter().map(|name| Stream::new(step.id, *name)).collect(),
            step,
        };
        let emitter = Emitter::new(tx, detail.step.build_id);
        (Writers::new(&emitter, &detail), rx)
    }

    pub fn drain(rx: &mut mpsc::UnboundedReceiver<BuilderMessage>) -> Vec<LogLine> {
        let mut lines = Vec::new();
        while let Ok(BuilderMessage::Log(line)) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    pub fn context<'a>(
        engine: &'a dyn ContainerEngine,
        task: &'a Task,
        params: &'a ResolvedParameters,
        workspace: &'a Path,
    ) -> StepContext<'a> {
        StepContext {
            engine,
            task,
            params,
            workspace,
            run_id: "b1-0".to_string(),
            stop_grace: Duration::from_millis(50),
        }
    }

    pub fn task() -> Task {
        Task::from_yaml("name: test\nsteps:\n  - type: build\n").unwrap()
    }
}
