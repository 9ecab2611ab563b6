//! Execution service
//!
//! Runs one build command end to end:
//! - prepares the project's working tree
//! - resolves the task parameters once, built-ins included
//! - validates, substitutes and executes each step in order
//!
//! The first step that does not succeed ends the build.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conveyor_core::domain::build::{BuildStatus, StepStatus};
use conveyor_core::domain::parameter::{self, BUILD_ID, GIT_COMMIT, GIT_SHORT_COMMIT, PROJECT_ID};
use conveyor_core::dto::protocol::{BuilderMessage, Command};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::checkout;
use crate::config::Config;
use crate::emitter::Emitter;
use crate::engine::ContainerEngine;
use crate::error::{ExecutionError, Result};
use crate::params::ProcessValueSource;
use crate::step::{self, StepContext, Writers};

/// Service trait for executing build commands
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Executes `command`, sending its log lines through `sender`
    ///
    /// # Returns
    /// The terminal status the build reached on this builder
    async fn execute(
        &self,
        command: Command,
        sender: mpsc::UnboundedSender<BuilderMessage>,
    ) -> BuildStatus;
}

/// Standard implementation of ExecutionService
pub struct StandardExecutionService {
    engine: Arc<dyn ContainerEngine>,
    workspace_dir: PathBuf,
    stop_grace: Duration,
    parameter_timeout: Duration,
}

impl StandardExecutionService {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: &Config) -> Self {
        Self {
            engine,
            workspace_dir: config.workspace_dir.clone(),
            stop_grace: config.stop_grace_period,
            parameter_timeout: config.derived_parameter_timeout,
        }
    }

    async fn run(&self, command: &Command, emitter: &Emitter) -> Result<BuildStatus> {
        if command.steps.len() != command.task.steps.len() {
            return Err(ExecutionError::StepMismatch {
                expected: command.task.steps.len(),
                got: command.steps.len(),
            });
        }

        let workspace = checkout::prepare(&self.workspace_dir, &command.project).await?;

        let source = ProcessValueSource::new(workspace.clone(), self.parameter_timeout);
        let params = parameter::resolve(
            &command.task.parameters,
            &command.build.parameters,
            &builtins(command),
            &source,
        )
        .await?;
        let emitter = emitter.clone().with_secrets(params.secret_values());

        for (task_step, detail) in command.task.steps.iter().zip(&command.steps) {
            let writers = Writers::new(&emitter, detail);
            let number = detail.step.number;

            if let Err(e) = task_step.validate(&params) {
                warn!("Step {} of build {} is invalid: {}", number, command.build.id, e);
                writers.fail(&format!("error: {e}"));
                return Ok(BuildStatus::Failed);
            }

            let step = task_step.set_params(&params);
            let ctx = StepContext {
                engine: self.engine.as_ref(),
                task: &command.task,
                params: &params,
                workspace: &workspace,
                run_id: format!("{}-{}", command.build.id, number),
                stop_grace: self.stop_grace,
            };

            let outcome = step::execute(&ctx, &step, &writers).await;
            if !outcome.is_success() {
                info!("Step {} of build {} failed", number, command.build.id);
                return Ok(BuildStatus::Failed);
            }
        }

        Ok(BuildStatus::Success)
    }
}

#[async_trait]
impl ExecutionService for StandardExecutionService {
    async fn execute(
        &self,
        command: Command,
        sender: mpsc::UnboundedSender<BuilderMessage>,
    ) -> BuildStatus {
        let build_id = command.build.id;
        info!(
            "Running build {} of task {} ({} step(s))",
            build_id,
            command.task.name,
            command.steps.len()
        );

        let emitter = Emitter::new(sender, build_id);
        let status = match self.run(&command, &emitter).await {
            Ok(status) => status,
            Err(e) => {
                error!("Build {} failed before its steps ran: {}", build_id, e);
                fail_first_stream(&command, &emitter, &format!("error: {e}"));
                BuildStatus::Failed
            }
        };

        info!("Build {} finished: {}", build_id, status);
        status
    }
}

/// Parameters every build gets without declaring them
fn builtins(command: &Command) -> BTreeMap<String, String> {
    BTreeMap::from([
        (BUILD_ID.to_string(), command.build.id.to_string()),
        (GIT_COMMIT.to_string(), command.commit.hash.clone()),
        (GIT_SHORT_COMMIT.to_string(), command.commit.short_hash().to_string()),
        (PROJECT_ID.to_string(), command.project.id.to_string()),
    ])
}

fn fail_first_stream(command: &Command, emitter: &Emitter, message: &str) {
    let Some(detail) = command.steps.first() else {
        return;
    };
    if let Some(stream) = detail.streams.first() {
        let writer = emitter.writer(detail.step.id, stream);
        writer.line(message);
        writer.finish(StepStatus::Failed, None);
    }
}
