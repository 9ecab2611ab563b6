//! Derived parameter values
//!
//! A derived parameter names a command in its `use` field. The command is
//! run in the project's working tree with each argument passed as
//! `--key=value`; its trimmed stdout becomes the value.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use conveyor_core::domain::parameter::{DerivedParameter, DerivedValueSource};
use conveyor_core::{TaskError, TaskResult};
use tokio::process::Command;

pub struct ProcessValueSource {
    working_dir: PathBuf,
    timeout: Duration,
}

impl ProcessValueSource {
    pub fn new(working_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            working_dir,
            timeout,
        }
    }
}

#[async_trait]
impl DerivedValueSource for ProcessValueSource {
    async fn derive(&self, parameter: &DerivedParameter) -> TaskResult<String> {
        let failed = |reason: String| TaskError::ParameterResolution {
            name: parameter.name.clone(),
            reason,
        };

        let mut words = parameter.using.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| failed("no command given".to_string()))?;

        let mut command = Command::new(program);
        command
            .args(words)
            .args(
                parameter
                    .arguments
                    .iter()
                    .map(|(key, value)| format!("--{key}={value}")),
            )
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        tracing::debug!("Deriving parameter {} with {}", parameter.name, program);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| failed(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| failed(format!("could not run {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!("{} ({})", output.status, stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
