//! Output emitter
//!
//! Turns container output into numbered log lines and sends them to the
//! coordinator. Each stream of a step gets its own [`StreamWriter`]; lines
//! are numbered per stream from 1, tagged with the step status current at
//! emission time, and have every secret parameter value masked.

use std::sync::Arc;

use conveyor_core::domain::build::{StepStatus, Stream};
use conveyor_core::dto::protocol::{BuilderMessage, LogLine};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

const INFO_ANSI: &str = "\x1b[1;34m";
const SUCCESS_ANSI: &str = "\x1b[1;32m";
const ERROR_ANSI: &str = "\x1b[1;31m";
const RESET_ANSI: &str = "\x1b[0m";

pub const MASK: &str = "***";

/// Creates stream writers for one build
#[derive(Clone)]
pub struct Emitter {
    sender: mpsc::UnboundedSender<BuilderMessage>,
    build_id: Uuid,
    secrets: Arc<Vec<String>>,
}

impl Emitter {
    pub fn new(sender: mpsc::UnboundedSender<BuilderMessage>, build_id: Uuid) -> Self {
        Self {
            sender,
            build_id,
            secrets: Arc::new(Vec::new()),
        }
    }

    /// Values to mask in every line emitted from now on; longest first
    pub fn with_secrets(mut self, secrets: Vec<String>) -> Self {
        self.secrets = Arc::new(secrets);
        self
    }

    pub fn writer(&self, step_id: Uuid, stream: &Stream) -> StreamWriter {
        StreamWriter {
            name: stream.name.clone(),
            sender: self.sender.clone(),
            build_id: self.build_id,
            step_id,
            stream_id: stream.id,
            secrets: Arc::clone(&self.secrets),
            state: Mutex::new(WriterState {
                next_line: 1,
                pending: Vec::new(),
                status: StepStatus::Running,
            }),
        }
    }
}

struct WriterState {
    next_line: u64,

    /// Bytes after the last newline
    pending: Vec<u8>,

    status: StepStatus,
}

/// Line-buffered writer for one stream
pub struct StreamWriter {
    name: String,
    sender: mpsc::UnboundedSender<BuilderMessage>,
    build_id: Uuid,
    step_id: Uuid,
    stream_id: Uuid,
    secrets: Arc<Vec<String>>,
    state: Mutex<WriterState>,
}

impl StreamWriter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> StepStatus {
        self.state.lock().status
    }

    pub fn set_status(&self, status: StepStatus) {
        self.state.lock().status = status;
    }

    /// Appends raw output; every complete line is emitted
    pub fn write(&self, chunk: &[u8]) {
        let mut state = self.state.lock();
        state.pending.extend_from_slice(chunk);

        while let Some(pos) = state.pending.iter().position(|b| *b == b'\n') {
            let rest = state.pending.split_off(pos + 1);
            let line = std::mem::replace(&mut state.pending, rest);
            let text = String::from_utf8_lossy(&line[..pos]);
            self.emit(&mut state, text.trim_end_matches('\r'));
        }
    }

    /// Emits whatever is left after the last newline
    pub fn flush(&self) {
        let mut state = self.state.lock();
        if state.pending.is_empty() {
            return;
        }
        let line = std::mem::take(&mut state.pending);
        let text = String::from_utf8_lossy(&line);
        self.emit(&mut state, text.trim_end_matches('\r'));
    }

    /// Emits `text` as complete lines, after any buffered output
    pub fn line(&self, text: &str) {
        self.flush();
        let mut state = self.state.lock();
        for line in text.lines() {
            self.emit(&mut state, line);
        }
    }

    pub fn banner(&self, description: &str) {
        self.line(&format!("{INFO_ANSI}## {description}{RESET_ANSI}"));
    }

    /// Marks the stream terminal with a closing banner
    pub fn finish(&self, status: StepStatus, exit_code: Option<i64>) {
        self.flush();

        let (colour, label) = match status {
            StepStatus::Success => (SUCCESS_ANSI, "SUCCESS"),
            _ => (ERROR_ANSI, "FAILED"),
        };
        let text = match exit_code {
            Some(code) => format!("{colour}### {label} (exited: {code}){RESET_ANSI}"),
            None => format!("{colour}### {label}{RESET_ANSI}"),
        };

        let mut state = self.state.lock();
        state.status = status;
        self.emit(&mut state, &text);
    }

    fn emit(&self, state: &mut WriterState, text: &str) {
        let output = self.mask(text);
        let line_number = state.next_line;
        state.next_line += 1;

        let message = BuilderMessage::Log(LogLine {
            stream_id: self.stream_id,
            step_id: self.step_id,
            build_id: self.build_id,
            line_number,
            status: state.status,
            output,
        });
        if self.sender.send(message).is_err() {
            tracing::debug!("Connection closed, dropping line {} of {}", line_number, self.name);
        }
    }

    fn mask(&self, text: &str) -> String {
        let mut output = text.to_string();
        for secret in self.secrets.iter() {
            if output.contains(secret.as_str()) {
                output = output.replace(secret.as_str(), MASK);
            }
        }
        output
    }
}
