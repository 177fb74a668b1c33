use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::{error::EngineError, process::run_to_completion};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub source: PathBuf,
    pub output: PathBuf,
    /// Injected into the notebook's parameters cell as string values.
    pub parameters: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub output: PathBuf,
    pub duration: Duration,
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Runs every cell of `request.source` and writes the executed notebook
    /// to `request.output`, replacing any previous file.
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionReport, EngineError>;
    fn name(&self) -> &'static str;
}

/// Executes notebooks through the `papermill` command line.
#[derive(Debug, Clone)]
pub struct PapermillEngine {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl PapermillEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, request: &ExecutionRequest) -> Command {
        let mut command = Command::new(&self.program);
        command.arg(&request.source).arg(&request.output);
        for (name, value) in &request.parameters {
            // -r keeps the value a raw string instead of letting papermill infer a type.
            command.arg("-r").arg(name).arg(value);
        }
        command
    }
}

#[async_trait]
impl ExecutionEngine for PapermillEngine {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionReport, EngineError> {
        let program = self.program.display().to_string();
        info!(
            program = %program,
            source = %request.source.display(),
            output = %request.output.display(),
            timeout_secs = ?self.timeout.map(|t| t.as_secs()),
            "starting notebook execution"
        );

        let started = Instant::now();
        run_to_completion(self.command(request), &program, self.timeout).await?;
        let duration = started.elapsed();

        info!(
            source = %request.source.display(),
            duration_ms = duration.as_millis() as u64,
            "notebook execution finished"
        );
        Ok(ExecutionReport {
            output: request.output.clone(),
            duration,
        })
    }

    fn name(&self) -> &'static str {
        "papermill"
    }
}

#[cfg(test)]
#[path = "tests/papermill_tests.rs"]
mod tests;
