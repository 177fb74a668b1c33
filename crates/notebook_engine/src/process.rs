use std::{process::Stdio, time::Duration};

use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};

use crate::error::EngineError;

/// Lines of stderr kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Runs `command` to completion, capturing stdout and stderr. A non-zero exit
/// status is an error carrying the tail of stderr. The child is killed when
/// `limit` elapses.
pub(crate) async fn run_to_completion(
    mut command: Command,
    program: &str,
    limit: Option<Duration>,
) -> Result<std::process::Output, EngineError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|source| EngineError::Spawn {
        program: program.to_string(),
        source,
    })?;
    debug!(program, pid = ?child.id(), "spawned child process");

    let output = match limit {
        Some(limit) => match timeout(limit, child.wait_with_output()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(program, timeout_secs = limit.as_secs(), "child process timed out");
                return Err(EngineError::Timeout {
                    program: program.to_string(),
                    timeout_secs: limit.as_secs(),
                });
            }
        },
        None => child.wait_with_output().await,
    }
    .map_err(|source| EngineError::Io {
        program: program.to_string(),
        source,
    })?;

    if !output.status.success() {
        return Err(EngineError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: stderr_tail(&output.stderr),
        });
    }
    Ok(output)
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n").trim().to_string()
}
