//! Built-in `shell` action executing commands on the host.

use crate::runner::{Action, OutputLine, OutputStream, RunnerConfig};
use async_trait::async_trait;
use gantry_core::ports::{ActionOutcome, ActionRequest};
use gantry_core::{Error, Result};
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

pub const SHELL_ACTION: &str = "shell";

/// Runs `params.run` through the configured shell inside the instance workspace.
///
/// Optional params: `working_directory` (relative to the workspace).
pub struct ShellAction {
    config: RunnerConfig,
}

impl ShellAction {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Environment for the child process: workflow env plus `GANTRY_*` context.
    pub fn environment(request: &ActionRequest) -> BTreeMap<String, String> {
        let mut env = request.env.clone();
        env.insert("GANTRY_WORKSPACE".into(), request.workspace.display().to_string());
        env.insert("GANTRY_WORKFLOW".into(), request.workflow.clone());
        env.insert("GANTRY_JOB".into(), request.job_name.clone());
        env.insert("GANTRY_INSTANCE".into(), request.instance_id.to_string());
        env.insert("GANTRY_STEP".into(), request.step_name.clone());
        env.insert("GANTRY_PLATFORM".into(), request.platform.clone());
        env.insert("GANTRY_EVENT_REF".into(), request.event_ref.clone());
        for (axis, value) in request.matrix.iter() {
            env.insert(format!("GANTRY_MATRIX_{}", env_key(axis)), value.to_string());
        }
        env
    }
}

impl Default for ShellAction {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

fn env_key(axis: &str) -> String {
    axis.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn stream_lines<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::Sender<OutputLine>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut line_number = 0u32;
        let mut forwarding = true;

        // Keep draining until EOF so the child never writes into a closed pipe.
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to read action output");
                    break;
                }
            }
            if !forwarding {
                continue;
            }

            while matches!(buf.last(), Some(b'\n' | b'\r')) {
                buf.pop();
            }
            line_number += 1;
            let output = OutputLine {
                stream,
                content: String::from_utf8_lossy(&buf).into_owned(),
                line_number,
                timestamp: chrono::Utc::now(),
            };
            if tx.send(output).await.is_err() {
                forwarding = false;
            }
        }
    })
}

#[async_trait]
impl Action for ShellAction {
    fn name(&self) -> &str {
        SHELL_ACTION
    }

    async fn execute(
        &self,
        request: &ActionRequest,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<ActionOutcome> {
        let command = request
            .action
            .params
            .get("run")
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::InvalidActionParams {
                action: SHELL_ACTION.into(),
                message: "missing `run` parameter".into(),
            })?;

        let working_dir = match request.action.params.get("working_directory") {
            Some(dir) => request.workspace.join(dir),
            None => request.workspace.clone(),
        };

        let start = std::time::Instant::now();
        info!(
            step = %request.step_name,
            command = %command,
            workspace = %working_dir.display(),
            "Executing shell command"
        );

        let mut child = Command::new(&self.config.shell)
            .arg("-c")
            .arg(command)
            .current_dir(&working_dir)
            .envs(Self::environment(request))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Internal(format!("Failed to spawn {}: {}", self.config.shell, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("stderr not captured".into()))?;

        let stdout_handle = stream_lines(stdout, OutputStream::Stdout, output_tx.clone());
        let stderr_handle = stream_lines(stderr, OutputStream::Stderr, output_tx);

        let wait_result = match self.config.timeout_seconds {
            Some(seconds) => match timeout(Duration::from_secs(seconds), child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(seconds, step = %request.step_name, "Command timed out, killing process");
                    let _ = child.kill().await;
                    stdout_handle.abort();
                    stderr_handle.abort();
                    return Err(Error::StepTimeout { seconds });
                }
            },
            None => child.wait().await,
        };

        let _ = stdout_handle.await;
        let _ = stderr_handle.await;

        let status = wait_result?;
        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(exit_code, duration_ms, "Command completed");

        if status.success() {
            Ok(ActionOutcome::success(duration_ms))
        } else {
            let mut outcome =
                ActionOutcome::failure(exit_code, format!("command exited with code {}", exit_code));
            outcome.duration_ms = duration_ms;
            Ok(outcome)
        }
    }
}
